//! WebView engine ports.
//!
//! The rendering engine is consumed through trait objects only: an opaque
//! [`WebView`] handle plus the event set the content coordinator wires.
//! The platform adapter (WebKitGTK in the shipping app) implements these
//! traits and delivers every event on the UI main loop.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::Result;
use crate::mainloop::CancelToken;

pub type WebViewId = String;

/// Load lifecycle events, delivered in source order per navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadEvent {
    Started,
    Committed,
    Finished,
}

/// Coarse load state readable from the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Started,
    Committed,
    Finished,
}

/// Why the web process went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Crashed,
    ExceededMemoryLimit,
    TerminatedByApi,
}

/// An engine-owned favicon image. The engine keeps the pixel data; the
/// adapter holds references until explicitly cleared.
pub trait Texture: Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// PNG-encoded original image.
    fn png_data(&self) -> Option<Vec<u8>>;
    /// PNG-encoded square copy at `size` for external tooling.
    fn scaled_png(&self, size: u32) -> Option<Vec<u8>>;
}

/// In-page find surface.
pub trait FindController: Send + Sync {
    fn search(&self, text: &str, case_insensitive: bool);
    fn search_next(&self);
    fn search_previous(&self);
    fn finish(&self);
}

/// A popup creation request raised by the engine `create` signal.
#[derive(Debug, Clone)]
pub struct PopupRequest {
    pub target_uri: String,
    /// Target frame name; `_blank` marks a tab-like popup.
    pub frame_name: Option<String>,
}

/// A permission prompt raised by the engine. Exactly one of `allow` or
/// `deny` must be invoked.
pub struct PermissionPrompt {
    pub origin: String,
    /// Raw engine permission type string.
    pub kind: String,
    pub allow: Box<dyn FnOnce() + Send>,
    pub deny: Box<dyn FnOnce() + Send>,
}

impl std::fmt::Debug for PermissionPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionPrompt")
            .field("origin", &self.origin)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Event handler bundle installed on a WebView. One slot per engine
/// signal; unset slots mean the event is ignored.
#[derive(Default)]
pub struct WebViewEvents {
    pub on_load_changed: Option<Box<dyn Fn(LoadEvent) + Send + Sync>>,
    pub on_title_changed: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_uri_changed: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_progress_changed: Option<Box<dyn Fn(f64) + Send + Sync>>,
    pub on_favicon_changed: Option<Box<dyn Fn(Arc<dyn Texture>) + Send + Sync>>,
    pub on_close: Option<Box<dyn Fn() + Send + Sync>>,
    /// Must return the related WebView to embed, already inserted into the
    /// widget hierarchy, or `None` to block the popup.
    pub on_create: Option<Box<dyn Fn(PopupRequest) -> Option<Arc<dyn WebView>> + Send + Sync>>,
    pub on_ready_to_show: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_web_process_terminated: Option<Box<dyn Fn(TerminationReason) + Send + Sync>>,
    pub on_permission_request: Option<Box<dyn Fn(PermissionPrompt) + Send + Sync>>,
    pub on_enter_fullscreen: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_leave_fullscreen: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_audio_state_changed: Option<Box<dyn Fn(bool) + Send + Sync>>,
    pub on_link_hover: Option<Box<dyn Fn(Option<&str>) + Send + Sync>>,
    pub on_link_middle_click: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl std::fmt::Debug for WebViewEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebViewEvents").finish_non_exhaustive()
    }
}

/// Opaque browsing engine handle.
pub trait WebView: Send + Sync {
    fn id(&self) -> WebViewId;

    fn load_uri(&self, uri: &str);
    fn load_html(&self, html: &str, base_uri: Option<&str>);
    fn reload(&self);
    fn reload_bypass_cache(&self);
    fn stop(&self);
    fn go_back(&self);
    fn go_forward(&self);

    fn state(&self) -> LoadState;
    fn uri(&self) -> String;
    fn title(&self) -> String;
    fn is_loading(&self) -> bool;
    fn estimated_progress(&self) -> f64;
    fn can_go_back(&self) -> bool;
    fn can_go_forward(&self) -> bool;

    fn set_zoom_level(&self, level: f64);
    fn zoom_level(&self) -> f64;

    fn find_controller(&self) -> Option<Arc<dyn FindController>> {
        None
    }

    /// Engine-specific surfaces; default to unsupported.
    fn open_devtools(&self) {}
    fn print_page(&self) {}

    /// Install the event handler bundle, replacing any previous one.
    fn set_event_handlers(&self, events: WebViewEvents);

    /// Run a script in the page context.
    fn run_script(&self, script: &str);

    /// Visibility control for the first-paint reveal protocol; views are
    /// created hidden.
    fn show(&self);
    fn hide(&self);
    fn is_visible(&self) -> bool;

    /// Ask the engine to close the view; fires the close event.
    fn close(&self);

    fn is_destroyed(&self) -> bool;
    fn destroy(&self);
}

/// Pool of reusable WebViews. The pool owns every view; coordinators hold
/// borrows keyed by pane id and must release them.
pub trait WebViewPool: Send + Sync {
    fn acquire(&self, cancel: &CancelToken) -> Result<Arc<dyn WebView>>;
    fn release(&self, webview: Arc<dyn WebView>);
    fn prewarm(&self, n: usize);
    fn size(&self) -> usize;
    fn close(&self);
}

/// Creates WebViews outside the pool. Related views share cookies and
/// session state with their parent (the popup contract).
pub trait WebViewFactory: Send + Sync {
    fn create(&self, cancel: &CancelToken) -> Result<Arc<dyn WebView>>;
    fn create_related(&self, parent: &WebViewId, cancel: &CancelToken) -> Result<Arc<dyn WebView>>;
}

/// Platform backend toggled by the refcounted [`IdleInhibitor`].
pub trait IdleInhibitBackend: Send + Sync {
    fn set_inhibited(&self, inhibited: bool);
}

/// No-op backend for tests and headless runs.
#[derive(Debug, Default)]
pub struct NoopIdleBackend;

impl IdleInhibitBackend for NoopIdleBackend {
    fn set_inhibited(&self, _inhibited: bool) {}
}

/// Refcounted idle/screensaver inhibition. Every `inhibit` must be
/// balanced by an `uninhibit`; extra `uninhibit` calls are no-ops.
pub struct IdleInhibitor {
    count: Mutex<u32>,
    backend: Arc<dyn IdleInhibitBackend>,
}

impl IdleInhibitor {
    pub fn new(backend: Arc<dyn IdleInhibitBackend>) -> Self {
        Self {
            count: Mutex::new(0),
            backend,
        }
    }

    pub fn inhibit(&self) {
        let mut count = self.count.lock();
        *count += 1;
        if *count == 1 {
            self.backend.set_inhibited(true);
        }
    }

    pub fn uninhibit(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.backend.set_inhibited(false);
        }
    }

    pub fn active_count(&self) -> u32 {
        *self.count.lock()
    }
}
