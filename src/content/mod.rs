//! Content coordinator: WebView lifecycle and the wiring between engine
//! events, the domain model and the UI surfaces.
//!
//! One coordinator serves every pane in the window. It owns the
//! `pane_id -> WebView` map, installs the event handler bundle on each
//! acquired view, runs the popup/OAuth lifecycle and drives the
//! first-paint reveal protocol. Engine events arrive on the UI main loop;
//! background work re-enters through the coalescer. No lock is held while
//! an external callback runs.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::config::{Config, PopupBehavior, OAUTH_CLOSE_DELAY, OAUTH_SAFETY_TIMEOUT, PARENT_REFRESH_DEBOUNCE};
use crate::engine::{
    IdleInhibitor, LoadEvent, PopupRequest, TerminationReason, Texture, WebView, WebViewEvents,
    WebViewId, WebViewPool, WebViewFactory,
};
use crate::error::Result;
use crate::favicon::FaviconService;
use crate::history::ZoomStore;
use crate::mainloop::{CancelToken, MainLoop, TimerHandle};
use crate::navigation::{is_external_scheme, normalized_domain};
use crate::permissions::PermissionArbiter;
use crate::tabs::SharedTabs;
use crate::widget::WidgetRegistry;
use crate::workspace::{Pane, PaneId, Workspace};

pub mod oauth;
pub mod popup;
pub mod theme;

use oauth::OAuthState;
use popup::{behavior_for, classify, PendingPopup, PopupPhase};
use theme::{background_for, should_suppress_blank, theme_script, wants_theme_script, PageBackground, ThemeSpec};

/// Startup/trace instrumentation sink.
pub trait TraceSink: Send + Sync {
    fn mark(&self, name: &str);
}

#[derive(Debug, Default)]
pub struct NoopTrace;

impl TraceSink for NoopTrace {
    fn mark(&self, _name: &str) {}
}

/// Request handed to the workspace layer when a popup needs a pane. The
/// WebView must be inside the widget hierarchy when this returns.
pub struct PopupInsertRequest {
    pub uri: String,
    pub parent_pane_id: PaneId,
    pub behavior: PopupBehavior,
    pub webview: Arc<dyn WebView>,
}

type Cb<T> = Mutex<Option<Arc<T>>>;

#[derive(Default)]
struct Callbacks {
    /// (url, title) -> history store
    title_updated: Cb<dyn Fn(&str, &str) + Send + Sync>,
    /// (pane_id, url) on load committed and SPA navigation
    history_record: Cb<dyn Fn(&str, &str) + Send + Sync>,
    /// (pane_id, url) -> snapshot trigger
    pane_uri_updated: Cb<dyn Fn(&str, &str) + Send + Sync>,
    window_title_changed: Cb<dyn Fn(&str) + Send + Sync>,
    webview_shown: Cb<dyn Fn(&str) + Send + Sync>,
    active_navigation_committed: Cb<dyn Fn(&str) + Send + Sync>,
    fullscreen_changed: Cb<dyn Fn(bool) + Send + Sync>,
    webview_focused: Cb<dyn Fn(&str) + Send + Sync>,
    first_load_started: Cb<dyn Fn() + Send + Sync>,
    /// Workspace-level close of a popup pane
    popup_close_pane: Cb<dyn Fn(&str) + Send + Sync>,
    /// Insert a popup pane; must uphold the insert-before-return contract
    popup_insert: Cb<dyn Fn(PopupInsertRequest) -> Result<PaneId> + Send + Sync>,
    /// Middle-click link -> new pane with the configured behavior
    open_pane: Cb<dyn Fn(&str, PopupBehavior) + Send + Sync>,
    /// Non-web scheme hand-off to the platform
    external_opener: Cb<dyn Fn(&str) + Send + Sync>,
    /// Re-inject user scripts into a pane
    script_refresher: Cb<dyn Fn(&str) + Send + Sync>,
}

#[derive(Debug, Default, Clone, Copy)]
struct InhibitFlags {
    fullscreen: bool,
    audio: bool,
}

/// Popup state tables share one lock; they are always touched together
/// during popup transitions.
#[derive(Default)]
struct PopupTables {
    pending: HashMap<WebViewId, PendingPopup>,
    oauth: HashMap<WebViewId, OAuthState>,
    refresh: HashMap<PaneId, TimerHandle>,
    safety: HashMap<WebViewId, TimerHandle>,
    close_timers: HashMap<WebViewId, TimerHandle>,
}

pub struct ContentCoordinator {
    pool: Arc<dyn WebViewPool>,
    factory: Arc<dyn WebViewFactory>,
    config: Config,
    main_loop: Arc<dyn MainLoop>,
    favicons: Arc<FaviconService>,
    idle: Arc<IdleInhibitor>,
    permissions: Arc<PermissionArbiter>,
    registry: Arc<WidgetRegistry>,
    tabs: SharedTabs,
    trace: Arc<dyn TraceSink>,

    zoom_store: Mutex<Option<Arc<dyn ZoomStore>>>,

    web_views: RwLock<HashMap<PaneId, Arc<dyn WebView>>>,
    /// Ids of adopted related views; these are destroyed on release
    /// instead of re-entering the pool.
    related_views: Mutex<HashSet<WebViewId>>,
    pane_titles: Mutex<HashMap<PaneId, String>>,
    nav_origins: Mutex<HashMap<PaneId, String>>,
    pending_reveal: Mutex<HashSet<PaneId>>,
    pending_theme: Mutex<HashMap<PaneId, ThemeSpec>>,
    pending_script_refresh: Mutex<HashSet<PaneId>>,
    inhibits: Mutex<HashMap<PaneId, InhibitFlags>>,
    popups: RwLock<PopupTables>,
    active_override: Mutex<Option<PaneId>>,

    first_load_fired: AtomicBool,
    first_paint_done: AtomicBool,

    callbacks: Callbacks,
    weak: Weak<ContentCoordinator>,
}

impl ContentCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<dyn WebViewPool>,
        factory: Arc<dyn WebViewFactory>,
        config: Config,
        main_loop: Arc<dyn MainLoop>,
        favicons: Arc<FaviconService>,
        idle: Arc<IdleInhibitor>,
        permissions: Arc<PermissionArbiter>,
        registry: Arc<WidgetRegistry>,
        tabs: SharedTabs,
        trace: Arc<dyn TraceSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            pool,
            factory,
            config,
            main_loop,
            favicons,
            idle,
            permissions,
            registry,
            tabs,
            trace,
            zoom_store: Mutex::new(None),
            web_views: RwLock::new(HashMap::new()),
            related_views: Mutex::new(HashSet::new()),
            pane_titles: Mutex::new(HashMap::new()),
            nav_origins: Mutex::new(HashMap::new()),
            pending_reveal: Mutex::new(HashSet::new()),
            pending_theme: Mutex::new(HashMap::new()),
            pending_script_refresh: Mutex::new(HashSet::new()),
            inhibits: Mutex::new(HashMap::new()),
            popups: RwLock::new(PopupTables::default()),
            active_override: Mutex::new(None),
            first_load_fired: AtomicBool::new(false),
            first_paint_done: AtomicBool::new(false),
            callbacks: Callbacks::default(),
            weak: weak.clone(),
        })
    }

    // Callback setters, wired once at window assembly.

    pub fn set_on_title_updated<F: Fn(&str, &str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.title_updated.lock() = Some(Arc::new(f));
    }

    pub fn set_on_history_record<F: Fn(&str, &str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.history_record.lock() = Some(Arc::new(f));
    }

    pub fn set_on_pane_uri_updated<F: Fn(&str, &str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.pane_uri_updated.lock() = Some(Arc::new(f));
    }

    pub fn set_on_window_title_changed<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.window_title_changed.lock() = Some(Arc::new(f));
    }

    pub fn set_on_webview_shown<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.webview_shown.lock() = Some(Arc::new(f));
    }

    pub fn set_on_active_navigation_committed<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.active_navigation_committed.lock() = Some(Arc::new(f));
    }

    pub fn set_on_fullscreen_changed<F: Fn(bool) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.fullscreen_changed.lock() = Some(Arc::new(f));
    }

    pub fn set_on_webview_focused<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.webview_focused.lock() = Some(Arc::new(f));
    }

    pub fn set_on_first_load_started<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.first_load_started.lock() = Some(Arc::new(f));
    }

    pub fn set_on_popup_close_pane<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.popup_close_pane.lock() = Some(Arc::new(f));
    }

    pub fn set_on_popup_insert<F>(&self, f: F)
    where
        F: Fn(PopupInsertRequest) -> Result<PaneId> + Send + Sync + 'static,
    {
        *self.callbacks.popup_insert.lock() = Some(Arc::new(f));
    }

    pub fn set_on_open_pane<F: Fn(&str, PopupBehavior) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.open_pane.lock() = Some(Arc::new(f));
    }

    pub fn set_external_opener<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.external_opener.lock() = Some(Arc::new(f));
    }

    pub fn set_script_refresher<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.script_refresher.lock() = Some(Arc::new(f));
    }

    pub fn set_zoom_store(&self, store: Arc<dyn ZoomStore>) {
        *self.zoom_store.lock() = Some(store);
    }

    /// The WebView bound to a pane, if alive.
    pub fn webview_for(&self, pane_id: &str) -> Option<Arc<dyn WebView>> {
        self.web_views.read().get(pane_id).cloned()
    }

    /// Return the pane's WebView, acquiring one from the pool and
    /// installing event handlers on first use.
    pub fn ensure_web_view(&self, pane_id: &str) -> Result<Arc<dyn WebView>> {
        if let Some(webview) = self.webview_for(pane_id) {
            if !webview.is_destroyed() {
                return Ok(webview);
            }
            self.web_views.write().remove(pane_id);
            self.related_views.lock().remove(&webview.id());
        }

        let webview = self.pool.acquire(&CancelToken::new())?;
        // Views stay hidden until their first painted frame.
        webview.hide();
        self.install_handlers(pane_id, &webview);
        self.web_views
            .write()
            .insert(pane_id.to_string(), webview.clone());
        self.trace.mark("tab_created");
        log::debug!("WebView {} bound to pane {}", webview.id(), pane_id);
        Ok(webview)
    }

    /// Bind an externally created WebView (a popup's related view) to a
    /// pane. No-op when the pane already holds this view.
    pub fn adopt_web_view(&self, pane_id: &str, webview: &Arc<dyn WebView>) {
        {
            let views = self.web_views.read();
            if let Some(existing) = views.get(pane_id) {
                if existing.id() == webview.id() {
                    return;
                }
            }
        }
        self.install_handlers(pane_id, webview);
        self.web_views
            .write()
            .insert(pane_id.to_string(), webview.clone());
        self.related_views.lock().insert(webview.id());
    }

    /// Drop the pane's WebView: balance idle inhibitions and clear
    /// per-pane state. Pool-acquired views go back to the pool; adopted
    /// related views are destroyed, since a related view's identity is
    /// bound to its opener and must never resurface in another pane.
    pub fn release_web_view(&self, pane_id: &str) {
        let webview = self.web_views.write().remove(pane_id);

        let flags = self.inhibits.lock().remove(pane_id).unwrap_or_default();
        if flags.fullscreen {
            self.idle.uninhibit();
        }
        if flags.audio {
            self.idle.uninhibit();
        }

        self.pane_titles.lock().remove(pane_id);
        self.nav_origins.lock().remove(pane_id);
        self.pending_reveal.lock().remove(pane_id);
        self.pending_theme.lock().remove(pane_id);
        self.pending_script_refresh.lock().remove(pane_id);

        if let Some(webview) = webview {
            webview.set_event_handlers(WebViewEvents::default());
            if self.related_views.lock().remove(&webview.id()) {
                log::debug!(
                    "Destroying related WebView {} from pane {}",
                    webview.id(),
                    pane_id
                );
                webview.destroy();
            } else {
                log::debug!("Releasing WebView {} from pane {}", webview.id(), pane_id);
                self.pool.release(webview);
            }
        }
    }

    /// Ensure a WebView per pane of the workspace and load any pane whose
    /// stored URI differs from what the view shows.
    pub fn attach_to_workspace(&self, ws: &Workspace) -> Result<()> {
        for pane_id in ws.pane_ids() {
            let webview = self.ensure_web_view(&pane_id)?;
            if let Some(pane) = ws.pane(&pane_id) {
                if !pane.uri.is_empty() && pane.uri != webview.uri() {
                    webview.load_uri(&pane.uri);
                }
            }
        }
        Ok(())
    }

    /// Transient UI (floating overlays) can override which pane counts as
    /// active without touching the workspace.
    pub fn set_active_override(&self, pane_id: Option<PaneId>) {
        *self.active_override.lock() = pane_id;
    }

    pub fn active_pane_id(&self) -> Option<PaneId> {
        if let Some(id) = self.active_override.lock().clone() {
            return Some(id);
        }
        let tabs = self.tabs.read();
        tabs.active_tab().map(|t| t.workspace.active_pane_id.clone())
    }

    pub fn active_web_view(&self) -> Option<Arc<dyn WebView>> {
        self.active_pane_id().and_then(|id| self.webview_for(&id))
    }

    /// Record the URL the user asked for, before redirects, so favicons
    /// can be attributed to the original domain too.
    pub fn record_nav_origin(&self, pane_id: &str, uri: &str) {
        self.nav_origins
            .lock()
            .insert(pane_id.to_string(), uri.to_string());
    }

    pub fn nav_origin(&self, pane_id: &str) -> Option<String> {
        self.nav_origins.lock().get(pane_id).cloned()
    }

    /// UI layer reports a focus grab inside a pane's WebView.
    pub fn webview_focused(&self, pane_id: &str) {
        let cb = self.callbacks.webview_focused.lock().clone();
        if let Some(cb) = cb {
            cb(pane_id);
        }
    }

    // ----- reveal protocol -----

    pub fn mark_pending_reveal(&self, pane_id: &str) {
        self.pending_reveal.lock().insert(pane_id.to_string());
    }

    pub fn clear_pending_reveal(&self, pane_id: &str) {
        self.pending_reveal.lock().remove(pane_id);
    }

    /// Reveal at most once per mark. First reveal process-wide emits the
    /// first-paint trace marks.
    pub fn reveal_if_pending(&self, pane_id: &str) {
        if !self.pending_reveal.lock().remove(pane_id) {
            return;
        }
        if let Some(webview) = self.webview_for(pane_id) {
            webview.show();
        }
        if !self.first_paint_done.swap(true, Ordering::SeqCst) {
            self.trace.mark("first_paint");
            self.trace.mark("startup_complete");
        }
        let cb = self.callbacks.webview_shown.lock().clone();
        if let Some(cb) = cb {
            cb(pane_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_reveal_pending(&self, pane_id: &str) -> bool {
        self.pending_reveal.lock().contains(pane_id)
    }

    // ----- appearance -----

    /// Apply a theme to every internal page, deferring panes that are
    /// mid-load until their navigation commits.
    pub fn apply_theme(&self, spec: &ThemeSpec) {
        let views: Vec<(PaneId, Arc<dyn WebView>)> = self
            .web_views
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (pane_id, webview) in views {
            if !wants_theme_script(&webview.uri()) {
                continue;
            }
            if webview.is_loading() {
                self.pending_theme.lock().insert(pane_id, spec.clone());
            } else {
                webview.run_script(&theme_script(spec));
            }
        }
    }

    /// Re-inject user scripts, deferred while the pane loads.
    pub fn request_script_refresh(&self, pane_id: &str) {
        let loading = self
            .webview_for(pane_id)
            .map(|wv| wv.is_loading())
            .unwrap_or(false);
        if loading {
            self.pending_script_refresh
                .lock()
                .insert(pane_id.to_string());
            return;
        }
        let cb = self.callbacks.script_refresher.lock().clone();
        if let Some(cb) = cb {
            cb(pane_id);
        }
    }

    // ----- engine event wiring -----

    fn install_handlers(&self, pane_id: &str, webview: &Arc<dyn WebView>) {
        let mut events = WebViewEvents::default();

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_title_changed = Some(Box::new(move |title| {
            if let Some(this) = weak.upgrade() {
                this.handle_title_changed(&pane, title);
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_favicon_changed = Some(Box::new(move |texture| {
            if let Some(this) = weak.upgrade() {
                this.handle_favicon_changed(&pane, texture);
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_load_changed = Some(Box::new(move |event| {
            if let Some(this) = weak.upgrade() {
                this.handle_load_changed(&pane, event);
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_progress_changed = Some(Box::new(move |progress| {
            if let Some(this) = weak.upgrade() {
                this.handle_progress_changed(&pane, progress);
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_uri_changed = Some(Box::new(move |uri| {
            if let Some(this) = weak.upgrade() {
                this.handle_uri_changed(&pane, uri);
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_web_process_terminated = Some(Box::new(move |reason| {
            if let Some(this) = weak.upgrade() {
                this.handle_terminated(&pane, reason);
            }
        }));

        let weak = self.weak.clone();
        events.on_permission_request = Some(Box::new(move |prompt| {
            if let Some(this) = weak.upgrade() {
                this.permissions.handle_prompt(prompt);
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_enter_fullscreen = Some(Box::new(move || {
            if let Some(this) = weak.upgrade() {
                this.set_inhibit(&pane, true, None);
                this.fire_fullscreen(true);
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_leave_fullscreen = Some(Box::new(move || {
            if let Some(this) = weak.upgrade() {
                this.set_inhibit(&pane, false, None);
                this.fire_fullscreen(false);
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_audio_state_changed = Some(Box::new(move |playing| {
            if let Some(this) = weak.upgrade() {
                this.set_inhibit(&pane, playing, Some(true));
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_link_hover = Some(Box::new(move |uri| {
            if let Some(this) = weak.upgrade() {
                if let Some(widget) = this.registry.pane_widget(&pane) {
                    widget.show_status(uri);
                }
            }
        }));

        let weak = self.weak.clone();
        events.on_link_middle_click = Some(Box::new(move |uri| {
            if let Some(this) = weak.upgrade() {
                let cb = this.callbacks.open_pane.lock().clone();
                if let Some(cb) = cb {
                    cb(uri, this.config.popup.blank_target_behavior);
                }
            }
        }));

        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        events.on_create = Some(Box::new(move |request| {
            weak.upgrade()
                .and_then(|this| this.handle_create(&pane, request))
        }));

        let weak = self.weak.clone();
        let wv_id = webview.id();
        events.on_ready_to_show = Some(Box::new(move || {
            if let Some(this) = weak.upgrade() {
                this.handle_popup_ready(&wv_id);
            }
        }));

        let weak = self.weak.clone();
        let wv_id = webview.id();
        events.on_close = Some(Box::new(move || {
            if let Some(this) = weak.upgrade() {
                this.handle_popup_close(&wv_id);
            }
        }));

        webview.set_event_handlers(events);
    }

    fn with_pane_mut<R>(&self, pane_id: &str, f: impl FnOnce(&mut Pane) -> R) -> Option<R> {
        let mut tabs = self.tabs.write();
        for tab in tabs.iter_mut() {
            if let Some(pane) = tab.workspace.pane_mut(pane_id) {
                return Some(f(pane));
            }
        }
        None
    }

    fn pane_uri(&self, pane_id: &str) -> String {
        let tabs = self.tabs.read();
        for tab in tabs.iter() {
            if let Some(pane) = tab.workspace.pane(pane_id) {
                return pane.uri.clone();
            }
        }
        String::new()
    }

    fn is_active_pane(&self, pane_id: &str) -> bool {
        self.active_pane_id().as_deref() == Some(pane_id)
    }

    fn sync_stack_title(&self, pane_id: &str, title: &str) {
        if let Some(stack) = self.registry.pane_stack(pane_id) {
            if let Some(index) = stack.page_index(&pane_id.to_string()) {
                stack.set_page_title(index, title);
            }
        }
    }

    fn handle_title_changed(&self, pane_id: &str, title: &str) {
        self.pane_titles
            .lock()
            .insert(pane_id.to_string(), title.to_string());

        let uri = self
            .with_pane_mut(pane_id, |pane| {
                pane.title = title.to_string();
                pane.uri.clone()
            })
            .unwrap_or_default();

        self.sync_stack_title(pane_id, title);

        if self.is_active_pane(pane_id) {
            let cb = self.callbacks.window_title_changed.lock().clone();
            if let Some(cb) = cb {
                cb(title);
            }
        }

        if !uri.is_empty() {
            let cb = self.callbacks.title_updated.lock().clone();
            if let Some(cb) = cb {
                cb(&uri, title);
            }
        }
    }

    fn handle_favicon_changed(&self, pane_id: &str, texture: Arc<dyn Texture>) {
        let Some(webview) = self.webview_for(pane_id) else {
            return;
        };
        let final_uri = webview.uri();
        let origin = self.nav_origin(pane_id);
        self.favicons
            .store_texture(texture.clone(), &final_uri, origin.as_deref());

        if let Some(stack) = self.registry.pane_stack(pane_id) {
            if let Some(index) = stack.page_index(&pane_id.to_string()) {
                stack.set_page_icon(index, texture.png_data());
            }
        }
    }

    fn handle_load_changed(&self, pane_id: &str, event: LoadEvent) {
        match event {
            LoadEvent::Started => {
                if let Some(widget) = self.registry.pane_widget(pane_id) {
                    widget.set_loading(true);
                }
                self.with_pane_mut(pane_id, |pane| pane.is_loading = true);
                if !self.first_load_fired.swap(true, Ordering::SeqCst) {
                    let cb = self.callbacks.first_load_started.lock().clone();
                    if let Some(cb) = cb {
                        cb();
                    }
                }
            }
            LoadEvent::Committed => self.handle_load_committed(pane_id),
            LoadEvent::Finished => self.handle_load_finished(pane_id),
        }
    }

    fn handle_load_committed(&self, pane_id: &str) {
        let Some(webview) = self.webview_for(pane_id) else {
            return;
        };
        let uri = webview.uri();

        match background_for(&uri) {
            PageBackground::Themed => {
                if let Some(widget) = self.registry.pane_widget(pane_id) {
                    widget.set_background(crate::widget::BackgroundColor::Themed);
                }
            }
            PageBackground::White => {
                if let Some(widget) = self.registry.pane_widget(pane_id) {
                    widget.set_background(crate::widget::BackgroundColor::White);
                }
            }
            PageBackground::Default => {}
        }

        // Cold-start flash guard: an about:blank commit on a pane that
        // intends to show something else stays hidden.
        let intended = self.pane_uri(pane_id);
        if should_suppress_blank(&uri, &intended) {
            return;
        }

        self.mark_pending_reveal(pane_id);

        let queued_theme = self.pending_theme.lock().remove(pane_id);
        if let Some(spec) = queued_theme {
            if wants_theme_script(&uri) {
                webview.run_script(&theme_script(&spec));
            }
        }

        self.update_pane_uri(pane_id, &uri);

        let title = webview.title();
        if !title.is_empty() {
            self.sync_stack_title(pane_id, &title);
        }

        let cb = self.callbacks.history_record.lock().clone();
        if let Some(cb) = cb {
            cb(pane_id, &uri);
        }

        if self.is_active_pane(pane_id) {
            let cb = self.callbacks.active_navigation_committed.lock().clone();
            if let Some(cb) = cb {
                cb(&uri);
            }
        }

        // Per-domain zoom follows the committed URI.
        let zoom = normalized_domain(&uri)
            .and_then(|domain| self.zoom_store.lock().clone().and_then(|s| s.zoom_for(&domain)))
            .unwrap_or(crate::config::ZOOM_DEFAULT);
        webview.set_zoom_level(zoom);
        self.with_pane_mut(pane_id, |pane| pane.set_zoom(zoom));

        self.oauth_observe(&webview, &uri);
    }

    fn handle_load_finished(&self, pane_id: &str) {
        let Some(webview) = self.webview_for(pane_id) else {
            return;
        };

        if let Some(widget) = self.registry.pane_widget(pane_id) {
            widget.set_loading(false);
        }
        self.with_pane_mut(pane_id, |pane| {
            pane.is_loading = false;
            pane.can_go_back = webview.can_go_back();
            pane.can_go_forward = webview.can_go_forward();
        });

        self.reveal_if_pending(pane_id);

        let queued_theme = self.pending_theme.lock().remove(pane_id);
        if let Some(spec) = queued_theme {
            if wants_theme_script(&webview.uri()) {
                webview.run_script(&theme_script(&spec));
            }
        }

        if self.pending_script_refresh.lock().remove(pane_id) && !webview.is_loading() {
            let cb = self.callbacks.script_refresher.lock().clone();
            if let Some(cb) = cb {
                cb(pane_id);
            }
        }
    }

    fn handle_progress_changed(&self, pane_id: &str, progress: f64) {
        if let Some(widget) = self.registry.pane_widget(pane_id) {
            widget.set_progress(progress);
        }
        if progress > 0.0 {
            self.reveal_if_pending(pane_id);
        }
    }

    fn handle_uri_changed(&self, pane_id: &str, uri: &str) {
        let Some(webview) = self.webview_for(pane_id) else {
            return;
        };

        if is_external_scheme(uri) {
            log::info!("Routing external scheme to platform opener: {}", uri);
            let cb = self.callbacks.external_opener.lock().clone();
            if let Some(cb) = cb {
                cb(uri);
            }
            webview.stop();
            if webview.can_go_back() {
                webview.go_back();
            }
            return;
        }

        self.oauth_observe(&webview, uri);

        // In-page (SPA) navigation: the URI moved without a load cycle.
        if !webview.is_loading() {
            self.update_pane_uri(pane_id, uri);
            let cb = self.callbacks.history_record.lock().clone();
            if let Some(cb) = cb {
                cb(pane_id, uri);
            }
        }
    }

    fn handle_terminated(&self, pane_id: &str, reason: TerminationReason) {
        match reason {
            TerminationReason::Crashed | TerminationReason::ExceededMemoryLimit => {
                let Some(webview) = self.webview_for(pane_id) else {
                    return;
                };
                let original = {
                    let uri = webview.uri();
                    if uri.is_empty() {
                        self.pane_uri(pane_id)
                    } else {
                        uri
                    }
                };
                let crash_url = format!(
                    "{}?url={}",
                    crate::config::CRASH_URL,
                    urlencoding::encode(&original)
                );
                log::warn!(
                    "Web process for pane {} died ({:?}); loading crash page",
                    pane_id,
                    reason
                );
                webview.load_uri(&crash_url);
            }
            TerminationReason::TerminatedByApi => {
                log::debug!("Web process for pane {} terminated by API", pane_id);
            }
        }
    }

    pub(crate) fn update_pane_uri(&self, pane_id: &str, uri: &str) {
        let changed = self
            .with_pane_mut(pane_id, |pane| {
                if pane.uri == uri {
                    false
                } else {
                    pane.uri = uri.to_string();
                    true
                }
            })
            .unwrap_or(false);
        if changed {
            let cb = self.callbacks.pane_uri_updated.lock().clone();
            if let Some(cb) = cb {
                cb(pane_id, uri);
            }
        }
    }

    fn fire_fullscreen(&self, fullscreen: bool) {
        let cb = self.callbacks.fullscreen_changed.lock().clone();
        if let Some(cb) = cb {
            cb(fullscreen);
        }
    }

    /// Track fullscreen/audio inhibition per pane; the two sources count
    /// independently against the refcounted inhibitor.
    fn set_inhibit(&self, pane_id: &str, on: bool, audio: Option<bool>) {
        let is_audio = audio.unwrap_or(false);
        let mut inhibits = self.inhibits.lock();
        let flags = inhibits.entry(pane_id.to_string()).or_default();
        let slot = if is_audio {
            &mut flags.audio
        } else {
            &mut flags.fullscreen
        };
        if *slot == on {
            return;
        }
        *slot = on;
        drop(inhibits);
        if on {
            self.idle.inhibit();
        } else {
            self.idle.uninhibit();
        }
    }

    // ----- popups -----

    fn handle_create(
        &self,
        parent_pane_id: &str,
        request: PopupRequest,
    ) -> Option<Arc<dyn WebView>> {
        if !self.config.popup.open_in_new_pane {
            log::info!("Popup blocked by configuration: {}", request.target_uri);
            return None;
        }

        let parent_webview_id = self.webview_for(parent_pane_id).map(|wv| wv.id())?;
        let related = match self
            .factory
            .create_related(&parent_webview_id, &CancelToken::new())
        {
            Ok(webview) => webview,
            Err(e) => {
                log::error!("Related WebView creation failed: {}", e);
                return None;
            }
        };
        related.hide();

        let kind = classify(request.frame_name.as_deref());
        let behavior = behavior_for(&self.config.popup, kind);
        let auto_close =
            self.config.popup.oauth_auto_close && oauth::is_oauth_flow_url(&request.target_uri);

        let insert = self.callbacks.popup_insert.lock().clone();
        let Some(insert) = insert else {
            log::warn!("No popup insertion handler; dropping popup");
            related.destroy();
            return None;
        };
        // The engine needs the view parented before we return, or
        // window.opener never binds.
        let pane_id = match insert(PopupInsertRequest {
            uri: request.target_uri.clone(),
            parent_pane_id: parent_pane_id.to_string(),
            behavior,
            webview: related.clone(),
        }) {
            Ok(pane_id) => pane_id,
            Err(e) => {
                log::error!("Popup insertion failed: {}", e);
                // The workspace rollback may already have torn the view
                // down.
                if !related.is_destroyed() {
                    related.destroy();
                }
                return None;
            }
        };

        self.adopt_web_view(&pane_id, &related);
        self.with_pane_mut(&pane_id, |pane| pane.auto_close = auto_close);

        let webview_id = related.id();
        let mut popups = self.popups.write();
        popups.pending.insert(
            webview_id.clone(),
            PendingPopup {
                pane_id,
                webview_id: webview_id.clone(),
                parent_pane_id: parent_pane_id.to_string(),
                kind,
                phase: PopupPhase::Pending,
                auto_close,
            },
        );
        if auto_close {
            popups.oauth.insert(
                webview_id.clone(),
                OAuthState {
                    parent_pane_id: Some(parent_pane_id.to_string()),
                    ..OAuthState::default()
                },
            );
            // Safety timer: logs when an OAuth popup lingers, but never
            // force-closes.
            let lingering = webview_id.clone();
            let timer = self.main_loop.schedule(
                OAUTH_SAFETY_TIMEOUT,
                Box::new(move || {
                    log::debug!("OAuth popup {} still open after safety timeout", lingering);
                }),
            );
            popups.safety.insert(webview_id, timer);
        }
        drop(popups);

        log::info!(
            "Popup created from pane {} ({:?}, auto_close={})",
            parent_pane_id,
            kind,
            auto_close
        );
        Some(related)
    }

    fn handle_popup_ready(&self, webview_id: &str) {
        let webview = {
            let mut popups = self.popups.write();
            let Some(popup) = popups.pending.get_mut(webview_id) else {
                return;
            };
            popup.phase = PopupPhase::Ready;
            self.webview_for(&popup.pane_id)
        };
        let Some(webview) = webview else {
            return;
        };
        webview.show();
        let mut popups = self.popups.write();
        if let Some(popup) = popups.pending.get_mut(webview_id) {
            popup.phase = PopupPhase::Alive;
        }
    }

    /// Check a popup navigation against the OAuth callback pattern; on
    /// first match capture it, cancel the safety timer and schedule the
    /// popup's close.
    fn oauth_observe(&self, webview: &Arc<dyn WebView>, uri: &str) {
        let webview_id = webview.id();
        let detected = {
            let mut popups = self.popups.write();
            let Some(state) = popups.oauth.get_mut(&webview_id) else {
                return;
            };
            if !state.observe(uri) {
                return;
            }
            let success = state.success;
            if let Some(timer) = popups.safety.remove(&webview_id) {
                timer.cancel();
            }
            success
        };

        log::info!(
            "OAuth callback detected on popup {} (success={})",
            webview_id,
            detected
        );
        let closing = webview.clone();
        let timer = self.main_loop.schedule(
            OAUTH_CLOSE_DELAY,
            Box::new(move || closing.close()),
        );
        self.popups.write().close_timers.insert(webview_id, timer);
    }

    fn handle_popup_close(&self, webview_id: &str) {
        let (popup, oauth_state) = {
            let mut popups = self.popups.write();
            if let Some(timer) = popups.safety.remove(webview_id) {
                timer.cancel();
            }
            if let Some(timer) = popups.close_timers.remove(webview_id) {
                timer.cancel();
            }
            (
                popups.pending.remove(webview_id),
                popups.oauth.remove(webview_id),
            )
        };
        let Some(popup) = popup else {
            return;
        };

        if let Some(state) = &oauth_state {
            if state.success {
                if let Some(parent) = state.parent_pane_id.clone() {
                    self.schedule_parent_refresh(parent);
                }
            }
        }

        if popup.phase == PopupPhase::Pending {
            log::debug!("Popup {} closed before ever showing", webview_id);
        }

        let cb = self.callbacks.popup_close_pane.lock().clone();
        if let Some(cb) = cb {
            cb(&popup.pane_id);
        } else {
            // No workspace hook installed; at least drop the view.
            self.release_web_view(&popup.pane_id.clone());
        }
    }

    /// Reload the popup's parent pane once the freshly authenticated
    /// session has settled; bursts from multiple popups debounce.
    fn schedule_parent_refresh(&self, parent_pane_id: PaneId) {
        let mut popups = self.popups.write();
        if let Some(previous) = popups.refresh.remove(&parent_pane_id) {
            previous.cancel();
        }
        let weak = self.weak.clone();
        let pane = parent_pane_id.clone();
        let timer = self.main_loop.schedule(
            PARENT_REFRESH_DEBOUNCE,
            Box::new(move || {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                this.popups.write().refresh.remove(&pane);
                if let Some(webview) = this.webview_for(&pane) {
                    log::info!("Reloading pane {} after OAuth completion", pane);
                    webview.reload();
                }
            }),
        );
        popups.refresh.insert(parent_pane_id, timer);
    }

    #[cfg(test)]
    pub(crate) fn popup_count(&self) -> usize {
        self.popups.read().pending.len()
    }

    #[cfg(test)]
    pub(crate) fn oauth_state_count(&self) -> usize {
        self.popups.read().oauth.len()
    }
}
