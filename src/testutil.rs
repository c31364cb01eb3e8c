//! In-memory fakes for the engine, widget and main-loop ports, shared by
//! unit tests across the crate.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::content::{ContentCoordinator, TraceSink};
use crate::engine::{
    FindController, IdleInhibitor, LoadEvent, LoadState, NoopIdleBackend, PermissionPrompt,
    PopupRequest, TerminationReason, Texture, WebView, WebViewEvents, WebViewFactory, WebViewId,
    WebViewPool,
};
use crate::error::{CoordError, Result};
use crate::favicon::FaviconService;
use crate::history::{HistoryStore, ZoomStore};
use crate::mainloop::{CancelToken, MainLoop, Task, TaskRunner, TimerHandle};
use crate::permissions::PermissionArbiter;
use crate::tabs::{SharedTabs, Tab, TabList};
use crate::widget::{
    BackgroundColor, PaneWidget, PanedWidget, StackedView, TabBarView, TabSummary, WidgetFactory,
    WidgetNode, WidgetRegistry, WorkspaceView,
};
use crate::workspace::geometry::Rect;
use crate::workspace::{PaneId, Slot, SplitDirection};

// ----- main loop -----

struct ScheduledTimer {
    delay: Duration,
    handle: TimerHandle,
    task: Task,
}

/// Deterministic main loop: tasks queue until `run_all`, timers fire on
/// demand.
#[derive(Default)]
pub struct FakeMainLoop {
    queue: Mutex<Vec<Task>>,
    timers: Mutex<Vec<ScheduledTimer>>,
}

impl FakeMainLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drain the queue, including tasks posted while draining.
    pub fn run_all(&self) {
        loop {
            let tasks: Vec<Task> = self.queue.lock().drain(..).collect();
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                task();
            }
        }
    }

    pub fn timer_delays(&self) -> Vec<Duration> {
        self.timers
            .lock()
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .map(|t| t.delay)
            .collect()
    }

    /// Fire every live timer with delay at most `max`.
    pub fn fire_timers_up_to(&self, max: Duration) {
        let due: Vec<ScheduledTimer> = {
            let mut timers = self.timers.lock();
            let mut due = Vec::new();
            let mut keep = Vec::new();
            for timer in timers.drain(..) {
                if timer.delay <= max && !timer.handle.is_cancelled() {
                    due.push(timer);
                } else {
                    keep.push(timer);
                }
            }
            *timers = keep;
            due
        };
        for timer in due {
            (timer.task)();
        }
        self.run_all();
    }

    pub fn fire_all_timers(&self) {
        self.fire_timers_up_to(Duration::MAX);
    }
}

impl MainLoop for FakeMainLoop {
    fn post(&self, task: Task) {
        self.queue.lock().push(task);
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        self.timers.lock().push(ScheduledTimer {
            delay,
            handle: handle.clone(),
            task,
        });
        handle
    }
}

// ----- task runners -----

/// Runs jobs synchronously on the calling thread.
#[derive(Debug, Default)]
pub struct InlineRunner;

impl TaskRunner for InlineRunner {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

/// Queues jobs until the test asks for them.
#[derive(Default)]
pub struct ManualRunner {
    jobs: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ManualRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn run_all(&self) {
        loop {
            let jobs: Vec<_> = self.jobs.lock().drain(..).collect();
            if jobs.is_empty() {
                return;
            }
            for job in jobs {
                job();
            }
        }
    }
}

impl TaskRunner for ManualRunner {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
        self.jobs.lock().push(job);
    }
}

// ----- engine fakes -----

pub struct FakeTexture {
    width: u32,
    height: u32,
}

impl FakeTexture {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Texture for FakeTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn png_data(&self) -> Option<Vec<u8>> {
        Some(format!("png:{}x{}", self.width, self.height).into_bytes())
    }

    fn scaled_png(&self, size: u32) -> Option<Vec<u8>> {
        Some(format!("png:{}x{}", size, size).into_bytes())
    }
}

#[derive(Debug, Clone)]
pub struct FakeWebViewState {
    pub uri: String,
    pub title: String,
    pub loading: bool,
    pub progress: f64,
    pub zoom: f64,
    pub visible: bool,
    pub destroyed: bool,
    pub can_go_back: bool,
    pub can_go_forward: bool,
    pub load_state: LoadState,
}

impl Default for FakeWebViewState {
    fn default() -> Self {
        Self {
            uri: String::new(),
            title: String::new(),
            loading: false,
            progress: 0.0,
            zoom: 1.0,
            visible: true,
            destroyed: false,
            can_go_back: false,
            can_go_forward: false,
            load_state: LoadState::Idle,
        }
    }
}

/// Scriptable WebView: tests poke state and emit engine events.
pub struct FakeWebView {
    id: WebViewId,
    pub state: Mutex<FakeWebViewState>,
    handlers: Mutex<Arc<WebViewEvents>>,
    pub calls: Mutex<Vec<String>>,
    pub scripts: Mutex<Vec<String>>,
}

impl FakeWebView {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            state: Mutex::new(FakeWebViewState::default()),
            handlers: Mutex::new(Arc::new(WebViewEvents::default())),
            calls: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
        })
    }

    fn handlers(&self) -> Arc<WebViewEvents> {
        self.handlers.lock().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn last_loaded(&self) -> Option<String> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find_map(|c| c.strip_prefix("load:").map(str::to_string))
    }

    pub fn set_state_uri(&self, uri: &str) {
        self.state.lock().uri = uri.to_string();
    }

    pub fn set_can_go_back(&self, can: bool) {
        self.state.lock().can_go_back = can;
    }

    // Engine event emitters.

    pub fn emit_title_changed(&self, title: &str) {
        self.state.lock().title = title.to_string();
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_title_changed {
            cb(title);
        }
    }

    pub fn emit_load_changed(&self, event: LoadEvent) {
        {
            let mut state = self.state.lock();
            match event {
                LoadEvent::Started => {
                    state.loading = true;
                    state.progress = 0.0;
                    state.load_state = LoadState::Started;
                }
                LoadEvent::Committed => {
                    state.load_state = LoadState::Committed;
                }
                LoadEvent::Finished => {
                    state.loading = false;
                    state.progress = 1.0;
                    state.load_state = LoadState::Finished;
                }
            }
        }
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_load_changed {
            cb(event);
        }
    }

    pub fn emit_progress(&self, progress: f64) {
        self.state.lock().progress = progress;
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_progress_changed {
            cb(progress);
        }
    }

    pub fn emit_uri_changed(&self, uri: &str) {
        self.state.lock().uri = uri.to_string();
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_uri_changed {
            cb(uri);
        }
    }

    pub fn emit_favicon(&self, texture: Arc<dyn Texture>) {
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_favicon_changed {
            cb(texture);
        }
    }

    pub fn emit_terminated(&self, reason: TerminationReason) {
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_web_process_terminated {
            cb(reason);
        }
    }

    pub fn emit_create(&self, request: PopupRequest) -> Option<Arc<dyn WebView>> {
        let handlers = self.handlers();
        handlers.on_create.as_ref().and_then(|cb| cb(request))
    }

    pub fn emit_ready_to_show(&self) {
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_ready_to_show {
            cb();
        }
    }

    pub fn emit_close(&self) {
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_close {
            cb();
        }
    }

    pub fn emit_permission(&self, prompt: PermissionPrompt) {
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_permission_request {
            cb(prompt);
        }
    }

    pub fn emit_fullscreen(&self, entered: bool) {
        let handlers = self.handlers();
        if entered {
            if let Some(cb) = &handlers.on_enter_fullscreen {
                cb();
            }
        } else if let Some(cb) = &handlers.on_leave_fullscreen {
            cb();
        }
    }

    pub fn emit_audio(&self, playing: bool) {
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_audio_state_changed {
            cb(playing);
        }
    }

    pub fn emit_link_hover(&self, uri: Option<&str>) {
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_link_hover {
            cb(uri);
        }
    }

    pub fn emit_link_middle_click(&self, uri: &str) {
        let handlers = self.handlers();
        if let Some(cb) = &handlers.on_link_middle_click {
            cb(uri);
        }
    }
}

impl WebView for FakeWebView {
    fn id(&self) -> WebViewId {
        self.id.clone()
    }

    fn load_uri(&self, uri: &str) {
        self.calls.lock().push(format!("load:{}", uri));
        let mut state = self.state.lock();
        state.uri = uri.to_string();
        state.loading = true;
        state.load_state = LoadState::Started;
    }

    fn load_html(&self, _html: &str, _base_uri: Option<&str>) {
        self.calls.lock().push("load_html".to_string());
    }

    fn reload(&self) {
        self.calls.lock().push("reload".to_string());
    }

    fn reload_bypass_cache(&self) {
        self.calls.lock().push("reload_bypass_cache".to_string());
    }

    fn stop(&self) {
        self.calls.lock().push("stop".to_string());
        self.state.lock().loading = false;
    }

    fn go_back(&self) {
        self.calls.lock().push("go_back".to_string());
    }

    fn go_forward(&self) {
        self.calls.lock().push("go_forward".to_string());
    }

    fn state(&self) -> LoadState {
        self.state.lock().load_state
    }

    fn uri(&self) -> String {
        self.state.lock().uri.clone()
    }

    fn title(&self) -> String {
        self.state.lock().title.clone()
    }

    fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    fn estimated_progress(&self) -> f64 {
        self.state.lock().progress
    }

    fn can_go_back(&self) -> bool {
        self.state.lock().can_go_back
    }

    fn can_go_forward(&self) -> bool {
        self.state.lock().can_go_forward
    }

    fn set_zoom_level(&self, level: f64) {
        self.state.lock().zoom = level;
    }

    fn zoom_level(&self) -> f64 {
        self.state.lock().zoom
    }

    fn find_controller(&self) -> Option<Arc<dyn FindController>> {
        None
    }

    fn set_event_handlers(&self, events: WebViewEvents) {
        *self.handlers.lock() = Arc::new(events);
    }

    fn run_script(&self, script: &str) {
        self.scripts.lock().push(script.to_string());
    }

    fn show(&self) {
        self.calls.lock().push("show".to_string());
        self.state.lock().visible = true;
    }

    fn hide(&self) {
        self.calls.lock().push("hide".to_string());
        self.state.lock().visible = false;
    }

    fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    fn close(&self) {
        self.calls.lock().push("close".to_string());
        self.emit_close();
    }

    fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    fn destroy(&self) {
        self.calls.lock().push("destroy".to_string());
        self.state.lock().destroyed = true;
    }
}

/// Every fake view ever created, keyed by id, so tests can reach them
/// whether they came from the pool or the related-view factory.
#[derive(Default)]
pub struct ViewLedger {
    views: Mutex<HashMap<WebViewId, Arc<FakeWebView>>>,
}

impl ViewLedger {
    pub fn get(&self, id: &str) -> Option<Arc<FakeWebView>> {
        self.views.lock().get(id).cloned()
    }

    fn put(&self, view: Arc<FakeWebView>) {
        self.views.lock().insert(view.id.clone(), view);
    }
}

pub struct FakePool {
    ledger: Arc<ViewLedger>,
    counter: AtomicUsize,
    pub released: Mutex<Vec<WebViewId>>,
    pub fail_acquire: AtomicBool,
}

impl FakePool {
    pub fn new(ledger: Arc<ViewLedger>) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            counter: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
            fail_acquire: AtomicBool::new(false),
        })
    }

    pub fn released_ids(&self) -> Vec<WebViewId> {
        self.released.lock().clone()
    }
}

impl WebViewPool for FakePool {
    fn acquire(&self, _cancel: &CancelToken) -> Result<Arc<dyn WebView>> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(CoordError::EngineUnavailable("pool exhausted".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let view = FakeWebView::new(format!("wv-{}", n));
        self.ledger.put(view.clone());
        Ok(view)
    }

    fn release(&self, webview: Arc<dyn WebView>) {
        self.released.lock().push(webview.id());
    }

    fn prewarm(&self, _n: usize) {}

    fn size(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    fn close(&self) {}
}

pub struct FakeFactory {
    ledger: Arc<ViewLedger>,
    counter: AtomicUsize,
    pub related_parents: Mutex<Vec<WebViewId>>,
    pub fail_create: AtomicBool,
}

impl FakeFactory {
    pub fn new(ledger: Arc<ViewLedger>) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            counter: AtomicUsize::new(0),
            related_parents: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
        })
    }
}

impl WebViewFactory for FakeFactory {
    fn create(&self, _cancel: &CancelToken) -> Result<Arc<dyn WebView>> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let view = FakeWebView::new(format!("fwv-{}", n));
        self.ledger.put(view.clone());
        Ok(view)
    }

    fn create_related(&self, parent: &WebViewId, _cancel: &CancelToken) -> Result<Arc<dyn WebView>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CoordError::EngineUnavailable(
                "related view creation failed".to_string(),
            ));
        }
        self.related_parents.lock().push(parent.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let view = FakeWebView::new(format!("rel-{}", n));
        self.ledger.put(view.clone());
        Ok(view)
    }
}

// ----- widget fakes -----

#[derive(Debug, Default)]
pub struct PaneWidgetState {
    pub loading: bool,
    pub progress: f64,
    pub background: Option<BackgroundColor>,
    pub status: Option<String>,
    pub toasts: Vec<String>,
    pub active: bool,
    pub focus_grabs: u32,
}

pub struct FakePaneWidget {
    pane_id: PaneId,
    pub state: Mutex<PaneWidgetState>,
    nav_cb: Mutex<Option<Box<dyn Fn(bool) + Send + Sync>>>,
}

impl FakePaneWidget {
    pub fn new(pane_id: &str) -> Arc<Self> {
        Arc::new(Self {
            pane_id: pane_id.to_string(),
            state: Mutex::new(PaneWidgetState::default()),
            nav_cb: Mutex::new(None),
        })
    }

    pub fn emit_mouse_nav(&self, forward: bool) {
        if let Some(cb) = self.nav_cb.lock().as_ref() {
            cb(forward);
        }
    }
}

impl PaneWidget for FakePaneWidget {
    fn pane_id(&self) -> PaneId {
        self.pane_id.clone()
    }

    fn set_loading(&self, loading: bool) {
        self.state.lock().loading = loading;
    }

    fn set_progress(&self, fraction: f64) {
        self.state.lock().progress = fraction;
    }

    fn set_background(&self, color: BackgroundColor) {
        self.state.lock().background = Some(color);
    }

    fn show_status(&self, text: Option<&str>) {
        self.state.lock().status = text.map(str::to_string);
    }

    fn show_toast(&self, message: &str) {
        self.state.lock().toasts.push(message.to_string());
    }

    fn grab_focus(&self) {
        self.state.lock().focus_grabs += 1;
    }

    fn set_active(&self, active: bool) {
        self.state.lock().active = active;
    }

    fn connect_mouse_nav(&self, callback: Box<dyn Fn(bool) + Send + Sync>) {
        *self.nav_cb.lock() = Some(callback);
    }
}

pub struct FakePaned {
    direction: SplitDirection,
    ratio: Mutex<f64>,
    children: Mutex<[Option<WidgetNode>; 2]>,
    ratio_cb: Mutex<Option<Box<dyn Fn(f64) + Send + Sync>>>,
}

impl FakePaned {
    pub fn new(direction: SplitDirection, ratio: f64) -> Arc<Self> {
        Arc::new(Self {
            direction,
            ratio: Mutex::new(ratio),
            children: Mutex::new([None, None]),
            ratio_cb: Mutex::new(None),
        })
    }

    /// Simulate the user dragging the divider.
    pub fn drag_ratio(&self, ratio: f64) {
        *self.ratio.lock() = ratio;
        if let Some(cb) = self.ratio_cb.lock().as_ref() {
            cb(ratio);
        }
    }
}

impl PanedWidget for FakePaned {
    fn orientation(&self) -> SplitDirection {
        self.direction
    }

    fn set_ratio(&self, ratio: f64) {
        *self.ratio.lock() = ratio;
    }

    fn ratio(&self) -> f64 {
        *self.ratio.lock()
    }

    fn set_child(&self, slot: Slot, child: Option<WidgetNode>) {
        self.children.lock()[slot.index()] = child;
    }

    fn child(&self, slot: Slot) -> Option<WidgetNode> {
        self.children.lock()[slot.index()].clone()
    }

    fn connect_ratio_changed(&self, callback: Box<dyn Fn(f64) + Send + Sync>) {
        *self.ratio_cb.lock() = Some(callback);
    }
}

struct StackPage {
    pane_id: PaneId,
    widget: Arc<dyn PaneWidget>,
    title: String,
    icon: Option<Vec<u8>>,
}

#[derive(Default)]
pub struct FakeStack {
    pages: Mutex<Vec<StackPage>>,
    active: Mutex<usize>,
    activated_cb: Mutex<Option<Box<dyn Fn(PaneId) + Send + Sync>>>,
    close_cb: Mutex<Option<Box<dyn Fn(PaneId) + Send + Sync>>>,
}

impl FakeStack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn titles(&self) -> Vec<String> {
        self.pages.lock().iter().map(|p| p.title.clone()).collect()
    }

    pub fn pane_ids(&self) -> Vec<PaneId> {
        self.pages.lock().iter().map(|p| p.pane_id.clone()).collect()
    }

    pub fn icon(&self, index: usize) -> Option<Vec<u8>> {
        self.pages.lock().get(index).and_then(|p| p.icon.clone())
    }

    pub fn page_widget(&self, index: usize) -> Option<Arc<dyn PaneWidget>> {
        self.pages.lock().get(index).map(|p| p.widget.clone())
    }

    /// Simulate a title-bar click.
    pub fn click_page(&self, pane_id: &str) {
        if let Some(cb) = self.activated_cb.lock().as_ref() {
            cb(pane_id.to_string());
        }
    }

    /// Simulate the title-bar close button.
    pub fn click_close(&self, pane_id: &str) {
        if let Some(cb) = self.close_cb.lock().as_ref() {
            cb(pane_id.to_string());
        }
    }
}

impl StackedView for FakeStack {
    fn add_page(&self, pane_id: &PaneId, child: Arc<dyn PaneWidget>, title: &str) {
        self.pages.lock().push(StackPage {
            pane_id: pane_id.clone(),
            widget: child,
            title: title.to_string(),
            icon: None,
        });
    }

    fn remove_page(&self, index: usize) {
        let mut pages = self.pages.lock();
        if index < pages.len() {
            pages.remove(index);
        }
    }

    fn page_index(&self, pane_id: &PaneId) -> Option<usize> {
        self.pages.lock().iter().position(|p| &p.pane_id == pane_id)
    }

    fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    fn set_active_index(&self, index: usize) {
        *self.active.lock() = index;
    }

    fn active_index(&self) -> usize {
        *self.active.lock()
    }

    fn set_page_title(&self, index: usize, title: &str) {
        let mut pages = self.pages.lock();
        if let Some(page) = pages.get_mut(index) {
            page.title = title.to_string();
        }
    }

    fn set_page_icon(&self, index: usize, icon: Option<Vec<u8>>) {
        let mut pages = self.pages.lock();
        if let Some(page) = pages.get_mut(index) {
            page.icon = icon;
        }
    }

    fn connect_page_activated(&self, callback: Box<dyn Fn(PaneId) + Send + Sync>) {
        *self.activated_cb.lock() = Some(callback);
    }

    fn connect_page_close(&self, callback: Box<dyn Fn(PaneId) + Send + Sync>) {
        *self.close_cb.lock() = Some(callback);
    }
}

#[derive(Default)]
pub struct FakeWidgetFactory {
    pub paneds: Mutex<Vec<Arc<FakePaned>>>,
    pub stacks: Mutex<Vec<Arc<FakeStack>>>,
    pub pane_widgets: Mutex<HashMap<PaneId, Arc<FakePaneWidget>>>,
}

impl FakeWidgetFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pane_widget(&self, pane_id: &str) -> Option<Arc<FakePaneWidget>> {
        self.pane_widgets.lock().get(pane_id).cloned()
    }
}

impl WidgetFactory for FakeWidgetFactory {
    fn create_paned(&self, direction: SplitDirection, ratio: f64) -> Arc<dyn PanedWidget> {
        let paned = FakePaned::new(direction, ratio);
        self.paneds.lock().push(paned.clone());
        paned
    }

    fn create_stack(&self) -> Arc<dyn StackedView> {
        let stack = FakeStack::new();
        self.stacks.lock().push(stack.clone());
        stack
    }

    fn create_pane_widget(
        &self,
        pane_id: &PaneId,
        _webview: &Arc<dyn WebView>,
    ) -> Arc<dyn PaneWidget> {
        let widget = FakePaneWidget::new(pane_id);
        self.pane_widgets.lock().insert(pane_id.clone(), widget.clone());
        widget
    }
}

#[derive(Default)]
pub struct FakeWorkspaceView {
    root: Mutex<Option<WidgetNode>>,
    rects: Mutex<Vec<(PaneId, Rect)>>,
    pub toasts: Mutex<Vec<String>>,
}

impl FakeWorkspaceView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_rects(&self, rects: Vec<(PaneId, Rect)>) {
        *self.rects.lock() = rects;
    }

    pub fn root(&self) -> Option<WidgetNode> {
        self.root.lock().clone()
    }
}

impl WorkspaceView for FakeWorkspaceView {
    fn set_root(&self, root: Option<WidgetNode>) {
        *self.root.lock() = root;
    }

    fn pane_rects(&self) -> Vec<(PaneId, Rect)> {
        self.rects.lock().clone()
    }

    fn show_toast(&self, message: &str) {
        self.toasts.lock().push(message.to_string());
    }
}

#[derive(Default)]
pub struct FakeTabBar {
    refreshes: Mutex<Vec<(Vec<TabSummary>, Option<String>)>>,
    visible: Mutex<Option<bool>>,
}

impl FakeTabBar {
    pub fn last_active(&self) -> Option<String> {
        self.refreshes.lock().last().and_then(|(_, active)| active.clone())
    }

    pub fn last_summaries(&self) -> Vec<TabSummary> {
        self.refreshes
            .lock()
            .last()
            .map(|(summaries, _)| summaries.clone())
            .unwrap_or_default()
    }

    pub fn visible(&self) -> Option<bool> {
        *self.visible.lock()
    }
}

impl TabBarView for FakeTabBar {
    fn refresh(&self, tabs: &[TabSummary], active: Option<&str>) {
        self.refreshes
            .lock()
            .push((tabs.to_vec(), active.map(str::to_string)));
    }

    fn set_visible(&self, visible: bool) {
        *self.visible.lock() = Some(visible);
    }
}

// ----- store fakes -----

#[derive(Default)]
pub struct MemoryHistory {
    visits: Mutex<Vec<String>>,
    titles: Mutex<Vec<(String, String)>>,
}

impl MemoryHistory {
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().clone()
    }

    pub fn titles(&self) -> Vec<(String, String)> {
        self.titles.lock().clone()
    }
}

impl HistoryStore for MemoryHistory {
    fn record_visit(&self, url: &str, _title: Option<&str>) {
        self.visits.lock().push(url.to_string());
    }

    fn update_title(&self, url: &str, title: &str) {
        self.titles.lock().push((url.to_string(), title.to_string()));
    }
}

#[derive(Default)]
pub struct MemoryZoom {
    map: Mutex<HashMap<String, f64>>,
}

impl MemoryZoom {
    pub fn stored(&self, domain: &str) -> Option<f64> {
        self.map.lock().get(domain).copied()
    }
}

impl ZoomStore for MemoryZoom {
    fn set_zoom(&self, domain: &str, level: f64) {
        self.map.lock().insert(domain.to_string(), level);
    }

    fn zoom_for(&self, domain: &str) -> Option<f64> {
        self.map.lock().get(domain).copied()
    }
}

#[derive(Default)]
pub struct RecordingTrace {
    marks: Mutex<Vec<String>>,
}

impl RecordingTrace {
    pub fn marks(&self) -> Vec<String> {
        self.marks.lock().clone()
    }
}

impl TraceSink for RecordingTrace {
    fn mark(&self, name: &str) {
        self.marks.lock().push(name.to_string());
    }
}

// ----- content fixture -----

/// Everything a content-coordinator test needs, wired together with one
/// tab holding one pane.
pub struct ContentFixture {
    pub content: Arc<ContentCoordinator>,
    pub tabs: SharedTabs,
    pub ledger: Arc<ViewLedger>,
    pub pool: Arc<FakePool>,
    pub factory: Arc<FakeFactory>,
    pub registry: Arc<WidgetRegistry>,
    pub main_loop: Arc<FakeMainLoop>,
    pub favicons: Arc<FaviconService>,
    pub permissions: Arc<PermissionArbiter>,
    pub idle: Arc<IdleInhibitor>,
    pub trace: Arc<RecordingTrace>,
    _tmp: tempfile::TempDir,
}

impl ContentFixture {
    pub fn active_pane(&self) -> PaneId {
        self.tabs
            .read()
            .active_tab()
            .map(|t| t.workspace.active_pane_id.clone())
            .expect("fixture always holds one tab")
    }

    /// The fake behind the pane's installed WebView.
    pub fn webview(&self, pane_id: &str) -> Arc<FakeWebView> {
        let id = self
            .content
            .webview_for(pane_id)
            .expect("pane has no WebView")
            .id();
        self.ledger.get(&id).expect("unknown fake view")
    }
}

pub fn test_content_fixture() -> ContentFixture {
    test_content_fixture_with(crate::config::Config::default())
}

pub fn test_content_fixture_with(config: crate::config::Config) -> ContentFixture {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ledger = Arc::new(ViewLedger::default());
    let pool = FakePool::new(ledger.clone());
    let factory = FakeFactory::new(ledger.clone());
    let registry = WidgetRegistry::new();
    let main_loop = Arc::new(FakeMainLoop::new());
    let favicons = FaviconService::new(tmp.path().join("favicons"), Arc::new(InlineRunner));
    let permissions = PermissionArbiter::new();
    let idle = Arc::new(IdleInhibitor::new(Arc::new(NoopIdleBackend)));
    let trace = Arc::new(RecordingTrace::default());

    let mut tab_list = TabList::new();
    tab_list.add(Tab::new("https://app.example/"));
    let tabs: SharedTabs = Arc::new(RwLock::new(tab_list));

    let content = ContentCoordinator::new(
        pool.clone(),
        factory.clone(),
        config,
        main_loop.clone(),
        favicons.clone(),
        idle.clone(),
        permissions.clone(),
        registry.clone(),
        tabs.clone(),
        trace.clone(),
    );

    ContentFixture {
        content,
        tabs,
        ledger,
        pool,
        factory,
        registry,
        main_loop,
        favicons,
        permissions,
        idle,
        trace,
        _tmp: tmp,
    }
}
