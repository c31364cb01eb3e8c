//! Workspace coordinator: keeps the widget tree and the domain pane tree
//! in lock-step.
//!
//! Every mutation runs the pure use case first, then reshapes widgets
//! incrementally, reusing what is already on screen. Any widget-side
//! failure triggers a deterministic full rebuild from the domain tree, so
//! an inconsistency never survives the operation that caused it.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::config::{
    Config, PopupBehavior, PopupPlacement, HOVER_FOCUS_DELAY, KEYBOARD_FOCUS_SUPPRESS_DURATION,
};
use crate::content::{ContentCoordinator, PopupInsertRequest};
use crate::error::{CoordError, Result};
use crate::mainloop::{MainLoop, TimerHandle};
use crate::widget::{
    StackedView, WidgetFactory, WidgetNode, WidgetRegistry, WorkspaceView,
};
use crate::workspace::{
    geometry, ops, Direction, NodeId, NodeKind, PaneId, Slot, WindowType, Workspace, WorkspaceId,
};

type Cb<T> = Mutex<Option<Arc<T>>>;

#[derive(Default)]
struct Callbacks {
    /// Closing the only pane closes the tab instead.
    last_pane_closed: Cb<dyn Fn() + Send + Sync>,
    pane_closed: Cb<dyn Fn(&str) + Send + Sync>,
    /// Anything snapshot-worthy changed.
    state_changed: Cb<dyn Fn() + Send + Sync>,
    /// Tabbed popup placement: open a tab adopting the popup's WebView.
    open_popup_tab: Cb<dyn Fn(PopupInsertRequest) -> Result<PaneId> + Send + Sync>,
}

pub struct WorkspaceCoordinator {
    tabs: crate::tabs::SharedTabs,
    content: Arc<ContentCoordinator>,
    factory: Arc<dyn WidgetFactory>,
    registry: Arc<WidgetRegistry>,
    main_loop: Arc<dyn MainLoop>,
    config: Config,
    views: RwLock<HashMap<WorkspaceId, Arc<dyn WorkspaceView>>>,
    hover_timer: Mutex<Option<TimerHandle>>,
    hover_suppressed_until: Mutex<Option<Instant>>,
    callbacks: Callbacks,
    weak: Weak<WorkspaceCoordinator>,
}

impl WorkspaceCoordinator {
    pub fn new(
        tabs: crate::tabs::SharedTabs,
        content: Arc<ContentCoordinator>,
        factory: Arc<dyn WidgetFactory>,
        registry: Arc<WidgetRegistry>,
        main_loop: Arc<dyn MainLoop>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            tabs,
            content,
            factory,
            registry,
            main_loop,
            config,
            views: RwLock::new(HashMap::new()),
            hover_timer: Mutex::new(None),
            hover_suppressed_until: Mutex::new(None),
            callbacks: Callbacks::default(),
            weak: weak.clone(),
        })
    }

    pub fn set_on_last_pane_closed<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.last_pane_closed.lock() = Some(Arc::new(f));
    }

    pub fn set_on_pane_closed<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.pane_closed.lock() = Some(Arc::new(f));
    }

    pub fn set_on_state_changed<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.state_changed.lock() = Some(Arc::new(f));
    }

    pub fn set_on_open_popup_tab<F>(&self, f: F)
    where
        F: Fn(PopupInsertRequest) -> Result<PaneId> + Send + Sync + 'static,
    {
        *self.callbacks.open_popup_tab.lock() = Some(Arc::new(f));
    }

    fn fire_state_changed(&self) {
        let cb = self.callbacks.state_changed.lock().clone();
        if let Some(cb) = cb {
            cb();
        }
    }

    /// Bind a workspace to its on-screen container and build its widgets.
    pub fn attach_workspace(&self, ws_id: &str, view: Arc<dyn WorkspaceView>) -> Result<()> {
        self.views.write().insert(ws_id.to_string(), view);
        self.rebuild(ws_id)
    }

    pub fn detach_workspace(&self, ws_id: &str) {
        self.views.write().remove(ws_id);
    }

    fn view_for(&self, ws_id: &str) -> Option<Arc<dyn WorkspaceView>> {
        self.views.read().get(ws_id).cloned()
    }

    fn min_pane_percent(&self) -> f64 {
        self.config.workspace.resize_mode.min_pane_percent
    }

    fn with_active_workspace<R>(
        &self,
        f: impl FnOnce(&mut Workspace) -> R,
    ) -> Result<(WorkspaceId, R)> {
        let mut tabs = self.tabs.write();
        let tab = tabs
            .active_tab_mut()
            .ok_or_else(|| CoordError::ResourceMissing("no active tab".to_string()))?;
        let ws_id = tab.workspace.id.clone();
        Ok((ws_id, f(&mut tab.workspace)))
    }

    fn read_active_workspace<R>(&self, f: impl FnOnce(&Workspace) -> R) -> Result<(WorkspaceId, R)> {
        let tabs = self.tabs.read();
        let tab = tabs
            .active_tab()
            .ok_or_else(|| CoordError::ResourceMissing("no active tab".to_string()))?;
        Ok((tab.workspace.id.clone(), f(&tab.workspace)))
    }

    fn with_workspace_of_pane<R>(
        &self,
        pane_id: &str,
        f: impl FnOnce(&mut Workspace) -> R,
    ) -> Result<(WorkspaceId, R)> {
        let mut tabs = self.tabs.write();
        let tab = tabs
            .iter_mut()
            .find(|t| t.workspace.contains_pane(pane_id))
            .ok_or_else(|| {
                CoordError::ResourceMissing(format!("no workspace holds pane {}", pane_id))
            })?;
        let ws_id = tab.workspace.id.clone();
        Ok((ws_id, f(&mut tab.workspace)))
    }

    fn read_workspace_of_pane<R>(
        &self,
        pane_id: &str,
        f: impl FnOnce(&Workspace) -> R,
    ) -> Result<(WorkspaceId, R)> {
        let tabs = self.tabs.read();
        let tab = tabs
            .iter()
            .find(|t| t.workspace.contains_pane(pane_id))
            .ok_or_else(|| {
                CoordError::ResourceMissing(format!("no workspace holds pane {}", pane_id))
            })?;
        Ok((tab.workspace.id.clone(), f(&tab.workspace)))
    }

    // ----- split -----

    /// Split the active pane, putting a fresh pane on the `direction`
    /// side. Returns the new pane's id.
    pub fn split(&self, direction: Direction) -> Result<PaneId> {
        self.split_with_uri(direction, &self.config.workspace.new_pane_url.clone())
    }

    pub fn split_with_uri(&self, direction: Direction, uri: &str) -> Result<PaneId> {
        let min = self.min_pane_percent();
        let uri = uri.to_string();
        let (ws_id, outcome) = self.with_active_workspace(|ws| {
            let target = ws.active_pane_id.clone();
            let outcome = ops::split_pane(ws, &target, direction, &uri, 0.5, min);
            if let Ok(out) = &outcome {
                ws.active_pane_id = out.new_pane_id.clone();
            }
            outcome
        })?;
        let outcome = outcome.map_err(|e| CoordError::Invariant(e.to_string()))?;

        if let Some(view) = self.view_for(&ws_id) {
            if let Err(e) = self.apply_split_widgets(&view, &ws_id, &outcome, direction) {
                log::error!("Incremental split failed ({}); rebuilding", e);
                self.rebuild(&ws_id)?;
            }
        }

        self.activate_pane(&outcome.new_pane_id);
        self.fire_state_changed();
        log::debug!(
            "Split {:?} created pane {} (split node {})",
            direction,
            outcome.new_pane_id,
            outcome.split_node_id
        );
        Ok(outcome.new_pane_id)
    }

    fn apply_split_widgets(
        &self,
        view: &Arc<dyn WorkspaceView>,
        ws_id: &str,
        outcome: &ops::SplitOutcome,
        direction: Direction,
    ) -> Result<()> {
        // Reuse the widget that was on screen for the wrapped node.
        let existing = self.registry.node(&outcome.wrapped_node_id).ok_or_else(|| {
            CoordError::ResourceMissing(format!(
                "no widget registered for node {}",
                outcome.wrapped_node_id
            ))
        })?;

        let paned = self
            .factory
            .create_paned(direction.split_direction(), outcome.ratio);
        let new_leaf = self.build_leaf_widget(&outcome.new_pane_id)?;

        let (start, end) = if direction.is_forward() {
            (existing, new_leaf)
        } else {
            (new_leaf, existing)
        };
        paned.set_child(Slot::Start, Some(start));
        paned.set_child(Slot::End, Some(end));
        paned.set_ratio(outcome.ratio);

        // Hang the new split where the wrapped widget used to be.
        let split_parent = {
            let tabs = self.tabs.read();
            let result = tabs
                .iter()
                .find(|t| t.workspace.id == ws_id)
                .and_then(|t| t.workspace.node(&outcome.split_node_id))
                .and_then(|n| n.parent.clone());
            result
        };
        match split_parent {
            None => view.set_root(Some(WidgetNode::Paned(paned.clone()))),
            Some(parent_id) => {
                let slot = self.slot_of(ws_id, &parent_id, &outcome.split_node_id)?;
                let parent_widget = self
                    .registry
                    .node(&parent_id)
                    .and_then(|w| w.as_paned().cloned())
                    .ok_or_else(|| {
                        CoordError::ResourceMissing(format!("no paned widget for {}", parent_id))
                    })?;
                parent_widget.set_child(slot, Some(WidgetNode::Paned(paned.clone())));
            }
        }

        self.registry
            .register_node(&outcome.split_node_id, WidgetNode::Paned(paned.clone()));
        self.wire_ratio_handler(&paned, ws_id, &outcome.split_node_id);

        // Load the new pane's content now that it is on screen.
        self.load_initial(&outcome.new_pane_id);
        Ok(())
    }

    /// Kick off the first load for a freshly created pane. Popup panes
    /// are skipped; the engine drives the related view's navigation.
    fn load_initial(&self, pane_id: &str) {
        let Some(webview) = self.content.webview_for(pane_id) else {
            return;
        };
        let info = {
            let tabs = self.tabs.read();
            let result = tabs
                .iter()
                .find_map(|t| t.workspace.pane(pane_id))
                .map(|p| (p.uri.clone(), p.window_type));
            result
        };
        if let Some((uri, window_type)) = info {
            if window_type == WindowType::Main && !uri.is_empty() && webview.uri() != uri {
                webview.load_uri(&uri);
            }
        }
    }

    /// Which slot of a split node a child occupies, from the domain tree.
    fn slot_of(&self, ws_id: &str, parent_id: &str, child_id: &str) -> Result<Slot> {
        let tabs = self.tabs.read();
        let ws = tabs
            .iter()
            .find(|t| t.workspace.id == ws_id)
            .map(|t| &t.workspace)
            .ok_or_else(|| CoordError::ResourceMissing(format!("workspace {}", ws_id)))?;
        match ws.node(parent_id).map(|n| &n.kind) {
            Some(NodeKind::Split { children, .. }) => {
                if children[0] == child_id {
                    Ok(Slot::Start)
                } else if children[1] == child_id {
                    Ok(Slot::End)
                } else {
                    Err(CoordError::Invariant(format!(
                        "{} not under claimed parent {}",
                        child_id, parent_id
                    )))
                }
            }
            _ => Err(CoordError::Invariant(format!(
                "parent {} is not a split",
                parent_id
            ))),
        }
    }

    fn wire_ratio_handler(&self, paned: &Arc<dyn crate::widget::PanedWidget>, ws_id: &str, split_id: &str) {
        let weak = self.weak.clone();
        let ws_id = ws_id.to_string();
        let split_id = split_id.to_string();
        paned.connect_ratio_changed(Box::new(move |ratio| {
            let Some(this) = weak.upgrade() else {
                return;
            };
            let min = this.min_pane_percent();
            let mut tabs = this.tabs.write();
            if let Some(tab) = tabs.iter_mut().find(|t| t.workspace.id == ws_id) {
                if let Err(e) = ops::set_split_ratio(&mut tab.workspace, &split_id, ratio, min) {
                    log::warn!("Divider drag on stale split {}: {}", split_id, e);
                }
            }
            drop(tabs);
            this.fire_state_changed();
        }));
    }

    /// Holder + single-page stack wrapper for a leaf, so every pane shows
    /// a title bar uniformly.
    fn build_leaf_widget(&self, pane_id: &str) -> Result<WidgetNode> {
        let webview = self.content.ensure_web_view(pane_id)?;
        let holder = self.factory.create_pane_widget(&pane_id.to_string(), &webview);
        self.registry.register_pane(pane_id, holder.clone());
        self.wire_mouse_nav(&holder, pane_id);

        let stack = self.factory.create_stack();
        let title = self.pane_title(pane_id);
        stack.add_page(&pane_id.to_string(), holder, &title);
        self.wire_stack(&stack);
        self.registry.set_pane_stack(pane_id, stack.clone());
        self.registry
            .register_node(pane_id, WidgetNode::Stack(stack.clone()));
        Ok(WidgetNode::Stack(stack))
    }

    fn wire_mouse_nav(&self, holder: &Arc<dyn crate::widget::PaneWidget>, pane_id: &str) {
        let content = self.content.clone();
        let pane = pane_id.to_string();
        holder.connect_mouse_nav(Box::new(move |forward| {
            if let Some(webview) = content.webview_for(&pane) {
                if forward {
                    webview.go_forward();
                } else {
                    webview.go_back();
                }
            }
        }));
    }

    fn wire_stack(&self, stack: &Arc<dyn StackedView>) {
        let weak = self.weak.clone();
        stack.connect_page_activated(Box::new(move |pane_id| {
            if let Some(this) = weak.upgrade() {
                this.activate_pane(&pane_id);
            }
        }));
        let weak = self.weak.clone();
        stack.connect_page_close(Box::new(move |pane_id| {
            if let Some(this) = weak.upgrade() {
                if let Err(e) = this.close_pane_by_id(&pane_id) {
                    log::error!("Stack page close failed: {}", e);
                }
            }
        }));
    }

    fn pane_title(&self, pane_id: &str) -> String {
        let tabs = self.tabs.read();
        for tab in tabs.iter() {
            if let Some(pane) = tab.workspace.pane(pane_id) {
                return if pane.title.is_empty() {
                    pane.uri.clone()
                } else {
                    pane.title.clone()
                };
            }
        }
        String::new()
    }

    // ----- activation & focus -----

    /// Make a pane active in the domain and the widgets.
    pub fn activate_pane(&self, pane_id: &str) {
        let previous = {
            let mut tabs = self.tabs.write();
            let mut previous = None;
            for tab in tabs.iter_mut() {
                if tab.workspace.contains_pane(pane_id) {
                    previous = Some(tab.workspace.active_pane_id.clone());
                    tab.workspace.active_pane_id = pane_id.to_string();
                    // A stacked pane becomes its stack's visible page.
                    let stack = tab
                        .workspace
                        .node(pane_id)
                        .and_then(|n| n.parent.clone())
                        .filter(|p| {
                            tab.workspace
                                .node(p)
                                .map(|n| n.is_stack())
                                .unwrap_or(false)
                        });
                    if let Some(stack_id) = stack {
                        if let Some(NodeKind::Stack {
                            children,
                            active_index,
                        }) = tab.workspace.node_mut(&stack_id).map(|n| &mut n.kind)
                        {
                            if let Some(index) = children.iter().position(|c| c == pane_id) {
                                *active_index = index;
                            }
                        }
                    }
                    break;
                }
            }
            previous
        };

        if let Some(previous) = &previous {
            if previous != pane_id {
                if let Some(widget) = self.registry.pane_widget(previous) {
                    widget.set_active(false);
                }
            }
        }
        if let Some(stack) = self.registry.pane_stack(pane_id) {
            if let Some(index) = stack.page_index(&pane_id.to_string()) {
                stack.set_active_index(index);
            }
        }
        if let Some(widget) = self.registry.pane_widget(pane_id) {
            widget.set_active(true);
            widget.grab_focus();
        }
        if previous.as_deref() != Some(pane_id) {
            self.fire_state_changed();
        }
    }

    /// Keyboard directional focus: geometry when the view reports pane
    /// rectangles, structural tree search otherwise.
    pub fn navigate_focus(&self, direction: Direction) -> Result<Option<PaneId>> {
        if let Some(timer) = self.hover_timer.lock().take() {
            timer.cancel();
        }
        *self.hover_suppressed_until.lock() =
            Some(Instant::now() + KEYBOARD_FOCUS_SUPPRESS_DURATION);

        let (ws_id, active) =
            self.read_active_workspace(|ws| ws.active_pane_id.clone())?;

        let rects = self
            .view_for(&ws_id)
            .map(|view| view.pane_rects())
            .unwrap_or_default();
        let target = if rects.is_empty() {
            let (_, target) = self.read_active_workspace(|ws| {
                ops::structural_neighbor(ws, &active, direction)
            })?;
            target
        } else {
            geometry::find_in_direction(&active, &rects, direction)
        };

        if let Some(target) = &target {
            self.activate_pane(target);
        }
        Ok(target)
    }

    /// Pointer-hover focus, delayed and suppressed right after keyboard
    /// navigation.
    pub fn hover_focus_requested(&self, pane_id: &str) {
        if let Some(until) = *self.hover_suppressed_until.lock() {
            if Instant::now() < until {
                return;
            }
        }
        if let Some(previous) = self.hover_timer.lock().take() {
            previous.cancel();
        }
        let weak = self.weak.clone();
        let pane = pane_id.to_string();
        let timer = self.main_loop.schedule(
            HOVER_FOCUS_DELAY,
            Box::new(move || {
                if let Some(this) = weak.upgrade() {
                    this.activate_pane(&pane);
                }
            }),
        );
        *self.hover_timer.lock() = Some(timer);
    }

    // ----- close -----

    pub fn close_active_pane(&self) -> Result<()> {
        let (_, active) = self.read_active_workspace(|ws| ws.active_pane_id.clone())?;
        self.close_pane_by_id(&active)
    }

    pub fn close_pane_by_id(&self, pane_id: &str) -> Result<()> {
        let (ws_id, pane_count) = self.read_workspace_of_pane(pane_id, |ws| ws.pane_count())?;
        if pane_count <= 1 {
            // Last pane: the tab goes instead.
            let cb = self.callbacks.last_pane_closed.lock().clone();
            if let Some(cb) = cb {
                cb();
            }
            return Ok(());
        }

        // Context first, while the tree is consistent; a precheck failure
        // names the broken invariant and sends us down the rebuild path.
        let (_, precheck) =
            self.read_workspace_of_pane(pane_id, |ws| ops::derive_close_context(ws, pane_id))?;
        let incremental = match &precheck {
            Ok(_) => true,
            Err(reason) => {
                log::error!("Close precheck failed ({}); will rebuild", reason);
                false
            }
        };

        let (_, outcome) = self.with_workspace_of_pane(pane_id, |ws| ops::close_pane(ws, pane_id))?;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(ops::OpError::LastPane) => {
                let cb = self.callbacks.last_pane_closed.lock().clone();
                if let Some(cb) = cb {
                    cb();
                }
                return Ok(());
            }
            Err(e) => return Err(CoordError::Invariant(e.to_string())),
        };

        let mut widgets_ok = incremental;
        if incremental {
            if let Err(e) = self.apply_close_widgets(&ws_id, &outcome) {
                log::error!("Incremental close failed ({}); rebuilding", e);
                widgets_ok = false;
            }
        }
        if !widgets_ok {
            self.rebuild(&ws_id)?;
        }

        self.registry.unregister_node(pane_id);
        self.registry.unregister_pane(pane_id);
        self.content.release_web_view(pane_id);

        let cb = self.callbacks.pane_closed.lock().clone();
        if let Some(cb) = cb {
            cb(pane_id);
        }

        self.activate_pane(&outcome.new_active);
        self.fire_state_changed();
        Ok(())
    }

    fn apply_close_widgets(
        &self,
        ws_id: &str,
        outcome: &ops::CloseOutcome,
    ) -> Result<()> {
        match &outcome.context {
            ops::CloseContext::Root => Ok(()),
            ops::CloseContext::Stacked { stack_id, index } => {
                let Some((stack_id, new_active_index)) = outcome.stack_after.clone() else {
                    // The stack dissolved with its last page; rebuild is
                    // simpler than stitching the promoted sibling here.
                    return Err(CoordError::ResourceMissing(format!(
                        "stack {} dissolved on close",
                        stack_id
                    )));
                };
                let stack = self
                    .registry
                    .node(&stack_id)
                    .and_then(|w| w.as_stack().cloned())
                    .ok_or_else(|| {
                        CoordError::ResourceMissing(format!("no stack widget for {}", stack_id))
                    })?;
                stack.remove_page(*index);
                stack.set_active_index(new_active_index);
                self.sync_stack_titles(ws_id, &stack_id, &stack);
                Ok(())
            }
            ops::CloseContext::Split {
                parent_id,
                sibling_id,
                sibling_slot,
                grandparent,
            } => {
                let parent_widget = self
                    .registry
                    .unregister_node(parent_id)
                    .and_then(|w| w.as_paned().cloned())
                    .ok_or_else(|| {
                        CoordError::ResourceMissing(format!("no paned widget for {}", parent_id))
                    })?;

                let closing_slot = match sibling_slot {
                    Slot::Start => Slot::End,
                    Slot::End => Slot::Start,
                };
                let sibling_widget = parent_widget.child(*sibling_slot).or_else(|| {
                    self.registry.node(sibling_id)
                });
                let sibling_widget = sibling_widget.ok_or_else(|| {
                    CoordError::ResourceMissing(format!("no widget for sibling {}", sibling_id))
                })?;

                // Each child must be unparented before the sibling can be
                // reparented: closing pane first, then the sibling.
                parent_widget.set_child(closing_slot, None);
                parent_widget.set_child(*sibling_slot, None);

                match grandparent {
                    Some((gp_id, gp_slot)) => {
                        let gp_widget = self
                            .registry
                            .node(gp_id)
                            .and_then(|w| w.as_paned().cloned())
                            .ok_or_else(|| {
                                CoordError::ResourceMissing(format!(
                                    "no paned widget for grandparent {}",
                                    gp_id
                                ))
                            })?;
                        gp_widget.set_child(*gp_slot, Some(sibling_widget));
                    }
                    None => {
                        let view = self.view_for(ws_id).ok_or_else(|| {
                            CoordError::ResourceMissing(format!("no view for {}", ws_id))
                        })?;
                        view.set_root(Some(sibling_widget));
                        // Grab focus on the promoted side so the engine
                        // does not warn about a focus-less window.
                        if let Some(widget) = self.registry.pane_widget(&outcome.new_active) {
                            widget.grab_focus();
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Re-sync a stack's title bars with the live pane titles.
    fn sync_stack_titles(&self, ws_id: &str, stack_id: &str, stack: &Arc<dyn StackedView>) {
        let children: Vec<PaneId> = {
            let tabs = self.tabs.read();
            let result = tabs
                .iter()
                .find(|t| t.workspace.id == ws_id)
                .and_then(|t| match t.workspace.node(stack_id).map(|n| &n.kind) {
                    Some(NodeKind::Stack { children, .. }) => Some(children.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            result
        };
        for (index, pane_id) in children.iter().enumerate() {
            stack.set_page_title(index, &self.pane_title(pane_id));
        }
    }

    // ----- stacking -----

    /// Stack the active pane: panes already in a stack (or stacks
    /// themselves) gain a page, plain leaves convert into a stack.
    pub fn stack_pane(&self) -> Result<PaneId> {
        let uri = self.config.workspace.new_pane_url.clone();
        let (ws_id, plan) = self.read_active_workspace(|ws| {
            let active = ws.active_pane_id.clone();
            let parent_stack = ws
                .node(&active)
                .and_then(|n| n.parent.clone())
                .filter(|p| ws.node(p).map(|n| n.is_stack()).unwrap_or(false));
            (active, parent_stack)
        })?;
        let (active, parent_stack) = plan;

        match parent_stack {
            Some(stack_id) => {
                let (_, result) = self.with_active_workspace(|ws| {
                    ops::add_to_stack(ws, &stack_id, &uri).map(|pane| {
                        ws.active_pane_id = pane.clone();
                        pane
                    })
                })?;
                let new_pane = result.map_err(|e| CoordError::Invariant(e.to_string()))?;

                if let Err(e) = self.add_stack_page_widget(&stack_id, &new_pane) {
                    log::error!("Incremental stack add failed ({}); rebuilding", e);
                    self.rebuild(&ws_id)?;
                }
                self.activate_pane(&new_pane);
                self.fire_state_changed();
                Ok(new_pane)
            }
            None => {
                let (_, result) = self.with_active_workspace(|ws| {
                    ops::create_stack(ws, &active, &uri).map(|out| {
                        ws.active_pane_id = out.new_pane_id.clone();
                        out
                    })
                })?;
                let outcome = result.map_err(|e| CoordError::Invariant(e.to_string()))?;

                if let Err(e) = self.convert_wrapper_to_stack(&active, &outcome) {
                    log::error!("Incremental stack conversion failed ({}); rebuilding", e);
                    self.rebuild(&ws_id)?;
                }
                self.activate_pane(&outcome.new_pane_id);
                self.fire_state_changed();
                Ok(outcome.new_pane_id)
            }
        }
    }

    fn add_stack_page_widget(&self, stack_id: &str, pane_id: &str) -> Result<()> {
        let stack = self
            .registry
            .node(stack_id)
            .and_then(|w| w.as_stack().cloned())
            .ok_or_else(|| {
                CoordError::ResourceMissing(format!("no stack widget for {}", stack_id))
            })?;
        let webview = self.content.ensure_web_view(pane_id)?;
        let holder = self.factory.create_pane_widget(&pane_id.to_string(), &webview);
        self.registry.register_pane(pane_id, holder.clone());
        self.wire_mouse_nav(&holder, pane_id);
        stack.add_page(&pane_id.to_string(), holder, &self.pane_title(pane_id));
        self.registry.set_pane_stack(pane_id, stack.clone());

        self.load_initial(pane_id);
        if let Some(index) = stack.page_index(&pane_id.to_string()) {
            stack.set_active_index(index);
        }
        Ok(())
    }

    /// A plain leaf converting into a stack reuses its single-page
    /// wrapper as the container.
    fn convert_wrapper_to_stack(
        &self,
        original_pane: &str,
        outcome: &ops::StackOutcome,
    ) -> Result<()> {
        let wrapper = self
            .registry
            .unregister_node(original_pane)
            .and_then(|w| w.as_stack().cloned())
            .ok_or_else(|| {
                CoordError::ResourceMissing(format!("no wrapper stack for {}", original_pane))
            })?;
        self.registry
            .register_node(&outcome.stack_node_id, WidgetNode::Stack(wrapper.clone()));

        // The wrapper hid its single title bar; sync the original pane's
        // title now that it is a real strip.
        if let Some(index) = wrapper.page_index(&original_pane.to_string()) {
            wrapper.set_page_title(index, &self.pane_title(original_pane));
        }

        let webview = self.content.ensure_web_view(&outcome.new_pane_id)?;
        let holder = self
            .factory
            .create_pane_widget(&outcome.new_pane_id, &webview);
        self.registry.register_pane(&outcome.new_pane_id, holder.clone());
        self.wire_mouse_nav(&holder, &outcome.new_pane_id);
        wrapper.add_page(
            &outcome.new_pane_id,
            holder,
            &self.pane_title(&outcome.new_pane_id),
        );
        self.registry
            .set_pane_stack(&outcome.new_pane_id, wrapper.clone());

        self.load_initial(&outcome.new_pane_id);
        wrapper.set_active_index(1);
        Ok(())
    }

    // ----- popup insertion -----

    /// Insert a popup pane next to its parent. The WebView lands in the
    /// widget hierarchy before this returns; on widget failure the domain
    /// change is rolled back.
    pub fn insert_popup(&self, request: PopupInsertRequest) -> Result<PaneId> {
        match request.behavior {
            PopupBehavior::Tabbed => {
                let cb = self.callbacks.open_popup_tab.lock().clone();
                let Some(cb) = cb else {
                    return Err(CoordError::ResourceMissing(
                        "no tabbed-popup handler installed".to_string(),
                    ));
                };
                cb(request)
            }
            PopupBehavior::Split => self.insert_popup_split(request),
            PopupBehavior::Stacked => self.insert_popup_stacked(request),
        }
    }

    fn placement_direction(&self) -> Direction {
        match self.config.popup.placement {
            PopupPlacement::Left => Direction::Left,
            PopupPlacement::Right => Direction::Right,
            PopupPlacement::Top => Direction::Up,
            PopupPlacement::Bottom => Direction::Down,
        }
    }

    fn insert_popup_split(&self, request: PopupInsertRequest) -> Result<PaneId> {
        let direction = self.placement_direction();
        let min = self.min_pane_percent();
        let parent_pane = request.parent_pane_id.clone();
        let uri = request.uri.clone();

        let (ws_id, outcome) = self.with_workspace_of_pane(&parent_pane, |ws| {
            ops::split_pane(ws, &parent_pane, direction, &uri, 0.5, min)
        })?;
        let outcome = outcome.map_err(|e| CoordError::Invariant(e.to_string()))?;
        let pane_id = outcome.new_pane_id.clone();
        self.mark_popup_pane(&pane_id, &parent_pane);

        self.content.adopt_web_view(&pane_id, &request.webview);

        if let Some(view) = self.view_for(&ws_id) {
            if let Err(e) = self.apply_split_widgets(&view, &ws_id, &outcome, direction) {
                // Consistency rollback: take the popup pane out again
                // before reporting failure.
                let _ = self.with_workspace_of_pane(&pane_id, |ws| ops::close_pane(ws, &pane_id));
                self.content.release_web_view(&pane_id);
                return Err(CoordError::RolledBack(format!(
                    "popup split insertion failed: {}",
                    e
                )));
            }
        }
        self.fire_state_changed();
        Ok(pane_id)
    }

    fn insert_popup_stacked(&self, request: PopupInsertRequest) -> Result<PaneId> {
        let parent_pane = request.parent_pane_id.clone();
        let uri = request.uri.clone();

        let (_ws_id, plan) = self.read_workspace_of_pane(&parent_pane, |ws| {
            ws.node(&parent_pane)
                .and_then(|n| n.parent.clone())
                .filter(|p| ws.node(p).map(|n| n.is_stack()).unwrap_or(false))
        })?;

        let (pane_id, widget_result) = match plan {
            Some(stack_id) => {
                let (_, result) = self
                    .with_workspace_of_pane(&parent_pane, |ws| ops::add_to_stack(ws, &stack_id, &uri))?;
                let pane_id = result.map_err(|e| CoordError::Invariant(e.to_string()))?;
                self.mark_popup_pane(&pane_id, &parent_pane);
                self.content.adopt_web_view(&pane_id, &request.webview);
                let widget_result = self.add_stack_page_widget(&stack_id, &pane_id);
                (pane_id, widget_result)
            }
            None => {
                let (_, result) = self
                    .with_workspace_of_pane(&parent_pane, |ws| ops::create_stack(ws, &parent_pane, &uri))?;
                let outcome = result.map_err(|e| CoordError::Invariant(e.to_string()))?;
                let pane_id = outcome.new_pane_id.clone();
                self.mark_popup_pane(&pane_id, &parent_pane);
                self.content.adopt_web_view(&pane_id, &request.webview);
                let widget_result = self.convert_wrapper_to_stack(&parent_pane, &outcome);
                (pane_id, widget_result)
            }
        };

        if let Err(e) = widget_result {
            let _ = self.with_workspace_of_pane(&pane_id, |ws| ops::close_pane(ws, &pane_id));
            self.content.release_web_view(&pane_id);
            return Err(CoordError::RolledBack(format!(
                "popup stack insertion failed: {}",
                e
            )));
        }
        self.fire_state_changed();
        Ok(pane_id)
    }

    fn mark_popup_pane(&self, pane_id: &str, parent_pane: &str) {
        let mut tabs = self.tabs.write();
        for tab in tabs.iter_mut() {
            if let Some(pane) = tab.workspace.pane_mut(pane_id) {
                pane.window_type = crate::workspace::WindowType::Popup;
                pane.is_related = true;
                pane.parent_pane_id = Some(parent_pane.to_string());
                // Popup panes keep the URI the opener asked for; the load
                // happens in the related view.
                break;
            }
        }
    }

    // ----- consume / expel / resize -----

    pub fn consume(&self, direction: Direction) -> Result<()> {
        let (ws_id, result) =
            self.with_active_workspace(|ws| ops::consume_pane(ws, direction))?;
        match result {
            Ok(outcome) => {
                log::debug!(
                    "Consumed pane {} into stack {}",
                    outcome.moved_pane_id,
                    outcome.stack_node_id
                );
                self.rebuild(&ws_id)?;
                self.fire_state_changed();
                Ok(())
            }
            Err(message) => {
                self.toast_active(&message);
                Ok(())
            }
        }
    }

    pub fn expel(&self) -> Result<()> {
        let min = self.min_pane_percent();
        let (ws_id, result) = self.with_active_workspace(|ws| ops::expel_pane(ws, min))?;
        match result {
            Ok(_) => {
                self.rebuild(&ws_id)?;
                self.fire_state_changed();
                Ok(())
            }
            Err(message) => {
                self.toast_active(&message);
                Ok(())
            }
        }
    }

    pub fn resize(&self, grow: bool) -> Result<()> {
        let step = self.config.workspace.resize_mode.step_percent;
        let min = self.min_pane_percent();
        let (_, result) =
            self.with_active_workspace(|ws| ops::resize_active_pane(ws, grow, step, min))?;
        match result {
            Ok((split_id, ratio)) => {
                if let Some(paned) = self.registry.node(&split_id).and_then(|w| w.as_paned().cloned())
                {
                    paned.set_ratio(ratio);
                }
                self.fire_state_changed();
                Ok(())
            }
            Err(ops::OpError::NothingToResize) => {
                self.toast_active("Nothing to resize");
                Ok(())
            }
            Err(e) => Err(CoordError::Invariant(e.to_string())),
        }
    }

    fn toast_active(&self, message: &str) {
        let target = self
            .read_active_workspace(|ws| ws.active_pane_id.clone())
            .ok();
        if let Some((ws_id, active)) = target {
            if let Some(widget) = self.registry.pane_widget(&active) {
                widget.show_toast(message);
                return;
            }
            if let Some(view) = self.view_for(&ws_id) {
                view.show_toast(message);
            }
        }
    }

    // ----- fallback rebuild -----

    /// Deterministic reconstruction of a workspace's widgets from the
    /// domain tree.
    pub fn rebuild(&self, ws_id: &str) -> Result<()> {
        let ws = {
            let tabs = self.tabs.read();
            let result = tabs
                .iter()
                .find(|t| t.workspace.id == ws_id)
                .map(|t| t.workspace.clone())
                .ok_or_else(|| CoordError::ResourceMissing(format!("workspace {}", ws_id)))?;
            result
        };

        let root = self.rebuild_node(&ws, ws.root_id())?;
        if let Some(view) = self.view_for(ws_id) {
            view.set_root(Some(root));
        }
        self.content.attach_to_workspace(&ws)?;
        log::info!("Rebuilt workspace {} widgets", ws_id);
        Ok(())
    }

    fn rebuild_node(&self, ws: &Workspace, node_id: &NodeId) -> Result<WidgetNode> {
        let node = ws
            .node(node_id)
            .ok_or_else(|| CoordError::Invariant(format!("node {} missing", node_id)))?;
        match &node.kind {
            NodeKind::Leaf(pane) => self.build_leaf_widget(&pane.id),
            NodeKind::Stack {
                children,
                active_index,
            } => {
                let stack = self.factory.create_stack();
                self.wire_stack(&stack);
                for pane_id in children {
                    let webview = self.content.ensure_web_view(pane_id)?;
                    let holder = self.factory.create_pane_widget(pane_id, &webview);
                    self.registry.register_pane(pane_id, holder.clone());
                    self.wire_mouse_nav(&holder, pane_id);
                    stack.add_page(pane_id, holder, &self.pane_title(pane_id));
                    self.registry.set_pane_stack(pane_id, stack.clone());
                }
                stack.set_active_index(*active_index);
                self.registry
                    .register_node(node_id, WidgetNode::Stack(stack.clone()));
                Ok(WidgetNode::Stack(stack))
            }
            NodeKind::Split {
                direction,
                ratio,
                children,
            } => {
                let paned = self.factory.create_paned(*direction, *ratio);
                let start = self.rebuild_node(ws, &children[0])?;
                let end = self.rebuild_node(ws, &children[1])?;
                paned.set_child(Slot::Start, Some(start));
                paned.set_child(Slot::End, Some(end));
                paned.set_ratio(*ratio);
                self.registry
                    .register_node(node_id, WidgetNode::Paned(paned.clone()));
                self.wire_ratio_handler(&paned, &ws.id, node_id);
                Ok(WidgetNode::Paned(paned))
            }
        }
    }
}
