//! Toolkit ports.
//!
//! The GTK side of the application implements these traits; the
//! coordinators only ever see trait objects. Widget methods are called on
//! the UI main loop exclusively.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::workspace::geometry::Rect;
use crate::workspace::{NodeId, PaneId, Slot, SplitDirection};

/// Background applied to a pane while its page loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundColor {
    /// Themed surface for internal pages.
    Themed,
    /// Plain white for regular web content.
    White,
}

/// The widget holding one pane: WebView container, loading indicator,
/// status overlay.
pub trait PaneWidget: Send + Sync {
    fn pane_id(&self) -> PaneId;
    fn set_loading(&self, loading: bool);
    fn set_progress(&self, fraction: f64);
    fn set_background(&self, color: BackgroundColor);
    /// Link-hover style status overlay; `None` hides it.
    fn show_status(&self, text: Option<&str>);
    /// Transient message toast anchored to this pane.
    fn show_toast(&self, message: &str);
    fn grab_focus(&self);
    fn set_active(&self, active: bool);
    /// Mouse button 8/9 gesture; `true` means forward.
    fn connect_mouse_nav(&self, callback: Box<dyn Fn(bool) + Send + Sync>);
}

/// A two-child divider widget.
pub trait PanedWidget: Send + Sync {
    fn orientation(&self) -> SplitDirection;
    fn set_ratio(&self, ratio: f64);
    fn ratio(&self) -> f64;
    fn set_child(&self, slot: Slot, child: Option<WidgetNode>);
    fn child(&self, slot: Slot) -> Option<WidgetNode>;
    fn connect_ratio_changed(&self, callback: Box<dyn Fn(f64) + Send + Sync>);
}

/// Tab-strip container presenting stacked panes one at a time. Every leaf
/// is hosted in one of these so titles render uniformly; plain leaves get
/// a single-page wrapper.
pub trait StackedView: Send + Sync {
    fn add_page(&self, pane_id: &PaneId, child: Arc<dyn PaneWidget>, title: &str);
    fn remove_page(&self, index: usize);
    fn page_index(&self, pane_id: &PaneId) -> Option<usize>;
    fn page_count(&self) -> usize;
    fn set_active_index(&self, index: usize);
    fn active_index(&self) -> usize;
    fn set_page_title(&self, index: usize, title: &str);
    fn set_page_icon(&self, index: usize, icon: Option<Vec<u8>>);
    /// Title-bar click.
    fn connect_page_activated(&self, callback: Box<dyn Fn(PaneId) + Send + Sync>);
    /// Title-bar close button.
    fn connect_page_close(&self, callback: Box<dyn Fn(PaneId) + Send + Sync>);
}

/// Any widget that can occupy a slot in the workspace widget tree.
#[derive(Clone)]
pub enum WidgetNode {
    Paned(Arc<dyn PanedWidget>),
    Stack(Arc<dyn StackedView>),
}

impl std::fmt::Debug for WidgetNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WidgetNode::Paned(_) => f.write_str("WidgetNode::Paned"),
            WidgetNode::Stack(_) => f.write_str("WidgetNode::Stack"),
        }
    }
}

impl WidgetNode {
    pub fn as_paned(&self) -> Option<&Arc<dyn PanedWidget>> {
        match self {
            WidgetNode::Paned(paned) => Some(paned),
            _ => None,
        }
    }

    pub fn as_stack(&self) -> Option<&Arc<dyn StackedView>> {
        match self {
            WidgetNode::Stack(stack) => Some(stack),
            _ => None,
        }
    }
}

/// Creates the concrete widgets.
pub trait WidgetFactory: Send + Sync {
    fn create_paned(&self, direction: SplitDirection, ratio: f64) -> Arc<dyn PanedWidget>;
    fn create_stack(&self) -> Arc<dyn StackedView>;
    /// Holder embedding the given pane's WebView.
    fn create_pane_widget(
        &self,
        pane_id: &PaneId,
        webview: &Arc<dyn crate::engine::WebView>,
    ) -> Arc<dyn PaneWidget>;
}

/// The per-workspace container the root widget lives in, plus the
/// geometry and toast surfaces.
pub trait WorkspaceView: Send + Sync {
    fn set_root(&self, root: Option<WidgetNode>);
    /// On-screen rectangles for visible panes; empty when the view cannot
    /// provide geometry (structural navigation takes over).
    fn pane_rects(&self) -> Vec<(PaneId, Rect)>;
    fn show_toast(&self, message: &str);
}

/// Tab bar surface driven by the tab coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSummary {
    pub id: String,
    pub title: String,
    pub is_pinned: bool,
}

pub trait TabBarView: Send + Sync {
    fn refresh(&self, tabs: &[TabSummary], active: Option<&str>);
    fn set_visible(&self, visible: bool);
}

/// Maps live widgets to domain ids. Shared between the workspace
/// coordinator (which maintains it) and the content coordinator (which
/// reads it for title/icon propagation).
#[derive(Default)]
pub struct WidgetRegistry {
    nodes: RwLock<HashMap<NodeId, WidgetNode>>,
    pane_widgets: RwLock<HashMap<PaneId, Arc<dyn PaneWidget>>>,
    /// Stack widget presenting each pane (its own wrapper or the shared
    /// container it is a page of).
    pane_stacks: RwLock<HashMap<PaneId, Arc<dyn StackedView>>>,
}

impl WidgetRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register_node(&self, node_id: &str, widget: WidgetNode) {
        self.nodes.write().insert(node_id.to_string(), widget);
    }

    pub fn node(&self, node_id: &str) -> Option<WidgetNode> {
        self.nodes.read().get(node_id).cloned()
    }

    pub fn unregister_node(&self, node_id: &str) -> Option<WidgetNode> {
        self.nodes.write().remove(node_id)
    }

    pub fn register_pane(&self, pane_id: &str, widget: Arc<dyn PaneWidget>) {
        self.pane_widgets.write().insert(pane_id.to_string(), widget);
    }

    pub fn pane_widget(&self, pane_id: &str) -> Option<Arc<dyn PaneWidget>> {
        self.pane_widgets.read().get(pane_id).cloned()
    }

    pub fn unregister_pane(&self, pane_id: &str) {
        self.pane_widgets.write().remove(pane_id);
        self.pane_stacks.write().remove(pane_id);
    }

    pub fn set_pane_stack(&self, pane_id: &str, stack: Arc<dyn StackedView>) {
        self.pane_stacks.write().insert(pane_id.to_string(), stack);
    }

    pub fn pane_stack(&self, pane_id: &str) -> Option<Arc<dyn StackedView>> {
        self.pane_stacks.read().get(pane_id).cloned()
    }

    pub fn clear(&self) {
        self.nodes.write().clear();
        self.pane_widgets.write().clear();
        self.pane_stacks.write().clear();
    }
}
