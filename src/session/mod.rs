//! Session snapshots: serializing the tab list for crash resurrection and
//! restoring it on startup.
//!
//! The document is a versioned JSON tree. Identifiers are regenerated on
//! load; everything else (structure, titles, URIs, zooms, positions, pin
//! flags, active selections) round-trips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::mainloop::UiCoalescer;
use crate::tabs::{SharedTabs, Tab, TabList};
use crate::workspace::{
    clamp_zoom, new_id, NodeId, NodeKind, Pane, PaneNode, SplitDirection, Workspace,
};

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Coalescer key under which snapshot saves are merged.
pub const SAVE_KEY: &str = "session-save";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneSnapshot {
    pub id: String,
    pub uri: String,
    pub title: String,
    pub zoom_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane: Option<PaneSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NodeSnapshot>>,
    pub split_dir: String,
    pub split_ratio: f64,
    pub is_stacked: bool,
    pub active_stack_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub id: String,
    pub root: NodeSnapshot,
    pub active_pane_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabSnapshot {
    pub id: String,
    pub name: String,
    pub position: usize,
    pub is_pinned: bool,
    pub workspace: WorkspaceSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub version: u32,
    pub session_id: String,
    pub tabs: Vec<TabSnapshot>,
    pub active_tab_index: usize,
    pub saved_at: DateTime<Utc>,
}

impl SessionState {
    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        log::debug!("Session saved to {:?}", path);
        Ok(())
    }
}

fn split_dir_name(direction: Option<SplitDirection>) -> String {
    match direction {
        None => "none".to_string(),
        Some(SplitDirection::Horizontal) => "horizontal".to_string(),
        Some(SplitDirection::Vertical) => "vertical".to_string(),
    }
}

fn snapshot_node(ws: &Workspace, node_id: &str) -> NodeSnapshot {
    let Some(node) = ws.node(node_id) else {
        // Unreachable on a consistent tree; produce an inert leaf.
        return NodeSnapshot {
            id: node_id.to_string(),
            pane: Some(PaneSnapshot {
                id: node_id.to_string(),
                uri: "about:blank".to_string(),
                title: String::new(),
                zoom_factor: crate::config::ZOOM_DEFAULT,
            }),
            children: None,
            split_dir: split_dir_name(None),
            split_ratio: 0.0,
            is_stacked: false,
            active_stack_index: 0,
        };
    };

    match &node.kind {
        NodeKind::Leaf(pane) => NodeSnapshot {
            id: node.id.clone(),
            pane: Some(PaneSnapshot {
                id: pane.id.clone(),
                uri: pane.uri.clone(),
                title: pane.title.clone(),
                zoom_factor: pane.zoom,
            }),
            children: None,
            split_dir: split_dir_name(None),
            split_ratio: 0.0,
            is_stacked: false,
            active_stack_index: 0,
        },
        NodeKind::Split {
            direction,
            ratio,
            children,
        } => NodeSnapshot {
            id: node.id.clone(),
            pane: None,
            children: Some(children.iter().map(|c| snapshot_node(ws, c)).collect()),
            split_dir: split_dir_name(Some(*direction)),
            split_ratio: *ratio,
            is_stacked: false,
            active_stack_index: 0,
        },
        NodeKind::Stack {
            children,
            active_index,
        } => NodeSnapshot {
            id: node.id.clone(),
            pane: None,
            children: Some(children.iter().map(|c| snapshot_node(ws, c)).collect()),
            split_dir: split_dir_name(None),
            split_ratio: 0.0,
            is_stacked: true,
            active_stack_index: *active_index,
        },
    }
}

pub(crate) fn snapshot_workspace(ws: &Workspace) -> WorkspaceSnapshot {
    WorkspaceSnapshot {
        id: ws.id.clone(),
        root: snapshot_node(ws, ws.root_id()),
        active_pane_id: ws.active_pane_id.clone(),
    }
}

/// Serialize the whole tab list.
pub fn snapshot_from_tab_list(tabs: &TabList, session_id: &str) -> SessionState {
    let active_tab_index = tabs
        .active_tab_id()
        .and_then(|active| tabs.iter().position(|t| &t.id == active))
        .unwrap_or(0);

    SessionState {
        version: SCHEMA_VERSION,
        session_id: session_id.to_string(),
        tabs: tabs
            .iter()
            .map(|tab| TabSnapshot {
                id: tab.id.clone(),
                name: tab.name.clone(),
                position: tab.position,
                is_pinned: tab.is_pinned,
                workspace: snapshot_workspace(&tab.workspace),
            })
            .collect(),
        active_tab_index,
        saved_at: Utc::now(),
    }
}

fn restore_node(
    snap: &NodeSnapshot,
    parent: Option<NodeId>,
    nodes: &mut HashMap<NodeId, PaneNode>,
    pane_map: &mut HashMap<String, String>,
) -> NodeId {
    if let Some(pane_snap) = &snap.pane {
        let mut pane = Pane::new(pane_snap.uri.clone());
        pane.title = pane_snap.title.clone();
        pane.zoom = clamp_zoom(pane_snap.zoom_factor);
        let id = pane.id.clone();
        pane_map.insert(pane_snap.id.clone(), id.clone());
        let mut node = PaneNode::leaf(pane);
        node.parent = parent;
        nodes.insert(id.clone(), node);
        return id;
    }

    let children_snaps = snap.children.as_deref().unwrap_or(&[]);
    let id = new_id();

    if snap.is_stacked {
        let children: Vec<NodeId> = children_snaps
            .iter()
            .map(|c| restore_node(c, Some(id.clone()), nodes, pane_map))
            .collect();
        let active_index = snap.active_stack_index.min(children.len().saturating_sub(1));
        nodes.insert(
            id.clone(),
            PaneNode {
                id: id.clone(),
                parent,
                kind: NodeKind::Stack {
                    children,
                    active_index,
                },
            },
        );
        return id;
    }

    match children_snaps {
        [first, second] => {
            let direction = if snap.split_dir == "vertical" {
                SplitDirection::Vertical
            } else {
                SplitDirection::Horizontal
            };
            let start = restore_node(first, Some(id.clone()), nodes, pane_map);
            let end = restore_node(second, Some(id.clone()), nodes, pane_map);
            nodes.insert(
                id.clone(),
                PaneNode {
                    id: id.clone(),
                    parent,
                    kind: NodeKind::Split {
                        direction,
                        ratio: snap.split_ratio.clamp(0.0, 1.0),
                        children: [start, end],
                    },
                },
            );
            id
        }
        [only] => {
            // Degenerate container: collapse to its single child.
            log::warn!("Snapshot node {} has one child; collapsing", snap.id);
            restore_node(only, parent, nodes, pane_map)
        }
        _ => {
            log::warn!("Snapshot node {} has no children; substituting blank pane", snap.id);
            let pane = Pane::new("about:blank");
            let leaf_id = pane.id.clone();
            let mut node = PaneNode::leaf(pane);
            node.parent = parent;
            nodes.insert(leaf_id.clone(), node);
            leaf_id
        }
    }
}

pub(crate) fn restore_workspace(snap: &WorkspaceSnapshot) -> Workspace {
    let mut nodes = HashMap::new();
    let mut pane_map = HashMap::new();
    let root = restore_node(&snap.root, None, &mut nodes, &mut pane_map);

    let mut ws = Workspace::assemble(new_id(), nodes, root.clone(), String::new());
    let active = pane_map
        .get(&snap.active_pane_id)
        .cloned()
        .or_else(|| ws.active_leaf_under(&root));
    ws.active_pane_id = active.unwrap_or_default();
    ws
}

/// Rebuild a tab list from a snapshot with fresh identifiers.
pub fn tab_list_from_snapshot(state: &SessionState) -> TabList {
    let mut ordered: Vec<&TabSnapshot> = state.tabs.iter().collect();
    ordered.sort_by_key(|t| t.position);

    let mut list = TabList::new();
    let mut ids = Vec::new();
    for snap in ordered {
        let mut tab = Tab::new("about:blank");
        tab.name = snap.name.clone();
        tab.is_pinned = snap.is_pinned;
        tab.workspace = restore_workspace(&snap.workspace);
        ids.push(list.add(tab));
    }

    if let Some(active_id) = ids.get(state.active_tab_index) {
        list.set_active(active_id);
    }
    list
}

/// Debounced snapshot persistence. Coordinators call `request_save` on
/// every state change; bursts collapse through the coalescer into one
/// write.
pub struct SessionService {
    path: PathBuf,
    tabs: SharedTabs,
    coalescer: Arc<UiCoalescer>,
    session_id: String,
    weak: std::sync::Weak<SessionService>,
}

impl SessionService {
    pub fn new(path: PathBuf, tabs: SharedTabs, coalescer: Arc<UiCoalescer>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            path,
            tabs,
            coalescer,
            session_id: new_id(),
            weak: weak.clone(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn request_save(&self) {
        let weak = self.weak.clone();
        self.coalescer.post(
            SAVE_KEY,
            Box::new(move || {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = this.save_now() {
                    log::warn!("Session save failed: {}", e);
                }
            }),
        );
    }

    pub fn save_now(&self) -> io::Result<()> {
        let state = {
            let tabs = self.tabs.read();
            snapshot_from_tab_list(&tabs, &self.session_id)
        };
        state.save(&self.path)
    }

    /// Load the snapshot and rebuild the tab list, or `None` when there is
    /// nothing to restore.
    pub fn restore(&self) -> Option<TabList> {
        let state = match SessionState::load(&self.path) {
            Ok(state) => state,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Failed to load session: {}", e);
                return None;
            }
        };
        if state.tabs.is_empty() {
            return None;
        }
        log::info!("Restoring {} tabs from session {}", state.tabs.len(), state.session_id);
        Some(tab_list_from_snapshot(&state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::ops;
    use crate::workspace::Direction;

    fn sample_tabs() -> TabList {
        let mut list = TabList::new();

        let mut search = Tab::new("https://google.com");
        search.name = "Search".to_string();
        search.is_pinned = true;
        let pane_id = search.workspace.active_pane_id.clone();
        {
            let pane = search.workspace.pane_mut(&pane_id).unwrap();
            pane.title = "Google".to_string();
            pane.zoom = 1.5;
        }
        list.add(search);

        let mut code = Tab::new("https://left.com");
        code.name = "Code".to_string();
        let left = code.workspace.active_pane_id.clone();
        ops::split_pane(
            &mut code.workspace,
            &left,
            Direction::Right,
            "https://right.com",
            0.5,
            0.1,
        )
        .unwrap();
        let id = list.add(code);
        list.set_active(&id);

        list
    }

    #[test]
    fn test_round_trip_preserves_structure_and_scalars() {
        let original = sample_tabs();
        let state = snapshot_from_tab_list(&original, "session-1");
        assert_eq!(state.version, SCHEMA_VERSION);
        assert_eq!(state.active_tab_index, 1);

        let restored = tab_list_from_snapshot(&state);
        restored.check_invariants().unwrap();
        assert_eq!(restored.len(), 2);

        let first = restored.iter().next().unwrap();
        assert_eq!(first.name, "Search");
        assert!(first.is_pinned);
        assert_eq!(first.position, 0);
        let pane = first.workspace.active_pane().unwrap();
        assert_eq!(pane.uri, "https://google.com");
        assert_eq!(pane.title, "Google");
        assert_eq!(pane.zoom, 1.5);

        let second = restored.iter().nth(1).unwrap();
        assert_eq!(second.name, "Code");
        assert!(!second.is_pinned);
        let root = second.workspace.node(second.workspace.root_id()).unwrap();
        let NodeKind::Split {
            direction,
            ratio,
            children,
        } = &root.kind
        else {
            panic!("expected split root");
        };
        assert_eq!(*direction, SplitDirection::Horizontal);
        assert_eq!(*ratio, 0.5);
        let uris: Vec<_> = children
            .iter()
            .map(|c| second.workspace.pane(c).unwrap().uri.clone())
            .collect();
        assert_eq!(uris, vec!["https://left.com", "https://right.com"]);

        // Active tab selection survives.
        assert_eq!(
            restored.active_tab_id(),
            Some(&restored.iter().nth(1).unwrap().id)
        );
    }

    #[test]
    fn test_round_trip_regenerates_ids() {
        let original = sample_tabs();
        let state = snapshot_from_tab_list(&original, "session-1");
        let restored = tab_list_from_snapshot(&state);

        let old_ids: Vec<_> = original.iter().map(|t| t.id.clone()).collect();
        for tab in restored.iter() {
            assert!(!old_ids.contains(&tab.id));
        }
    }

    #[test]
    fn test_round_trip_stack_index() {
        let mut list = TabList::new();
        let mut tab = Tab::new("https://a.test");
        let p0 = tab.workspace.active_pane_id.clone();
        let stack = ops::create_stack(&mut tab.workspace, &p0, "https://b.test").unwrap();
        ops::add_to_stack(&mut tab.workspace, &stack.stack_node_id, "https://c.test").unwrap();
        ops::set_stack_active(&mut tab.workspace, &stack.stack_node_id, 1).unwrap();
        list.add(tab);

        let state = snapshot_from_tab_list(&list, "s");
        let restored = tab_list_from_snapshot(&state);
        let tab = restored.iter().next().unwrap();
        tab.workspace.check_invariants().unwrap();

        let root = tab.workspace.node(tab.workspace.root_id()).unwrap();
        let NodeKind::Stack {
            children,
            active_index,
        } = &root.kind
        else {
            panic!("expected stack root");
        };
        assert_eq!(children.len(), 3);
        assert_eq!(*active_index, 1);
        assert_eq!(tab.workspace.active_pane().unwrap().uri, "https://b.test");
    }

    #[test]
    fn test_save_and_load_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(crate::config::SESSION_FILE);

        let state = snapshot_from_tab_list(&sample_tabs(), "disk-session");
        state.save(&path).unwrap();

        let loaded = SessionState::load(&path).unwrap();
        assert_eq!(loaded.session_id, "disk-session");
        assert_eq!(loaded.tabs.len(), 2);
        assert_eq!(loaded.active_tab_index, 1);
        assert_eq!(loaded.saved_at, state.saved_at);
    }

    #[test]
    fn test_restore_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let tabs: SharedTabs = Arc::new(parking_lot::RwLock::new(TabList::new()));
        let main_loop = Arc::new(crate::testutil::FakeMainLoop::new());
        let coalescer = UiCoalescer::new(main_loop);
        let service = SessionService::new(dir.path().join("nope.json"), tabs, coalescer);
        assert!(service.restore().is_none());
    }
}
