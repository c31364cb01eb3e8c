//! Recently closed tabs tracking.
//!
//! Closing a tab captures its workspace snapshot so the whole pane tree
//! comes back on reopen, not just a URL.

use std::collections::VecDeque;
use std::time::SystemTime;

use crate::session::WorkspaceSnapshot;
use crate::tabs::Tab;

/// Maximum number of recently closed tabs to remember.
pub const MAX_CLOSED_TABS: usize = 25;

/// A tab that was closed and can be reopened.
#[derive(Clone, Debug)]
pub struct ClosedTab {
    pub name: String,
    pub is_pinned: bool,
    pub workspace: WorkspaceSnapshot,
    pub closed_at: SystemTime,
}

impl ClosedTab {
    pub fn capture(tab: &Tab) -> Self {
        Self {
            name: tab.name.clone(),
            is_pinned: tab.is_pinned,
            workspace: crate::session::snapshot_workspace(&tab.workspace),
            closed_at: SystemTime::now(),
        }
    }

    /// Rebuild a live tab from the captured snapshot; identifiers are
    /// fresh.
    pub fn into_tab(self) -> Tab {
        let mut tab = Tab::new("about:blank");
        tab.name = self.name;
        tab.is_pinned = self.is_pinned;
        tab.workspace = crate::session::restore_workspace(&self.workspace);
        tab
    }
}

/// Bounded most-recent-first list of closed tabs.
#[derive(Default)]
pub struct RecentlyClosedTabs {
    tabs: VecDeque<ClosedTab>,
}

impl RecentlyClosedTabs {
    pub fn new() -> Self {
        Self {
            tabs: VecDeque::new(),
        }
    }

    /// Record a closed tab. Oldest tabs are removed when limit is reached.
    pub fn push(&mut self, tab: ClosedTab) {
        self.tabs.push_front(tab);
        while self.tabs.len() > MAX_CLOSED_TABS {
            self.tabs.pop_back();
        }
    }

    /// Get and remove the most recently closed tab.
    pub fn pop(&mut self) -> Option<ClosedTab> {
        self.tabs.pop_front()
    }

    /// Get all recently closed tabs (most recent first).
    pub fn list(&self) -> impl Iterator<Item = &ClosedTab> {
        self.tabs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::ops;
    use crate::workspace::Direction;

    #[test]
    fn test_capture_and_reopen_preserves_tree() {
        let mut tab = Tab::new("https://a.test");
        tab.name = "Work".to_string();
        let p0 = tab.workspace.active_pane_id.clone();
        ops::split_pane(&mut tab.workspace, &p0, Direction::Right, "https://b.test", 0.5, 0.1)
            .unwrap();

        let mut closed = RecentlyClosedTabs::new();
        closed.push(ClosedTab::capture(&tab));

        let reopened = closed.pop().unwrap().into_tab();
        assert_eq!(reopened.name, "Work");
        assert_eq!(reopened.workspace.pane_count(), 2);
        reopened.workspace.check_invariants().unwrap();
        assert_ne!(reopened.id, tab.id);
    }

    #[test]
    fn test_bounded_to_limit() {
        let mut closed = RecentlyClosedTabs::new();
        for n in 0..(MAX_CLOSED_TABS + 5) {
            let mut tab = Tab::new(format!("https://{}.test", n));
            tab.name = n.to_string();
            closed.push(ClosedTab::capture(&tab));
        }
        assert_eq!(closed.list().count(), MAX_CLOSED_TABS);
        // Most recent first.
        assert_eq!(closed.pop().unwrap().name, (MAX_CLOSED_TABS + 4).to_string());
    }
}
