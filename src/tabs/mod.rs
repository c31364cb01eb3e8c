//! Tab list domain model and the tab-level use cases.

use std::time::SystemTime;

use crate::workspace::{new_id, Workspace};

pub mod coordinator;

pub type TabId = String;

/// The tab list shared across coordinators. Stores lock internally;
/// nobody holds this across an external callback.
pub type SharedTabs = std::sync::Arc<parking_lot::RwLock<TabList>>;

/// One browser tab owning a workspace tree.
#[derive(Debug, Clone)]
pub struct Tab {
    pub id: TabId,
    /// Explicit user-given name; empty means derive from content.
    pub name: String,
    pub workspace: Workspace,
    /// Index in the owning tab list; kept dense by [`TabList`].
    pub position: usize,
    pub is_pinned: bool,
    pub created_at: SystemTime,
}

impl Tab {
    pub fn new(initial_uri: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: String::new(),
            workspace: Workspace::new(initial_uri),
            position: 0,
            is_pinned: false,
            created_at: SystemTime::now(),
        }
    }

    /// Display title: explicit name, else active pane title, else active
    /// pane URI, else "New Tab".
    pub fn display_title(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        if let Some(pane) = self.workspace.active_pane() {
            if !pane.title.is_empty() {
                return pane.title.clone();
            }
            if !pane.uri.is_empty() {
                return pane.uri.clone();
            }
        }
        "New Tab".to_string()
    }
}

/// Ordered tabs plus active/previous-active arbitration for alt-tab.
#[derive(Debug, Default, Clone)]
pub struct TabList {
    tabs: Vec<Tab>,
    active_tab_id: Option<TabId>,
    previous_active_tab_id: Option<TabId>,
}

impl TabList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tab> {
        self.tabs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Tab> {
        self.tabs.iter_mut()
    }

    pub fn active_tab_id(&self) -> Option<&TabId> {
        self.active_tab_id.as_ref()
    }

    pub fn previous_active_tab_id(&self) -> Option<&TabId> {
        self.previous_active_tab_id.as_ref()
    }

    pub fn get(&self, id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| t.id == id)
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.active_tab_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn active_tab_mut(&mut self) -> Option<&mut Tab> {
        let id = self.active_tab_id.clone()?;
        self.get_mut(&id)
    }

    /// Append a tab and make it active.
    pub fn add(&mut self, mut tab: Tab) -> TabId {
        tab.position = self.tabs.len();
        let id = tab.id.clone();
        self.tabs.push(tab);
        self.set_active(&id);
        id
    }

    /// Switch the active tab, keeping the alt-tab backlink in sync. The
    /// backlink only moves when the active tab actually changes.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        if self.active_tab_id.as_deref() == Some(id) {
            return true;
        }
        self.previous_active_tab_id = self.active_tab_id.take();
        self.active_tab_id = Some(id.to_string());
        true
    }

    /// Remove a tab. When the active tab closes, the previously active
    /// tab wins; otherwise the nearest neighbour by position takes over.
    pub fn close(&mut self, id: &str) -> Option<Tab> {
        let index = self.tabs.iter().position(|t| t.id == id)?;
        let removed = self.tabs.remove(index);
        self.reindex();

        if self.previous_active_tab_id.as_deref() == Some(id) {
            self.previous_active_tab_id = None;
        }

        if self.active_tab_id.as_deref() == Some(id) {
            self.active_tab_id = None;
            let fallback = self
                .previous_active_tab_id
                .take()
                .filter(|prev| self.get(prev).is_some())
                .or_else(|| {
                    self.tabs
                        .get(index.min(self.tabs.len().saturating_sub(1)))
                        .map(|t| t.id.clone())
                });
            if let Some(next) = fallback {
                if !self.tabs.is_empty() {
                    self.active_tab_id = Some(next);
                }
            }
        }
        Some(removed)
    }

    /// Rotate to the next tab by position, wrapping.
    pub fn switch_next(&mut self) -> Option<TabId> {
        self.switch_by_offset(1)
    }

    /// Rotate to the previous tab by position, wrapping.
    pub fn switch_previous(&mut self) -> Option<TabId> {
        self.switch_by_offset(-1)
    }

    fn switch_by_offset(&mut self, offset: isize) -> Option<TabId> {
        if self.tabs.len() < 2 {
            return None;
        }
        let active = self.active_tab_id.as_deref()?;
        let index = self.tabs.iter().position(|t| t.id == active)?;
        let len = self.tabs.len() as isize;
        let next = (index as isize + offset).rem_euclid(len) as usize;
        let next_id = self.tabs[next].id.clone();
        self.set_active(&next_id);
        Some(next_id)
    }

    /// Alt-tab: jump back to the previously active tab.
    pub fn switch_to_previous(&mut self) -> Option<TabId> {
        let target = self.previous_active_tab_id.clone()?;
        if self.set_active(&target) {
            Some(target)
        } else {
            self.previous_active_tab_id = None;
            None
        }
    }

    fn reindex(&mut self) {
        for (index, tab) in self.tabs.iter_mut().enumerate() {
            tab.position = index;
        }
    }

    /// Structural consistency used by tests: dense positions, active iff
    /// non-empty, backlink never equals active.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (index, tab) in self.tabs.iter().enumerate() {
            if tab.position != index {
                return Err(format!(
                    "tab {} position {} != index {}",
                    tab.id, tab.position, index
                ));
            }
        }
        match (&self.active_tab_id, self.tabs.is_empty()) {
            (None, false) => return Err("non-empty list without active tab".to_string()),
            (Some(id), false) if self.get(id).is_none() => {
                return Err(format!("active tab {} missing", id))
            }
            (Some(_), true) => return Err("empty list with active tab".to_string()),
            _ => {}
        }
        if self.previous_active_tab_id.is_some()
            && self.previous_active_tab_id == self.active_tab_id
        {
            return Err("previous active equals active".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(n: usize) -> TabList {
        let mut list = TabList::new();
        for i in 0..n {
            list.add(Tab::new(format!("https://tab{}.test", i)));
        }
        list
    }

    #[test]
    fn test_add_sets_positions_and_active() {
        let list = list_of(3);
        list.check_invariants().unwrap();
        assert_eq!(list.len(), 3);
        let ids: Vec<_> = list.iter().map(|t| t.id.clone()).collect();
        assert_eq!(list.active_tab_id(), Some(&ids[2]));
        assert_eq!(list.previous_active_tab_id(), Some(&ids[1]));
    }

    #[test]
    fn test_close_active_restores_previous() {
        let mut list = list_of(3);
        let ids: Vec<_> = list.iter().map(|t| t.id.clone()).collect();

        list.close(&ids[2]);
        list.check_invariants().unwrap();
        assert_eq!(list.active_tab_id(), Some(&ids[1]));
    }

    #[test]
    fn test_close_inactive_keeps_active() {
        let mut list = list_of(3);
        let ids: Vec<_> = list.iter().map(|t| t.id.clone()).collect();

        list.close(&ids[0]);
        list.check_invariants().unwrap();
        assert_eq!(list.active_tab_id(), Some(&ids[2]));
        assert_eq!(list.get(&ids[1]).unwrap().position, 0);
    }

    #[test]
    fn test_close_last_tab_empties_active() {
        let mut list = list_of(1);
        let id = list.active_tab_id().unwrap().clone();
        list.close(&id);
        list.check_invariants().unwrap();
        assert!(list.is_empty());
        assert_eq!(list.active_tab_id(), None);
    }

    #[test]
    fn test_switch_next_wraps() {
        let mut list = list_of(3);
        let ids: Vec<_> = list.iter().map(|t| t.id.clone()).collect();
        list.set_active(&ids[2]);

        assert_eq!(list.switch_next(), Some(ids[0].clone()));
        assert_eq!(list.switch_previous(), Some(ids[2].clone()));
    }

    #[test]
    fn test_alt_tab_round_trip() {
        let mut list = list_of(3);
        let ids: Vec<_> = list.iter().map(|t| t.id.clone()).collect();

        list.set_active(&ids[0]);
        list.set_active(&ids[2]);
        assert_eq!(list.switch_to_previous(), Some(ids[0].clone()));
        assert_eq!(list.switch_to_previous(), Some(ids[2].clone()));
        list.check_invariants().unwrap();
    }

    #[test]
    fn test_set_active_same_tab_keeps_backlink() {
        let mut list = list_of(2);
        let ids: Vec<_> = list.iter().map(|t| t.id.clone()).collect();
        assert_eq!(list.previous_active_tab_id(), Some(&ids[0]));
        list.set_active(&ids[1]);
        assert_eq!(list.previous_active_tab_id(), Some(&ids[0]));
    }

    #[test]
    fn test_display_title_fallbacks() {
        let mut tab = Tab::new("https://a.test");
        assert_eq!(tab.display_title(), "https://a.test");

        let active = tab.workspace.active_pane_id.clone();
        tab.workspace.pane_mut(&active).unwrap().title = "A Page".to_string();
        assert_eq!(tab.display_title(), "A Page");

        tab.name = "Pinned Work".to_string();
        assert_eq!(tab.display_title(), "Pinned Work");

        let blank = Tab::new("");
        assert_eq!(blank.display_title(), "New Tab");
    }
}
