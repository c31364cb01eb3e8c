//! Tab coordinator: thin policy layer between the tab list and the tab
//! bar surface.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::Config;
use crate::navigation::normalize_url;
use crate::recently_closed::{ClosedTab, RecentlyClosedTabs};
use crate::tabs::{SharedTabs, Tab, TabId};
use crate::widget::{TabBarView, TabSummary};

type Cb<T> = Mutex<Option<Arc<T>>>;

#[derive(Default)]
struct Callbacks {
    /// A tab exists in the list; the app attaches its workspace view and
    /// WebViews here.
    tab_created: Cb<dyn Fn(&str) + Send + Sync>,
    /// Active tab changed (creation, switch, close fallback).
    tab_switched: Cb<dyn Fn(&str) + Send + Sync>,
    /// Last tab closed.
    quit: Cb<dyn Fn() + Send + Sync>,
}

pub struct TabCoordinator {
    tabs: SharedTabs,
    config: Config,
    tab_bar: Mutex<Option<Arc<dyn TabBarView>>>,
    closed: Mutex<RecentlyClosedTabs>,
    callbacks: Callbacks,
}

impl TabCoordinator {
    pub fn new(tabs: SharedTabs, config: Config) -> Arc<Self> {
        Arc::new(Self {
            tabs,
            config,
            tab_bar: Mutex::new(None),
            closed: Mutex::new(RecentlyClosedTabs::new()),
            callbacks: Callbacks::default(),
        })
    }

    pub fn set_tab_bar(&self, bar: Arc<dyn TabBarView>) {
        *self.tab_bar.lock() = Some(bar);
        self.update_tab_bar();
    }

    pub fn set_on_tab_created<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.tab_created.lock() = Some(Arc::new(f));
    }

    pub fn set_on_tab_switched<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.tab_switched.lock() = Some(Arc::new(f));
    }

    pub fn set_on_quit<F: Fn() + Send + Sync + 'static>(&self, f: F) {
        *self.callbacks.quit.lock() = Some(Arc::new(f));
    }

    /// Create a tab whose single pane starts at the normalized URL, make
    /// it active and let the app attach its surfaces.
    pub fn create(&self, initial_url: &str) -> TabId {
        let url = normalize_url(initial_url, &self.config.search);
        let tab = Tab::new(url);
        let id = self.tabs.write().add(tab);
        log::info!("Created tab {}", id);

        self.update_tab_bar();
        let cb = self.callbacks.tab_created.lock().clone();
        if let Some(cb) = cb {
            cb(&id);
        }
        self.fire_switched(&id);
        id
    }

    /// Adopt an already-built tab (session restore). Fires the same
    /// creation callback so surfaces attach.
    pub fn adopt(&self, tab: Tab) -> TabId {
        let id = self.tabs.write().add(tab);
        self.update_tab_bar();
        let cb = self.callbacks.tab_created.lock().clone();
        if let Some(cb) = cb {
            cb(&id);
        }
        self.fire_switched(&id);
        id
    }

    pub fn close_active(&self) -> Option<Tab> {
        let id = self.tabs.read().active_tab_id()?.clone();
        self.close(&id)
    }

    pub fn close(&self, tab_id: &str) -> Option<Tab> {
        let (removed, now_active, empty) = {
            let mut tabs = self.tabs.write();
            let removed = tabs.close(tab_id);
            (
                removed,
                tabs.active_tab_id().cloned(),
                tabs.is_empty(),
            )
        };
        if let Some(removed) = &removed {
            self.closed.lock().push(ClosedTab::capture(removed));
            log::info!("Closed tab {}", tab_id);
        }

        self.update_tab_bar();
        if empty {
            let cb = self.callbacks.quit.lock().clone();
            if let Some(cb) = cb {
                cb();
            }
        } else if let Some(active) = now_active {
            self.fire_switched(&active);
        }
        removed
    }

    pub fn switch_to(&self, tab_id: &str) -> bool {
        let switched = self.tabs.write().set_active(tab_id);
        if switched {
            self.update_tab_bar();
            self.fire_switched(tab_id);
        }
        switched
    }

    pub fn switch_next(&self) -> Option<TabId> {
        let next = self.tabs.write().switch_next();
        if let Some(next) = &next {
            self.update_tab_bar();
            self.fire_switched(next);
        }
        next
    }

    pub fn switch_previous(&self) -> Option<TabId> {
        let previous = self.tabs.write().switch_previous();
        if let Some(previous) = &previous {
            self.update_tab_bar();
            self.fire_switched(previous);
        }
        previous
    }

    /// Alt-tab between the two most recent tabs.
    pub fn switch_to_previous(&self) -> Option<TabId> {
        let target = self.tabs.write().switch_to_previous();
        if let Some(target) = &target {
            self.update_tab_bar();
            self.fire_switched(target);
        }
        target
    }

    /// Bring back the most recently closed tab with its whole pane tree.
    pub fn reopen_closed(&self) -> Option<TabId> {
        let closed = self.closed.lock().pop()?;
        Some(self.adopt(closed.into_tab()))
    }

    pub fn has_closed_tabs(&self) -> bool {
        !self.closed.lock().is_empty()
    }

    fn fire_switched(&self, tab_id: &str) {
        let cb = self.callbacks.tab_switched.lock().clone();
        if let Some(cb) = cb {
            cb(tab_id);
        }
    }

    /// Push the current list into the tab bar and apply single-tab
    /// visibility policy.
    pub fn update_tab_bar(&self) {
        let bar = self.tab_bar.lock().clone();
        let Some(bar) = bar else {
            return;
        };
        let (summaries, active, count) = {
            let tabs = self.tabs.read();
            let summaries: Vec<TabSummary> = tabs
                .iter()
                .map(|tab| TabSummary {
                    id: tab.id.clone(),
                    title: tab.display_title(),
                    is_pinned: tab.is_pinned,
                })
                .collect();
            (summaries, tabs.active_tab_id().cloned(), tabs.len())
        };
        bar.refresh(&summaries, active.as_deref());
        let visible = !(self.config.workspace.hide_tab_bar_when_single_tab && count <= 1);
        bar.set_visible(visible);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabs::TabList;
    use crate::testutil::FakeTabBar;
    use parking_lot::RwLock;

    fn coordinator() -> (Arc<TabCoordinator>, Arc<FakeTabBar>, SharedTabs) {
        let tabs: SharedTabs = Arc::new(RwLock::new(TabList::new()));
        let coordinator = TabCoordinator::new(tabs.clone(), Config::default());
        let bar = Arc::new(FakeTabBar::default());
        coordinator.set_tab_bar(bar.clone());
        (coordinator, bar, tabs)
    }

    #[test]
    fn test_create_normalizes_and_activates() {
        let (coordinator, bar, tabs) = coordinator();
        let created = Arc::new(Mutex::new(Vec::new()));
        let seen = created.clone();
        coordinator.set_on_tab_created(move |id| seen.lock().push(id.to_string()));

        let id = coordinator.create("example.com");

        assert_eq!(*created.lock(), vec![id.clone()]);
        let tabs = tabs.read();
        assert_eq!(tabs.active_tab_id(), Some(&id));
        assert_eq!(
            tabs.active_tab().unwrap().workspace.active_pane().unwrap().uri,
            "https://example.com"
        );
        drop(tabs);
        assert!(bar.last_active().as_deref() == Some(id.as_str()));
        let summaries = bar.last_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].title, "https://example.com");
    }

    #[test]
    fn test_tab_bar_hidden_for_single_tab() {
        let (coordinator, bar, _tabs) = coordinator();
        coordinator.create("https://a.test");
        assert_eq!(bar.visible(), Some(false));

        coordinator.create("https://b.test");
        assert_eq!(bar.visible(), Some(true));

        coordinator.close_active();
        assert_eq!(bar.visible(), Some(false));
    }

    #[test]
    fn test_close_last_tab_fires_quit() {
        let (coordinator, _bar, _tabs) = coordinator();
        let quit = Arc::new(Mutex::new(false));
        let seen = quit.clone();
        coordinator.set_on_quit(move || *seen.lock() = true);

        coordinator.create("https://a.test");
        coordinator.close_active();
        assert!(*quit.lock());
    }

    #[test]
    fn test_reopen_closed_tab() {
        let (coordinator, _bar, tabs) = coordinator();
        coordinator.create("https://keep.test");
        let closing = coordinator.create("https://gone.test");
        coordinator.close(&closing);
        assert!(coordinator.has_closed_tabs());

        let reopened = coordinator.reopen_closed().unwrap();
        let tabs = tabs.read();
        assert_eq!(tabs.len(), 2);
        let tab = tabs.get(&reopened).unwrap();
        assert_eq!(
            tab.workspace.active_pane().unwrap().uri,
            "https://gone.test"
        );
        assert!(!coordinator.has_closed_tabs());
    }

    #[test]
    fn test_switch_round_robin_and_alt_tab() {
        let (coordinator, _bar, tabs) = coordinator();
        let a = coordinator.create("https://a.test");
        let b = coordinator.create("https://b.test");
        let c = coordinator.create("https://c.test");

        assert_eq!(coordinator.switch_next(), Some(a.clone()));
        assert_eq!(coordinator.switch_previous(), Some(c.clone()));
        assert_eq!(coordinator.switch_to_previous(), Some(a.clone()));
        let _ = b;
        tabs.read().check_invariants().unwrap();
    }
}
