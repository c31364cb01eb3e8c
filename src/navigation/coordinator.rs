//! Navigation coordinator: URL loads, history recording and per-domain
//! zoom, layered over the active WebView.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::content::ContentCoordinator;
use crate::error::{CoordError, Result};
use crate::favicon::FaviconService;
use crate::history::{HistoryStore, ZoomStore};
use crate::mainloop::TaskRunner;
use crate::navigation::{normalize_url, normalized_domain, step_zoom};
use crate::workspace::PaneId;

type PrefetchHook = Arc<dyn Fn(&str) + Send + Sync>;

pub struct NavigationCoordinator {
    content: Arc<ContentCoordinator>,
    favicons: Arc<FaviconService>,
    runner: Arc<dyn TaskRunner>,
    config: Config,
    history: Mutex<Option<Arc<dyn HistoryStore>>>,
    zoom: Mutex<Option<Arc<dyn ZoomStore>>>,
    dns_prefetch: Mutex<Option<PrefetchHook>>,
    /// Last URL recorded per pane; consecutive duplicates collapse.
    last_recorded: Mutex<HashMap<PaneId, String>>,
}

impl NavigationCoordinator {
    pub fn new(
        content: Arc<ContentCoordinator>,
        favicons: Arc<FaviconService>,
        runner: Arc<dyn TaskRunner>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            content,
            favicons,
            runner,
            config,
            history: Mutex::new(None),
            zoom: Mutex::new(None),
            dns_prefetch: Mutex::new(None),
            last_recorded: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_history_store(&self, store: Arc<dyn HistoryStore>) {
        *self.history.lock() = Some(store);
    }

    pub fn set_zoom_store(&self, store: Arc<dyn ZoomStore>) {
        *self.zoom.lock() = Some(store);
    }

    pub fn set_dns_prefetch<F: Fn(&str) + Send + Sync + 'static>(&self, hook: F) {
        *self.dns_prefetch.lock() = Some(Arc::new(hook));
    }

    /// Load omnibox input in the active pane: normalize (bang shortcuts
    /// included), remember the navigation origin for favicon attribution,
    /// warm caches off the UI thread, record history and apply the
    /// domain's stored zoom.
    pub fn navigate(&self, input: &str) -> Result<()> {
        let pane_id = self
            .content
            .active_pane_id()
            .ok_or_else(|| CoordError::ResourceMissing("no active pane".to_string()))?;
        self.navigate_pane(&pane_id, input)
    }

    pub fn navigate_pane(&self, pane_id: &str, input: &str) -> Result<()> {
        let webview = self
            .content
            .webview_for(pane_id)
            .ok_or_else(|| CoordError::ResourceMissing(format!("no WebView for {}", pane_id)))?;

        let url = normalize_url(input, &self.config.search);
        self.content.record_nav_origin(pane_id, &url);

        if let Some(domain) = normalized_domain(&url) {
            // Favicon warms its memory tier off the UI thread.
            self.favicons.preload(&domain);

            let prefetch = self.dns_prefetch.lock().clone();
            if let Some(prefetch) = prefetch {
                let host = domain.clone();
                self.runner.spawn(Box::new(move || prefetch(&host)));
            }
        }

        self.record_history(pane_id, &url);
        // The intended URI gates reveal suppression for the cold-start
        // about:blank commit.
        self.content.update_pane_uri(pane_id, &url);

        log::info!("Navigating pane {} to {}", pane_id, url);
        webview.load_uri(&url);

        self.apply_domain_zoom(pane_id, &url);
        Ok(())
    }

    fn apply_domain_zoom(&self, pane_id: &str, url: &str) {
        let Some(webview) = self.content.webview_for(pane_id) else {
            return;
        };
        let zoom = normalized_domain(url)
            .and_then(|domain| self.zoom.lock().clone().and_then(|s| s.zoom_for(&domain)))
            .unwrap_or(crate::config::ZOOM_DEFAULT);
        webview.set_zoom_level(zoom);
    }

    /// Record a committed navigation, collapsing consecutive repeats of
    /// the same URL per pane.
    pub fn record_history(&self, pane_id: &str, url: &str) {
        if url.is_empty() || url.starts_with("about:") {
            return;
        }
        {
            let mut last = self.last_recorded.lock();
            if last.get(pane_id).map(String::as_str) == Some(url) {
                return;
            }
            last.insert(pane_id.to_string(), url.to_string());
        }
        let history = self.history.lock().clone();
        if let Some(history) = history {
            history.record_visit(url, None);
        }
    }

    /// Title update for a URL already in history; last writer wins.
    pub fn update_history_title(&self, url: &str, title: &str) {
        if url.is_empty() || title.is_empty() {
            return;
        }
        let history = self.history.lock().clone();
        if let Some(history) = history {
            history.update_title(url, title);
        }
    }

    pub fn reload(&self) {
        if let Some(webview) = self.content.active_web_view() {
            webview.reload();
        }
    }

    pub fn hard_reload(&self) {
        if let Some(webview) = self.content.active_web_view() {
            webview.reload_bypass_cache();
        }
    }

    pub fn go_back(&self) {
        if let Some(webview) = self.content.active_web_view() {
            if webview.can_go_back() {
                webview.go_back();
            }
        }
    }

    pub fn go_forward(&self) {
        if let Some(webview) = self.content.active_web_view() {
            if webview.can_go_forward() {
                webview.go_forward();
            }
        }
    }

    pub fn stop(&self) {
        if let Some(webview) = self.content.active_web_view() {
            webview.stop();
        }
    }

    pub fn open_devtools(&self) {
        if let Some(webview) = self.content.active_web_view() {
            webview.open_devtools();
        }
    }

    pub fn print_page(&self) {
        if let Some(webview) = self.content.active_web_view() {
            webview.print_page();
        }
    }

    /// Step the active pane's zoom and persist it for the domain.
    pub fn zoom_by(&self, steps: i32) -> Option<f64> {
        let webview = self.content.active_web_view()?;
        let zoom = step_zoom(webview.zoom_level(), steps);
        self.set_zoom(zoom)
    }

    pub fn zoom_in(&self) -> Option<f64> {
        self.zoom_by(1)
    }

    pub fn zoom_out(&self) -> Option<f64> {
        self.zoom_by(-1)
    }

    pub fn zoom_reset(&self) -> Option<f64> {
        self.set_zoom(crate::config::ZOOM_DEFAULT)
    }

    fn set_zoom(&self, zoom: f64) -> Option<f64> {
        let pane_id = self.content.active_pane_id()?;
        let webview = self.content.webview_for(&pane_id)?;
        webview.set_zoom_level(zoom);

        if let Some(domain) = normalized_domain(&webview.uri()) {
            let store = self.zoom.lock().clone();
            if let Some(store) = store {
                store.set_zoom(&domain, zoom);
            }
        }
        Some(zoom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WebView;
    use crate::testutil::{test_content_fixture, MemoryHistory, MemoryZoom, InlineRunner};

    fn fixture() -> (crate::testutil::ContentFixture, Arc<NavigationCoordinator>) {
        let fixture = test_content_fixture();
        let nav = NavigationCoordinator::new(
            fixture.content.clone(),
            fixture.favicons.clone(),
            Arc::new(InlineRunner),
            Config::default(),
        );
        (fixture, nav)
    }

    #[test]
    fn test_navigate_normalizes_and_loads() {
        let (fixture, nav) = fixture();
        let pane = fixture.active_pane();
        fixture.content.ensure_web_view(&pane).unwrap();

        nav.navigate("example.com").unwrap();

        let webview = fixture.webview(&pane);
        assert_eq!(webview.last_loaded(), Some("https://example.com".to_string()));
        assert_eq!(
            fixture.content.nav_origin(&pane).as_deref(),
            Some("https://example.com")
        );
    }

    #[test]
    fn test_navigate_applies_stored_zoom() {
        let (fixture, nav) = fixture();
        let pane = fixture.active_pane();
        fixture.content.ensure_web_view(&pane).unwrap();

        let zoom = Arc::new(MemoryZoom::default());
        ZoomStore::set_zoom(zoom.as_ref(), "example.com", 1.5);
        nav.set_zoom_store(zoom);

        nav.navigate("https://example.com/page").unwrap();
        assert_eq!(fixture.webview(&pane).zoom_level(), 1.5);
    }

    #[test]
    fn test_history_dedups_consecutive_urls_per_pane() {
        let (fixture, nav) = fixture();
        let pane = fixture.active_pane();
        fixture.content.ensure_web_view(&pane).unwrap();

        let history = Arc::new(MemoryHistory::default());
        nav.set_history_store(history.clone());

        nav.record_history(&pane, "https://a.test/");
        nav.record_history(&pane, "https://a.test/");
        nav.record_history(&pane, "https://b.test/");
        nav.record_history(&pane, "https://a.test/");
        nav.record_history("other-pane", "https://a.test/");

        let visits = history.visits();
        assert_eq!(
            visits,
            vec![
                "https://a.test/".to_string(),
                "https://b.test/".to_string(),
                "https://a.test/".to_string(),
                "https://a.test/".to_string(),
            ]
        );
    }

    #[test]
    fn test_internal_pages_not_recorded() {
        let (_fixture, nav) = fixture();
        let history = Arc::new(MemoryHistory::default());
        nav.set_history_store(history.clone());

        nav.record_history("p", "about:blank");
        nav.record_history("p", "");
        assert!(history.visits().is_empty());
    }

    #[test]
    fn test_zoom_step_persists_per_domain() {
        let (fixture, nav) = fixture();
        let pane = fixture.active_pane();
        fixture.content.ensure_web_view(&pane).unwrap();
        let webview = fixture.webview(&pane);
        webview.set_state_uri("https://example.com/page");

        let zoom = Arc::new(MemoryZoom::default());
        nav.set_zoom_store(zoom.clone());

        assert_eq!(nav.zoom_in(), Some(1.1));
        assert!((webview.zoom_level() - 1.1).abs() < 1e-9);
        assert_eq!(zoom.stored("example.com"), Some(1.1));

        assert_eq!(nav.zoom_reset(), Some(1.0));
        assert_eq!(zoom.stored("example.com"), Some(1.0));
    }
}
