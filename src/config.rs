//! Application constants and user-facing settings.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "dumber";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scheme for internal pages
pub const INTERNAL_SCHEME: &str = "dumb";

/// Internal home page
pub const HOME_URL: &str = "dumb://home";

/// Internal crash page (takes a `url` query parameter with the original URI)
pub const CRASH_URL: &str = "dumb://home/crash";

/// Internal configuration page
pub const CONFIG_URL: &str = "dumb://config";

/// Session snapshot filename
pub const SESSION_FILE: &str = "session.json";

/// Browsing database filename (history, zoom levels, permissions)
pub const BROWSING_DB: &str = "browsing.db";

/// Favicon cache directory name
pub const FAVICON_DIR: &str = "favicons";

/// Maximum total completion results to show
pub const COMPLETION_MAX_RESULTS: usize = 8;

/// Maximum history results in completion
pub const HISTORY_COMPLETION_LIMIT: usize = 5;

/// Edge length of the normalized favicon copy exported for external tooling
pub const FAVICON_EXPORT_SIZE: u32 = 32;

/// Minimum zoom factor
pub const ZOOM_MIN: f64 = 0.25;

/// Maximum zoom factor
pub const ZOOM_MAX: f64 = 5.0;

/// Zoom adjustment step
pub const ZOOM_STEP: f64 = 0.1;

/// Default zoom factor
pub const ZOOM_DEFAULT: f64 = 1.0;

/// Safety timer armed when an OAuth popup opens. Expiry only logs;
/// it never force-closes the popup.
pub const OAUTH_SAFETY_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between OAuth callback detection and closing the popup
pub const OAUTH_CLOSE_DELAY: Duration = Duration::from_millis(500);

/// Debounce for reloading the parent pane after an OAuth popup closes
pub const PARENT_REFRESH_DEBOUNCE: Duration = Duration::from_millis(200);

/// Hover focus stays suppressed for this long after keyboard navigation
pub const KEYBOARD_FOCUS_SUPPRESS_DURATION: Duration = Duration::from_millis(400);

/// Delay before pointer hover moves pane focus
pub const HOVER_FOCUS_DELAY: Duration = Duration::from_millis(150);

/// Settings file name inside the config directory
const CONFIG_FILE: &str = "config.toml";

/// Tab bar placement in the window layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabBarPosition {
    Top,
    Bottom,
}

/// Where a popup pane is placed relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopupBehavior {
    Split,
    Stacked,
    Tabbed,
}

/// Split direction used when popup behavior is `split`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopupPlacement {
    Left,
    Right,
    Top,
    Bottom,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub tab_bar_position: TabBarPosition,
    pub hide_tab_bar_when_single_tab: bool,
    pub new_pane_url: String,
    pub resize_mode: ResizeConfig,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            tab_bar_position: TabBarPosition::Top,
            hide_tab_bar_when_single_tab: true,
            new_pane_url: "about:blank".to_string(),
            resize_mode: ResizeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    /// Ratio change applied per resize step
    pub step_percent: f64,
    /// Smallest share of the split either side may hold
    pub min_pane_percent: f64,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            step_percent: 0.05,
            min_pane_percent: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PopupConfig {
    pub open_in_new_pane: bool,
    /// Placement for js-popups (named target frames)
    pub behavior: PopupBehavior,
    /// Placement for `_blank` targets
    pub blank_target_behavior: PopupBehavior,
    pub placement: PopupPlacement,
    pub oauth_auto_close: bool,
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            open_in_new_pane: true,
            behavior: PopupBehavior::Split,
            blank_target_behavior: PopupBehavior::Tabbed,
            placement: PopupPlacement::Right,
            oauth_auto_close: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub enable_on_startup: bool,
    pub auto_download: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enable_on_startup: false,
            auto_download: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search template with `%s` as the query placeholder
    pub default_template: String,
    /// Bang shortcut table: key -> template with `%s` placeholder
    pub shortcuts: HashMap<String, String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_template: "https://duckduckgo.com/?q=%s".to_string(),
            shortcuts: HashMap::new(),
        }
    }
}

/// All recognized settings, each section independently defaulted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workspace: WorkspaceConfig,
    pub popup: PopupConfig,
    pub update: UpdateConfig,
    pub search: SearchConfig,
}

impl Config {
    /// Load settings from the XDG config directory, falling back to
    /// defaults when the file is missing or malformed.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Malformed config at {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    fn config_path() -> Option<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", APP_NAME)?;
        Some(dirs.config_dir().join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.workspace.new_pane_url, "about:blank");
        assert!(config.workspace.hide_tab_bar_when_single_tab);
        assert_eq!(config.workspace.resize_mode.min_pane_percent, 0.1);
        assert_eq!(config.popup.behavior, PopupBehavior::Split);
        assert!(config.popup.oauth_auto_close);
        assert!(!config.update.enable_on_startup);
    }

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [workspace]
            new_pane_url = "dumb://home"
            tab_bar_position = "bottom"

            [popup]
            behavior = "stacked"
            placement = "left"

            [search.shortcuts]
            g = "https://www.google.com/search?q=%s"
            "#,
        )
        .unwrap();

        assert_eq!(config.workspace.new_pane_url, "dumb://home");
        assert_eq!(config.workspace.tab_bar_position, TabBarPosition::Bottom);
        // Untouched sections keep defaults
        assert!(config.workspace.hide_tab_bar_when_single_tab);
        assert_eq!(config.popup.behavior, PopupBehavior::Stacked);
        assert_eq!(config.popup.placement, PopupPlacement::Left);
        assert_eq!(
            config.search.shortcuts.get("g").unwrap(),
            "https://www.google.com/search?q=%s"
        );
    }
}
