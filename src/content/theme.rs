//! Page appearance: background colour policy, the theme script injected
//! into internal pages, and the about:blank suppression predicate.

use crate::config;

/// What to paint behind a page while it loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageBackground {
    /// Internal pages match the application theme.
    Themed,
    /// `about:` pages keep the engine default.
    Default,
    /// Regular web content gets white to match most sites.
    White,
}

/// Pick the load background for a URI.
pub fn background_for(uri: &str) -> PageBackground {
    if uri.starts_with(&format!("{}://", config::INTERNAL_SCHEME)) {
        PageBackground::Themed
    } else if uri.starts_with("about:") {
        PageBackground::Default
    } else {
        PageBackground::White
    }
}

/// Suppress reveal/appearance work iff the current URI is `about:blank`
/// while the pane intends to show something else; prevents the cold-start
/// flash before the real navigation commits.
pub fn should_suppress_blank(current_uri: &str, intended_uri: &str) -> bool {
    current_uri == "about:blank" && !intended_uri.is_empty() && intended_uri != "about:blank"
}

/// Only internal pages receive theme scripts at runtime.
pub fn wants_theme_script(uri: &str) -> bool {
    uri.starts_with(&format!("{}://", config::INTERNAL_SCHEME))
}

/// Requested appearance for internal pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeSpec {
    pub dark: bool,
    /// CSS custom property declarations, without selector braces.
    pub vars_css: String,
}

/// Build the script that applies a theme in-page: sets the global flag,
/// swaps the `html.dark`/`html.light` class, inserts or updates the
/// `<style data-dumber-theme-vars>` element, keeps
/// `<meta name="color-scheme">` consistent and dispatches
/// `dumber:theme-changed`.
pub fn theme_script(spec: &ThemeSpec) -> String {
    let mode = if spec.dark { "dark" } else { "light" };
    format!(
        r#"(function() {{
  window.__dumber_theme = '{mode}';
  var html = document.documentElement;
  html.classList.remove('dark', 'light');
  html.classList.add('{mode}');
  var style = document.querySelector('style[data-dumber-theme-vars]');
  if (!style) {{
    style = document.createElement('style');
    style.setAttribute('data-dumber-theme-vars', '');
    document.head.appendChild(style);
  }}
  style.textContent = ':root {{ {vars} }}';
  var meta = document.querySelector('meta[name="color-scheme"]');
  if (!meta) {{
    meta = document.createElement('meta');
    meta.setAttribute('name', 'color-scheme');
    document.head.appendChild(meta);
  }}
  meta.setAttribute('content', '{mode}');
  document.dispatchEvent(new CustomEvent('dumber:theme-changed', {{ detail: {{ theme: '{mode}' }} }}));
}})();"#,
        mode = mode,
        vars = spec.vars_css.replace('\'', "\\'"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_policy() {
        assert_eq!(background_for("dumb://home"), PageBackground::Themed);
        assert_eq!(background_for("dumb://config"), PageBackground::Themed);
        assert_eq!(background_for("about:blank"), PageBackground::Default);
        assert_eq!(background_for("https://example.com"), PageBackground::White);
    }

    #[test]
    fn test_suppress_blank_predicate() {
        assert!(should_suppress_blank("about:blank", "https://example.com"));
        assert!(!should_suppress_blank("about:blank", "about:blank"));
        assert!(!should_suppress_blank("about:blank", ""));
        assert!(!should_suppress_blank("https://example.com", "https://other.com"));
    }

    #[test]
    fn test_theme_script_contents() {
        let script = theme_script(&ThemeSpec {
            dark: true,
            vars_css: "--bg: #000;".to_string(),
        });
        assert!(script.contains("window.__dumber_theme = 'dark'"));
        assert!(script.contains("classList.add('dark')"));
        assert!(script.contains("data-dumber-theme-vars"));
        assert!(script.contains("dumber:theme-changed"));
        assert!(script.contains("color-scheme"));
        assert!(script.contains("--bg: #000;"));
    }

    #[test]
    fn test_only_internal_pages_get_scripts() {
        assert!(wants_theme_script("dumb://home"));
        assert!(!wants_theme_script("https://example.com"));
        assert!(!wants_theme_script("about:blank"));
    }
}
