//! URL input handling: normalization, bang shortcuts, inline completion.

use url::Url;

pub mod coordinator;

/// Schemes passed through untouched by [`normalize_url`].
const PASSTHROUGH_SCHEMES: &[&str] = &["http:", "https:", "dumb:", "file:", "about:"];

/// Schemes the browser renders itself; anything else observed in a URI
/// change is handed to the platform opener.
const HANDLED_SCHEMES: &[&str] = &["http", "https", "file", "about", "dumb"];

/// Parse a bang shortcut of the form `!key rest`. The key is
/// `[A-Za-z][A-Za-z0-9]{0,19}`, separated from a non-empty rest by at
/// least one space.
pub fn parse_bang_shortcut(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix('!')?;
    let space = rest.find(' ')?;
    let (key, query) = rest.split_at(space);
    let query = query.trim_start_matches(' ');
    if query.is_empty() || key.is_empty() || key.len() > 20 {
        return None;
    }
    let mut chars = key.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((key, query))
}

/// Fill a `%s` search template with a percent-encoded query.
pub fn fill_search_template(template: &str, query: &str) -> String {
    template.replace("%s", &urlencoding::encode(query))
}

/// Turn omnibox input into a loadable URI.
///
/// Bang shortcuts rewrite through the shortcut table first (unknown keys
/// fall through to the default search). Known schemes pass through;
/// dot-containing input gets `https://`; everything else becomes a
/// search.
pub fn normalize_url(input: &str, search: &crate::config::SearchConfig) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return crate::config::HOME_URL.to_string();
    }

    if let Some((key, query)) = parse_bang_shortcut(trimmed) {
        let template = search
            .shortcuts
            .get(key)
            .map(String::as_str)
            .unwrap_or(search.default_template.as_str());
        return fill_search_template(template, query);
    }

    let lower = trimmed.to_ascii_lowercase();
    if PASSTHROUGH_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return trimmed.to_string();
    }

    if !trimmed.contains(' ') && trimmed.contains('.') {
        return format!("https://{}", trimmed);
    }

    fill_search_template(&search.default_template, trimmed)
}

/// True when a URI-change should be routed to the platform opener
/// instead of being rendered.
pub fn is_external_scheme(uri: &str) -> bool {
    let Some(scheme) = uri.split(':').next() else {
        return false;
    };
    if scheme.len() == uri.len() {
        // No scheme separator at all.
        return false;
    }
    !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        && !HANDLED_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str())
}

/// Inline completion: the suffix to append to `input` so it reads as
/// `full_text`. The match is case-insensitive, the suffix preserves the
/// original case of `full_text`, and input equal to the full text yields
/// nothing.
pub fn compute_completion_suffix(input: &str, full_text: &str) -> Option<String> {
    if input.is_empty() || full_text.len() <= input.len() {
        return None;
    }
    let (head, tail) = full_text.split_at_checked(input.len())?;
    if head.eq_ignore_ascii_case(input) {
        Some(tail.to_string())
    } else {
        None
    }
}

/// Normalized domain key shared by the zoom store and the favicon cache:
/// lowercased host with a leading `www.` stripped.
pub fn normalized_domain(uri: &str) -> Option<String> {
    let parsed = Url::parse(uri).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Step a zoom factor by `steps` increments, clamped to the supported
/// range.
pub fn step_zoom(current: f64, steps: i32) -> f64 {
    crate::workspace::clamp_zoom(current + f64::from(steps) * crate::config::ZOOM_STEP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;

    fn search() -> SearchConfig {
        let mut search = SearchConfig::default();
        search
            .shortcuts
            .insert("g".to_string(), "https://www.google.com/search?q=%s".to_string());
        search
    }

    #[test]
    fn test_parse_bang_shortcut() {
        assert_eq!(parse_bang_shortcut("!k q"), Some(("k", "q")));
        assert_eq!(parse_bang_shortcut("!gh rust browser"), Some(("gh", "rust browser")));
        assert_eq!(parse_bang_shortcut("!k"), None);
        assert_eq!(parse_bang_shortcut("!k "), None);
        assert_eq!(parse_bang_shortcut("!!k q"), None);
        assert_eq!(parse_bang_shortcut("!2k q"), None);
        assert_eq!(parse_bang_shortcut("no bang"), None);
        assert_eq!(parse_bang_shortcut("!waytoolongkeyaaaaaaaaa q"), None);
    }

    #[test]
    fn test_bang_rewrites_through_table() {
        assert_eq!(
            normalize_url("!g rust browser", &search()),
            "https://www.google.com/search?q=rust%20browser"
        );
    }

    #[test]
    fn test_unknown_bang_falls_through_to_default_search() {
        assert_eq!(
            normalize_url("!zz something", &search()),
            "https://duckduckgo.com/?q=something"
        );
    }

    #[test]
    fn test_normalize_preserves_schemes() {
        let s = search();
        assert_eq!(normalize_url("http://a.test", &s), "http://a.test");
        assert_eq!(normalize_url("https://a.test/x", &s), "https://a.test/x");
        assert_eq!(normalize_url("dumb://home", &s), "dumb://home");
        assert_eq!(normalize_url("file:///tmp/x.html", &s), "file:///tmp/x.html");
        assert_eq!(normalize_url("about:blank", &s), "about:blank");
    }

    #[test]
    fn test_normalize_adds_https_for_domains() {
        assert_eq!(normalize_url("example.com", &search()), "https://example.com");
        assert_eq!(
            normalize_url("github.com/user/repo", &search()),
            "https://github.com/user/repo"
        );
    }

    #[test]
    fn test_normalize_searches_plain_words() {
        assert_eq!(
            normalize_url("rust programming", &search()),
            "https://duckduckgo.com/?q=rust%20programming"
        );
    }

    #[test]
    fn test_external_scheme_detection() {
        assert!(is_external_scheme("vscode://open?file=/tmp/a.rs"));
        assert!(is_external_scheme("mailto:someone@example.com"));
        assert!(!is_external_scheme("https://example.com"));
        assert!(!is_external_scheme("dumb://home"));
        assert!(!is_external_scheme("about:blank"));
        assert!(!is_external_scheme("no-scheme-here"));
    }

    #[test]
    fn test_completion_suffix_preserves_case() {
        assert_eq!(
            compute_completion_suffix("git", "GitHub.com").as_deref(),
            Some("Hub.com")
        );
        assert_eq!(
            compute_completion_suffix("GITHUB.", "github.com").as_deref(),
            Some("com")
        );
    }

    #[test]
    fn test_completion_suffix_not_found_cases() {
        assert_eq!(compute_completion_suffix("github.com", "github.com"), None);
        assert_eq!(compute_completion_suffix("", "github.com"), None);
        assert_eq!(compute_completion_suffix("gitlab", "github.com"), None);
        assert_eq!(compute_completion_suffix("longer-than-full", "short"), None);
    }

    #[test]
    fn test_normalized_domain() {
        assert_eq!(
            normalized_domain("https://www.Example.com/path").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            normalized_domain("https://sub.example.com").as_deref(),
            Some("sub.example.com")
        );
        assert_eq!(normalized_domain("about:blank"), None);
    }

    #[test]
    fn test_step_zoom_clamps() {
        assert!((step_zoom(1.0, 1) - 1.1).abs() < 1e-9);
        assert!((step_zoom(1.0, -1) - 0.9).abs() < 1e-9);
        assert_eq!(step_zoom(4.95, 10), crate::config::ZOOM_MAX);
        assert_eq!(step_zoom(0.3, -10), crate::config::ZOOM_MIN);
    }
}
