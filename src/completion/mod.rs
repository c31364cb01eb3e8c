//! History-based URL completion.
//!
//! The omnibox gets two surfaces from here: a ranked suggestion list for
//! the dropdown, and an inline autocompletion that extends the typed
//! input to the best-matching URL while preserving that URL's case.

use std::collections::HashSet;

use url::Url;

use crate::config;
use crate::history::{Database, HistoryEntry};
use crate::navigation::compute_completion_suffix;

/// A single completion item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    /// Title or, when the page never reported one, the URL itself.
    pub title: String,
    pub url: String,
    pub visit_count: u32,
}

impl CompletionItem {
    fn from_entry(entry: HistoryEntry) -> Self {
        Self {
            title: entry.title.unwrap_or_else(|| entry.url.clone()),
            url: entry.url,
            visit_count: entry.visit_count.max(0) as u32,
        }
    }
}

/// Inline autocompletion: the winning URL and the suffix to append to
/// the typed input so it reads as that URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineCompletion {
    pub url: String,
    pub suffix: String,
}

/// Provide completions from browsing history.
/// Results are sorted by relevance:
/// 1. URLs whose host starts with the query (e.g., "goo" matches "google.com")
/// 2. Higher visit count
/// 3. More recent visits
pub fn history_completions(history: &Database, query: &str) -> Vec<CompletionItem> {
    if query.is_empty() {
        return Vec::new();
    }

    match history.search(query, config::HISTORY_COMPLETION_LIMIT * 2) {
        Ok(mut entries) => {
            let query_lower = query.to_lowercase();

            entries.sort_by(|a, b| {
                // Host prefix match wins
                let a_host_prefix = url_host_starts_with(&a.url, &query_lower);
                let b_host_prefix = url_host_starts_with(&b.url, &query_lower);

                b_host_prefix
                    .cmp(&a_host_prefix)
                    // Then by visit count
                    .then_with(|| b.visit_count.cmp(&a.visit_count))
                    // Then by recency
                    .then_with(|| b.last_visit_time.cmp(&a.last_visit_time))
            });

            entries.truncate(config::HISTORY_COMPLETION_LIMIT);
            entries.into_iter().map(CompletionItem::from_entry).collect()
        }
        Err(e) => {
            log::warn!("Failed to search history for completion: {}", e);
            Vec::new()
        }
    }
}

/// Suggestions for an empty omnibox: most-visited sites first, recent
/// visits filling the remainder, deduplicated by URL.
pub fn default_completions(history: &Database) -> Vec<CompletionItem> {
    let limit = config::COMPLETION_MAX_RESULTS;
    let most_visited = history.get_most_visited(limit).unwrap_or_else(|e| {
        log::warn!("Failed to load most-visited sites for completion: {}", e);
        Vec::new()
    });
    let recent = history.get_recent(limit).unwrap_or_else(|e| {
        log::warn!("Failed to load recent history for completion: {}", e);
        Vec::new()
    });

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for entry in most_visited.into_iter().chain(recent) {
        if items.len() >= limit {
            break;
        }
        if seen.insert(entry.url.clone()) {
            items.push(CompletionItem::from_entry(entry));
        }
    }
    items
}

/// Extend the typed input to the best-ranked history match. The match is
/// case-insensitive; the suffix keeps the stored URL's case. Input that
/// already spells out a full candidate yields nothing.
pub fn inline_completion(history: &Database, input: &str) -> Option<InlineCompletion> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    for item in history_completions(history, trimmed) {
        for candidate in completion_texts(&item.url) {
            if let Some(suffix) = compute_completion_suffix(trimmed, &candidate) {
                return Some(InlineCompletion {
                    url: item.url.clone(),
                    suffix,
                });
            }
        }
    }
    None
}

/// The forms a user plausibly types for a URL, most natural first: the
/// bare host form (scheme and `www.` stripped), the scheme-less form,
/// and the full URL.
fn completion_texts(url: &str) -> Vec<String> {
    let mut texts = Vec::new();
    if let Some((_, rest)) = url.split_once("://") {
        if let Some(stripped) = rest.strip_prefix("www.") {
            texts.push(stripped.to_string());
        }
        texts.push(rest.to_string());
    }
    texts.push(url.to_string());
    texts
}

/// Check if a URL's host starts with the given prefix
fn url_host_starts_with(url_str: &str, prefix: &str) -> bool {
    if let Ok(url) = Url::parse(url_str) {
        if let Some(host) = url.host_str() {
            // Strip "www." prefix for matching
            let host_clean = host.strip_prefix("www.").unwrap_or(host);
            return host_clean.to_lowercase().starts_with(prefix);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seeded_db(dir: &std::path::Path) -> Database {
        let db = Database::new(dir).unwrap();
        // github: host-prefix match for "git", most visited.
        for _ in 0..5 {
            db.record_visit("https://github.com/rust-lang/rust", Some("Rust"))
                .unwrap();
        }
        // gitlab: host-prefix match, fewer visits.
        db.record_visit("https://gitlab.com/inkscape", Some("Inkscape"))
            .unwrap();
        db.record_visit("https://gitlab.com/inkscape", None).unwrap();
        // Mentions git only in the path; should rank below host matches.
        db.record_visit("https://example.com/git-tutorial", Some("Learn Git"))
            .unwrap();
        db
    }

    #[test]
    fn test_ranking_prefers_host_prefix_then_visit_count() {
        let dir = tempdir().unwrap();
        let db = seeded_db(dir.path());

        let items = history_completions(&db, "git");
        let urls: Vec<&str> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://github.com/rust-lang/rust",
                "https://gitlab.com/inkscape",
                "https://example.com/git-tutorial",
            ]
        );
        assert_eq!(items[0].title, "Rust");
        assert_eq!(items[0].visit_count, 5);
    }

    #[test]
    fn test_www_stripped_for_host_matching() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        db.record_visit("https://www.wikipedia.org/", Some("Wikipedia"))
            .unwrap();

        let items = history_completions(&db, "wiki");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://www.wikipedia.org/");
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let dir = tempdir().unwrap();
        let db = seeded_db(dir.path());
        assert!(history_completions(&db, "").is_empty());
    }

    #[test]
    fn test_title_falls_back_to_url() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        db.record_visit("https://untitled.test/", None).unwrap();

        let items = history_completions(&db, "untitled");
        assert_eq!(items[0].title, "https://untitled.test/");
    }

    #[test]
    fn test_default_completions_merge_and_dedup() {
        let dir = tempdir().unwrap();
        let db = seeded_db(dir.path());

        let items = default_completions(&db);
        // Three distinct URLs in history; most visited leads.
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].url, "https://github.com/rust-lang/rust");
        let unique: HashSet<&str> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(unique.len(), items.len());
    }

    #[test]
    fn test_inline_completion_extends_typed_host() {
        let dir = tempdir().unwrap();
        let db = seeded_db(dir.path());

        let completion = inline_completion(&db, "gith").unwrap();
        assert_eq!(completion.url, "https://github.com/rust-lang/rust");
        assert_eq!(completion.suffix, "ub.com/rust-lang/rust");
    }

    #[test]
    fn test_inline_completion_is_case_insensitive_but_case_preserving() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        db.record_visit("https://GitHub.com/Rust-Lang", Some("Rust"))
            .unwrap();

        let completion = inline_completion(&db, "github.com/r").unwrap();
        assert_eq!(completion.suffix, "ust-Lang");
    }

    #[test]
    fn test_inline_completion_none_for_full_or_unknown_input() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        db.record_visit("https://github.com/", Some("GitHub")).unwrap();

        assert!(inline_completion(&db, "https://github.com/").is_none());
        assert!(inline_completion(&db, "zzz-nothing").is_none());
        assert!(inline_completion(&db, "  ").is_none());
    }

    #[test]
    fn test_inline_completion_prefers_scheme_less_form() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path()).unwrap();
        db.record_visit("https://www.example.com/docs", Some("Docs"))
            .unwrap();

        // Bare host form wins over the www/full forms.
        let completion = inline_completion(&db, "exam").unwrap();
        assert_eq!(completion.suffix, "ple.com/docs");

        // Typing the www form still completes.
        let completion = inline_completion(&db, "www.exam").unwrap();
        assert_eq!(completion.suffix, "ple.com/docs");

        // So does the full URL form.
        let completion = inline_completion(&db, "https://www.exam").unwrap();
        assert_eq!(completion.suffix, "ple.com/docs");
    }
}
