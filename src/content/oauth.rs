//! OAuth URL classification for popup auto-close.
//!
//! All tests are case-insensitive substring checks against the URL; the
//! goal is recognizing authentication flows well enough to close their
//! popups, not validating protocols.

/// Substrings marking a URL as part of an auth flow.
const FLOW_MARKERS: &[&str] = &[
    "oauth",
    "authorize",
    "authorization",
    "auth/",
    "/auth",
    "login",
    "signin",
    "sign-in",
    "oidc",
    "openid",
    "callback",
    "redirect",
    "/cb",
];

/// OAuth request parameters, also counted as flow markers.
const FLOW_PARAMS: &[&str] = &[
    "response_type=",
    "client_id=",
    "redirect_uri=",
    "scope=",
    "nonce=",
];

/// Parameters only present once the flow completed (either way).
const CALLBACK_PARAMS: &[&str] = &[
    "code=",
    "access_token=",
    "id_token=",
    "token_type=",
    "refresh_token=",
    "error=",
    "error_description=",
    "error_uri=",
];

const SUCCESS_PARAMS: &[&str] = &["code=", "access_token=", "id_token="];

/// Does this URL look like the start or middle of an OAuth flow?
pub fn is_oauth_flow_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    FLOW_MARKERS.iter().any(|m| lower.contains(m))
        || FLOW_PARAMS.iter().any(|p| lower.contains(p))
}

/// Does this URL carry completion parameters?
pub fn is_oauth_callback_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    CALLBACK_PARAMS.iter().any(|p| lower.contains(p))
}

/// Completion with a grant and no error.
pub fn is_oauth_success_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    SUCCESS_PARAMS.iter().any(|p| lower.contains(p)) && !lower.contains("error=")
}

/// Completion carrying an error.
pub fn is_oauth_error_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains("error=")
}

/// Per-popup OAuth observation, updated as the popup navigates.
#[derive(Debug, Clone, Default)]
pub struct OAuthState {
    /// Pane that opened the popup; reloaded on successful completion.
    pub parent_pane_id: Option<String>,
    /// Callback URL captured from uri-changed/load-committed.
    pub callback_uri: Option<String>,
    pub success: bool,
}

impl OAuthState {
    pub fn saw_callback(&self) -> bool {
        self.callback_uri.is_some()
    }

    /// Record a navigation; returns true when this was the first callback
    /// detection (the point where the close timer should be armed).
    pub fn observe(&mut self, url: &str) -> bool {
        if self.saw_callback() || !is_oauth_callback_url(url) {
            return false;
        }
        self.callback_uri = Some(url.to_string());
        self.success = is_oauth_success_url(url);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_detection() {
        assert!(is_oauth_flow_url(
            "https://idp.example/oauth/authorize?client_id=x&redirect_uri=y"
        ));
        assert!(is_oauth_flow_url("https://example.com/users/sign-in"));
        assert!(is_oauth_flow_url("https://example.com/?scope=openid"));
        assert!(is_oauth_flow_url("HTTPS://EXAMPLE.COM/LOGIN"));
        assert!(!is_oauth_flow_url("https://example.com/blog/post"));
    }

    #[test]
    fn test_callback_detection() {
        assert!(is_oauth_callback_url("https://app.example/cb?code=abc"));
        assert!(is_oauth_callback_url(
            "https://app.example/done#access_token=tok&token_type=bearer"
        ));
        assert!(is_oauth_callback_url("https://app.example/cb?error=denied"));
        assert!(!is_oauth_callback_url("https://idp.example/oauth/authorize"));
    }

    #[test]
    fn test_success_requires_grant_without_error() {
        assert!(is_oauth_success_url("https://app.example/cb?code=abc"));
        assert!(is_oauth_success_url("https://app.example/cb#id_token=x"));
        assert!(!is_oauth_success_url(
            "https://app.example/cb?code=abc&error=access_denied"
        ));
        assert!(!is_oauth_success_url("https://app.example/cb?state=only"));
        assert!(is_oauth_error_url("https://app.example/cb?error=denied"));
    }

    #[test]
    fn test_error_description_alone_is_not_error() {
        // `error_description=` does not contain the `error=` needle.
        assert!(!is_oauth_error_url("https://x/cb?error_description=hm"));
        assert!(is_oauth_callback_url("https://x/cb?error_description=hm"));
    }

    #[test]
    fn test_observe_captures_first_callback_only() {
        let mut state = OAuthState::default();
        assert!(!state.observe("https://idp.example/oauth/authorize"));
        assert!(!state.saw_callback());

        assert!(state.observe("https://app.example/cb?code=abc"));
        assert!(state.success);
        assert_eq!(
            state.callback_uri.as_deref(),
            Some("https://app.example/cb?code=abc")
        );

        // Later navigations don't overwrite the capture.
        assert!(!state.observe("https://app.example/cb?error=late"));
        assert!(state.success);
    }

    #[test]
    fn test_observe_error_callback() {
        let mut state = OAuthState::default();
        assert!(state.observe("https://app.example/cb?error=access_denied"));
        assert!(!state.success);
    }
}
