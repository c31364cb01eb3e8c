//! Popup lifecycle bookkeeping.
//!
//! Popups move through Pending (created, widget inserted, still hidden),
//! Ready (engine signalled ready-to-show), Alive (visible) and Closing.
//! The engine requires the related WebView to be inside the widget
//! hierarchy before the create handler returns, or `window.opener` never
//! binds; the workspace insertion callback upholds that contract.

use crate::config::{PopupBehavior, PopupConfig};
use crate::engine::WebViewId;
use crate::workspace::PaneId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupPhase {
    Pending,
    Ready,
    Alive,
    Closing,
}

/// `_blank` targets behave like tabs; named frames are js-popups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupKind {
    TabLike,
    JsPopup,
}

/// Classify a create request by its target frame name.
pub fn classify(frame_name: Option<&str>) -> PopupKind {
    match frame_name {
        Some("_blank") => PopupKind::TabLike,
        _ => PopupKind::JsPopup,
    }
}

/// Placement configured for this popup kind.
pub fn behavior_for(config: &PopupConfig, kind: PopupKind) -> PopupBehavior {
    match kind {
        PopupKind::TabLike => config.blank_target_behavior,
        PopupKind::JsPopup => config.behavior,
    }
}

/// One live popup tracked by the content coordinator.
#[derive(Debug, Clone)]
pub struct PendingPopup {
    pub pane_id: PaneId,
    pub webview_id: WebViewId,
    pub parent_pane_id: PaneId,
    pub kind: PopupKind,
    pub phase: PopupPhase,
    pub auto_close: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify(Some("_blank")), PopupKind::TabLike);
        assert_eq!(classify(Some("loginWindow")), PopupKind::JsPopup);
        assert_eq!(classify(None), PopupKind::JsPopup);
    }

    #[test]
    fn test_behavior_selection() {
        let config = PopupConfig::default();
        assert_eq!(
            behavior_for(&config, PopupKind::TabLike),
            config.blank_target_behavior
        );
        assert_eq!(behavior_for(&config, PopupKind::JsPopup), config.behavior);
    }
}
