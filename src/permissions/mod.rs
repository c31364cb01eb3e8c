//! Permission request arbitration and the decision cache.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::PermissionPrompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    Geolocation,
    Notification,
    Camera,
    Microphone,
    DisplayCapture,
    DeviceInfo,
    PointerLock,
    ClipboardWrite,
}

impl PermissionKind {
    /// Map an engine permission type string; unknown types are filtered
    /// out by the caller.
    pub fn from_engine(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "geolocation" => Some(Self::Geolocation),
            "notification" | "notifications" => Some(Self::Notification),
            "camera" | "video-capture" => Some(Self::Camera),
            "microphone" | "audio-capture" => Some(Self::Microphone),
            "display-capture" | "screen-capture" => Some(Self::DisplayCapture),
            "device-info" | "media-device-info" => Some(Self::DeviceInfo),
            "pointer-lock" => Some(Self::PointerLock),
            "clipboard-write" | "clipboard" => Some(Self::ClipboardWrite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Geolocation => "geolocation",
            Self::Notification => "notification",
            Self::Camera => "camera",
            Self::Microphone => "microphone",
            Self::DisplayCapture => "display-capture",
            Self::DeviceInfo => "device-info",
            Self::PointerLock => "pointer-lock",
            Self::ClipboardWrite => "clipboard-write",
        }
    }

    /// Display-capture, device-info and pointer-lock decisions are
    /// session-scoped and never written to the store.
    pub fn is_persistable(&self) -> bool {
        !matches!(
            self,
            Self::DisplayCapture | Self::DeviceInfo | Self::PointerLock
        )
    }

    /// Decision applied when no dialog handler is installed.
    pub fn auto_allow(&self) -> bool {
        matches!(
            self,
            Self::DisplayCapture | Self::DeviceInfo | Self::PointerLock
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Granted,
    Denied,
    Prompt,
}

impl PermissionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Prompt => "prompt",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "granted" => Some(Self::Granted),
            "denied" => Some(Self::Denied),
            "prompt" => Some(Self::Prompt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRecord {
    pub origin: String,
    pub kind: PermissionKind,
    pub decision: PermissionDecision,
    pub updated_at: i64,
}

/// Persistent decisions, keyed by (origin, kind).
pub trait PermissionStore: Send + Sync {
    fn save(&self, record: &PermissionRecord);
    fn decision_for(&self, origin: &str, kind: PermissionKind) -> Option<PermissionDecision>;
}

/// The dialog surface receives one of these per undecided request and
/// must call `respond` exactly once.
pub struct PermissionDialogRequest {
    pub origin: String,
    pub kind: PermissionKind,
    pub respond: Box<dyn FnOnce(bool) + Send>,
}

type DialogHandler = Arc<dyn Fn(PermissionDialogRequest) + Send + Sync>;
type ActivityHandler = Arc<dyn Fn(bool) + Send + Sync>;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Dialog arbitration: cached decisions answer immediately, undecided
/// requests go to the dialog handler, and with no handler installed a
/// fixed auto policy applies.
pub struct PermissionArbiter {
    cache: Mutex<HashMap<(String, PermissionKind), PermissionDecision>>,
    store: Mutex<Option<Arc<dyn PermissionStore>>>,
    dialog: Mutex<Option<DialogHandler>>,
    on_activity: Mutex<Option<ActivityHandler>>,
    weak: Weak<PermissionArbiter>,
}

impl PermissionArbiter {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            cache: Mutex::new(HashMap::new()),
            store: Mutex::new(None),
            dialog: Mutex::new(None),
            on_activity: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    pub fn set_store(&self, store: Arc<dyn PermissionStore>) {
        *self.store.lock() = Some(store);
    }

    pub fn set_dialog_handler<F: Fn(PermissionDialogRequest) + Send + Sync + 'static>(
        &self,
        handler: F,
    ) {
        *self.dialog.lock() = Some(Arc::new(handler));
    }

    pub fn set_on_activity<F: Fn(bool) + Send + Sync + 'static>(&self, handler: F) {
        *self.on_activity.lock() = Some(Arc::new(handler));
    }

    fn notify_activity(&self, active: bool) {
        let handler = self.on_activity.lock().clone();
        if let Some(handler) = handler {
            handler(active);
        }
    }

    fn known_decision(&self, origin: &str, kind: PermissionKind) -> Option<PermissionDecision> {
        if let Some(decision) = self.cache.lock().get(&(origin.to_string(), kind)).copied() {
            return Some(decision);
        }
        let store = self.store.lock().clone();
        store.and_then(|s| s.decision_for(origin, kind))
    }

    fn record(&self, origin: &str, kind: PermissionKind, allowed: bool) {
        let decision = if allowed {
            PermissionDecision::Granted
        } else {
            PermissionDecision::Denied
        };
        self.cache
            .lock()
            .insert((origin.to_string(), kind), decision);

        if kind.is_persistable() {
            let store = self.store.lock().clone();
            if let Some(store) = store {
                store.save(&PermissionRecord {
                    origin: origin.to_string(),
                    kind,
                    decision,
                    updated_at: unix_now(),
                });
            }
        }
    }

    /// Handle an engine prompt end to end: filter, answer from cache,
    /// or delegate to the dialog with activity notifications around it.
    pub fn handle_prompt(&self, prompt: PermissionPrompt) {
        let Some(kind) = PermissionKind::from_engine(&prompt.kind) else {
            log::debug!("Denying unknown permission type {:?}", prompt.kind);
            (prompt.deny)();
            return;
        };
        let origin = prompt.origin.clone();

        match self.known_decision(&origin, kind) {
            Some(PermissionDecision::Granted) => {
                (prompt.allow)();
                return;
            }
            Some(PermissionDecision::Denied) => {
                (prompt.deny)();
                return;
            }
            Some(PermissionDecision::Prompt) | None => {}
        }

        let dialog = self.dialog.lock().clone();
        let Some(dialog) = dialog else {
            if kind.auto_allow() {
                log::debug!("Auto-allowing {} for {}", kind.as_str(), origin);
                (prompt.allow)();
            } else {
                log::debug!("Auto-denying {} for {}", kind.as_str(), origin);
                (prompt.deny)();
            }
            return;
        };

        self.notify_activity(true);
        let weak = self.weak.clone();
        let allow = prompt.allow;
        let deny = prompt.deny;
        dialog(PermissionDialogRequest {
            origin: origin.clone(),
            kind,
            respond: Box::new(move |allowed| {
                if let Some(this) = weak.upgrade() {
                    this.record(&origin, kind, allowed);
                }
                if allowed {
                    allow();
                } else {
                    deny();
                }
                if let Some(this) = weak.upgrade() {
                    this.notify_activity(false);
                }
            }),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<PermissionRecord>>,
        canned: Mutex<HashMap<(String, PermissionKind), PermissionDecision>>,
    }

    impl PermissionStore for RecordingStore {
        fn save(&self, record: &PermissionRecord) {
            self.saved.lock().push(record.clone());
        }

        fn decision_for(&self, origin: &str, kind: PermissionKind) -> Option<PermissionDecision> {
            self.canned.lock().get(&(origin.to_string(), kind)).copied()
        }
    }

    fn prompt_for(kind: &str, outcome: Arc<AtomicI32>) -> PermissionPrompt {
        let allow_flag = outcome.clone();
        PermissionPrompt {
            origin: "https://example.com".to_string(),
            kind: kind.to_string(),
            allow: Box::new(move || allow_flag.store(1, Ordering::SeqCst)),
            deny: Box::new(move || outcome.store(-1, Ordering::SeqCst)),
        }
    }

    #[test]
    fn test_unknown_kind_is_denied() {
        let arbiter = PermissionArbiter::new();
        let outcome = Arc::new(AtomicI32::new(0));
        arbiter.handle_prompt(prompt_for("quantum-entanglement", outcome.clone()));
        assert_eq!(outcome.load(Ordering::SeqCst), -1);
    }

    #[test]
    fn test_auto_policy_without_dialog() {
        let arbiter = PermissionArbiter::new();

        let outcome = Arc::new(AtomicI32::new(0));
        arbiter.handle_prompt(prompt_for("display-capture", outcome.clone()));
        assert_eq!(outcome.load(Ordering::SeqCst), 1);

        let outcome = Arc::new(AtomicI32::new(0));
        arbiter.handle_prompt(prompt_for("geolocation", outcome.clone()));
        assert_eq!(outcome.load(Ordering::SeqCst), -1);
    }

    #[test]
    fn test_dialog_decision_is_cached_and_persisted() {
        let arbiter = PermissionArbiter::new();
        let store = Arc::new(RecordingStore::default());
        arbiter.set_store(store.clone());
        arbiter.set_dialog_handler(|request| (request.respond)(true));

        let outcome = Arc::new(AtomicI32::new(0));
        arbiter.handle_prompt(prompt_for("camera", outcome.clone()));
        assert_eq!(outcome.load(Ordering::SeqCst), 1);

        let saved = store.saved.lock();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].kind, PermissionKind::Camera);
        assert_eq!(saved[0].decision, PermissionDecision::Granted);
        drop(saved);

        // Second prompt answers from cache without re-prompting.
        arbiter.set_dialog_handler(|_| panic!("dialog should not run"));
        let outcome = Arc::new(AtomicI32::new(0));
        arbiter.handle_prompt(prompt_for("camera", outcome.clone()));
        assert_eq!(outcome.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_session_scoped_kinds_not_persisted() {
        let arbiter = PermissionArbiter::new();
        let store = Arc::new(RecordingStore::default());
        arbiter.set_store(store.clone());
        arbiter.set_dialog_handler(|request| (request.respond)(true));

        let outcome = Arc::new(AtomicI32::new(0));
        arbiter.handle_prompt(prompt_for("pointer-lock", outcome.clone()));
        assert_eq!(outcome.load(Ordering::SeqCst), 1);
        assert!(store.saved.lock().is_empty());
    }

    #[test]
    fn test_stored_denial_short_circuits() {
        let arbiter = PermissionArbiter::new();
        let store = Arc::new(RecordingStore::default());
        store.canned.lock().insert(
            ("https://example.com".to_string(), PermissionKind::Camera),
            PermissionDecision::Denied,
        );
        arbiter.set_store(store);
        arbiter.set_dialog_handler(|_| panic!("dialog should not run"));

        let outcome = Arc::new(AtomicI32::new(0));
        arbiter.handle_prompt(prompt_for("camera", outcome.clone()));
        assert_eq!(outcome.load(Ordering::SeqCst), -1);
    }

    #[test]
    fn test_activity_signalled_around_dialog() {
        let arbiter = PermissionArbiter::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        arbiter.set_on_activity(move |active| seen.lock().push(active));
        arbiter.set_dialog_handler(|request| (request.respond)(false));

        let outcome = Arc::new(AtomicI32::new(0));
        arbiter.handle_prompt(prompt_for("microphone", outcome.clone()));
        assert_eq!(outcome.load(Ordering::SeqCst), -1);
        assert_eq!(*events.lock(), vec![true, false]);
    }
}
