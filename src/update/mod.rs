//! Background self-update state machine.
//!
//! Check and download run on worker threads; every status change and
//! toast re-enters the UI through the coalescer. Download and binary
//! replacement mechanics live behind ports.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::config::UpdateConfig;
use crate::mainloop::{TaskRunner, UiCoalescer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Unknown,
    UpToDate,
    Available,
    Downloading,
    Ready,
    Failed,
}

/// Outcome of the last release check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub current_version: String,
    pub latest_version: String,
    pub download_url: String,
    pub can_auto_update: bool,
    pub published_at: String,
}

/// Queries the release channel. `Ok(None)` means already up to date.
pub trait UpdateChecker: Send + Sync {
    fn check(&self) -> Result<Option<CheckResult>, String>;
}

/// Fetches the release artifact, returning its local path.
pub trait UpdateDownloader: Send + Sync {
    fn download(&self, check: &CheckResult) -> Result<PathBuf, String>;
}

/// Stages and applies the downloaded binary.
pub trait UpdateApplier: Send + Sync {
    fn binary_writable(&self) -> bool;
    fn stage(&self, artifact: &Path) -> Result<(), String>;
    /// Replace the running binary atomically, leaving a backup.
    fn apply_staged(&self) -> Result<(), String>;
}

type Cb<T> = Mutex<Option<Arc<T>>>;

pub struct UpdateCoordinator {
    checker: Arc<dyn UpdateChecker>,
    downloader: Arc<dyn UpdateDownloader>,
    applier: Arc<dyn UpdateApplier>,
    runner: Arc<dyn TaskRunner>,
    coalescer: Arc<UiCoalescer>,
    config: UpdateConfig,
    /// Status and last check result are read and written as one pair.
    state: Mutex<(UpdateStatus, Option<CheckResult>)>,
    staged: AtomicBool,
    toast: Cb<dyn Fn(&str) + Send + Sync>,
    status_changed: Cb<dyn Fn(UpdateStatus) + Send + Sync>,
    weak: Weak<UpdateCoordinator>,
}

impl UpdateCoordinator {
    pub fn new(
        checker: Arc<dyn UpdateChecker>,
        downloader: Arc<dyn UpdateDownloader>,
        applier: Arc<dyn UpdateApplier>,
        runner: Arc<dyn TaskRunner>,
        coalescer: Arc<UiCoalescer>,
        config: UpdateConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            checker,
            downloader,
            applier,
            runner,
            coalescer,
            config,
            state: Mutex::new((UpdateStatus::Unknown, None)),
            staged: AtomicBool::new(false),
            toast: Mutex::new(None),
            status_changed: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    pub fn set_on_toast<F: Fn(&str) + Send + Sync + 'static>(&self, f: F) {
        *self.toast.lock() = Some(Arc::new(f));
    }

    pub fn set_on_status_changed<F: Fn(UpdateStatus) + Send + Sync + 'static>(&self, f: F) {
        *self.status_changed.lock() = Some(Arc::new(f));
    }

    /// Consistent (status, last check result) pair.
    pub fn status(&self) -> (UpdateStatus, Option<CheckResult>) {
        self.state.lock().clone()
    }

    pub fn is_staged(&self) -> bool {
        self.staged.load(Ordering::SeqCst)
    }

    /// Startup hook: spawns the background check when enabled.
    pub fn start(&self) {
        if !self.config.enable_on_startup {
            log::debug!("Update check disabled at startup");
            return;
        }
        self.check_now();
    }

    /// Run a release check on a worker thread.
    pub fn check_now(&self) {
        let weak = self.weak.clone();
        self.runner.spawn(Box::new(move || {
            let Some(this) = weak.upgrade() else {
                return;
            };
            match this.checker.check() {
                Ok(Some(result)) => {
                    log::info!(
                        "Update available: {} -> {}",
                        result.current_version,
                        result.latest_version
                    );
                    let auto = this.config.auto_download
                        && result.can_auto_update
                        && this.applier.binary_writable();
                    this.set_state(UpdateStatus::Available, Some(result.clone()));
                    if auto {
                        this.download(result);
                    }
                }
                Ok(None) => {
                    this.set_state(UpdateStatus::UpToDate, None);
                }
                Err(e) => {
                    log::warn!("Update check failed: {}", e);
                    this.set_state(UpdateStatus::Failed, None);
                }
            }
        }));
    }

    /// Fetch and stage the release on a worker thread.
    pub fn download(&self, check: CheckResult) {
        self.set_state(UpdateStatus::Downloading, Some(check.clone()));
        let weak = self.weak.clone();
        self.runner.spawn(Box::new(move || {
            let Some(this) = weak.upgrade() else {
                return;
            };
            let staged = this
                .downloader
                .download(&check)
                .and_then(|artifact| this.applier.stage(&artifact));
            match staged {
                Ok(()) => {
                    this.staged.store(true, Ordering::SeqCst);
                    this.set_state(UpdateStatus::Ready, Some(check.clone()));
                    this.show_toast(&format!(
                        "Update {} ready; restart to apply",
                        check.latest_version
                    ));
                }
                Err(e) => {
                    log::warn!("Update download failed: {}", e);
                    this.set_state(UpdateStatus::Failed, Some(check.clone()));
                    this.show_toast("Update download failed");
                }
            }
        }));
    }

    /// Shutdown hook: swap in the staged binary, if any.
    pub fn shutdown(&self) {
        if !self.staged.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.applier.apply_staged() {
            Ok(()) => log::info!("Staged update applied"),
            Err(e) => log::error!("Failed to apply staged update: {}", e),
        }
    }

    fn set_state(&self, status: UpdateStatus, result: Option<CheckResult>) {
        *self.state.lock() = (status, result);
        // Listeners run on the UI loop; repeated transitions collapse to
        // the newest.
        let weak = self.weak.clone();
        self.coalescer.post(
            "update-status",
            Box::new(move || {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                let status = this.state.lock().0;
                let cb = this.status_changed.lock().clone();
                if let Some(cb) = cb {
                    cb(status);
                }
            }),
        );
    }

    fn show_toast(&self, message: &str) {
        let weak = self.weak.clone();
        let message = message.to_string();
        self.coalescer.post(
            "update-toast",
            Box::new(move || {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                let cb = this.toast.lock().clone();
                if let Some(cb) = cb {
                    cb(&message);
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mainloop::MainLoop;
    use crate::testutil::{FakeMainLoop, InlineRunner};

    struct FixedChecker(Result<Option<CheckResult>, String>);
    impl UpdateChecker for FixedChecker {
        fn check(&self) -> Result<Option<CheckResult>, String> {
            self.0.clone()
        }
    }

    struct FixedDownloader(Result<PathBuf, String>);
    impl UpdateDownloader for FixedDownloader {
        fn download(&self, _check: &CheckResult) -> Result<PathBuf, String> {
            self.0.clone()
        }
    }

    struct FixedApplier {
        writable: bool,
        applied: Mutex<bool>,
    }
    impl UpdateApplier for FixedApplier {
        fn binary_writable(&self) -> bool {
            self.writable
        }
        fn stage(&self, _artifact: &Path) -> Result<(), String> {
            Ok(())
        }
        fn apply_staged(&self) -> Result<(), String> {
            *self.applied.lock() = true;
            Ok(())
        }
    }

    fn result() -> CheckResult {
        CheckResult {
            current_version: "1.0.0".to_string(),
            latest_version: "1.1.0".to_string(),
            download_url: "https://example.com/dumber".to_string(),
            can_auto_update: true,
            published_at: "2025-06-01T00:00:00Z".to_string(),
        }
    }

    fn coordinator(
        checker: FixedChecker,
        downloader: FixedDownloader,
        applier: Arc<FixedApplier>,
        config: UpdateConfig,
    ) -> (Arc<UpdateCoordinator>, Arc<FakeMainLoop>) {
        let main_loop = Arc::new(FakeMainLoop::new());
        let coalescer = UiCoalescer::new(main_loop.clone() as Arc<dyn MainLoop>);
        let coordinator = UpdateCoordinator::new(
            Arc::new(checker),
            Arc::new(downloader),
            applier,
            Arc::new(InlineRunner),
            coalescer,
            config,
        );
        (coordinator, main_loop)
    }

    #[test]
    fn test_check_up_to_date() {
        let applier = Arc::new(FixedApplier {
            writable: true,
            applied: Mutex::new(false),
        });
        let (coordinator, main_loop) = coordinator(
            FixedChecker(Ok(None)),
            FixedDownloader(Err("unused".to_string())),
            applier,
            UpdateConfig::default(),
        );

        coordinator.check_now();
        main_loop.run_all();
        assert_eq!(coordinator.status(), (UpdateStatus::UpToDate, None));
    }

    #[test]
    fn test_check_available_without_auto_download() {
        let applier = Arc::new(FixedApplier {
            writable: true,
            applied: Mutex::new(false),
        });
        let (coordinator, _main_loop) = coordinator(
            FixedChecker(Ok(Some(result()))),
            FixedDownloader(Ok(PathBuf::from("/tmp/artifact"))),
            applier,
            UpdateConfig {
                enable_on_startup: true,
                auto_download: false,
            },
        );

        coordinator.check_now();
        let (status, check) = coordinator.status();
        assert_eq!(status, UpdateStatus::Available);
        assert_eq!(check, Some(result()));
        assert!(!coordinator.is_staged());
    }

    #[test]
    fn test_auto_download_stages_and_toasts() {
        let applier = Arc::new(FixedApplier {
            writable: true,
            applied: Mutex::new(false),
        });
        let (coordinator, main_loop) = coordinator(
            FixedChecker(Ok(Some(result()))),
            FixedDownloader(Ok(PathBuf::from("/tmp/artifact"))),
            applier.clone(),
            UpdateConfig {
                enable_on_startup: true,
                auto_download: true,
            },
        );

        let toasts = Arc::new(Mutex::new(Vec::new()));
        let seen = toasts.clone();
        coordinator.set_on_toast(move |message| seen.lock().push(message.to_string()));

        coordinator.start();
        main_loop.run_all();

        let (status, _) = coordinator.status();
        assert_eq!(status, UpdateStatus::Ready);
        assert!(coordinator.is_staged());
        assert_eq!(toasts.lock().len(), 1);

        coordinator.shutdown();
        assert!(*applier.applied.lock());
        assert!(!coordinator.is_staged());
    }

    #[test]
    fn test_unwritable_binary_blocks_auto_download() {
        let applier = Arc::new(FixedApplier {
            writable: false,
            applied: Mutex::new(false),
        });
        let (coordinator, _main_loop) = coordinator(
            FixedChecker(Ok(Some(result()))),
            FixedDownloader(Ok(PathBuf::from("/tmp/artifact"))),
            applier,
            UpdateConfig {
                enable_on_startup: true,
                auto_download: true,
            },
        );

        coordinator.check_now();
        assert_eq!(coordinator.status().0, UpdateStatus::Available);
    }

    #[test]
    fn test_download_failure_reports_failed() {
        let applier = Arc::new(FixedApplier {
            writable: true,
            applied: Mutex::new(false),
        });
        let (coordinator, main_loop) = coordinator(
            FixedChecker(Ok(Some(result()))),
            FixedDownloader(Err("network".to_string())),
            applier,
            UpdateConfig {
                enable_on_startup: true,
                auto_download: true,
            },
        );

        coordinator.check_now();
        main_loop.run_all();
        let (status, check) = coordinator.status();
        assert_eq!(status, UpdateStatus::Failed);
        assert!(check.is_some());
        assert!(!coordinator.is_staged());
    }

    #[test]
    fn test_check_failure() {
        let applier = Arc::new(FixedApplier {
            writable: true,
            applied: Mutex::new(false),
        });
        let (coordinator, _main_loop) = coordinator(
            FixedChecker(Err("offline".to_string())),
            FixedDownloader(Err("unused".to_string())),
            applier,
            UpdateConfig::default(),
        );

        coordinator.check_now();
        assert_eq!(coordinator.status(), (UpdateStatus::Failed, None));
    }
}
