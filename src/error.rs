//! Coordinator error categories.
//!
//! Each variant maps to one handling policy: invariant violations fall back
//! to a full rebuild, engine failures surface to the caller without domain
//! mutation, user constraints become transient toasts, rollbacks mean the
//! domain was reverted before the error was returned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("resource missing: {0}")]
    ResourceMissing(String),

    #[error("{0}")]
    UserConstraint(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rolled back: {0}")]
    RolledBack(String),
}

pub type Result<T> = std::result::Result<T, CoordError>;
