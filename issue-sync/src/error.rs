//! Error taxonomy for sync operations.
//!
//! Orchestration code returns `anyhow::Result`; these variants ride inside
//! the `anyhow::Error` so callers can `downcast_ref::<SyncError>()`.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("not initialized: no issue store found (run `issue-sync init --repo owner/repo`)")]
    NotInitialized,
    #[error("store is locked by another process ({owner}); gave up after {}ms. Lock path: {}", timeout.as_millis(), path.display())]
    Locked {
        path: PathBuf,
        owner: String,
        timeout: Duration,
    },
    #[error("issue not found: {0}")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

/// A local file that could not be loaded. Collected, never fatal by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Path relative to the store root
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// True when the error chain carries a cancellation.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<SyncError>(), Some(SyncError::Cancelled))
}
