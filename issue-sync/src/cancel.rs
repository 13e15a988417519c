//! Cancellation signal threaded through every remote call.

use std::future::Future;

use tokio::sync::watch;

use crate::error::SyncError;

/// Cloneable cancellation token. Cancelling is sticky.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means every sender is gone, which cannot happen while `self` lives
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless cancellation arrives first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(SyncError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
