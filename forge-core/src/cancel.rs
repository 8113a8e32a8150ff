//! Cooperative cancellation for the resolution pipeline.
//!
//! Driver assembly fans out one connection attempt per node; cancelling the
//! pipeline must make in-flight attempts fail fast and be recorded per node
//! rather than silently dropping entries from the result.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable cancellation token.
///
/// All clones observe the same state; any clone may trigger cancellation.
#[derive(Debug, Clone)]
pub struct Cancel {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Cancel {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Trigger cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been triggered.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender gone without cancelling; treat as never-cancelled.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Cancel {
    fn default() -> Self {
        Self::new()
    }
}
