//! Cooperative cancellation primitive.
//!
//! A watch channel with a boolean payload: the scheduler holds the source,
//! workers and sessions hold cloned tokens and observe it at I/O boundaries.

use tokio::sync::watch;

/// The cancelling side. Owned by the scheduler (or the signal handler).
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// The observing side. Cheap to clone; one per worker and session.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Hand out an observer token.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal cancellation. Every token observes it at its next check.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Non-blocking check, used before issuing the next command or commit.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is signalled. If the source is gone without
    /// signalling, cancellation can never arrive: park forever so `select!`
    /// arms fall through to the real work.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// A token that can never be cancelled, for standalone runs.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open.
        std::mem::forget(tx);
        Self { rx }
    }
}
