// src/core/notifier.rs

//! A single-writer/many-reader progress primitive.
//!
//! Readers register with [`ProgressNotifier::wait`] and are woken by the
//! first attempt that both began after their registration and recorded
//! success. Failed attempts put their waiters back, so a later successful
//! attempt wakes them. All mutating operations require external
//! serialization (the owning replicator's mutex); the returned
//! [`ProgressWaiter`] may be awaited concurrently with any notifier
//! operation.

use crate::core::ClusterError;
use tokio::sync::oneshot;

/// Waiters outstanding at `begin_attempt` time, snapshotted into the attempt.
#[derive(Debug, Default)]
pub struct Attempt {
    waiters: Vec<oneshot::Sender<()>>,
}

/// The awaitable half of a registered wait.
#[derive(Debug)]
pub struct ProgressWaiter {
    rx: oneshot::Receiver<()>,
}

impl ProgressWaiter {
    /// Blocks until an attempt begun after this waiter's registration
    /// records success. Callers bound the wait externally (timeout or
    /// select) to observe cancellation.
    pub async fn wait(self) -> Result<(), ClusterError> {
        self.rx.await.map_err(|_| {
            ClusterError::ReplicationError(
                "replication stopped before progress was made".to_string(),
            )
        })
    }
}

#[derive(Debug, Default)]
pub struct ProgressNotifier {
    waiters: Vec<oneshot::Sender<()>>,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter. The waiter is associated with the next attempt to
    /// begin after this call returns.
    pub fn wait(&mut self) -> ProgressWaiter {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        ProgressWaiter { rx }
    }

    /// Snapshots the currently outstanding waiters into the attempt and
    /// clears them from the notifier. Waiters registered afterwards belong
    /// to a later attempt.
    pub fn begin_attempt(&mut self) -> Attempt {
        Attempt {
            waiters: std::mem::take(&mut self.waiters),
        }
    }

    /// Wakes every waiter associated with the attempt. Idempotent.
    pub fn record_success(&mut self, attempt: &mut Attempt) {
        for tx in attempt.waiters.drain(..) {
            let _ = tx.send(());
        }
    }

    /// Restores the attempt's waiters so a later attempt's success wakes
    /// them. A no-op after `record_success` of the same attempt.
    pub fn record_failure(&mut self, attempt: &mut Attempt) {
        self.waiters.append(&mut attempt.waiters);
    }

    /// The number of waiters currently registered.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}
