// src/core/drop_replicator.rs

//! Fire-and-retry outbound replication of DROP DATABASE.
//!
//! A drop is replicated to each peer by a cancelable job that retries with
//! exponential backoff until the peer acknowledges, refuses outright, or
//! the job is cancelled. Re-creating a database of the same name cancels
//! and awaits the outstanding job before new commit hooks register, so a
//! fresh database can never race its own deletion on the standby.

use crate::core::ClusterError;
use crate::core::backoff::{Backoff, BackoffPolicy};
use crate::core::client::DropDatabaseTarget;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct DropDatabaseReplicator {
    remote_name: String,
    target: Arc<dyn DropDatabaseTarget>,
}

impl DropDatabaseReplicator {
    pub fn new(remote_name: String, target: Arc<dyn DropDatabaseTarget>) -> Arc<Self> {
        Arc::new(Self {
            remote_name,
            target,
        })
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Drives one drop to completion. Returns when the peer acknowledged
    /// the drop, the database was already absent, the peer refused with a
    /// precondition failure, or the job was cancelled.
    pub async fn replicate_drop(&self, database: &str, mut cancel_rx: broadcast::Receiver<()>) {
        let mut backoff = Backoff::new(BackoffPolicy::drop_database());
        loop {
            let attempt = self.target.drop_database(database);
            let result = tokio::select! {
                res = attempt => res,
                _ = cancel_rx.recv() => {
                    info!(
                        database,
                        remote = %self.remote_name,
                        "drop replication cancelled"
                    );
                    return;
                }
            };

            match result {
                Ok(()) => {
                    info!(database, remote = %self.remote_name, "drop replicated");
                    return;
                }
                Err(ClusterError::NotFound(_)) => {
                    debug!(
                        database,
                        remote = %self.remote_name,
                        "database already absent on peer"
                    );
                    return;
                }
                Err(ClusterError::FailedPrecondition(msg)) => {
                    info!(
                        database,
                        remote = %self.remote_name,
                        "peer will not replicate drop: {msg}"
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        database,
                        remote = %self.remote_name,
                        "drop replication attempt failed: {e}"
                    );
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel_rx.recv() => {
                            info!(
                                database,
                                remote = %self.remote_name,
                                "drop replication cancelled during backoff"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}
