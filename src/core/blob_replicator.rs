// src/core/blob_replicator.rs

//! Per-(peer × blob kind) outbound replicator of a versioned byte blob.
//!
//! The users-and-grants table and the branch access-control list replicate
//! as opaque blobs through a single unary RPC per update. The worker has the
//! same wait-until-ready-then-act skeleton as the commit hook, minus the
//! chunk push. Callers of `update_contents` get back a wait handle that
//! resolves when the submitted version has reached the peer.
//!
//! Lock discipline: the worker never holds the replicator's mutex across
//! the RPC; the client interceptor on that path may force a role change
//! that re-enters `set_role`.

use crate::core::ClusterError;
use crate::core::backoff::{Backoff, BackoffPolicy};
use crate::core::client::BlobTarget;
use crate::core::commit_hook::WaitNotifyFn;
use crate::core::notifier::{ProgressNotifier, ProgressWaiter};
use crate::core::role::Role;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct FailureSignal {
    fail_fast: bool,
    message: Option<String>,
}

/// Handle returned by [`BlobReplicator::update_contents`]. Awaiting it
/// blocks until the submitted version reaches the peer. When the
/// replicator's circuit breaker has tripped (a failure followed the armed
/// flag), the wait resolves with the replication error instead of blocking
/// until the caller's deadline.
pub struct ReplicationWait {
    inner: WaitInner,
}

enum WaitInner {
    Ready,
    Pending {
        waiter: ProgressWaiter,
        failures: watch::Receiver<FailureSignal>,
    },
}

impl ReplicationWait {
    fn ready() -> Self {
        Self {
            inner: WaitInner::Ready,
        }
    }

    pub async fn wait(self) -> Result<(), ClusterError> {
        match self.inner {
            WaitInner::Ready => Ok(()),
            WaitInner::Pending {
                waiter,
                mut failures,
            } => {
                let mut fut = std::pin::pin!(waiter.wait());
                loop {
                    tokio::select! {
                        res = &mut fut => return res,
                        changed = failures.changed() => match changed {
                            Ok(()) => {
                                let sig = failures.borrow_and_update().clone();
                                if sig.fail_fast {
                                    return Err(ClusterError::ReplicationError(
                                        sig.message.unwrap_or_else(|| {
                                            "blob replication failing".to_string()
                                        }),
                                    ));
                                }
                            }
                            // Replicator gone; the waiter resolves with its
                            // own error.
                            Err(_) => return fut.await,
                        },
                    }
                }
            }
        }
    }
}

struct BlobState {
    role: Role,
    contents: Bytes,
    /// Monotonically increasing; zero means uninitialized.
    version: u64,
    /// The last version the peer acknowledged.
    replicated_version: u64,
    next_attempt: Option<Instant>,
    backoff: Backoff,
    shutdown: bool,
    wait_notify: Option<WaitNotifyFn>,
    notifier: ProgressNotifier,
    /// Armed by a failed attempt, cleared by a success; a failure while
    /// armed fails outstanding waits fast.
    fail_fast_armed: bool,
    last_error: Option<String>,
}

pub struct BlobReplicator {
    remote_name: String,
    remote_url: String,
    /// Which blob this replicator carries, for logging and status labels.
    label: &'static str,
    target: Arc<dyn BlobTarget>,
    state: Mutex<BlobState>,
    wake: Notify,
    failures: watch::Sender<FailureSignal>,
}

impl BlobReplicator {
    pub fn new(
        remote_name: String,
        remote_url: String,
        label: &'static str,
        target: Arc<dyn BlobTarget>,
        role: Role,
    ) -> Arc<Self> {
        let (failures, _) = watch::channel(FailureSignal::default());
        Arc::new(Self {
            remote_name,
            remote_url,
            label,
            target,
            state: Mutex::new(BlobState {
                role,
                contents: Bytes::new(),
                version: 0,
                replicated_version: 0,
                next_attempt: None,
                backoff: Backoff::new(BackoffPolicy::replication()),
                shutdown: false,
                wait_notify: None,
                notifier: ProgressNotifier::new(),
                fail_fast_armed: false,
                last_error: None,
            }),
            wake: Notify::new(),
            failures,
        })
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Atomically installs new contents and wakes the worker. The returned
    /// handle resolves when this version (or a later one) has reached the
    /// peer.
    pub fn update_contents(&self, contents: Bytes, version: u64) -> ReplicationWait {
        let wait = {
            let mut st = self.state.lock();
            st.contents = contents;
            st.version = version;
            st.next_attempt = None;
            if version <= st.replicated_version {
                ReplicationWait::ready()
            } else {
                let waiter = st.notifier.wait();
                let mut failures = self.failures.subscribe();
                failures.mark_unchanged();
                ReplicationWait {
                    inner: WaitInner::Pending { waiter, failures },
                }
            }
        };
        self.wake.notify_one();
        wait
    }

    /// Updated by the controller on every transition. Any move into or out
    /// of primary forgets the peer acknowledgement so the current contents
    /// re-replicate once this server is primary again.
    pub fn set_role(&self, role: Role) {
        {
            let mut st = self.state.lock();
            if st.role != role {
                st.role = role;
                st.replicated_version = 0;
                st.next_attempt = None;
                st.backoff.reset();
            }
        }
        self.wake.notify_one();
    }

    /// Same single-slot claim discipline as the commit hook.
    pub fn set_wait_notify(&self, cb: Option<WaitNotifyFn>) -> bool {
        let mut st = self.state.lock();
        match cb {
            Some(cb) => {
                if st.wait_notify.is_some() {
                    return false;
                }
                cb(Self::caught_up_locked(&st));
                st.wait_notify = Some(cb);
                true
            }
            None => {
                st.wait_notify = None;
                true
            }
        }
    }

    pub fn is_caught_up(&self) -> bool {
        Self::caught_up_locked(&self.state.lock())
    }

    pub fn graceful_stop(&self) {
        self.state.lock().shutdown = true;
        self.wake.notify_one();
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    fn caught_up_locked(st: &BlobState) -> bool {
        st.role != Role::Primary || st.version == st.replicated_version
    }

    fn should_replicate_locked(st: &BlobState) -> bool {
        st.role == Role::Primary
            && st.version != 0
            && st.version != st.replicated_version
            && st.next_attempt.is_none_or(|t| t <= Instant::now())
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            remote = %self.remote_name,
            blob = self.label,
            "blob replicator worker started"
        );

        enum Step {
            Replicate,
            SkipEmpty,
            Wait,
            Exit,
        }

        loop {
            let step = {
                let st = self.state.lock();
                if st.shutdown {
                    Step::Exit
                } else if Self::should_replicate_locked(&st) {
                    if st.contents.is_empty() {
                        Step::SkipEmpty
                    } else {
                        Step::Replicate
                    }
                } else {
                    if let Some(cb) = &st.wait_notify {
                        cb(Self::caught_up_locked(&st));
                    }
                    Step::Wait
                }
            };

            match step {
                // An empty blob is trivially replicated; shipping it would
                // wipe the standby's table with uninitialized contents.
                Step::SkipEmpty => {
                    let mut st = self.state.lock();
                    if st.contents.is_empty() {
                        let mut attempt = st.notifier.begin_attempt();
                        st.replicated_version = st.version;
                        st.backoff.reset();
                        st.fail_fast_armed = false;
                        st.last_error = None;
                        st.notifier.record_success(&mut attempt);
                    }
                }
                Step::Replicate => self.replicate_once().await,
                Step::Wait => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        res = shutdown_rx.recv() => {
                            match res {
                                Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                                    self.state.lock().shutdown = true;
                                }
                                Err(broadcast::error::RecvError::Lagged(_)) => {}
                            }
                        }
                    }
                }
                Step::Exit => {
                    info!(
                        remote = %self.remote_name,
                        blob = self.label,
                        "blob replicator worker exiting"
                    );
                    return;
                }
            }
        }
    }

    async fn replicate_once(self: &Arc<Self>) {
        let (contents, version, mut attempt) = {
            let mut st = self.state.lock();
            (st.contents.clone(), st.version, st.notifier.begin_attempt())
        };

        let result = self.target.update(contents).await;

        let mut st = self.state.lock();
        match result {
            Ok(()) => {
                st.replicated_version = version;
                st.backoff.reset();
                st.next_attempt = None;
                st.fail_fast_armed = false;
                st.last_error = None;
                st.notifier.record_success(&mut attempt);
                debug!(
                    remote = %self.remote_name,
                    blob = self.label,
                    version,
                    "blob replicated"
                );
            }
            Err(e) => {
                warn!(
                    remote = %self.remote_name,
                    blob = self.label,
                    version,
                    "blob replication failed: {e}"
                );
                st.notifier.record_failure(&mut attempt);
                st.last_error = Some(e.to_string());
                let was_armed = st.fail_fast_armed;
                st.fail_fast_armed = true;
                let delay = st.backoff.next_delay();
                st.next_attempt = Some(Instant::now() + delay);
                drop(st);

                if was_armed {
                    let message = e.to_string();
                    self.failures.send_modify(|sig| {
                        sig.fail_fast = true;
                        sig.message = Some(message);
                    });
                }

                // Delayed broadcaster: clear the timer and wake the worker
                // once the backoff elapses.
                let replicator = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    replicator.state.lock().next_attempt = None;
                    replicator.wake.notify_one();
                });
            }
        }
    }
}
