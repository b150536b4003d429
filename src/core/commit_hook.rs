// src/core/commit_hook.rs

//! Per-(database × standby) outbound replicator of content-addressed roots.
//!
//! A local commit updates the hook's `next_head`; a background worker pushes
//! every chunk reachable from it to the standby and compare-and-sets the
//! standby's root. Once `last_pushed_head == next_head` the hook is
//! caught-up, the definition the graceful-transition protocol relies on.
//!
//! Lock discipline: the worker never holds the hook's mutex across the
//! chunk push or the CAS. Response handling on that RPC path may force a
//! role change, which re-enters `set_role` and takes this mutex again.

use crate::core::ClusterError;
use crate::core::backoff::{Backoff, BackoffPolicy};
use crate::core::chunks::{DestinationDatabase, DestinationFactory, RootHash, SourceDatabase};
use crate::core::role::Role;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How often the worker re-evaluates deferred attempts without external
/// stimulus.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Invoked under the replicator's lock whenever the worker is about to
/// block, with the replicator's current caught-up state. Must do only
/// trivial work and must not call back into the replicator's public API.
pub type WaitNotifyFn = Box<dyn Fn(bool) + Send + Sync>;

/// A snapshot of the hook for the cluster status table.
#[derive(Debug, Clone)]
pub struct CommitHookStatus {
    pub caught_up: bool,
    /// Time since the last successful push while behind; zero when caught
    /// up; `None` when behind and nothing has ever been pushed.
    pub replication_lag: Option<Duration>,
    pub last_update: Option<DateTime<Utc>>,
    pub current_error: Option<String>,
}

struct HookState {
    role: Role,
    /// Zero means "ask the chunk store for the current root on next wakeup".
    next_head: RootHash,
    /// The root last acknowledged by the standby.
    last_pushed_head: RootHash,
    /// Gate for the next push attempt; unset means ready now.
    next_push_attempt: Option<Instant>,
    backoff: Backoff,
    /// Lazily acquired destination handle, cached after the first success.
    dest: Option<Arc<dyn DestinationDatabase>>,
    wait_notify: Option<WaitNotifyFn>,
    dropped: bool,
    shutdown: bool,
    last_success_at: Option<Instant>,
    last_update: Option<DateTime<Utc>>,
    current_error: Option<String>,
}

pub struct CommitHook {
    database: String,
    remote_name: String,
    remote_url: String,
    temp_dir: PathBuf,
    source: Arc<dyn SourceDatabase>,
    factory: Arc<dyn DestinationFactory>,
    state: Mutex<HookState>,
    wake: Notify,
}

impl CommitHook {
    pub fn new(
        database: String,
        remote_name: String,
        remote_url: String,
        temp_dir: PathBuf,
        source: Arc<dyn SourceDatabase>,
        factory: Arc<dyn DestinationFactory>,
        role: Role,
    ) -> Arc<Self> {
        Arc::new(Self {
            database,
            remote_name,
            remote_url,
            temp_dir,
            source,
            factory,
            state: Mutex::new(HookState {
                role,
                next_head: RootHash::ZERO,
                last_pushed_head: RootHash::ZERO,
                next_push_attempt: None,
                backoff: Backoff::new(BackoffPolicy::replication()),
                dest: None,
                wait_notify: None,
                dropped: false,
                shutdown: false,
                last_success_at: None,
                last_update: None,
                current_error: None,
            }),
            wake: Notify::new(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    /// Called on every local commit to this database.
    pub fn on_source_commit(&self, root: RootHash) {
        {
            let mut st = self.state.lock();
            if st.next_head != root {
                st.next_head = root;
                st.next_push_attempt = None;
            }
        }
        self.wake.notify_one();
    }

    /// Updated by the controller on every transition. Any move into or out
    /// of primary clears both heads so the worker re-syncs from the chunk
    /// store's truth on its next wakeup.
    pub fn set_role(&self, role: Role) {
        {
            let mut st = self.state.lock();
            if st.role != role {
                st.role = role;
                st.next_head = RootHash::ZERO;
                st.last_pushed_head = RootHash::ZERO;
                st.next_push_attempt = None;
                st.backoff.reset();
            }
        }
        self.wake.notify_one();
    }

    /// Installs (or clears, with `None`) the single wait-notify slot.
    /// Returns `false` without side effects when a callback is already
    /// installed. On a successful claim the callback is invoked once
    /// immediately, under the hook's lock, with the current caught-up state.
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

    /// Terminal: the database is gone; the hook stops attempting replication.
    pub fn database_was_dropped(&self) {
        self.state.lock().dropped = true;
        self.wake.notify_one();
    }

    pub fn graceful_stop(&self) {
        self.state.lock().shutdown = true;
        self.wake.notify_one();
    }

    pub fn status(&self) -> CommitHookStatus {
        let st = self.state.lock();
        let caught_up = Self::caught_up_locked(&st);
        CommitHookStatus {
            caught_up,
            replication_lag: if caught_up {
                Some(Duration::ZERO)
            } else {
                st.last_success_at.map(|t| t.elapsed())
            },
            last_update: st.last_update,
            current_error: st.current_error.clone(),
        }
    }

    fn caught_up_locked(st: &HookState) -> bool {
        st.role != Role::Primary || st.next_head == st.last_pushed_head
    }

    fn timer_ready(st: &HookState) -> bool {
        st.next_push_attempt.is_none_or(|t| t <= Instant::now())
    }

    fn should_replicate_locked(st: &HookState) -> bool {
        st.role == Role::Primary
            && !st.dropped
            && !st.next_head.is_zero()
            && st.next_head != st.last_pushed_head
            && Self::timer_ready(st)
    }

    /// The hook's single worker. Runs until the database is dropped or
    /// shutdown is signalled; on shutdown, one final best-effort push drains
    /// any pending head.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            database = %self.database,
            remote = %self.remote_name,
            "commit hook worker started"
        );
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        enum Step {
            Bootstrap,
            Replicate,
            Wait,
            FinalPush,
            Exit,
        }

        loop {
            let step = {
                let st = self.state.lock();
                if st.shutdown {
                    if Self::should_replicate_locked(&st) {
                        Step::FinalPush
                    } else {
                        Step::Exit
                    }
                } else if st.dropped {
                    Step::Exit
                } else if st.role == Role::Primary && st.next_head.is_zero() && Self::timer_ready(&st)
                {
                    Step::Bootstrap
                } else if Self::should_replicate_locked(&st) {
                    Step::Replicate
                } else {
                    if let Some(cb) = &st.wait_notify {
                        cb(Self::caught_up_locked(&st));
                    }
                    Step::Wait
                }
            };

            match step {
                Step::Bootstrap => self.bootstrap_head().await,
                Step::Replicate => self.replicate_once().await,
                Step::Wait => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tick.tick() => {}
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
                Step::FinalPush => {
                    self.replicate_once().await;
                    info!(
                        database = %self.database,
                        remote = %self.remote_name,
                        "commit hook worker exiting after final push"
                    );
                    return;
                }
                Step::Exit => {
                    info!(
                        database = %self.database,
                        remote = %self.remote_name,
                        "commit hook worker exiting"
                    );
                    return;
                }
            }
        }
    }

    /// A hook that just became primary has no head yet; read it from the
    /// source database.
    async fn bootstrap_head(&self) {
        let res = self.source.root().await;
        let mut st = self.state.lock();
        match res {
            Ok(root) => {
                if st.role == Role::Primary && st.next_head.is_zero() {
                    if root.is_zero() {
                        // Nothing committed yet; look again on a later tick.
                        st.next_push_attempt = Some(Instant::now() + TICK_INTERVAL);
                    } else {
                        st.next_head = root;
                    }
                }
            }
            Err(e) => {
                warn!(
                    database = %self.database,
                    "failed to read source root: {e}"
                );
                st.current_error = Some(e.to_string());
                let delay = st.backoff.next_delay();
                st.next_push_attempt = Some(Instant::now() + delay);
            }
        }
    }

    async fn replicate_once(&self) {
        let (to_push, cached) = {
            let st = self.state.lock();
            // The role may have moved since the decision to push was made.
            if st.role != Role::Primary {
                return;
            }
            (st.next_head, st.dest.clone())
        };

        let dest = match cached {
            Some(d) => d,
            None => match self.factory.connect(&self.remote_url, &self.database).await {
                Ok(d) => {
                    self.state.lock().dest = Some(d.clone());
                    d
                }
                Err(e) => {
                    warn!(
                        database = %self.database,
                        remote = %self.remote_name,
                        "cannot reach standby destination: {e}"
                    );
                    let mut st = self.state.lock();
                    st.current_error = Some(e.to_string());
                    let delay = st.backoff.next_delay();
                    st.next_push_attempt = Some(Instant::now() + delay);
                    return;
                }
            },
        };

        let result = self.push_and_commit(&dest, to_push).await;

        let mut st = self.state.lock();
        match result {
            Ok(()) => {
                st.last_pushed_head = to_push;
                st.next_push_attempt = None;
                st.backoff.reset();
                st.current_error = None;
                st.last_success_at = Some(Instant::now());
                st.last_update = Some(Utc::now());
                debug!(
                    database = %self.database,
                    remote = %self.remote_name,
                    head = %to_push,
                    "standby root updated"
                );
            }
            Err(e) => {
                warn!(
                    database = %self.database,
                    remote = %self.remote_name,
                    "replication step failed: {e}"
                );
                st.current_error = Some(e.to_string());
                if st.next_head == to_push {
                    let delay = st.backoff.next_delay();
                    st.next_push_attempt = Some(Instant::now() + delay);
                } else {
                    // A newer head arrived while we were pushing; retry it
                    // without waiting out the backoff.
                    st.next_push_attempt = None;
                }
            }
        }
    }

    async fn push_and_commit(
        &self,
        dest: &Arc<dyn DestinationDatabase>,
        to_push: RootHash,
    ) -> Result<(), ClusterError> {
        dest.pull_chunks(&self.temp_dir, self.source.clone(), to_push)
            .await?;
        let current = dest.root().await?;
        if !dest.commit_root(to_push, current).await? {
            // The standby's root moved between our read and the commit.
            // This control plane assumes it is the only writer.
            let actual = match dest.root().await {
                Ok(h) => h.to_string(),
                Err(_) => "unknown".to_string(),
            };
            return Err(ClusterError::DestinationRootMoved {
                expected: current.to_string(),
                actual,
            });
        }
        Ok(())
    }
}
