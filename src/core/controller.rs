// src/core/controller.rs

//! The controller owns the authoritative `(role, epoch)` pair and drives
//! every role transition.
//!
//! It registers the outbound replicators, pushes role changes into them and
//! into both RPC interceptors, persists the pair on every successful
//! transition, and enforces the graceful-handoff protocol: a graceful move
//! from primary to standby fences writes, drains connections, and waits for
//! every commit hook and blob replicator to report caught-up before the new
//! role takes effect.

use crate::config::{ClusterConfig, RemoteConfig};
use crate::core::ClusterError;
use crate::core::blob_replicator::{BlobReplicator, ReplicationWait};
use crate::core::chunks::{DestinationFactory, RootHash};
use crate::core::client::{BranchControlEndpoint, PeerClient, UsersAndGrantsEndpoint};
use crate::core::commit_hook::{CommitHook, WaitNotifyFn};
use crate::core::drop_replicator::DropDatabaseReplicator;
use crate::core::engine::{SourceDatabaseProvider, SqlEngineHooks, SystemVariablesSink};
use crate::core::interceptor::{ClientInterceptor, ServerInterceptor};
use crate::core::persistence::{RoleStateFile, resolve_bootstrap};
use crate::core::role::{Epoch, Role, TransitionCheck, check_transition};
use crate::server::auth::TokenSource;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::try_join_all;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use url::Url;

/// Label carried by users-and-grants outcomes in transition results.
pub const USERS_AND_GRANTS_DATABASE: &str = "mysql";
/// Label carried by branch-control outcomes in transition results.
pub const BRANCH_CONTROL_DATABASE: &str = "branch_control";

/// Arguments to a role transition beyond the target pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionOptions {
    /// Wait for replication to drain before finalizing a move to standby.
    pub graceful: bool,
    /// Quorum for a graceful transition: how many standbys must be fully
    /// caught up. Zero requires every individual replica to be caught up.
    pub min_caught_up_standbys: u32,
    /// Connection to spare when draining sessions (the operator's own).
    pub save_conn_id: Option<u32>,
}

/// Per-replica result of a graceful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaOutcome {
    pub database: String,
    pub remote: String,
    pub remote_url: String,
    pub caught_up: bool,
}

/// The value returned from the transition stored procedures.
#[derive(Debug, Clone)]
pub struct RoleTransitionResult {
    pub changed_role: bool,
    pub outcomes: Vec<ReplicaOutcome>,
}

/// One row of the cluster status table.
#[derive(Debug, Clone)]
pub struct ClusterStatusRow {
    pub database: String,
    pub standby_remote: String,
    pub role: String,
    pub epoch: Epoch,
    pub replication_lag_millis: Option<u64>,
    pub last_update: Option<DateTime<Utc>>,
    pub current_error: Option<String>,
}

/// External collaborators the controller drives.
pub struct ControllerDeps {
    pub engine: Arc<dyn SqlEngineHooks>,
    pub sysvars: Arc<dyn SystemVariablesSink>,
    pub sources: Arc<dyn SourceDatabaseProvider>,
    pub factory: Arc<dyn DestinationFactory>,
    pub tokens: Arc<dyn TokenSource>,
}

struct ControllerState {
    role: Role,
    epoch: Epoch,
    /// Guards against overlapping graceful transitions.
    transition_in_flight: bool,
}

struct DropJob {
    cancel_tx: broadcast::Sender<()>,
    tasks: JoinSet<()>,
}

pub struct Controller {
    state: Mutex<ControllerState>,
    commit_hooks: Mutex<Vec<Arc<CommitHook>>>,
    users_replicators: Vec<Arc<BlobReplicator>>,
    branch_replicators: Vec<Arc<BlobReplicator>>,
    drop_replicators: Vec<Arc<DropDatabaseReplicator>>,
    engine: Arc<dyn SqlEngineHooks>,
    sysvars: Arc<dyn SystemVariablesSink>,
    sources: Arc<dyn SourceDatabaseProvider>,
    factory: Arc<dyn DestinationFactory>,
    client_interceptor: Arc<ClientInterceptor>,
    server_interceptor: Arc<ServerInterceptor>,
    role_storage: RoleStateFile,
    remotes: Vec<RemoteConfig>,
    temp_dir: PathBuf,
    graceful_timeout: Duration,
    users_version: AtomicU64,
    branch_version: AtomicU64,
    drop_jobs: DashMap<String, DropJob>,
    shutdown_tx: broadcast::Sender<()>,
    started: AtomicBool,
}

impl Controller {
    /// Builds a controller from configuration, resolving the bootstrap
    /// role/epoch (persisted state wins) and wiring the per-peer clients
    /// and replicators. No workers run until [`Controller::start`].
    pub fn new(
        config: &ClusterConfig,
        data_dir: &Path,
        deps: ControllerDeps,
    ) -> Result<Arc<Self>, ClusterError> {
        config.validate()?;
        let role_storage = RoleStateFile::new(data_dir.join(&config.state_file));
        let persisted = role_storage.load()?;
        let (role, epoch) =
            resolve_bootstrap(persisted, &config.bootstrap_role, config.bootstrap_epoch)?;
        info!(%role, epoch, "cluster controller starting");

        let client_interceptor = Arc::new(ClientInterceptor::new(role, epoch));
        let server_interceptor = Arc::new(ServerInterceptor::new(role, epoch));
        let (shutdown_tx, _) = broadcast::channel(4);

        let mut users_replicators = Vec::new();
        let mut branch_replicators = Vec::new();
        let mut drop_replicators = Vec::new();
        for remote in &config.standby_remotes {
            let client = PeerClient::new(
                remote.name.clone(),
                &remote.url,
                config.rpc_timeout,
                client_interceptor.clone(),
                deps.tokens.clone(),
            )?;
            users_replicators.push(BlobReplicator::new(
                remote.name.clone(),
                remote.url.clone(),
                "users-and-grants",
                Arc::new(UsersAndGrantsEndpoint(client.clone())),
                role,
            ));
            branch_replicators.push(BlobReplicator::new(
                remote.name.clone(),
                remote.url.clone(),
                "branch-control",
                Arc::new(BranchControlEndpoint(client.clone())),
                role,
            ));
            drop_replicators.push(DropDatabaseReplicator::new(remote.name.clone(), client));
        }

        let controller = Arc::new_cyclic(|weak: &Weak<Controller>| {
            let w = weak.clone();
            client_interceptor.install_force_role(Arc::new(move |r, e| {
                if let Some(c) = w.upgrade() {
                    c.force_role(r, e);
                }
            }));
            let w = weak.clone();
            server_interceptor.install_force_role(Arc::new(move |r, e| {
                if let Some(c) = w.upgrade() {
                    c.force_role(r, e);
                }
            }));

            Controller {
                state: Mutex::new(ControllerState {
                    role,
                    epoch,
                    transition_in_flight: false,
                }),
                commit_hooks: Mutex::new(Vec::new()),
                users_replicators,
                branch_replicators,
                drop_replicators,
                engine: deps.engine,
                sysvars: deps.sysvars,
                sources: deps.sources,
                factory: deps.factory,
                client_interceptor,
                server_interceptor,
                role_storage,
                remotes: config.standby_remotes.clone(),
                temp_dir: PathBuf::from(&config.temp_dir),
                graceful_timeout: config.graceful_transition_timeout,
                users_version: AtomicU64::new(0),
                branch_version: AtomicU64::new(0),
                drop_jobs: DashMap::new(),
                shutdown_tx,
                started: AtomicBool::new(false),
            }
        });

        // Fence the engine to match the resolved role before anything runs.
        controller
            .engine
            .set_provider_read_only(role != Role::Primary);
        controller.sysvars.set_role_and_epoch(role, epoch);
        Ok(controller)
    }

    /// Spawns the blob replicator workers. Must be called inside the
    /// runtime; calling it more than once is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for replicator in self
            .users_replicators
            .iter()
            .chain(&self.branch_replicators)
        {
            tokio::spawn(replicator.clone().run(self.shutdown_tx.subscribe()));
        }
    }

    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    pub fn epoch(&self) -> Epoch {
        self.state.lock().epoch
    }

    pub fn role_and_epoch(&self) -> (Role, Epoch) {
        let st = self.state.lock();
        (st.role, st.epoch)
    }

    pub fn client_interceptor(&self) -> Arc<ClientInterceptor> {
        self.client_interceptor.clone()
    }

    pub fn server_interceptor(&self) -> Arc<ServerInterceptor> {
        self.server_interceptor.clone()
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    // --- Replication fan-in from the SQL engine ---

    /// A local commit to `database` produced `root`.
    pub fn database_committed(&self, database: &str, root: RootHash) {
        for hook in self.commit_hooks.lock().iter() {
            if hook.database() == database {
                hook.on_source_commit(root);
            }
        }
    }

    /// The users-and-grants table changed; replicate the serialized form.
    pub fn update_users_and_grants(&self, contents: Bytes) -> ReplicationWaitSet {
        let version = self.users_version.fetch_add(1, Ordering::SeqCst) + 1;
        let waits = self
            .users_replicators
            .iter()
            .map(|r| r.update_contents(contents.clone(), version))
            .collect();
        ReplicationWaitSet { waits }
    }

    /// The branch access-control list changed; replicate the serialized form.
    pub fn update_branch_control(&self, contents: Bytes) -> ReplicationWaitSet {
        let version = self.branch_version.fetch_add(1, Ordering::SeqCst) + 1;
        let waits = self
            .branch_replicators
            .iter()
            .map(|r| r.update_contents(contents.clone(), version))
            .collect();
        ReplicationWaitSet { waits }
    }

    // --- Database lifecycle ---

    /// Registers commit hooks for a newly visible local database, first
    /// cancelling and awaiting any outstanding drop replication of the same
    /// name so a recreate can never race its own deletion.
    pub async fn database_created(&self, database: &str) -> Result<(), ClusterError> {
        self.cancel_drop_replication(database).await;
        self.register_commit_hooks(database)
    }

    /// Unregisters the database's commit hooks and, on a primary, spawns
    /// the outbound drop-replication job.
    pub async fn database_dropped(&self, database: &str) {
        let removed: Vec<Arc<CommitHook>> = {
            let mut hooks = self.commit_hooks.lock();
            let (gone, keep) = hooks
                .drain(..)
                .partition(|h: &Arc<CommitHook>| h.database() == database);
            *hooks = keep;
            gone
        };
        for hook in &removed {
            hook.database_was_dropped();
        }

        if self.role() != Role::Primary || self.drop_replicators.is_empty() {
            return;
        }
        // Only one job per name can be outstanding.
        self.cancel_drop_replication(database).await;

        let (cancel_tx, _) = broadcast::channel(1);
        let mut tasks = JoinSet::new();
        for replicator in &self.drop_replicators {
            let replicator = replicator.clone();
            let db = database.to_string();
            let cancel_rx = cancel_tx.subscribe();
            tasks.spawn(async move { replicator.replicate_drop(&db, cancel_rx).await });
        }
        self.drop_jobs
            .insert(database.to_string(), DropJob { cancel_tx, tasks });
    }

    /// Cancels and awaits any outstanding drop job for `database`.
    pub async fn cancel_drop_replication(&self, database: &str) {
        if let Some((_, mut job)) = self.drop_jobs.remove(database) {
            let _ = job.cancel_tx.send(());
            while job.tasks.join_next().await.is_some() {}
        }
    }

    fn register_commit_hooks(&self, database: &str) -> Result<(), ClusterError> {
        let source = self.sources.database(database).ok_or_else(|| {
            ClusterError::Internal(format!("cannot replicate unknown database '{database}'"))
        })?;
        let role = self.role();
        let mut created = Vec::new();
        for remote in &self.remotes {
            created.push(CommitHook::new(
                database.to_string(),
                remote.name.clone(),
                remote.url.clone(),
                self.temp_dir.clone(),
                source.clone(),
                self.factory.clone(),
                role,
            ));
        }
        self.commit_hooks.lock().extend(created.iter().cloned());
        for hook in created {
            tokio::spawn(hook.run(self.shutdown_tx.subscribe()));
        }
        Ok(())
    }

    // --- Role transitions ---

    /// Applies a `(role, epoch)` transition. Graceful moves to standby wait
    /// for replication; everything else applies immediately.
    pub async fn set_role_and_epoch(
        &self,
        role: Role,
        epoch: Epoch,
        opts: TransitionOptions,
    ) -> Result<RoleTransitionResult, ClusterError> {
        if opts.graceful && role == Role::Standby {
            return self
                .graceful_transition_to_standby(epoch, opts.min_caught_up_standbys, opts.save_conn_id)
                .await;
        }
        let changed_role =
            self.set_role_and_epoch_nongraceful(role, epoch, opts.save_conn_id, opts.graceful)?;
        Ok(RoleTransitionResult {
            changed_role,
            outcomes: Vec::new(),
        })
    }

    /// Synchronous forced transition driven by the interceptors. The
    /// assertion may lose to the local state (epoch rules); that is not an
    /// error here, only a log line.
    pub fn force_role(&self, role: Role, epoch: Epoch) {
        match self.set_role_and_epoch_nongraceful(role, epoch, None, false) {
            Ok(true) => {
                warn!(new_role = %role, new_epoch = epoch, "role forcibly changed by peer assertion");
            }
            Ok(false) => {}
            Err(e) => {
                warn!("forced role change to ({role}, {epoch}) refused: {e}");
            }
        }
    }

    fn set_role_and_epoch_nongraceful(
        &self,
        role: Role,
        epoch: Epoch,
        save_conn_id: Option<u32>,
        graceful: bool,
    ) -> Result<bool, ClusterError> {
        let mut st = self.state.lock();
        match check_transition(st.role, st.epoch, role, epoch, graceful)? {
            TransitionCheck::NoOp => return Ok(false),
            TransitionCheck::Proceed => {}
        }
        let changed_role = st.role != role;
        info!(
            old_role = %st.role,
            old_epoch = st.epoch,
            new_role = %role,
            new_epoch = epoch,
            "applying role transition"
        );
        match role {
            Role::Primary => self.engine.set_provider_read_only(false),
            Role::Standby | Role::DetectedBrokenConfig => {
                self.engine.set_provider_read_only(true);
            }
        }
        self.kill_all_except(save_conn_id);
        st.role = role;
        st.epoch = epoch;
        self.fan_out_transition(role, epoch);
        Ok(changed_role)
    }

    /// Pushes an applied transition into the system variables, both
    /// interceptors, every replicator, and the state file.
    fn fan_out_transition(&self, role: Role, epoch: Epoch) {
        self.sysvars.set_role_and_epoch(role, epoch);
        self.client_interceptor.set_role_and_epoch(role, epoch);
        self.server_interceptor.set_role_and_epoch(role, epoch);
        for hook in self.commit_hooks.lock().iter() {
            hook.set_role(role);
        }
        for replicator in self
            .users_replicators
            .iter()
            .chain(&self.branch_replicators)
        {
            replicator.set_role(role);
        }
        if let Err(e) = self.role_storage.save(role, epoch) {
            error!("failed to persist cluster role: {e}");
        }
    }

    async fn graceful_transition_to_standby(
        &self,
        epoch: Epoch,
        min_caught_up: u32,
        save_conn_id: Option<u32>,
    ) -> Result<RoleTransitionResult, ClusterError> {
        let (before_role, before_epoch) = {
            let mut st = self.state.lock();
            match check_transition(st.role, st.epoch, Role::Standby, epoch, true)? {
                TransitionCheck::NoOp => {
                    return Ok(RoleTransitionResult {
                        changed_role: false,
                        outcomes: Vec::new(),
                    });
                }
                TransitionCheck::Proceed => {}
            }
            if st.role != Role::Primary {
                // Nothing replicates outward; apply the epoch bump directly.
                drop(st);
                let changed_role =
                    self.set_role_and_epoch_nongraceful(Role::Standby, epoch, save_conn_id, true)?;
                return Ok(RoleTransitionResult {
                    changed_role,
                    outcomes: Vec::new(),
                });
            }
            if st.transition_in_flight {
                return Err(ClusterError::ConcurrentTransition);
            }
            st.transition_in_flight = true;
            (st.role, st.epoch)
        };

        let result = self.graceful_to_standby_inner(save_conn_id, min_caught_up).await;

        match result {
            Ok(outcomes) => {
                let mut st = self.state.lock();
                st.transition_in_flight = false;
                if (st.role, st.epoch) != (before_role, before_epoch) {
                    drop(st);
                    // Another transition won while we were waiting; leave
                    // its decision in place but keep writes fenced.
                    self.engine.set_provider_read_only(true);
                    self.kill_all_except(save_conn_id);
                    return Err(ClusterError::ConcurrentTransition);
                }
                info!(
                    old_epoch = before_epoch,
                    new_epoch = epoch,
                    "graceful transition to standby complete"
                );
                st.role = Role::Standby;
                st.epoch = epoch;
                self.fan_out_transition(Role::Standby, epoch);
                Ok(RoleTransitionResult {
                    changed_role: true,
                    outcomes,
                })
            }
            Err(e) => {
                self.state.lock().transition_in_flight = false;
                // Writes stay fenced after a failed handoff; the operator
                // decides whether to retry or resume as primary.
                self.engine.set_provider_read_only(true);
                self.kill_all_except(save_conn_id);
                Err(e)
            }
        }
    }

    async fn graceful_to_standby_inner(
        &self,
        save_conn_id: Option<u32>,
        min_caught_up: u32,
    ) -> Result<Vec<ReplicaOutcome>, ClusterError> {
        // Fence new writes, then drain transactions that could still write.
        self.engine.set_provider_read_only(true);
        self.kill_all_except(save_conn_id);

        let outcomes = self.wait_for_replication().await?;
        evaluate_caught_up(&outcomes, min_caught_up)?;
        Ok(outcomes)
    }

    /// Claims every replicator's wait-notify slot, waits for all of them to
    /// report caught-up under one shared deadline, and always clears every
    /// slot before returning.
    async fn wait_for_replication(&self) -> Result<Vec<ReplicaOutcome>, ClusterError> {
        enum Target {
            Hook(Arc<CommitHook>),
            Blob(Arc<BlobReplicator>),
        }

        let mut targets: Vec<(Target, ReplicaOutcome)> = Vec::new();
        for hook in self.commit_hooks.lock().iter() {
            targets.push((
                Target::Hook(hook.clone()),
                ReplicaOutcome {
                    database: hook.database().to_string(),
                    remote: hook.remote_name().to_string(),
                    remote_url: hook.remote_url().to_string(),
                    caught_up: false,
                },
            ));
        }
        for replicator in &self.users_replicators {
            targets.push((
                Target::Blob(replicator.clone()),
                ReplicaOutcome {
                    database: USERS_AND_GRANTS_DATABASE.to_string(),
                    remote: replicator.remote_name().to_string(),
                    remote_url: replicator.remote_url().to_string(),
                    caught_up: false,
                },
            ));
        }
        for replicator in &self.branch_replicators {
            targets.push((
                Target::Blob(replicator.clone()),
                ReplicaOutcome {
                    database: BRANCH_CONTROL_DATABASE.to_string(),
                    remote: replicator.remote_name().to_string(),
                    remote_url: replicator.remote_url().to_string(),
                    caught_up: false,
                },
            ));
        }

        let total = targets.len();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<usize>();
        let caught_flags: Vec<Arc<AtomicBool>> =
            (0..total).map(|_| Arc::new(AtomicBool::new(false))).collect();

        // Claim phase. A failed claim means someone else is already waiting
        // on that replicator: unwind every claim already taken and fail.
        let mut claimed: Vec<usize> = Vec::new();
        for (i, (target, _)) in targets.iter().enumerate() {
            let caught = caught_flags[i].clone();
            let recorded = Arc::new(AtomicBool::new(false));
            let tx = done_tx.clone();
            let cb: WaitNotifyFn = Box::new(move |is_caught_up: bool| {
                // Runs under the replicator's lock: record and signal, no
                // calls back into the replicator.
                if is_caught_up && !recorded.swap(true, Ordering::SeqCst) {
                    caught.store(true, Ordering::SeqCst);
                    let _ = tx.send(i);
                }
            });
            let ok = match target {
                Target::Hook(h) => h.set_wait_notify(Some(cb)),
                Target::Blob(b) => b.set_wait_notify(Some(cb)),
            };
            if !ok {
                for &j in &claimed {
                    match &targets[j].0 {
                        Target::Hook(h) => h.set_wait_notify(None),
                        Target::Blob(b) => b.set_wait_notify(None),
                    };
                }
                return Err(ClusterError::Internal(
                    "a replicator's wait-notify slot is already claimed; aborting transition"
                        .to_string(),
                ));
            }
            claimed.push(i);
        }
        drop(done_tx);

        let deadline = tokio::time::Instant::now() + self.graceful_timeout;
        let mut remaining = total;
        while remaining > 0 {
            match tokio::time::timeout_at(deadline, done_rx.recv()).await {
                Ok(Some(_)) => remaining -= 1,
                Ok(None) | Err(_) => break,
            }
        }

        // The callbacks can never run again once every slot is cleared;
        // signals already queued are dropped with the receiver.
        for (target, _) in &targets {
            match target {
                Target::Hook(h) => h.set_wait_notify(None),
                Target::Blob(b) => b.set_wait_notify(None),
            };
        }

        Ok(targets
            .into_iter()
            .enumerate()
            .map(|(i, (_, mut outcome))| {
                outcome.caught_up = caught_flags[i].load(Ordering::SeqCst);
                outcome
            })
            .collect())
    }

    fn kill_all_except(&self, save_conn_id: Option<u32>) {
        let mut ids = Vec::new();
        self.engine.iter_sessions(&mut |id| ids.push(id));
        for id in ids {
            if Some(id) != save_conn_id {
                self.engine.kill_query(id);
                self.engine.kill_connection(id);
            }
        }
    }

    // --- Observation ---

    /// One row per registered commit hook, for the cluster status table.
    pub fn status(&self) -> Vec<ClusterStatusRow> {
        let (role, epoch) = self.role_and_epoch();
        self.commit_hooks
            .lock()
            .iter()
            .map(|hook| {
                let s = hook.status();
                ClusterStatusRow {
                    database: hook.database().to_string(),
                    standby_remote: hook.remote_name().to_string(),
                    role: role.to_string(),
                    epoch,
                    replication_lag_millis: s.replication_lag.map(|d| d.as_millis() as u64),
                    last_update: s.last_update,
                    current_error: s.current_error,
                }
            })
            .collect()
    }

    /// Stops every worker and cancels outstanding drop jobs. Each commit
    /// hook attempts one final best-effort push before exiting.
    pub async fn graceful_shutdown(&self) {
        info!("cluster controller shutting down");
        let _ = self.shutdown_tx.send(());
        for hook in self.commit_hooks.lock().iter() {
            hook.graceful_stop();
        }
        for replicator in self
            .users_replicators
            .iter()
            .chain(&self.branch_replicators)
        {
            replicator.graceful_stop();
        }
        let outstanding: Vec<String> = self.drop_jobs.iter().map(|e| e.key().clone()).collect();
        for database in outstanding {
            self.cancel_drop_replication(&database).await;
        }
    }
}

/// A set of per-peer blob-replication waits from one update.
pub struct ReplicationWaitSet {
    waits: Vec<ReplicationWait>,
}

impl ReplicationWaitSet {
    /// Resolves when every peer has acknowledged the update.
    pub async fn wait(self) -> Result<(), ClusterError> {
        try_join_all(self.waits.into_iter().map(|w| w.wait())).await?;
        Ok(())
    }
}

/// Applies the quorum rule to graceful-transition outcomes.
fn evaluate_caught_up(outcomes: &[ReplicaOutcome], min: u32) -> Result<(), ClusterError> {
    if min == 0 {
        let behind: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.caught_up)
            .map(|o| format!("{} on {}", o.database, o.remote))
            .collect();
        if behind.is_empty() {
            return Ok(());
        }
        return Err(ClusterError::TransitionIncomplete(format!(
            "replicas still behind after the wait: {}",
            behind.join(", ")
        )));
    }

    // Group by peer host: a standby counts only when every database on it
    // is caught up.
    let mut hosts: BTreeMap<String, bool> = BTreeMap::new();
    for outcome in outcomes {
        let host = Url::parse(&outcome.remote_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_else(|| outcome.remote_url.clone());
        let entry = hosts.entry(host).or_insert(true);
        *entry = *entry && outcome.caught_up;
    }
    let caught_up_hosts = hosts.values().filter(|v| **v).count() as u32;
    if caught_up_hosts >= min {
        Ok(())
    } else {
        Err(ClusterError::TransitionIncomplete(format!(
            "only {caught_up_hosts} of the required {min} standbys are fully caught up"
        )))
    }
}
