// src/core/engine.rs

//! Contracts for the hosting SQL engine.
//!
//! The SQL engine, session layer, and admin tables live outside this crate.
//! The controller drives them through the callbacks below when a role
//! transition needs to fence writes or drain connections, and the inbound
//! replication service applies replicated state through the sink traits.

use crate::core::ClusterError;
use crate::core::chunks::SourceDatabase;
use crate::core::role::{Epoch, Role};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Callbacks into the SQL engine used during role transitions. All of these
/// must be cheap and non-blocking: they may be invoked while the controller
/// holds its state lock.
pub trait SqlEngineHooks: Send + Sync {
    /// Marks the database provider read-only (standby) or read-write (primary).
    fn set_provider_read_only(&self, read_only: bool);

    /// Kills the running query on the given connection, if any.
    fn kill_query(&self, conn_id: u32);

    /// Terminates the given connection.
    fn kill_connection(&self, conn_id: u32);

    /// Visits the connection id of every live session.
    fn iter_sessions(&self, f: &mut dyn FnMut(u32));
}

/// Receives the persisted cluster system variables after every successful
/// transition, for exposure as read-only `dolt_cluster_role` /
/// `dolt_cluster_role_epoch`.
pub trait SystemVariablesSink: Send + Sync {
    fn set_role_and_epoch(&self, role: Role, epoch: Epoch);
}

/// Looks up the [`SourceDatabase`] handle for a named local database when
/// commit hooks are registered.
pub trait SourceDatabaseProvider: Send + Sync {
    fn database(&self, name: &str) -> Option<Arc<dyn SourceDatabase>>;
}

/// A SQL session, as seen by the transition stored procedures. A session
/// that drove a successful role change is marked with a terminal error and
/// must refuse all subsequent queries.
pub trait Session: Send + Sync {
    fn conn_id(&self) -> u32;
    fn set_terminal_error(&self, err: ClusterError);
}

/// Applies a replicated users-and-grants blob on a standby.
#[async_trait]
pub trait UsersAndGrantsSink: Send + Sync {
    async fn apply(&self, contents: Bytes) -> Result<(), ClusterError>;
}

/// Applies a replicated branch-access-control blob on a standby.
#[async_trait]
pub trait BranchControlSink: Send + Sync {
    async fn apply(&self, contents: Bytes) -> Result<(), ClusterError>;
}

/// Executes a replicated DROP DATABASE on a standby. Dropping a database
/// that does not exist locally is not an error.
#[async_trait]
pub trait DatabaseDropper: Send + Sync {
    async fn drop_database(&self, name: &str) -> Result<(), ClusterError>;
}
