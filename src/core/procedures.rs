// src/core/procedures.rs

//! The stored-procedure surface of the control plane.
//!
//! `dolt_assume_cluster_role` and `dolt_cluster_transition_to_standby` are
//! thin shims the SQL dispatch layer points at these functions. A session
//! that drives a successful role change is marked with a terminal error so
//! every later query on it fails with a "please reconnect" message.

use crate::core::ClusterError;
use crate::core::controller::{Controller, ReplicaOutcome, TransitionOptions};
use crate::core::engine::Session;
use crate::core::role::{Epoch, Role};
use tracing::info;

/// `dolt_assume_cluster_role(role, epoch) -> int`
///
/// Attempts a graceful transition to the named role at the given epoch.
/// `detected_broken_config` is never a legal target here. Returns `0` on
/// success.
pub async fn dolt_assume_cluster_role(
    controller: &Controller,
    session: &dyn Session,
    role: &str,
    epoch: Epoch,
) -> Result<i64, ClusterError> {
    let role = Role::parse(role).map_err(|e| ClusterError::TransitionRefused(e.to_string()))?;
    if role == Role::DetectedBrokenConfig {
        return Err(ClusterError::TransitionRefused(
            "cannot assume the role 'detected_broken_config'".to_string(),
        ));
    }
    info!(%role, epoch, conn_id = session.conn_id(), "dolt_assume_cluster_role called");

    let result = controller
        .set_role_and_epoch(
            role,
            epoch,
            TransitionOptions {
                graceful: true,
                min_caught_up_standbys: 0,
                save_conn_id: Some(session.conn_id()),
            },
        )
        .await?;

    if result.changed_role {
        session.set_terminal_error(ClusterError::ServerTransitionedRoles);
    }
    Ok(0)
}

/// `dolt_cluster_transition_to_standby(epoch, min_caught_up_standbys)
/// -> rows(caughtUp, database, remote, remoteUrl)`
///
/// Graceful-to-standby with an explicit quorum requirement. Fails when the
/// server is already a standby.
pub async fn dolt_cluster_transition_to_standby(
    controller: &Controller,
    session: &dyn Session,
    epoch: Epoch,
    min_caught_up_standbys: u32,
) -> Result<Vec<ReplicaOutcome>, ClusterError> {
    if controller.role() == Role::Standby {
        return Err(ClusterError::TransitionRefused(
            "this server is already a standby".to_string(),
        ));
    }
    info!(
        epoch,
        min_caught_up_standbys,
        conn_id = session.conn_id(),
        "dolt_cluster_transition_to_standby called"
    );

    let result = controller
        .set_role_and_epoch(
            Role::Standby,
            epoch,
            TransitionOptions {
                graceful: true,
                min_caught_up_standbys,
                save_conn_id: Some(session.conn_id()),
            },
        )
        .await?;

    if result.changed_role {
        session.set_terminal_error(ClusterError::ServerTransitionedRoles);
    }
    Ok(result.outcomes)
}
