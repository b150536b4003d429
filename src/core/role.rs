// src/core/role.rs

//! The role/epoch model shared by the controller, replicators, and interceptors.
//!
//! Every server in a replication pair is either the `primary` (accepts writes,
//! replicates outward) or a `standby` (read-only, accepts inbound replication).
//! `detected_broken_config` is a terminal error role entered only through
//! interceptor-forced demotion when two peers both claim primary at the same
//! epoch; it is never a legal operator-requested target.

use crate::core::ClusterError;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Monotonic integer token attached to every role assertion; higher epoch wins.
pub type Epoch = u64;

/// Header carrying the sender's role on every peer RPC, both directions.
pub const ROLE_HEADER: &str = "x-dolt-cluster-role";
/// Header carrying the sender's epoch as a decimal non-negative integer.
pub const EPOCH_HEADER: &str = "x-dolt-cluster-role-epoch";

/// The role of a server in a replication pair.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Primary,
    Standby,
    DetectedBrokenConfig,
}

impl Role {
    /// Parses a role from its wire/config representation with a cluster error
    /// instead of a strum error.
    pub fn parse(s: &str) -> Result<Role, ClusterError> {
        s.parse()
            .map_err(|_| ClusterError::Config(format!("invalid cluster role: '{s}'")))
    }
}

/// Outcome of validating a requested transition against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// `(role, epoch)` already hold; nothing to do.
    NoOp,
    /// The transition is legal and must be applied.
    Proceed,
}

/// Validates a `(role, epoch)` transition against the epoch rules.
///
/// - A lower epoch is always refused.
/// - At an equal epoch, a role change is refused, except that a non-graceful
///   demotion to `standby` or `detected_broken_config` is allowed.
/// - An equal epoch with an unchanged role is a silent no-op.
pub fn check_transition(
    current_role: Role,
    current_epoch: Epoch,
    new_role: Role,
    new_epoch: Epoch,
    graceful: bool,
) -> Result<TransitionCheck, ClusterError> {
    if new_epoch < current_epoch {
        return Err(ClusterError::TransitionRefused(format!(
            "requested epoch {new_epoch} is behind the current epoch {current_epoch}"
        )));
    }
    if new_epoch == current_epoch {
        if new_role == current_role {
            return Ok(TransitionCheck::NoOp);
        }
        let demotion_target = matches!(new_role, Role::Standby | Role::DetectedBrokenConfig);
        if graceful || !demotion_target {
            return Err(ClusterError::TransitionRefused(format!(
                "cannot move from role {current_role} to role {new_role} without a higher epoch than {current_epoch}"
            )));
        }
    }
    Ok(TransitionCheck::Proceed)
}

/// Parses the pair of cluster role headers.
///
/// Returns `Ok(None)` when both headers are absent (the request or response
/// did not come from a cluster peer); returns an error when only one is
/// present or either fails to parse.
pub fn parse_role_headers(
    role: Option<&str>,
    epoch: Option<&str>,
) -> Result<Option<(Role, Epoch)>, ClusterError> {
    match (role, epoch) {
        (None, None) => Ok(None),
        (Some(r), Some(e)) => {
            let role = Role::parse(r)?;
            let epoch: Epoch = e.parse().map_err(|_| {
                ClusterError::Config(format!("invalid cluster role epoch: '{e}'"))
            })?;
            Ok(Some((role, epoch)))
        }
        _ => Err(ClusterError::Config(
            "cluster role headers must be present together".to_string(),
        )),
    }
}
