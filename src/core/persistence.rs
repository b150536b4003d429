// src/core/persistence.rs

//! Persistence of the cluster role and epoch, and bootstrap resolution.
//!
//! The two values are written back on every successful transition and win
//! over the configured bootstrap values on the next start. A server that
//! shut down as `detected_broken_config` comes back as
//! `detected_broken_config`; that role is never accepted from configuration.

use crate::core::ClusterError;
use crate::core::role::{Epoch, Role};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// On-disk shape. The field names are the persisted keys, which double as
/// the read-only system variable names.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRoleState {
    dolt_cluster_role: String,
    dolt_cluster_role_epoch: Epoch,
}

/// File-backed storage for the role/epoch pair.
pub struct RoleStateFile {
    path: PathBuf,
}

impl RoleStateFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Loads the persisted pair. Returns `Ok(None)` when no state has been
    /// persisted yet; an unreadable or unparseable file is a fatal
    /// configuration error, never silently ignored.
    pub fn load(&self) -> Result<Option<(Role, Epoch)>, ClusterError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no persisted cluster role; starting fresh");
                return Ok(None);
            }
            Err(e) => {
                return Err(ClusterError::Config(format!(
                    "failed to read persisted cluster role from '{}': {e}",
                    self.path.display()
                )));
            }
        };
        let persisted: PersistedRoleState = serde_json::from_str(&data).map_err(|e| {
            ClusterError::Config(format!(
                "failed to parse persisted cluster role in '{}': {e}",
                self.path.display()
            ))
        })?;
        let role = Role::parse(&persisted.dolt_cluster_role)?;
        Ok(Some((role, persisted.dolt_cluster_role_epoch)))
    }

    /// Persists the pair, writing to a temp file and renaming so a crash
    /// never leaves a torn state file.
    pub fn save(&self, role: Role, epoch: Epoch) -> Result<(), ClusterError> {
        let persisted = PersistedRoleState {
            dolt_cluster_role: role.to_string(),
            dolt_cluster_role_epoch: epoch,
        };
        let json_data = serde_json::to_string(&persisted)?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json_data)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// Resolves the role and epoch a server starts with.
///
/// Precedence: persisted state, then the configured bootstrap values, then
/// `(primary, 0)`. `detected_broken_config` is accepted only when loaded
/// from persisted state; configuring it as a bootstrap role is fatal.
pub fn resolve_bootstrap(
    persisted: Option<(Role, Epoch)>,
    bootstrap_role: &str,
    bootstrap_epoch: Epoch,
) -> Result<(Role, Epoch), ClusterError> {
    if let Some((role, epoch)) = persisted {
        return Ok((role, epoch));
    }
    let role = Role::parse(bootstrap_role)?;
    if role == Role::DetectedBrokenConfig {
        return Err(ClusterError::Config(
            "bootstrap_role cannot be 'detected_broken_config'".to_string(),
        ));
    }
    Ok((role, bootstrap_epoch))
}
