// src/config.rs

//! Manages cluster configuration: loading, defaults, and validation.

use crate::core::ClusterError;
use crate::core::role::Role;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// One standby remote this server replicates to.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RemoteConfig {
    pub name: String,
    pub url: String,
}

/// Settings for the bearer tokens exchanged between peers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JwtConfig {
    #[serde(default = "default_jwt_issuer")]
    pub issuer: String,
    #[serde(default = "default_jwt_key_id")]
    pub key_id: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: default_jwt_issuer(),
            key_id: default_jwt_key_id(),
        }
    }
}

fn default_jwt_issuer() -> String {
    "dolt-cluster".to_string()
}

fn default_jwt_key_id() -> String {
    "cluster-key".to_string()
}

/// Top-level configuration for the replication control plane.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterConfig {
    /// Role this server assumes when no persisted role exists. Persisted
    /// state always wins over this value.
    #[serde(default = "default_bootstrap_role")]
    pub bootstrap_role: String,
    #[serde(default)]
    pub bootstrap_epoch: u64,
    #[serde(default)]
    pub standby_remotes: Vec<RemoteConfig>,
    /// Address the inbound replication service listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Deadline for each unary replication RPC.
    #[serde(with = "humantime_serde", default = "default_rpc_timeout")]
    pub rpc_timeout: Duration,
    /// Shared deadline for the caught-up wait during a graceful transition.
    #[serde(
        with = "humantime_serde",
        default = "default_graceful_transition_timeout"
    )]
    pub graceful_transition_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_jwks_refresh_interval")]
    pub jwks_refresh_interval: Duration,
    /// Where the role/epoch pair is persisted, relative to the data dir.
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Staging directory for chunk pushes.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    #[serde(default)]
    pub jwt: JwtConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bootstrap_role: default_bootstrap_role(),
            bootstrap_epoch: 0,
            standby_remotes: Vec::new(),
            listen_addr: default_listen_addr(),
            rpc_timeout: default_rpc_timeout(),
            graceful_transition_timeout: default_graceful_transition_timeout(),
            jwks_refresh_interval: default_jwks_refresh_interval(),
            state_file: default_state_file(),
            temp_dir: default_temp_dir(),
            jwt: JwtConfig::default(),
        }
    }
}

fn default_bootstrap_role() -> String {
    "primary".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:50051".to_string()
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_graceful_transition_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_jwks_refresh_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_state_file() -> String {
    "cluster_role.json".to_string()
}

fn default_temp_dir() -> String {
    ".cluster_tmp".to_string()
}

impl ClusterConfig {
    /// Loads configuration from a TOML file, with `DOLT_CLUSTER__`-prefixed
    /// environment variables taking precedence.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("DOLT_CLUSTER").separator("__"))
            .build()
            .with_context(|| format!("Failed to load cluster config from '{path}'"))?;
        let cfg: ClusterConfig = settings
            .try_deserialize()
            .context("Failed to deserialize cluster config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ClusterError> {
        let role = Role::parse(&self.bootstrap_role)?;
        if role == Role::DetectedBrokenConfig {
            return Err(ClusterError::Config(
                "bootstrap_role cannot be 'detected_broken_config'".to_string(),
            ));
        }

        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            ClusterError::Config(format!("invalid listen_addr '{}': {e}", self.listen_addr))
        })?;

        for remote in &self.standby_remotes {
            if remote.name.is_empty() {
                return Err(ClusterError::Config(
                    "standby remote names cannot be empty".to_string(),
                ));
            }
            let url = Url::parse(&remote.url).map_err(|e| {
                ClusterError::Config(format!(
                    "invalid URL '{}' for standby remote '{}': {e}",
                    remote.url, remote.name
                ))
            })?;
            if url.host_str().is_none() {
                return Err(ClusterError::Config(format!(
                    "standby remote '{}' URL '{}' has no host",
                    remote.name, remote.url
                )));
            }
        }

        let mut names: Vec<&str> = self.standby_remotes.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.standby_remotes.len() {
            return Err(ClusterError::Config(
                "standby remote names must be unique".to_string(),
            ));
        }

        Ok(())
    }
}
