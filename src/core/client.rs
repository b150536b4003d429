// src/core/client.rs

//! Outbound peer client for the replication RPC surface.
//!
//! One `PeerClient` exists per configured standby remote. Every call runs
//! through the client interceptor: the call is refused locally unless this
//! server is primary, the request is stamped with `(role, epoch)` headers
//! and a bearer token, and the reply's headers are inspected for a forced
//! demotion before the caller sees the result.

use crate::core::ClusterError;
use crate::core::interceptor::ClientInterceptor;
use crate::core::role::{EPOCH_HEADER, ROLE_HEADER, parse_role_headers};
use crate::server::auth::TokenSource;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Endpoint overwriting the standby's users-and-grants table.
pub const USERS_AND_GRANTS_PATH: &str = "/cluster/v1/users-and-grants";
/// Endpoint overwriting the standby's branch access-control list.
pub const BRANCH_CONTROL_PATH: &str = "/cluster/v1/branch-control";
/// Endpoint dropping a named database on the standby.
pub const DROP_DATABASE_PATH: &str = "/cluster/v1/drop-database";

#[derive(Debug, Serialize, Deserialize)]
pub struct DropDatabaseRequest {
    pub database: String,
}

pub struct PeerClient {
    remote_name: String,
    base_url: Url,
    http: reqwest::Client,
    interceptor: Arc<ClientInterceptor>,
    tokens: Arc<dyn TokenSource>,
}

impl PeerClient {
    pub fn new(
        remote_name: String,
        base_url: &str,
        rpc_timeout: Duration,
        interceptor: Arc<ClientInterceptor>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Arc<Self>, ClusterError> {
        let base_url = Url::parse(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| ClusterError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Arc::new(Self {
            remote_name,
            base_url,
            http,
            interceptor,
            tokens,
        }))
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn remote_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub async fn update_users_and_grants(&self, contents: Bytes) -> Result<(), ClusterError> {
        self.post_bytes(USERS_AND_GRANTS_PATH, contents).await
    }

    pub async fn update_branch_control(&self, contents: Bytes) -> Result<(), ClusterError> {
        self.post_bytes(BRANCH_CONTROL_PATH, contents).await
    }

    pub async fn drop_database(&self, database: &str) -> Result<(), ClusterError> {
        let url = self.base_url.join(DROP_DATABASE_PATH)?;
        let req = self.http.post(url).json(&DropDatabaseRequest {
            database: database.to_string(),
        });
        self.send(req).await
    }

    async fn post_bytes(&self, path: &str, contents: Bytes) -> Result<(), ClusterError> {
        let url = self.base_url.join(path)?;
        let req = self
            .http
            .post(url)
            .header("content-type", "application/octet-stream")
            .body(contents);
        self.send(req).await
    }

    /// Stamps, authenticates, sends, and inspects one unary RPC. Callers
    /// must not hold any replicator lock across this await: the response
    /// inspection may force a role change that re-enters `set_role`.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<(), ClusterError> {
        let (role, epoch) = self.interceptor.begin_call()?;
        let token = self.tokens.token()?;
        let req = req
            .header(ROLE_HEADER, role.to_string())
            .header(EPOCH_HEADER, epoch.to_string())
            .bearer_auth(token);

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                // No HTTP response reached us; nothing to learn about the
                // peer's cluster state.
                self.interceptor.observe_response(None, true);
                return Err(ClusterError::Transport(format!(
                    "replication RPC to {} failed: {e}",
                    self.remote_name
                )));
            }
        };

        let role_header = resp
            .headers()
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let epoch_header = resp
            .headers()
            .get(EPOCH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let peer = match parse_role_headers(role_header.as_deref(), epoch_header.as_deref()) {
            Ok(peer) => peer,
            Err(e) => {
                warn!(remote = %self.remote_name, "malformed cluster headers on reply: {e}");
                None
            }
        };
        self.interceptor.observe_response(peer, false);

        map_status(resp.status(), &self.remote_name)
    }
}

fn map_status(status: StatusCode, remote: &str) -> Result<(), ClusterError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::PRECONDITION_FAILED => Err(ClusterError::FailedPrecondition(format!(
            "peer {remote} refused the call for its role"
        ))),
        StatusCode::UNAUTHORIZED => Err(ClusterError::Unauthenticated(format!(
            "peer {remote} rejected our credentials"
        ))),
        StatusCode::NOT_FOUND => Err(ClusterError::NotFound(format!(
            "peer {remote} does not know the target"
        ))),
        StatusCode::NOT_IMPLEMENTED => Err(ClusterError::Unimplemented(format!(
            "peer {remote} does not serve this endpoint"
        ))),
        StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT
        | StatusCode::REQUEST_TIMEOUT => Err(ClusterError::Transport(format!(
            "peer {remote} unavailable: HTTP {status}"
        ))),
        _ => Err(ClusterError::ReplicationError(format!(
            "peer {remote} replied HTTP {status}"
        ))),
    }
}

/// One unary blob-replication endpoint on a peer.
#[async_trait]
pub trait BlobTarget: Send + Sync {
    async fn update(&self, contents: Bytes) -> Result<(), ClusterError>;
}

pub struct UsersAndGrantsEndpoint(pub Arc<PeerClient>);

#[async_trait]
impl BlobTarget for UsersAndGrantsEndpoint {
    async fn update(&self, contents: Bytes) -> Result<(), ClusterError> {
        self.0.update_users_and_grants(contents).await
    }
}

pub struct BranchControlEndpoint(pub Arc<PeerClient>);

#[async_trait]
impl BlobTarget for BranchControlEndpoint {
    async fn update(&self, contents: Bytes) -> Result<(), ClusterError> {
        self.0.update_branch_control(contents).await
    }
}

/// The drop-database endpoint on a peer.
#[async_trait]
pub trait DropDatabaseTarget: Send + Sync {
    async fn drop_database(&self, database: &str) -> Result<(), ClusterError>;
}

#[async_trait]
impl DropDatabaseTarget for PeerClient {
    async fn drop_database(&self, database: &str) -> Result<(), ClusterError> {
        PeerClient::drop_database(self, database).await
    }
}
