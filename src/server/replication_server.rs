// src/server/replication_server.rs

//! The inbound replication service.
//!
//! Accepts the three write streams from the primary: the users-and-grants
//! blob, the branch access-control blob, and drop-database. Every request
//! passes through the server interceptor: requests without both cluster
//! role headers are not from a peer and are refused outright; peer requests
//! are authenticated by JWT, may force a local demotion, and are only
//! dispatched while this server is a standby. Every reply is stamped with
//! this server's current `(role, epoch)`.

use crate::core::ClusterError;
use crate::core::client::{
    BRANCH_CONTROL_PATH, DROP_DATABASE_PATH, DropDatabaseRequest, USERS_AND_GRANTS_PATH,
};
use crate::core::engine::{BranchControlSink, DatabaseDropper, UsersAndGrantsSink};
use crate::core::interceptor::ServerInterceptor;
use crate::core::role::{EPOCH_HEADER, ROLE_HEADER, parse_role_headers};
use crate::server::auth::JwtVerifier;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Chunk-store write methods fronted by the same interceptor. A non-peer
/// client hitting one of these learns the server takes no writes at all,
/// not that it failed to authenticate. The storage layer nests its routes
/// behind [`router`]'s middleware.
pub const CHUNK_STORE_WRITE_PATHS: &[&str] =
    &["/chunkstore/v1/put-chunks", "/chunkstore/v1/commit"];

pub struct ReplicationServiceState {
    pub interceptor: Arc<ServerInterceptor>,
    pub verifier: Arc<JwtVerifier>,
    pub users_sink: Arc<dyn UsersAndGrantsSink>,
    pub branch_sink: Arc<dyn BranchControlSink>,
    pub dropper: Arc<dyn DatabaseDropper>,
}

/// How a request lacking the cluster role headers is refused.
pub fn non_peer_status(path: &str) -> StatusCode {
    if CHUNK_STORE_WRITE_PATHS.contains(&path) {
        StatusCode::NOT_IMPLEMENTED
    } else {
        StatusCode::UNAUTHORIZED
    }
}

/// The interceptor protocol, applied to every inbound request.
async fn cluster_interceptor(
    State(state): State<Arc<ReplicationServiceState>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let headers = req.headers();

    let role_header = headers.get(ROLE_HEADER).and_then(|v| v.to_str().ok());
    let epoch_header = headers.get(EPOCH_HEADER).and_then(|v| v.to_str().ok());
    let peer = match parse_role_headers(role_header, epoch_header) {
        Ok(Some(peer)) => peer,
        Ok(None) => return non_peer_status(&path).into_response(),
        Err(e) => {
            warn!(path, "request with malformed cluster headers: {e}");
            return non_peer_status(&path).into_response();
        }
    };

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = token else {
        warn!(path, "peer request without a bearer token");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if let Err(e) = state.verifier.verify(token) {
        warn!(path, "peer request failed authentication: {e}");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    // The peer's assertion may demote us before we decide anything else.
    state.interceptor.observe_request(peer);
    let (role, epoch) = state.interceptor.role_and_epoch();

    let mut response = if state.interceptor.refuses_inbound() {
        warn!(path, %role, "refusing inbound replication for our role");
        StatusCode::PRECONDITION_FAILED.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&role.to_string()) {
        headers.insert(ROLE_HEADER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&epoch.to_string()) {
        headers.insert(EPOCH_HEADER, v);
    }
    response
}

async fn update_users_and_grants(
    State(state): State<Arc<ReplicationServiceState>>,
    body: Bytes,
) -> Response {
    match state.users_sink.apply(body).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn update_branch_control(
    State(state): State<Arc<ReplicationServiceState>>,
    body: Bytes,
) -> Response {
    match state.branch_sink.apply(body).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn drop_database(
    State(state): State<Arc<ReplicationServiceState>>,
    Json(req): Json<DropDatabaseRequest>,
) -> Response {
    match state.dropper.drop_database(&req.database).await {
        // A database we never had is already dropped.
        Ok(()) | Err(ClusterError::NotFound(_)) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: ClusterError) -> Response {
    let status = match &e {
        ClusterError::FailedPrecondition(_) => StatusCode::PRECONDITION_FAILED,
        ClusterError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        ClusterError::NotFound(_) => StatusCode::NOT_FOUND,
        ClusterError::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
        ClusterError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

pub fn router(state: Arc<ReplicationServiceState>) -> Router {
    Router::new()
        .route(USERS_AND_GRANTS_PATH, post(update_users_and_grants))
        .route(BRANCH_CONTROL_PATH, post(update_branch_control))
        .route(DROP_DATABASE_PATH, post(drop_database))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            cluster_interceptor,
        ))
        .with_state(state)
}

/// Runs the replication service until the shutdown signal fires.
pub async fn run_replication_server(
    state: Arc<ReplicationServiceState>,
    addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let app = router(state);
    info!("cluster replication service listening on http://{addr}");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind replication service on {addr}: {e}");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Replication service shutting down.");
        })
        .await
    {
        error!("Replication service error: {e}");
    }
}
