// src/core/errors.rs

//! Defines the primary error type for the cluster control plane.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the
/// replication control plane.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    /// The requested role/epoch transition violates the epoch rules or names
    /// an invalid target. State is unchanged.
    #[error("transition refused: {0}")]
    TransitionRefused(String),

    /// A graceful transition could not complete within its deadline or quorum.
    #[error("transition incomplete: {0}")]
    TransitionIncomplete(String),

    /// Another role transition moved role or epoch while this one was waiting.
    #[error("another role transition is in progress; retry this operation")]
    ConcurrentTransition,

    #[error("Replication Error: {0}")]
    ReplicationError(String),

    /// The standby's root hash moved underneath a compare-and-set commit.
    /// This server assumes it is the only writer to the standby.
    #[error("standby root moved during push: expected {expected}, found {actual}")]
    DestinationRootMoved { expected: String, actual: String },

    /// The peer's role forbids the attempted call.
    #[error("FAILEDPRECONDITION {0}")]
    FailedPrecondition(String),

    #[error("UNAUTHENTICATED {0}")]
    Unauthenticated(String),

    #[error("UNIMPLEMENTED {0}")]
    Unimplemented(String),

    #[error("NOTFOUND {0}")]
    NotFound(String),

    /// A transport-level failure: connection refused, deadline exceeded,
    /// cancellation. Never triggers a role change.
    #[error("transport error: {0}")]
    Transport(String),

    /// Terminal session error set after this session drove a role change.
    #[error(
        "server transitioned cluster roles; this connection can no longer be used; please reconnect"
    )]
    ServerTransitionedRoles,

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// True for failures that say nothing about the peer's cluster state.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClusterError::Transport(_))
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for ClusterError {
    fn clone(&self) -> Self {
        match self {
            ClusterError::Io(e) => ClusterError::Io(Arc::clone(e)),
            ClusterError::Config(s) => ClusterError::Config(s.clone()),
            ClusterError::HttpClientError(s) => ClusterError::HttpClientError(s.clone()),
            ClusterError::TransitionRefused(s) => ClusterError::TransitionRefused(s.clone()),
            ClusterError::TransitionIncomplete(s) => ClusterError::TransitionIncomplete(s.clone()),
            ClusterError::ConcurrentTransition => ClusterError::ConcurrentTransition,
            ClusterError::ReplicationError(s) => ClusterError::ReplicationError(s.clone()),
            ClusterError::DestinationRootMoved { expected, actual } => {
                ClusterError::DestinationRootMoved {
                    expected: expected.clone(),
                    actual: actual.clone(),
                }
            }
            ClusterError::FailedPrecondition(s) => ClusterError::FailedPrecondition(s.clone()),
            ClusterError::Unauthenticated(s) => ClusterError::Unauthenticated(s.clone()),
            ClusterError::Unimplemented(s) => ClusterError::Unimplemented(s.clone()),
            ClusterError::NotFound(s) => ClusterError::NotFound(s.clone()),
            ClusterError::Transport(s) => ClusterError::Transport(s.clone()),
            ClusterError::ServerTransitionedRoles => ClusterError::ServerTransitionedRoles,
            ClusterError::Internal(s) => ClusterError::Internal(s.clone()),
        }
    }
}

impl PartialEq for ClusterError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ClusterError::Io(e1), ClusterError::Io(e2)) => e1.to_string() == e2.to_string(),
            (ClusterError::Config(s1), ClusterError::Config(s2)) => s1 == s2,
            (ClusterError::HttpClientError(s1), ClusterError::HttpClientError(s2)) => s1 == s2,
            (ClusterError::TransitionRefused(s1), ClusterError::TransitionRefused(s2)) => s1 == s2,
            (ClusterError::TransitionIncomplete(s1), ClusterError::TransitionIncomplete(s2)) => {
                s1 == s2
            }
            (ClusterError::ReplicationError(s1), ClusterError::ReplicationError(s2)) => s1 == s2,
            (
                ClusterError::DestinationRootMoved {
                    expected: e1,
                    actual: a1,
                },
                ClusterError::DestinationRootMoved {
                    expected: e2,
                    actual: a2,
                },
            ) => e1 == e2 && a1 == a2,
            (ClusterError::FailedPrecondition(s1), ClusterError::FailedPrecondition(s2)) => {
                s1 == s2
            }
            (ClusterError::Unauthenticated(s1), ClusterError::Unauthenticated(s2)) => s1 == s2,
            (ClusterError::Unimplemented(s1), ClusterError::Unimplemented(s2)) => s1 == s2,
            (ClusterError::NotFound(s1), ClusterError::NotFound(s2)) => s1 == s2,
            (ClusterError::Transport(s1), ClusterError::Transport(s2)) => s1 == s2,
            (ClusterError::Internal(s1), ClusterError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ClusterError {
    fn from(e: std::io::Error) -> Self {
        ClusterError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for ClusterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            ClusterError::Transport(e.to_string())
        } else {
            ClusterError::HttpClientError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<jsonwebtoken::errors::Error> for ClusterError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        ClusterError::Unauthenticated(format!("JWT validation failed: {e}"))
    }
}

impl From<url::ParseError> for ClusterError {
    fn from(e: url::ParseError) -> Self {
        ClusterError::Config(format!("invalid URL: {e}"))
    }
}
