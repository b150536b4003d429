// src/core/chunks.rs

//! Contracts for the content-addressed chunk store.
//!
//! The chunk store and database engine live outside this crate; the commit
//! hook only needs the three operations below: stream the chunks reachable
//! from a root into a destination, read the destination's current root, and
//! compare-and-set the destination's root. `commit_root` returning `false`
//! means the expected root no longer holds, which breaks the control plane's
//! only-writer assumption.

use crate::core::ClusterError;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A content-addressed root hash. The all-zero hash means "unset"; a hook
/// with an unset head asks the chunk store for the current root on its next
/// wakeup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RootHash([u8; 20]);

impl RootHash {
    pub const ZERO: RootHash = RootHash([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        RootHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Parses a 40-character hex string.
    pub fn parse_hex(s: &str) -> Result<Self, ClusterError> {
        let bytes = hex::decode(s)
            .map_err(|e| ClusterError::Internal(format!("invalid root hash '{s}': {e}")))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| ClusterError::Internal(format!("invalid root hash length: '{s}'")))?;
        Ok(RootHash(bytes))
    }
}

impl fmt::Display for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootHash({})", hex::encode(self.0))
    }
}

/// A local database acting as the source of replication: the hook reads its
/// latest committed root and the destination pulls chunks out of it.
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// The latest committed root hash of this database.
    async fn root(&self) -> Result<RootHash, ClusterError>;
}

/// A handle to a standby's copy of one database.
#[async_trait]
pub trait DestinationDatabase: Send + Sync {
    /// Streams every chunk reachable from `root` in `source` into this
    /// destination, staging through `temp_dir`.
    async fn pull_chunks(
        &self,
        temp_dir: &Path,
        source: Arc<dyn SourceDatabase>,
        root: RootHash,
    ) -> Result<(), ClusterError>;

    /// The destination's current root hash.
    async fn root(&self) -> Result<RootHash, ClusterError>;

    /// Compare-and-set of the destination's root. `Ok(false)` means
    /// `expected` no longer holds and nothing was written.
    async fn commit_root(&self, new: RootHash, expected: RootHash)
    -> Result<bool, ClusterError>;
}

/// Creates [`DestinationDatabase`] handles on demand. Destinations are
/// acquired lazily by the commit-hook worker on its first push attempt and
/// cached; acquisition failures are backed off and retried.
#[async_trait]
pub trait DestinationFactory: Send + Sync {
    async fn connect(
        &self,
        remote_url: &str,
        database: &str,
    ) -> Result<Arc<dyn DestinationDatabase>, ClusterError>;
}
