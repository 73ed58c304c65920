//! Key-value store contract consumed by the key manager and the token issuer.
//!
//! The production backend is a replicated KV service that lives outside this
//! crate. Two buckets are used:
//!
//! - **public keys**: `kid` → raw Ed25519 public key bytes
//! - **revocations**: signature fragment → revocation reason
//!
//! Both buckets are append-only from this crate's point of view. Writes go
//! through [`KeyValueStore::create`], which must fail with
//! [`StoreError::AlreadyExists`] rather than overwrite.
//!
//! [`MemoryStore`] implements the same contract in-process and is what the
//! tests (and single-node deployments) run against.

mod memory;

pub use memory::{DEFAULT_MAX_HISTORY, MemoryStore};

use thiserror::Error;

/// Errors surfaced by a [`KeyValueStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The key (or the requested revision) does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// `create` was called for a key that already has a value.
    #[error("key exists: {0}")]
    AlreadyExists(String),

    /// `update` was called with a stale revision.
    #[error("wrong last revision for {key}: expected {expected}, current {current}")]
    Conflict {
        /// Key being updated
        key: String,
        /// Revision the caller believed was current
        expected: u64,
        /// Revision actually stored
        current: u64,
    },

    /// The backend could not be reached or failed the request.
    #[error("{0}")]
    Unavailable(String),
}

/// One stored value together with its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Stored bytes
    pub value: Vec<u8>,
    /// Revision of this value (starts at 1)
    pub revision: u64,
}

/// Optimistic-concurrency key-value store.
///
/// Implementations must be `Send + Sync` because one store is shared by every
/// request handler in the process.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read the latest value for `key`.
    async fn get(&self, key: &str) -> Result<Entry, StoreError>;

    /// Write `value` only if `key` has never been written.
    ///
    /// Returns the new revision, or [`StoreError::AlreadyExists`].
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError>;

    /// Replace the value for `key` only if its current revision is `expected_revision`.
    ///
    /// Returns the new revision, [`StoreError::Conflict`] or [`StoreError::NotFound`].
    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> Result<u64, StoreError>;

    /// Read a historical revision of `key`.
    async fn get_revision(&self, key: &str, revision: u64) -> Result<Vec<u8>, StoreError>;
}
