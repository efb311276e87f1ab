//! Repository error types.
//!
//! Every variant carries enough context to diagnose the problem without a
//! debugger. "Not found" on a single-row read is an explicit variant, never
//! conflated with an empty list result — list operations return empty
//! vectors instead.

use uuid::Uuid;

/// Errors from repository and transaction operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The requested key pool does not exist.
    #[error("key pool not found: {pool_id}")]
    PoolNotFound { pool_id: Uuid },

    /// The requested key does not exist in the addressed pool.
    #[error("key {key_id} not found in pool {pool_id}")]
    KeyNotFound { pool_id: Uuid, key_id: Uuid },

    /// The addressed pool exists but holds no keys yet.
    #[error("pool {pool_id} has no keys")]
    NoKeys { pool_id: Uuid },

    /// A pool with this id already exists.
    #[error("key pool already exists: {pool_id}")]
    DuplicatePool { pool_id: Uuid },

    /// A key with this id already exists in the pool.
    #[error("key {key_id} already exists in pool {pool_id}")]
    DuplicateKey { pool_id: Uuid, key_id: Uuid },

    /// Filter, sort, or paging parameters were invalid.
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// A write was attempted through a read-only transaction.
    #[error("write operation '{operation}' attempted in a read-only transaction")]
    ReadOnly { operation: &'static str },

    /// The underlying store failed.
    #[error("repository backend error: {reason}")]
    Backend { reason: String },
}
