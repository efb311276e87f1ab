//! Repository abstraction for Keyforge.
//!
//! This crate defines the persistence seam of the key-management service:
//! the domain model ([`KeyPool`], [`Key`]), filter/sort/page query types,
//! and the [`Repository`] / [`RepositoryTransaction`] capability traits the
//! orchestrator is constructed against. It knows nothing about cryptography
//! or key lifecycle rules — those live in `keyforge-core`.
//!
//! One implementation is provided: [`MemoryRepository`], an in-memory store
//! with snapshot-isolated transactions. It backs the test suite and
//! single-process deployments; a SQL-backed implementation plugs in behind
//! the same traits.

mod error;
mod memory;
mod model;
mod query;

pub use error::RepositoryError;
pub use memory::MemoryRepository;
pub use model::{
    Key, KeyPool, KeyPoolAlgorithm, KeyPoolCreate, KeyPoolProvider, KeyPoolStatus,
    UnknownVariantError,
};
pub use query::{
    DEFAULT_PAGE_SIZE, KeyPoolQuery, KeyPoolSort, KeyQuery, KeySort, MAX_PAGE_SIZE, Page,
    SortDirection,
};

use uuid::Uuid;

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// A transactional repository of key pools and keys.
///
/// Implementations must be safe to share across async tasks
/// (`Send + Sync`). Each operation of the orchestrator runs inside exactly
/// one transaction obtained from [`begin`](Repository::begin).
#[async_trait::async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Begin a transaction.
    ///
    /// May block (await) while the backing store is at its concurrency
    /// limit.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] if the store is unavailable.
    async fn begin(
        &self,
        mode: TransactionMode,
    ) -> Result<Box<dyn RepositoryTransaction>, RepositoryError>;
}

/// One open transaction.
///
/// Writes are staged and become visible to other transactions only after
/// [`commit`](RepositoryTransaction::commit). Dropping an uncommitted
/// transaction discards all staged writes, which makes cancellation of an
/// in-flight operation safe: a cancelled future can never half-commit.
#[async_trait::async_trait]
pub trait RepositoryTransaction: Send {
    /// Insert a new key pool.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::DuplicatePool`] if the id is already present,
    /// [`RepositoryError::ReadOnly`] in a read-only transaction.
    async fn add_key_pool(&mut self, pool: &KeyPool) -> Result<(), RepositoryError>;

    /// Fetch one pool by id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::PoolNotFound`] if absent.
    async fn get_key_pool(&mut self, pool_id: Uuid) -> Result<KeyPool, RepositoryError>;

    /// List pools matching the query. An empty result is an empty vector,
    /// not an error.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::InvalidQuery`] for unusable parameters.
    async fn get_key_pools(
        &mut self,
        query: &KeyPoolQuery,
    ) -> Result<Vec<KeyPool>, RepositoryError>;

    /// Update a pool's name and description.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::PoolNotFound`] if absent,
    /// [`RepositoryError::ReadOnly`] in a read-only transaction.
    async fn update_key_pool(
        &mut self,
        pool_id: Uuid,
        name: &str,
        description: &str,
    ) -> Result<(), RepositoryError>;

    /// Set a pool's lifecycle status. Callers are responsible for having
    /// validated the transition.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::PoolNotFound`] if absent,
    /// [`RepositoryError::ReadOnly`] in a read-only transaction.
    async fn update_key_pool_status(
        &mut self,
        pool_id: Uuid,
        status: KeyPoolStatus,
    ) -> Result<(), RepositoryError>;

    /// Insert a new key into its pool.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::PoolNotFound`] if the owning pool is absent,
    /// [`RepositoryError::DuplicateKey`] on id collision,
    /// [`RepositoryError::ReadOnly`] in a read-only transaction.
    async fn add_key(&mut self, key: &Key) -> Result<(), RepositoryError>;

    /// Fetch one key by pool id and key id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::KeyNotFound`] if absent.
    async fn get_key(&mut self, pool_id: Uuid, key_id: Uuid) -> Result<Key, RepositoryError>;

    /// Fetch the key with the maximum id in the pool.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::PoolNotFound`] if the pool is absent,
    /// [`RepositoryError::NoKeys`] if the pool has no keys yet.
    async fn get_latest_key(&mut self, pool_id: Uuid) -> Result<Key, RepositoryError>;

    /// List keys within one pool.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::PoolNotFound`] if the pool is absent,
    /// [`RepositoryError::InvalidQuery`] for unusable parameters.
    async fn get_keys_for_pool(
        &mut self,
        pool_id: Uuid,
        query: &KeyQuery,
    ) -> Result<Vec<Key>, RepositoryError>;

    /// List keys across pools.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::InvalidQuery`] for unusable parameters.
    async fn get_keys(&mut self, query: &KeyQuery) -> Result<Vec<Key>, RepositoryError>;

    /// Make all staged writes visible atomically.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Backend`] if the store rejects the commit.
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    /// Discard all staged writes. Equivalent to dropping the transaction,
    /// but explicit.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Backend`] if the store fails while releasing.
    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}
