//! In-memory repository with snapshot-isolated transactions.
//!
//! Tables live in `BTreeMap`s behind a `tokio::sync::RwLock`. A read-write
//! transaction takes the write lock for its whole lifetime and mutates a
//! cloned working copy; commit swaps the working copy back in under the
//! same guard. Dropping the transaction drops the clone, so an abandoned or
//! cancelled transaction leaves the shared tables untouched. Read-only
//! transactions hold the read lock and see a stable snapshot.
//!
//! Writer throughput is one transaction at a time, which is the intended
//! isolation level here, not a shortcut: lifecycle transitions are
//! check-then-act and must not interleave.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::model::{Key, KeyPool, KeyPoolStatus};
use crate::query::{KeyPoolQuery, KeyPoolSort, KeyQuery, KeySort, SortDirection};
use crate::{Repository, RepositoryTransaction, TransactionMode};

#[derive(Debug, Default, Clone)]
struct Tables {
    pools: BTreeMap<Uuid, KeyPool>,
    /// Keyed by (pool id, key id) so one pool's keys form a contiguous,
    /// id-ordered range.
    keys: BTreeMap<(Uuid, Uuid), Key>,
}

/// In-memory [`Repository`] for tests and single-process deployments.
#[derive(Debug, Default, Clone)]
pub struct MemoryRepository {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Repository for MemoryRepository {
    async fn begin(
        &self,
        mode: TransactionMode,
    ) -> Result<Box<dyn RepositoryTransaction>, RepositoryError> {
        let tx = match mode {
            TransactionMode::ReadOnly => {
                let guard = Arc::clone(&self.tables).read_owned().await;
                let working = guard.clone();
                MemoryTransaction {
                    guard: Guard::Read(guard),
                    working,
                }
            }
            TransactionMode::ReadWrite => {
                let guard = Arc::clone(&self.tables).write_owned().await;
                let working = guard.clone();
                MemoryTransaction {
                    guard: Guard::Write(guard),
                    working,
                }
            }
        };
        Ok(Box::new(tx))
    }
}

enum Guard {
    Read(#[allow(dead_code)] OwnedRwLockReadGuard<Tables>),
    Write(OwnedRwLockWriteGuard<Tables>),
}

struct MemoryTransaction {
    guard: Guard,
    working: Tables,
}

impl MemoryTransaction {
    fn writable(&mut self, operation: &'static str) -> Result<&mut Tables, RepositoryError> {
        match self.guard {
            Guard::Read(_) => Err(RepositoryError::ReadOnly { operation }),
            Guard::Write(_) => Ok(&mut self.working),
        }
    }

    fn pool(&self, pool_id: Uuid) -> Result<&KeyPool, RepositoryError> {
        self.working
            .pools
            .get(&pool_id)
            .ok_or(RepositoryError::PoolNotFound { pool_id })
    }
}

#[async_trait::async_trait]
impl RepositoryTransaction for MemoryTransaction {
    async fn add_key_pool(&mut self, pool: &KeyPool) -> Result<(), RepositoryError> {
        let tables = self.writable("add_key_pool")?;
        if tables.pools.contains_key(&pool.id) {
            return Err(RepositoryError::DuplicatePool { pool_id: pool.id });
        }
        tables.pools.insert(pool.id, pool.clone());
        Ok(())
    }

    async fn get_key_pool(&mut self, pool_id: Uuid) -> Result<KeyPool, RepositoryError> {
        self.pool(pool_id).cloned()
    }

    async fn get_key_pools(
        &mut self,
        query: &KeyPoolQuery,
    ) -> Result<Vec<KeyPool>, RepositoryError> {
        query.validate()?;
        let mut matched: Vec<KeyPool> = self
            .working
            .pools
            .values()
            .filter(|pool| pool_matches(pool, query))
            .cloned()
            .collect();
        matched.sort_by(|a, b| compare_pools(a, b, &query.sort));
        Ok(paginate(matched, query.page.offset(), query.page.size))
    }

    async fn update_key_pool(
        &mut self,
        pool_id: Uuid,
        name: &str,
        description: &str,
    ) -> Result<(), RepositoryError> {
        let tables = self.writable("update_key_pool")?;
        let pool = tables
            .pools
            .get_mut(&pool_id)
            .ok_or(RepositoryError::PoolNotFound { pool_id })?;
        pool.name = name.to_owned();
        pool.description = description.to_owned();
        Ok(())
    }

    async fn update_key_pool_status(
        &mut self,
        pool_id: Uuid,
        status: KeyPoolStatus,
    ) -> Result<(), RepositoryError> {
        let tables = self.writable("update_key_pool_status")?;
        let pool = tables
            .pools
            .get_mut(&pool_id)
            .ok_or(RepositoryError::PoolNotFound { pool_id })?;
        pool.status = status;
        Ok(())
    }

    async fn add_key(&mut self, key: &Key) -> Result<(), RepositoryError> {
        let tables = self.writable("add_key")?;
        if !tables.pools.contains_key(&key.pool_id) {
            return Err(RepositoryError::PoolNotFound {
                pool_id: key.pool_id,
            });
        }
        let slot = (key.pool_id, key.id);
        if tables.keys.contains_key(&slot) {
            return Err(RepositoryError::DuplicateKey {
                pool_id: key.pool_id,
                key_id: key.id,
            });
        }
        tables.keys.insert(slot, key.clone());
        Ok(())
    }

    async fn get_key(&mut self, pool_id: Uuid, key_id: Uuid) -> Result<Key, RepositoryError> {
        self.working
            .keys
            .get(&(pool_id, key_id))
            .cloned()
            .ok_or(RepositoryError::KeyNotFound { pool_id, key_id })
    }

    async fn get_latest_key(&mut self, pool_id: Uuid) -> Result<Key, RepositoryError> {
        self.pool(pool_id)?;
        self.working
            .keys
            .range((pool_id, Uuid::nil())..=(pool_id, Uuid::max()))
            .next_back()
            .map(|(_, key)| key.clone())
            .ok_or(RepositoryError::NoKeys { pool_id })
    }

    async fn get_keys_for_pool(
        &mut self,
        pool_id: Uuid,
        query: &KeyQuery,
    ) -> Result<Vec<Key>, RepositoryError> {
        query.validate()?;
        self.pool(pool_id)?;
        let mut matched: Vec<Key> = self
            .working
            .keys
            .range((pool_id, Uuid::nil())..=(pool_id, Uuid::max()))
            .map(|(_, key)| key)
            .filter(|key| key_matches(key, query))
            .cloned()
            .collect();
        matched.sort_by(|a, b| compare_keys(a, b, &query.sort));
        Ok(paginate(matched, query.page.offset(), query.page.size))
    }

    async fn get_keys(&mut self, query: &KeyQuery) -> Result<Vec<Key>, RepositoryError> {
        query.validate()?;
        let mut matched: Vec<Key> = self
            .working
            .keys
            .values()
            .filter(|key| {
                (query.pool_ids.is_empty() || query.pool_ids.contains(&key.pool_id))
                    && key_matches(key, query)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| compare_keys(a, b, &query.sort));
        Ok(paginate(matched, query.page.offset(), query.page.size))
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        match self.guard {
            Guard::Read(_) => Ok(()),
            Guard::Write(mut guard) => {
                debug!(
                    pools = self.working.pools.len(),
                    keys = self.working.keys.len(),
                    "committed staged tables"
                );
                *guard = self.working;
                Ok(())
            }
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        // Dropping the working copy and the guard is the whole rollback.
        Ok(())
    }
}

fn pool_matches(pool: &KeyPool, query: &KeyPoolQuery) -> bool {
    (query.ids.is_empty() || query.ids.contains(&pool.id))
        && (query.names.is_empty() || query.names.contains(&pool.name))
        && (query.algorithms.is_empty() || query.algorithms.contains(&pool.algorithm))
        && query
            .versioning_allowed
            .is_none_or(|v| pool.versioning_allowed == v)
        && query
            .import_allowed
            .is_none_or(|v| pool.import_allowed == v)
        && query
            .export_allowed
            .is_none_or(|v| pool.export_allowed == v)
}

fn key_matches(key: &Key, query: &KeyQuery) -> bool {
    (query.ids.is_empty() || query.ids.contains(&key.id))
        && query
            .generated_after
            .is_none_or(|after| key.generate_date >= after)
        && query
            .generated_before
            .is_none_or(|before| key.generate_date <= before)
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    }
}

fn compare_pools(a: &KeyPool, b: &KeyPool, sort: &[(KeyPoolSort, SortDirection)]) -> Ordering {
    for &(column, direction) in sort {
        let ordering = match column {
            KeyPoolSort::Id => a.id.cmp(&b.id),
            KeyPoolSort::Name => a.name.cmp(&b.name),
            KeyPoolSort::Algorithm => a.algorithm.key_len().cmp(&b.algorithm.key_len()),
            KeyPoolSort::Status => a.status.as_str().cmp(b.status.as_str()),
        };
        let ordering = directed(ordering, direction);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    // Stable fallback so paging never shuffles equal rows.
    a.id.cmp(&b.id)
}

fn compare_keys(a: &Key, b: &Key, sort: &[(KeySort, SortDirection)]) -> Ordering {
    for &(column, direction) in sort {
        let ordering = match column {
            KeySort::Id => a.id.cmp(&b.id),
            KeySort::GenerateDate => a.generate_date.cmp(&b.generate_date),
        };
        let ordering = directed(ordering, direction);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    (a.pool_id, a.id).cmp(&(b.pool_id, b.id))
}

fn paginate<T>(rows: Vec<T>, offset: usize, size: u32) -> Vec<T> {
    rows.into_iter()
        .skip(offset)
        .take(size as usize)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{KeyPoolAlgorithm, KeyPoolProvider};
    use crate::query::Page;

    fn pool(name: &str, algorithm: KeyPoolAlgorithm) -> KeyPool {
        KeyPool {
            id: Uuid::now_v7(),
            name: name.to_owned(),
            description: String::new(),
            provider: KeyPoolProvider::Internal,
            algorithm,
            versioning_allowed: true,
            import_allowed: false,
            export_allowed: false,
            status: KeyPoolStatus::Creating,
        }
    }

    fn key(pool_id: Uuid) -> Key {
        Key {
            pool_id,
            id: Uuid::now_v7(),
            material: vec![0xAA; 48],
            generate_date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn committed_pool_is_visible_to_later_transactions() {
        let repo = MemoryRepository::new();
        let created = pool("orders", KeyPoolAlgorithm::Aes256);

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&created).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        let fetched = tx.get_key_pool(created.id).await.unwrap();
        assert_eq!(fetched.name, "orders");
        assert_eq!(fetched.status, KeyPoolStatus::Creating);
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let repo = MemoryRepository::new();
        let created = pool("orders", KeyPoolAlgorithm::Aes256);

        {
            let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
            tx.add_key_pool(&created).await.unwrap();
            // No commit.
        }

        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        assert!(matches!(
            tx.get_key_pool(created.id).await,
            Err(RepositoryError::PoolNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let repo = MemoryRepository::new();
        let created = pool("orders", KeyPoolAlgorithm::Aes256);

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&created).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        assert!(tx.get_key_pool(created.id).await.is_err());
    }

    #[tokio::test]
    async fn read_only_transaction_rejects_writes() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        let err = tx
            .add_key_pool(&pool("orders", KeyPoolAlgorithm::Aes128))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::ReadOnly {
                operation: "add_key_pool"
            }
        ));
    }

    #[tokio::test]
    async fn duplicate_pool_id_is_rejected() {
        let repo = MemoryRepository::new();
        let created = pool("orders", KeyPoolAlgorithm::Aes256);

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&created).await.unwrap();
        assert!(matches!(
            tx.add_key_pool(&created).await,
            Err(RepositoryError::DuplicatePool { .. })
        ));
    }

    #[tokio::test]
    async fn add_key_requires_existing_pool() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        assert!(matches!(
            tx.add_key(&key(Uuid::now_v7())).await,
            Err(RepositoryError::PoolNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn latest_key_is_maximum_id_in_pool() {
        let repo = MemoryRepository::new();
        let created = pool("orders", KeyPoolAlgorithm::Aes256);

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&created).await.unwrap();
        assert!(matches!(
            tx.get_latest_key(created.id).await,
            Err(RepositoryError::NoKeys { .. })
        ));

        let first = key(created.id);
        let second = key(created.id);
        tx.add_key(&first).await.unwrap();
        tx.add_key(&second).await.unwrap();

        // v7 ids are time-ordered, so the second key is the latest.
        let latest = tx.get_latest_key(created.id).await.unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn latest_key_ignores_other_pools() {
        let repo = MemoryRepository::new();
        let first_pool = pool("orders", KeyPoolAlgorithm::Aes256);
        let second_pool = pool("invoices", KeyPoolAlgorithm::Aes256);

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&first_pool).await.unwrap();
        tx.add_key_pool(&second_pool).await.unwrap();
        let mine = key(first_pool.id);
        tx.add_key(&mine).await.unwrap();
        tx.add_key(&key(second_pool.id)).await.unwrap();

        let latest = tx.get_latest_key(first_pool.id).await.unwrap();
        assert_eq!(latest.id, mine.id);
    }

    #[tokio::test]
    async fn pool_query_filters_by_name_and_algorithm() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&pool("orders", KeyPoolAlgorithm::Aes256))
            .await
            .unwrap();
        tx.add_key_pool(&pool("invoices", KeyPoolAlgorithm::Aes128))
            .await
            .unwrap();
        tx.add_key_pool(&pool("orders", KeyPoolAlgorithm::Aes128))
            .await
            .unwrap();

        let query = KeyPoolQuery {
            names: vec!["orders".to_owned()],
            algorithms: vec![KeyPoolAlgorithm::Aes128],
            ..KeyPoolQuery::default()
        };
        let found = tx.get_key_pools(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "orders");
        assert_eq!(found[0].algorithm, KeyPoolAlgorithm::Aes128);
    }

    #[tokio::test]
    async fn pool_query_sorts_and_pages() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        for name in ["charlie", "alpha", "bravo", "delta"] {
            tx.add_key_pool(&pool(name, KeyPoolAlgorithm::Aes256))
                .await
                .unwrap();
        }

        let query = KeyPoolQuery {
            sort: vec![(KeyPoolSort::Name, SortDirection::Ascending)],
            page: Page { number: 1, size: 2 },
            ..KeyPoolQuery::default()
        };
        let found = tx.get_key_pools(&query).await.unwrap();
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["charlie", "delta"]);
    }

    #[tokio::test]
    async fn empty_query_past_last_page_returns_empty() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&pool("orders", KeyPoolAlgorithm::Aes256))
            .await
            .unwrap();

        let query = KeyPoolQuery {
            page: Page { number: 9, size: 25 },
            ..KeyPoolQuery::default()
        };
        assert!(tx.get_key_pools(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn key_query_filters_by_date_window() {
        let repo = MemoryRepository::new();
        let created = pool("orders", KeyPoolAlgorithm::Aes256);
        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&created).await.unwrap();

        let mut old = key(created.id);
        old.generate_date = Utc::now() - chrono::Duration::days(30);
        let recent = key(created.id);
        tx.add_key(&old).await.unwrap();
        tx.add_key(&recent).await.unwrap();

        let query = KeyQuery {
            generated_after: Some(Utc::now() - chrono::Duration::days(1)),
            ..KeyQuery::default()
        };
        let found = tx.get_keys_for_pool(created.id, &query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, recent.id);
    }

    #[tokio::test]
    async fn global_key_query_spans_pools() {
        let repo = MemoryRepository::new();
        let first_pool = pool("orders", KeyPoolAlgorithm::Aes256);
        let second_pool = pool("invoices", KeyPoolAlgorithm::Aes128);
        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&first_pool).await.unwrap();
        tx.add_key_pool(&second_pool).await.unwrap();
        tx.add_key(&key(first_pool.id)).await.unwrap();
        tx.add_key(&key(second_pool.id)).await.unwrap();

        let all = tx.get_keys(&KeyQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let scoped = KeyQuery {
            pool_ids: vec![second_pool.id],
            ..KeyQuery::default()
        };
        let found = tx.get_keys(&scoped).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pool_id, second_pool.id);
    }

    #[tokio::test]
    async fn status_update_persists_after_commit() {
        let repo = MemoryRepository::new();
        let created = pool("orders", KeyPoolAlgorithm::Aes256);

        let mut tx = repo.begin(TransactionMode::ReadWrite).await.unwrap();
        tx.add_key_pool(&created).await.unwrap();
        tx.update_key_pool_status(created.id, KeyPoolStatus::Active)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin(TransactionMode::ReadOnly).await.unwrap();
        let fetched = tx.get_key_pool(created.id).await.unwrap();
        assert_eq!(fetched.status, KeyPoolStatus::Active);
    }
}
