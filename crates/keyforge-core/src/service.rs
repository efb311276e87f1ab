//! Key pool orchestrator.
//!
//! [`KeyPoolService`] ties the repository, state machine, generation pools,
//! barrier collaborator, and envelope engine into the public operations.
//! Every operation runs inside exactly one transaction: commit on success,
//! rollback on error, and an implicit rollback when the caller's future is
//! dropped mid-flight, so no operation can half-commit.

use std::sync::Arc;

use chrono::Utc;
use keyforge_repository::{
    Key, KeyPool, KeyPoolCreate, KeyPoolQuery, KeyPoolStatus, KeyQuery, Repository,
    RepositoryTransaction, TransactionMode,
};
use tracing::info;
use uuid::Uuid;

use crate::barrier::BarrierService;
use crate::config::ServiceConfig;
use crate::engine::EnvelopeCryptoEngine;
use crate::error::{JoseError, ServiceError};
use crate::jose::alg::EncryptAlgorithm;
use crate::jose::decode_header;
use crate::keygen::{KeyGenerators, KeyLen, KeyMaterial};
use crate::state;

pub struct KeyPoolService {
    repository: Arc<dyn Repository>,
    barrier: Arc<dyn BarrierService>,
    engine: EnvelopeCryptoEngine,
    generators: Arc<KeyGenerators>,
}

impl KeyPoolService {
    /// Build the service, starting the generation pool workers.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::GenPool`] for unusable pool tuning.
    pub fn new(
        repository: Arc<dyn Repository>,
        barrier: Arc<dyn BarrierService>,
        config: &ServiceConfig,
    ) -> Result<Self, ServiceError> {
        let generators = Arc::new(KeyGenerators::new(&config.genpool)?);
        let engine = EnvelopeCryptoEngine::new(Arc::clone(&generators));
        Ok(Self {
            repository,
            barrier,
            engine,
            generators,
        })
    }

    /// Stop the background generation workers. In-flight operations finish;
    /// later ones fail with a closed-pool error.
    pub fn shutdown(&self) {
        self.generators.cancel();
        info!("key pool service shut down");
    }

    /// Create a key pool.
    ///
    /// The pool is inserted in `Creating` and advanced to `PendingImport`
    /// or `PendingGenerate` per `import_allowed`. For the generate path one
    /// key is created and the pool reaches `Active` inside the same
    /// transaction, so a ready pool is never observable with zero keys.
    ///
    /// # Errors
    ///
    /// Any repository, transition, generator, or barrier failure aborts the
    /// whole transaction and surfaces unchanged.
    pub async fn add_key_pool(&self, create: KeyPoolCreate) -> Result<KeyPool, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadWrite).await?;
        let result = self.add_key_pool_in(tx.as_mut(), create).await;
        match result {
            Ok(pool) => {
                tx.commit().await?;
                info!(pool_id = %pool.id, status = %pool.status, "created key pool");
                Ok(pool)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err)
            }
        }
    }

    async fn add_key_pool_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        create: KeyPoolCreate,
    ) -> Result<KeyPool, ServiceError> {
        let mut pool = KeyPool {
            id: self.generators.key_id().await?,
            name: create.name,
            description: create.description,
            provider: create.provider,
            algorithm: create.algorithm,
            versioning_allowed: create.versioning_allowed,
            import_allowed: create.import_allowed,
            export_allowed: create.export_allowed,
            status: KeyPoolStatus::Creating,
        };
        tx.add_key_pool(&pool).await?;

        let next = if pool.import_allowed {
            KeyPoolStatus::PendingImport
        } else {
            KeyPoolStatus::PendingGenerate
        };
        state::can_transition(pool.status, next)?;
        tx.update_key_pool_status(pool.id, next).await?;
        pool.status = next;

        if pool.status == KeyPoolStatus::PendingGenerate {
            self.generate_key_in(tx, &pool).await?;
            state::can_transition(pool.status, KeyPoolStatus::Active)?;
            tx.update_key_pool_status(pool.id, KeyPoolStatus::Active)
                .await?;
            pool.status = KeyPoolStatus::Active;
        }
        Ok(pool)
    }

    async fn generate_key_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        pool: &KeyPool,
    ) -> Result<Key, ServiceError> {
        let key_id = self.generators.key_id().await?;
        let material = self
            .generators
            .material(KeyLen::from(pool.algorithm))
            .await?;
        let sealed = self.barrier.encrypt_content(tx, material.as_bytes()).await?;
        let key = Key {
            pool_id: pool.id,
            id: key_id,
            material: sealed,
            generate_date: Utc::now(),
        };
        tx.add_key(&key).await?;
        Ok(key)
    }

    /// Generate one additional key in a pool.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidPoolStatus`] unless the pool is
    /// `PendingGenerate` or `Active`; nothing is persisted on failure. Pool
    /// status is never altered here.
    pub async fn generate_key(&self, pool_id: Uuid) -> Result<Key, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadWrite).await?;
        let result = async {
            let pool = tx.get_key_pool(pool_id).await?;
            if !matches!(
                pool.status,
                KeyPoolStatus::PendingGenerate | KeyPoolStatus::Active
            ) {
                return Err(ServiceError::InvalidPoolStatus {
                    pool_id,
                    status: pool.status,
                });
            }
            self.generate_key_in(tx.as_mut(), &pool).await
        }
        .await;
        match result {
            Ok(key) => {
                tx.commit().await?;
                info!(pool_id = %pool_id, key_id = %key.id, "generated key");
                Ok(key)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err)
            }
        }
    }

    /// Fetch one pool.
    ///
    /// # Errors
    ///
    /// Returns a pool-not-found repository error if absent.
    pub async fn get_key_pool(&self, pool_id: Uuid) -> Result<KeyPool, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadOnly).await?;
        Ok(tx.get_key_pool(pool_id).await?)
    }

    /// List pools. An empty result is an empty vector, not an error.
    ///
    /// # Errors
    ///
    /// Returns an invalid-query error for unusable parameters.
    pub async fn list_key_pools(
        &self,
        query: &KeyPoolQuery,
    ) -> Result<Vec<KeyPool>, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadOnly).await?;
        Ok(tx.get_key_pools(query).await?)
    }

    /// Fetch one key by pool and key id.
    ///
    /// # Errors
    ///
    /// Returns a key-not-found repository error if absent.
    pub async fn get_key(&self, pool_id: Uuid, key_id: Uuid) -> Result<Key, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadOnly).await?;
        Ok(tx.get_key(pool_id, key_id).await?)
    }

    /// List keys within one pool.
    ///
    /// # Errors
    ///
    /// Returns pool-not-found or invalid-query repository errors.
    pub async fn list_keys_for_pool(
        &self,
        pool_id: Uuid,
        query: &KeyQuery,
    ) -> Result<Vec<Key>, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadOnly).await?;
        Ok(tx.get_keys_for_pool(pool_id, query).await?)
    }

    /// List keys across pools.
    ///
    /// # Errors
    ///
    /// Returns an invalid-query error for unusable parameters.
    pub async fn list_keys(&self, query: &KeyQuery) -> Result<Vec<Key>, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadOnly).await?;
        Ok(tx.get_keys(query).await?)
    }

    /// Update a pool's name and description. Status untouched.
    ///
    /// # Errors
    ///
    /// Returns a pool-not-found repository error if absent.
    pub async fn update_key_pool(
        &self,
        pool_id: Uuid,
        name: &str,
        description: &str,
    ) -> Result<KeyPool, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadWrite).await?;
        let result = async {
            tx.update_key_pool(pool_id, name, description).await?;
            tx.get_key_pool(pool_id).await
        }
        .await;
        match result {
            Ok(pool) => {
                tx.commit().await?;
                Ok(pool)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err.into())
            }
        }
    }

    /// Validated transition to `next` inside one transaction.
    async fn transition(
        &self,
        pool_id: Uuid,
        next: KeyPoolStatus,
    ) -> Result<KeyPool, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadWrite).await?;
        let result = async {
            let mut pool = tx.get_key_pool(pool_id).await?;
            state::can_transition(pool.status, next)?;
            tx.update_key_pool_status(pool_id, next).await?;
            let from = pool.status;
            pool.status = next;
            Ok::<_, ServiceError>((pool, from))
        }
        .await;
        match result {
            Ok((pool, from)) => {
                tx.commit().await?;
                info!(pool_id = %pool_id, from = %from, to = %next, "key pool status changed");
                Ok(pool)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err)
            }
        }
    }

    /// Disable an active pool.
    ///
    /// # Errors
    ///
    /// Returns a transition error unless the pool is `Active`.
    pub async fn disable_key_pool(&self, pool_id: Uuid) -> Result<KeyPool, ServiceError> {
        self.transition(pool_id, KeyPoolStatus::Disabled).await
    }

    /// Re-enable a disabled pool.
    ///
    /// # Errors
    ///
    /// Returns a transition error unless the pool is `Disabled` or in a
    /// cancellable pending-delete state that maps back to `Active`.
    pub async fn enable_key_pool(&self, pool_id: Uuid) -> Result<KeyPool, ServiceError> {
        self.transition(pool_id, KeyPoolStatus::Active).await
    }

    /// Start deleting a pool: its status moves to the `PendingDeleteWas*`
    /// sub-state recording the current status, keeping the delete auditable
    /// and cancellable.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidPoolStatus`] if the current status
    /// has no pending-delete mapping (already deleting, or terminal).
    pub async fn delete_key_pool(&self, pool_id: Uuid) -> Result<KeyPool, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadOnly).await?;
        let pool = tx.get_key_pool(pool_id).await?;
        drop(tx);
        let pending =
            state::pending_delete_for(pool.status).ok_or(ServiceError::InvalidPoolStatus {
                pool_id,
                status: pool.status,
            })?;
        self.transition(pool_id, pending).await
    }

    /// Cancel a pending delete, restoring the recorded prior status.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidPoolStatus`] unless the pool is in a
    /// `PendingDeleteWas*` state.
    pub async fn cancel_key_pool_delete(&self, pool_id: Uuid) -> Result<KeyPool, ServiceError> {
        let mut tx = self.repository.begin(TransactionMode::ReadOnly).await?;
        let pool = tx.get_key_pool(pool_id).await?;
        drop(tx);
        let prior =
            state::prior_status_for(pool.status).ok_or(ServiceError::InvalidPoolStatus {
                pool_id,
                status: pool.status,
            })?;
        self.transition(pool_id, prior).await
    }

    /// Finish a delete: the pool becomes `FinishedDelete`, which is
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns a transition error unless the pool is in a pending-delete or
    /// started-delete state.
    pub async fn finish_key_pool_delete(&self, pool_id: Uuid) -> Result<KeyPool, ServiceError> {
        self.transition(pool_id, KeyPoolStatus::FinishedDelete).await
    }

    /// Encrypt a payload under the pool's latest key as a compact JWE.
    ///
    /// # Errors
    ///
    /// Returns an unknown-algorithm error for an unrecognized name,
    /// [`ServiceError::InvalidPoolStatus`] unless the pool is `Active`, and
    /// repository, barrier, or crypto errors otherwise.
    pub async fn encrypt(
        &self,
        pool_id: Uuid,
        requested: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ServiceError> {
        let requested: EncryptAlgorithm = requested.parse().map_err(ServiceError::Jose)?;
        let mut tx = self.repository.begin(TransactionMode::ReadOnly).await?;
        let pool = tx.get_key_pool(pool_id).await?;
        if pool.status != KeyPoolStatus::Active {
            return Err(ServiceError::InvalidPoolStatus {
                pool_id,
                status: pool.status,
            });
        }
        let latest = tx.get_latest_key(pool_id).await?;
        let material = KeyMaterial::new(
            self.barrier
                .decrypt_content(tx.as_mut(), &latest.material)
                .await?,
        );
        self.engine
            .encrypt(&pool, latest.id, &material, requested, plaintext)
            .await
    }

    /// Decrypt a compact JWE under exactly the key its `kid` header names.
    ///
    /// A malformed message fails before any repository or barrier call; a
    /// `kid` absent from the pool is a key-not-found error and the barrier
    /// is never invoked for it. Repeated decryption of the same message is
    /// pure: identical output, no stored state mutated.
    ///
    /// # Errors
    ///
    /// Returns JOSE errors for malformed or unauthentic messages,
    /// key-not-found for an unknown `kid`, and barrier errors if the key
    /// material cannot be unsealed.
    pub async fn decrypt(&self, pool_id: Uuid, jwe: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let header = decode_header(jwe)?;
        let kid = Uuid::parse_str(&header.kid).map_err(|e| JoseError::Malformed {
            reason: format!("kid '{}' is not a valid key id: {e}", header.kid),
        })?;

        let mut tx = self.repository.begin(TransactionMode::ReadOnly).await?;
        let pool = tx.get_key_pool(pool_id).await?;
        if !matches!(
            pool.status,
            KeyPoolStatus::Active | KeyPoolStatus::Disabled
        ) {
            return Err(ServiceError::InvalidPoolStatus {
                pool_id,
                status: pool.status,
            });
        }
        let key = tx.get_key(pool_id, kid).await?;
        let material = KeyMaterial::new(
            self.barrier
                .decrypt_content(tx.as_mut(), &key.material)
                .await?,
        );
        self.engine.decrypt(&pool, &material, jwe)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use keyforge_repository::{
        KeyPoolAlgorithm, KeyPoolProvider, MemoryRepository, RepositoryError,
    };

    use super::*;
    use crate::barrier::LocalBarrier;
    use crate::error::BarrierError;

    /// Wraps a barrier and counts calls, to prove code paths that must not
    /// reach it.
    struct CountingBarrier {
        inner: LocalBarrier,
        encrypt_calls: AtomicU32,
        decrypt_calls: AtomicU32,
    }

    impl CountingBarrier {
        fn new() -> Self {
            Self {
                inner: LocalBarrier::ephemeral().unwrap(),
                encrypt_calls: AtomicU32::new(0),
                decrypt_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl BarrierService for CountingBarrier {
        async fn encrypt_content(
            &self,
            tx: &mut dyn RepositoryTransaction,
            plaintext: &[u8],
        ) -> Result<Vec<u8>, BarrierError> {
            self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.encrypt_content(tx, plaintext).await
        }

        async fn decrypt_content(
            &self,
            tx: &mut dyn RepositoryTransaction,
            ciphertext: &[u8],
        ) -> Result<Vec<u8>, BarrierError> {
            self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.decrypt_content(tx, ciphertext).await
        }
    }

    fn service_with(barrier: Arc<dyn BarrierService>) -> (KeyPoolService, Arc<MemoryRepository>) {
        let repository = Arc::new(MemoryRepository::new());
        let service = KeyPoolService::new(
            Arc::clone(&repository) as Arc<dyn Repository>,
            barrier,
            &ServiceConfig::default(),
        )
        .unwrap();
        (service, repository)
    }

    fn service() -> KeyPoolService {
        service_with(Arc::new(LocalBarrier::ephemeral().unwrap())).0
    }

    fn create(algorithm: KeyPoolAlgorithm, import_allowed: bool) -> KeyPoolCreate {
        KeyPoolCreate {
            name: "orders".to_owned(),
            description: "order payload keys".to_owned(),
            provider: KeyPoolProvider::Internal,
            algorithm,
            versioning_allowed: true,
            import_allowed,
            export_allowed: false,
        }
    }

    #[tokio::test]
    async fn add_pool_generate_path_yields_one_key_and_active() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();
        assert_eq!(pool.status, KeyPoolStatus::Active);

        let keys = service
            .list_keys_for_pool(pool.id, &KeyQuery::default())
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].pool_id, pool.id);
    }

    #[tokio::test]
    async fn add_pool_import_path_yields_no_keys_and_pending_import() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, true))
            .await
            .unwrap();
        assert_eq!(pool.status, KeyPoolStatus::PendingImport);

        let keys = service
            .list_keys_for_pool(pool.id, &KeyQuery::default())
            .await
            .unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn stored_key_material_is_not_plaintext_sized() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();
        let keys = service
            .list_keys_for_pool(pool.id, &KeyQuery::default())
            .await
            .unwrap();
        // Barrier framing adds nonce and tag, so 32 raw bytes cannot come
        // back out as 32 stored bytes.
        assert!(keys[0].material.len() > 32);
    }

    #[tokio::test]
    async fn generate_key_appends_without_status_change() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes128, false))
            .await
            .unwrap();
        let key = service.generate_key(pool.id).await.unwrap();

        let keys = service
            .list_keys_for_pool(pool.id, &KeyQuery::default())
            .await
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(
            service.get_key_pool(pool.id).await.unwrap().status,
            KeyPoolStatus::Active
        );
        assert_eq!(service.get_key(pool.id, key.id).await.unwrap().id, key.id);
    }

    #[tokio::test]
    async fn generate_key_on_disabled_pool_fails_and_persists_nothing() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();
        service.disable_key_pool(pool.id).await.unwrap();

        let err = service.generate_key(pool.id).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidPoolStatus {
                status: KeyPoolStatus::Disabled,
                ..
            }
        ));
        let keys = service
            .list_keys_for_pool(pool.id, &KeyQuery::default())
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn hello_world_scenario_produces_a256gcmkw_jwe() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();

        let jwe = service
            .encrypt(pool.id, "AES-GCM-KeyWrap-V1", b"hello world")
            .await
            .unwrap();
        let header = decode_header(&jwe).unwrap();
        assert_eq!(header.alg, "A256GCMKW");
        assert_eq!(header.enc, "A256GCM");

        let opened = service.decrypt(pool.id, &jwe).await.unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[tokio::test]
    async fn round_trips_supported_algorithms_through_the_service() {
        let service = service();
        let cases = [
            ("AES-GCM-KeyWrap-V1", KeyPoolAlgorithm::Aes128),
            ("AES-GCM-Direct-V1", KeyPoolAlgorithm::Aes192),
            ("AES-CBC-HMAC-KeyWrap-V1", KeyPoolAlgorithm::Aes192),
            ("AES-CBC-HMAC-Direct-V1", KeyPoolAlgorithm::Aes256),
        ];
        for (requested, algorithm) in cases {
            let pool = service
                .add_key_pool(create(algorithm, false))
                .await
                .unwrap();
            let jwe = service
                .encrypt(pool.id, requested, b"round trip")
                .await
                .unwrap();
            let opened = service.decrypt(pool.id, &jwe).await.unwrap();
            assert_eq!(opened, b"round trip", "{requested}");
        }
    }

    #[tokio::test]
    async fn encrypt_uses_the_latest_key() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();
        let newest = service.generate_key(pool.id).await.unwrap();

        let jwe = service
            .encrypt(pool.id, "AES-GCM-Direct-V1", b"payload")
            .await
            .unwrap();
        let header = decode_header(&jwe).unwrap();
        assert_eq!(header.kid, newest.id.to_string());
    }

    #[tokio::test]
    async fn unknown_algorithm_name_fails_before_any_work() {
        let (service, _) = service_with(Arc::new(CountingBarrier::new()));
        let err = service
            .encrypt(Uuid::now_v7(), "AES-FANCY-V9", b"payload")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Jose(JoseError::UnknownAlgorithm { .. })
        ));
    }

    #[tokio::test]
    async fn decrypt_with_unknown_kid_never_calls_the_barrier() {
        let barrier = Arc::new(CountingBarrier::new());
        let (service, _) = service_with(Arc::clone(&barrier) as Arc<dyn BarrierService>);
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();
        let baseline = barrier.decrypt_calls.load(Ordering::SeqCst);

        // Well-formed header, but the kid does not exist in the pool.
        let header = serde_json::json!({
            "alg": "A256GCMKW",
            "enc": "A256GCM",
            "kid": Uuid::now_v7().to_string(),
            "iv": URL_SAFE_NO_PAD.encode([0u8; 12]),
            "tag": URL_SAFE_NO_PAD.encode([0u8; 16]),
        });
        let jwe = format!(
            "{}.{}.{}.{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
            URL_SAFE_NO_PAD.encode([0u8; 32]),
            URL_SAFE_NO_PAD.encode([0u8; 12]),
            URL_SAFE_NO_PAD.encode([0u8; 16]),
            URL_SAFE_NO_PAD.encode([0u8; 16]),
        );

        let err = service.decrypt(pool.id, jwe.as_bytes()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Repository(RepositoryError::KeyNotFound { .. })
        ));
        assert_eq!(barrier.decrypt_calls.load(Ordering::SeqCst), baseline);
    }

    #[tokio::test]
    async fn malformed_jwe_fails_before_any_repository_read() {
        let service = service();
        let err = service
            .decrypt(Uuid::now_v7(), b"definitely-not-a-jwe")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Jose(JoseError::Malformed { .. })));
    }

    #[tokio::test]
    async fn decrypt_is_repeatable() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();
        let jwe = service
            .encrypt(pool.id, "AES-GCM-KeyWrap-V1", b"stable")
            .await
            .unwrap();

        let first = service.decrypt(pool.id, &jwe).await.unwrap();
        let second = service.decrypt(pool.id, &jwe).await.unwrap();
        assert_eq!(first, second);

        let keys = service
            .list_keys_for_pool(pool.id, &KeyQuery::default())
            .await
            .unwrap();
        assert_eq!(keys.len(), 1, "decrypt must not mutate stored state");
    }

    #[tokio::test]
    async fn disabled_pool_still_decrypts_but_does_not_encrypt() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();
        let jwe = service
            .encrypt(pool.id, "AES-GCM-Direct-V1", b"old data")
            .await
            .unwrap();

        service.disable_key_pool(pool.id).await.unwrap();
        assert!(matches!(
            service
                .encrypt(pool.id, "AES-GCM-Direct-V1", b"new data")
                .await,
            Err(ServiceError::InvalidPoolStatus { .. })
        ));
        assert_eq!(service.decrypt(pool.id, &jwe).await.unwrap(), b"old data");
    }

    #[tokio::test]
    async fn delete_lifecycle_records_and_restores_prior_status() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();

        let deleting = service.delete_key_pool(pool.id).await.unwrap();
        assert_eq!(deleting.status, KeyPoolStatus::PendingDeleteWasActive);

        let restored = service.cancel_key_pool_delete(pool.id).await.unwrap();
        assert_eq!(restored.status, KeyPoolStatus::Active);

        service.delete_key_pool(pool.id).await.unwrap();
        let finished = service.finish_key_pool_delete(pool.id).await.unwrap();
        assert_eq!(finished.status, KeyPoolStatus::FinishedDelete);

        // Terminal: no further lifecycle operation succeeds.
        assert!(service.delete_key_pool(pool.id).await.is_err());
        assert!(service.enable_key_pool(pool.id).await.is_err());
    }

    #[tokio::test]
    async fn disable_enable_round_trip() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes192, false))
            .await
            .unwrap();
        assert_eq!(
            service.disable_key_pool(pool.id).await.unwrap().status,
            KeyPoolStatus::Disabled
        );
        assert_eq!(
            service.enable_key_pool(pool.id).await.unwrap().status,
            KeyPoolStatus::Active
        );
        // Disabling twice is a disallowed self-transition by the time it
        // lands.
        service.disable_key_pool(pool.id).await.unwrap();
        assert!(service.disable_key_pool(pool.id).await.is_err());
    }

    #[tokio::test]
    async fn update_key_pool_changes_metadata_only() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();
        let updated = service
            .update_key_pool(pool.id, "invoices", "invoice payload keys")
            .await
            .unwrap();
        assert_eq!(updated.name, "invoices");
        assert_eq!(updated.description, "invoice payload keys");
        assert_eq!(updated.status, pool.status);
    }

    #[tokio::test]
    async fn list_key_pools_filters_by_name() {
        let service = service();
        service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap();
        let mut other = create(KeyPoolAlgorithm::Aes128, false);
        other.name = "invoices".to_owned();
        service.add_key_pool(other).await.unwrap();

        let query = KeyPoolQuery {
            names: vec!["invoices".to_owned()],
            ..KeyPoolQuery::default()
        };
        let found = service.list_key_pools(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "invoices");
    }

    #[tokio::test]
    async fn cbc_hmac_direct_on_small_pool_is_unsupported() {
        let service = service();
        let pool = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes128, false))
            .await
            .unwrap();
        let err = service
            .encrypt(pool.id, "AES-CBC-HMAC-Direct-V1", b"payload")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Jose(JoseError::UnsupportedCombination { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_closes_generators() {
        let service = service();
        service.shutdown();
        let err = service
            .add_key_pool(create(KeyPoolAlgorithm::Aes256, false))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::GenPool(_)));
    }
}
