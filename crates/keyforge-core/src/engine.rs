//! Envelope crypto engine.
//!
//! Resolves the (KEK, CEK) suite for a request, draws fresh per-message
//! content keys from the generation pools, and drives the JWE layer. The
//! engine sees plaintext pool key material only as borrowed
//! [`KeyMaterial`]; fetching and barrier-decrypting it is the
//! orchestrator's job.

use std::sync::Arc;

use keyforge_repository::{KeyPool, KeyPoolProvider};
use uuid::Uuid;

use crate::error::{JoseError, ServiceError};
use crate::jose::alg::{AlgSuite, EncryptAlgorithm, resolve};
use crate::jose::{self, jwe};
use crate::keygen::{KeyGenerators, KeyMaterial};

pub struct EnvelopeCryptoEngine {
    generators: Arc<KeyGenerators>,
}

impl EnvelopeCryptoEngine {
    #[must_use]
    pub fn new(generators: Arc<KeyGenerators>) -> Self {
        Self { generators }
    }

    /// Encrypt a payload under a pool key as a compact JWE tagged with the
    /// key's id as `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::ProviderNotSupported`] for non-Internal pools,
    /// a resolution error for unsupported suites, and crypto errors from
    /// the JWE layer.
    pub async fn encrypt(
        &self,
        pool: &KeyPool,
        key_id: Uuid,
        material: &KeyMaterial,
        requested: EncryptAlgorithm,
        payload: &[u8],
    ) -> Result<Vec<u8>, ServiceError> {
        check_provider(pool)?;
        let suite = resolve(requested, pool.algorithm)?;
        let fresh_cek = match suite.kek.key_len() {
            None => None,
            Some(_) => Some(self.generators.material(suite.cek.key_len()).await?),
        };
        Ok(jwe::encrypt(suite, key_id, material, fresh_cek, payload)?)
    }

    /// Decrypt a compact JWE under the pool key named by its `kid` header.
    ///
    /// The suite is rebuilt from the message's own `alg`/`enc` headers, so
    /// a message encrypted under any supported suite decrypts regardless of
    /// what callers would request today.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError`] variants for malformed messages, unknown
    /// header algorithms, and failed authentication.
    pub fn decrypt(
        &self,
        pool: &KeyPool,
        material: &KeyMaterial,
        jwe_bytes: &[u8],
    ) -> Result<Vec<u8>, ServiceError> {
        check_provider(pool)?;
        let header = jose::decode_header(jwe_bytes)?;
        let suite = AlgSuite {
            kek: header.alg.parse()?,
            cek: header.enc.parse()?,
        };
        Ok(jwe::decrypt(suite, material, jwe_bytes)?)
    }
}

fn check_provider(pool: &KeyPool) -> Result<(), JoseError> {
    if pool.provider == KeyPoolProvider::Internal {
        Ok(())
    } else {
        Err(JoseError::ProviderNotSupported {
            provider: pool.provider.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use aes_gcm::aead::OsRng;
    use aes_gcm::aead::rand_core::RngCore;
    use keyforge_repository::{KeyPoolAlgorithm, KeyPoolStatus};

    use super::*;
    use crate::config::GenPoolTuning;

    fn engine() -> EnvelopeCryptoEngine {
        let generators = Arc::new(KeyGenerators::new(&GenPoolTuning::default()).unwrap());
        EnvelopeCryptoEngine::new(generators)
    }

    fn pool(provider: KeyPoolProvider, algorithm: KeyPoolAlgorithm) -> KeyPool {
        KeyPool {
            id: Uuid::now_v7(),
            name: "pool".to_owned(),
            description: String::new(),
            provider,
            algorithm,
            versioning_allowed: true,
            import_allowed: false,
            export_allowed: false,
            status: KeyPoolStatus::Active,
        }
    }

    fn material(len: usize) -> KeyMaterial {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        KeyMaterial::new(bytes)
    }

    #[tokio::test]
    async fn encrypt_then_decrypt_round_trips() {
        let engine = engine();
        let pool = pool(KeyPoolProvider::Internal, KeyPoolAlgorithm::Aes256);
        let key_material = material(32);
        let key_id = Uuid::now_v7();

        let jwe = engine
            .encrypt(
                &pool,
                key_id,
                &key_material,
                EncryptAlgorithm::AesGcmKeyWrapV1,
                b"payload",
            )
            .await
            .unwrap();
        let opened = engine.decrypt(&pool, &key_material, &jwe).unwrap();
        assert_eq!(opened, b"payload");
    }

    #[tokio::test]
    async fn external_provider_fails_fast() {
        let engine = engine();
        let pool = pool(KeyPoolProvider::External, KeyPoolAlgorithm::Aes256);
        let err = engine
            .encrypt(
                &pool,
                Uuid::now_v7(),
                &material(32),
                EncryptAlgorithm::AesGcmDirectV1,
                b"payload",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Jose(JoseError::ProviderNotSupported { .. })
        ));
    }

    #[tokio::test]
    async fn gcm_siv_request_is_not_implemented() {
        let engine = engine();
        let pool = pool(KeyPoolProvider::Internal, KeyPoolAlgorithm::Aes256);
        let err = engine
            .encrypt(
                &pool,
                Uuid::now_v7(),
                &material(32),
                EncryptAlgorithm::AesGcmSivDirectV1,
                b"payload",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Jose(JoseError::NotImplemented { .. })
        ));
    }

    #[tokio::test]
    async fn decrypt_with_unknown_header_algorithm_fails() {
        let engine = engine();
        let pool = pool(KeyPoolProvider::Internal, KeyPoolAlgorithm::Aes256);
        let key_material = material(32);

        let jwe = engine
            .encrypt(
                &pool,
                Uuid::now_v7(),
                &key_material,
                EncryptAlgorithm::AesGcmDirectV1,
                b"payload",
            )
            .await
            .unwrap();

        // Swap the enc header for something unknown; the suite rebuild must
        // fail before any decryption is attempted.
        let text = String::from_utf8(jwe).unwrap();
        let mut segments: Vec<String> = text.split('.').map(str::to_owned).collect();
        let header = serde_json::json!({
            "alg": "dir",
            "enc": "A512GCM",
            "kid": Uuid::now_v7().to_string(),
        });
        segments[0] = {
            use base64::Engine;
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .encode(serde_json::to_vec(&header).unwrap())
        };
        let tampered = segments.join(".");

        assert!(matches!(
            engine.decrypt(&pool, &key_material, tampered.as_bytes()),
            Err(ServiceError::Jose(JoseError::UnknownAlgorithm { .. }))
        ));
    }
}
