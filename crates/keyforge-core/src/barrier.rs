//! Barrier collaborator protecting key material at rest.
//!
//! The orchestrator never persists plaintext key material; everything that
//! reaches the repository first passes through a [`BarrierService`]. The
//! barrier itself is a black box here — production deployments back it with
//! a separate unseal layer. [`LocalBarrier`] is the in-process reference
//! implementation used by tests and single-node setups.
//!
//! # Security model
//!
//! - `LocalBarrier` derives its content key from a 256-bit root key via
//!   HKDF-SHA256 with a fixed info string.
//! - Ciphertext format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`,
//!   AES-256-GCM with a fresh `OsRng` nonce per call.
//! - The root and derived keys are zeroized on drop.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use keyforge_repository::RepositoryTransaction;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::BarrierError;

/// Nonce length for AES-256-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// Minimum ciphertext length: 12-byte nonce + 16-byte tag.
const MIN_CIPHERTEXT_LEN: usize = 12 + 16;

/// HKDF info string fixing the content-key derivation context.
const CONTENT_KEY_INFO: &[u8] = b"keyforge-barrier-content-v1";

/// Encrypts and decrypts key material at rest.
///
/// The caller's open transaction is part of the signature so an
/// implementation backed by the same database can resolve its wrapping
/// keys inside the caller's transactional snapshot.
#[async_trait::async_trait]
pub trait BarrierService: Send + Sync {
    /// Encrypt plaintext key material for storage.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Crypto`] on cipher failure and
    /// [`BarrierError::Unavailable`] when the barrier cannot serve.
    async fn encrypt_content(
        &self,
        tx: &mut dyn RepositoryTransaction,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, BarrierError>;

    /// Decrypt key material previously produced by
    /// [`encrypt_content`](BarrierService::encrypt_content).
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Crypto`] on authentication failure and
    /// [`BarrierError::Unavailable`] when the barrier cannot serve.
    async fn decrypt_content(
        &self,
        tx: &mut dyn RepositoryTransaction,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, BarrierError>;
}

/// A 256-bit key that is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct BarrierKey([u8; 32]);

/// In-process barrier with a derived AES-256-GCM content key.
pub struct LocalBarrier {
    content_key: BarrierKey,
}

impl LocalBarrier {
    /// Build a barrier around a root key, deriving the content key via
    /// HKDF-SHA256.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Crypto`] if key derivation fails.
    pub fn new(root_key: &[u8; 32]) -> Result<Self, BarrierError> {
        let hkdf = Hkdf::<Sha256>::new(None, root_key);
        let mut derived = [0u8; 32];
        hkdf.expand(CONTENT_KEY_INFO, &mut derived)
            .map_err(|e| BarrierError::Crypto {
                reason: format!("content key derivation failed: {e}"),
            })?;
        Ok(Self {
            content_key: BarrierKey(derived),
        })
    }

    /// Build a barrier with a freshly generated random root key. Suitable
    /// for tests and ephemeral deployments only: nothing encrypted under it
    /// survives a restart.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Crypto`] if key derivation fails.
    pub fn ephemeral() -> Result<Self, BarrierError> {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut root = [0u8; 32];
        root.copy_from_slice(&key);
        let barrier = Self::new(&root);
        root.zeroize();
        barrier
    }
}

#[async_trait::async_trait]
impl BarrierService for LocalBarrier {
    async fn encrypt_content(
        &self,
        _tx: &mut dyn RepositoryTransaction,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, BarrierError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.content_key.0));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| BarrierError::Crypto {
                reason: format!("encryption failed: {e}"),
            })?;

        let mut combined = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(combined)
    }

    async fn decrypt_content(
        &self,
        _tx: &mut dyn RepositoryTransaction,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, BarrierError> {
        if ciphertext.len() < MIN_CIPHERTEXT_LEN {
            return Err(BarrierError::Crypto {
                reason: format!(
                    "ciphertext too short: expected at least {MIN_CIPHERTEXT_LEN} bytes, got {}",
                    ciphertext.len()
                ),
            });
        }

        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.content_key.0));
        cipher
            .decrypt(nonce, sealed)
            .map_err(|_| BarrierError::Crypto {
                reason: "decryption failed: authentication error".to_owned(),
            })
    }
}
