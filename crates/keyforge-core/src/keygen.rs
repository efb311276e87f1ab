//! Concrete generators backing the value pools.
//!
//! Raw symmetric key bytes come from the OS CSPRNG; key identifiers are
//! UUIDv7 so ids within a pool sort by creation time. Key material is
//! wrapped in a zeroize-on-drop newtype whose bytes never appear in `Debug`
//! output.

use std::fmt;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use keyforge_repository::KeyPoolAlgorithm;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::GenPoolTuning;
use crate::error::GenPoolError;
use crate::genpool::{GenPoolConfig, ValueGenPool};

/// Plaintext symmetric key bytes, cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    ///
    /// Use with care — the caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.0.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Key lengths the generators can produce.
///
/// 16/24/32 are raw AES sizes; 48 and 64 are the composite CBC-HMAC sizes
/// (MAC half followed by ENC half). Constructing a pool for any other
/// length is impossible, which keeps "invalid key size" out of the request
/// path entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLen {
    L16,
    L24,
    L32,
    L48,
    L64,
}

impl KeyLen {
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            Self::L16 => 16,
            Self::L24 => 24,
            Self::L32 => 32,
            Self::L48 => 48,
            Self::L64 => 64,
        }
    }
}

impl From<KeyPoolAlgorithm> for KeyLen {
    fn from(algorithm: KeyPoolAlgorithm) -> Self {
        match algorithm {
            KeyPoolAlgorithm::Aes128 => Self::L16,
            KeyPoolAlgorithm::Aes192 => Self::L24,
            KeyPoolAlgorithm::Aes256 => Self::L32,
        }
    }
}

fn material_pool(len: KeyLen, tuning: &GenPoolTuning) -> Result<ValueGenPool<KeyMaterial>, GenPoolError> {
    let config = GenPoolConfig {
        name: format!("material-{}", len.bytes()),
        min_items: tuning.min_items,
        max_items: tuning.max_items,
        max_lifetime_items: tuning.max_lifetime_items,
        max_lifetime: tuning.max_lifetime,
    };
    ValueGenPool::new(config, move || {
        let mut bytes = vec![0u8; len.bytes()];
        OsRng.fill_bytes(&mut bytes);
        Ok(KeyMaterial::new(bytes))
    })
}

/// One pre-generation pool per value kind.
pub struct KeyGenerators {
    material16: ValueGenPool<KeyMaterial>,
    material24: ValueGenPool<KeyMaterial>,
    material32: ValueGenPool<KeyMaterial>,
    material48: ValueGenPool<KeyMaterial>,
    material64: ValueGenPool<KeyMaterial>,
    ids: ValueGenPool<Uuid>,
}

impl KeyGenerators {
    /// Start all pools and their workers.
    ///
    /// # Errors
    ///
    /// Returns [`GenPoolError::InvalidConfig`] for unusable tuning.
    pub fn new(tuning: &GenPoolTuning) -> Result<Self, GenPoolError> {
        let ids = ValueGenPool::new(
            GenPoolConfig {
                name: "key-ids".to_owned(),
                min_items: tuning.min_items,
                max_items: tuning.max_items,
                max_lifetime_items: tuning.max_lifetime_items,
                max_lifetime: tuning.max_lifetime,
            },
            || Ok(Uuid::now_v7()),
        )?;
        Ok(Self {
            material16: material_pool(KeyLen::L16, tuning)?,
            material24: material_pool(KeyLen::L24, tuning)?,
            material32: material_pool(KeyLen::L32, tuning)?,
            material48: material_pool(KeyLen::L48, tuning)?,
            material64: material_pool(KeyLen::L64, tuning)?,
            ids,
        })
    }

    /// Take fresh key material of the given length.
    ///
    /// # Errors
    ///
    /// Returns [`GenPoolError::Closed`] after [`cancel`](Self::cancel).
    pub async fn material(&self, len: KeyLen) -> Result<KeyMaterial, GenPoolError> {
        let pool = match len {
            KeyLen::L16 => &self.material16,
            KeyLen::L24 => &self.material24,
            KeyLen::L32 => &self.material32,
            KeyLen::L48 => &self.material48,
            KeyLen::L64 => &self.material64,
        };
        pool.get().await
    }

    /// Take a fresh time-ordered key identifier.
    ///
    /// # Errors
    ///
    /// Returns [`GenPoolError::Closed`] after [`cancel`](Self::cancel).
    pub async fn key_id(&self) -> Result<Uuid, GenPoolError> {
        self.ids.get().await
    }

    /// Stop all workers. Subsequent draws fail with
    /// [`GenPoolError::Closed`].
    pub fn cancel(&self) {
        self.material16.cancel();
        self.material24.cancel();
        self.material32.cancel();
        self.material48.cancel();
        self.material64.cancel();
        self.ids.cancel();
    }
}
