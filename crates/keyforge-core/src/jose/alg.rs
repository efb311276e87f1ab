//! Algorithm-selection matrix.
//!
//! Callers request a logical, versioned algorithm name; together with the
//! pool's key type it resolves to a concrete (KEK, CEK) pair from RFC 7518.
//! The mapping is a single exhaustive match so every cell of the matrix is
//! visible and testable in one place. Unsupported cells fail here, before
//! any cryptographic call.

use std::fmt;
use std::str::FromStr;

use keyforge_repository::KeyPoolAlgorithm;

use crate::error::JoseError;
use crate::keygen::KeyLen;

/// Logical encrypt-algorithm names accepted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptAlgorithm {
    /// Wrap a fresh per-message key, AES-GCM content encryption.
    AesGcmKeyWrapV1,
    /// Pool key used directly as CEK, AES-GCM content encryption.
    AesGcmDirectV1,
    /// Wrap a fresh per-message key, CBC-HMAC content encryption.
    AesCbcHmacKeyWrapV1,
    /// Pool key used directly as CEK, CBC-HMAC content encryption.
    AesCbcHmacDirectV1,
    /// Deterministic encryption for searchable fields. Reserved; resolving
    /// it always fails explicitly.
    AesGcmSivDirectV1,
}

impl EncryptAlgorithm {
    pub const ALL: [Self; 5] = [
        Self::AesGcmKeyWrapV1,
        Self::AesGcmDirectV1,
        Self::AesCbcHmacKeyWrapV1,
        Self::AesCbcHmacDirectV1,
        Self::AesGcmSivDirectV1,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AesGcmKeyWrapV1 => "AES-GCM-KeyWrap-V1",
            Self::AesGcmDirectV1 => "AES-GCM-Direct-V1",
            Self::AesCbcHmacKeyWrapV1 => "AES-CBC-HMAC-KeyWrap-V1",
            Self::AesCbcHmacDirectV1 => "AES-CBC-HMAC-Direct-V1",
            Self::AesGcmSivDirectV1 => "AES-GCM-SIV-Direct-V1",
        }
    }
}

impl fmt::Display for EncryptAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptAlgorithm {
    type Err = JoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| JoseError::UnknownAlgorithm { name: s.to_owned() })
    }
}

/// Key-encryption algorithm, the JWE `alg` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWrapAlg {
    A128GcmKw,
    A192GcmKw,
    A256GcmKw,
    /// Direct use of the pool key as CEK; the encrypted-key segment is
    /// empty.
    Dir,
}

impl KeyWrapAlg {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A128GcmKw => "A128GCMKW",
            Self::A192GcmKw => "A192GCMKW",
            Self::A256GcmKw => "A256GCMKW",
            Self::Dir => "dir",
        }
    }

    /// KEK length in bytes; `None` for `dir` (no wrapping key).
    #[must_use]
    pub fn key_len(self) -> Option<usize> {
        match self {
            Self::A128GcmKw => Some(16),
            Self::A192GcmKw => Some(24),
            Self::A256GcmKw => Some(32),
            Self::Dir => None,
        }
    }
}

impl fmt::Display for KeyWrapAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyWrapAlg {
    type Err = JoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A128GCMKW" => Ok(Self::A128GcmKw),
            "A192GCMKW" => Ok(Self::A192GcmKw),
            "A256GCMKW" => Ok(Self::A256GcmKw),
            "dir" => Ok(Self::Dir),
            other => Err(JoseError::UnknownAlgorithm {
                name: other.to_owned(),
            }),
        }
    }
}

/// Content-encryption algorithm, the JWE `enc` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncAlg {
    A128Gcm,
    A192Gcm,
    A256Gcm,
    A128CbcHs256,
    A192CbcHs384,
    A256CbcHs512,
}

impl ContentEncAlg {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A128Gcm => "A128GCM",
            Self::A192Gcm => "A192GCM",
            Self::A256Gcm => "A256GCM",
            Self::A128CbcHs256 => "A128CBC-HS256",
            Self::A192CbcHs384 => "A192CBC-HS384",
            Self::A256CbcHs512 => "A256CBC-HS512",
        }
    }

    /// CEK length in bytes. Composite CBC-HMAC keys are twice the AES size.
    #[must_use]
    pub fn key_len(self) -> KeyLen {
        match self {
            Self::A128Gcm => KeyLen::L16,
            Self::A192Gcm => KeyLen::L24,
            Self::A256Gcm | Self::A128CbcHs256 => KeyLen::L32,
            Self::A192CbcHs384 => KeyLen::L48,
            Self::A256CbcHs512 => KeyLen::L64,
        }
    }

    #[must_use]
    pub fn is_cbc_hmac(self) -> bool {
        matches!(
            self,
            Self::A128CbcHs256 | Self::A192CbcHs384 | Self::A256CbcHs512
        )
    }
}

impl fmt::Display for ContentEncAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentEncAlg {
    type Err = JoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A128GCM" => Ok(Self::A128Gcm),
            "A192GCM" => Ok(Self::A192Gcm),
            "A256GCM" => Ok(Self::A256Gcm),
            "A128CBC-HS256" => Ok(Self::A128CbcHs256),
            "A192CBC-HS384" => Ok(Self::A192CbcHs384),
            "A256CBC-HS512" => Ok(Self::A256CbcHs512),
            other => Err(JoseError::UnknownAlgorithm {
                name: other.to_owned(),
            }),
        }
    }
}

/// A resolved (KEK, CEK) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgSuite {
    pub kek: KeyWrapAlg,
    pub cek: ContentEncAlg,
}

/// Resolve a requested algorithm against a pool's key type.
///
/// Direct CBC-HMAC is only possible where the pool key length equals the
/// composite CEK length, which holds for AES-256 pools and `A128CBC-HS256`
/// alone; the other direct CBC-HMAC cells are unsupported combinations.
/// GCM-SIV is reserved and must fail rather than silently substitute
/// another mode.
///
/// # Errors
///
/// Returns [`JoseError::UnsupportedCombination`] for cells without a
/// mapping and [`JoseError::NotImplemented`] for the GCM-SIV family.
pub fn resolve(
    requested: EncryptAlgorithm,
    pool_algorithm: KeyPoolAlgorithm,
) -> Result<AlgSuite, JoseError> {
    use KeyPoolAlgorithm::{Aes128, Aes192, Aes256};

    let suite = |kek, cek| Ok(AlgSuite { kek, cek });
    match (requested, pool_algorithm) {
        (EncryptAlgorithm::AesGcmKeyWrapV1, Aes128) => {
            suite(KeyWrapAlg::A128GcmKw, ContentEncAlg::A128Gcm)
        }
        (EncryptAlgorithm::AesGcmKeyWrapV1, Aes192) => {
            suite(KeyWrapAlg::A192GcmKw, ContentEncAlg::A192Gcm)
        }
        (EncryptAlgorithm::AesGcmKeyWrapV1, Aes256) => {
            suite(KeyWrapAlg::A256GcmKw, ContentEncAlg::A256Gcm)
        }
        (EncryptAlgorithm::AesGcmDirectV1, Aes128) => {
            suite(KeyWrapAlg::Dir, ContentEncAlg::A128Gcm)
        }
        (EncryptAlgorithm::AesGcmDirectV1, Aes192) => {
            suite(KeyWrapAlg::Dir, ContentEncAlg::A192Gcm)
        }
        (EncryptAlgorithm::AesGcmDirectV1, Aes256) => {
            suite(KeyWrapAlg::Dir, ContentEncAlg::A256Gcm)
        }
        (EncryptAlgorithm::AesCbcHmacKeyWrapV1, Aes128) => {
            suite(KeyWrapAlg::A128GcmKw, ContentEncAlg::A128CbcHs256)
        }
        (EncryptAlgorithm::AesCbcHmacKeyWrapV1, Aes192) => {
            suite(KeyWrapAlg::A192GcmKw, ContentEncAlg::A192CbcHs384)
        }
        (EncryptAlgorithm::AesCbcHmacKeyWrapV1, Aes256) => {
            suite(KeyWrapAlg::A256GcmKw, ContentEncAlg::A256CbcHs512)
        }
        (EncryptAlgorithm::AesCbcHmacDirectV1, Aes256) => {
            suite(KeyWrapAlg::Dir, ContentEncAlg::A128CbcHs256)
        }
        (EncryptAlgorithm::AesCbcHmacDirectV1, Aes128 | Aes192) => {
            Err(JoseError::UnsupportedCombination {
                requested: requested.to_string(),
                pool_algorithm: pool_algorithm.to_string(),
                reason: "pool key is shorter than the composite CBC-HMAC content key".to_owned(),
            })
        }
        (EncryptAlgorithm::AesGcmSivDirectV1, _) => Err(JoseError::NotImplemented {
            requested: requested.to_string(),
        }),
    }
}
