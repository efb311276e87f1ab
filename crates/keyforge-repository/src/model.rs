//! Domain model for key pools and keys.
//!
//! A [`KeyPool`] is a named, algorithm-typed grouping of key generations.
//! A [`Key`] is one generation of symmetric key material belonging to
//! exactly one pool, identified by a time-ordered UUIDv7. Key material is
//! stored only as barrier ciphertext — this crate never sees plaintext.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who holds the raw key material for a pool.
///
/// Only [`Internal`](KeyPoolProvider::Internal) is implemented; `External`
/// is a placeholder for a future cloud-HSM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPoolProvider {
    Internal,
    External,
}

impl fmt::Display for KeyPoolProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "Internal"),
            Self::External => write!(f, "External"),
        }
    }
}

/// The symmetric key type of a pool. Determines raw material length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPoolAlgorithm {
    Aes128,
    Aes192,
    Aes256,
}

impl KeyPoolAlgorithm {
    /// Raw key length in bytes (16, 24, or 32).
    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }
}

impl fmt::Display for KeyPoolAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes128 => write!(f, "AES-128"),
            Self::Aes192 => write!(f, "AES-192"),
            Self::Aes256 => write!(f, "AES-256"),
        }
    }
}

/// Parse failure for [`KeyPoolAlgorithm`] or [`KeyPoolStatus`] string forms.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariantError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for KeyPoolAlgorithm {
    type Err = UnknownVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES-128" => Ok(Self::Aes128),
            "AES-192" => Ok(Self::Aes192),
            "AES-256" => Ok(Self::Aes256),
            other => Err(UnknownVariantError {
                kind: "key pool algorithm",
                value: other.to_owned(),
            }),
        }
    }
}

/// Lifecycle status of a key pool.
///
/// Mutated exclusively through the state machine in `keyforge-core`. A pool
/// is created in `Creating`, advances to `PendingImport` or
/// `PendingGenerate`, becomes `Active` once it holds at least one key, and
/// can only be deleted through an auditable `PendingDeleteWas*` sub-state
/// that records the prior status. `FinishedDelete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPoolStatus {
    Creating,
    PendingImport,
    PendingGenerate,
    ImportFailed,
    GenerateFailed,
    Active,
    Disabled,
    StartedDelete,
    PendingDeleteWasImportFailed,
    PendingDeleteWasPendingImport,
    PendingDeleteWasActive,
    PendingDeleteWasDisabled,
    PendingDeleteWasGenerateFailed,
    FinishedDelete,
}

impl KeyPoolStatus {
    /// All statuses, for exhaustive table-driven tests.
    pub const ALL: [Self; 14] = [
        Self::Creating,
        Self::PendingImport,
        Self::PendingGenerate,
        Self::ImportFailed,
        Self::GenerateFailed,
        Self::Active,
        Self::Disabled,
        Self::StartedDelete,
        Self::PendingDeleteWasImportFailed,
        Self::PendingDeleteWasPendingImport,
        Self::PendingDeleteWasActive,
        Self::PendingDeleteWasDisabled,
        Self::PendingDeleteWasGenerateFailed,
        Self::FinishedDelete,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::PendingImport => "PendingImport",
            Self::PendingGenerate => "PendingGenerate",
            Self::ImportFailed => "ImportFailed",
            Self::GenerateFailed => "GenerateFailed",
            Self::Active => "Active",
            Self::Disabled => "Disabled",
            Self::StartedDelete => "StartedDelete",
            Self::PendingDeleteWasImportFailed => "PendingDeleteWasImportFailed",
            Self::PendingDeleteWasPendingImport => "PendingDeleteWasPendingImport",
            Self::PendingDeleteWasActive => "PendingDeleteWasActive",
            Self::PendingDeleteWasDisabled => "PendingDeleteWasDisabled",
            Self::PendingDeleteWasGenerateFailed => "PendingDeleteWasGenerateFailed",
            Self::FinishedDelete => "FinishedDelete",
        }
    }
}

impl fmt::Display for KeyPoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPoolStatus {
    type Err = UnknownVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariantError {
                kind: "key pool status",
                value: s.to_owned(),
            })
    }
}

/// A key pool row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPool {
    /// Stable identifier (UUIDv7).
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Who holds the raw material.
    pub provider: KeyPoolProvider,
    /// Symmetric key type of every key in this pool.
    pub algorithm: KeyPoolAlgorithm,
    /// Whether new key generations may be added after the first.
    pub versioning_allowed: bool,
    /// Whether the first key is imported rather than generated.
    pub import_allowed: bool,
    /// Whether key material may leave the service.
    pub export_allowed: bool,
    /// Lifecycle status — the only field mutated after insert (besides
    /// name/description updates).
    pub status: KeyPoolStatus,
}

/// Parameters for creating a new key pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPoolCreate {
    pub name: String,
    pub description: String,
    pub provider: KeyPoolProvider,
    pub algorithm: KeyPoolAlgorithm,
    pub versioning_allowed: bool,
    pub import_allowed: bool,
    pub export_allowed: bool,
}

/// One key generation inside a pool. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    /// Owning pool.
    pub pool_id: Uuid,
    /// Unique, time-ordered identifier (UUIDv7). "Latest key" is the
    /// maximum id within a pool.
    pub id: Uuid,
    /// Barrier ciphertext of the raw key material. Never plaintext.
    pub material: Vec<u8>,
    /// When the material was generated (or imported).
    pub generate_date: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in KeyPoolStatus::ALL {
            let parsed: KeyPoolStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        let err = "NotARealStatus".parse::<KeyPoolStatus>().unwrap_err();
        assert_eq!(err.value, "NotARealStatus");
    }

    #[test]
    fn algorithm_key_lengths() {
        assert_eq!(KeyPoolAlgorithm::Aes128.key_len(), 16);
        assert_eq!(KeyPoolAlgorithm::Aes192.key_len(), 24);
        assert_eq!(KeyPoolAlgorithm::Aes256.key_len(), 32);
    }

    #[test]
    fn algorithm_round_trips_through_strings() {
        for alg in [
            KeyPoolAlgorithm::Aes128,
            KeyPoolAlgorithm::Aes192,
            KeyPoolAlgorithm::Aes256,
        ] {
            let parsed: KeyPoolAlgorithm = alg.to_string().parse().unwrap();
            assert_eq!(parsed, alg);
        }
    }
}
