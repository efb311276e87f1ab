//! Error types for `keyforge-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material — only key
//! identifiers, algorithm names, or operation descriptions.

use keyforge_repository::{KeyPoolStatus, RepositoryError};
use uuid::Uuid;

/// Errors from a value-generation pool.
#[derive(Debug, thiserror::Error)]
pub enum GenPoolError {
    /// Pool parameters are unusable. Fatal at construction time, never
    /// surfaced from `get()`.
    #[error("invalid generator pool config for '{pool}': {reason}")]
    InvalidConfig { pool: String, reason: String },

    /// The pool was cancelled and its worker stopped.
    #[error("generator pool '{pool}' is closed")]
    Closed { pool: String },
}

/// Errors from the key pool lifecycle state machine.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    /// The transition exists in neither direction: `to` is not a legal
    /// successor of `from`. Self-transitions land here too.
    #[error("key pool status transition {from} -> {to} is not allowed")]
    NotAllowed {
        from: KeyPoolStatus,
        to: KeyPoolStatus,
    },

    /// The current state string is not a recognized status at all.
    /// Distinct from [`NotAllowed`](TransitionError::NotAllowed) so callers
    /// can tell a corrupted row from a disallowed request.
    #[error("unrecognized key pool status '{state}'")]
    UnknownState { state: String },
}

/// Errors from JOSE/JWE algorithm resolution and message processing.
#[derive(Debug, thiserror::Error)]
pub enum JoseError {
    /// The requested logical algorithm name is not known.
    #[error("unknown encrypt algorithm '{name}'")]
    UnknownAlgorithm { name: String },

    /// The (requested algorithm, pool key type) pair has no mapping.
    #[error("algorithm '{requested}' is not supported for {pool_algorithm} key pools: {reason}")]
    UnsupportedCombination {
        requested: String,
        pool_algorithm: String,
        reason: String,
    },

    /// The mapping exists but is deliberately unimplemented.
    #[error("algorithm '{requested}' is not implemented")]
    NotImplemented { requested: String },

    /// Only the Internal key pool provider can perform crypto here.
    #[error("key pool provider '{provider}' is not supported yet")]
    ProviderNotSupported { provider: String },

    /// Key material length does not match what the algorithm requires.
    #[error("key material for {context} must be {expected} bytes, got {actual}")]
    KeyLength {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The JWE protected header lacks a required field.
    #[error("JWE protected header is missing required field '{field}'")]
    MissingHeader { field: &'static str },

    /// The compact JWE serialization or one of its segments is malformed.
    #[error("malformed JWE: {reason}")]
    Malformed { reason: String },

    /// Content or key-wrap encryption failed.
    #[error("JWE encryption failed: {reason}")]
    Encryption { reason: String },

    /// Content or key-unwrap decryption failed (wrong key, corrupted
    /// ciphertext, or tampered tag).
    #[error("JWE decryption failed: {reason}")]
    Decryption { reason: String },
}

/// Errors from the barrier collaborator protecting key material at rest.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// A cryptographic operation inside the barrier failed.
    #[error("barrier crypto error: {reason}")]
    Crypto { reason: String },

    /// The barrier cannot serve requests (sealed, unreachable).
    #[error("barrier is unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Top-level error for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The pool exists but its status forbids the requested operation.
    #[error("key pool {pool_id} is in status {status}, which does not permit this operation")]
    InvalidPoolStatus {
        pool_id: Uuid,
        status: KeyPoolStatus,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Jose(#[from] JoseError),

    #[error(transparent)]
    Barrier(#[from] BarrierError),

    #[error(transparent)]
    GenPool(#[from] GenPoolError),
}
