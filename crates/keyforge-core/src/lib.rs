//! Core library for Keyforge.
//!
//! Contains the key pool lifecycle state machine, background
//! value-generation pools, the JOSE/JWE envelope engine, the barrier
//! collaborator trait, and the transactional orchestrator. This crate
//! depends on `keyforge-repository` for the persistence traits and knows
//! nothing about transports.

pub mod barrier;
pub mod config;
pub mod engine;
pub mod error;
pub mod genpool;
pub mod jose;
pub mod keygen;
pub mod service;
pub mod state;

pub use barrier::{BarrierService, LocalBarrier};
pub use config::{GenPoolTuning, ServiceConfig};
pub use engine::EnvelopeCryptoEngine;
pub use error::{BarrierError, GenPoolError, JoseError, ServiceError, TransitionError};
pub use jose::alg::EncryptAlgorithm;
pub use keygen::{KeyGenerators, KeyMaterial};
pub use service::KeyPoolService;
