//! JOSE/JWE envelope format.
//!
//! `alg` resolves logical encrypt-algorithm names against a pool's key type
//! into a concrete KEK/CEK suite; `jwe` builds and opens RFC 7516 compact
//! JWE messages for those suites.

pub mod alg;
pub mod jwe;

pub use alg::{AlgSuite, ContentEncAlg, EncryptAlgorithm, KeyWrapAlg, resolve};
pub use jwe::{JweHeader, decode_header};
