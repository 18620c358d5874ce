//! Core library for Coffer.
//!
//! Contains the encryption barrier, cryptographic primitives, the seal
//! abstraction, the secret-sharing codec, recipient wrapping of shares, the
//! token store, the logical-backend boundary, and the [`Core`](crate::core::Core)
//! orchestrator that ties them together for the initialize/unseal/seal
//! lifecycle. This crate depends on `coffer-storage` for the storage backend
//! trait and knows nothing about any network surface.

pub mod barrier;
pub mod core;
pub mod crypto;
pub mod error;
pub mod logical;
pub mod seal;
pub mod shamir;
pub mod token;
pub mod wrap;
