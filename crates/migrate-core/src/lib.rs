//! Core types, canonical event serialization, and the Event Signer (C1)
//! shared by the migration pipeline.
//!
//! # Modules
//!
//! - [`types`]: Migration/Post/Article/Profile/Event data model, KeySource
//! - [`canonical`]: canonical JSON serialization for event-id hashing
//! - [`crypto`]: BIP-340 Schnorr signing, SHA-256 helpers
//! - [`error`]: shared error type

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod types;

#[cfg(test)]
mod test_vectors;

pub use error::{Error, Result};
pub use types::*;
