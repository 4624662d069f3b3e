//! Error types shared by the migration pipeline crates.

use thiserror::Error;

/// Result type alias using our [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// BIP-340 nonce generation produced a degenerate scalar. Retry signing
    /// with a fresh `aux_rand` per §4.1 — this should essentially never
    /// happen for a well-formed secret key.
    #[error("nonce degenerate, retry signing")]
    NonceDegenerate,

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("event id mismatch: computed {computed} != transmitted {transmitted}")]
    EventIdMismatch { computed: String, transmitted: String },

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}
