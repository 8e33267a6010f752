//! Error types for the certificate authority.

use thiserror::Error;

/// CA-specific errors.
#[derive(Debug, Error)]
pub enum CaError {
    /// A CA already exists; rotation is the only way to replace it.
    #[error("a certificate authority already exists")]
    AlreadyExists,

    /// The operation requires a CA that has not been created yet.
    #[error("no certificate authority is available")]
    Unavailable,

    /// Rotation was attempted without the explicit confirmation flag.
    #[error("CA rotation is destructive and requires confirmation")]
    RotationNotConfirmed,

    /// The requested validity window falls outside the CA's own window.
    #[error("requested validity window exceeds the CA window: {0}")]
    InvalidValidity(String),

    /// Invalid certificate string format.
    #[error("invalid certificate format: {0}")]
    InvalidFormat(String),

    /// Ed25519 signature verification failed.
    #[error("certificate signature invalid")]
    InvalidSignature,

    /// Payload JSON is malformed or missing required fields.
    #[error("invalid certificate payload: {0}")]
    InvalidPayload(String),

    /// Malformed key material.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Failure reading or writing persisted CA state.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CA operations.
pub type CaResult<T> = Result<T, CaError>;
