//! Error types for the invite service.
//!
//! Redemption failures are deliberately fine-grained so an enrolling peer
//! (and an administrator reading logs) can tell a token that ran out from
//! one that was never valid. None of these are retried internally: each
//! reflects a state fact, not a transient fault.

use thiserror::Error;

/// Invite-specific errors.
#[derive(Debug, Error)]
pub enum InviteError {
    /// Malformed parameters (non-positive validity or use count).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No token with that code exists.
    #[error("invalid invite code")]
    InvalidCode,

    /// The token's expiry instant has passed.
    #[error("invite code expired")]
    Expired,

    /// Every permitted use has been redeemed.
    #[error("invite code exhausted")]
    Exhausted,

    /// The token was revoked by an administrator.
    #[error("invite code revoked")]
    Revoked,

    /// Failure from the host registry or CA during redemption or
    /// generation, surfaced verbatim.
    #[error(transparent)]
    Registry(#[from] canopy_registry::RegistryError),

    /// Failure reading or writing persisted invite state.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for invite operations.
pub type InviteResult<T> = Result<T, InviteError>;
