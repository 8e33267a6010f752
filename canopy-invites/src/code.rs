//! High-entropy invite code generation.

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of generated invite codes. 32 alphanumeric characters is just
/// under 191 bits of entropy.
pub const INVITE_CODE_LEN: usize = 32;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// An opaque bearer code. The code is the entire authorization for
/// redemption, so Debug output shows only a prefix.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InviteCode(String);

impl InviteCode {
    /// Generates a fresh random code from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let code: String = (0..INVITE_CODE_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Wraps a caller-supplied code string (trimmed).
    #[must_use]
    pub fn from_input(s: &str) -> Self {
        Self(s.trim().to_string())
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short non-secret prefix for logs.
    #[must_use]
    pub fn preview(&self) -> String {
        let prefix: String = self.0.chars().take(6).collect();
        format!("{prefix}…")
    }
}

impl fmt::Display for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InviteCode({})", self.preview())
    }
}
