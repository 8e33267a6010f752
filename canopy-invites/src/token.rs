//! Invite token records and their derived status.

use canopy_types::OrgName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::code::InviteCode;

/// The status of an invite at some instant.
///
/// `Expired` is derived from the clock at check time; `Exhausted` and
/// `Revoked` are stored by flipping `active` off. All three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Active,
    Expired,
    Exhausted,
    Revoked,
}

/// A capability to create one host per use in one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteToken {
    pub code: InviteCode,
    pub org: OrgName,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub total_uses: u32,
    pub remaining_uses: u32,
    pub active: bool,
}

impl InviteToken {
    /// Status at the given instant. Expiry takes precedence over the
    /// stored flags, matching the order redemption reports failures in.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> InviteStatus {
        if now >= self.expires_at {
            InviteStatus::Expired
        } else if self.remaining_uses == 0 {
            InviteStatus::Exhausted
        } else if !self.active {
            InviteStatus::Revoked
        } else {
            InviteStatus::Active
        }
    }

    /// Usable iff active, unexpired, and with uses remaining.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == InviteStatus::Active
    }
}
