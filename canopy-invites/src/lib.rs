//! Invite tokens: bounded, expiring self-enrollment capabilities.
//!
//! An invite token is a bearer secret that lets a remote peer create
//! exactly one host per use in one organization, without per-host
//! administrator interaction. Possession of the code is the entire
//! authorization, so codes are high-entropy random strings, never
//! sequential ids.
//!
//! # State machine
//!
//! `Active` → `Exhausted` (stored, remaining uses hit zero) or `Expired`
//! (derived from wall-clock time at check time, never stored) or
//! `Revoked` (stored, administrator action). All three are terminal for
//! redemption. Redemption decrements the use count under a per-token
//! lock held across host creation, and rolls the decrement back if the
//! creation fails, so a name conflict never burns a use.

mod code;
mod error;
mod service;
mod token;

pub use code::{InviteCode, INVITE_CODE_LEN};
pub use error::{InviteError, InviteResult};
pub use service::InviteService;
pub use token::{InviteStatus, InviteToken};
