//! Core type definitions for Canopy.
//!
//! This crate defines the validated name types shared by every part of the
//! control plane:
//! - Organization and host names ([`OrgName`], [`HostName`])
//! - Free-form policy tags ([`Tag`])
//!
//! Names are the primary keys of the credential store, so validation lives
//! here rather than at the HTTP boundary: anything holding an `OrgName` is
//! known to be safe to embed in certificates, file paths, and group lists.

mod names;

pub use names::{HostName, NameError, OrgName, Tag, MAX_NAME_LEN};
