//! Validated name types for organizations, hosts, and tags.
//!
//! All three share the same character policy: nonempty, lowercase ASCII
//! alphanumeric, at most 63 characters. Names end up embedded in signed
//! certificates, firewall group lists, and bundle file names, so the
//! policy is enforced at construction and never re-checked downstream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length for any name or tag.
pub const MAX_NAME_LEN: usize = 63;

/// Errors from name validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name must not be empty")]
    Empty,

    #[error("name too long (max {MAX_NAME_LEN} characters): {0}")]
    TooLong(String),

    #[error("name must be lowercase alphanumeric: {0:?}")]
    InvalidChars(String),

    /// Tags starting with `org` would collide with the reserved
    /// per-organization group prepended to every certificate.
    #[error("tag must not start with \"org\": {0:?}")]
    ReservedTagPrefix(String),
}

fn check_chars(s: &str) -> Result<(), NameError> {
    if s.is_empty() {
        return Err(NameError::Empty);
    }
    if s.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong(s.to_string()));
    }
    if !s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        return Err(NameError::InvalidChars(s.to_string()));
    }
    Ok(())
}

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps a raw string.
            pub fn parse(s: &str) -> Result<Self, NameError> {
                check_chars(s)?;
                Ok(Self(s.to_string()))
            }

            /// Returns the name as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = NameError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                check_chars(&s)?;
                Ok(Self(s))
            }
        }

        impl From<$name> for String {
            fn from(n: $name) -> String {
                n.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type! {
    /// A unique organization name, the key of a tenant and its subnet.
    OrgName
}

name_type! {
    /// A host name, unique within its organization.
    HostName
}

/// A free-form policy label attached to a host and embedded in its
/// certificate's group list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    /// Validates and wraps a raw string.
    ///
    /// In addition to the shared character policy, tags must not start
    /// with `org`: the `org_<name>` group is reserved.
    pub fn parse(s: &str) -> Result<Self, NameError> {
        check_chars(s)?;
        if s.starts_with("org") {
            return Err(NameError::ReservedTagPrefix(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tag {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Tag {
    type Error = NameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Tag::parse(&s)
    }
}

impl From<Tag> for String {
    fn from(t: Tag) -> String {
        t.0
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
