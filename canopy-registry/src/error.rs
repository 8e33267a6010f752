//! Error types for the registry crate.

use canopy_types::NameError;
use thiserror::Error;

/// Registry-specific errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No organization with that name.
    #[error("organization not found: {0}")]
    OrgNotFound(String),

    /// An organization with that name already exists.
    #[error("organization already exists: {0}")]
    OrgExists(String),

    /// The organization still owns hosts and cannot be deleted.
    #[error("organization {0} still owns {1} host(s)")]
    OrgHasHosts(String, usize),

    /// No host with that name in the organization.
    #[error("host not found: {org}/{host}")]
    HostNotFound { org: String, host: String },

    /// A host with that name already exists in the organization.
    #[error("host already exists: {org}/{host}")]
    HostExists { org: String, host: String },

    /// The /48 block space has no unused /64 left.
    #[error("no available subnets")]
    SubnetsExhausted,

    /// The organization's subnet has no free address.
    #[error("no available addresses in subnet of organization {0}")]
    AddressesExhausted(String),

    /// Malformed subnet notation or prefix.
    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),

    /// Certificate authority failure (absent CA, invalid window, ...).
    #[error(transparent)]
    Ca(#[from] canopy_ca::CaError),

    /// Name validation failure.
    #[error(transparent)]
    Name(#[from] NameError),

    /// Failure reading or writing persisted registry state.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML rendering error for generated host configs.
    #[error("config rendering error: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    /// ZIP error while building a host bundle.
    #[error("bundle error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error while building a host bundle.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
