//! Certificate authority for the Canopy mesh control plane.
//!
//! This crate owns everything that touches the CA key pair:
//! - Mesh certificate encoding and Ed25519 signature verification
//! - CA lifecycle (creation, rotation, status queries)
//! - Host certificate issuance bound to a name, address, and group list
//!
//! # Certificate Format
//!
//! Certificates are formatted as: `base64url(payload).base64url(signature)`
//! The payload is a JSON object signed with Ed25519, containing the subject
//! name, mesh network address, group list, validity window, subject public
//! key, and the issuing CA's fingerprint. The signature covers the
//! base64url-encoded payload bytes, so mutating any embedded field
//! invalidates it.
//!
//! # Design Principles
//!
//! - **No ambient state**: the CA is an explicitly constructed
//!   [`CertificateAuthority`] value injected into whatever needs to sign.
//! - **Key containment**: the private key never leaves this crate, is
//!   zeroized on drop, and is excluded from every status response.
//! - **Fail fast**: all certificate-dependent operations return
//!   [`CaError::Unavailable`] when no CA exists.

mod authority;
mod cert;
mod error;
mod keys;

pub use authority::{CaInfo, CertificateAuthority, IssueRequest, CA_VALIDITY_DAYS, HOST_CERT_VALIDITY_DAYS};
pub use cert::{CertificateDetails, MeshCertificate, Validity};
pub use error::{CaError, CaResult};
pub use keys::{KeyPair, Signature, SigningKey, VerifyingKey};
