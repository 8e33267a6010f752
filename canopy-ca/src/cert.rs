//! Mesh certificate encoding, parsing, and signature verification.
//!
//! Certificates use the format: `base64url(payload).base64url(signature)`
//!
//! The payload is a JSON object containing:
//! - `name`: subject host or CA root name
//! - `network`: assigned mesh address in CIDR notation (empty for the root)
//! - `groups`: ordered group list (`org_<org>` followed by the host's tags)
//! - `not_before` / `not_after`: validity window (seconds since epoch)
//! - `public_key`: the subject's Ed25519 public key (base64url)
//! - `is_ca`: whether this is the self-signed root
//! - `issuer`: hex fingerprint of the signing CA (absent on the root)
//!
//! The signature covers `payload_b64.as_bytes()` (the base64url-encoded
//! payload string, not the decoded JSON), so any later mutation of an
//! embedded field invalidates it. The certificate fingerprint is the hex
//! SHA-256 digest of the full encoded string.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CaError, CaResult};
use crate::keys::{Signature, SigningKey, VerifyingKey};

/// A certificate validity window in seconds since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub not_before: i64,
    pub not_after: i64,
}

impl Validity {
    /// A window starting now and lasting the given number of days.
    #[must_use]
    pub fn days_from_now(days: u32) -> Self {
        let now = Utc::now().timestamp();
        Self {
            not_before: now,
            not_after: now + i64::from(days) * 24 * 60 * 60,
        }
    }

    /// Returns true if `other` lies entirely within this window.
    #[must_use]
    pub fn contains(&self, other: &Validity) -> bool {
        self.not_before <= other.not_before && other.not_after <= self.not_after
    }

    /// Returns true if the instant falls inside the window.
    #[must_use]
    pub fn is_current_at(&self, ts: i64) -> bool {
        self.not_before <= ts && ts < self.not_after
    }
}

/// The decoded certificate payload.
///
/// A fixed, explicit structure with named fields rather than an open-ended
/// document, so absent and malformed data are distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDetails {
    /// Subject name (host name, or root name for the CA certificate).
    pub name: String,
    /// Assigned mesh address in CIDR notation; empty for the root.
    #[serde(default)]
    pub network: String,
    /// Ordered group list embedded at issuance.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Validity start (seconds since epoch).
    pub not_before: i64,
    /// Validity end (seconds since epoch).
    pub not_after: i64,
    /// Subject Ed25519 public key (base64url, 32 bytes).
    pub public_key: String,
    /// Whether this certificate is a self-signed root.
    #[serde(default)]
    pub is_ca: bool,
    /// Hex SHA-256 fingerprint of the issuing CA certificate.
    /// `None` on the self-signed root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// A parsed mesh certificate.
///
/// Parsing does not verify the signature: trust decisions must call
/// [`MeshCertificate::verify`] against the current CA key every time,
/// never cache a previous verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeshCertificate {
    raw: String,
    details: CertificateDetails,
}

impl MeshCertificate {
    /// Encodes and signs a certificate payload.
    pub(crate) fn sign(details: &CertificateDetails, key: &SigningKey) -> CaResult<Self> {
        let payload_json = serde_json::to_string(details)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json.as_bytes());
        let signature = key.sign(payload_b64.as_bytes());
        let raw = format!("{payload_b64}.{}", signature.to_base64());
        Ok(Self {
            raw,
            details: details.clone(),
        })
    }

    /// Parses a certificate string without verifying its signature.
    pub fn parse(cert: &str) -> CaResult<Self> {
        let cert = cert.trim();

        let parts: Vec<&str> = cert.split('.').collect();
        if parts.len() != 2 {
            return Err(CaError::InvalidFormat(
                "certificate must have exactly two parts separated by a dot".to_string(),
            ));
        }

        // Decode eagerly so a malformed signature fails at parse time,
        // not at first verification.
        Signature::from_base64(parts[1])?;

        let payload_json = URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|e| CaError::InvalidFormat(format!("invalid payload base64: {e}")))?;
        let details: CertificateDetails = serde_json::from_slice(&payload_json)
            .map_err(|e| CaError::InvalidPayload(format!("invalid payload JSON: {e}")))?;

        Ok(Self {
            raw: cert.to_string(),
            details,
        })
    }

    /// Verifies the signature against the given CA verifying key.
    pub fn verify(&self, ca_key: &VerifyingKey) -> CaResult<()> {
        let (payload_b64, sig_b64) = self
            .raw
            .split_once('.')
            .ok_or_else(|| CaError::InvalidFormat("missing signature part".to_string()))?;
        let signature = Signature::from_base64(sig_b64)?;
        ca_key.verify(payload_b64.as_bytes(), &signature)
    }

    /// Returns the full encoded certificate string.
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.raw
    }

    /// Returns the decoded payload.
    #[must_use]
    pub fn details(&self) -> &CertificateDetails {
        &self.details
    }

    /// Returns the subject's public key.
    pub fn public_key(&self) -> CaResult<VerifyingKey> {
        VerifyingKey::from_base64(&self.details.public_key)
    }

    /// Hex SHA-256 fingerprint of the encoded certificate.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.raw.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// The signature part of the encoding, base64url.
    #[must_use]
    pub fn signature_base64(&self) -> &str {
        self.raw.split_once('.').map(|(_, sig)| sig).unwrap_or("")
    }

    /// The embedded validity window.
    #[must_use]
    pub fn validity(&self) -> Validity {
        Validity {
            not_before: self.details.not_before,
            not_after: self.details.not_after,
        }
    }

    /// Returns true if the certificate window contains the instant.
    #[must_use]
    pub fn is_valid_at(&self, ts: i64) -> bool {
        self.validity().is_current_at(ts)
    }
}

impl std::fmt::Display for MeshCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for MeshCertificate {
    type Error = CaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<MeshCertificate> for String {
    fn from(cert: MeshCertificate) -> String {
        cert.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    fn details(kp: &KeyPair) -> CertificateDetails {
        CertificateDetails {
            name: "laptop1".into(),
            network: "fd6c:1f2e:3d4c:1::1/64".into(),
            groups: vec!["org_eng".into(), "vpn".into()],
            not_before: 1_700_000_000,
            not_after: 1_800_000_000,
            public_key: kp.verifying_key.to_base64(),
            is_ca: false,
            issuer: Some("ab".repeat(32)),
        }
    }

    #[test]
    fn sign_parse_verify() {
        let ca = KeyPair::generate();
        let subject = KeyPair::generate();
        let cert = MeshCertificate::sign(&details(&subject), &ca.signing_key).unwrap();

        let parsed = MeshCertificate::parse(cert.encoded()).unwrap();
        assert_eq!(parsed.details(), cert.details());
        assert!(parsed.verify(&ca.verifying_key).is_ok());
    }

    #[test]
    fn verify_with_wrong_ca_fails() {
        let ca = KeyPair::generate();
        let other = KeyPair::generate();
        let subject = KeyPair::generate();
        let cert = MeshCertificate::sign(&details(&subject), &ca.signing_key).unwrap();
        assert!(matches!(
            cert.verify(&other.verifying_key),
            Err(CaError::InvalidSignature)
        ));
    }

    #[test]
    fn mutated_payload_invalidates_signature() {
        let ca = KeyPair::generate();
        let subject = KeyPair::generate();
        let cert = MeshCertificate::sign(&details(&subject), &ca.signing_key).unwrap();

        // Re-encode with a tampered group list but the original signature.
        let mut tampered = cert.details().clone();
        tampered.groups.push("admin".into());
        let payload_json = serde_json::to_string(&tampered).unwrap();
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json.as_bytes());
        let forged = format!("{payload_b64}.{}", cert.signature_base64());

        let parsed = MeshCertificate::parse(&forged).unwrap();
        assert!(parsed.verify(&ca.verifying_key).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(MeshCertificate::parse("not-a-cert").is_err());
        assert!(MeshCertificate::parse("a.b.c").is_err());
        assert!(MeshCertificate::parse("!!!.???").is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_content_bound() {
        let ca = KeyPair::generate();
        let subject = KeyPair::generate();
        let cert = MeshCertificate::sign(&details(&subject), &ca.signing_key).unwrap();
        assert_eq!(cert.fingerprint(), cert.fingerprint());
        assert_eq!(cert.fingerprint().len(), 64);

        let mut d2 = details(&subject);
        d2.name = "laptop2".into();
        let cert2 = MeshCertificate::sign(&d2, &ca.signing_key).unwrap();
        assert_ne!(cert.fingerprint(), cert2.fingerprint());
    }

    #[test]
    fn validity_window_checks() {
        let v = Validity {
            not_before: 100,
            not_after: 200,
        };
        assert!(v.is_current_at(100));
        assert!(v.is_current_at(199));
        assert!(!v.is_current_at(200));
        assert!(!v.is_current_at(99));
        assert!(v.contains(&Validity { not_before: 100, not_after: 200 }));
        assert!(!v.contains(&Validity { not_before: 99, not_after: 200 }));
        assert!(!v.contains(&Validity { not_before: 150, not_after: 201 }));
    }
}
