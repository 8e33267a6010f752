//! Shared test helpers for CA tests.

#![allow(dead_code)]

use canopy_ca::{CertificateAuthority, IssueRequest, KeyPair, MeshCertificate, Validity};

/// A fresh in-memory CA with a root already created.
pub fn ready_ca(root: &str) -> CertificateAuthority {
    let ca = CertificateAuthority::in_memory();
    ca.create(root).unwrap();
    ca
}

/// Issues a certificate for `name` with a freshly generated subject key,
/// returning the certificate and the subject key pair.
pub fn issue_for(ca: &CertificateAuthority, name: &str) -> (MeshCertificate, KeyPair) {
    let subject = KeyPair::generate();
    let cert = ca
        .issue_certificate(IssueRequest {
            name: name.to_string(),
            network: "fd6c:1f2e:3d4c:1::1/64".to_string(),
            groups: vec!["org_eng".to_string()],
            public_key: subject.verifying_key.clone(),
            validity: None,
            is_ca: false,
        })
        .unwrap();
    (cert, subject)
}

/// An explicit validity window offset from now by whole days.
pub fn window_days_from_now(start_days: i64, end_days: i64) -> Validity {
    let now = chrono::Utc::now().timestamp();
    Validity {
        not_before: now + start_days * 24 * 60 * 60,
        not_after: now + end_days * 24 * 60 * 60,
    }
}
