//! CA lifecycle: creation, rotation, status, and certificate issuance.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cert::{CertificateDetails, MeshCertificate, Validity};
use crate::error::{CaError, CaResult};
use crate::keys::{KeyPair, SigningKey, VerifyingKey};

/// Validity of the self-signed root certificate, in days.
pub const CA_VALIDITY_DAYS: u32 = 3650;

/// Default validity of issued host certificates, in days. Always clamped
/// to the CA's own window.
pub const HOST_CERT_VALIDITY_DAYS: u32 = 365;

const CA_STATE_FILE: &str = "ca.json";

/// CA status and public certificate material. Never includes the private
/// key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaInfo {
    pub exists: bool,
    pub key_exists: bool,
    pub certificate: Option<MeshCertificate>,
    pub fingerprint: Option<String>,
    pub signature: Option<String>,
    pub validity: Option<Validity>,
}

/// Parameters for issuing a signed certificate.
#[derive(Debug)]
pub struct IssueRequest {
    /// Subject name embedded in the certificate.
    pub name: String,
    /// Assigned mesh address in CIDR notation.
    pub network: String,
    /// Ordered group list to embed.
    pub groups: Vec<String>,
    /// The subject's public key.
    pub public_key: VerifyingKey,
    /// Explicit validity window. `None` uses [`HOST_CERT_VALIDITY_DAYS`]
    /// clamped to the CA window.
    pub validity: Option<Validity>,
    /// Whether to mark the certificate as a CA.
    pub is_ca: bool,
}

struct CaState {
    root_name: String,
    signing_key: SigningKey,
    certificate: MeshCertificate,
    created_at: DateTime<Utc>,
}

/// On-disk form of the CA state. The key file is written `0600` on unix.
#[derive(Serialize, Deserialize)]
struct PersistedCa {
    root_name: String,
    key: String,
    certificate: MeshCertificate,
    created_at: DateTime<Utc>,
}

/// The certificate authority: owns the key pair and root certificate,
/// signs every host certificate.
///
/// Constructed explicitly and injected wherever signing is needed; there
/// is no ambient singleton.
pub struct CertificateAuthority {
    state: RwLock<Option<CaState>>,
    data_dir: Option<PathBuf>,
}

impl CertificateAuthority {
    /// An empty in-memory CA, mainly for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(None),
            data_dir: None,
        }
    }

    /// Opens a CA backed by a data directory, loading persisted state if
    /// present. A missing state file is not an error: the CA simply does
    /// not exist yet.
    pub fn open(data_dir: impl AsRef<Path>) -> CaResult<Self> {
        let dir = data_dir.as_ref().to_path_buf();
        let path = dir.join(CA_STATE_FILE);
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| CaError::Storage(format!("failed to read {}: {e}", path.display())))?;
            let persisted: PersistedCa = serde_json::from_str(&raw)?;
            let signing_key = SigningKey::from_base64(&persisted.key)?;
            info!(root = %persisted.root_name, "loaded certificate authority");
            Some(CaState {
                root_name: persisted.root_name,
                signing_key,
                certificate: persisted.certificate,
                created_at: persisted.created_at,
            })
        } else {
            None
        };
        Ok(Self {
            state: RwLock::new(state),
            data_dir: Some(dir),
        })
    }

    /// Creates the CA: generates a key pair and a self-signed root
    /// certificate valid for [`CA_VALIDITY_DAYS`], then persists both.
    ///
    /// # Errors
    ///
    /// Returns [`CaError::AlreadyExists`] if a CA is already present.
    pub fn create(&self, root_name: &str) -> CaResult<MeshCertificate> {
        let root_name = root_name.trim();
        if root_name.is_empty() {
            return Err(CaError::InvalidFormat("root name must not be empty".into()));
        }

        let mut state = self.state.write().unwrap();
        if state.is_some() {
            return Err(CaError::AlreadyExists);
        }

        let new_state = Self::build_root(root_name)?;
        let cert = new_state.certificate.clone();
        self.persist(&new_state)?;
        info!(root = %root_name, fingerprint = %cert.fingerprint(), "created certificate authority");
        *state = Some(new_state);
        Ok(cert)
    }

    /// Rotates the CA: destroys the current key pair and root certificate
    /// and replaces them. Every previously issued certificate becomes
    /// untrusted by verifiers checking against the new fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`CaError::RotationNotConfirmed`] unless `confirm` is set,
    /// and [`CaError::Unavailable`] if there is no CA to rotate.
    pub fn rotate(&self, root_name: &str, confirm: bool) -> CaResult<MeshCertificate> {
        if !confirm {
            return Err(CaError::RotationNotConfirmed);
        }
        let root_name = root_name.trim();
        if root_name.is_empty() {
            return Err(CaError::InvalidFormat("root name must not be empty".into()));
        }

        let mut state = self.state.write().unwrap();
        let old = state.as_ref().ok_or(CaError::Unavailable)?;
        warn!(
            old_root = %old.root_name,
            new_root = %root_name,
            "rotating certificate authority; all previously issued certificates are now untrusted"
        );

        let new_state = Self::build_root(root_name)?;
        let cert = new_state.certificate.clone();
        self.persist(&new_state)?;
        *state = Some(new_state);
        Ok(cert)
    }

    fn build_root(root_name: &str) -> CaResult<CaState> {
        let keypair = KeyPair::generate();
        let window = Validity::days_from_now(CA_VALIDITY_DAYS);
        let details = CertificateDetails {
            name: root_name.to_string(),
            network: String::new(),
            groups: Vec::new(),
            not_before: window.not_before,
            not_after: window.not_after,
            public_key: keypair.verifying_key.to_base64(),
            is_ca: true,
            issuer: None,
        };
        let certificate = MeshCertificate::sign(&details, &keypair.signing_key)?;
        Ok(CaState {
            root_name: root_name.to_string(),
            signing_key: keypair.signing_key,
            certificate,
            created_at: Utc::now(),
        })
    }

    /// Returns CA status and public material. Never fails: absence is
    /// reported through the flags.
    #[must_use]
    pub fn status(&self) -> CaInfo {
        let state = self.state.read().unwrap();
        match state.as_ref() {
            Some(s) => CaInfo {
                exists: true,
                key_exists: true,
                certificate: Some(s.certificate.clone()),
                fingerprint: Some(s.certificate.fingerprint()),
                signature: Some(s.certificate.signature_base64().to_string()),
                validity: Some(s.certificate.validity()),
            },
            None => CaInfo {
                exists: false,
                key_exists: false,
                certificate: None,
                fingerprint: None,
                signature: None,
                validity: None,
            },
        }
    }

    /// Like [`CertificateAuthority::status`], but an absent CA is an
    /// error.
    pub fn info(&self) -> CaResult<CaInfo> {
        let info = self.status();
        if info.exists {
            Ok(info)
        } else {
            Err(CaError::Unavailable)
        }
    }

    /// The current root certificate.
    pub fn certificate(&self) -> CaResult<MeshCertificate> {
        let state = self.state.read().unwrap();
        state
            .as_ref()
            .map(|s| s.certificate.clone())
            .ok_or(CaError::Unavailable)
    }

    /// The current CA verifying key.
    pub fn verifying_key(&self) -> CaResult<VerifyingKey> {
        let state = self.state.read().unwrap();
        state
            .as_ref()
            .map(|s| s.signing_key.verifying_key())
            .ok_or(CaError::Unavailable)
    }

    /// Hex fingerprint of the current root certificate.
    pub fn fingerprint(&self) -> CaResult<String> {
        Ok(self.certificate()?.fingerprint())
    }

    /// When the current CA was created.
    pub fn created_at(&self) -> CaResult<DateTime<Utc>> {
        let state = self.state.read().unwrap();
        state.as_ref().map(|s| s.created_at).ok_or(CaError::Unavailable)
    }

    /// Issues a certificate signed by the CA.
    ///
    /// The embedded issuer is the current root fingerprint. With no
    /// explicit window, the certificate is valid from now for
    /// [`HOST_CERT_VALIDITY_DAYS`], clamped to the CA window.
    ///
    /// # Errors
    ///
    /// [`CaError::Unavailable`] without a CA; [`CaError::InvalidValidity`]
    /// if an explicit window exceeds the CA's own, or the CA window has
    /// already closed.
    pub fn issue_certificate(&self, req: IssueRequest) -> CaResult<MeshCertificate> {
        let state = self.state.read().unwrap();
        let state = state.as_ref().ok_or(CaError::Unavailable)?;
        let ca_window = state.certificate.validity();

        let window = match req.validity {
            Some(v) => {
                if !ca_window.contains(&v) {
                    return Err(CaError::InvalidValidity(format!(
                        "[{}, {}] outside CA window [{}, {}]",
                        v.not_before, v.not_after, ca_window.not_before, ca_window.not_after
                    )));
                }
                v
            }
            None => {
                let now = Utc::now().timestamp();
                if !ca_window.is_current_at(now) {
                    return Err(CaError::InvalidValidity(
                        "CA certificate is no longer valid".to_string(),
                    ));
                }
                let default_end = now + i64::from(HOST_CERT_VALIDITY_DAYS) * 24 * 60 * 60;
                Validity {
                    not_before: now,
                    not_after: default_end.min(ca_window.not_after),
                }
            }
        };

        let details = CertificateDetails {
            name: req.name,
            network: req.network,
            groups: req.groups,
            not_before: window.not_before,
            not_after: window.not_after,
            public_key: req.public_key.to_base64(),
            is_ca: req.is_ca,
            issuer: Some(state.certificate.fingerprint()),
        };
        let cert = MeshCertificate::sign(&details, &state.signing_key)?;
        info!(subject = %cert.details().name, network = %cert.details().network, "issued certificate");
        Ok(cert)
    }

    fn persist(&self, state: &CaState) -> CaResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        fs::create_dir_all(dir)
            .map_err(|e| CaError::Storage(format!("failed to create {}: {e}", dir.display())))?;

        let persisted = PersistedCa {
            root_name: state.root_name.clone(),
            key: state.signing_key.to_base64().to_string(),
            certificate: state.certificate.clone(),
            created_at: state.created_at,
        };
        let json = serde_json::to_string_pretty(&persisted)?;

        // Write-then-rename so a crash never leaves a torn key file.
        let path = dir.join(CA_STATE_FILE);
        let tmp = dir.join(format!("{CA_STATE_FILE}.tmp"));
        fs::write(&tmp, json)
            .map_err(|e| CaError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
                .map_err(|e| CaError::Storage(format!("failed to chmod key file: {e}")))?;
        }
        fs::rename(&tmp, &path)
            .map_err(|e| CaError::Storage(format!("failed to rename {}: {e}", tmp.display())))?;
        Ok(())
    }
}
