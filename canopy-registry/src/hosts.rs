//! Host registry: mesh peer identities, address allocation, and
//! certificate issuance.
//!
//! Each organization has its own mutex, so address allocation is
//! linearizable per organization while unrelated organizations proceed in
//! parallel. Nothing is recorded until certificate issuance has
//! succeeded, so a failed creation leaves no partial state.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use canopy_ca::{CertificateAuthority, IssueRequest, KeyPair, MeshCertificate, VerifyingKey};
use canopy_types::{HostName, OrgName, Tag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::bundle;
use crate::config::{self, GatewaySettings};
use crate::error::{RegistryError, RegistryResult};
use crate::orgs::OrganizationRegistry;

const HOSTS_STATE_FILE: &str = "hosts.json";

/// A mesh peer identity. The certificate is a sealed projection of the
/// record at issuance time; the server-held private key (if any) is never
/// part of this public view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Stable record identity, unchanged across certificate re-issuance.
    pub id: Uuid,
    pub name: HostName,
    pub org: OrgName,
    pub address: Ipv6Addr,
    pub tags: Vec<Tag>,
    pub certificate: MeshCertificate,
    /// Whether the server generated and holds this host's private key.
    pub has_server_key: bool,
    pub created_at: DateTime<Utc>,
}

/// The key-material-free listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    pub name: HostName,
    pub address: Ipv6Addr,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredHost {
    #[serde(flatten)]
    host: Host,
    /// base64url Ed25519 seed, present only for server-generated keys.
    key: Option<String>,
}

#[derive(Default)]
struct OrgHosts {
    order: Vec<HostName>,
    map: HashMap<HostName, StoredHost>,
}

impl OrgHosts {
    fn in_order(&self) -> impl Iterator<Item = &StoredHost> {
        self.order.iter().filter_map(|n| self.map.get(n))
    }
}

/// Registry of hosts across all organizations.
pub struct HostRegistry {
    orgs: Arc<OrganizationRegistry>,
    ca: Arc<CertificateAuthority>,
    inner: RwLock<HashMap<OrgName, Arc<Mutex<OrgHosts>>>>,
    persist_lock: Mutex<()>,
    data_dir: Option<PathBuf>,
}

impl HostRegistry {
    /// An empty in-memory registry.
    #[must_use]
    pub fn in_memory(orgs: Arc<OrganizationRegistry>, ca: Arc<CertificateAuthority>) -> Self {
        Self {
            orgs,
            ca,
            inner: RwLock::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            data_dir: None,
        }
    }

    /// Opens a registry backed by a data directory, loading persisted
    /// hosts if present.
    pub fn open(
        orgs: Arc<OrganizationRegistry>,
        ca: Arc<CertificateAuthority>,
        data_dir: impl AsRef<Path>,
    ) -> RegistryResult<Self> {
        let dir = data_dir.as_ref().to_path_buf();
        let path = dir.join(HOSTS_STATE_FILE);
        let mut inner = HashMap::new();
        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| {
                RegistryError::Storage(format!("failed to read {}: {e}", path.display()))
            })?;
            let persisted: BTreeMap<String, Vec<StoredHost>> = serde_json::from_str(&raw)?;
            for (org, hosts) in persisted {
                let org = OrgName::parse(&org)?;
                let mut table = OrgHosts::default();
                for stored in hosts {
                    table.order.push(stored.host.name.clone());
                    table.map.insert(stored.host.name.clone(), stored);
                }
                inner.insert(org, Arc::new(Mutex::new(table)));
            }
        }
        Ok(Self {
            orgs,
            ca,
            inner: RwLock::new(inner),
            persist_lock: Mutex::new(()),
            data_dir: Some(dir),
        })
    }

    /// The organization registry this host registry allocates from.
    #[must_use]
    pub fn organizations(&self) -> &Arc<OrganizationRegistry> {
        &self.orgs
    }

    fn org_entry(&self, org: &OrgName) -> Arc<Mutex<OrgHosts>> {
        if let Some(entry) = self.inner.read().unwrap().get(org) {
            return Arc::clone(entry);
        }
        let mut map = self.inner.write().unwrap();
        Arc::clone(map.entry(org.clone()).or_default())
    }

    /// Creates a host with a server-generated key pair.
    pub fn create(&self, org: &OrgName, name: HostName, tags: Vec<Tag>) -> RegistryResult<Host> {
        self.create_inner(org, name, tags, None)
    }

    /// Creates a host for enrollee-supplied keying material. No private
    /// key is stored or ever returned for such hosts.
    pub fn create_with_key(
        &self,
        org: &OrgName,
        name: HostName,
        tags: Vec<Tag>,
        public_key: VerifyingKey,
    ) -> RegistryResult<Host> {
        self.create_inner(org, name, tags, Some(public_key))
    }

    fn create_inner(
        &self,
        org: &OrgName,
        name: HostName,
        tags: Vec<Tag>,
        supplied_key: Option<VerifyingKey>,
    ) -> RegistryResult<Host> {
        let entry = self.org_entry(org);
        let host = {
            let mut hosts = entry.lock().unwrap();

            // Resolved under the org lock so creation and org deletion
            // serialize against each other.
            let subnet = self.orgs.subnet_of(org)?;

            if hosts.map.contains_key(&name) {
                return Err(RegistryError::HostExists {
                    org: org.to_string(),
                    host: name.to_string(),
                });
            }

            // First-fit over allocated offsets; freed addresses are
            // reused. Offset 0 is the network address itself.
            let mut used: Vec<u128> = hosts
                .map
                .values()
                .filter_map(|h| subnet.offset_of(h.host.address))
                .collect();
            used.sort_unstable();
            let mut offset: u128 = 1;
            for o in used {
                if o < offset {
                    continue;
                }
                if o > offset {
                    break;
                }
                offset += 1;
            }
            let address = subnet
                .addr_at(offset)
                .ok_or_else(|| RegistryError::AddressesExhausted(org.to_string()))?;

            let (public_key, key_seed) = match supplied_key {
                Some(pk) => (pk, None),
                None => {
                    let kp = KeyPair::generate();
                    let seed = kp.signing_key.to_base64().to_string();
                    (kp.verifying_key, Some(seed))
                }
            };

            let certificate = self.ca.issue_certificate(IssueRequest {
                name: name.to_string(),
                network: format!("{address}/{}", subnet.prefix_len()),
                groups: config::groups_for(org, &tags),
                public_key,
                validity: None,
                is_ca: false,
            })?;

            let host = Host {
                id: Uuid::now_v7(),
                name: name.clone(),
                org: org.clone(),
                address,
                tags,
                certificate,
                has_server_key: key_seed.is_some(),
                created_at: Utc::now(),
            };
            hosts.order.push(name.clone());
            hosts.map.insert(
                name.clone(),
                StoredHost {
                    host: host.clone(),
                    key: key_seed,
                },
            );
            host
        };
        self.persist()?;
        info!(org = %org, host = %host.name, address = %host.address, "created host");
        Ok(host)
    }

    /// Looks up one host.
    pub fn get(&self, org: &OrgName, name: &HostName) -> RegistryResult<Host> {
        self.orgs.get(org)?;
        let entry = self.org_entry(org);
        let hosts = entry.lock().unwrap();
        hosts
            .map
            .get(name)
            .map(|s| s.host.clone())
            .ok_or_else(|| RegistryError::HostNotFound {
                org: org.to_string(),
                host: name.to_string(),
            })
    }

    /// Key-material-free summaries, in creation order.
    pub fn list(&self, org: &OrgName) -> RegistryResult<Vec<HostSummary>> {
        self.orgs.get(org)?;
        let entry = self.org_entry(org);
        let hosts = entry.lock().unwrap();
        Ok(hosts
            .in_order()
            .map(|s| HostSummary {
                name: s.host.name.clone(),
                address: s.host.address,
                tags: s.host.tags.clone(),
            })
            .collect())
    }

    /// Re-issues the host's certificate over the same identity, address,
    /// and tags, with a fresh validity window.
    pub fn renew_certificate(&self, org: &OrgName, name: &HostName) -> RegistryResult<Host> {
        let entry = self.org_entry(org);
        let host = {
            let mut hosts = entry.lock().unwrap();
            let subnet = self.orgs.subnet_of(org)?;
            let stored = hosts
                .map
                .get_mut(name)
                .ok_or_else(|| RegistryError::HostNotFound {
                    org: org.to_string(),
                    host: name.to_string(),
                })?;

            let public_key = stored.host.certificate.public_key()?;
            let certificate = self.ca.issue_certificate(IssueRequest {
                name: name.to_string(),
                network: format!("{}/{}", stored.host.address, subnet.prefix_len()),
                groups: config::groups_for(org, &stored.host.tags),
                public_key,
                validity: None,
                is_ca: false,
            })?;
            stored.host.certificate = certificate;
            stored.host.clone()
        };
        self.persist()?;
        info!(org = %org, host = %name, "renewed host certificate");
        Ok(host)
    }

    /// Removes a host, freeing its address for reuse. The issued
    /// certificate stays valid until its window closes; there is no
    /// revocation list.
    pub fn delete(&self, org: &OrgName, name: &HostName) -> RegistryResult<()> {
        let entry = self.org_entry(org);
        {
            let mut hosts = entry.lock().unwrap();
            if hosts.map.remove(name).is_none() {
                return Err(RegistryError::HostNotFound {
                    org: org.to_string(),
                    host: name.to_string(),
                });
            }
            hosts.order.retain(|n| n != name);
        }
        self.persist()?;
        info!(org = %org, host = %name, "deleted host");
        Ok(())
    }

    /// Removes an organization that owns no hosts.
    pub fn delete_organization(&self, org: &OrgName) -> RegistryResult<()> {
        let entry = self.org_entry(org);
        {
            let hosts = entry.lock().unwrap();
            if !hosts.map.is_empty() {
                return Err(RegistryError::OrgHasHosts(org.to_string(), hosts.map.len()));
            }
            self.orgs.remove(org)?;
        }
        self.inner.write().unwrap().remove(org);
        self.persist()?;
        Ok(())
    }

    /// Builds the downloadable bundle: generated config, certificate,
    /// server-held key (if any), and the CA certificate. This is the only
    /// path that exposes private key material, and only the one host's.
    pub fn export_bundle(
        &self,
        org: &OrgName,
        name: &HostName,
        gateway: &GatewaySettings,
    ) -> RegistryResult<Vec<u8>> {
        let entry = self.org_entry(org);
        let (host, key) = {
            let hosts = entry.lock().unwrap();
            let stored = hosts
                .map
                .get(name)
                .ok_or_else(|| RegistryError::HostNotFound {
                    org: org.to_string(),
                    host: name.to_string(),
                })?;
            (stored.host.clone(), stored.key.clone())
        };
        let ca_cert = self.ca.certificate()?;
        let rendered = config::render_host_config(org, gateway)?;
        bundle::build(&host.certificate, key.as_deref(), &ca_cert, &rendered)
    }

    /// The generated daemon config for a host, as shown in detail views.
    pub fn rendered_config(
        &self,
        org: &OrgName,
        name: &HostName,
        gateway: &GatewaySettings,
    ) -> RegistryResult<String> {
        // Existence check keeps detail views honest about missing hosts.
        self.get(org, name)?;
        config::render_host_config(org, gateway)
    }

    /// Hosts whose certificate was not issued by the current CA, i.e.
    /// everything needing re-issuance after a rotation.
    pub fn hosts_needing_reissue(&self) -> RegistryResult<Vec<Host>> {
        let current = self.ca.fingerprint()?;
        let entries: Vec<Arc<Mutex<OrgHosts>>> =
            self.inner.read().unwrap().values().cloned().collect();
        let mut stale = Vec::new();
        for entry in entries {
            let hosts = entry.lock().unwrap();
            for stored in hosts.in_order() {
                if stored.host.certificate.details().issuer.as_deref() != Some(current.as_str()) {
                    stale.push(stored.host.clone());
                }
            }
        }
        Ok(stale)
    }

    /// Number of hosts in an organization.
    pub fn count(&self, org: &OrgName) -> RegistryResult<usize> {
        self.orgs.get(org)?;
        let entry = self.org_entry(org);
        let n = entry.lock().unwrap().map.len();
        Ok(n)
    }

    fn persist(&self) -> RegistryResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().unwrap();

        let entries: Vec<(OrgName, Arc<Mutex<OrgHosts>>)> = self
            .inner
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        let mut snapshot: BTreeMap<String, Vec<StoredHost>> = BTreeMap::new();
        for (org, entry) in entries {
            let hosts = entry.lock().unwrap();
            snapshot.insert(org.to_string(), hosts.in_order().cloned().collect());
        }

        fs::create_dir_all(dir)
            .map_err(|e| RegistryError::Storage(format!("failed to create {}: {e}", dir.display())))?;
        let path = dir.join(HOSTS_STATE_FILE);
        let tmp = dir.join(format!("{HOSTS_STATE_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(&snapshot)?)
            .map_err(|e| RegistryError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
                .map_err(|e| RegistryError::Storage(format!("failed to chmod host file: {e}")))?;
        }
        fs::rename(&tmp, &path)
            .map_err(|e| RegistryError::Storage(format!("failed to rename {}: {e}", tmp.display())))?;
        Ok(())
    }
}
