//! Organization registry: named tenants and their subnet allocation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use canopy_types::OrgName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RegistryError, RegistryResult};
use crate::subnet::{Subnet, SubnetAllocator};

const ORGS_STATE_FILE: &str = "orgs.json";

/// A tenant owning one /64 block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: OrgName,
    pub subnet: Subnet,
    pub created_at: DateTime<Utc>,
}

/// Registry of organizations. Subnet allocation runs inside a single
/// critical section, so concurrent creations never receive overlapping
/// blocks.
pub struct OrganizationRegistry {
    allocator: SubnetAllocator,
    // Creation-order list; names are unique so linear scans are fine at
    // this scale.
    inner: Mutex<Vec<Organization>>,
    data_dir: Option<PathBuf>,
}

impl OrganizationRegistry {
    /// An empty in-memory registry over the given ULA space.
    pub fn in_memory(base: Subnet) -> RegistryResult<Self> {
        Ok(Self {
            allocator: SubnetAllocator::new(base)?,
            inner: Mutex::new(Vec::new()),
            data_dir: None,
        })
    }

    /// Opens a registry backed by a data directory, loading persisted
    /// organizations if present.
    pub fn open(base: Subnet, data_dir: impl AsRef<Path>) -> RegistryResult<Self> {
        let dir = data_dir.as_ref().to_path_buf();
        let path = dir.join(ORGS_STATE_FILE);
        let orgs: Vec<Organization> = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| {
                RegistryError::Storage(format!("failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_str(&raw)?
        } else {
            Vec::new()
        };
        Ok(Self {
            allocator: SubnetAllocator::new(base)?,
            inner: Mutex::new(orgs),
            data_dir: Some(dir),
        })
    }

    /// The allocator's base block and gateway, needed for host configs.
    #[must_use]
    pub fn allocator(&self) -> &SubnetAllocator {
        &self.allocator
    }

    /// Creates an organization, allocating the lowest unused /64.
    ///
    /// # Errors
    ///
    /// [`RegistryError::OrgExists`] on a duplicate name,
    /// [`RegistryError::SubnetsExhausted`] when the block space is full.
    pub fn create(&self, name: OrgName) -> RegistryResult<Organization> {
        let mut orgs = self.inner.lock().unwrap();
        if orgs.iter().any(|o| o.name == name) {
            return Err(RegistryError::OrgExists(name.to_string()));
        }
        let subnet = self.allocator.allocate(orgs.iter().map(|o| o.subnet))?;
        let org = Organization {
            name: name.clone(),
            subnet,
            created_at: Utc::now(),
        };
        orgs.push(org.clone());
        self.persist(&orgs)?;
        info!(org = %name, subnet = %subnet, "created organization");
        Ok(org)
    }

    /// All organizations in creation order.
    #[must_use]
    pub fn list(&self) -> Vec<Organization> {
        self.inner.lock().unwrap().clone()
    }

    /// Looks up one organization.
    pub fn get(&self, name: &OrgName) -> RegistryResult<Organization> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .find(|o| &o.name == name)
            .cloned()
            .ok_or_else(|| RegistryError::OrgNotFound(name.to_string()))
    }

    /// The subnet allocated to an organization.
    pub fn subnet_of(&self, name: &OrgName) -> RegistryResult<Subnet> {
        Ok(self.get(name)?.subnet)
    }

    /// Removes an organization. The host registry guards this with its
    /// ownership check before delegating here.
    pub(crate) fn remove(&self, name: &OrgName) -> RegistryResult<()> {
        let mut orgs = self.inner.lock().unwrap();
        let before = orgs.len();
        orgs.retain(|o| &o.name != name);
        if orgs.len() == before {
            return Err(RegistryError::OrgNotFound(name.to_string()));
        }
        self.persist(&orgs)?;
        info!(org = %name, "deleted organization");
        Ok(())
    }

    fn persist(&self, orgs: &[Organization]) -> RegistryResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        fs::create_dir_all(dir)
            .map_err(|e| RegistryError::Storage(format!("failed to create {}: {e}", dir.display())))?;
        let path = dir.join(ORGS_STATE_FILE);
        let tmp = dir.join(format!("{ORGS_STATE_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(orgs)?)
            .map_err(|e| RegistryError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| RegistryError::Storage(format!("failed to rename {}: {e}", tmp.display())))?;
        Ok(())
    }
}
