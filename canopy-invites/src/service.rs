//! Invite generation, listing, revocation, and redemption.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use canopy_ca::VerifyingKey;
use canopy_registry::{Host, HostRegistry};
use canopy_types::{HostName, OrgName, Tag};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::code::InviteCode;
use crate::error::{InviteError, InviteResult};
use crate::token::{InviteStatus, InviteToken};

const INVITES_STATE_FILE: &str = "invites.json";

#[derive(Default)]
struct Inner {
    // Creation order of codes, plus per-token locks. Redemption holds a
    // token's mutex across host creation, which is what makes the
    // check-decrement-create sequence atomic per token.
    order: Vec<InviteCode>,
    map: HashMap<InviteCode, Arc<Mutex<InviteToken>>>,
}

/// Issues, tracks, and redeems invite tokens.
pub struct InviteService {
    hosts: Arc<HostRegistry>,
    inner: RwLock<Inner>,
    persist_lock: Mutex<()>,
    data_dir: Option<PathBuf>,
}

impl InviteService {
    /// An empty in-memory service.
    #[must_use]
    pub fn in_memory(hosts: Arc<HostRegistry>) -> Self {
        Self {
            hosts,
            inner: RwLock::new(Inner::default()),
            persist_lock: Mutex::new(()),
            data_dir: None,
        }
    }

    /// Opens a service backed by a data directory, loading persisted
    /// invites if present.
    pub fn open(hosts: Arc<HostRegistry>, data_dir: impl AsRef<Path>) -> InviteResult<Self> {
        let dir = data_dir.as_ref().to_path_buf();
        let path = dir.join(INVITES_STATE_FILE);
        let mut inner = Inner::default();
        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| {
                InviteError::Storage(format!("failed to read {}: {e}", path.display()))
            })?;
            let tokens: Vec<InviteToken> = serde_json::from_str(&raw)?;
            for token in tokens {
                inner.order.push(token.code.clone());
                inner
                    .map
                    .insert(token.code.clone(), Arc::new(Mutex::new(token)));
            }
        }
        Ok(Self {
            hosts,
            inner: RwLock::new(inner),
            persist_lock: Mutex::new(()),
            data_dir: Some(dir),
        })
    }

    /// Generates an invite valid for `days_valid` days with
    /// `number_of_uses` permitted redemptions.
    ///
    /// # Errors
    ///
    /// [`InviteError::InvalidInput`] for non-positive parameters; the org
    /// lookup failure propagates verbatim from the registry.
    pub fn generate(
        &self,
        org: &OrgName,
        days_valid: u32,
        number_of_uses: u32,
    ) -> InviteResult<InviteToken> {
        if days_valid < 1 {
            return Err(InviteError::InvalidInput(format!(
                "days_valid must be at least 1, got {days_valid}"
            )));
        }
        self.generate_until(org, Utc::now() + Duration::days(i64::from(days_valid)), number_of_uses)
    }

    /// Generates an invite with an explicit expiry instant. Used by
    /// operators wanting exact horizons, and by tests.
    pub fn generate_until(
        &self,
        org: &OrgName,
        expires_at: DateTime<Utc>,
        number_of_uses: u32,
    ) -> InviteResult<InviteToken> {
        if number_of_uses < 1 {
            return Err(InviteError::InvalidInput(format!(
                "number_of_uses must be at least 1, got {number_of_uses}"
            )));
        }
        self.hosts.organizations().get(org)?;

        let token = InviteToken {
            code: InviteCode::generate(),
            org: org.clone(),
            created_at: Utc::now(),
            expires_at,
            total_uses: number_of_uses,
            remaining_uses: number_of_uses,
            active: true,
        };

        {
            let mut inner = self.inner.write().unwrap();
            inner.order.push(token.code.clone());
            inner
                .map
                .insert(token.code.clone(), Arc::new(Mutex::new(token.clone())));
        }
        self.persist()?;
        info!(org = %org, code = %token.code.preview(), expires_at = %expires_at, uses = number_of_uses, "generated invite");
        Ok(token)
    }

    /// All invites in creation order. Administrator-only at the boundary;
    /// the listed records include the codes.
    #[must_use]
    pub fn list(&self) -> Vec<InviteToken> {
        self.list_filtered(None, None)
    }

    /// Invites filtered by organization and/or derived-active status.
    #[must_use]
    pub fn list_filtered(&self, org: Option<&OrgName>, active: Option<bool>) -> Vec<InviteToken> {
        let now = Utc::now();
        let inner = self.inner.read().unwrap();
        inner
            .order
            .iter()
            .filter_map(|code| inner.map.get(code))
            .map(|t| t.lock().unwrap().clone())
            .filter(|t| org.is_none_or(|o| &t.org == o))
            .filter(|t| active.is_none_or(|a| (t.status_at(now) == InviteStatus::Active) == a))
            .collect()
    }

    /// Looks up one invite by code.
    pub fn get(&self, code: &InviteCode) -> InviteResult<InviteToken> {
        let inner = self.inner.read().unwrap();
        inner
            .map
            .get(code)
            .map(|t| t.lock().unwrap().clone())
            .ok_or(InviteError::InvalidCode)
    }

    /// Revokes an invite unconditionally. Idempotent: revoking an already
    /// revoked or exhausted invite succeeds.
    pub fn revoke(&self, code: &InviteCode) -> InviteResult<()> {
        let entry = {
            let inner = self.inner.read().unwrap();
            inner.map.get(code).cloned().ok_or(InviteError::InvalidCode)?
        };
        {
            let mut token = entry.lock().unwrap();
            token.active = false;
        }
        self.persist()?;
        info!(code = %code.preview(), "revoked invite");
        Ok(())
    }

    /// Redeems an invite: consumes one use and creates a host in the
    /// invite's organization.
    ///
    /// The use-count check, decrement, and host creation run under the
    /// token's mutex, so two concurrent redeemers of a single-use token
    /// can never both succeed. If host creation fails (name conflict,
    /// exhausted addresses, absent CA), the consumed use is restored and
    /// the failure is returned verbatim.
    pub fn redeem(
        &self,
        code: &InviteCode,
        host_name: HostName,
        tags: Vec<Tag>,
        public_key: Option<VerifyingKey>,
    ) -> InviteResult<Host> {
        let entry = {
            let inner = self.inner.read().unwrap();
            inner.map.get(code).cloned().ok_or(InviteError::InvalidCode)?
        };

        let outcome = {
            let mut token = entry.lock().unwrap();
            match token.status_at(Utc::now()) {
                InviteStatus::Active => {}
                InviteStatus::Expired => return Err(InviteError::Expired),
                InviteStatus::Exhausted => return Err(InviteError::Exhausted),
                InviteStatus::Revoked => return Err(InviteError::Revoked),
            }

            token.remaining_uses -= 1;
            if token.remaining_uses == 0 {
                token.active = false;
            }

            let org = token.org.clone();
            let created = match public_key {
                Some(pk) => self.hosts.create_with_key(&org, host_name, tags, pk),
                None => self.hosts.create(&org, host_name, tags),
            };

            match created {
                Ok(host) => Ok(host),
                Err(e) => {
                    // Roll the consumption back so the use is not lost.
                    token.remaining_uses += 1;
                    token.active = true;
                    Err(InviteError::Registry(e))
                }
            }
        };

        let host = outcome?;
        self.persist()?;
        info!(
            code = %code.preview(),
            org = %host.org,
            host = %host.name,
            "redeemed invite"
        );
        Ok(host)
    }

    fn persist(&self) -> InviteResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().unwrap();

        let snapshot: Vec<InviteToken> = {
            let inner = self.inner.read().unwrap();
            inner
                .order
                .iter()
                .filter_map(|code| inner.map.get(code))
                .map(|t| t.lock().unwrap().clone())
                .collect()
        };

        fs::create_dir_all(dir)
            .map_err(|e| InviteError::Storage(format!("failed to create {}: {e}", dir.display())))?;
        let path = dir.join(INVITES_STATE_FILE);
        let tmp = dir.join(format!("{INVITES_STATE_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(&snapshot)?)
            .map_err(|e| InviteError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
                .map_err(|e| InviteError::Storage(format!("failed to chmod invite file: {e}")))?;
        }
        fs::rename(&tmp, &path)
            .map_err(|e| InviteError::Storage(format!("failed to rename {}: {e}", tmp.display())))?;
        Ok(())
    }
}
