//! Route handlers and request/response DTOs.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use canopy_ca::{CertificateDetails, VerifyingKey};
use canopy_invites::{InviteCode, InviteStatus, InviteToken};
use canopy_registry::{Host, Organization};
use canopy_types::{HostName, OrgName, Tag};

use crate::{ApiError, AppState};

// ── CA ───────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct CaStatusResponse {
    pub exists: bool,
    pub key_exists: bool,
    pub certificate: Option<String>,
    pub fingerprint: Option<String>,
    pub signature: Option<String>,
    pub not_before: Option<i64>,
    pub not_after: Option<i64>,
}

pub async fn ca_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CaStatusResponse>, ApiError> {
    state.require_admin(&headers)?;
    let info = state.ca.status();
    Ok(Json(CaStatusResponse {
        exists: info.exists,
        key_exists: info.key_exists,
        certificate: info.certificate.map(|c| c.encoded().to_string()),
        fingerprint: info.fingerprint,
        signature: info.signature,
        not_before: info.validity.map(|v| v.not_before),
        not_after: info.validity.map(|v| v.not_after),
    }))
}

#[derive(Serialize, Deserialize)]
pub struct CreateCaRequest {
    pub name: String,
}

#[derive(Serialize, Deserialize)]
pub struct CaCreatedResponse {
    pub certificate: String,
    pub fingerprint: String,
}

pub async fn ca_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateCaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.require_admin(&headers)?;
    let cert = state.ca.create(&req.name)?;
    Ok((
        StatusCode::CREATED,
        Json(CaCreatedResponse {
            fingerprint: cert.fingerprint(),
            certificate: cert.encoded().to_string(),
        }),
    ))
}

#[derive(Serialize, Deserialize)]
pub struct RotateCaRequest {
    pub name: String,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Serialize, Deserialize)]
pub struct CaRotatedResponse {
    pub certificate: String,
    pub fingerprint: String,
    /// Hosts whose certificates were signed by the previous CA and now
    /// need re-issuance.
    pub hosts_needing_reissue: usize,
}

pub async fn ca_rotate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RotateCaRequest>,
) -> Result<Json<CaRotatedResponse>, ApiError> {
    state.require_admin(&headers)?;
    let cert = state.ca.rotate(&req.name, req.confirm)?;
    let stale = state.hosts.hosts_needing_reissue()?;
    Ok(Json(CaRotatedResponse {
        fingerprint: cert.fingerprint(),
        certificate: cert.encoded().to_string(),
        hosts_needing_reissue: stale.len(),
    }))
}

// ── Organizations ────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct OrgResponse {
    pub name: String,
    pub subnet: String,
    pub created_at: DateTime<Utc>,
}

impl From<Organization> for OrgResponse {
    fn from(o: Organization) -> Self {
        Self {
            name: o.name.to_string(),
            subnet: o.subnet.to_string(),
            created_at: o.created_at,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct OrgsResponse {
    pub orgs: Vec<OrgResponse>,
}

#[derive(Serialize, Deserialize)]
pub struct CreateOrgRequest {
    pub name: OrgName,
}

pub async fn orgs_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OrgsResponse>, ApiError> {
    state.require_admin(&headers)?;
    Ok(Json(OrgsResponse {
        orgs: state.orgs.list().into_iter().map(Into::into).collect(),
    }))
}

pub async fn orgs_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrgRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.require_admin(&headers)?;
    let org = state.orgs.create(req.name)?;
    Ok((StatusCode::CREATED, Json(OrgResponse::from(org))))
}

// ── Hosts ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct HostResponse {
    pub id: String,
    pub name: String,
    pub org: String,
    pub address: String,
    pub tags: Vec<String>,
    pub certificate: String,
    pub certificate_details: CertificateDetails,
    pub has_server_key: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Host> for HostResponse {
    fn from(h: Host) -> Self {
        Self {
            id: h.id.to_string(),
            name: h.name.to_string(),
            org: h.org.to_string(),
            address: h.address.to_string(),
            tags: h.tags.iter().map(ToString::to_string).collect(),
            certificate_details: h.certificate.details().clone(),
            certificate: h.certificate.encoded().to_string(),
            has_server_key: h.has_server_key,
            created_at: h.created_at,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct HostRow {
    pub name: String,
    pub address: String,
    pub tags: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub struct HostsResponse {
    pub hosts: Vec<HostRow>,
}

#[derive(Serialize, Deserialize)]
pub struct CreateHostRequest {
    pub org: OrgName,
    pub name: HostName,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Serialize, Deserialize)]
pub struct HostDetailResponse {
    #[serde(flatten)]
    pub host: HostResponse,
    /// The generated daemon config, as shipped in the bundle.
    pub config: String,
}

pub async fn hosts_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org): Path<String>,
) -> Result<Json<HostsResponse>, ApiError> {
    state.require_admin(&headers)?;
    let org = OrgName::parse(&org)?;
    let hosts = state
        .hosts
        .list(&org)?
        .into_iter()
        .map(|s| HostRow {
            name: s.name.to_string(),
            address: s.address.to_string(),
            tags: s.tags.iter().map(ToString::to_string).collect(),
        })
        .collect();
    Ok(Json(HostsResponse { hosts }))
}

pub async fn hosts_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateHostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.require_admin(&headers)?;
    let host = state.hosts.create(&req.org, req.name, req.tags)?;
    Ok((StatusCode::CREATED, Json(HostResponse::from(host))))
}

pub async fn host_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org, host)): Path<(String, String)>,
) -> Result<Json<HostDetailResponse>, ApiError> {
    state.require_admin(&headers)?;
    let org = OrgName::parse(&org)?;
    let host = HostName::parse(&host)?;
    let record = state.hosts.get(&org, &host)?;
    let config = state.hosts.rendered_config(&org, &host, &state.gateway)?;
    Ok(Json(HostDetailResponse {
        host: record.into(),
        config,
    }))
}

pub async fn host_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org, host)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.require_admin(&headers)?;
    let org = OrgName::parse(&org)?;
    let host = HostName::parse(&host)?;
    state.hosts.delete(&org, &host)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn host_renew(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org, host)): Path<(String, String)>,
) -> Result<Json<HostResponse>, ApiError> {
    state.require_admin(&headers)?;
    let org = OrgName::parse(&org)?;
    let host = HostName::parse(&host)?;
    let record = state.hosts.renew_certificate(&org, &host)?;
    Ok(Json(record.into()))
}

pub async fn host_bundle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org, host)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    state.require_admin(&headers)?;
    let org = OrgName::parse(&org)?;
    let host = HostName::parse(&host)?;
    let bytes = state.hosts.export_bundle(&org, &host, &state.gateway)?;
    Ok(zip_response(format!("{org}_{host}_bundle.zip"), bytes))
}

// ── Invites ──────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct InviteResponse {
    pub code: String,
    pub org: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub total_uses: u32,
    pub remaining_uses: u32,
    pub active: bool,
    pub status: InviteStatus,
}

impl From<InviteToken> for InviteResponse {
    fn from(t: InviteToken) -> Self {
        let status = t.status_at(Utc::now());
        Self {
            code: t.code.to_string(),
            org: t.org.to_string(),
            created_at: t.created_at,
            expires_at: t.expires_at,
            total_uses: t.total_uses,
            remaining_uses: t.remaining_uses,
            active: t.active,
            status,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct InvitesResponse {
    pub invites: Vec<InviteResponse>,
}

#[derive(Deserialize)]
pub struct InviteFilter {
    pub org: Option<String>,
    pub active: Option<bool>,
}

fn default_days_valid() -> u32 {
    7
}

fn default_number_of_uses() -> u32 {
    1
}

#[derive(Serialize, Deserialize)]
pub struct GenerateInviteRequest {
    pub org: OrgName,
    #[serde(default = "default_days_valid")]
    pub days_valid: u32,
    #[serde(default = "default_number_of_uses")]
    pub number_of_uses: u32,
}

pub async fn invites_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<InviteFilter>,
) -> Result<Json<InvitesResponse>, ApiError> {
    state.require_admin(&headers)?;
    let org = filter.org.as_deref().map(OrgName::parse).transpose()?;
    let invites = state
        .invites
        .list_filtered(org.as_ref(), filter.active)
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(InvitesResponse { invites }))
}

pub async fn invites_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GenerateInviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.require_admin(&headers)?;
    let token = state
        .invites
        .generate(&req.org, req.days_valid, req.number_of_uses)?;
    Ok((StatusCode::CREATED, Json(InviteResponse::from(token))))
}

pub async fn invite_revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.require_admin(&headers)?;
    state.invites.revoke(&InviteCode::from_input(&code))?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Enrollment ───────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct EnrollRequest {
    pub code: String,
    pub name: HostName,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Optional enrollee-generated public key (base64url, 32 bytes).
    /// When present the server stores no private key for the host.
    pub public_key: Option<String>,
}

/// The one route without the admin check: the invite code is the entire
/// authorization. Returns the same bundle zip an administrator would
/// download.
pub async fn enroll(
    State(state): State<AppState>,
    Json(req): Json<EnrollRequest>,
) -> Result<Response, ApiError> {
    let public_key = req
        .public_key
        .as_deref()
        .map(VerifyingKey::from_base64)
        .transpose()?;
    let code = InviteCode::from_input(&req.code);
    let host = state.invites.redeem(&code, req.name, req.tags, public_key)?;
    let bytes = state.hosts.export_bundle(&host.org, &host.name, &state.gateway)?;
    Ok(zip_response(format!("{}_{}_bundle.zip", host.org, host.name), bytes))
}

fn zip_response(filename: String, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        bytes,
    )
        .into_response()
}
