//! Shared state and HTTP API for the Canopy gateway.
//!
//! Every admin route performs one capability check: a bearer token
//! compared against the deployment's admin token. The session layer that
//! produces and rotates that token lives outside this service. The
//! enrollment route is the exception: possession of a valid invite code
//! is its entire authorization.

pub mod handlers;

use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;

use canopy_ca::{CaError, CertificateAuthority};
use canopy_invites::{InviteError, InviteService};
use canopy_registry::{GatewaySettings, HostRegistry, OrganizationRegistry, RegistryError};
use canopy_types::NameError;

/// Everything the handlers need, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub ca: Arc<CertificateAuthority>,
    pub orgs: Arc<OrganizationRegistry>,
    pub hosts: Arc<HostRegistry>,
    pub invites: Arc<InviteService>,
    pub gateway: GatewaySettings,
    admin_token: Arc<String>,
}

impl AppState {
    pub fn new(
        ca: Arc<CertificateAuthority>,
        orgs: Arc<OrganizationRegistry>,
        hosts: Arc<HostRegistry>,
        invites: Arc<InviteService>,
        gateway: GatewaySettings,
        admin_token: String,
    ) -> Self {
        Self {
            ca,
            orgs,
            hosts,
            invites,
            gateway,
            admin_token: Arc::new(admin_token),
        }
    }

    /// The single admin capability check: `Authorization: Bearer <token>`.
    fn require_admin(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match presented {
            Some(token) if token == self.admin_token.as_str() => Ok(()),
            _ => Err(ApiError::unauthorized()),
        }
    }
}

/// Build the HTTP API router with the given application state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ca", get(handlers::ca_status).post(handlers::ca_create))
        .route("/api/ca/rotate", post(handlers::ca_rotate))
        .route("/api/orgs", get(handlers::orgs_list).post(handlers::orgs_create))
        .route("/api/orgs/{org}/hosts", get(handlers::hosts_list))
        .route("/api/hosts", post(handlers::hosts_create))
        .route(
            "/api/orgs/{org}/hosts/{host}",
            get(handlers::host_detail).delete(handlers::host_delete),
        )
        .route("/api/orgs/{org}/hosts/{host}/renew", post(handlers::host_renew))
        .route("/api/orgs/{org}/hosts/{host}/bundle", get(handlers::host_bundle))
        .route(
            "/api/invites",
            get(handlers::invites_list).post(handlers::invites_generate),
        )
        .route("/api/invites/{code}", delete(handlers::invite_revoke))
        .route("/api/enroll", post(handlers::enroll))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// HTTP-mapped error. Each domain error kind keeps its own status and
/// stable `kind` string so callers can distinguish, say, an expired
/// invite from an exhausted one.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "admin token required")
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            kind: self.kind,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CaError> for ApiError {
    fn from(e: CaError) -> Self {
        let message = e.to_string();
        match e {
            CaError::AlreadyExists => Self::new(StatusCode::CONFLICT, "conflict", message),
            CaError::Unavailable => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
            }
            CaError::RotationNotConfirmed
            | CaError::InvalidValidity(_)
            | CaError::InvalidFormat(_)
            | CaError::InvalidPayload(_)
            | CaError::InvalidKey(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
            }
            CaError::InvalidSignature => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_signature", message)
            }
            CaError::Storage(_) | CaError::Serialization(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let message = e.to_string();
        match e {
            RegistryError::OrgNotFound(_) | RegistryError::HostNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "not_found", message)
            }
            RegistryError::OrgExists(_)
            | RegistryError::HostExists { .. }
            | RegistryError::OrgHasHosts(_, _) => {
                Self::new(StatusCode::CONFLICT, "conflict", message)
            }
            RegistryError::SubnetsExhausted | RegistryError::AddressesExhausted(_) => {
                Self::new(StatusCode::CONFLICT, "exhausted", message)
            }
            RegistryError::InvalidSubnet(_) | RegistryError::Name(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
            }
            RegistryError::Ca(inner) => inner.into(),
            RegistryError::Storage(_)
            | RegistryError::Serialization(_)
            | RegistryError::ConfigRender(_)
            | RegistryError::Zip(_)
            | RegistryError::Io(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<InviteError> for ApiError {
    fn from(e: InviteError) -> Self {
        let message = e.to_string();
        match e {
            InviteError::InvalidInput(_) => Self::bad_request(message),
            InviteError::InvalidCode => Self::new(StatusCode::NOT_FOUND, "invalid_code", message),
            InviteError::Expired => Self::new(StatusCode::GONE, "expired", message),
            InviteError::Exhausted => Self::new(StatusCode::GONE, "exhausted", message),
            InviteError::Revoked => Self::new(StatusCode::GONE, "revoked", message),
            InviteError::Registry(inner) => inner.into(),
            InviteError::Storage(_) | InviteError::Serialization(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<NameError> for ApiError {
    fn from(e: NameError) -> Self {
        Self::bad_request(e.to_string())
    }
}
