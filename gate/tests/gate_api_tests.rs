use std::sync::Arc;

use canopy_ca::CertificateAuthority;
use canopy_gate::{build_router, AppState};
use canopy_invites::InviteService;
use canopy_registry::{
    GatewaySettings, HostRegistry, OrganizationRegistry, Subnet, DEFAULT_ULA_PREFIX,
};
use serde_json::{json, Value};

const ADMIN_TOKEN: &str = "test-admin-token";

fn test_state() -> AppState {
    let ca = Arc::new(CertificateAuthority::in_memory());
    let base: Subnet = DEFAULT_ULA_PREFIX.parse().unwrap();
    let orgs = Arc::new(OrganizationRegistry::in_memory(base).unwrap());
    let hosts = Arc::new(HostRegistry::in_memory(Arc::clone(&orgs), Arc::clone(&ca)));
    let invites = Arc::new(InviteService::in_memory(Arc::clone(&hosts)));
    let gateway = GatewaySettings {
        mesh_address: "fd6c:1f2e:3d4c::1".parse().unwrap(),
        public_endpoint: Some("203.0.113.7:4242".to_string()),
    };
    AppState::new(ca, orgs, hosts, invites, gateway, ADMIN_TOKEN.to_string())
}

/// Spin up the HTTP server on an OS-assigned port, returning the base URL.
async fn spawn_test_server() -> String {
    let app = build_router(test_state());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn admin_post(base: &str, path: &str, body: Value) -> reqwest::Response {
    client()
        .post(format!("{base}{path}"))
        .bearer_auth(ADMIN_TOKEN)
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn admin_get(base: &str, path: &str) -> reqwest::Response {
    client()
        .get(format!("{base}{path}"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn admin_routes_require_the_bearer_token() {
    let base = spawn_test_server().await;

    let resp = reqwest::get(format!("{base}/api/ca")).await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client()
        .get(format!("{base}/api/ca"))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = admin_get(&base, "/api/ca").await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn ca_lifecycle_over_http() {
    let base = spawn_test_server().await;

    let status: Value = admin_get(&base, "/api/ca").await.json().await.unwrap();
    assert_eq!(status["exists"], json!(false));

    let resp = admin_post(&base, "/api/ca", json!({"name": "acme"})).await;
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert!(created["fingerprint"].as_str().unwrap().len() == 64);

    // Second creation conflicts.
    let resp = admin_post(&base, "/api/ca", json!({"name": "acme"})).await;
    assert_eq!(resp.status(), 409);

    let status: Value = admin_get(&base, "/api/ca").await.json().await.unwrap();
    assert_eq!(status["exists"], json!(true));
    assert_eq!(status["key_exists"], json!(true));
    assert_eq!(status["fingerprint"], created["fingerprint"]);
}

#[tokio::test]
async fn rotation_requires_confirmation_flag() {
    let base = spawn_test_server().await;
    admin_post(&base, "/api/ca", json!({"name": "acme"})).await;

    let resp = admin_post(&base, "/api/ca/rotate", json!({"name": "acme"})).await;
    assert_eq!(resp.status(), 400);

    let resp = admin_post(&base, "/api/ca/rotate", json!({"name": "acme", "confirm": true})).await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn host_creation_without_ca_is_unavailable() {
    let base = spawn_test_server().await;
    admin_post(&base, "/api/orgs", json!({"name": "eng"})).await;

    let resp = admin_post(&base, "/api/hosts", json!({"org": "eng", "name": "laptop1"})).await;
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn org_and_host_flow_over_http() {
    let base = spawn_test_server().await;
    admin_post(&base, "/api/ca", json!({"name": "acme"})).await;

    let resp = admin_post(&base, "/api/orgs", json!({"name": "eng"})).await;
    assert_eq!(resp.status(), 201);
    let org: Value = resp.json().await.unwrap();
    assert_eq!(org["name"], json!("eng"));
    let subnet = org["subnet"].as_str().unwrap().to_string();
    assert!(subnet.ends_with("/64"));

    // Bad names are rejected at the boundary.
    let resp = admin_post(&base, "/api/orgs", json!({"name": "Not Valid!"})).await;
    assert_eq!(resp.status(), 422);

    let resp = admin_post(
        &base,
        "/api/hosts",
        json!({"org": "eng", "name": "laptop1", "tags": ["eng", "vpn"]}),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let host: Value = resp.json().await.unwrap();
    assert_eq!(host["certificate_details"]["groups"], json!(["org_eng", "eng", "vpn"]));

    // Duplicate name conflicts; unknown org is a 404.
    let resp = admin_post(&base, "/api/hosts", json!({"org": "eng", "name": "laptop1"})).await;
    assert_eq!(resp.status(), 409);
    let resp = admin_post(&base, "/api/hosts", json!({"org": "ghost", "name": "laptop1"})).await;
    assert_eq!(resp.status(), 404);

    let listed: Value = admin_get(&base, "/api/orgs/eng/hosts").await.json().await.unwrap();
    assert_eq!(listed["hosts"].as_array().unwrap().len(), 1);
    assert_eq!(listed["hosts"][0]["name"], json!("laptop1"));

    let detail: Value = admin_get(&base, "/api/orgs/eng/hosts/laptop1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(detail["name"], json!("laptop1"));
    assert!(detail["config"].as_str().unwrap().contains("org_eng"));

    let resp = admin_get(&base, "/api/orgs/eng/hosts/laptop1/bundle").await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "application/zip"
    );
}

#[tokio::test]
async fn invite_flow_over_http() {
    let base = spawn_test_server().await;
    admin_post(&base, "/api/ca", json!({"name": "acme"})).await;
    admin_post(&base, "/api/orgs", json!({"name": "eng"})).await;

    let resp = admin_post(
        &base,
        "/api/invites",
        json!({"org": "eng", "days_valid": 7, "number_of_uses": 1}),
    )
    .await;
    assert_eq!(resp.status(), 201);
    let invite: Value = resp.json().await.unwrap();
    let code = invite["code"].as_str().unwrap().to_string();
    assert_eq!(invite["remaining_uses"], json!(1));
    assert_eq!(invite["status"], json!("active"));

    // Zero uses is invalid input.
    let resp = admin_post(&base, "/api/invites", json!({"org": "eng", "number_of_uses": 0})).await;
    assert_eq!(resp.status(), 400);

    // Redemption needs no admin token: the code is the authorization.
    let resp = client()
        .post(format!("{base}/api/enroll"))
        .json(&json!({"code": code, "name": "phone1", "tags": ["vpn"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "application/zip"
    );
    let bytes = resp.bytes().await.unwrap();
    assert!(!bytes.is_empty());

    // The single use is gone: the second redemption is told "exhausted".
    let resp = client()
        .post(format!("{base}/api/enroll"))
        .json(&json!({"code": code, "name": "phone2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 410);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["kind"], json!("exhausted"));

    // An unknown code is distinguishable from an exhausted one.
    let resp = client()
        .post(format!("{base}/api/enroll"))
        .json(&json!({"code": "nosuchcode", "name": "phone3"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["kind"], json!("invalid_code"));

    let listed: Value = admin_get(&base, "/api/invites").await.json().await.unwrap();
    assert_eq!(listed["invites"].as_array().unwrap().len(), 1);
    assert_eq!(listed["invites"][0]["status"], json!("exhausted"));
}

#[tokio::test]
async fn revoked_invite_reports_revoked() {
    let base = spawn_test_server().await;
    admin_post(&base, "/api/ca", json!({"name": "acme"})).await;
    admin_post(&base, "/api/orgs", json!({"name": "eng"})).await;

    let invite: Value = admin_post(&base, "/api/invites", json!({"org": "eng", "number_of_uses": 5}))
        .await
        .json()
        .await
        .unwrap();
    let code = invite["code"].as_str().unwrap().to_string();

    let resp = client()
        .delete(format!("{base}/api/invites/{code}"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client()
        .post(format!("{base}/api/enroll"))
        .json(&json!({"code": code, "name": "phone1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 410);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["kind"], json!("revoked"));
}

#[tokio::test]
async fn enrollment_with_supplied_public_key_omits_private_key() {
    let base = spawn_test_server().await;
    admin_post(&base, "/api/ca", json!({"name": "acme"})).await;
    admin_post(&base, "/api/orgs", json!({"name": "eng"})).await;

    let invite: Value = admin_post(&base, "/api/invites", json!({"org": "eng"}))
        .await
        .json()
        .await
        .unwrap();
    let code = invite["code"].as_str().unwrap();

    let enrollee = canopy_ca::KeyPair::generate();
    let resp = client()
        .post(format!("{base}/api/enroll"))
        .json(&json!({
            "code": code,
            "name": "phone1",
            "public_key": enrollee.verifying_key.to_base64(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let bytes = resp.bytes().await.unwrap().to_vec();
    let bundle =
        canopy_registry::HostBundle::open(std::io::Cursor::new(bytes)).unwrap();
    assert!(bundle.key.is_none());
    assert!(bundle.certificate.is_some());
    assert!(bundle.ca_certificate.is_some());

    let host: Value = admin_get(&base, "/api/orgs/eng/hosts/phone1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(host["has_server_key"], json!(false));
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let base = spawn_test_server().await;
    let resp = reqwest::get(format!("{base}/api/nonexistent")).await.unwrap();
    assert_eq!(resp.status(), 404);
}
