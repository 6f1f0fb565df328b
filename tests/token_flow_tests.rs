//! Token issuance flow: LMS authentication, request validation, and the
//! issued token's verification properties.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{
    LMS_KEY, OTHER_SIGNING_KEY, SIGNING_KEY, app_with_tenant, body_bytes, spawn_upstream,
    tenant_config,
};
use xapi_lrs_auth_proxy::token::{self, Scope, TOKEN_ISSUER};

const HOST: &str = "acme.example";

fn token_request_body() -> Value {
    json!({
        "actor": { "objectType": "Agent", "mbox": "mailto:a@x" },
        "registration": "R1",
        "activity_id": "https://ex/a",
        "course_id": "course-9",
        "permissions": {
            "write": "actor-activity-registration-scoped",
            "read": "actor-activity-registration-scoped"
        }
    })
}

fn issue_request(lms_key: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/token")
        .header(header::HOST, HOST)
        .header(header::AUTHORIZATION, format!("Bearer {lms_key}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn lms_obtains_a_verifiable_session_token() {
    let (endpoint, _log) = spawn_upstream().await;
    let app = app_with_tenant(tenant_config("acme", HOST, &endpoint, SIGNING_KEY));

    let before = Utc::now().timestamp();
    let response = app
        .oneshot(issue_request(LMS_KEY, &token_request_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value =
        serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    let token = body["token"].as_str().unwrap();
    let expires_at = body["expires_at"].as_str().unwrap();

    // Three unpadded base64url segments
    assert_eq!(token.split('.').count(), 3);
    assert!(!token.contains('='));

    // RFC3339 expiry, ttl seconds out
    let expires = chrono::DateTime::parse_from_rfc3339(expires_at).unwrap();
    assert!(expires.timestamp() >= before + 3600);

    // The token verifies under the tenant key and carries the request
    let claims = token::verify(token, SIGNING_KEY.as_bytes()).unwrap();
    assert_eq!(claims.tenant_id, "acme");
    assert_eq!(claims.registration, "R1");
    assert_eq!(claims.activity_id, "https://ex/a");
    assert_eq!(claims.course_id.as_deref(), Some("course-9"));
    assert_eq!(claims.iss, TOKEN_ISSUER);
    assert_eq!(claims.sub, "mailto:a@x");
    assert_eq!(claims.permissions.write, Scope::ActorActivityRegistration);
    assert!(claims.exp > claims.iat);

    // Signature integrity: the token fails under any other tenant's key
    assert!(token::verify(token, OTHER_SIGNING_KEY.as_bytes()).is_err());
}

#[tokio::test]
async fn wrong_lms_key_is_401_with_generic_body() {
    let (endpoint, _log) = spawn_upstream().await;
    let app = app_with_tenant(tenant_config("acme", HOST, &endpoint, SIGNING_KEY));

    let response = app
        .oneshot(issue_request("not-the-key", &token_request_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let text = String::from_utf8(body_bytes(response.into_body()).await).unwrap();
    // Must not disclose which sub-check failed
    assert!(text.contains("Invalid token"));
    assert!(!text.contains("LMS"));
    assert!(!text.contains("credential"));
}

#[tokio::test]
async fn missing_authorization_is_401() {
    let (endpoint, _log) = spawn_upstream().await;
    let app = app_with_tenant(tenant_config("acme", HOST, &endpoint, SIGNING_KEY));

    let request = Request::builder()
        .method("POST")
        .uri("/auth/token")
        .header(header::HOST, HOST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(token_request_body().to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_scope_is_400() {
    let (endpoint, _log) = spawn_upstream().await;
    let app = app_with_tenant(tenant_config("acme", HOST, &endpoint, SIGNING_KEY));

    let mut body = token_request_body();
    body["permissions"]["read"] = json!("not-a-real-scope");

    let response = app.oneshot(issue_request(LMS_KEY, &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn read_only_write_scope_is_400() {
    let (endpoint, _log) = spawn_upstream().await;
    let app = app_with_tenant(tenant_config("acme", HOST, &endpoint, SIGNING_KEY));

    let mut body = token_request_body();
    body["permissions"]["write"] = json!("actor-cross-course-certification");

    let response = app.oneshot(issue_request(LMS_KEY, &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_body_is_400() {
    let (endpoint, _log) = spawn_upstream().await;
    let app = app_with_tenant(tenant_config("acme", HOST, &endpoint, SIGNING_KEY));

    let request = Request::builder()
        .method("POST")
        .uri("/auth/token")
        .header(header::HOST, HOST)
        .header(header::AUTHORIZATION, format!("Bearer {LMS_KEY}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn group_token_round_trips_the_group() {
    let (endpoint, _log) = spawn_upstream().await;
    let app = app_with_tenant(tenant_config("acme", HOST, &endpoint, SIGNING_KEY));

    let body = json!({
        "actor": { "mbox": "mailto:a@x" },
        "registration": "R1",
        "activity_id": "https://ex/a",
        "permissions": {
            "write": "group-activity-registration-scoped",
            "read": "group-activity-registration-scoped"
        },
        "group": {
            "objectType": "Group",
            "name": "team-1",
            "member": [
                { "mbox": "mailto:a@x" },
                { "mbox": "mailto:b@x" }
            ]
        }
    });

    let response = app.oneshot(issue_request(LMS_KEY, &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = serde_json::from_slice(&body_bytes(response.into_body()).await).unwrap();
    let claims = token::verify(json["token"].as_str().unwrap(), SIGNING_KEY.as_bytes()).unwrap();
    let group = claims.group.unwrap();
    assert_eq!(group.name.as_deref(), Some("team-1"));
    assert_eq!(group.member.len(), 2);
}

#[tokio::test]
async fn groupless_group_scope_request_is_400() {
    let (endpoint, _log) = spawn_upstream().await;
    let app = app_with_tenant(tenant_config("acme", HOST, &endpoint, SIGNING_KEY));

    let mut body = token_request_body();
    body["group"] = json!({ "objectType": "Group", "name": "team-1", "member": [] });

    let response = app.oneshot(issue_request(LMS_KEY, &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
