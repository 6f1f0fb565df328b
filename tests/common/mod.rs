//! Shared fixtures for the integration tests: a capturing stub LRS, tenant
//! configs, and router assembly.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{Router, body::Body, extract::{Request, State}, response::IntoResponse};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use xapi_lrs_auth_proxy::proxy::{AppState, Forwarder, create_router};
use xapi_lrs_auth_proxy::tenant::{
    RegistryError, ScopePolicy, StaticRegistry, TenantConfig, TenantRegistry,
};
use xapi_lrs_auth_proxy::token::{Permissions, Scope, TOKEN_ISSUER, TokenClaims, sign};
use xapi_lrs_auth_proxy::xapi::Actor;

/// One request as observed by the stub LRS.
#[derive(Debug, Clone)]
pub struct Captured {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

pub type CapturedLog = Arc<Mutex<Vec<Captured>>>;

async fn capture_handler(State(log): State<CapturedLog>, request: Request) -> impl IntoResponse {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

    let headers = parts
        .headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).to_string(),
            )
        })
        .collect();

    log.lock().push(Captured {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(String::from),
        headers,
        body: bytes.to_vec(),
    });

    (
        [("content-type", "application/json"), ("x-upstream", "stub-lrs")],
        r#"{"stored":true}"#,
    )
}

/// Start a stub LRS on an ephemeral port. Returns its base endpoint and the
/// request log.
pub async fn spawn_upstream() -> (String, CapturedLog) {
    let log: CapturedLog = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .fallback(capture_handler)
        .with_state(Arc::clone(&log));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/lrs"), log)
}

pub const SIGNING_KEY: &str = "0123456789abcdef0123456789abcdef";
pub const OTHER_SIGNING_KEY: &str = "fedcba9876543210fedcba9876543210";
pub const LMS_KEY: &str = "lms-launch-key";

pub fn tenant_config(tenant_id: &str, host: &str, endpoint: &str, key: &str) -> TenantConfig {
    TenantConfig {
        tenant_id: tenant_id.into(),
        hosts: vec![host.into()],
        upstream_endpoint: endpoint.into(),
        upstream_username: "proxy-user".into(),
        upstream_password: "proxy-pass".into(),
        signing_key: key.into(),
        token_ttl_seconds: 3600,
        lms_keys: vec![LMS_KEY.into()],
        lms_keys_hashed: false,
        policy: ScopePolicy::Strict,
    }
}

/// Multi-tenant registry over a fixed host map, for tenant-binding tests.
pub struct HostMapRegistry {
    tenants: Vec<Arc<TenantConfig>>,
}

impl HostMapRegistry {
    pub fn new(tenants: Vec<TenantConfig>) -> Self {
        Self {
            tenants: tenants.into_iter().map(Arc::new).collect(),
        }
    }
}

#[async_trait::async_trait]
impl TenantRegistry for HostMapRegistry {
    async fn resolve_by_host(&self, host: &str) -> Result<Arc<TenantConfig>, RegistryError> {
        self.tenants
            .iter()
            .find(|t| t.hosts.iter().any(|h| h == host))
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    async fn resolve_by_id(&self, tenant_id: &str) -> Result<Arc<TenantConfig>, RegistryError> {
        self.tenants
            .iter()
            .find(|t| t.tenant_id == tenant_id)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }
}

pub fn app_with_registry(registry: Arc<dyn TenantRegistry>) -> Router {
    let state = Arc::new(AppState {
        registry,
        forwarder: Forwarder::new().unwrap(),
        admin_token: Some("admin-secret".into()),
        audit_sink: None,
        inflight: Arc::new(tokio::sync::Semaphore::new(1000)),
    });
    create_router(state)
}

pub fn app_with_tenant(tenant: TenantConfig) -> Router {
    app_with_registry(Arc::new(StaticRegistry::new(tenant)))
}

pub fn actor(mbox: &str) -> Actor {
    Actor {
        mbox: Some(mbox.into()),
        ..Actor::default()
    }
}

/// Sign claims directly, bypassing the issuance endpoint. Used to craft
/// expired or foreign-tenant tokens.
pub fn signed_token(
    tenant_id: &str,
    key: &str,
    write: Scope,
    read: Scope,
    iat: i64,
    exp: i64,
) -> String {
    let claims = TokenClaims {
        tenant_id: tenant_id.into(),
        actor: actor("mailto:a@x"),
        registration: "R1".into(),
        activity_id: "https://ex/a".into(),
        course_id: None,
        permissions: Permissions { write, read },
        group: None,
        metadata: None,
        iat,
        exp,
        iss: TOKEN_ISSUER.into(),
        sub: "mailto:a@x".into(),
    };
    sign(&claims, key.as_bytes()).unwrap()
}

/// Read a response body to bytes.
pub async fn body_bytes(body: Body) -> Vec<u8> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
