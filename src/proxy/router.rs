//! HTTP router and handlers
//!
//! Route stacks, outermost first:
//!
//! | Path | Stack |
//! |------|-------|
//! | `/health` | logging, CORS |
//! | `/auth/token` | logging, CORS, tenant resolver, LMS auth, issuer |
//! | `/xapi/statements` | logging, CORS, tenant resolver, token verifier, evaluator, forwarder |
//! | `/xapi/activities/state` | same |
//! | `/xapi/activities/profile` | same (activityId pinned to the token activity) |
//! | `/xapi/agents/profile` | same (agent must identify the token actor) |
//! | `/xapi/about` | logging, CORS, tenant resolver, forwarder |
//! | `/admin/tenants…` | logging, CORS, admin auth, registry operations |

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{Method, Response},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use bytes::Bytes;
use serde_json::json;
use subtle::ConstantTimeEq;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use super::{Forwarder, admin, client_ip, lms_auth, resolver, user_agent, verify};
use crate::audit::{self, AuditEvent};
use crate::authz::{self, Decision, ReadQuery};
use crate::tenant::{TenantConfig, TenantRegistry, TenantStore};
use crate::token::{TokenClaims, TokenRequest, issuer};
use crate::{Error, Result};

/// Largest request body the proxy will buffer for validation.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Shared application state
pub struct AppState {
    /// Tenant resolution (static or store-backed)
    pub registry: Arc<dyn TenantRegistry>,
    /// Shared upstream client
    pub forwarder: Forwarder,
    /// Bearer token guarding the admin surface
    pub admin_token: Option<String>,
    /// Persistent audit sink (multi-tenant mode)
    pub audit_sink: Option<Arc<dyn TenantStore>>,
    /// In-flight request tracker for graceful drain. Each request holds a
    /// permit; shutdown waits for all permits to be returned.
    pub inflight: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    /// Emit an audit event and, when a persistent sink is configured, write
    /// it there off the request path. Sink failures never fail the request.
    pub fn audit(&self, event: AuditEvent) {
        audit::emit(&event);
        if let Some(sink) = &self.audit_sink {
            let sink = Arc::clone(sink);
            tokio::spawn(async move {
                if let Err(e) = sink.record_audit(&event).await {
                    warn!(error = %e, "Audit sink write failed");
                }
            });
        }
    }

    /// Constant-time admin credential check. An unconfigured token rejects
    /// everything.
    #[must_use]
    pub fn accepts_admin_token(&self, presented: &str) -> bool {
        match &self.admin_token {
            Some(expected) => expected.as_bytes().ct_eq(presented.as_bytes()).into(),
            None => false,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let content = Router::new()
        .route(
            "/xapi/statements",
            get(statements_handler)
                .post(statements_handler)
                .put(statements_handler),
        )
        .route(
            "/xapi/activities/state",
            get(state_handler)
                .post(state_handler)
                .put(state_handler)
                .delete(state_handler),
        )
        .route(
            "/xapi/activities/profile",
            get(activities_profile_handler)
                .post(activities_profile_handler)
                .put(activities_profile_handler)
                .delete(activities_profile_handler),
        )
        .route(
            "/xapi/agents/profile",
            get(agents_profile_handler)
                .post(agents_profile_handler)
                .put(agents_profile_handler)
                .delete(agents_profile_handler),
        )
        .layer(middleware::from_fn(verify::verify_token));

    let lms = Router::new()
        .route("/auth/token", post(issue_token_handler))
        .layer(middleware::from_fn(lms_auth::authenticate_lms));

    let about = Router::new().route("/xapi/about", get(about_handler));

    // Everything below resolves a tenant from the Host header
    let tenant_scoped = Router::new()
        .merge(content)
        .merge(lms)
        .merge(about)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            resolver::resolve_tenant,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/tenants",
            get(admin::list_tenants).post(admin::create_tenant),
        )
        .route(
            "/admin/tenants/{tenant_id}",
            get(admin::get_tenant).delete(admin::delete_tenant),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            admin::authenticate_admin,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(tenant_scoped)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_inflight,
        ))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Per-request drain permit. Held for the duration of request processing so
/// shutdown can wait for in-flight work.
async fn track_inflight(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let _permit = Arc::clone(&state.inflight).acquire_owned().await;
    next.run(request).await
}

/// GET /health
async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Context extraction ─────────────────────────────────────────────────────

fn tenant_from(parts: &axum::http::request::Parts) -> Result<Arc<TenantConfig>> {
    parts
        .extensions
        .get::<Arc<TenantConfig>>()
        .cloned()
        .ok_or_else(|| Error::Internal("tenant missing from request context".to_string()))
}

fn claims_from(parts: &axum::http::request::Parts) -> Result<TokenClaims> {
    parts
        .extensions
        .get::<TokenClaims>()
        .cloned()
        .ok_or_else(|| Error::Internal("claims missing from request context".to_string()))
}

async fn buffer_body(body: Body) -> Result<Bytes> {
    axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| Error::Malformed(format!("failed to read request body: {e}")))
}

// ── Token issuance ─────────────────────────────────────────────────────────

/// `POST /auth/token` — validate the LMS request and mint a session token.
async fn issue_token_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<impl IntoResponse> {
    let (parts, body) = request.into_parts();
    let tenant = tenant_from(&parts)?;
    let ip = client_ip(&parts.headers);
    let agent = user_agent(&parts.headers);

    let bytes = buffer_body(body).await?;
    let token_request: TokenRequest = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Malformed(format!("invalid token request: {e}")))?;

    match issuer::issue(&tenant, &token_request) {
        Ok(issued) => {
            state.audit(
                AuditEvent::token_issued(&tenant.tenant_id, &token_request)
                    .with_client(ip, agent),
            );
            Ok(Json(json!({
                "token": issued.token,
                "expires_at": issued.expires_at.to_rfc3339(),
            })))
        }
        Err(e) => {
            state.audit(
                AuditEvent::token_rejected(&tenant.tenant_id, e.to_string())
                    .with_client(ip, agent),
            );
            Err(e)
        }
    }
}

// ── Content path ───────────────────────────────────────────────────────────

/// `POST|PUT|GET /xapi/statements` — evaluate, then forward.
async fn statements_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response<Body>> {
    let (parts, body) = request.into_parts();
    let tenant = tenant_from(&parts)?;
    let claims = claims_from(&parts)?;
    let ip = client_ip(&parts.headers);
    let agent = user_agent(&parts.headers);
    let raw_query = parts.uri.query();

    if parts.method == Method::GET {
        let query = ReadQuery::from_query_str(raw_query.unwrap_or(""));
        let decision = authz::validate_read(&claims, tenant.policy, &query);
        if let Decision::Deny(reason) = decision {
            state.audit(
                AuditEvent::denied("statements.read", &claims, reason.clone())
                    .with_client(ip, agent),
            );
            return Err(Error::Forbidden(reason));
        }
        state.audit(AuditEvent::authorized("statements.read", &claims).with_client(ip, agent));

        return state
            .forwarder
            .forward(&tenant, &parts.method, "/statements", raw_query, &parts.headers, None)
            .await;
    }

    // Write path: buffer the exact bytes, validate every statement, and
    // only then let those same bytes go upstream.
    let bytes = buffer_body(body).await?;
    let batch = crate::xapi::parse_statement_batch(&bytes)
        .map_err(|e| Error::Malformed(format!("invalid statement body: {e}")))?;

    let decision = authz::validate_batch(&claims, tenant.policy, &batch);
    if let Decision::Deny(reason) = decision {
        state.audit(
            AuditEvent::denied("statements.write", &claims, reason.clone())
                .with_client(ip, agent),
        );
        return Err(Error::Forbidden(reason));
    }
    state.audit(AuditEvent::authorized("statements.write", &claims).with_client(ip, agent));

    state
        .forwarder
        .forward(
            &tenant,
            &parts.method,
            "/statements",
            raw_query,
            &parts.headers,
            Some(bytes),
        )
        .await
}

/// Document-resource query parameters the evaluator constrains.
fn document_params(query: &str) -> (Option<String>, Option<String>, Option<String>) {
    let mut activity = None;
    let mut agent = None;
    let mut registration = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "activityId" => activity = Some(value.into_owned()),
            "agent" => agent = Some(value.into_owned()),
            "registration" => registration = Some(value.into_owned()),
            _ => {}
        }
    }
    (activity, agent, registration)
}

/// `/xapi/activities/state` — state access check, then forward.
async fn state_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response<Body>> {
    let (parts, body) = request.into_parts();
    let tenant = tenant_from(&parts)?;
    let claims = claims_from(&parts)?;
    let ip = client_ip(&parts.headers);
    let agent_header = user_agent(&parts.headers);
    let raw_query = parts.uri.query();

    let (activity, agent, registration) = document_params(raw_query.unwrap_or(""));
    let decision = authz::validate_state_access(
        &claims,
        tenant.policy,
        activity.as_deref(),
        agent.as_deref(),
        registration.as_deref(),
    );
    if let Decision::Deny(reason) = decision {
        state.audit(
            AuditEvent::denied("state.access", &claims, reason.clone())
                .with_client(ip, agent_header),
        );
        return Err(Error::Forbidden(reason));
    }
    state.audit(AuditEvent::authorized("state.access", &claims).with_client(ip, agent_header));

    let bytes = if matches!(parts.method, Method::POST | Method::PUT) {
        Some(buffer_body(body).await?)
    } else {
        None
    };

    state
        .forwarder
        .forward(
            &tenant,
            &parts.method,
            "/activities/state",
            raw_query,
            &parts.headers,
            bytes,
        )
        .await
}

/// `/xapi/activities/profile` — the `activityId` parameter must stay within
/// the token's scope; activity profiles carry no actor binding.
async fn activities_profile_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response<Body>> {
    let (parts, body) = request.into_parts();
    let tenant = tenant_from(&parts)?;
    let claims = claims_from(&parts)?;
    let ip = client_ip(&parts.headers);
    let agent_header = user_agent(&parts.headers);
    let raw_query = parts.uri.query();

    let (activity, _, _) = document_params(raw_query.unwrap_or(""));
    let decision = authz::validate_activity_access(&claims, tenant.policy, activity.as_deref());
    if let Decision::Deny(reason) = decision {
        state.audit(
            AuditEvent::denied("profile.access", &claims, reason.clone())
                .with_client(ip, agent_header),
        );
        return Err(Error::Forbidden(reason));
    }
    state.audit(AuditEvent::authorized("profile.access", &claims).with_client(ip, agent_header));

    let bytes = if matches!(parts.method, Method::POST | Method::PUT) {
        Some(buffer_body(body).await?)
    } else {
        None
    };

    state
        .forwarder
        .forward(
            &tenant,
            &parts.method,
            "/activities/profile",
            raw_query,
            &parts.headers,
            bytes,
        )
        .await
}

/// `/xapi/agents/profile` — the agent parameter must identify the token
/// actor; otherwise a passthrough like activities/profile.
async fn agents_profile_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response<Body>> {
    let (parts, body) = request.into_parts();
    let tenant = tenant_from(&parts)?;
    let claims = claims_from(&parts)?;
    let ip = client_ip(&parts.headers);
    let agent_header = user_agent(&parts.headers);
    let raw_query = parts.uri.query();

    let (_, agent, _) = document_params(raw_query.unwrap_or(""));
    let decision =
        authz::validate_state_access(&claims, tenant.policy, None, agent.as_deref(), None);
    if let Decision::Deny(reason) = decision {
        state.audit(
            AuditEvent::denied("profile.access", &claims, reason.clone())
                .with_client(ip, agent_header),
        );
        return Err(Error::Forbidden(reason));
    }
    state.audit(AuditEvent::authorized("profile.access", &claims).with_client(ip, agent_header));

    let bytes = if matches!(parts.method, Method::POST | Method::PUT) {
        Some(buffer_body(body).await?)
    } else {
        None
    };

    state
        .forwarder
        .forward(
            &tenant,
            &parts.method,
            "/agents/profile",
            raw_query,
            &parts.headers,
            bytes,
        )
        .await
}

/// `GET /xapi/about` — no token required; the LRS answers for itself.
async fn about_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response<Body>> {
    let (parts, _body) = request.into_parts();
    let tenant = tenant_from(&parts)?;

    state
        .forwarder
        .forward(
            &tenant,
            &parts.method,
            "/about",
            parts.uri.query(),
            &parts.headers,
            None,
        )
        .await
}
