//! Admin surface — tenant CRUD over the registry's optional admin
//! capability.
//!
//! Guarded by the configured admin bearer token (constant-time compare).
//! Registries without the admin capability (single-tenant deployments)
//! answer 501 for mutations; listing and lookup degrade the same way.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::info;

use super::{AppState, bearer_token};
use crate::tenant::{NewTenant, RegistryError, TenantAdmin, TenantSummary};
use crate::{Error, Result};

/// Admit the request iff it bears the configured admin token.
pub async fn authenticate_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let Some(presented) = bearer_token(request.headers()) else {
        return Err(Error::Unauthenticated);
    };
    if !state.accepts_admin_token(presented) {
        return Err(Error::Unauthenticated);
    }
    Ok(next.run(request).await)
}

fn admin_capability(state: &AppState) -> Result<&dyn TenantAdmin> {
    state
        .registry
        .admin()
        .ok_or_else(|| Error::NotImplemented("tenant administration requires multi-tenant mode".to_string()))
}

/// `GET /admin/tenants`
pub async fn list_tenants(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TenantSummary>>> {
    let admin = admin_capability(&state)?;
    let tenants = admin.list().await.map_err(registry_error)?;
    Ok(Json(tenants))
}

/// `POST /admin/tenants`
pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewTenant>,
) -> Result<impl IntoResponse> {
    if request.tenant_id.is_empty() {
        return Err(Error::Malformed("tenant_id must be non-empty".to_string()));
    }
    if request.hosts.is_empty() {
        return Err(Error::Malformed("at least one host is required".to_string()));
    }
    if request.token_ttl_seconds == 0 {
        return Err(Error::Malformed(
            "token_ttl_seconds must be positive".to_string(),
        ));
    }

    let admin = admin_capability(&state)?;
    let summary = admin.create(request).await.map_err(registry_error)?;
    info!(tenant = %summary.tenant_id, "Created tenant");
    Ok((StatusCode::CREATED, Json(summary)))
}

/// `GET /admin/tenants/{tenant_id}`
pub async fn get_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantSummary>> {
    let tenant = state
        .registry
        .resolve_by_id(&tenant_id)
        .await
        .map_err(|e| match e {
            RegistryError::NotFound => Error::TenantNotFound(tenant_id.clone()),
            RegistryError::Store(msg) => Error::Internal(msg),
        })?;
    Ok(Json(TenantSummary::from(tenant.as_ref())))
}

/// `DELETE /admin/tenants/{tenant_id}`
pub async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse> {
    let admin = admin_capability(&state)?;
    let deleted = admin.delete(&tenant_id).await.map_err(registry_error)?;
    if !deleted {
        return Err(Error::TenantNotFound(tenant_id));
    }
    info!(tenant = %tenant_id, "Deleted tenant");
    Ok(Json(json!({ "deleted": tenant_id })))
}

fn registry_error(e: RegistryError) -> Error {
    match e {
        RegistryError::NotFound => Error::TenantNotFound("tenant".to_string()),
        RegistryError::Store(msg) => Error::Internal(msg),
    }
}
