//! Tenant resolver middleware — maps the request hostname to a tenant and
//! attaches it to the request.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::{AppState, host_without_port};
use crate::tenant::{RegistryError, TenantConfig};
use crate::{Error, Result};

/// Resolve the tenant for the request `Host` and inject it as an
/// `Arc<TenantConfig>` extension. Unknown hosts are 404, store failures 5xx.
pub async fn resolve_tenant(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(host_without_port)
        .map(String::from)
        .or_else(|| request.uri().host().map(String::from))
        .ok_or_else(|| Error::Malformed("missing Host header".to_string()))?;

    let tenant: Arc<TenantConfig> =
        state
            .registry
            .resolve_by_host(&host)
            .await
            .map_err(|e| match e {
                RegistryError::NotFound => Error::TenantNotFound(host.clone()),
                RegistryError::Store(msg) => Error::Internal(msg),
            })?;

    debug!(host = %host, tenant = %tenant.tenant_id, "Resolved tenant");
    request.extensions_mut().insert(tenant);

    Ok(next.run(request).await)
}
