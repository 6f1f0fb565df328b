//! LMS authenticator middleware — guards the token issuance endpoint.
//!
//! The presented bearer credential must be one of the tenant's accepted LMS
//! keys; comparison is constant-time. The 401 body is the same generic
//! message as every other authentication failure.

use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::bearer_token;
use crate::tenant::TenantConfig;
use crate::{Error, Result};

/// Admit the request iff its bearer credential is in the resolved tenant's
/// LMS key set.
pub async fn authenticate_lms(request: Request, next: Next) -> Result<Response> {
    let tenant = request
        .extensions()
        .get::<Arc<TenantConfig>>()
        .cloned()
        .ok_or_else(|| Error::Internal("tenant not resolved before LMS auth".to_string()))?;

    let Some(credential) = bearer_token(request.headers()) else {
        return Err(Error::Unauthenticated);
    };

    if !tenant.accepts_lms_key(credential) {
        warn!(tenant = %tenant.tenant_id, "Rejected LMS credential");
        return Err(Error::Unauthenticated);
    }

    Ok(next.run(request).await)
}
