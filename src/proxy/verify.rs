//! Token verifier middleware — validates the session token and binds its
//! claims to the request.
//!
//! Every failure mode (missing header, malformed token, wrong algorithm,
//! bad signature, expiry, tenant mismatch) collapses into the same 401 so
//! the response cannot be used as an oracle.

use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::bearer_token;
use crate::tenant::TenantConfig;
use crate::token;
use crate::{Error, Result};

/// Verify the bearer JWT under the resolved tenant's key and inject the
/// decoded [`token::TokenClaims`] as a request extension.
pub async fn verify_token(mut request: Request, next: Next) -> Result<Response> {
    let tenant = request
        .extensions()
        .get::<Arc<TenantConfig>>()
        .cloned()
        .ok_or_else(|| Error::Internal("tenant not resolved before token verification".to_string()))?;

    let Some(raw) = bearer_token(request.headers()) else {
        return Err(Error::Unauthenticated);
    };

    let claims = token::verify(raw, tenant.signing_key.as_bytes()).map_err(|e| {
        debug!(tenant = %tenant.tenant_id, error = %e, "Token verification failed");
        Error::Unauthenticated
    })?;

    // A token minted by one tenant must not work on another's hostname
    if claims.tenant_id != tenant.tenant_id {
        debug!(
            token_tenant = %claims.tenant_id,
            resolved_tenant = %tenant.tenant_id,
            "Token tenant mismatch"
        );
        return Err(Error::Unauthenticated);
    }

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
