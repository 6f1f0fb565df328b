//! Request-path pipeline: tenant resolution, authentication, authorization,
//! and upstream forwarding.

pub mod admin;
pub mod forward;
pub mod lms_auth;
pub mod resolver;
pub mod router;
pub mod server;
pub mod verify;

use std::net::IpAddr;

use axum::http::HeaderMap;

pub use forward::Forwarder;
pub use router::{AppState, create_router};
pub use server::ProxyServer;

/// Extract the bearer credential from an `Authorization` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Client IP from `X-Forwarded-For` or `X-Real-IP`, for audit records.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
}

/// Client User-Agent, for audit records.
#[must_use]
pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Hostname from a `Host` header value, with any port stripped.
#[must_use]
pub fn host_without_port(value: &str) -> &str {
    // IPv6 literals keep their brackets; everything else drops :port
    if let Some(rest) = value.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &value[..=end + 1];
        }
    }
    value.split(':').next().unwrap_or(value)
}
