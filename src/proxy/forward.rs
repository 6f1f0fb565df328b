//! Upstream forwarder — relays admitted xAPI operations to the tenant's LRS
//! with credential substitution.
//!
//! The forwarder is byte-faithful: the body sent upstream is exactly the
//! body consumed during validation, the query string is preserved verbatim,
//! and the upstream response is streamed back without buffering. Only the
//! `Authorization` and `Host` headers are replaced; everything else passes
//! through, with `X-Experience-API-Version` injected when the client
//! omitted it.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, StatusCode};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::tenant::TenantConfig;
use crate::{Error, Result, XAPI_VERSION, XAPI_VERSION_HEADER};

/// Upstream call timeout.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Inbound headers never relayed upstream: the credential headers we
/// replace, plus hop-by-hop headers owned by each connection.
const SKIP_REQUEST_HEADERS: &[&str] = &[
    "authorization",
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

/// Upstream response headers owned by the connection, not the payload.
const SKIP_RESPONSE_HEADERS: &[&str] = &["connection", "transfer-encoding", "keep-alive", "trailer", "upgrade"];

/// Shared upstream HTTP client. One instance per process; reqwest pools
/// connections per endpoint internally.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Build the shared client with the upstream timeout.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("upstream client init failed: {e}")))?;
        Ok(Self { client })
    }

    /// Relay a request to the tenant's LRS and stream back the response.
    ///
    /// `tail` is the inbound path after the `/xapi` prefix; `raw_query` is
    /// the query string exactly as received.
    pub async fn forward(
        &self,
        tenant: &TenantConfig,
        method: &Method,
        tail: &str,
        raw_query: Option<&str>,
        headers: &HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Response<Body>> {
        let url = upstream_url(&tenant.upstream_endpoint, tail, raw_query);
        debug!(method = %method, url = %url, tenant = %tenant.tenant_id, "Forwarding to LRS");

        let upstream_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| Error::Internal(format!("invalid method: {e}")))?;

        let mut request = self
            .client
            .request(upstream_method, &url)
            .basic_auth(&tenant.upstream_username, Some(&tenant.upstream_password));

        let mut has_version = false;
        for (name, value) in headers {
            let lower = name.as_str().to_ascii_lowercase();
            if SKIP_REQUEST_HEADERS.contains(&lower.as_str()) {
                continue;
            }
            if lower == XAPI_VERSION_HEADER {
                has_version = true;
            }
            request = request.header(name.as_str(), value.as_bytes());
        }
        if !has_version {
            request = request.header(XAPI_VERSION_HEADER, XAPI_VERSION);
        }

        if let Some(bytes) = body {
            request = request.body(bytes);
        }

        let upstream = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Upstream request failed");
            Error::Upstream(e.to_string())
        })?;

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .map_err(|e| Error::Upstream(format!("invalid upstream status: {e}")))?;

        let mut builder = Response::builder().status(status);
        for (name, value) in upstream.headers() {
            let lower = name.as_str().to_ascii_lowercase();
            if SKIP_RESPONSE_HEADERS.contains(&lower.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        let body = Body::from_stream(upstream.bytes_stream());
        builder
            .body(body)
            .map_err(|e| Error::Internal(format!("response assembly failed: {e}")))
    }
}

/// Join the tenant endpoint with the path tail and verbatim query string.
fn upstream_url(endpoint: &str, tail: &str, raw_query: Option<&str>) -> String {
    let base = endpoint.trim_end_matches('/');
    match raw_query {
        Some(query) if !query.is_empty() => format!("{base}{tail}?{query}"),
        _ => format!("{base}{tail}"),
    }
}
