//! xAPI LRS Auth Proxy
//!
//! Sits between launched learning content and a Learning Record Store,
//! replacing long-lived shared secrets with short-lived session tokens and
//! enforcing cmi5-derived authorization on every request.
//!
//! # Pipeline
//!
//! Content request: tenant resolver → token verifier → permission
//! evaluator → credential-swapping forwarder → LRS.
//!
//! LMS token request: tenant resolver → LMS authenticator → token issuer.
//!
//! # Tenancy
//!
//! One deployment serves many customers: the `Host` header selects the
//! tenant, which carries its own signing key, upstream credentials, and
//! accepted LMS keys. Single-tenant deployments use a wildcard host.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod authz;
pub mod cli;
pub mod config;
pub mod error;
pub mod proxy;
pub mod tenant;
pub mod token;
pub mod xapi;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// xAPI version injected upstream when the client omits it
pub const XAPI_VERSION: &str = "1.0.3";

/// Header carrying the xAPI version
pub const XAPI_VERSION_HEADER: &str = "x-experience-api-version";

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
