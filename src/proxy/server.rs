//! Proxy server — registry construction, listener, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use super::forward::Forwarder;
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::tenant::{
    DynamicRegistry, PgTenantStore, StaticRegistry, TenantRegistry, TenantStore,
};
use crate::{Error, Result};

/// Permits in the drain semaphore; effectively "unbounded" concurrency with
/// a countable ceiling so shutdown can wait for all of them back.
const DRAIN_PERMITS: u32 = 10_000;

/// The assembled proxy, ready to serve.
pub struct ProxyServer {
    config: Config,
    state: Arc<AppState>,
}

impl ProxyServer {
    /// Build the registry for the configured deployment mode and assemble
    /// shared state.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or an unreachable tenant
    /// store.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let (registry, audit_sink): (Arc<dyn TenantRegistry>, Option<Arc<dyn TenantStore>>) =
            if config.multi_tenant {
                let url = config.database_url().ok_or_else(|| {
                    Error::Config("multi-tenant mode requires a database connection string".to_string())
                })?;
                let store: Arc<dyn TenantStore> = Arc::new(
                    PgTenantStore::connect(&url)
                        .await
                        .map_err(|e| Error::Config(format!("tenant store connection failed: {e}")))?,
                );
                info!("Tenant registry: store-backed (multi-tenant)");
                (
                    Arc::new(DynamicRegistry::new(Arc::clone(&store))),
                    Some(store),
                )
            } else {
                let tenant = config.single_tenant();
                info!(tenant = %tenant.tenant_id, "Tenant registry: static (single-tenant)");
                (Arc::new(StaticRegistry::new(tenant)), None)
            };

        let state = Arc::new(AppState {
            registry,
            forwarder: Forwarder::new()?,
            admin_token: config.admin.resolve_bearer_token(),
            audit_sink,
            inflight: Arc::new(tokio::sync::Semaphore::new(DRAIN_PERMITS as usize)),
        });

        Ok(Self { config, state })
    }

    /// Run the proxy
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the configured address
    /// or if an unrecoverable runtime error occurs.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let inflight = Arc::clone(&self.state.inflight);
        let app = create_router(Arc::clone(&self.state)).layer(TimeoutLayer::new(
            Duration::from_secs(self.config.server.request_timeout_secs),
        ));

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("XAPI LRS AUTH PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            mode = if self.config.multi_tenant { "multi-tenant" } else { "single-tenant" },
            "Tenant mode"
        );
        if self.state.admin_token.is_some() {
            info!("ADMIN surface enabled at /admin/tenants");
        }
        info!("Token issuance:   POST /auth/token");
        info!("xAPI passthrough: /xapi/statements, /xapi/activities/state,");
        info!("                  /xapi/activities/profile, /xapi/agents/profile");
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        // Graceful drain: each in-flight request holds a permit; getting
        // all of them back means every request finished.
        let drain_timeout = Duration::from_secs(self.config.server.shutdown_timeout_secs);
        info!(timeout = ?drain_timeout, "Draining in-flight requests...");

        match tokio::time::timeout(drain_timeout, inflight.acquire_many(DRAIN_PERMITS)).await {
            Ok(Ok(_permits)) => info!("All in-flight requests completed"),
            Ok(Err(_)) => warn!("Inflight semaphore closed unexpectedly during drain"),
            Err(_) => {
                let remaining =
                    (DRAIN_PERMITS as usize).saturating_sub(inflight.available_permits());
                warn!(
                    remaining_requests = remaining,
                    "Drain timeout reached, proceeding with shutdown"
                );
            }
        }

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
