//! xAPI LRS Auth Proxy - session-scoped tokens and cmi5 authorization in
//! front of a Learning Record Store.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use xapi_lrs_auth_proxy::{cli::Cli, config::Config, proxy::ProxyServer, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if cli.multi_tenant {
                config.multi_tenant = true;
            }
            if let Some(ref db) = cli.db {
                config.database.url = Some(db.clone());
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        multi_tenant = config.multi_tenant,
        "Starting xAPI LRS auth proxy"
    );

    // Create and run the proxy
    let server = match ProxyServer::new(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Proxy error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Proxy shutdown complete");
    ExitCode::SUCCESS
}
