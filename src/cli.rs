//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Authentication and authorization proxy between LMS content and an xAPI LRS
#[derive(Parser, Debug)]
#[command(name = "xapi-lrs-auth-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "XAPI_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Resolve tenants from the external store instead of the config file
    #[arg(long, env = "XAPI_PROXY_MULTI_TENANT")]
    pub multi_tenant: bool,

    /// Tenant store connection string (required with --multi-tenant)
    #[arg(long, env = "XAPI_PROXY_DB")]
    pub db: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "XAPI_PROXY_PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "XAPI_PROXY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "XAPI_PROXY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
