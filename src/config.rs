//! Configuration management
//!
//! Layered the same way at every deployment: YAML file, then environment
//! variables with the `XAPI_PROXY_` prefix (`__` separates nesting levels).
//! Secret-valued fields support `env:VAR_NAME` indirection so keys never
//! have to live in the file itself.

use std::{env, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::tenant::{ScopePolicy, TenantConfig, WILDCARD_HOST};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before secret resolution. Loaded in order,
    /// later files override earlier. Missing files are skipped.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Single-tenant configuration (ignored under `--multi-tenant`)
    pub tenant: TenantFileConfig,
    /// Tenant store configuration (required under `--multi-tenant`)
    pub database: DatabaseConfig,
    /// Whether to resolve tenants from the store instead of this file
    pub multi_tenant: bool,
    /// Admin surface configuration
    pub admin: AdminConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Overall request deadline in seconds. Covers inbound read, the
    /// upstream call, and response write.
    pub request_timeout_secs: u64,
    /// Graceful shutdown drain timeout (seconds)
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 60,
            shutdown_timeout_secs: 30,
        }
    }
}

/// The single tenant of a non-multiplexed deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantFileConfig {
    /// Tenant identifier stamped into tokens
    pub tenant_id: String,
    /// LRS base URL
    pub upstream_endpoint: String,
    /// HTTP Basic username toward the LRS
    pub upstream_username: String,
    /// HTTP Basic password toward the LRS (supports `env:VAR`)
    pub upstream_password: String,
    /// Token signing key (supports `env:VAR`; ≥32 bytes recommended)
    pub signing_key: String,
    /// Token lifetime in seconds
    pub token_ttl_seconds: u64,
    /// Accepted LMS bearer credentials (each supports `env:VAR`)
    pub lms_keys: Vec<String>,
    /// Unknown-scope behavior
    pub policy: ScopePolicy,
}

impl Default for TenantFileConfig {
    fn default() -> Self {
        Self {
            tenant_id: "default".to_string(),
            upstream_endpoint: String::new(),
            upstream_username: String::new(),
            upstream_password: String::new(),
            signing_key: String::new(),
            token_ttl_seconds: 3600,
            lms_keys: Vec::new(),
            policy: ScopePolicy::Strict,
        }
    }
}

/// Tenant store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection string (supports `env:VAR`)
    pub url: Option<String>,
}

/// Admin surface configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token guarding `/admin` routes (supports `env:VAR`).
    /// When unset, the admin surface rejects every request.
    pub bearer_token: Option<String>,
}

impl AdminConfig {
    /// Resolve the admin token (expand `env:VAR`).
    #[must_use]
    pub fn resolve_bearer_token(&self) -> Option<String> {
        self.bearer_token.as_deref().map(resolve_secret)
    }
}

/// Expand `env:VAR_NAME` indirection; literal values pass through.
#[must_use]
pub fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly-given config file does not exist
    /// or cannot be parsed. A missing *default* file is fine; validation
    /// catches any required field the environment did not supply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        } else {
            let default = Path::new("config.yaml");
            if default.exists() {
                figment = figment.merge(Yaml::file(default));
            }
        }

        figment = figment.merge(Env::prefixed("XAPI_PROXY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {path_str}"),
                    Err(e) => tracing::warn!("Failed to load env file {path_str}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }

    /// Validate the configuration for the selected deployment mode.
    pub fn validate(&self) -> Result<()> {
        if self.multi_tenant {
            if self.database.url.is_none() {
                return Err(Error::Config(
                    "multi-tenant mode requires a database connection string (--db)".to_string(),
                ));
            }
            return Ok(());
        }

        if self.tenant.upstream_endpoint.is_empty() {
            return Err(Error::Config(
                "tenant.upstream_endpoint is required in single-tenant mode".to_string(),
            ));
        }
        Url::parse(&self.tenant.upstream_endpoint).map_err(|e| {
            Error::Config(format!(
                "tenant.upstream_endpoint is not a valid URL: {e}"
            ))
        })?;

        if self.tenant.token_ttl_seconds == 0 {
            return Err(Error::Config(
                "tenant.token_ttl_seconds must be positive".to_string(),
            ));
        }

        let signing_key = resolve_secret(&self.tenant.signing_key);
        if signing_key.is_empty() {
            return Err(Error::Config(
                "tenant.signing_key is required in single-tenant mode".to_string(),
            ));
        }
        if signing_key.len() < 32 {
            tracing::warn!(
                length = signing_key.len(),
                "Signing key is shorter than the recommended 32 bytes"
            );
        }

        Ok(())
    }

    /// Build the runtime tenant from the single-tenant section, resolving
    /// every secret indirection.
    #[must_use]
    pub fn single_tenant(&self) -> TenantConfig {
        TenantConfig {
            tenant_id: self.tenant.tenant_id.clone(),
            hosts: vec![WILDCARD_HOST.to_string()],
            upstream_endpoint: self.tenant.upstream_endpoint.clone(),
            upstream_username: self.tenant.upstream_username.clone(),
            upstream_password: resolve_secret(&self.tenant.upstream_password),
            signing_key: resolve_secret(&self.tenant.signing_key),
            token_ttl_seconds: self.tenant.token_ttl_seconds,
            lms_keys: self
                .tenant
                .lms_keys
                .iter()
                .map(|k| resolve_secret(k))
                .collect(),
            lms_keys_hashed: false,
            policy: self.tenant.policy,
        }
    }

    /// Resolved store connection string.
    #[must_use]
    pub fn database_url(&self) -> Option<String> {
        self.database.url.as_deref().map(resolve_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_single_tenant_config_from_yaml() {
        let file = write_config(
            r"
server:
  port: 9000
tenant:
  tenant_id: acme
  upstream_endpoint: https://lrs.example/xapi
  upstream_username: proxy
  upstream_password: secret
  signing_key: 0123456789abcdef0123456789abcdef
  token_ttl_seconds: 1800
  lms_keys:
    - launch-key
  policy: permissive
",
        );

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.tenant.tenant_id, "acme");
        assert_eq!(config.tenant.token_ttl_seconds, 1800);
        assert_eq!(config.tenant.policy, ScopePolicy::Permissive);
        assert!(config.validate().is_ok());

        let tenant = config.single_tenant();
        assert_eq!(tenant.hosts, vec![WILDCARD_HOST.to_string()]);
        assert!(!tenant.lms_keys_hashed);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/config.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_endpoint_fails_validation() {
        let file = write_config(
            r"
tenant:
  signing_key: 0123456789abcdef0123456789abcdef
",
        );
        let config = Config::load(Some(file.path())).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("upstream_endpoint"));
    }

    #[test]
    fn missing_signing_key_fails_validation() {
        let file = write_config(
            r"
tenant:
  upstream_endpoint: https://lrs.example/xapi
",
        );
        let config = Config::load(Some(file.path())).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signing_key"));
    }

    #[test]
    fn invalid_endpoint_url_fails_validation() {
        let file = write_config(
            r"
tenant:
  upstream_endpoint: 'not a url'
  signing_key: 0123456789abcdef0123456789abcdef
",
        );
        let config = Config::load(Some(file.path())).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn multi_tenant_requires_database_url() {
        let mut config = Config::default();
        config.multi_tenant = true;
        assert!(config.validate().is_err());

        config.database.url = Some("postgres://localhost/tenants".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_indirection_resolves_secrets() {
        // PATH is set in any test environment
        let path = env::var("PATH").unwrap();
        assert_eq!(resolve_secret("env:PATH"), path);
        assert_eq!(resolve_secret("literal-value"), "literal-value");
        // Unset vars pass the raw value through
        assert_eq!(
            resolve_secret("env:CONFIG_TEST_UNSET_VARIABLE"),
            "env:CONFIG_TEST_UNSET_VARIABLE"
        );
    }
}
