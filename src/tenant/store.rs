//! External tenant store for multi-tenant deployments.
//!
//! The [`TenantStore`] trait abstracts the persistence backend; the shipped
//! implementation is [`PgTenantStore`] over Postgres. Logical layout:
//!
//! | Table | Holds |
//! |-------|-------|
//! | `tenants` | tenant ids |
//! | `tenant_hosts` | host → tenant mapping (host is unique) |
//! | `tenant_upstreams` | LRS endpoint + Basic credentials |
//! | `tenant_auth` | signing key, token ttl, scope policy |
//! | `tenant_lms_keys` | accepted LMS credentials, SHA-256 hex form |
//! | `audit_log` | issuance and authorization decisions |

use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use super::{ScopePolicy, TenantConfig, TenantSummary, hash_lms_key};
use crate::audit::AuditEvent;

/// Store failures. Wrapped into [`super::RegistryError::Store`] by the
/// registry and translated to 5xx at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Uniqueness violation (duplicate tenant id or host).
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Request body for creating a tenant via the admin surface.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTenant {
    /// Opaque unique identifier.
    pub tenant_id: String,
    /// Hostnames routing to this tenant. Each host may belong to exactly
    /// one tenant.
    pub hosts: Vec<String>,
    /// Absolute base URL of the LRS.
    pub upstream_endpoint: String,
    /// HTTP Basic username toward the LRS.
    pub upstream_username: String,
    /// HTTP Basic password toward the LRS.
    pub upstream_password: String,
    /// Symmetric signing key (≥32 bytes recommended).
    pub signing_key: String,
    /// Token lifetime in seconds.
    #[serde(default = "default_ttl")]
    pub token_ttl_seconds: u64,
    /// Raw LMS credentials; hashed before storage.
    #[serde(default)]
    pub lms_keys: Vec<String>,
    /// Unknown-scope behavior.
    #[serde(default)]
    pub policy: ScopePolicy,
}

fn default_ttl() -> u64 {
    3600
}

/// Persistence backend for the dynamic registry.
#[async_trait::async_trait]
pub trait TenantStore: Send + Sync + 'static {
    /// Load the tenant owning `host`, or `None`.
    async fn fetch_by_host(&self, host: &str) -> Result<Option<TenantConfig>, StoreError>;

    /// Load a tenant by id, or `None`.
    async fn fetch_by_id(&self, tenant_id: &str) -> Result<Option<TenantConfig>, StoreError>;

    /// Insert a tenant with its hosts, upstream, auth config, and hashed
    /// LMS keys.
    async fn insert(&self, req: NewTenant) -> Result<TenantConfig, StoreError>;

    /// All tenants, secret-free.
    async fn list(&self) -> Result<Vec<TenantSummary>, StoreError>;

    /// Delete a tenant and its dependent rows. Returns `false` when the id
    /// does not exist.
    async fn delete(&self, tenant_id: &str) -> Result<bool, StoreError>;

    /// Append an audit event to the audit table.
    async fn record_audit(&self, event: &AuditEvent) -> Result<(), StoreError>;
}

/// Postgres-backed tenant store.
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    /// Connect a pool to `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load the full config for a known tenant id.
    async fn load_tenant(&self, tenant_id: &str) -> Result<Option<TenantConfig>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT t.tenant_id,
                   u.endpoint, u.username, u.password,
                   a.signing_key, a.token_ttl_seconds, a.policy
            FROM tenants t
            JOIN tenant_upstreams u ON u.tenant_id = t.tenant_id
            JOIN tenant_auth a ON a.tenant_id = t.tenant_id
            WHERE t.tenant_id = $1
            ",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let hosts: Vec<String> =
            sqlx::query("SELECT host FROM tenant_hosts WHERE tenant_id = $1 ORDER BY host")
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|r| r.get("host"))
                .collect();

        let lms_keys: Vec<String> =
            sqlx::query("SELECT key_hash FROM tenant_lms_keys WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|r| r.get("key_hash"))
                .collect();

        let ttl: i64 = row.get("token_ttl_seconds");
        let policy: String = row.get("policy");

        Ok(Some(TenantConfig {
            tenant_id: row.get("tenant_id"),
            hosts,
            upstream_endpoint: row.get("endpoint"),
            upstream_username: row.get("username"),
            upstream_password: row.get("password"),
            signing_key: row.get("signing_key"),
            token_ttl_seconds: ttl.unsigned_abs(),
            lms_keys,
            lms_keys_hashed: true,
            policy: ScopePolicy::from_name(&policy),
        }))
    }
}

#[async_trait::async_trait]
impl TenantStore for PgTenantStore {
    async fn fetch_by_host(&self, host: &str) -> Result<Option<TenantConfig>, StoreError> {
        let row = sqlx::query("SELECT tenant_id FROM tenant_hosts WHERE host = $1")
            .bind(host)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let tenant_id: String = row.get("tenant_id");
                self.load_tenant(&tenant_id).await
            }
            None => Ok(None),
        }
    }

    async fn fetch_by_id(&self, tenant_id: &str) -> Result<Option<TenantConfig>, StoreError> {
        self.load_tenant(tenant_id).await
    }

    async fn insert(&self, req: NewTenant) -> Result<TenantConfig, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO tenants (tenant_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(&req.tenant_id)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "tenant '{}' already exists",
                req.tenant_id
            )));
        }

        for host in &req.hosts {
            let inserted = sqlx::query(
                "INSERT INTO tenant_hosts (tenant_id, host) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(&req.tenant_id)
            .bind(host)
            .execute(&mut *tx)
            .await?;
            if inserted.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "host '{host}' already routes to another tenant"
                )));
            }
        }

        sqlx::query(
            "INSERT INTO tenant_upstreams (tenant_id, endpoint, username, password)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&req.tenant_id)
        .bind(&req.upstream_endpoint)
        .bind(&req.upstream_username)
        .bind(&req.upstream_password)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO tenant_auth (tenant_id, signing_key, token_ttl_seconds, policy)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&req.tenant_id)
        .bind(&req.signing_key)
        .bind(i64::try_from(req.token_ttl_seconds).unwrap_or(i64::MAX))
        .bind(req.policy.as_str())
        .execute(&mut *tx)
        .await?;

        let hashed: Vec<String> = req.lms_keys.iter().map(|k| hash_lms_key(k)).collect();
        for key_hash in &hashed {
            sqlx::query("INSERT INTO tenant_lms_keys (tenant_id, key_hash) VALUES ($1, $2)")
                .bind(&req.tenant_id)
                .bind(key_hash)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(TenantConfig {
            tenant_id: req.tenant_id,
            hosts: req.hosts,
            upstream_endpoint: req.upstream_endpoint,
            upstream_username: req.upstream_username,
            upstream_password: req.upstream_password,
            signing_key: req.signing_key,
            token_ttl_seconds: req.token_ttl_seconds,
            lms_keys: hashed,
            lms_keys_hashed: true,
            policy: req.policy,
        })
    }

    async fn list(&self) -> Result<Vec<TenantSummary>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT t.tenant_id, u.endpoint, a.token_ttl_seconds, a.policy
            FROM tenants t
            JOIN tenant_upstreams u ON u.tenant_id = t.tenant_id
            JOIN tenant_auth a ON a.tenant_id = t.tenant_id
            ORDER BY t.tenant_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let tenant_id: String = row.get("tenant_id");
            let hosts: Vec<String> =
                sqlx::query("SELECT host FROM tenant_hosts WHERE tenant_id = $1 ORDER BY host")
                    .bind(&tenant_id)
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(|r| r.get("host"))
                    .collect();
            let ttl: i64 = row.get("token_ttl_seconds");
            let policy: String = row.get("policy");
            summaries.push(TenantSummary {
                tenant_id,
                hosts,
                upstream_endpoint: row.get("endpoint"),
                token_ttl_seconds: ttl.unsigned_abs(),
                policy: ScopePolicy::from_name(&policy),
            });
        }
        Ok(summaries)
    }

    async fn delete(&self, tenant_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tenant_lms_keys WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tenant_auth WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tenant_upstreams WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tenant_hosts WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn record_audit(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let actor = event
            .actor
            .as_ref()
            .and_then(|a| serde_json::to_string(a).ok());
        let permissions = event
            .permissions
            .as_ref()
            .and_then(|p| serde_json::to_string(p).ok());

        sqlx::query(
            r"
            INSERT INTO audit_log
                (operation, tenant_id, actor, registration, activity_id,
                 permissions, success, error, ip, user_agent, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(event.operation)
        .bind(&event.tenant_id)
        .bind(actor)
        .bind(&event.registration)
        .bind(&event.activity_id)
        .bind(permissions)
        .bind(event.success)
        .bind(&event.error)
        .bind(event.client_ip.map(|ip| ip.to_string()))
        .bind(&event.user_agent)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
