//! Tenant model and registry capabilities.
//!
//! A tenant is the isolation unit of the proxy: its own hostnames, signing
//! key, upstream LRS credentials, and accepted LMS keys. Deployments come in
//! two shapes:
//!
//! - **Single-tenant**: one [`TenantConfig`] from the YAML config, answering
//!   for every hostname ([`StaticRegistry`]).
//! - **Multi-tenant**: tenants live in an external store and are resolved by
//!   hostname on demand with an in-memory cache ([`DynamicRegistry`]).
//!
//! Admin operations (create/list/delete) exist only on the store-backed
//! registry; they are exposed through the optional [`TenantAdmin`]
//! capability rather than downcasting.

pub mod dynamic;
pub mod static_registry;
pub mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub use dynamic::DynamicRegistry;
pub use static_registry::StaticRegistry;
pub use store::{NewTenant, PgTenantStore, StoreError, TenantStore};

/// Wildcard entry matching every hostname (single-tenant deployments).
pub const WILDCARD_HOST: &str = "*";

/// Behavior when the evaluator meets a scope it has no branch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopePolicy {
    /// Deny on unknown scopes.
    #[default]
    Strict,
    /// Admit on unknown scopes.
    Permissive,
}

impl ScopePolicy {
    /// Parse from the stored string form. Unrecognized values fall back to
    /// strict, the fail-closed default.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "permissive" => Self::Permissive,
            _ => Self::Strict,
        }
    }

    /// Stored string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Permissive => "permissive",
        }
    }
}

/// A tenant and its runtime policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Opaque unique identifier.
    pub tenant_id: String,
    /// Hostnames routing to this tenant, or the `*` wildcard.
    pub hosts: Vec<String>,
    /// Absolute base URL of the LRS.
    pub upstream_endpoint: String,
    /// HTTP Basic username toward the LRS.
    pub upstream_username: String,
    /// HTTP Basic password toward the LRS.
    pub upstream_password: String,
    /// Symmetric token signing key. Never mutated after load; rotation is a
    /// tenant update plus cache invalidation.
    pub signing_key: String,
    /// Token lifetime in seconds.
    pub token_ttl_seconds: u64,
    /// Accepted LMS bearer credentials. Raw in single-tenant config, SHA-256
    /// hex digests when loaded from the store.
    pub lms_keys: Vec<String>,
    /// Whether `lms_keys` holds digests rather than raw credentials.
    #[serde(default)]
    pub lms_keys_hashed: bool,
    /// Unknown-scope behavior.
    #[serde(default)]
    pub policy: ScopePolicy,
}

impl TenantConfig {
    /// Whether `host` routes to this tenant.
    #[must_use]
    pub fn matches_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == WILDCARD_HOST || h == host)
    }

    /// Constant-time check of a presented LMS credential against the
    /// accepted set. In hashed mode the presented credential is digested
    /// first so the stored form is never reconstructed.
    #[must_use]
    pub fn accepts_lms_key(&self, presented: &str) -> bool {
        let candidate = if self.lms_keys_hashed {
            hash_lms_key(presented)
        } else {
            presented.to_string()
        };

        let mut matched = subtle::Choice::from(0);
        for key in &self.lms_keys {
            matched |= key.as_bytes().ct_eq(candidate.as_bytes());
        }
        matched.into()
    }
}

/// SHA-256 hex digest of an LMS credential, the stored form in the
/// multi-tenant registry.
#[must_use]
pub fn hash_lms_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Registry failures, translated to HTTP at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No tenant matches the lookup key → 404.
    #[error("tenant not found")]
    NotFound,
    /// Backend I/O failure → 5xx.
    #[error("tenant store error: {0}")]
    Store(String),
}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

/// Secret-free tenant view returned by admin list/create operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSummary {
    /// Opaque unique identifier.
    pub tenant_id: String,
    /// Hostnames routing to this tenant.
    pub hosts: Vec<String>,
    /// LRS base URL.
    pub upstream_endpoint: String,
    /// Token lifetime in seconds.
    pub token_ttl_seconds: u64,
    /// Unknown-scope behavior.
    pub policy: ScopePolicy,
}

impl From<&TenantConfig> for TenantSummary {
    fn from(t: &TenantConfig) -> Self {
        Self {
            tenant_id: t.tenant_id.clone(),
            hosts: t.hosts.clone(),
            upstream_endpoint: t.upstream_endpoint.clone(),
            token_ttl_seconds: t.token_ttl_seconds,
            policy: t.policy,
        }
    }
}

/// Hostname and id resolution, implemented by both deployment shapes.
#[async_trait::async_trait]
pub trait TenantRegistry: Send + Sync + 'static {
    /// Resolve the tenant answering for `host`.
    async fn resolve_by_host(&self, host: &str) -> Result<Arc<TenantConfig>, RegistryError>;

    /// Resolve a tenant by its id.
    async fn resolve_by_id(&self, tenant_id: &str) -> Result<Arc<TenantConfig>, RegistryError>;

    /// The admin capability, when this registry supports mutation.
    fn admin(&self) -> Option<&dyn TenantAdmin> {
        None
    }
}

/// Optional mutation capability of store-backed registries.
#[async_trait::async_trait]
pub trait TenantAdmin: Send + Sync {
    /// Create a tenant. LMS keys are hashed before storage.
    async fn create(&self, req: NewTenant) -> Result<TenantSummary, RegistryError>;

    /// List all tenants (secret-free view).
    async fn list(&self) -> Result<Vec<TenantSummary>, RegistryError>;

    /// Delete a tenant. Returns `false` when the id does not exist.
    async fn delete(&self, tenant_id: &str) -> Result<bool, RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(hashed: bool, keys: Vec<String>) -> TenantConfig {
        TenantConfig {
            tenant_id: "acme".into(),
            hosts: vec!["acme.example".into(), "acme-alt.example".into()],
            upstream_endpoint: "https://lrs.example/xapi".into(),
            upstream_username: "proxy".into(),
            upstream_password: "secret".into(),
            signing_key: "0123456789abcdef0123456789abcdef".into(),
            token_ttl_seconds: 3600,
            lms_keys: keys,
            lms_keys_hashed: hashed,
            policy: ScopePolicy::Strict,
        }
    }

    #[test]
    fn host_matching_is_exact_or_wildcard() {
        let t = tenant(false, vec![]);
        assert!(t.matches_host("acme.example"));
        assert!(t.matches_host("acme-alt.example"));
        assert!(!t.matches_host("other.example"));

        let mut wild = tenant(false, vec![]);
        wild.hosts = vec![WILDCARD_HOST.to_string()];
        assert!(wild.matches_host("anything.example"));
    }

    #[test]
    fn raw_lms_keys_compare_directly() {
        let t = tenant(false, vec!["key-one".into(), "key-two".into()]);
        assert!(t.accepts_lms_key("key-one"));
        assert!(t.accepts_lms_key("key-two"));
        assert!(!t.accepts_lms_key("key-three"));
        assert!(!t.accepts_lms_key(""));
    }

    #[test]
    fn hashed_lms_keys_compare_against_digest() {
        // GIVEN: the store holds only the digest
        let t = tenant(true, vec![hash_lms_key("launch-credential")]);

        // THEN: the raw credential is accepted, the digest itself is not
        assert!(t.accepts_lms_key("launch-credential"));
        assert!(!t.accepts_lms_key(&hash_lms_key("launch-credential")));
    }

    #[test]
    fn scope_policy_parses_with_strict_fallback() {
        assert_eq!(ScopePolicy::from_name("permissive"), ScopePolicy::Permissive);
        assert_eq!(ScopePolicy::from_name("strict"), ScopePolicy::Strict);
        assert_eq!(ScopePolicy::from_name("garbage"), ScopePolicy::Strict);
    }

    #[test]
    fn summary_carries_no_secrets() {
        let summary = TenantSummary::from(&tenant(false, vec!["k".into()]));
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("signing_key"));
        assert!(!json.contains("secret"));
        assert!(!json.contains("lms"));
    }
}
