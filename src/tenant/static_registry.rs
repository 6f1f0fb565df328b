//! Single-tenant registry: one config from the YAML file, every hostname
//! resolves to it.

use std::sync::Arc;

use super::{RegistryError, TenantConfig, TenantRegistry};

/// Registry wrapping the single configured tenant.
pub struct StaticRegistry {
    tenant: Arc<TenantConfig>,
}

impl StaticRegistry {
    /// Wrap a tenant loaded from the config file.
    #[must_use]
    pub fn new(tenant: TenantConfig) -> Self {
        Self {
            tenant: Arc::new(tenant),
        }
    }
}

#[async_trait::async_trait]
impl TenantRegistry for StaticRegistry {
    async fn resolve_by_host(&self, _host: &str) -> Result<Arc<TenantConfig>, RegistryError> {
        Ok(Arc::clone(&self.tenant))
    }

    async fn resolve_by_id(&self, tenant_id: &str) -> Result<Arc<TenantConfig>, RegistryError> {
        if self.tenant.tenant_id == tenant_id {
            Ok(Arc::clone(&self.tenant))
        } else {
            Err(RegistryError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::ScopePolicy;

    fn registry() -> StaticRegistry {
        StaticRegistry::new(TenantConfig {
            tenant_id: "default".into(),
            hosts: vec!["*".into()],
            upstream_endpoint: "https://lrs.example/xapi".into(),
            upstream_username: "proxy".into(),
            upstream_password: "secret".into(),
            signing_key: "0123456789abcdef0123456789abcdef".into(),
            token_ttl_seconds: 3600,
            lms_keys: vec!["lms-key".into()],
            lms_keys_hashed: false,
            policy: ScopePolicy::Strict,
        })
    }

    #[tokio::test]
    async fn every_host_resolves_to_the_single_tenant() {
        let reg = registry();
        let a = reg.resolve_by_host("one.example").await.unwrap();
        let b = reg.resolve_by_host("two.example").await.unwrap();
        assert_eq!(a.tenant_id, "default");
        assert_eq!(b.tenant_id, "default");
    }

    #[tokio::test]
    async fn id_resolution_matches_only_the_configured_id() {
        let reg = registry();
        assert!(reg.resolve_by_id("default").await.is_ok());
        assert!(matches!(
            reg.resolve_by_id("other").await,
            Err(RegistryError::NotFound)
        ));
    }

    #[test]
    fn static_registry_has_no_admin_capability() {
        assert!(registry().admin().is_none());
    }
}
