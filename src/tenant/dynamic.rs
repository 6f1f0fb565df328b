//! Store-backed registry with a host → tenant memoization.
//!
//! Lookups hit the cache first and fall through to the [`TenantStore`] on a
//! miss; a resolved tenant is cached under every one of its hostnames.
//! Create/delete invalidates every cache entry referencing the affected
//! tenant, so concurrent readers see either the pre- or post-mutation
//! snapshot, never a torn one.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::{
    NewTenant, RegistryError, TenantAdmin, TenantConfig, TenantRegistry, TenantStore,
    TenantSummary,
};

/// Registry over an external tenant store.
pub struct DynamicRegistry {
    store: Arc<dyn TenantStore>,
    /// host → resolved tenant
    cache: DashMap<String, Arc<TenantConfig>>,
}

impl DynamicRegistry {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Cache a tenant under all of its hostnames.
    fn memoize(&self, tenant: &Arc<TenantConfig>) {
        for host in &tenant.hosts {
            self.cache.insert(host.clone(), Arc::clone(tenant));
        }
    }

    /// Drop every cache entry referencing `tenant_id`.
    fn invalidate(&self, tenant_id: &str) {
        self.cache.retain(|_, v| v.tenant_id != tenant_id);
        debug!(tenant_id = %tenant_id, "Invalidated tenant cache entries");
    }

    /// Number of cached host entries (test observability).
    #[must_use]
    pub fn cached_hosts(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait::async_trait]
impl TenantRegistry for DynamicRegistry {
    async fn resolve_by_host(&self, host: &str) -> Result<Arc<TenantConfig>, RegistryError> {
        if let Some(cached) = self.cache.get(host) {
            return Ok(Arc::clone(&cached));
        }

        let tenant = self
            .store
            .fetch_by_host(host)
            .await?
            .ok_or(RegistryError::NotFound)?;

        let tenant = Arc::new(tenant);
        self.memoize(&tenant);
        Ok(tenant)
    }

    async fn resolve_by_id(&self, tenant_id: &str) -> Result<Arc<TenantConfig>, RegistryError> {
        let tenant = self
            .store
            .fetch_by_id(tenant_id)
            .await?
            .ok_or(RegistryError::NotFound)?;

        let tenant = Arc::new(tenant);
        self.memoize(&tenant);
        Ok(tenant)
    }

    fn admin(&self) -> Option<&dyn TenantAdmin> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl TenantAdmin for DynamicRegistry {
    async fn create(&self, req: NewTenant) -> Result<TenantSummary, RegistryError> {
        let tenant_id = req.tenant_id.clone();
        let created = self.store.insert(req).await?;
        // A re-create after delete must not serve the stale config
        self.invalidate(&tenant_id);
        Ok(TenantSummary::from(&created))
    }

    async fn list(&self) -> Result<Vec<TenantSummary>, RegistryError> {
        Ok(self.store.list().await?)
    }

    async fn delete(&self, tenant_id: &str) -> Result<bool, RegistryError> {
        let deleted = self.store.delete(tenant_id).await?;
        if deleted {
            self.invalidate(tenant_id);
        }
        Ok(deleted)
    }
}
