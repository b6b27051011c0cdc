use super::state::CoalescedCore;
use super::pump::Pump;
use super::stats::CoalescedStats;
use crate::tenant::TenantRegistry;
use concord_core::{CoalescingConfig, ConfigError, RegistryResult, Tenant};
use concord_store::Store;
use std::sync::Arc;

/// Coalescing wrapper over a [`TenantRegistry`].
pub struct TenantCoalescedRegistry<K, V> {
    registry: TenantRegistry<K, V>,
    core: Arc<CoalescedCore<V>>,
    pump: Pump,
}

impl<K, V> TenantCoalescedRegistry<K, V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Wrap `registry` and start the pump on the current tokio runtime.
    /// Zero intervals and a missing runtime are `ConfigError`s.
    pub fn new(registry: TenantRegistry<K, V>, config: CoalescingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let core = Arc::new(CoalescedCore::new(registry.keyspace().clone()));
        let pump = Pump::spawn(Arc::clone(&core), config)?;
        Ok(Self {
            registry,
            core,
            pump,
        })
    }

    pub fn namespace(&self) -> &str {
        self.registry.namespace()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.registry.store()
    }

    pub fn registry(&self) -> &TenantRegistry<K, V> {
        &self.registry
    }

    pub async fn get(&self, tenant: &Tenant, key: &K) -> RegistryResult<V> {
        self.core.get(&self.registry.full_key(tenant, key)).await
    }

    pub fn put(&self, tenant: &Tenant, key: &K, value: V) {
        self.core.stage_put(self.registry.full_key(tenant, key), value);
    }

    pub fn remove(&self, tenant: &Tenant, key: &K) {
        self.core.stage_remove(self.registry.full_key(tenant, key));
    }

    pub async fn direct_get(&self, tenant: &Tenant, key: &K) -> RegistryResult<V> {
        self.core.direct_get(&self.registry.full_key(tenant, key)).await
    }

    pub async fn direct_put(&self, tenant: &Tenant, key: &K, value: V) -> RegistryResult<()> {
        self.core
            .direct_put(&self.registry.full_key(tenant, key), value)
            .await
    }

    pub async fn direct_update<F>(&self, tenant: &Tenant, key: &K, f: F) -> RegistryResult<V>
    where
        F: FnOnce(V) -> V + Send,
    {
        self.core
            .direct_update(&self.registry.full_key(tenant, key), f)
            .await
    }

    pub async fn exists(&self, tenant: &Tenant, key: &K) -> RegistryResult<bool> {
        self.core.exists(&self.registry.full_key(tenant, key)).await
    }

    /// Scan the tenant's keyspace and overlay pending writes: tombstoned keys
    /// are dropped and buffered values win over what the store returned.
    pub async fn get_all_values(&self, tenant: &Tenant) -> RegistryResult<Vec<V>> {
        let keys = self.registry.scan_keys(tenant).await?;
        let fetched = self
            .core
            .keyspace()
            .fetch_many("get all values", &keys)
            .await?;
        Ok(self.core.overlay(&keys, fetched))
    }

    pub async fn flush(&self) {
        self.core.flush().await;
    }

    pub async fn refresh(&self) {
        self.core.refresh().await;
    }

    /// Stop the pump, wait for it, then flush once more.
    pub async fn shutdown(&self) {
        self.pump.stop().await;
        self.core.flush().await;
    }

    pub fn stats(&self) -> &CoalescedStats {
        &self.core.stats
    }

    pub fn pending_writes(&self) -> usize {
        self.core.pending_writes()
    }

    pub fn cached_len(&self) -> usize {
        self.core.cached_len()
    }
}
