use super::state::CoalescedCore;
use super::pump::Pump;
use super::stats::CoalescedStats;
use crate::registry::Registry;
use concord_core::{CoalescingConfig, ConfigError, RegistryResult};
use concord_store::Store;
use std::sync::Arc;

/// Coalescing wrapper over a [`Registry`].
///
/// `put` and `remove` only touch local state; the pump drains them every
/// flush interval and re-reads cached keys every refresh interval.
pub struct CoalescedRegistry<K, V> {
    registry: Registry<K, V>,
    core: Arc<CoalescedCore<V>>,
    pump: Pump,
}

impl<K, V> CoalescedRegistry<K, V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Wrap `registry` and start the pump on the current tokio runtime.
    /// Zero intervals and a missing runtime are `ConfigError`s.
    pub fn new(registry: Registry<K, V>, config: CoalescingConfig) -> Result<Self, ConfigError> {
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

    /// The wrapped registry, for callers that need uncached access.
    pub fn registry(&self) -> &Registry<K, V> {
        &self.registry
    }

    /// Buffered value, else cached value, else one backing read.
    pub async fn get(&self, key: &K) -> RegistryResult<V> {
        self.core.get(&self.registry.full_key(key)).await
    }

    /// Stage a write. Never touches the backing store.
    pub fn put(&self, key: &K, value: V) {
        self.core.stage_put(self.registry.full_key(key), value);
    }

    /// Stage a tombstone. Never touches the backing store.
    pub fn remove(&self, key: &K) {
        self.core.stage_remove(self.registry.full_key(key));
    }

    pub async fn direct_get(&self, key: &K) -> RegistryResult<V> {
        self.core.direct_get(&self.registry.full_key(key)).await
    }

    pub async fn direct_put(&self, key: &K, value: V) -> RegistryResult<()> {
        self.core.direct_put(&self.registry.full_key(key), value).await
    }

    pub async fn direct_update<F>(&self, key: &K, f: F) -> RegistryResult<V>
    where
        F: FnOnce(V) -> V + Send,
    {
        self.core.direct_update(&self.registry.full_key(key), f).await
    }

    pub async fn exists(&self, key: &K) -> RegistryResult<bool> {
        self.core.exists(&self.registry.full_key(key)).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::string_key;
    use concord_core::RegistryError;
    use concord_store::InMemoryStore;
    use std::time::Duration;

    fn idle() -> CoalescingConfig {
        CoalescingConfig::default()
            .with_flush_interval(Duration::from_secs(3600))
            .with_refresh_interval(Duration::from_secs(3600))
    }

    fn coalesced(store: &InMemoryStore) -> CoalescedRegistry<String, String> {
        let registry = Registry::new(Arc::new(store.clone()), "test", string_key());
        CoalescedRegistry::new(registry, idle()).unwrap()
    }

    fn k(s: &str) -> String {
        s.to_string()
    }

    #[tokio::test]
    async fn test_put_is_buffered_until_flush() {
        let store = InMemoryStore::new();
        let reg = coalesced(&store);

        reg.put(&k("k1"), k("v1"));
        assert_eq!(reg.get(&k("k1")).await.unwrap(), "v1");
        assert_eq!(store.raw_get("atlas:test:k1"), None);
        assert_eq!(reg.pending_writes(), 1);

        reg.flush().await;
        assert_eq!(store.raw_get("atlas:test:k1"), Some(b"\"v1\"".to_vec()));
        assert_eq!(reg.pending_writes(), 0);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_after_put_is_tombstone() {
        let store = InMemoryStore::new();
        let reg = coalesced(&store);
        store.raw_set("atlas:test:k", b"\"old\"".to_vec());

        reg.put(&k("k"), k("new"));
        reg.remove(&k("k"));
        assert_eq!(reg.get(&k("k")).await, Err(RegistryError::NotFound));
        assert!(!reg.exists(&k("k")).await.unwrap());

        reg.flush().await;
        assert_eq!(store.raw_get("atlas:test:k"), None);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_tombstone_hides_backing_value_in_exists() {
        let store = InMemoryStore::new();
        let reg = coalesced(&store);
        store.raw_set("atlas:test:k", b"\"still-here\"".to_vec());

        reg.remove(&k("k"));
        assert!(!reg.exists(&k("k")).await.unwrap());
        assert!(store.raw_exists("atlas:test:k"));
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_evicts_externally_deleted_keys() {
        let store = InMemoryStore::new();
        let reg = coalesced(&store);

        reg.direct_put(&k("k"), k("v")).await.unwrap();
        assert_eq!(reg.cached_len(), 1);

        store.raw_del("atlas:test:k");
        assert_eq!(reg.get(&k("k")).await.unwrap(), "v");

        reg.refresh().await;
        assert_eq!(reg.cached_len(), 0);
        assert!(reg.get(&k("k")).await.unwrap_err().is_not_found());
        assert_eq!(reg.stats().snapshot().refresh_evictions, 1);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_never_overrides_pending_write() {
        let store = InMemoryStore::new();
        let reg = coalesced(&store);

        reg.direct_put(&k("k"), k("orig")).await.unwrap();
        reg.put(&k("k"), k("pending"));
        store.raw_del("atlas:test:k");

        reg.refresh().await;
        assert_eq!(reg.get(&k("k")).await.unwrap(), "pending");
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_direct_update_not_found_evicts_cache() {
        let store = InMemoryStore::new();
        let reg = coalesced(&store);

        reg.direct_put(&k("k"), k("v")).await.unwrap();
        store.raw_del("atlas:test:k");

        let err = reg.direct_update(&k("k"), |v| v + "!").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(reg.cached_len(), 0);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_direct_update_mirrors_into_cache() {
        let store = InMemoryStore::new();
        let reg = coalesced(&store);
        store.raw_set("atlas:test:k", b"\"a\"".to_vec());

        assert_eq!(reg.direct_update(&k("k"), |v| v + "b").await.unwrap(), "ab");
        store.raw_set("atlas:test:k", b"\"external\"".to_vec());
        assert_eq!(reg.get(&k("k")).await.unwrap(), "ab");
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_flush_failure_is_swallowed_and_counted() {
        let store = InMemoryStore::new();
        let reg = coalesced(&store);

        reg.put(&k("k"), k("v"));
        store.fail_next(1);
        reg.flush().await;

        assert_eq!(reg.pending_writes(), 0);
        assert_eq!(store.raw_get("atlas:test:k"), None);
        assert_eq!(reg.stats().snapshot().errors, 1);

        reg.put(&k("k"), k("v2"));
        reg.flush().await;
        assert_eq!(store.raw_get("atlas:test:k"), Some(b"\"v2\"".to_vec()));
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_writes() {
        let store = InMemoryStore::new();
        let reg = coalesced(&store);

        reg.put(&k("a"), k("1"));
        reg.remove(&k("b"));
        store.raw_set("atlas:test:b", b"\"gone\"".to_vec());

        reg.shutdown().await;
        assert_eq!(store.raw_get("atlas:test:a"), Some(b"\"1\"".to_vec()));
        assert_eq!(store.raw_get("atlas:test:b"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_flushes_on_interval() {
        let store = InMemoryStore::new();
        let registry = Registry::new(Arc::new(store.clone()), "test", string_key());
        let config = CoalescingConfig::default()
            .with_flush_interval(Duration::from_millis(100))
            .with_refresh_interval(Duration::from_secs(3600));
        let reg: CoalescedRegistry<String, String> = CoalescedRegistry::new(registry, config).unwrap();

        reg.put(&k("k"), k("v"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.raw_get("atlas:test:k"), Some(b"\"v\"".to_vec()));
        assert!(reg.stats().snapshot().flushes >= 1);
        reg.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_refreshes_on_interval() {
        let store = InMemoryStore::new();
        let registry = Registry::new(Arc::new(store.clone()), "test", string_key());
        let config = CoalescingConfig::default()
            .with_flush_interval(Duration::from_secs(3600))
            .with_refresh_interval(Duration::from_millis(200));
        let reg: CoalescedRegistry<String, String> = CoalescedRegistry::new(registry, config).unwrap();

        reg.direct_put(&k("k"), k("original")).await.unwrap();
        store.raw_set("atlas:test:k", b"\"updated\"".to_vec());
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(reg.get(&k("k")).await.unwrap(), "updated");
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let store = InMemoryStore::new();
        let registry: Registry<String, String> =
            Registry::new(Arc::new(store), "test", string_key());
        let config = CoalescingConfig::default().with_flush_interval(Duration::ZERO);
        assert!(CoalescedRegistry::new(registry, config).is_err());
    }

    #[test]
    fn test_new_outside_runtime_is_config_error() {
        let store = InMemoryStore::new();
        let registry: Registry<String, String> =
            Registry::new(Arc::new(store), "test", string_key());

        match CoalescedRegistry::new(registry, idle()) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "runtime"),
            Err(other) => panic!("Expected runtime error, got: {other:?}"),
            Ok(_) => panic!("Expected runtime error, got a registry"),
        }
    }
}
