//! TTL registry
//!
//! A [`TenantRegistry`] plus a per-tenant sorted set at
//! `atlas:<namespace>:<fingerprint>:_expiry`. Members are full value keys and
//! scores are expiry instants in epoch milliseconds.
//!
//! # Design
//!
//! - Value keys carry no native expiry. The sorted set is the source of truth
//!   so that a pop can read each value right before deleting it.
//! - `pop_expired` is read-then-remove in two pipelines. It is not atomic
//!   across instances: two concurrent pops may return the same entry.
//! - Members whose value key is already gone are dropped from the set without
//!   contributing a value. Members whose value fails to decode are left in
//!   place.
//!
//! # Example
//!
//! ```ignore
//! let registry = TenantRegistry::new(store, "buffs", display_key());
//! let buffs = TtlRegistry::new(registry, Duration::from_secs(5));
//!
//! buffs.put(&tenant, &character_id, &buff).await?;
//! for expired in buffs.pop_expired(&tenant).await? {
//!     cancel(expired);
//! }
//! ```

use crate::tenant::TenantRegistry;
use concord_core::clock::system_clock;
use concord_core::{keys, Clock, RegistryError, RegistryResult, Tenant};
use concord_store::{Command, Pipeline, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Tenant registry whose entries expire through an explicit pop.
pub struct TtlRegistry<K, V> {
    registry: TenantRegistry<K, V>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> Clone for TtlRegistry<K, V> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            default_ttl: self.default_ttl,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<K, V> TtlRegistry<K, V>
where
    V: Send + 'static,
{
    pub fn new(registry: TenantRegistry<K, V>, default_ttl: Duration) -> Self {
        Self {
            registry,
            default_ttl,
            clock: system_clock(),
        }
    }

    /// Replace the clock used for expiry scores and pops.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        self.registry.namespace()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.registry.store()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// The wrapped tenant registry.
    pub fn registry(&self) -> &TenantRegistry<K, V> {
        &self.registry
    }

    /// Full key of the tenant's expiry set.
    pub fn expiry_key(&self, tenant: &Tenant) -> String {
        self.registry.raw_key(tenant, keys::EXPIRY_KEY)
    }

    pub async fn get(&self, tenant: &Tenant, key: &K) -> RegistryResult<V> {
        self.registry.get(tenant, key).await
    }

    pub async fn exists(&self, tenant: &Tenant, key: &K) -> RegistryResult<bool> {
        self.registry.exists(tenant, key).await
    }

    pub async fn get_all_values(&self, tenant: &Tenant) -> RegistryResult<Vec<V>> {
        self.registry.get_all_values(tenant).await
    }

    /// Put with the default TTL.
    pub async fn put(&self, tenant: &Tenant, key: &K, value: &V) -> RegistryResult<()> {
        self.put_with_ttl(tenant, key, value, self.default_ttl).await
    }

    /// Write the value and record its expiry in one pipeline.
    pub async fn put_with_ttl(&self, tenant: &Tenant, key: &K, value: &V, ttl: Duration) -> RegistryResult<()> {
        let bytes = self.registry.keyspace().encode(value)?;
        let full_key = self.registry.full_key(tenant, key);
        let expire_at = self.clock.now_millis().saturating_add(ttl.as_millis() as i64);

        let mut pipe = Pipeline::with_capacity(2);
        pipe.set(full_key.as_str(), bytes)
            .zadd(self.expiry_key(tenant), expire_at as f64, full_key);

        self.store()
            .execute(pipe)
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::transport("put", e))
    }

    /// Delete the value and its expiry record in one pipeline.
    pub async fn remove(&self, tenant: &Tenant, key: &K) -> RegistryResult<()> {
        let full_key = self.registry.full_key(tenant, key);

        let mut pipe = Pipeline::with_capacity(2);
        pipe.del(full_key.as_str())
            .zrem(self.expiry_key(tenant), vec![full_key]);

        self.store()
            .execute(pipe)
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::transport("remove", e))
    }

    /// Values whose expiry is at or before now, removed from the store.
    pub async fn pop_expired(&self, tenant: &Tenant) -> RegistryResult<Vec<V>> {
        Ok(self
            .pop_expired_entries(tenant)
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Same as [`pop_expired`](Self::pop_expired), keyed by full value key.
    pub async fn pop_expired_with_keys(&self, tenant: &Tenant) -> RegistryResult<HashMap<String, V>> {
        Ok(self.pop_expired_entries(tenant).await?.into_iter().collect())
    }

    /// Expired `(full key, value)` pairs in expiry order.
    async fn pop_expired_entries(&self, tenant: &Tenant) -> RegistryResult<Vec<(String, V)>> {
        let expiry_key = self.expiry_key(tenant);
        let now = self.clock.now_millis() as f64;

        let members = self
            .store()
            .zrange_by_score(&expiry_key, now)
            .await
            .map_err(|e| RegistryError::transport("pop expired", e))?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = Pipeline::with_capacity(members.len());
        for member in &members {
            pipe.get(member.as_str());
        }
        let replies = self
            .store()
            .execute(pipe)
            .await
            .map_err(|e| RegistryError::transport("pop expired", e))?;

        let keyspace = self.registry.keyspace();
        let mut popped = Vec::with_capacity(members.len());
        let mut processed = Vec::with_capacity(members.len());
        for (member, reply) in members.into_iter().zip(replies) {
            match reply.into_optional_bytes("GET") {
                Ok(None) => processed.push(member),
                Ok(Some(bytes)) => match keyspace.decode(&member, &bytes) {
                    Ok(value) => {
                        processed.push(member.clone());
                        popped.push((member, value));
                    }
                    Err(e) => {
                        tracing::warn!(key = %member, error = %e, "Leaving undecodable expired entry");
                    }
                },
                Err(e) => {
                    tracing::warn!(key = %member, error = %e, "Leaving expired entry with unexpected reply");
                }
            }
        }

        if !processed.is_empty() {
            let mut cleanup = Pipeline::with_capacity(2);
            cleanup
                .zrem(expiry_key.as_str(), processed.clone())
                .push(Command::Del { keys: processed });
            if let Err(e) = self.store().execute(cleanup).await {
                tracing::warn!(
                    namespace = %self.namespace(),
                    tenant = %tenant,
                    error = %e,
                    "Failed to remove popped entries"
                );
            }
        }

        tracing::debug!(
            namespace = %self.namespace(),
            tenant = %tenant,
            popped = popped.len(),
            "Popped expired entries"
        );
        Ok(popped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::display_key;
    use chrono::{TimeZone, Utc};
    use concord_core::ManualClock;
    use concord_store::InMemoryStore;
    use uuid::Uuid;

    fn tenant(n: u128) -> Tenant {
        Tenant::new(Uuid::from_u128(n), "GMS", 83, 1)
    }

    fn fixture() -> (InMemoryStore, ManualClock, TtlRegistry<u32, String>) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
        let registry = TenantRegistry::new(Arc::new(store.clone()), "expressions", display_key());
        let ttl = TtlRegistry::new(registry, Duration::from_secs(5)).with_clock(Arc::new(clock.clone()));
        (store, clock, ttl)
    }

    #[tokio::test]
    async fn test_pop_expired_returns_each_value_once() {
        let (store, clock, ttl) = fixture();
        let t = tenant(1);

        ttl.put(&t, &1, &"smile".to_string()).await.unwrap();
        assert!(ttl.pop_expired(&t).await.unwrap().is_empty());

        clock.advance(chrono::Duration::seconds(6));
        assert_eq!(ttl.pop_expired(&t).await.unwrap(), vec!["smile"]);
        assert!(ttl.pop_expired(&t).await.unwrap().is_empty());

        let value_key = ttl.registry().full_key(&t, &1);
        assert!(!store.raw_exists(&value_key));
        assert_eq!(store.raw_zscore(&ttl.expiry_key(&t), &value_key), None);
    }

    #[tokio::test]
    async fn test_put_records_expiry_without_native_ttl() {
        let (store, clock, ttl) = fixture();
        let t = tenant(1);

        ttl.put(&t, &7, &"wink".to_string()).await.unwrap();
        let value_key = ttl.registry().full_key(&t, &7);

        assert_eq!(store.raw_ttl(&value_key), None);
        let score = store.raw_zscore(&ttl.expiry_key(&t), &value_key).unwrap();
        assert_eq!(score as i64, clock.now_millis() + 5_000);
    }

    #[tokio::test]
    async fn test_put_with_ttl_overrides_default() {
        let (_store, clock, ttl) = fixture();
        let t = tenant(1);

        ttl.put_with_ttl(&t, &1, &"short".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        ttl.put(&t, &2, &"default".to_string()).await.unwrap();

        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(ttl.pop_expired(&t).await.unwrap(), vec!["short"]);
        assert_eq!(ttl.get(&t, &2).await.unwrap(), "default");
    }

    #[tokio::test]
    async fn test_expiry_exactly_now_is_popped() {
        let (_store, clock, ttl) = fixture();
        let t = tenant(1);

        ttl.put(&t, &1, &"edge".to_string()).await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(ttl.pop_expired(&t).await.unwrap(), vec!["edge"]);
    }

    #[tokio::test]
    async fn test_missing_value_key_is_cleaned_without_result() {
        let (store, clock, ttl) = fixture();
        let t = tenant(1);

        ttl.put(&t, &1, &"gone".to_string()).await.unwrap();
        ttl.put(&t, &2, &"kept".to_string()).await.unwrap();
        let gone_key = ttl.registry().full_key(&t, &1);
        store.raw_del(&gone_key);

        clock.advance(chrono::Duration::seconds(10));
        let popped = ttl.pop_expired_with_keys(&t).await.unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[&ttl.registry().full_key(&t, &2)], "kept");
        assert_eq!(store.raw_zscore(&ttl.expiry_key(&t), &gone_key), None);
    }

    #[tokio::test]
    async fn test_undecodable_value_stays_tracked() {
        let (store, clock, ttl) = fixture();
        let t = tenant(1);

        ttl.put(&t, &1, &"fine".to_string()).await.unwrap();
        let key = ttl.registry().full_key(&t, &1);
        store.raw_set(&key, b"{not json".to_vec());

        clock.advance(chrono::Duration::seconds(10));
        assert!(ttl.pop_expired(&t).await.unwrap().is_empty());
        assert!(store.raw_exists(&key));
        assert!(store.raw_zscore(&ttl.expiry_key(&t), &key).is_some());
    }

    #[tokio::test]
    async fn test_remove_clears_value_and_expiry() {
        let (store, clock, ttl) = fixture();
        let t = tenant(1);

        ttl.put(&t, &3, &"frown".to_string()).await.unwrap();
        ttl.remove(&t, &3).await.unwrap();

        let key = ttl.registry().full_key(&t, &3);
        assert!(!store.raw_exists(&key));
        assert_eq!(store.raw_zscore(&ttl.expiry_key(&t), &key), None);

        clock.advance(chrono::Duration::seconds(10));
        assert!(ttl.pop_expired(&t).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tenants_have_separate_expiry_sets() {
        let (_store, clock, ttl) = fixture();
        let (a, b) = (tenant(1), tenant(2));

        ttl.put(&a, &1, &"a".to_string()).await.unwrap();
        ttl.put(&b, &1, &"b".to_string()).await.unwrap();
        clock.advance(chrono::Duration::seconds(6));

        assert_eq!(ttl.pop_expired(&a).await.unwrap(), vec!["a"]);
        assert_eq!(ttl.get(&b, &1).await.unwrap(), "b");
        assert_eq!(ttl.get_all_values(&b).await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_pop_surfaces_transport_error() {
        let (store, _clock, ttl) = fixture();
        store.fail_next(1);
        let err = ttl.pop_expired(&tenant(1)).await.unwrap_err();
        assert!(err.to_string().starts_with("pop expired: "));
    }
}
