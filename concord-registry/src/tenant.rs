//! Tenant-scoped registry
//!
//! Same contract as [`Registry`](crate::Registry) with an explicit tenant on
//! every call. Keys live under `atlas:<namespace>:<fingerprint>:`, so two
//! tenants never see each other's entries even with identical entity keys.
//!
//! Listing is a cursor SCAN over the tenant pattern followed by one pipelined
//! batch of GETs. Reserved `_` entity keys are skipped.

use crate::keyspace::{KeyFn, Keyspace};
use concord_core::constants::DEFAULT_SCAN_COUNT;
use concord_core::{keys, Codec, JsonCodec, RegistryError, RegistryResult, Tenant};
use concord_store::Store;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Registry over `atlas:<namespace>:<fingerprint>:<entity-key>`.
pub struct TenantRegistry<K, V> {
    keyspace: Keyspace<V>,
    key_fn: KeyFn<K>,
}

impl<K, V> Clone for TenantRegistry<K, V> {
    fn clone(&self) -> Self {
        Self {
            keyspace: self.keyspace.clone(),
            key_fn: Arc::clone(&self.key_fn),
        }
    }
}

impl<K, V> TenantRegistry<K, V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn Store>, namespace: impl Into<String>, key_fn: KeyFn<K>) -> Self {
        Self::with_codec(store, namespace, key_fn, Arc::new(JsonCodec::new()))
    }
}

impl<K, V> TenantRegistry<K, V>
where
    V: Send + 'static,
{
    pub fn with_codec(
        store: Arc<dyn Store>,
        namespace: impl Into<String>,
        key_fn: KeyFn<K>,
        codec: Arc<dyn Codec<V>>,
    ) -> Self {
        Self {
            keyspace: Keyspace::new(store, namespace, codec),
            key_fn,
        }
    }

    pub fn namespace(&self) -> &str {
        self.keyspace.namespace()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.keyspace.store()
    }

    /// Entity-key string for `key`, without prefix or tenant.
    pub fn entity_key(&self, key: &K) -> String {
        (self.key_fn)(key)
    }

    /// Backing key for `key` under `tenant`.
    pub fn full_key(&self, tenant: &Tenant, key: &K) -> String {
        keys::tenant_entity_key(self.keyspace.namespace(), tenant, &(self.key_fn)(key))
    }

    /// Backing key for a reserved or raw entity-key suffix under `tenant`.
    pub fn raw_key(&self, tenant: &Tenant, entity_key: &str) -> String {
        keys::tenant_entity_key(self.keyspace.namespace(), tenant, entity_key)
    }

    pub(crate) fn keyspace(&self) -> &Keyspace<V> {
        &self.keyspace
    }

    pub async fn get(&self, tenant: &Tenant, key: &K) -> RegistryResult<V> {
        self.keyspace.get(&self.full_key(tenant, key)).await
    }

    pub async fn put(&self, tenant: &Tenant, key: &K, value: &V) -> RegistryResult<()> {
        self.keyspace.put(&self.full_key(tenant, key), value, None).await
    }

    /// Put with native backing-store expiry. Not tracked in any expiry set.
    pub async fn put_with_ttl(
        &self,
        tenant: &Tenant,
        key: &K,
        value: &V,
        ttl: Duration,
    ) -> RegistryResult<()> {
        self.keyspace
            .put(&self.full_key(tenant, key), value, Some(ttl))
            .await
    }

    pub async fn remove(&self, tenant: &Tenant, key: &K) -> RegistryResult<()> {
        self.keyspace.remove(&self.full_key(tenant, key)).await
    }

    pub async fn update<F>(&self, tenant: &Tenant, key: &K, f: F) -> RegistryResult<V>
    where
        F: FnOnce(V) -> V + Send,
    {
        self.keyspace.update(&self.full_key(tenant, key), f).await
    }

    pub async fn exists(&self, tenant: &Tenant, key: &K) -> RegistryResult<bool> {
        self.keyspace.exists(&self.full_key(tenant, key)).await
    }

    /// Full backing keys of the tenant's non-reserved entries.
    pub(crate) async fn scan_keys(&self, tenant: &Tenant) -> RegistryResult<Vec<String>> {
        let namespace = self.keyspace.namespace();
        let pattern = keys::tenant_scan_pattern(namespace, tenant);
        let found = self
            .keyspace
            .store()
            .scan_all(&pattern, DEFAULT_SCAN_COUNT)
            .await
            .map_err(|e| RegistryError::transport("scan", e))?;

        Ok(found
            .into_iter()
            .filter(|full| {
                keys::entity_suffix(full, namespace, tenant)
                    .map(|suffix| !keys::is_reserved(suffix))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Entity-key suffixes of every non-reserved entry under `tenant`.
    pub async fn get_all_keys(&self, tenant: &Tenant) -> RegistryResult<Vec<String>> {
        let namespace = self.keyspace.namespace();
        Ok(self
            .scan_keys(tenant)
            .await?
            .iter()
            .filter_map(|full| keys::entity_suffix(full, namespace, tenant).map(str::to_string))
            .collect())
    }

    /// Every decodable value under `tenant`. Undecodable entries are skipped.
    pub async fn get_all_values(&self, tenant: &Tenant) -> RegistryResult<Vec<V>> {
        let full_keys = self.scan_keys(tenant).await?;
        Ok(self
            .keyspace
            .fetch_many("get all values", &full_keys)
            .await?
            .into_iter()
            .flatten()
            .collect())
    }
}
