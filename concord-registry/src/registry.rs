//! Plain registry
//!
//! Parametric get/put/remove/update over a serialized value type. Every call
//! maps to one backing-store round trip; there is no local state.

use crate::keyspace::{KeyFn, Keyspace};
use concord_core::{keys, Codec, JsonCodec, RegistryResult};
use concord_store::Store;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Registry over `atlas:<namespace>:<entity-key>`.
pub struct Registry<K, V> {
    keyspace: Keyspace<V>,
    key_fn: KeyFn<K>,
}

impl<K, V> Clone for Registry<K, V> {
    fn clone(&self) -> Self {
        Self {
            keyspace: self.keyspace.clone(),
            key_fn: Arc::clone(&self.key_fn),
        }
    }
}

impl<K, V> Registry<K, V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Registry using the default JSON encoding.
    pub fn new(store: Arc<dyn Store>, namespace: impl Into<String>, key_fn: KeyFn<K>) -> Self {
        Self::with_codec(store, namespace, key_fn, Arc::new(JsonCodec::new()))
    }
}

impl<K, V> Registry<K, V>
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

    /// Backing key for `key`.
    pub fn full_key(&self, key: &K) -> String {
        keys::namespaced_key(self.keyspace.namespace(), &[(self.key_fn)(key).as_str()])
    }

    pub(crate) fn keyspace(&self) -> &Keyspace<V> {
        &self.keyspace
    }

    /// Exactly one backing read. `NotFound` when absent.
    pub async fn get(&self, key: &K) -> RegistryResult<V> {
        self.keyspace.get(&self.full_key(key)).await
    }

    /// Unconditional overwrite, no expiry.
    pub async fn put(&self, key: &K, value: &V) -> RegistryResult<()> {
        self.keyspace.put(&self.full_key(key), value, None).await
    }

    /// Unconditional delete; an absent key is not an error.
    pub async fn remove(&self, key: &K) -> RegistryResult<()> {
        self.keyspace.remove(&self.full_key(key)).await
    }

    /// Optimistic read-modify-write. Fails with `NotFound` when absent and
    /// `Conflict` when another writer got in between. Never retries.
    pub async fn update<F>(&self, key: &K, f: F) -> RegistryResult<V>
    where
        F: FnOnce(V) -> V + Send,
    {
        self.keyspace.update(&self.full_key(key), f).await
    }

    pub async fn exists(&self, key: &K) -> RegistryResult<bool> {
        self.keyspace.exists(&self.full_key(key)).await
    }
}
