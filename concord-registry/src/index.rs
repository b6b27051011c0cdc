//! Secondary indexes
//!
//! A set per `(tenant, key)` at
//! `atlas:<namespace>:<fingerprint>:_idx:<index>:<key>` holding string
//! values, typically the primary keys of the entities that share `key`.

use concord_core::{keys, RegistryError, RegistryResult, Tenant};
use concord_store::Store;
use std::sync::Arc;

/// Named string-valued index within a namespace.
#[derive(Clone)]
pub struct Index {
    store: Arc<dyn Store>,
    namespace: String,
    name: String,
}

impl Index {
    pub fn new(store: Arc<dyn Store>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_key(&self, tenant: &Tenant, key: &str) -> String {
        keys::tenant_entity_key(&self.namespace, tenant, &keys::index_entity_key(&self.name, key))
    }

    pub async fn add(&self, tenant: &Tenant, key: &str, value: &str) -> RegistryResult<()> {
        self.store
            .sadd(&self.set_key(tenant, key), &[value.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::transport("index add", e))
    }

    pub async fn remove(&self, tenant: &Tenant, key: &str, value: &str) -> RegistryResult<()> {
        self.store
            .srem(&self.set_key(tenant, key), &[value.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::transport("index remove", e))
    }

    /// Every value under `key`, in no particular order.
    pub async fn lookup(&self, tenant: &Tenant, key: &str) -> RegistryResult<Vec<String>> {
        self.store
            .smembers(&self.set_key(tenant, key))
            .await
            .map_err(|e| RegistryError::transport("index lookup", e))
    }

    /// Any one value under `key`. `NotFound` when empty.
    ///
    /// This reads with SRANDMEMBER and does not pop: the member stays in the
    /// set, so repeated lookups keep resolving until `remove` is called.
    pub async fn lookup_one(&self, tenant: &Tenant, key: &str) -> RegistryResult<String> {
        self.store
            .srandmember(&self.set_key(tenant, key))
            .await
            .map_err(|e| RegistryError::transport("index lookup", e))?
            .ok_or(RegistryError::NotFound)
    }

    pub async fn remove_all(&self, tenant: &Tenant, key: &str) -> RegistryResult<()> {
        self.store
            .del(&[self.set_key(tenant, key)])
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::transport("index remove all", e))
    }
}

/// [`Index`] whose values are decimal `u32`s.
#[derive(Clone)]
pub struct Uint32Index {
    inner: Index,
}

impl Uint32Index {
    pub fn new(store: Arc<dyn Store>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            inner: Index::new(store, namespace, name),
        }
    }

    pub fn index(&self) -> &Index {
        &self.inner
    }

    pub async fn add(&self, tenant: &Tenant, key: &str, value: u32) -> RegistryResult<()> {
        self.inner.add(tenant, key, &value.to_string()).await
    }

    pub async fn remove(&self, tenant: &Tenant, key: &str, value: u32) -> RegistryResult<()> {
        self.inner.remove(tenant, key, &value.to_string()).await
    }

    /// Members that fail to parse are skipped.
    pub async fn lookup(&self, tenant: &Tenant, key: &str) -> RegistryResult<Vec<u32>> {
        Ok(self
            .inner
            .lookup(tenant, key)
            .await?
            .iter()
            .filter_map(|member| member.parse().ok())
            .collect())
    }

    pub async fn lookup_one(&self, tenant: &Tenant, key: &str) -> RegistryResult<u32> {
        let member = self.inner.lookup_one(tenant, key).await?;
        member.parse().map_err(|e: std::num::ParseIntError| RegistryError::Decode {
            key: self.inner.set_key(tenant, key),
            reason: format!("index member {member:?}: {e}"),
        })
    }

    pub async fn remove_all(&self, tenant: &Tenant, key: &str) -> RegistryResult<()> {
        self.inner.remove_all(tenant, key).await
    }
}
