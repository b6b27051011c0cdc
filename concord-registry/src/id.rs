//! Identity counters
//!
//! Every call pipelines `SETNX <key> start-1` with `INCR <key>`, so the first
//! allocation on a fresh counter is exactly `start` and later ones follow
//! consecutively. Values are narrowed to 32 bits and never recycled.

use concord_core::{keys, IdConfig, RegistryError, RegistryResult, StoreError, Tenant};
use concord_store::{Pipeline, Store};
use std::sync::Arc;

/// Per-tenant counter at `atlas:<namespace>:<fingerprint>:_id`.
#[derive(Clone)]
pub struct IdGenerator {
    store: Arc<dyn Store>,
    namespace: String,
    start: u32,
}

impl IdGenerator {
    pub fn new(store: Arc<dyn Store>, namespace: impl Into<String>) -> Self {
        Self::from_config(store, namespace, &IdConfig::default())
    }

    pub fn from_config(store: Arc<dyn Store>, namespace: impl Into<String>, config: &IdConfig) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            start: config.start,
        }
    }

    pub fn with_start(mut self, start: u32) -> Self {
        self.start = start;
        self
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn counter_key(&self, tenant: &Tenant) -> String {
        keys::tenant_entity_key(&self.namespace, tenant, keys::ID_KEY)
    }

    pub async fn next_id(&self, tenant: &Tenant) -> RegistryResult<u32> {
        next_from(self.store.as_ref(), self.counter_key(tenant), self.start).await
    }
}

/// Process-wide counter at `atlas:<namespace>:_id`.
#[derive(Clone)]
pub struct GlobalIdGenerator {
    store: Arc<dyn Store>,
    namespace: String,
    start: u32,
}

impl GlobalIdGenerator {
    pub fn new(store: Arc<dyn Store>, namespace: impl Into<String>, start: u32) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            start,
        }
    }

    pub fn counter_key(&self) -> String {
        keys::namespaced_key(&self.namespace, &[keys::ID_KEY])
    }

    pub async fn next_id(&self) -> RegistryResult<u32> {
        next_from(self.store.as_ref(), self.counter_key(), self.start).await
    }
}

async fn next_from(store: &dyn Store, key: String, start: u32) -> RegistryResult<u32> {
    let seed = (i64::from(start) - 1).to_string().into_bytes();

    let mut pipe = Pipeline::with_capacity(2);
    pipe.set_nx(key.as_str(), seed).incr(key.as_str());

    let replies = store
        .execute(pipe)
        .await
        .map_err(|e| RegistryError::transport("next id", e))?;
    let next = replies
        .into_iter()
        .nth(1)
        .ok_or_else(|| RegistryError::transport("next id", missing_reply()))?
        .into_int("INCR")
        .map_err(|e| RegistryError::transport("next id", e))?;

    tracing::trace!(key = %key, id = next, "Allocated id");
    // Truncation past u32::MAX is accepted; the counter never resets.
    Ok(next as u32)
}

fn missing_reply() -> StoreError {
    StoreError::Command {
        command: "INCR".to_string(),
        reason: "missing reply".to_string(),
    }
}
