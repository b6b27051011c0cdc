//! Write buffer, read cache and the flush/refresh cycle shared by both
//! coalesced registry flavors. Everything here is keyed by full backing key.

use super::stats::CoalescedStats;
use crate::keyspace::Keyspace;
use concord_core::{RegistryError, RegistryResult};
use concord_store::Pipeline;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Pending write. `None` is a tombstone.
#[derive(Debug, Clone)]
struct Pending<V> {
    value: Option<V>,
    seq: u64,
}

struct WriteBuffer<V> {
    entries: HashMap<String, Pending<V>>,
    next_seq: u64,
}

impl<V> Default for WriteBuffer<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<V> WriteBuffer<V> {
    fn stage(&mut self, key: String, value: Option<V>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(key, Pending { value, seq });
    }
}

pub(crate) struct CoalescedCore<V> {
    keyspace: Keyspace<V>,
    write_buf: Mutex<WriteBuffer<V>>,
    read_cache: RwLock<HashMap<String, V>>,
    pub(crate) stats: CoalescedStats,
}

impl<V> CoalescedCore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(keyspace: Keyspace<V>) -> Self {
        Self {
            keyspace,
            write_buf: Mutex::new(WriteBuffer::default()),
            read_cache: RwLock::new(HashMap::new()),
            stats: CoalescedStats::default(),
        }
    }

    pub(crate) fn keyspace(&self) -> &Keyspace<V> {
        &self.keyspace
    }

    fn buffer(&self) -> MutexGuard<'_, WriteBuffer<V>> {
        self.write_buf.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cache_read(&self) -> RwLockReadGuard<'_, HashMap<String, V>> {
        self.read_cache.read().unwrap_or_else(|e| e.into_inner())
    }

    fn cache_write(&self) -> RwLockWriteGuard<'_, HashMap<String, V>> {
        self.read_cache.write().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // LOCAL STATE
    // ========================================================================

    /// Pending buffer state: `Some(Ok(v))` for a write, `Some(Err(NotFound))`
    /// for a tombstone, `None` when nothing is pending.
    pub(crate) fn buffered(&self, key: &str) -> Option<RegistryResult<V>> {
        self.buffer().entries.get(key).map(|p| match &p.value {
            Some(v) => Ok(v.clone()),
            None => Err(RegistryError::NotFound),
        })
    }

    pub(crate) fn cached(&self, key: &str) -> Option<V> {
        self.cache_read().get(key).cloned()
    }

    pub(crate) fn stage_put(&self, key: String, value: V) {
        self.buffer().stage(key.clone(), Some(value.clone()));
        self.cache_write().insert(key, value);
    }

    pub(crate) fn stage_remove(&self, key: String) {
        self.buffer().stage(key.clone(), None);
        self.cache_write().remove(&key);
    }

    pub(crate) fn mirror(&self, key: String, value: V) {
        self.cache_write().insert(key, value);
    }

    pub(crate) fn evict(&self, key: &str) {
        self.cache_write().remove(key);
    }

    pub(crate) fn pending_writes(&self) -> usize {
        self.buffer().entries.len()
    }

    pub(crate) fn cached_len(&self) -> usize {
        self.cache_read().len()
    }

    // ========================================================================
    // READ PATHS
    // ========================================================================

    /// Buffer, then cache, then one backing read mirrored into the cache.
    pub(crate) async fn get(&self, key: &str) -> RegistryResult<V> {
        if let Some(pending) = self.buffered(key) {
            return pending;
        }
        if let Some(value) = self.cached(key) {
            return Ok(value);
        }
        self.direct_get(key).await
    }

    pub(crate) async fn direct_get(&self, key: &str) -> RegistryResult<V> {
        let value = self.keyspace.get(key).await?;
        self.mirror(key.to_string(), value.clone());
        Ok(value)
    }

    pub(crate) async fn direct_put(&self, key: &str, value: V) -> RegistryResult<()> {
        self.keyspace.put(key, &value, None).await?;
        self.mirror(key.to_string(), value);
        Ok(())
    }

    /// Optimistic update against the backing store. A `NotFound` outcome
    /// evicts any cached copy of the key.
    pub(crate) async fn direct_update<F>(&self, key: &str, f: F) -> RegistryResult<V>
    where
        F: FnOnce(V) -> V + Send,
    {
        match self.keyspace.update(key, f).await {
            Ok(value) => {
                self.mirror(key.to_string(), value.clone());
                Ok(value)
            }
            Err(RegistryError::NotFound) => {
                self.evict(key);
                Err(RegistryError::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// A tombstone answers false without consulting the store.
    pub(crate) async fn exists(&self, key: &str) -> RegistryResult<bool> {
        if let Some(pending) = self.buffered(key) {
            return Ok(pending.is_ok());
        }
        if self.cache_read().contains_key(key) {
            return Ok(true);
        }
        self.keyspace.exists(key).await
    }

    /// Merge scanned backing values with pending writes. Tombstoned keys are
    /// dropped and buffered values replace what the store returned.
    pub(crate) fn overlay(&self, keys: &[String], fetched: Vec<Option<V>>) -> Vec<V> {
        let buf = self.buffer();
        keys.iter()
            .zip(fetched)
            .filter_map(|(key, backing)| match buf.entries.get(key) {
                Some(Pending { value: Some(v), .. }) => Some(v.clone()),
                Some(Pending { value: None, .. }) => None,
                None => backing,
            })
            .collect()
    }

    // ========================================================================
    // PUMP CYCLE
    // ========================================================================

    /// Swap the buffer out and drain it in one pipeline. The buffer lock is
    /// held only for the swap. Failures are logged and dropped; later writes
    /// to the same keys go out with the next flush.
    pub(crate) async fn flush(&self) {
        let drained = std::mem::take(&mut self.buffer().entries);
        if drained.is_empty() {
            tracing::trace!(namespace = self.keyspace.namespace(), "Flush: nothing pending");
            return;
        }

        let mut batch: Vec<(String, Pending<V>)> = drained.into_iter().collect();
        batch.sort_by_key(|(_, p)| p.seq);

        let mut pipe = Pipeline::with_capacity(batch.len());
        let (mut writes, mut deletes) = (0u64, 0u64);
        for (key, pending) in &batch {
            match &pending.value {
                Some(value) => match self.keyspace.encode(value) {
                    Ok(bytes) => {
                        pipe.set(key.as_str(), bytes);
                        writes += 1;
                    }
                    Err(e) => {
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(key = %key, error = %e, "Flush: dropping unencodable value");
                    }
                },
                None => {
                    pipe.del(key.as_str());
                    deletes += 1;
                }
            }
        }

        if pipe.is_empty() {
            return;
        }

        match self.keyspace.store().execute(pipe).await {
            Ok(_) => {
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                self.stats.flushed_writes.fetch_add(writes, Ordering::Relaxed);
                self.stats.flushed_deletes.fetch_add(deletes, Ordering::Relaxed);
                tracing::trace!(
                    namespace = self.keyspace.namespace(),
                    writes,
                    deletes,
                    "Flushed write buffer"
                );
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    namespace = self.keyspace.namespace(),
                    keys = batch.len(),
                    error = %e,
                    "Flush failed"
                );
            }
        }
    }

    /// Re-read every cached key and reconcile. Keys with a pending write are
    /// left alone; keys gone from the store are evicted.
    pub(crate) async fn refresh(&self) {
        let keys: Vec<String> = self.cache_read().keys().cloned().collect();
        if keys.is_empty() {
            tracing::trace!(namespace = self.keyspace.namespace(), "Refresh: cache empty");
            return;
        }

        let mut pipe = Pipeline::with_capacity(keys.len());
        for key in &keys {
            pipe.get(key.as_str());
        }
        let replies = match self.keyspace.store().execute(pipe).await {
            Ok(replies) => replies,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    namespace = self.keyspace.namespace(),
                    keys = keys.len(),
                    error = %e,
                    "Refresh failed"
                );
                return;
            }
        };

        let (mut updated, mut evicted) = (0u64, 0u64);
        {
            let mut cache = self.cache_write();
            let buf = self.buffer();
            for (key, reply) in keys.into_iter().zip(replies) {
                if buf.entries.contains_key(&key) {
                    continue;
                }
                let Some(slot) = cache.get_mut(&key) else {
                    continue;
                };
                match reply.into_optional_bytes("GET") {
                    Ok(Some(bytes)) => match self.keyspace.decode(&key, &bytes) {
                        Ok(value) => {
                            *slot = value;
                            updated += 1;
                        }
                        Err(e) => {
                            tracing::debug!(key = %key, error = %e, "Refresh: skipping undecodable value");
                        }
                    },
                    Ok(None) => {
                        cache.remove(&key);
                        evicted += 1;
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "Refresh: skipping unexpected reply");
                    }
                }
            }
        }

        self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
        self.stats.refresh_updates.fetch_add(updated, Ordering::Relaxed);
        self.stats.refresh_evictions.fetch_add(evicted, Ordering::Relaxed);
    }
}
