//! Full-key value access shared by every registry flavor.
//!
//! A [`Keyspace`] knows the store, the namespace and the codec. It works in
//! terms of already-built backing keys, leaving key formation (plain or
//! tenant-scoped) to the registry that owns it.

use concord_core::{Codec, RegistryError, RegistryResult};
use concord_store::{Pipeline, Reply, Store, UpdateOutcome};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// Maps a caller key to its entity-key string.
pub type KeyFn<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// Entity key for string keys.
pub fn string_key() -> KeyFn<String> {
    Arc::new(|k: &String| k.clone())
}

/// Entity key via `Display`, e.g. decimal account ids.
pub fn display_key<K: Display + 'static>() -> KeyFn<K> {
    Arc::new(|k: &K| k.to_string())
}

pub(crate) struct Keyspace<V> {
    store: Arc<dyn Store>,
    namespace: String,
    codec: Arc<dyn Codec<V>>,
}

impl<V> Clone for Keyspace<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<V: Send + 'static> Keyspace<V> {
    pub(crate) fn new(store: Arc<dyn Store>, namespace: impl Into<String>, codec: Arc<dyn Codec<V>>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            codec,
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn encode(&self, value: &V) -> RegistryResult<Vec<u8>> {
        self.codec.encode(value)
    }

    pub(crate) fn decode(&self, key: &str, bytes: &[u8]) -> RegistryResult<V> {
        self.codec.decode(bytes).map_err(|e| e.at_key(key))
    }

    pub(crate) async fn get(&self, key: &str) -> RegistryResult<V> {
        let bytes = self
            .store
            .get(key)
            .await
            .map_err(|e| RegistryError::transport("get", e))?
            .ok_or(RegistryError::NotFound)?;
        self.decode(key, &bytes)
    }

    pub(crate) async fn put(&self, key: &str, value: &V, ttl: Option<Duration>) -> RegistryResult<()> {
        let bytes = self.encode(value)?;
        self.store
            .set(key, bytes, ttl)
            .await
            .map_err(|e| RegistryError::transport("put", e))
    }

    pub(crate) async fn remove(&self, key: &str) -> RegistryResult<()> {
        self.store
            .del(&[key.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::transport("remove", e))
    }

    pub(crate) async fn exists(&self, key: &str) -> RegistryResult<bool> {
        self.store
            .exists(key)
            .await
            .map_err(|e| RegistryError::transport("exists", e))
    }

    /// Optimistic read-modify-write. Returns the committed value.
    pub(crate) async fn update<F>(&self, key: &str, f: F) -> RegistryResult<V>
    where
        F: FnOnce(V) -> V + Send,
    {
        let mut committed: Option<V> = None;
        let slot = &mut committed;
        let codec = Arc::clone(&self.codec);
        let owned_key = key.to_string();

        let outcome = self
            .store
            .update(
                key,
                Box::new(move |bytes: &[u8]| {
                    let current = codec.decode(bytes).map_err(|e| e.at_key(&owned_key))?;
                    let next = f(current);
                    let encoded = codec.encode(&next)?;
                    *slot = Some(next);
                    Ok(encoded)
                }),
            )
            .await
            .map_err(|e| RegistryError::transport("update", e))?;

        match outcome {
            UpdateOutcome::Missing => Err(RegistryError::NotFound),
            UpdateOutcome::Conflict => Err(RegistryError::Conflict {
                key: key.to_string(),
            }),
            UpdateOutcome::Rejected(e) => Err(e),
            UpdateOutcome::Updated(bytes) => match committed {
                Some(value) => Ok(value),
                None => self.decode(key, &bytes),
            },
        }
    }

    /// Pipelined GET of `keys`. Absent keys and decode failures yield `None`.
    pub(crate) async fn fetch_many(&self, op: &'static str, keys: &[String]) -> RegistryResult<Vec<Option<V>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = Pipeline::with_capacity(keys.len());
        for key in keys {
            pipe.get(key.as_str());
        }
        let replies = self
            .store
            .execute(pipe)
            .await
            .map_err(|e| RegistryError::transport(op, e))?;

        Ok(keys
            .iter()
            .zip(replies)
            .map(|(key, reply)| self.decode_reply(key, reply))
            .collect())
    }

    pub(crate) fn decode_reply(&self, key: &str, reply: Reply) -> Option<V> {
        match reply.into_optional_bytes("GET") {
            Ok(Some(bytes)) => match self.decode(key, &bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(key, error = %e, "Skipping undecodable value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(key, error = %e, "Skipping unexpected reply");
                None
            }
        }
    }
}
