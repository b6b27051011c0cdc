//! Value codecs
//!
//! Registries store opaque bytes. A [`Codec`] turns values into those bytes
//! and back. [`JsonCodec`] is the default; [`FnCodec`] wraps a caller-supplied
//! marshal/unmarshal pair.

use crate::error::RegistryError;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Marshal/unmarshal pair for a registry value type.
///
/// Decode failures are reported as [`RegistryError::Decode`] with an empty
/// key; registries fill the key in before surfacing the error.
pub trait Codec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Vec<u8>, RegistryError>;
    fn decode(&self, bytes: &[u8]) -> Result<V, RegistryError>;
}

/// serde_json encoding. A string `"v1"` is stored as `"\"v1\""`.
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for JsonCodec<V> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for JsonCodec<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<V> Codec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, RegistryError> {
        serde_json::to_vec(value).map_err(|e| RegistryError::Encode {
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, RegistryError> {
        serde_json::from_slice(bytes).map_err(|e| RegistryError::Decode {
            key: String::new(),
            reason: e.to_string(),
        })
    }
}

type EncodeFn<V> = dyn Fn(&V) -> Result<Vec<u8>, String> + Send + Sync;
type DecodeFn<V> = dyn Fn(&[u8]) -> Result<V, String> + Send + Sync;

/// Codec built from two closures.
pub struct FnCodec<V> {
    encode: Arc<EncodeFn<V>>,
    decode: Arc<DecodeFn<V>>,
}

impl<V> FnCodec<V> {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&V) -> Result<Vec<u8>, String> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<V, String> + Send + Sync + 'static,
    {
        Self {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }
}

impl<V> Clone for FnCodec<V> {
    fn clone(&self) -> Self {
        Self {
            encode: Arc::clone(&self.encode),
            decode: Arc::clone(&self.decode),
        }
    }
}

impl<V> Codec<V> for FnCodec<V> {
    fn encode(&self, value: &V) -> Result<Vec<u8>, RegistryError> {
        (self.encode)(value).map_err(|reason| RegistryError::Encode { reason })
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, RegistryError> {
        (self.decode)(bytes).map_err(|reason| RegistryError::Decode {
            key: String::new(),
            reason,
        })
    }
}
