//! CONCORD Core - Shared Types
//!
//! Tenant identity, key formation, error types, value codecs, clocks and
//! configuration. Every other concord crate depends on this one; it holds no
//! backing-store I/O of its own.

pub mod clock;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod keys;
pub mod telemetry;
pub mod tenant;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, FnCodec, JsonCodec};
pub use config::{CoalescingConfig, IdConfig, LockConfig, RedisConfig};
pub use error::{
    ConcordError, ConcordResult, ConfigError, RegistryError, RegistryResult, SessionError,
    StoreError, StoreResult,
};
pub use keys::{
    composite_key, entity_suffix, is_reserved, namespaced_key, tenant_entity_key, tenant_key,
    tenant_scan_pattern, KEY_PREFIX, KEY_SEPARATOR,
};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use tenant::Tenant;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
