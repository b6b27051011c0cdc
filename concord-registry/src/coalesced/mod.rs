//! Coalesced registries
//!
//! A write buffer and a read cache in front of a [`Registry`](crate::Registry)
//! or [`TenantRegistry`](crate::TenantRegistry), drained and refreshed by one
//! background task per instance.
//!
//! # Design
//!
//! - `put`/`remove` stage into the write buffer and the read cache and never
//!   wait on the backing store.
//! - Readers see the buffer first, then the cache, then the store. A pending
//!   write or tombstone always wins, including over a concurrent refresh.
//! - Flush swaps the buffer for an empty one under its lock, then sends one
//!   pipeline of SET/DEL in staging order.
//! - Refresh re-reads every cached key in one pipeline and reconciles under
//!   the cache write lock followed by the buffer lock. Keys gone from the
//!   store are evicted.
//! - Flush and refresh errors are logged and counted, never surfaced.
//!
//! Visibility across instances is bounded by the refresh interval plus one
//! round trip.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::new(store, "drops", string_key());
//! let drops = CoalescedRegistry::new(registry, CoalescingConfig::from_env())?;
//!
//! drops.put(&"k1".to_string(), "v1".to_string());
//! assert_eq!(drops.get(&"k1".to_string()).await?, "v1");
//!
//! drops.shutdown().await;
//! ```

mod state;
mod plain;
mod pump;
mod stats;
mod tenant;

pub use plain::CoalescedRegistry;
pub use stats::{CoalescedStats, CoalescedStatsSnapshot};
pub use tenant::TenantCoalescedRegistry;
