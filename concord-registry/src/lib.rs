//! CONCORD Registry - Keyed State Over a Shared Backing Store
//!
//! Typed registries and coordination primitives for services that share one
//! Redis-compatible store across many tenants.
//!
//! - [`Registry`] / [`TenantRegistry`]: one round trip per call
//! - [`CoalescedRegistry`] / [`TenantCoalescedRegistry`]: local write buffer
//!   and read cache, drained and refreshed in the background
//! - [`TtlRegistry`]: entries that expire through an explicit pop
//! - [`Lock`], [`IdGenerator`], [`GlobalIdGenerator`], [`Index`],
//!   [`Uint32Index`]: auxiliary primitives

pub mod coalesced;
pub mod id;
pub mod index;
pub mod keyspace;
pub mod lock;
pub mod registry;
pub mod tenant;
pub mod ttl;

pub use coalesced::{
    CoalescedRegistry, CoalescedStats, CoalescedStatsSnapshot, TenantCoalescedRegistry,
};
pub use id::{GlobalIdGenerator, IdGenerator};
pub use index::{Index, Uint32Index};
pub use keyspace::{display_key, string_key, KeyFn};
pub use lock::Lock;
pub use registry::Registry;
pub use tenant::TenantRegistry;
pub use ttl::TtlRegistry;
