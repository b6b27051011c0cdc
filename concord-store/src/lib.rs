//! CONCORD Store - Backing-Store Contract
//!
//! Registries speak to the backing store only through the [`Store`] trait:
//! an ordered [`Pipeline`] of [`Command`]s in, one [`Reply`] per command out,
//! plus an optimistic watch-protected update.
//!
//! # Implementations
//!
//! - [`RedisStore`]: production client on the `redis` crate
//! - [`InMemoryStore`]: in-process fake with clock injection, used by every
//!   test in the workspace
//!
//! # Example
//!
//! ```ignore
//! use concord_store::{InMemoryStore, Pipeline, Store};
//!
//! let store = InMemoryStore::new();
//! let mut pipe = Pipeline::new();
//! pipe.set("atlas:drops:k", b"\"v\"".to_vec()).get("atlas:drops:k");
//! let replies = store.execute(pipe).await?;
//! ```

pub mod command;
pub mod glob;
pub mod memory;
pub mod redis_store;
pub mod traits;

pub use command::{Command, Pipeline, Reply};
pub use glob::glob_match;
pub use memory::InMemoryStore;
pub use redis_store::RedisStore;
pub use traits::{Store, UpdateFn, UpdateOutcome};
