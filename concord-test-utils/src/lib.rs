//! CONCORD Test Utilities
//!
//! Shared test infrastructure for the CONCORD workspace:
//! - Proptest generators for tenants, entity keys and write sequences
//! - Fixtures: well-known tenants and an in-memory store on a manual clock
//! - Assertions for registry error kinds

pub use concord_core::{
    Clock, ManualClock, RegistryError, RegistryResult, SessionError, StoreError, Tenant, Timestamp,
};
pub use concord_store::{InMemoryStore, Store};

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CONCORD inputs.

    use super::*;
    use proptest::prelude::*;

    /// Random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Short upper-case region code.
    pub fn arb_region() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("GMS".to_string()),
            Just("KMS".to_string()),
            Just("JMS".to_string()),
            "[A-Z]{2,4}",
        ]
    }

    pub fn arb_tenant() -> impl Strategy<Value = Tenant> {
        (arb_uuid(), arb_region(), any::<u16>(), any::<u16>())
            .prop_map(|(id, region, major, minor)| Tenant::new(id, region, major, minor))
    }

    /// Non-reserved entity key without separators.
    pub fn arb_entity_key() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9-]{0,15}"
    }

    /// Namespace segment.
    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z][a-z-]{0,15}"
    }

    /// Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    /// One staged write against a single key.
    pub fn arb_write_op() -> impl Strategy<Value = WriteOp> {
        prop_oneof![
            3 => "[a-z]{1,8}".prop_map(WriteOp::Put),
            1 => Just(WriteOp::Remove),
        ]
    }

    pub fn arb_write_ops(max: usize) -> impl Strategy<Value = Vec<WriteOp>> {
        prop::collection::vec(arb_write_op(), 1..=max)
    }
}

/// A put or a remove, for last-write-wins models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(String),
    Remove,
}

impl WriteOp {
    /// Value a reader should see after `ops`, or `None` for not-found.
    pub fn expected_after(ops: &[WriteOp]) -> Option<String> {
        match ops.last()? {
            WriteOp::Put(value) => Some(value.clone()),
            WriteOp::Remove => None,
        }
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// `00000000-0000-0000-0000-000000000001`, GMS v83.1
    pub fn test_tenant() -> Tenant {
        Tenant::new(Uuid::from_u128(1), "GMS", 83, 1)
    }

    /// A second tenant for isolation tests.
    pub fn other_tenant() -> Tenant {
        Tenant::new(Uuid::from_u128(2), "GMS", 83, 1)
    }

    /// Fixed start instant for manual clocks.
    pub fn epoch() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// In-memory store and the manual clock driving it.
    #[derive(Debug, Clone)]
    pub struct Harness {
        pub store: InMemoryStore,
        pub clock: ManualClock,
    }

    impl Harness {
        pub fn new() -> Self {
            let clock = ManualClock::new(epoch());
            let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
            Self { store, clock }
        }

        /// The store as the trait object registries take.
        pub fn store(&self) -> Arc<dyn Store> {
            Arc::new(self.store.clone())
        }

        pub fn clock(&self) -> Arc<dyn Clock> {
            Arc::new(self.clock.clone())
        }

        pub fn advance(&self, by: std::time::Duration) {
            self.clock
                .advance(chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX));
        }
    }

    impl Default for Harness {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for registry and session error kinds.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &RegistryResult<T>) {
        match result {
            Err(RegistryError::NotFound) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_decode_error<T: std::fmt::Debug>(result: &RegistryResult<T>) {
        match result {
            Err(RegistryError::Decode { .. }) => {}
            other => panic!("Expected Decode error, got: {:?}", other),
        }
    }

    /// Assert a transport error raised by operation `op`.
    #[track_caller]
    pub fn assert_transport_error<T: std::fmt::Debug>(result: &RegistryResult<T>, op: &str) {
        match result {
            Err(RegistryError::Transport { op: got, .. }) => {
                assert_eq!(*got, op, "Wrong operation in transport error");
            }
            other => panic!("Expected Transport error for {op}, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_session_error<T: std::fmt::Debug>(
        result: &Result<T, SessionError>,
        expected: &SessionError,
    ) {
        match result {
            Err(e) if e.to_string() == expected.to_string() => {}
            other => panic!("Expected {expected}, got: {:?}", other),
        }
    }
}
