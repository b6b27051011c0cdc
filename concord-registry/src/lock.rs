//! Distributed lock
//!
//! Set-if-absent with a bounded TTL. There is no fencing token and no owner
//! check: `release` deletes unconditionally and a crashed holder is recovered
//! by expiry. Critical sections must stay shorter than the TTL or call
//! `extend`.

use concord_core::{keys, LockConfig, RegistryError, RegistryResult, Tenant};
use concord_store::Store;
use std::sync::Arc;
use std::time::Duration;

const LOCK_VALUE: &[u8] = b"1";

/// Named locks under `atlas:<namespace>:_lock:<key>`, or under the tenant
/// path for the `*_in` variants.
#[derive(Clone)]
pub struct Lock {
    store: Arc<dyn Store>,
    namespace: String,
    ttl: Duration,
}

impl Lock {
    /// Lock with the default 30 second TTL.
    pub fn new(store: Arc<dyn Store>, namespace: impl Into<String>) -> Self {
        Self::from_config(store, namespace, &LockConfig::default())
    }

    pub fn from_config(store: Arc<dyn Store>, namespace: impl Into<String>, config: &LockConfig) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            ttl: config.ttl,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Backing key of a process-wide lock.
    pub fn lock_key(&self, key: &str) -> String {
        keys::namespaced_key(&self.namespace, &[keys::LOCK_SEGMENT, key])
    }

    /// Backing key of a tenant-scoped lock.
    pub fn tenant_lock_key(&self, tenant: &Tenant, key: &str) -> String {
        keys::tenant_entity_key(
            &self.namespace,
            tenant,
            &keys::composite_key(&[keys::LOCK_SEGMENT, key]),
        )
    }

    /// True when this caller now holds the lock.
    pub async fn acquire(&self, key: &str) -> RegistryResult<bool> {
        self.acquire_at(&self.lock_key(key)).await
    }

    pub async fn release(&self, key: &str) -> RegistryResult<()> {
        self.release_at(&self.lock_key(key)).await
    }

    /// Reset the TTL. False when the lock had already expired.
    pub async fn extend(&self, key: &str) -> RegistryResult<bool> {
        self.extend_at(&self.lock_key(key)).await
    }

    pub async fn acquire_in(&self, tenant: &Tenant, key: &str) -> RegistryResult<bool> {
        self.acquire_at(&self.tenant_lock_key(tenant, key)).await
    }

    pub async fn release_in(&self, tenant: &Tenant, key: &str) -> RegistryResult<()> {
        self.release_at(&self.tenant_lock_key(tenant, key)).await
    }

    pub async fn extend_in(&self, tenant: &Tenant, key: &str) -> RegistryResult<bool> {
        self.extend_at(&self.tenant_lock_key(tenant, key)).await
    }

    async fn acquire_at(&self, full_key: &str) -> RegistryResult<bool> {
        let acquired = self
            .store
            .set_nx(full_key, LOCK_VALUE.to_vec(), Some(self.ttl))
            .await
            .map_err(|e| RegistryError::transport("acquire lock", e))?;
        tracing::trace!(key = full_key, acquired, "Lock acquire");
        Ok(acquired)
    }

    async fn release_at(&self, full_key: &str) -> RegistryResult<()> {
        self.store
            .del(&[full_key.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::transport("release lock", e))
    }

    async fn extend_at(&self, full_key: &str) -> RegistryResult<bool> {
        self.store
            .expire(full_key, self.ttl)
            .await
            .map_err(|e| RegistryError::transport("extend lock", e))
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::ManualClock;
    use concord_store::InMemoryStore;
    use uuid::Uuid;

    fn frozen_store() -> InMemoryStore {
        InMemoryStore::with_clock(Arc::new(ManualClock::starting_now()))
    }

    fn lock(store: &InMemoryStore) -> Lock {
        Lock::new(Arc::new(store.clone()), "account-session")
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive_until_release() {
        let store = frozen_store();
        let lock = lock(&store);

        assert!(lock.acquire("42").await.unwrap());
        assert!(!lock.acquire("42").await.unwrap());
        assert!(lock.acquire("43").await.unwrap());

        lock.release("42").await.unwrap();
        assert!(lock.acquire("42").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_key_layout() {
        let store = frozen_store();
        let lock = lock(&store);
        let tenant = Tenant::new(Uuid::from_u128(1), "GMS", 83, 1);

        assert_eq!(lock.lock_key("42"), "atlas:account-session:_lock:42");
        assert_eq!(
            lock.tenant_lock_key(&tenant, "42"),
            "atlas:account-session:00000000-0000-0000-0000-000000000001:GMS:83.1:_lock:42"
        );
    }

    #[tokio::test]
    async fn test_lock_expires_after_ttl() {
        let store = frozen_store();
        let lock = lock(&store).with_ttl(Duration::from_secs(2));

        assert!(lock.acquire("k").await.unwrap());
        assert_eq!(store.raw_ttl("atlas:account-session:_lock:k"), Some(Duration::from_secs(2)));

        store.fast_forward(Duration::from_secs(3));
        assert!(lock.acquire("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_extend_resets_ttl() {
        let store = frozen_store();
        let lock = lock(&store).with_ttl(Duration::from_secs(10));

        assert!(lock.acquire("k").await.unwrap());
        store.fast_forward(Duration::from_secs(8));
        assert!(lock.extend("k").await.unwrap());
        store.fast_forward(Duration::from_secs(8));
        assert!(!lock.acquire("k").await.unwrap());

        assert!(!lock.extend("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_tenant_locks_are_isolated() {
        let store = frozen_store();
        let lock = lock(&store);
        let a = Tenant::new(Uuid::from_u128(1), "GMS", 83, 1);
        let b = Tenant::new(Uuid::from_u128(2), "GMS", 83, 1);

        assert!(lock.acquire_in(&a, "7").await.unwrap());
        assert!(lock.acquire_in(&b, "7").await.unwrap());
        assert!(!lock.acquire_in(&a, "7").await.unwrap());
        assert!(lock.extend_in(&a, "7").await.unwrap());

        lock.release_in(&a, "7").await.unwrap();
        assert!(lock.acquire_in(&a, "7").await.unwrap());
        assert!(!lock.acquire_in(&b, "7").await.unwrap());
    }

    #[tokio::test]
    async fn test_transport_error_names_operation() {
        let store = frozen_store();
        let lock = lock(&store);
        store.fail_next(1);
        let err = lock.acquire("k").await.unwrap_err();
        assert!(err.to_string().starts_with("acquire lock: "));
    }
}
