//! Account session coordinator
//!
//! Tracks which services hold a session for each account, stored as one
//! [`SessionMap`] per account in a [`TenantRegistry`] under the
//! `account-session` namespace.
//!
//! # Design
//!
//! - Each mutation reads the map, checks its precondition and writes the
//!   whole map back. Concurrent mutations of one account are last-write-wins;
//!   callers that need strict ordering hold a [`Lock`](concord_registry::Lock)
//!   on the account id around the call.
//! - Every write also adds the tenant's JSON form to
//!   `atlas:account-session:_tenants` so sweepers can enumerate tenants
//!   without scanning the whole keyspace. That set is never pruned.
//!
//! # Example
//!
//! ```ignore
//! let sessions = SessionCoordinator::new(store);
//! let account = AccountKey::new(tenant, 42);
//!
//! sessions.login(&account, &ServiceKey::login(session_id)).await?;
//! sessions.transition(&account, &ServiceKey::login(session_id)).await?;
//! sessions.login(&account, &ServiceKey::channel(session_id)).await?;
//! assert!(sessions.is_logged_in(&account).await?);
//! ```

use crate::model::{maximal_state, AccountKey, Service, ServiceKey, SessionMap, State, StateValue};
use concord_core::clock::system_clock;
use concord_core::{keys, Clock, RegistryError, SessionError, Tenant};
use concord_registry::{display_key, TenantRegistry};
use concord_store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Namespace of the session registry.
pub const SESSION_NAMESPACE: &str = "account-session";

type SessionResult<T> = Result<T, SessionError>;

/// Per-account session state machine over the shared store.
#[derive(Clone)]
pub struct SessionCoordinator {
    registry: TenantRegistry<u32, SessionMap>,
    clock: Arc<dyn Clock>,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_namespace(store, SESSION_NAMESPACE)
    }

    pub fn with_namespace(store: Arc<dyn Store>, namespace: impl Into<String>) -> Self {
        Self {
            registry: TenantRegistry::new(store, namespace, display_key()),
            clock: system_clock(),
        }
    }

    /// Replace the clock used for state timestamps and ages.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn namespace(&self) -> &str {
        self.registry.namespace()
    }

    pub fn registry(&self) -> &TenantRegistry<u32, SessionMap> {
        &self.registry
    }

    /// Key of the tenant membership set.
    pub fn tenants_key(&self) -> String {
        keys::namespaced_key(self.registry.namespace(), &[keys::TENANTS_KEY])
    }

    // ========================================================================
    // STORAGE
    // ========================================================================

    /// The account's map, or `None` when it has never been written.
    async fn load(&self, account: &AccountKey) -> SessionResult<Option<SessionMap>> {
        match self.registry.get(&account.tenant, &account.account_id).await {
            Ok(map) => Ok(Some(map)),
            Err(RegistryError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Like `load`, but an undecodable map reads as empty so a fresh login
    /// can overwrite it. Transport errors still surface.
    async fn load_or_empty(&self, account: &AccountKey) -> SessionResult<SessionMap> {
        match self.load(account).await {
            Ok(map) => Ok(map.unwrap_or_default()),
            Err(SessionError::Registry(e @ RegistryError::Decode { .. })) => {
                tracing::warn!(account = %account, error = %e, "Discarding undecodable session map");
                Ok(SessionMap::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn store_map(&self, account: &AccountKey, map: &SessionMap) -> SessionResult<()> {
        self.registry
            .put(&account.tenant, &account.account_id, map)
            .await?;
        self.remember_tenant(&account.tenant).await;
        Ok(())
    }

    async fn remember_tenant(&self, tenant: &Tenant) {
        let member = match serde_json::to_string(tenant) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "Unable to encode tenant");
                return;
            }
        };
        if let Err(e) = self.registry.store().sadd(&self.tenants_key(), &[member]).await {
            tracing::warn!(tenant = %tenant, error = %e, "Unable to record session tenant");
        }
    }

    fn stamp(&self, state: State) -> StateValue {
        StateValue::new(state, self.clock.now())
    }

    fn is_stale(&self, value: &StateValue, timeout: Duration) -> bool {
        let age = self.clock.now() - value.updated_at;
        value.state == State::Transition
            && age > chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Parsed view of the account's sessions. Entries whose key does not
    /// parse are skipped.
    pub async fn get_states(&self, account: &AccountKey) -> SessionResult<HashMap<ServiceKey, StateValue>> {
        let Some(map) = self.load(account).await? else {
            return Ok(HashMap::new());
        };
        Ok(map
            .into_iter()
            .filter_map(|(key, value)| key.parse::<ServiceKey>().ok().map(|sk| (sk, value)))
            .collect())
    }

    pub async fn maximal_state(&self, account: &AccountKey) -> SessionResult<State> {
        Ok(self
            .load(account)
            .await?
            .map(|map| maximal_state(&map))
            .unwrap_or(State::NotLoggedIn))
    }

    pub async fn is_logged_in(&self, account: &AccountKey) -> SessionResult<bool> {
        Ok(self.maximal_state(account).await?.is_active())
    }

    /// Tenants that have written session state. Undecodable members are
    /// skipped.
    pub async fn tenants(&self) -> SessionResult<Vec<Tenant>> {
        let members = self
            .registry
            .store()
            .smembers(&self.tenants_key())
            .await
            .map_err(|e| RegistryError::transport("tenants", e))?;
        Ok(members
            .iter()
            .filter_map(|member| serde_json::from_str::<Tenant>(member).ok())
            .collect())
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// `LOGIN` requires no active session. `CHANNEL` requires some session in
    /// transition and replaces the whole map. A stored map that fails to
    /// decode counts as empty here and is overwritten.
    pub async fn login(&self, account: &AccountKey, service_key: &ServiceKey) -> SessionResult<()> {
        let mut map = self.load_or_empty(account).await?;

        match service_key.service {
            Service::Login => {
                if map.values().any(|v| v.state.is_active()) {
                    return Err(SessionError::AlreadyLoggedIn);
                }
                map.insert(service_key.to_string(), self.stamp(State::LoggedIn));
            }
            Service::Channel => {
                if !map.values().any(|v| v.state > State::LoggedIn) {
                    return Err(SessionError::NoOtherServiceTransitioning);
                }
                map = SessionMap::from([(service_key.to_string(), self.stamp(State::LoggedIn))]);
            }
        }

        self.store_map(account, &map).await?;
        tracing::debug!(account = %account, service_key = %service_key, "Session logged in");
        Ok(())
    }

    pub async fn transition(&self, account: &AccountKey, service_key: &ServiceKey) -> SessionResult<()> {
        let mut map = self.load(account).await?.ok_or(SessionError::NotLoggedIn)?;
        let key = service_key.to_string();

        match map.get(&key) {
            Some(value) if value.state.is_active() => {
                map.insert(key, self.stamp(State::Transition));
                self.store_map(account, &map).await?;
                tracing::debug!(account = %account, service_key = %service_key, "Session in transition");
                Ok(())
            }
            _ => Err(SessionError::NotLoggedIn),
        }
    }

    /// Drop the session. Returns false, without writing, when the session is
    /// in transition.
    pub async fn logout(&self, account: &AccountKey, service_key: &ServiceKey) -> SessionResult<bool> {
        let Some(mut map) = self.load(account).await? else {
            return Ok(true);
        };
        let key = service_key.to_string();

        if map.get(&key).is_some_and(|v| v.state == State::Transition) {
            return Ok(false);
        }
        map.remove(&key);
        self.store_map(account, &map).await?;
        Ok(true)
    }

    /// Delete every session of the account.
    pub async fn terminate(&self, account: &AccountKey) -> SessionResult<bool> {
        self.registry
            .remove(&account.tenant, &account.account_id)
            .await?;
        Ok(true)
    }

    /// Remove sessions that have been in transition longer than `timeout`.
    pub async fn expire_transition(&self, account: &AccountKey, timeout: Duration) -> SessionResult<()> {
        let Some(mut map) = self.load(account).await? else {
            return Ok(());
        };

        let before = map.len();
        map.retain(|_, value| !self.is_stale(value, timeout));
        if map.len() != before {
            tracing::info!(
                account = %account,
                expired = before - map.len(),
                "Expired sessions stuck in transition"
            );
            self.store_map(account, &map).await?;
        }
        Ok(())
    }

    /// Accounts across all known tenants with at least one session in
    /// transition for longer than `timeout`. Read-only.
    pub async fn get_expired_in_transition(&self, timeout: Duration) -> SessionResult<Vec<AccountKey>> {
        let mut expired = Vec::new();

        for tenant in self.tenants().await? {
            let entity_keys = match self.registry.get_all_keys(&tenant).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(tenant = %tenant, error = %e, "Skipping tenant in transition scan");
                    continue;
                }
            };

            for entity_key in entity_keys {
                let Ok(account_id) = entity_key.parse::<u32>() else {
                    continue;
                };
                let account = AccountKey::new(tenant.clone(), account_id);
                match self.load(&account).await {
                    Ok(Some(map)) if map.values().any(|v| self.is_stale(v, timeout)) => {
                        expired.push(account);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(account = %account, error = %e, "Skipping unreadable session map");
                    }
                }
            }
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use concord_core::ManualClock;
    use concord_store::InMemoryStore;
    use uuid::Uuid;

    fn tenant(n: u128) -> Tenant {
        Tenant::new(Uuid::from_u128(n), "GMS", 83, 1)
    }

    fn fixture() -> (InMemoryStore, ManualClock, SessionCoordinator) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
        let sessions = SessionCoordinator::new(Arc::new(store.clone())).with_clock(Arc::new(clock.clone()));
        (store, clock, sessions)
    }

    fn session(n: u128) -> Uuid {
        Uuid::from_u128(0xA000 + n)
    }

    #[tokio::test]
    async fn test_second_login_is_rejected() {
        let (_store, _clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);

        sessions.login(&account, &ServiceKey::login(session(1))).await.unwrap();
        assert_eq!(
            sessions.login(&account, &ServiceKey::login(session(1))).await,
            Err(SessionError::AlreadyLoggedIn)
        );
        assert_eq!(
            sessions.login(&account, &ServiceKey::login(session(2))).await,
            Err(SessionError::AlreadyLoggedIn)
        );
    }

    #[tokio::test]
    async fn test_channel_login_requires_transition() {
        let (_store, _clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);

        assert_eq!(
            sessions.login(&account, &ServiceKey::channel(session(1))).await,
            Err(SessionError::NoOtherServiceTransitioning)
        );

        sessions.login(&account, &ServiceKey::login(session(1))).await.unwrap();
        assert_eq!(
            sessions.login(&account, &ServiceKey::channel(session(1))).await,
            Err(SessionError::NoOtherServiceTransitioning)
        );
    }

    #[tokio::test]
    async fn test_channel_login_replaces_map() {
        let (_store, _clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);
        let login = ServiceKey::login(session(1));
        let channel = ServiceKey::channel(session(1));

        sessions.login(&account, &login).await.unwrap();
        sessions.transition(&account, &login).await.unwrap();
        assert_eq!(sessions.maximal_state(&account).await.unwrap(), State::Transition);

        sessions.login(&account, &channel).await.unwrap();
        let states = sessions.get_states(&account).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[&channel].state, State::LoggedIn);
    }

    #[tokio::test]
    async fn test_transition_requires_active_entry() {
        let (_store, _clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);

        assert_eq!(
            sessions.transition(&account, &ServiceKey::login(session(1))).await,
            Err(SessionError::NotLoggedIn)
        );
        sessions.login(&account, &ServiceKey::login(session(1))).await.unwrap();
        assert_eq!(
            sessions.transition(&account, &ServiceKey::login(session(2))).await,
            Err(SessionError::NotLoggedIn)
        );
    }

    #[tokio::test]
    async fn test_logout_refuses_transitioning_entry() {
        let (store, _clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);
        let login = ServiceKey::login(session(1));

        sessions.login(&account, &login).await.unwrap();
        sessions.transition(&account, &login).await.unwrap();

        let full_key = sessions.registry().full_key(&account.tenant, &42);
        let before = store.raw_get(&full_key);
        assert!(!sessions.logout(&account, &login).await.unwrap());
        assert_eq!(store.raw_get(&full_key), before);
        assert!(sessions.is_logged_in(&account).await.unwrap());
    }

    #[tokio::test]
    async fn test_logout_missing_account_is_ok() {
        let (_store, _clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);
        assert!(sessions.logout(&account, &ServiceKey::login(session(1))).await.unwrap());
        assert!(!sessions.is_logged_in(&account).await.unwrap());
    }

    #[tokio::test]
    async fn test_terminate_deletes_map() {
        let (store, _clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);

        sessions.login(&account, &ServiceKey::login(session(1))).await.unwrap();
        assert!(sessions.terminate(&account).await.unwrap());
        assert!(!store.raw_exists(&sessions.registry().full_key(&account.tenant, &42)));
        assert!(sessions.get_states(&account).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_transition_removes_only_stale_entries() {
        let (_store, clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);
        let login = ServiceKey::login(session(1));

        sessions.login(&account, &login).await.unwrap();
        sessions.transition(&account, &login).await.unwrap();

        clock.advance(chrono::Duration::seconds(3));
        sessions.expire_transition(&account, Duration::from_secs(5)).await.unwrap();
        assert_eq!(sessions.maximal_state(&account).await.unwrap(), State::Transition);

        clock.advance(chrono::Duration::seconds(3));
        sessions.expire_transition(&account, Duration::from_secs(5)).await.unwrap();
        assert_eq!(sessions.maximal_state(&account).await.unwrap(), State::NotLoggedIn);
    }

    #[tokio::test]
    async fn test_writes_record_tenant() {
        let (store, _clock, sessions) = fixture();
        let (a, b) = (tenant(1), tenant(2));

        sessions.login(&AccountKey::new(a.clone(), 1), &ServiceKey::login(session(1))).await.unwrap();
        sessions.login(&AccountKey::new(b.clone(), 1), &ServiceKey::login(session(2))).await.unwrap();
        sessions.login(&AccountKey::new(a.clone(), 2), &ServiceKey::login(session(3))).await.unwrap();

        assert!(store.raw_exists("atlas:account-session:_tenants"));
        let mut tenants = sessions.tenants().await.unwrap();
        tenants.sort();
        assert_eq!(tenants, vec![a, b]);
    }

    #[tokio::test]
    async fn test_get_expired_in_transition_scans_all_tenants() {
        let (store, clock, sessions) = fixture();
        let (a, b) = (tenant(1), tenant(2));
        let stuck_a = AccountKey::new(a.clone(), 10);
        let fresh_a = AccountKey::new(a.clone(), 11);
        let stuck_b = AccountKey::new(b.clone(), 10);

        for (i, account) in [&stuck_a, &stuck_b].into_iter().enumerate() {
            let sk = ServiceKey::login(session(i as u128));
            sessions.login(account, &sk).await.unwrap();
            sessions.transition(account, &sk).await.unwrap();
        }
        clock.advance(chrono::Duration::seconds(10));

        let sk = ServiceKey::login(session(9));
        sessions.login(&fresh_a, &sk).await.unwrap();
        sessions.transition(&fresh_a, &sk).await.unwrap();
        store.raw_set(&sessions.registry().raw_key(&a, "not-an-account"), b"{}".to_vec());

        let mut expired = sessions.get_expired_in_transition(Duration::from_secs(5)).await.unwrap();
        expired.sort();
        assert_eq!(expired, vec![stuck_a.clone(), stuck_b]);

        assert_eq!(sessions.maximal_state(&stuck_a).await.unwrap(), State::Transition);
    }

    #[tokio::test]
    async fn test_get_states_skips_unparsable_keys() {
        let (store, clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);
        let login = ServiceKey::login(session(1));
        sessions.login(&account, &login).await.unwrap();

        let full_key = sessions.registry().full_key(&account.tenant, &42);
        let mut map: SessionMap = serde_json::from_slice(&store.raw_get(&full_key).unwrap()).unwrap();
        map.insert("garbage".into(), StateValue::new(State::LoggedIn, clock.now()));
        store.raw_set(&full_key, serde_json::to_vec(&map).unwrap());

        let states = sessions.get_states(&account).await.unwrap();
        assert_eq!(states.len(), 1);
        assert!(states.contains_key(&login));
    }

    #[tokio::test]
    async fn test_login_overwrites_undecodable_map() {
        let (store, _clock, sessions) = fixture();
        let account = AccountKey::new(tenant(1), 42);
        let login = ServiceKey::login(session(1));
        let full_key = sessions.registry().full_key(&account.tenant, &42);
        store.raw_set(
            &full_key,
            br#"{"x:LOGIN":{"state":9,"updatedAt":"2024-01-01T00:00:00Z"}}"#.to_vec(),
        );

        assert!(matches!(
            sessions.is_logged_in(&account).await,
            Err(SessionError::Registry(RegistryError::Decode { .. }))
        ));
        assert_eq!(
            sessions.login(&account, &ServiceKey::channel(session(1))).await,
            Err(SessionError::NoOtherServiceTransitioning)
        );

        sessions.login(&account, &login).await.unwrap();
        let states = sessions.get_states(&account).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[&login].state, State::LoggedIn);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let (store, _clock, sessions) = fixture();
        store.fail_next(1);
        let err = sessions
            .login(&AccountKey::new(tenant(1), 1), &ServiceKey::login(session(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Registry(RegistryError::Transport { .. })));
    }
}
