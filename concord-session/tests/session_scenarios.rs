//! Account session scenarios against the in-memory store.

use concord_core::SessionError;
use concord_session::{
    AccountKey, ExpireTransitionHandler, ServiceKey, SessionCoordinator, State, SweeperConfig,
    SweeperMetrics,
};
use concord_test_utils::assertions::assert_session_error;
use concord_test_utils::fixtures::{other_tenant, test_tenant, Harness};
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

fn coordinator(harness: &Harness) -> SessionCoordinator {
    SessionCoordinator::new(harness.store()).with_clock(harness.clock())
}

#[tokio::test]
async fn test_login_handoff_to_channel_and_logout() {
    let harness = Harness::new();
    let sessions = coordinator(&harness);
    let account = AccountKey::new(test_tenant(), 1_000_001);
    let session = Uuid::from_u128(0xBEEF);
    let (login, channel) = (ServiceKey::login(session), ServiceKey::channel(session));

    sessions.login(&account, &login).await.unwrap();
    assert!(sessions.is_logged_in(&account).await.unwrap());

    sessions.transition(&account, &login).await.unwrap();
    sessions.login(&account, &channel).await.unwrap();

    let states = sessions.get_states(&account).await.unwrap();
    assert_eq!(states.keys().copied().collect::<Vec<_>>(), vec![channel]);

    assert!(sessions.logout(&account, &channel).await.unwrap());
    assert!(!sessions.is_logged_in(&account).await.unwrap());
}

#[tokio::test]
async fn test_session_maps_are_tenant_scoped() {
    let harness = Harness::new();
    let sessions = coordinator(&harness);
    let a = AccountKey::new(test_tenant(), 5);
    let b = AccountKey::new(other_tenant(), 5);
    let sk = ServiceKey::login(Uuid::from_u128(1));

    sessions.login(&a, &sk).await.unwrap();
    assert!(!sessions.is_logged_in(&b).await.unwrap());
    sessions.login(&b, &sk).await.unwrap();

    assert!(sessions.terminate(&a).await.unwrap());
    assert!(!sessions.is_logged_in(&a).await.unwrap());
    assert!(sessions.is_logged_in(&b).await.unwrap());

    let key = format!("atlas:account-session:{}:5", other_tenant().fingerprint());
    assert!(harness.store.raw_exists(&key));
}

#[tokio::test]
async fn test_failed_handoff_is_swept() {
    let harness = Harness::new();
    let sessions = coordinator(&harness);
    let account = AccountKey::new(test_tenant(), 9);
    let login = ServiceKey::login(Uuid::from_u128(9));

    sessions.login(&account, &login).await.unwrap();
    sessions.transition(&account, &login).await.unwrap();
    assert!(!sessions.logout(&account, &login).await.unwrap());

    harness.advance(Duration::from_secs(30));

    let config = SweeperConfig::default();
    let handler = ExpireTransitionHandler::new(sessions.clone(), config.transition_timeout);
    let metrics = SweeperMetrics::new();
    assert_eq!(
        concord_session::sweep_once(&sessions, &handler, &config, &metrics).await,
        1
    );

    assert_eq!(sessions.maximal_state(&account).await.unwrap(), State::NotLoggedIn);
    assert_session_error(
        &sessions.login(&account, &ServiceKey::channel(Uuid::from_u128(9))).await,
        &SessionError::NoOtherServiceTransitioning,
    );
    sessions.login(&account, &login).await.unwrap();
}

// ============================================================================
// STATE MACHINE PROPERTY
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Event {
    Login(usize),
    Transition(usize),
    Logout(usize),
}

fn arb_event() -> impl Strategy<Value = Event> {
    (0..3usize, 0..4usize).prop_map(|(kind, key)| match kind {
        0 => Event::Login(key),
        1 => Event::Transition(key),
        _ => Event::Logout(key),
    })
}

fn service_keys() -> Vec<ServiceKey> {
    let (a, b) = (Uuid::from_u128(0xA), Uuid::from_u128(0xB));
    vec![
        ServiceKey::login(a),
        ServiceKey::channel(a),
        ServiceKey::login(b),
        ServiceKey::channel(b),
    ]
}

/// Reference model of one account's session map.
#[derive(Default)]
struct Model {
    map: HashMap<ServiceKey, State>,
}

impl Model {
    fn apply(&mut self, event: Event, keys: &[ServiceKey]) -> Result<bool, SessionError> {
        match event {
            Event::Login(i) => {
                let sk = keys[i];
                match sk.service {
                    concord_session::Service::Login => {
                        if !self.map.is_empty() {
                            return Err(SessionError::AlreadyLoggedIn);
                        }
                        self.map.insert(sk, State::LoggedIn);
                    }
                    concord_session::Service::Channel => {
                        if !self.map.values().any(|s| *s == State::Transition) {
                            return Err(SessionError::NoOtherServiceTransitioning);
                        }
                        self.map = HashMap::from([(sk, State::LoggedIn)]);
                    }
                }
                Ok(true)
            }
            Event::Transition(i) => {
                let sk = keys[i];
                if !self.map.contains_key(&sk) {
                    return Err(SessionError::NotLoggedIn);
                }
                self.map.insert(sk, State::Transition);
                Ok(true)
            }
            Event::Logout(i) => {
                let sk = keys[i];
                if self.map.get(&sk) == Some(&State::Transition) {
                    return Ok(false);
                }
                self.map.remove(&sk);
                Ok(true)
            }
        }
    }

    fn maximal(&self) -> State {
        self.map.values().copied().min().unwrap_or(State::NotLoggedIn)
    }
}

async fn apply(
    sessions: &SessionCoordinator,
    account: &AccountKey,
    event: Event,
    keys: &[ServiceKey],
) -> Result<bool, SessionError> {
    match event {
        Event::Login(i) => sessions.login(account, &keys[i]).await.map(|()| true),
        Event::Transition(i) => sessions.transition(account, &keys[i]).await.map(|()| true),
        Event::Logout(i) => sessions.logout(account, &keys[i]).await,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_coordinator_matches_model(events in prop::collection::vec(arb_event(), 0..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let harness = Harness::new();
            let sessions = coordinator(&harness);
            let account = AccountKey::new(test_tenant(), 77);
            let keys = service_keys();
            let mut model = Model::default();

            for event in events {
                let expected = model.apply(event, &keys);
                let actual = apply(&sessions, &account, event, &keys).await;
                prop_assert_eq!(actual, expected, "event {:?}", event);
                prop_assert_eq!(sessions.maximal_state(&account).await.unwrap(), model.maximal());
            }
            Ok(())
        })?;
    }
}
