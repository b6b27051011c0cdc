//! Session identities and per-account state.

use concord_core::{SessionError, Tenant};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stored session map: `"<session-uuid>:<ROLE>"` to its state.
pub type SessionMap = HashMap<String, StateValue>;

/// One account within one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey {
    pub tenant: Tenant,
    pub account_id: u32,
}

impl AccountKey {
    pub fn new(tenant: Tenant, account_id: u32) -> Self {
        Self { tenant, account_id }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.account_id)
    }
}

/// Role of the service holding a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    Login,
    Channel,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Login => "LOGIN",
            Service::Channel => "CHANNEL",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOGIN" => Ok(Service::Login),
            "CHANNEL" => Ok(Service::Channel),
            other => Err(SessionError::UndefinedService(other.to_string())),
        }
    }
}

/// A session held by one service on behalf of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub session_id: Uuid,
    pub service: Service,
}

impl ServiceKey {
    pub fn new(session_id: Uuid, service: Service) -> Self {
        Self { session_id, service }
    }

    pub fn login(session_id: Uuid) -> Self {
        Self::new(session_id, Service::Login)
    }

    pub fn channel(session_id: Uuid) -> Self {
        Self::new(session_id, Service::Channel)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.service)
    }
}

impl FromStr for ServiceKey {
    type Err = SessionError;

    /// Splits on the last `:` so the role never absorbs part of the id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, role) = s
            .rsplit_once(':')
            .ok_or_else(|| SessionError::InvalidServiceKey(s.to_string()))?;
        let session_id =
            Uuid::parse_str(id).map_err(|_| SessionError::InvalidServiceKey(s.to_string()))?;
        Ok(Self {
            session_id,
            service: role.parse()?,
        })
    }
}

/// Session state. Stored as its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum State {
    NotLoggedIn = 0,
    LoggedIn = 1,
    Transition = 2,
}

impl State {
    pub fn is_active(self) -> bool {
        self != State::NotLoggedIn
    }
}

impl From<State> for u8 {
    fn from(state: State) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for State {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(State::NotLoggedIn),
            1 => Ok(State::LoggedIn),
            2 => Ok(State::Transition),
            other => Err(format!("unknown session state {other}")),
        }
    }
}

/// A state plus the instant it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateValue {
    pub state: State,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl StateValue {
    pub fn new(state: State, updated_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self { state, updated_at }
    }
}

/// Smallest non-zero state in `map`, or `NotLoggedIn`.
pub fn maximal_state(map: &SessionMap) -> State {
    map.values()
        .map(|v| v.state)
        .filter(|s| s.is_active())
        .min()
        .unwrap_or(State::NotLoggedIn)
}
