//! Error types

use thiserror::Error;

/// Errors raised by a backing-store implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("connection failed: {reason}")]
    Connection { reason: String },

    #[error("{command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("{command} timed out")]
    Timeout { command: String },

    #[error("WRONGTYPE operation against key {key} holding the wrong kind of value")]
    WrongType { key: String },
}

/// Errors surfaced by the registries.
///
/// `NotFound` is a sentinel: callers compare against it with `matches!` or
/// `==`, never by message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("not found")]
    NotFound,

    #[error("decode {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("encode: {reason}")]
    Encode { reason: String },

    #[error("{op}: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("optimistic update of {key} aborted by a concurrent write")]
    Conflict { key: String },
}

impl RegistryError {
    /// Wrap a store failure with the name of the failing operation.
    pub fn transport(op: &'static str, source: StoreError) -> Self {
        Self::Transport { op, source }
    }

    /// Attach the backing key to a decode failure. Other variants pass through.
    pub fn at_key(self, key: &str) -> Self {
        match self {
            Self::Decode { reason, .. } => Self::Decode {
                key: key.to_string(),
                reason,
            },
            other => other,
        }
    }

    /// Returns true for the `NotFound` sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Precondition failures of the account session coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("already logged in")]
    AlreadyLoggedIn,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("no other service transitioning")]
    NoOtherServiceTransitioning,

    #[error("undefined service")]
    UndefinedService(String),

    #[error("invalid service key: {0}")]
    InvalidServiceKey(String),

    #[error("session registry: {0}")]
    Registry(#[from] RegistryError),
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    Missing { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    Invalid {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all concord errors.
#[derive(Debug, Clone, Error)]
pub enum ConcordError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for backing-store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type alias for concord operations.
pub type ConcordResult<T> = Result<T, ConcordError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_names_operation() {
        let err = RegistryError::transport(
            "get",
            StoreError::Connection {
                reason: "refused".to_string(),
            },
        );
        assert_eq!(err.to_string(), "get: connection failed: refused");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_is_identity_comparable() {
        let err = RegistryError::NotFound;
        assert_eq!(err, RegistryError::NotFound);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_decode_error_at_key() {
        let err = RegistryError::Decode {
            key: String::new(),
            reason: "expected value".to_string(),
        }
        .at_key("atlas:drops:k");
        assert_eq!(err.to_string(), "decode atlas:drops:k: expected value");
        assert_eq!(RegistryError::NotFound.at_key("k"), RegistryError::NotFound);
    }

    #[test]
    fn test_session_error_messages() {
        assert_eq!(SessionError::AlreadyLoggedIn.to_string(), "already logged in");
        assert_eq!(SessionError::NotLoggedIn.to_string(), "not logged in");
        assert_eq!(
            SessionError::NoOtherServiceTransitioning.to_string(),
            "no other service transitioning"
        );
        assert_eq!(
            SessionError::UndefinedService("SHOP".to_string()).to_string(),
            "undefined service"
        );
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::Invalid {
            field: "CONCORD_LOCK_TTL_SECS".to_string(),
            value: "abc".to_string(),
            reason: "must be an integer".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("CONCORD_LOCK_TTL_SECS"));
        assert!(msg.contains("abc"));
        assert!(msg.contains("must be an integer"));
    }

    #[test]
    fn test_concord_error_from_variants() {
        let store = ConcordError::from(StoreError::Timeout {
            command: "GET".to_string(),
        });
        assert!(matches!(store, ConcordError::Store(_)));

        let registry = ConcordError::from(RegistryError::NotFound);
        assert!(matches!(registry, ConcordError::Registry(_)));

        let session = ConcordError::from(SessionError::NotLoggedIn);
        assert!(matches!(session, ConcordError::Session(_)));

        let config = ConcordError::from(ConfigError::Missing {
            field: "REDIS_URL".to_string(),
        });
        assert!(matches!(config, ConcordError::Config(_)));
    }
}
