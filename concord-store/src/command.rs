//! Command and reply model
//!
//! The registries describe backing-store work as a [`Pipeline`] of
//! [`Command`]s and read back one [`Reply`] per command, in order. Both store
//! implementations translate the same model, so registry code never touches a
//! client library directly.

use concord_core::{StoreError, StoreResult};
use std::time::Duration;

/// A single backing-store command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: Vec<u8>, ttl: Option<Duration> },
    /// Set-if-absent. Replies `Int(1)` when written, `Int(0)` otherwise.
    SetNx { key: String, value: Vec<u8>, ttl: Option<Duration> },
    Del { keys: Vec<String> },
    Exists { key: String },
    Expire { key: String, ttl: Duration },
    Incr { key: String },
    SAdd { key: String, members: Vec<String> },
    SRem { key: String, members: Vec<String> },
    SMembers { key: String },
    SRandMember { key: String },
    ZAdd { key: String, score: f64, member: String },
    /// Members with score in `-inf..=max`, ascending.
    ZRangeByScore { key: String, max: f64 },
    ZRem { key: String, members: Vec<String> },
    Scan { cursor: u64, pattern: String, count: usize },
}

impl Command {
    /// Command name as the backing store knows it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::Set { .. } => "SET",
            Self::SetNx { .. } => "SETNX",
            Self::Del { .. } => "DEL",
            Self::Exists { .. } => "EXISTS",
            Self::Expire { .. } => "EXPIRE",
            Self::Incr { .. } => "INCR",
            Self::SAdd { .. } => "SADD",
            Self::SRem { .. } => "SREM",
            Self::SMembers { .. } => "SMEMBERS",
            Self::SRandMember { .. } => "SRANDMEMBER",
            Self::ZAdd { .. } => "ZADD",
            Self::ZRangeByScore { .. } => "ZRANGEBYSCORE",
            Self::ZRem { .. } => "ZREM",
            Self::Scan { .. } => "SCAN",
        }
    }
}

/// Decoded reply to one [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Bytes(Vec<u8>),
    Members(Vec<String>),
    Scan { cursor: u64, keys: Vec<String> },
}

impl Reply {
    fn unexpected(&self, command: &str) -> StoreError {
        StoreError::Command {
            command: command.to_string(),
            reason: format!("unexpected reply {:?}", self),
        }
    }

    /// `Bytes` or `Nil`.
    pub fn into_optional_bytes(self, command: &str) -> StoreResult<Option<Vec<u8>>> {
        match self {
            Self::Bytes(b) => Ok(Some(b)),
            Self::Nil => Ok(None),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_int(self, command: &str) -> StoreResult<i64> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_members(self, command: &str) -> StoreResult<Vec<String>> {
        match self {
            Self::Members(m) => Ok(m),
            Self::Nil => Ok(Vec::new()),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_scan(self, command: &str) -> StoreResult<(u64, Vec<String>)> {
        match self {
            Self::Scan { cursor, keys } => Ok((cursor, keys)),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_ok(self, command: &str) -> StoreResult<()> {
        match self {
            Self::Ok => Ok(()),
            other => Err(other.unexpected(command)),
        }
    }
}

/// An ordered batch of commands sent in one round trip.
///
/// Pipelines are not transactions: each command runs on its own and distinct
/// keys carry no mutual ordering guarantee.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Get { key: key.into() })
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.push(Command::Set {
            key: key.into(),
            value,
            ttl: None,
        })
    }

    pub fn set_ex(&mut self, key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> &mut Self {
        self.push(Command::Set {
            key: key.into(),
            value,
            ttl: Some(ttl),
        })
    }

    pub fn set_nx(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.push(Command::SetNx {
            key: key.into(),
            value,
            ttl: None,
        })
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Del {
            keys: vec![key.into()],
        })
    }

    pub fn incr(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Incr { key: key.into() })
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SAdd {
            key: key.into(),
            members: vec![member.into()],
        })
    }

    pub fn zadd(&mut self, key: impl Into<String>, score: f64, member: impl Into<String>) -> &mut Self {
        self.push(Command::ZAdd {
            key: key.into(),
            score,
            member: member.into(),
        })
    }

    pub fn zrem(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.push(Command::ZRem {
            key: key.into(),
            members,
        })
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

impl From<Command> for Pipeline {
    fn from(command: Command) -> Self {
        Self {
            commands: vec![command],
        }
    }
}

impl FromIterator<Command> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_preserves_insertion_order() {
        let mut pipe = Pipeline::new();
        pipe.set("a", b"1".to_vec()).del("b").get("a");

        let names: Vec<_> = pipe.commands().iter().map(Command::name).collect();
        assert_eq!(names, vec!["SET", "DEL", "GET"]);
        assert_eq!(pipe.len(), 3);
        assert!(!pipe.is_empty());
    }

    #[test]
    fn test_reply_conversions() {
        assert_eq!(
            Reply::Bytes(b"x".to_vec()).into_optional_bytes("GET").unwrap(),
            Some(b"x".to_vec())
        );
        assert_eq!(Reply::Nil.into_optional_bytes("GET").unwrap(), None);
        assert_eq!(Reply::Int(3).into_int("INCR").unwrap(), 3);
        assert_eq!(Reply::Nil.into_members("SMEMBERS").unwrap(), Vec::<String>::new());
        assert!(Reply::Ok.into_int("INCR").is_err());
    }

    #[test]
    fn test_unexpected_reply_names_command() {
        let err = Reply::Ok.into_scan("SCAN").unwrap_err();
        assert!(matches!(err, StoreError::Command { ref command, .. } if command == "SCAN"));
    }
}
