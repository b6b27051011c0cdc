//! The backing-store contract.

use crate::command::{Command, Pipeline, Reply};
use async_trait::async_trait;
use concord_core::{RegistryError, StoreError, StoreResult};
use std::collections::HashSet;
use std::time::Duration;

/// Mutation applied by an optimistic update. Receives the current bytes and
/// returns the replacement bytes.
pub type UpdateFn<'a> = Box<dyn FnOnce(&[u8]) -> Result<Vec<u8>, RegistryError> + Send + 'a>;

/// Result of [`Store::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The key was absent; nothing was written.
    Missing,
    /// The key changed between read and write; nothing was written.
    Conflict,
    /// The mutation itself failed; nothing was written.
    Rejected(RegistryError),
    /// The replacement bytes that were committed.
    Updated(Vec<u8>),
}

/// Backing store used by every registry.
///
/// `execute` and `update` are the only required methods. The single-command
/// helpers are provided on top of `execute` so that fakes and real clients
/// share one translation path.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a pipeline in one round trip. Returns one reply per command.
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>>;

    /// Read-modify-write `key` under a watch. Never retries.
    async fn update(&self, key: &str, mutate: UpdateFn<'_>) -> StoreResult<UpdateOutcome>;

    // ========================================================================
    // SINGLE-COMMAND HELPERS
    // ========================================================================

    async fn execute_one(&self, command: Command) -> StoreResult<Reply> {
        let name = command.name();
        self.execute(Pipeline::from(command))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Command {
                command: name.to_string(),
                reason: "empty reply".to_string(),
            })
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.execute_one(Command::Get {
            key: key.to_string(),
        })
        .await?
        .into_optional_bytes("GET")
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()> {
        self.execute_one(Command::Set {
            key: key.to_string(),
            value,
            ttl,
        })
        .await?
        .into_ok("SET")
    }

    /// Returns true when the key was written.
    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<bool> {
        let n = self
            .execute_one(Command::SetNx {
                key: key.to_string(),
                value,
                ttl,
            })
            .await?
            .into_int("SETNX")?;
        Ok(n == 1)
    }

    /// Returns the number of keys removed.
    async fn del(&self, keys: &[String]) -> StoreResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.execute_one(Command::Del {
            keys: keys.to_vec(),
        })
        .await?
        .into_int("DEL")
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let n = self
            .execute_one(Command::Exists {
                key: key.to_string(),
            })
            .await?
            .into_int("EXISTS")?;
        Ok(n > 0)
    }

    /// Returns true when the key existed and its expiry was set.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let n = self
            .execute_one(Command::Expire {
                key: key.to_string(),
                ttl,
            })
            .await?
            .into_int("EXPIRE")?;
        Ok(n == 1)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.execute_one(Command::Incr {
            key: key.to_string(),
        })
        .await?
        .into_int("INCR")
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<i64> {
        self.execute_one(Command::SAdd {
            key: key.to_string(),
            members: members.to_vec(),
        })
        .await?
        .into_int("SADD")
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<i64> {
        self.execute_one(Command::SRem {
            key: key.to_string(),
            members: members.to_vec(),
        })
        .await?
        .into_int("SREM")
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.execute_one(Command::SMembers {
            key: key.to_string(),
        })
        .await?
        .into_members("SMEMBERS")
    }

    async fn srandmember(&self, key: &str) -> StoreResult<Option<String>> {
        let bytes = self
            .execute_one(Command::SRandMember {
                key: key.to_string(),
            })
            .await?
            .into_optional_bytes("SRANDMEMBER")?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<i64> {
        self.execute_one(Command::ZAdd {
            key: key.to_string(),
            score,
            member: member.to_string(),
        })
        .await?
        .into_int("ZADD")
    }

    async fn zrange_by_score(&self, key: &str, max: f64) -> StoreResult<Vec<String>> {
        self.execute_one(Command::ZRangeByScore {
            key: key.to_string(),
            max,
        })
        .await?
        .into_members("ZRANGEBYSCORE")
    }

    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.execute_one(Command::ZRem {
            key: key.to_string(),
            members: members.to_vec(),
        })
        .await?
        .into_int("ZREM")
    }

    /// One page of a cursor scan.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<(u64, Vec<String>)> {
        self.execute_one(Command::Scan {
            cursor,
            pattern: pattern.to_string(),
            count,
        })
        .await?
        .into_scan("SCAN")
    }

    /// Iterate a cursor scan until the cursor returns to zero. Keys repeated
    /// across pages are returned once, in first-seen order.
    async fn scan_all(&self, pattern: &str, count: usize) -> StoreResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, page) = self.scan(cursor, pattern, count).await?;
            for key in page {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}
