//! Redis implementation of [`Store`]
//!
//! Pipelines go through a shared [`ConnectionManager`], which reconnects on
//! its own. Optimistic updates need connection-local WATCH state, so each
//! update opens a dedicated connection and drops it when done. Every round
//! trip is bounded by the configured command timeout.

use crate::command::{Command, Pipeline, Reply};
use crate::traits::{Store, UpdateFn, UpdateOutcome};
use async_trait::async_trait;
use concord_core::{RedisConfig, StoreError, StoreResult};
use redis::aio::ConnectionManager;
use redis::{FromRedisValue, RedisError, Value};
use std::future::Future;
use std::time::Duration;

/// [`Store`] backed by a Redis endpoint.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect using `config`. Fails fast if the endpoint is unreachable.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.connection_url()).map_err(connection_error)?;
        let manager = bounded(
            config.command_timeout,
            "CONNECT",
            ConnectionManager::new(client.clone()),
        )
        .await?;

        tracing::info!(
            command_timeout_ms = config.command_timeout.as_millis() as u64,
            "Connected to backing store"
        );

        Ok(Self {
            client,
            manager,
            command_timeout: config.command_timeout,
        })
    }

    /// Connect using [`RedisConfig::from_env`].
    pub async fn from_env() -> StoreResult<Self> {
        Self::connect(&RedisConfig::from_env()).await
    }
}

async fn bounded<T, F>(timeout: Duration, command: &str, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| command_error(command, e)),
        Err(_) => Err(StoreError::Timeout {
            command: command.to_string(),
        }),
    }
}

fn connection_error(e: RedisError) -> StoreError {
    StoreError::Connection {
        reason: e.to_string(),
    }
}

fn command_error(command: &str, e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        return connection_error(e);
    }
    if e.code() == Some("WRONGTYPE") {
        return StoreError::WrongType {
            key: e.detail().unwrap_or_default().to_string(),
        };
    }
    StoreError::Command {
        command: command.to_string(),
        reason: e.to_string(),
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn append(pipe: &mut redis::Pipeline, command: &Command) {
    match command {
        Command::Get { key } => {
            pipe.cmd("GET").arg(key);
        }
        Command::Set { key, value, ttl } => {
            let cmd = pipe.cmd("SET").arg(key).arg(value.as_slice());
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(millis(*ttl));
            }
        }
        Command::SetNx { key, value, ttl } => {
            let cmd = pipe.cmd("SET").arg(key).arg(value.as_slice()).arg("NX");
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(millis(*ttl));
            }
        }
        Command::Del { keys } => {
            pipe.cmd("DEL").arg(keys);
        }
        Command::Exists { key } => {
            pipe.cmd("EXISTS").arg(key);
        }
        Command::Expire { key, ttl } => {
            pipe.cmd("PEXPIRE").arg(key).arg(millis(*ttl));
        }
        Command::Incr { key } => {
            pipe.cmd("INCR").arg(key);
        }
        Command::SAdd { key, members } => {
            pipe.cmd("SADD").arg(key).arg(members);
        }
        Command::SRem { key, members } => {
            pipe.cmd("SREM").arg(key).arg(members);
        }
        Command::SMembers { key } => {
            pipe.cmd("SMEMBERS").arg(key);
        }
        Command::SRandMember { key } => {
            pipe.cmd("SRANDMEMBER").arg(key);
        }
        Command::ZAdd { key, score, member } => {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
        }
        Command::ZRangeByScore { key, max } => {
            pipe.cmd("ZRANGEBYSCORE").arg(key).arg("-inf").arg(*max);
        }
        Command::ZRem { key, members } => {
            pipe.cmd("ZREM").arg(key).arg(members);
        }
        Command::Scan {
            cursor,
            pattern,
            count,
        } => {
            pipe.cmd("SCAN")
                .arg(*cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(*count);
        }
    }
}

fn parse<T: FromRedisValue>(command: &str, value: &Value) -> StoreResult<T> {
    redis::from_redis_value(value).map_err(|e| command_error(command, e))
}

fn convert(command: &Command, value: Value) -> StoreResult<Reply> {
    let name = command.name();
    match command {
        Command::Get { .. } | Command::SRandMember { .. } => {
            Ok(match parse::<Option<Vec<u8>>>(name, &value)? {
                Some(b) => Reply::Bytes(b),
                None => Reply::Nil,
            })
        }
        Command::Set { .. } => Ok(Reply::Ok),
        Command::SetNx { .. } => Ok(Reply::Int(match value {
            Value::Nil => 0,
            _ => 1,
        })),
        Command::Del { .. }
        | Command::Exists { .. }
        | Command::Expire { .. }
        | Command::Incr { .. }
        | Command::SAdd { .. }
        | Command::SRem { .. }
        | Command::ZAdd { .. }
        | Command::ZRem { .. } => Ok(Reply::Int(parse::<i64>(name, &value)?)),
        Command::SMembers { .. } | Command::ZRangeByScore { .. } => {
            Ok(Reply::Members(parse::<Vec<String>>(name, &value)?))
        }
        Command::Scan { .. } => {
            let (cursor, keys) = parse::<(u64, Vec<String>)>(name, &value)?;
            Ok(Reply::Scan { cursor, keys })
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>> {
        if pipeline.is_empty() {
            return Ok(Vec::new());
        }
        let first = pipeline.commands()[0].name();

        let mut pipe = redis::pipe();
        for command in pipeline.commands() {
            append(&mut pipe, command);
        }

        let mut conn = self.manager.clone();
        let values: Vec<Value> =
            bounded(self.command_timeout, first, pipe.query_async(&mut conn)).await?;

        if values.len() != pipeline.len() {
            return Err(StoreError::Command {
                command: first.to_string(),
                reason: format!("expected {} replies, got {}", pipeline.len(), values.len()),
            });
        }

        pipeline
            .commands()
            .iter()
            .zip(values)
            .map(|(command, value)| convert(command, value))
            .collect()
    }

    async fn update(&self, key: &str, mutate: UpdateFn<'_>) -> StoreResult<UpdateOutcome> {
        let attempt = async move {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(connection_error)?;

            let _: () = redis::cmd("WATCH")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("WATCH", e))?;

            let current: Option<Vec<u8>> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("GET", e))?;

            let Some(current) = current else {
                let _: () = redis::cmd("UNWATCH")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| command_error("UNWATCH", e))?;
                return Ok(UpdateOutcome::Missing);
            };

            let next = match mutate(&current) {
                Ok(next) => next,
                Err(e) => {
                    let _: () = redis::cmd("UNWATCH")
                        .query_async(&mut conn)
                        .await
                        .map_err(|e| command_error("UNWATCH", e))?;
                    return Ok(UpdateOutcome::Rejected(e));
                }
            };

            let committed: Option<()> = redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(key)
                .arg(next.as_slice())
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("EXEC", e))?;

            Ok(match committed {
                Some(()) => UpdateOutcome::Updated(next),
                None => UpdateOutcome::Conflict,
            })
        };

        match tokio::time::timeout(self.command_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                command: "WATCH".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_nx_reply_maps_nil_to_zero() {
        let cmd = Command::SetNx {
            key: "k".to_string(),
            value: b"v".to_vec(),
            ttl: None,
        };
        assert_eq!(convert(&cmd, Value::Nil).unwrap(), Reply::Int(0));
        assert_eq!(convert(&cmd, Value::Okay).unwrap(), Reply::Int(1));
    }

    #[test]
    fn test_get_reply_conversion() {
        let cmd = Command::Get {
            key: "k".to_string(),
        };
        assert_eq!(convert(&cmd, Value::Nil).unwrap(), Reply::Nil);
        assert_eq!(
            convert(&cmd, Value::BulkString(b"\"v1\"".to_vec())).unwrap(),
            Reply::Bytes(b"\"v1\"".to_vec())
        );
    }

    #[test]
    fn test_scan_reply_conversion() {
        let cmd = Command::Scan {
            cursor: 0,
            pattern: "atlas:*".to_string(),
            count: 100,
        };
        let value = Value::Array(vec![
            Value::BulkString(b"17".to_vec()),
            Value::Array(vec![
                Value::BulkString(b"atlas:a".to_vec()),
                Value::BulkString(b"atlas:b".to_vec()),
            ]),
        ]);
        assert_eq!(
            convert(&cmd, value).unwrap(),
            Reply::Scan {
                cursor: 17,
                keys: vec!["atlas:a".to_string(), "atlas:b".to_string()],
            }
        );
    }

    #[test]
    fn test_integer_reply_type_mismatch_is_command_error() {
        let cmd = Command::Incr {
            key: "k".to_string(),
        };
        assert_eq!(convert(&cmd, Value::Int(5)).unwrap(), Reply::Int(5));
        assert!(matches!(
            convert(&cmd, Value::Array(vec![])),
            Err(StoreError::Command { .. })
        ));
    }

    #[test]
    fn test_ttl_rounds_up_to_one_millisecond() {
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(30)), 30_000);
    }
}
