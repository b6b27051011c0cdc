//! In-memory backing store
//!
//! A faithful single-process stand-in for Redis covering the command set the
//! registries use: strings, sets, sorted sets, native expiry, cursor SCAN with
//! glob matching, and an atomic read-modify-write for optimistic updates.
//!
//! Time comes from an injected [`Clock`] plus a fast-forward offset, so expiry
//! can be exercised without sleeping. Test helpers (`raw_*`, `fail_next`,
//! `conflict_next`) simulate other instances and transport failures.

use crate::command::{Command, Pipeline, Reply};
use crate::glob::glob_match;
use crate::traits::{Store, UpdateFn, UpdateOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concord_core::{Clock, StoreError, StoreResult, SystemClock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Data {
    String(Vec<u8>),
    Set(BTreeSet<String>),
    SortedSet(BTreeMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    /// Last key returned by each open SCAN cursor.
    cursors: HashMap<u64, String>,
    next_cursor: u64,
    fast_forward: chrono::Duration,
}

/// In-memory [`Store`] implementation.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    fail_next: Arc<AtomicUsize>,
    conflict_next: Arc<AtomicUsize>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_cursor: 1,
                ..State::default()
            })),
            clock,
            fail_next: Arc::new(AtomicUsize::new(0)),
            conflict_next: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self, state: &State) -> DateTime<Utc> {
        self.clock.now() + state.fast_forward
    }

    /// Move this store's notion of time forward, expiring keys whose TTL
    /// elapses. Does not affect the injected clock.
    pub fn fast_forward(&self, by: Duration) {
        let mut state = self.lock();
        state.fast_forward += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
    }

    /// Fail the next `n` round trips with a connection error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Abort the next `n` optimistic updates as if another writer got there
    /// first.
    pub fn conflict_next(&self, n: usize) {
        self.conflict_next.store(n, Ordering::SeqCst);
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected_failure(&self, command: &str) -> StoreResult<()> {
        if Self::take_one(&self.fail_next) {
            return Err(StoreError::Connection {
                reason: format!("injected failure on {command}"),
            });
        }
        Ok(())
    }

    // ========================================================================
    // RAW ACCESS (simulates other instances writing the same keyspace)
    // ========================================================================

    /// String value stored at `key`, ignoring expired keys.
    pub fn raw_get(&self, key: &str) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let now = self.now(&state);
        purge_expired(&mut state, now);
        match state.entries.get(key).map(|e| &e.data) {
            Some(Data::String(b)) => Some(b.clone()),
            _ => None,
        }
    }

    pub fn raw_set(&self, key: &str, value: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        state.entries.insert(
            key.to_string(),
            Entry {
                data: Data::String(value.into()),
                expires_at: None,
            },
        );
    }

    pub fn raw_del(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn raw_exists(&self, key: &str) -> bool {
        let mut state = self.lock();
        let now = self.now(&state);
        purge_expired(&mut state, now);
        state.entries.contains_key(key)
    }

    /// All live keys, sorted.
    pub fn raw_keys(&self) -> Vec<String> {
        let mut state = self.lock();
        let now = self.now(&state);
        purge_expired(&mut state, now);
        state.entries.keys().cloned().collect()
    }

    /// Sorted-set score of `member`.
    pub fn raw_zscore(&self, key: &str, member: &str) -> Option<f64> {
        match self.lock().entries.get(key).map(|e| &e.data) {
            Some(Data::SortedSet(z)) => z.get(member).copied(),
            _ => None,
        }
    }

    /// Remaining native TTL of `key`.
    pub fn raw_ttl(&self, key: &str) -> Option<Duration> {
        let state = self.lock();
        let now = self.now(&state);
        let expires_at = state.entries.get(key)?.expires_at?;
        (expires_at - now).to_std().ok()
    }

    // ========================================================================
    // COMMAND EXECUTION
    // ========================================================================

    fn apply(&self, state: &mut State, command: Command) -> StoreResult<Reply> {
        let now = self.now(state);
        purge_expired(state, now);

        match command {
            Command::Get { key } => match state.entries.get(&key).map(|e| &e.data) {
                None => Ok(Reply::Nil),
                Some(Data::String(b)) => Ok(Reply::Bytes(b.clone())),
                Some(_) => Err(StoreError::WrongType { key }),
            },
            Command::Set { key, value, ttl } => {
                state.entries.insert(
                    key,
                    Entry {
                        data: Data::String(value),
                        expires_at: expiry(now, ttl),
                    },
                );
                Ok(Reply::Ok)
            }
            Command::SetNx { key, value, ttl } => {
                if state.entries.contains_key(&key) {
                    return Ok(Reply::Int(0));
                }
                state.entries.insert(
                    key,
                    Entry {
                        data: Data::String(value),
                        expires_at: expiry(now, ttl),
                    },
                );
                Ok(Reply::Int(1))
            }
            Command::Del { keys } => {
                let removed = keys
                    .iter()
                    .filter(|k| state.entries.remove(k.as_str()).is_some())
                    .count();
                Ok(Reply::Int(removed as i64))
            }
            Command::Exists { key } => Ok(Reply::Int(state.entries.contains_key(&key) as i64)),
            Command::Expire { key, ttl } => match state.entries.get_mut(&key) {
                Some(entry) => {
                    entry.expires_at = expiry(now, Some(ttl));
                    Ok(Reply::Int(1))
                }
                None => Ok(Reply::Int(0)),
            },
            Command::Incr { key } => {
                let entry = state.entries.entry(key.clone()).or_insert(Entry {
                    data: Data::String(b"0".to_vec()),
                    expires_at: None,
                });
                let Data::String(bytes) = &mut entry.data else {
                    return Err(StoreError::WrongType { key });
                };
                let current: i64 = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| StoreError::Command {
                        command: "INCR".to_string(),
                        reason: "value is not an integer or out of range".to_string(),
                    })?;
                let next = current.checked_add(1).ok_or_else(|| StoreError::Command {
                    command: "INCR".to_string(),
                    reason: "increment or decrement would overflow".to_string(),
                })?;
                *bytes = next.to_string().into_bytes();
                Ok(Reply::Int(next))
            }
            Command::SAdd { key, members } => {
                let entry = state.entries.entry(key.clone()).or_insert(Entry {
                    data: Data::Set(BTreeSet::new()),
                    expires_at: None,
                });
                let Data::Set(set) = &mut entry.data else {
                    return Err(StoreError::WrongType { key });
                };
                let added = members.into_iter().filter(|m| set.insert(m.clone())).count();
                Ok(Reply::Int(added as i64))
            }
            Command::SRem { key, members } => {
                let Some(entry) = state.entries.get_mut(&key) else {
                    return Ok(Reply::Int(0));
                };
                let Data::Set(set) = &mut entry.data else {
                    return Err(StoreError::WrongType { key });
                };
                let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
                if set.is_empty() {
                    state.entries.remove(&key);
                }
                Ok(Reply::Int(removed as i64))
            }
            Command::SMembers { key } => match state.entries.get(&key).map(|e| &e.data) {
                None => Ok(Reply::Members(Vec::new())),
                Some(Data::Set(set)) => Ok(Reply::Members(set.iter().cloned().collect())),
                Some(_) => Err(StoreError::WrongType { key }),
            },
            Command::SRandMember { key } => match state.entries.get(&key).map(|e| &e.data) {
                None => Ok(Reply::Nil),
                Some(Data::Set(set)) => Ok(set
                    .iter()
                    .next()
                    .map(|m| Reply::Bytes(m.clone().into_bytes()))
                    .unwrap_or(Reply::Nil)),
                Some(_) => Err(StoreError::WrongType { key }),
            },
            Command::ZAdd { key, score, member } => {
                let entry = state.entries.entry(key.clone()).or_insert(Entry {
                    data: Data::SortedSet(BTreeMap::new()),
                    expires_at: None,
                });
                let Data::SortedSet(zset) = &mut entry.data else {
                    return Err(StoreError::WrongType { key });
                };
                let added = zset.insert(member, score).is_none();
                Ok(Reply::Int(added as i64))
            }
            Command::ZRangeByScore { key, max } => match state.entries.get(&key).map(|e| &e.data) {
                None => Ok(Reply::Members(Vec::new())),
                Some(Data::SortedSet(zset)) => {
                    let mut hits: Vec<(&String, f64)> = zset
                        .iter()
                        .filter(|(_, score)| **score <= max)
                        .map(|(m, s)| (m, *s))
                        .collect();
                    hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                    Ok(Reply::Members(hits.into_iter().map(|(m, _)| m.clone()).collect()))
                }
                Some(_) => Err(StoreError::WrongType { key }),
            },
            Command::ZRem { key, members } => {
                let Some(entry) = state.entries.get_mut(&key) else {
                    return Ok(Reply::Int(0));
                };
                let Data::SortedSet(zset) = &mut entry.data else {
                    return Err(StoreError::WrongType { key });
                };
                let removed = members.iter().filter(|m| zset.remove(m.as_str()).is_some()).count();
                if zset.is_empty() {
                    state.entries.remove(&key);
                }
                Ok(Reply::Int(removed as i64))
            }
            Command::Scan {
                cursor,
                pattern,
                count,
            } => Ok(scan_page(state, cursor, &pattern, count)),
        }
    }
}

fn expiry(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| now + d)
}

fn purge_expired(state: &mut State, now: DateTime<Utc>) {
    state
        .entries
        .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
}

/// Examine up to `count` keys after the cursor's position, like the server
/// does, so a page may be empty while the cursor is still open. Keys present
/// for the whole iteration are returned exactly once.
fn scan_page(state: &mut State, cursor: u64, pattern: &str, count: usize) -> Reply {
    let after = if cursor == 0 {
        None
    } else {
        match state.cursors.remove(&cursor) {
            Some(last) => Some(last),
            None => {
                return Reply::Scan {
                    cursor: 0,
                    keys: Vec::new(),
                }
            }
        }
    };

    let range: Box<dyn Iterator<Item = &String>> = match &after {
        Some(last) => Box::new(
            state
                .entries
                .range::<String, _>((std::ops::Bound::Excluded(last.clone()), std::ops::Bound::Unbounded))
                .map(|(k, _)| k),
        ),
        None => Box::new(state.entries.keys()),
    };

    let mut examined = 0;
    let mut last_examined = None;
    let mut keys = Vec::new();
    let mut exhausted = true;
    for key in range {
        if examined == count.max(1) {
            exhausted = false;
            break;
        }
        examined += 1;
        if glob_match(pattern, key) {
            keys.push(key.clone());
        }
        last_examined = Some(key.clone());
    }

    if exhausted {
        return Reply::Scan { cursor: 0, keys };
    }

    let id = state.next_cursor;
    state.next_cursor += 1;
    if let Some(last) = last_examined {
        state.cursors.insert(id, last);
    }
    Reply::Scan { cursor: id, keys }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>> {
        let first = pipeline.commands().first().map(Command::name).unwrap_or("PIPELINE");
        self.injected_failure(first)?;

        let mut state = self.lock();
        pipeline
            .into_commands()
            .into_iter()
            .map(|command| self.apply(&mut state, command))
            .collect()
    }

    async fn update(&self, key: &str, mutate: UpdateFn<'_>) -> StoreResult<UpdateOutcome> {
        self.injected_failure("WATCH")?;

        let mut state = self.lock();
        let now = self.now(&state);
        purge_expired(&mut state, now);

        let current = match state.entries.get(key).map(|e| &e.data) {
            None => return Ok(UpdateOutcome::Missing),
            Some(Data::String(b)) => b.clone(),
            Some(_) => {
                return Err(StoreError::WrongType {
                    key: key.to_string(),
                })
            }
        };

        let next = match mutate(&current) {
            Ok(next) => next,
            Err(e) => return Ok(UpdateOutcome::Rejected(e)),
        };

        if Self::take_one(&self.conflict_next) {
            return Ok(UpdateOutcome::Conflict);
        }

        state.entries.insert(
            key.to_string(),
            Entry {
                data: Data::String(next.clone()),
                expires_at: None,
            },
        );
        Ok(UpdateOutcome::Updated(next))
    }
}
