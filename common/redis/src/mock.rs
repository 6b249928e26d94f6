use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::{Client, CustomRedisError, RedisErrorKind};

/// In-memory stand-in for redis.
///
/// Clones share the same keyspace, so a test can hand one clone to the code
/// under test and keep another to seed values, inspect writes, or cut the
/// "network" with [`MockRedisClient::set_failure`]. Expiry runs on the tokio
/// clock, so `tokio::time::pause()` and `advance()` drive TTLs deterministically.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    state: Arc<Mutex<MockState>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

#[derive(Default)]
struct MockState {
    entries: BTreeMap<String, MockEntry>,
    get_ret: HashMap<String, Result<String, CustomRedisError>>,
    exists_ret: HashMap<String, bool>,
    op_failures: HashMap<String, CustomRedisError>,
    failure: Option<CustomRedisError>,
}

struct MockEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

impl MockState {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }
}

#[derive(Debug, Clone)]
pub enum MockRedisValue {
    None,
    String(String),
    U64(u64),
    Scan { cursor: u64, count: usize },
}

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key with a raw value.
    pub fn with_value(&mut self, key: &str, value: &str) -> Self {
        lock(&self.state).entries.insert(
            key.to_owned(),
            MockEntry {
                value: value.to_owned(),
                expires_at: None,
            },
        );
        self.clone()
    }

    /// Force the result of `get` for one key, e.g. a `ParseError` for bytes that
    /// are not valid UTF-8. Other commands still see the regular keyspace.
    pub fn get_ret(&mut self, key: &str, ret: Result<String, CustomRedisError>) -> Self {
        lock(&self.state).get_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    /// Force the answer of `exists` for one key, e.g. to let a writer race in
    /// between `exists` and `set_nx`.
    pub fn exists_ret(&mut self, key: &str, ret: bool) -> Self {
        lock(&self.state).exists_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    /// Make every call of one command (`"get"`, `"incr"`, ...) fail with `err`.
    pub fn fail_op(&mut self, op: &str, err: CustomRedisError) -> Self {
        lock(&self.state).op_failures.insert(op.to_owned(), err);
        self.clone()
    }

    pub fn clear_op_failure(&self, op: &str) {
        lock(&self.state).op_failures.remove(op);
    }

    /// Make every command fail with `err` until called again with `None`.
    pub fn set_failure(&self, err: Option<CustomRedisError>) {
        lock(&self.state).failure = err;
    }

    /// Cut the connection: every command fails as an I/O error.
    pub fn go_offline(&self) {
        self.set_failure(Some(CustomRedisError::from_redis_kind(
            RedisErrorKind::IoError,
            "Connection refused",
        )));
    }

    pub fn go_online(&self) {
        self.set_failure(None);
    }

    /// Peek at a stored value without recording a call.
    pub fn value(&self, key: &str) -> Option<String> {
        let mut state = lock(&self.state);
        state.purge_expired();
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Remaining time to live of a key, if it has one.
    pub fn expiry(&self, key: &str) -> Option<Duration> {
        let mut state = lock(&self.state);
        state.purge_expired();
        let now = Instant::now();
        state
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Record the call, then hand back the keyspace unless a failure is injected.
    fn begin(
        &self,
        op: &str,
        key: &str,
        value: MockRedisValue,
    ) -> Result<MutexGuard<'_, MockState>, CustomRedisError> {
        lock(&self.calls).push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });

        let mut state = lock(&self.state);
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        if let Some(err) = state.op_failures.get(op) {
            return Err(err.clone());
        }
        state.purge_expired();
        Ok(state)
    }
}

/// Redis-style glob matching, limited to `*` and `?`.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p).copied() {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
            }
            Some('?') => {
                p += 1;
                c += 1;
            }
            Some(ch) if ch == candidate[c] => {
                p += 1;
                c += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    c = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|ch| *ch == '*')
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, key: String) -> Result<String, CustomRedisError> {
        let state = self.begin("get", &key, MockRedisValue::None)?;

        if let Some(ret) = state.get_ret.get(&key) {
            return ret.clone();
        }

        match state.entries.get(&key) {
            Some(entry) => Ok(entry.value.clone()),
            None => Err(CustomRedisError::NotFound),
        }
    }

    async fn set(&self, key: String, value: String) -> Result<(), CustomRedisError> {
        let mut state = self.begin("set", &key, MockRedisValue::String(value.clone()))?;

        // SET discards any previous TTL
        state.entries.insert(
            key,
            MockEntry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: String, value: String) -> Result<bool, CustomRedisError> {
        let mut state = self.begin("set_nx", &key, MockRedisValue::String(value.clone()))?;

        if state.entries.contains_key(&key) {
            return Ok(false);
        }
        state.entries.insert(
            key,
            MockEntry {
                value,
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn exists(&self, key: String) -> Result<bool, CustomRedisError> {
        let state = self.begin("exists", &key, MockRedisValue::None)?;
        if let Some(ret) = state.exists_ret.get(&key) {
            return Ok(*ret);
        }
        Ok(state.entries.contains_key(&key))
    }

    async fn incr(&self, key: String) -> Result<i64, CustomRedisError> {
        let mut state = self.begin("incr", &key, MockRedisValue::None)?;

        let entry = state.entries.entry(key).or_insert(MockEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry.value.parse().map_err(|_| {
            CustomRedisError::from_redis_kind(
                RedisErrorKind::ResponseError,
                "value is not an integer or out of range",
            )
        })?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: String, seconds: u64) -> Result<bool, CustomRedisError> {
        let mut state = self.begin("expire", &key, MockRedisValue::U64(seconds))?;

        match state.entries.get_mut(&key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: String) -> Result<i64, CustomRedisError> {
        let state = self.begin("ttl", &key, MockRedisValue::None)?;
        let now = Instant::now();

        Ok(match state.entries.get(&key) {
            None => -2,
            Some(MockEntry {
                expires_at: None, ..
            }) => -1,
            Some(MockEntry {
                expires_at: Some(at),
                ..
            }) => i64::try_from(at.saturating_duration_since(now).as_secs()).unwrap_or(i64::MAX),
        })
    }

    async fn scan(
        &self,
        pattern: String,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), CustomRedisError> {
        let state = self.begin("scan", &pattern, MockRedisValue::Scan { cursor, count })?;

        // The cursor is an offset into the ordered keyspace; good enough for a
        // keyspace that does not change shape mid-iteration.
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        let page_size = count.max(1);
        let keys: Vec<&String> = state.entries.keys().collect();

        let end = start.saturating_add(page_size).min(keys.len());
        let page = keys
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .filter(|key| glob_match(&pattern, key))
            .map(|key| (*key).clone())
            .collect();

        let next_cursor = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next_cursor, page))
    }
}
