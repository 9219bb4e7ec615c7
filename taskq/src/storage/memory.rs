//! In-process store
//!
//! Mirrors the subset of Redis semantics the engine relies on: string, list,
//! hash and sorted-set values, millisecond key expiry, WRONGTYPE errors and
//! empty collections disappearing. Every operation, scripts included, runs
//! under a single lock, which gives scripts the same atomicity they have on
//! a Redis server.

use super::{Reply, Script, Store, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
    ZSet(HashMap<String, f64>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType(key.to_string())
}

/// Members of a sorted set ordered by score, ties by member
fn sorted_members(zset: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
}

impl State {
    fn purge(&mut self, key: &str) {
        let now = Instant::now();
        if self.entries.get(key).map_or(false, |e| e.is_expired(now)) {
            self.entries.remove(key);
        }
    }

    fn exists(&mut self, key: &str) -> bool {
        self.purge(key);
        self.entries.contains_key(key)
    }

    fn value(&mut self, key: &str) -> Option<&mut Value> {
        self.purge(key);
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    fn value_or_insert(&mut self, key: &str, init: fn() -> Value) -> &mut Value {
        self.purge(key);
        &mut self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(init()))
            .value
    }

    /// Drop a collection key left empty by a removal
    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).map_or(false, |e| e.value.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.purge(key);
        self.entries.remove(key).is_some()
    }

    fn set_string(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut entry = Entry::new(Value::Str(value.to_string()));
        entry.expires_at = ttl.map(|t| Instant::now() + t);
        self.entries.insert(key.to_string(), entry);
    }

    fn check_list(&mut self, key: &str) -> StoreResult<()> {
        match self.value(key) {
            None | Some(Value::List(_)) => Ok(()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn check_hash(&mut self, key: &str) -> StoreResult<()> {
        match self.value(key) {
            None | Some(Value::Hash(_)) => Ok(()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn check_zset(&mut self, key: &str) -> StoreResult<()> {
        match self.value(key) {
            None | Some(Value::ZSet(_)) => Ok(()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list(&mut self, key: &str) -> StoreResult<Option<&mut VecDeque<String>>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list_or_create(&mut self, key: &str) -> StoreResult<&mut VecDeque<String>> {
        match self.value_or_insert(key, || Value::List(VecDeque::new())) {
            Value::List(list) => Ok(list),
            _ => Err(wrong_type(key)),
        }
    }

    fn hash(&mut self, key: &str) -> StoreResult<Option<&mut HashMap<String, String>>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::Hash(hash)) => Ok(Some(hash)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash_or_create(&mut self, key: &str) -> StoreResult<&mut HashMap<String, String>> {
        match self.value_or_insert(key, || Value::Hash(HashMap::new())) {
            Value::Hash(hash) => Ok(hash),
            _ => Err(wrong_type(key)),
        }
    }

    fn zset(&mut self, key: &str) -> StoreResult<Option<&mut HashMap<String, f64>>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::ZSet(zset)) => Ok(Some(zset)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn zset_or_create(&mut self, key: &str) -> StoreResult<&mut HashMap<String, f64>> {
        match self.value_or_insert(key, || Value::ZSet(HashMap::new())) {
            Value::ZSet(zset) => Ok(zset),
            _ => Err(wrong_type(key)),
        }
    }

    fn rpop(&mut self, key: &str) -> StoreResult<Option<String>> {
        let popped = match self.list(key)? {
            Some(list) => list.pop_back(),
            None => None,
        };
        self.drop_if_empty(key);
        Ok(popped)
    }

    fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.hash(key)?.and_then(|hash| hash.get(field).cloned()))
    }

    fn hincrby(&mut self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let hash = self.hash_or_create(key)?;
        let current = match hash.get(field) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::UnexpectedReply("hash value is not an integer".to_string()))?,
            None => 0,
        };
        let next = current.saturating_add(delta);
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn take_record(&mut self, record_key: &str, field: &str) -> StoreResult<Option<String>> {
        let data = self.hget(record_key, field)?;
        if data.is_some() {
            self.remove(record_key);
        }
        Ok(data)
    }

    fn run(&mut self, script: Script, keys: &[String], args: &[String]) -> StoreResult<(Reply, bool)> {
        use super::keys::DATA_FIELD;

        let key = |i: usize| -> StoreResult<&str> {
            keys.get(i)
                .map(String::as_str)
                .ok_or_else(|| StoreError::UnexpectedReply(format!("{} expects KEYS[{}]", script.name(), i + 1)))
        };
        let arg = |i: usize| -> StoreResult<&str> {
            args.get(i)
                .map(String::as_str)
                .ok_or_else(|| StoreError::UnexpectedReply(format!("{} expects ARGV[{}]", script.name(), i + 1)))
        };
        let number = |i: usize| -> StoreResult<f64> {
            let raw = arg(i)?;
            raw.parse::<f64>()
                .map_err(|_| StoreError::UnexpectedReply(format!("ARGV[{}] is not a number: {}", i + 1, raw)))
        };

        let mut pushed = false;
        let reply = match script {
            Script::Enqueue => {
                let (record, list) = (key(0)?, key(1)?);
                if self.exists(record) {
                    Reply::Int(0)
                } else {
                    self.check_list(list)?;
                    self.hash_or_create(record)?
                        .insert(DATA_FIELD.to_string(), arg(0)?.to_string());
                    self.list_or_create(list)?.push_front(arg(1)?.to_string());
                    pushed = true;
                    Reply::Int(1)
                }
            }
            Script::EnqueueDedup => {
                let (record, list, dedup) = (key(0)?, key(1)?, key(2)?);
                if self.exists(record) {
                    Reply::Int(0)
                } else if self.exists(dedup) {
                    Reply::Int(-1)
                } else {
                    let ttl = Duration::from_millis(number(2)?.max(1.0) as u64);
                    self.check_list(list)?;
                    self.hash_or_create(record)?
                        .insert(DATA_FIELD.to_string(), arg(0)?.to_string());
                    self.list_or_create(list)?.push_front(arg(1)?.to_string());
                    self.set_string(dedup, arg(1)?, Some(ttl));
                    pushed = true;
                    Reply::Int(1)
                }
            }
            Script::EnqueueScheduled => {
                let (record, zset) = (key(0)?, key(1)?);
                if self.exists(record) {
                    Reply::Int(0)
                } else {
                    let score = number(2)?;
                    self.check_zset(zset)?;
                    self.hash_or_create(record)?
                        .insert(DATA_FIELD.to_string(), arg(0)?.to_string());
                    self.zset_or_create(zset)?.insert(arg(1)?.to_string(), score);
                    Reply::Int(1)
                }
            }
            Script::TakeRecord => match self.take_record(key(0)?, DATA_FIELD)? {
                Some(data) => Reply::Bulk(data),
                None => Reply::Nil,
            },
            Script::PopDue => {
                let zset_key = key(0)?;
                let max_score = number(0)?;
                let prefix = arg(1)?;
                let due = match self.zset(zset_key)? {
                    Some(zset) => sorted_members(zset)
                        .into_iter()
                        .next()
                        .filter(|(_, score)| *score <= max_score)
                        .map(|(member, _)| {
                            zset.remove(&member);
                            member
                        }),
                    None => None,
                };
                self.drop_if_empty(zset_key);
                match due {
                    None => Reply::Nil,
                    Some(id) => {
                        let record = format!("{}{}", prefix, id);
                        match self.take_record(&record, DATA_FIELD)? {
                            Some(data) => Reply::Array(vec![Reply::Bulk(id), Reply::Bulk(data)]),
                            None => Reply::Array(vec![Reply::Bulk(id)]),
                        }
                    }
                }
            }
            Script::GroupAdd => {
                let (group, timer, record) = (key(0)?, key(1)?, key(2)?);
                if self.exists(record) {
                    Reply::Int(0)
                } else {
                    let max_batch = number(2)?;
                    let max_wait = Duration::from_millis(number(3)?.max(1.0) as u64);
                    self.check_list(group)?;
                    self.hash_or_create(record)?
                        .insert(DATA_FIELD.to_string(), arg(1)?.to_string());
                    let members = self.list_or_create(group)?;
                    members.push_back(arg(0)?.to_string());
                    let size = members.len();
                    if size == 1 {
                        self.set_string(timer, "1", Some(max_wait));
                    }
                    if size as f64 >= max_batch {
                        Reply::Int(2)
                    } else {
                        Reply::Int(1)
                    }
                }
            }
            Script::GroupDrain => {
                let (group, timer) = (key(0)?, key(1)?);
                let ids: Vec<Reply> = match self.list(group)? {
                    Some(list) => list.iter().cloned().map(Reply::Bulk).collect(),
                    None => Vec::new(),
                };
                self.remove(group);
                self.remove(timer);
                Reply::Array(ids)
            }
            Script::IncrementCredits => {
                let credits = key(0)?;
                if args.len() % 2 != 0 {
                    return Err(StoreError::UnexpectedReply(
                        "increment_credits expects field/increment pairs".to_string(),
                    ));
                }
                self.check_hash(credits)?;
                let mut values = Vec::with_capacity(args.len() / 2);
                for pair in args.chunks(2) {
                    let delta = pair[1].parse::<i64>().map_err(|_| {
                        StoreError::UnexpectedReply(format!("increment is not an integer: {}", pair[1]))
                    })?;
                    values.push(Reply::Int(self.hincrby(credits, &pair[0], delta)?));
                }
                Reply::Array(values)
            }
        };
        Ok((reply, pushed))
    }
}

struct Inner {
    state: Mutex<State>,
    pushed: Notify,
    offline: AtomicBool,
}

/// Store kept in process memory
///
/// Cloning is cheap and clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("offline", &self.inner.offline.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                pushed: Notify::new(),
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`] until
    /// set back to `false`
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let mut state = self.lock();
        let now = Instant::now();
        state.entries.retain(|_, e| !e.is_expired(now));
        state.entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(self.lock())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn eval(&self, script: Script, keys: Vec<String>, args: Vec<String>) -> StoreResult<Reply> {
        let (reply, pushed) = self.state()?.run(script, &keys, &args)?;
        if pushed {
            self.inner.pushed.notify_waiters();
        }
        Ok(reply)
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let len = {
            let mut state = self.state()?;
            let list = state.list_or_create(key)?;
            list.push_front(value.to_string());
            list.len() as u64
        };
        self.inner.pushed.notify_waiters();
        Ok(len)
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        self.state()?.rpop(key)
    }

    async fn brpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = self.state()?.rpop(key)?;
            if popped.is_some() {
                return Ok(popped);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        Ok(self.state()?.list(key)?.map_or(0, |l| l.len() as u64))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let mut state = self.state()?;
        let list = match state.list(key)? {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        let len = list.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.state()?.zset_or_create(key)?.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<(String, f64)>> {
        let mut state = self.state()?;
        let members = match state.zset(key)? {
            Some(zset) => sorted_members(zset),
            None => return Ok(Vec::new()),
        };
        Ok(members
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn zrevrange(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut state = self.state()?;
        let members = match state.zset(key)? {
            Some(zset) => sorted_members(zset),
            None => return Ok(Vec::new()),
        };
        Ok(members.into_iter().rev().map(|(member, _)| member).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut state = self.state()?;
        let removed = match state.zset(key)? {
            Some(zset) => zset.remove(member).is_some(),
            None => false,
        };
        state.drop_if_empty(key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        Ok(self.state()?.zset(key)?.map_or(0, |z| z.len() as u64))
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.state()?.hget(key, field)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.state()?
            .hash_or_create(key)?
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self.state()?.hash(key)?.cloned().unwrap_or_default())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.state()?.hincrby(key, field, delta)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.state()?.exists(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut state = self.state()?;
        state.purge(key);
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        let mut state = self.state()?;
        Ok(keys.iter().filter(|key| state.remove(key)).count() as u64)
    }
}
