//! Snapshot and evaluation cache with a sticky in-process fallback.
//!
//! The repository caches two independent artifact kinds, each with its own
//! TTL: scope *snapshots* (a serialized project + environment + flag bundle)
//! and *evaluation results* keyed by flag signature and context hash. Because
//! keys are content-addressed, a flag edit produces a disjoint key space and
//! stale entries simply age out; nothing is rewritten in place.
//!
//! The repository is a two-state machine. It starts `Connected` and talks to
//! the remote store through [`RemoteStore`]. The first transport or encoding
//! failure flips it to `Degraded` for the rest of the instance's life, after
//! which every operation is served by an in-process store with the same key
//! space and TTL semantics. The transition is deliberately one-way: retrying
//! a dead connection on every request would add its timeout to every caller.
//! A fresh instance (e.g., after a process restart) starts `Connected` again.
//!
//! Cache unavailability never changes evaluation correctness; callers always
//! hold an authoritative result and the cache is best-effort.
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CacheConfig, ConnectionConfig};
use crate::error::{EncodingError, TransportError};
use crate::eval::EvaluationResult;
use crate::flags::FlagDefinition;
use crate::invalidation::InvalidationMessage;
use crate::wire::RespClient;

const SNAPSHOT_PREFIX: &str = "flagcache:snapshot";
const EVALUATION_PREFIX: &str = "flagcache:eval";
const INDEX_PREFIX: &str = "flagcache:index";

/// A `(project, environment)` pair: the unit of snapshot caching and bulk
/// eviction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    #[allow(missing_docs)]
    pub project_key: String,
    #[allow(missing_docs)]
    pub environment_key: String,
}

impl Scope {
    #[allow(missing_docs)]
    pub fn new(project_key: impl Into<String>, environment_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            environment_key: environment_key.into(),
        }
    }
}

/// Composite key for one cached evaluation result.
///
/// Embedding the flag signature means editing a flag orphans its entries
/// without an active purge; embedding the context hash keeps results per
/// normalized identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationKey {
    #[allow(missing_docs)]
    pub scope: Scope,
    #[allow(missing_docs)]
    pub flag_key: String,
    /// Output of [`crate::signature::flag_signature`].
    pub signature: String,
    /// Output of [`crate::context::EvaluationContext::context_hash`].
    pub context_hash: String,
}

/// Cached bundle of a scope's records, for retrieval without hitting the
/// persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Project record, opaque to the cache.
    pub project: serde_json::Value,
    /// Environment record, opaque to the cache.
    pub environment: serde_json::Value,
    /// Flag definitions for the scope.
    pub flags: Vec<FlagDefinition>,
}

/// Time source for TTL bookkeeping. Injectable so expiry is testable.
pub trait Clock: Send + Sync {
    #[allow(missing_docs)]
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Remote side of the cache: the operations the repository needs from the
/// key-value store. [`RespClient`] is the production implementation; tests
/// inject fakes.
pub trait RemoteStore: Send {
    #[allow(missing_docs)]
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, TransportError>;
    #[allow(missing_docs)]
    fn set_ex(&mut self, key: &str, ttl_seconds: u64, value: &[u8]) -> Result<(), TransportError>;
    #[allow(missing_docs)]
    fn del(&mut self, keys: &[String]) -> Result<(), TransportError>;
    #[allow(missing_docs)]
    fn sadd(&mut self, key: &str, member: &str) -> Result<(), TransportError>;
    #[allow(missing_docs)]
    fn smembers(&mut self, key: &str) -> Result<Vec<String>, TransportError>;
    #[allow(missing_docs)]
    fn expire(&mut self, key: &str, ttl_seconds: u64) -> Result<(), TransportError>;
    #[allow(missing_docs)]
    fn publish(&mut self, channel: &str, message: &[u8]) -> Result<(), TransportError>;
}

enum Mode {
    Connected(Box<dyn RemoteStore>),
    Degraded,
}

/// Outcome of attempting a remote operation.
enum Remote<T> {
    /// The remote store answered.
    Value(T),
    /// Degraded (either already, or by this very operation); use the
    /// in-process store.
    Offline,
}

struct RepositoryState {
    mode: Mode,
    local: MemoryStore,
}

/// The two-tier cache. See the module docs for the overall contract.
///
/// All operations are synchronous and best-effort: they may block on network
/// I/O up to the configured timeout while `Connected`, and they never fail
/// from the caller's perspective.
pub struct CacheRepository {
    state: Mutex<RepositoryState>,
    config: CacheConfig,
    clock: Box<dyn Clock>,
}

impl CacheRepository {
    /// Repository backed by a TCP wire-protocol client.
    pub fn new(connection: ConnectionConfig, config: CacheConfig) -> Self {
        Self::with_store(Box::new(RespClient::new(connection)), config)
    }

    /// Repository backed by an arbitrary remote store implementation.
    pub fn with_store(store: Box<dyn RemoteStore>, config: CacheConfig) -> Self {
        Self::with_store_and_clock(store, config, Box::new(SystemClock))
    }

    /// Full-control constructor; the clock drives fallback TTL bookkeeping.
    pub fn with_store_and_clock(
        store: Box<dyn RemoteStore>,
        config: CacheConfig,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            state: Mutex::new(RepositoryState {
                mode: Mode::Connected(store),
                local: MemoryStore::default(),
            }),
            config,
            clock,
        }
    }

    /// Whether the instance has permanently switched to its in-process store.
    pub fn is_degraded(&self) -> bool {
        matches!(self.lock().mode, Mode::Degraded)
    }

    /// Fetch the cached snapshot for a scope. A malformed payload is a miss,
    /// and the corrupt entry is deleted so the next writer starts clean.
    pub fn get_snapshot(&self, scope: &Scope) -> Option<Snapshot> {
        let key = snapshot_key(scope);
        let mut state = self.lock();
        let payload = self.read(&mut state, &key)?;
        match serde_json::from_slice(&payload) {
            Ok(snapshot) => Some(snapshot),
            Err(_) => {
                log::debug!(target: "flagcache", key = key.as_str();
                    "discarding malformed snapshot payload");
                self.delete(&mut state, std::slice::from_ref(&key));
                None
            }
        }
    }

    /// Cache a snapshot under its scope key. Serialization failure skips the
    /// write silently.
    pub fn store_snapshot(&self, scope: &Scope, snapshot: &Snapshot) {
        let Some(payload) = encode(snapshot, "snapshot") else {
            return;
        };
        let key = snapshot_key(scope);
        let mut state = self.lock();
        self.write(&mut state, &key, self.config.snapshot_ttl_seconds, &payload);
    }

    /// Drop the cached snapshot for a scope.
    pub fn forget_snapshot(&self, scope: &Scope) {
        let key = snapshot_key(scope);
        let mut state = self.lock();
        self.delete(&mut state, std::slice::from_ref(&key));
    }

    /// Fetch a cached evaluation result. Any structural mismatch in the
    /// decoded payload is treated as a miss; malformed data never reaches the
    /// caller.
    pub fn get_evaluation(&self, key: &EvaluationKey) -> Option<EvaluationResult> {
        let cache_key = evaluation_key(key);
        let mut state = self.lock();
        let payload = self.read(&mut state, &cache_key)?;
        match serde_json::from_slice(&payload) {
            Ok(result) => Some(result),
            Err(_) => {
                log::debug!(target: "flagcache", key = cache_key.as_str();
                    "ignoring malformed evaluation payload");
                None
            }
        }
    }

    /// Cache an evaluation result and record its key in the scope index so
    /// [`Self::forget_evaluations`] can evict it without pattern scans.
    pub fn store_evaluation(&self, key: &EvaluationKey, result: &EvaluationResult) {
        let Some(payload) = encode(result, "evaluation") else {
            return;
        };
        let cache_key = evaluation_key(key);
        let index = index_key(&key.scope);
        let ttl = self.config.evaluation_ttl_seconds;
        let mut state = self.lock();
        self.write(&mut state, &cache_key, ttl, &payload);
        self.index_add(&mut state, &index, &cache_key, ttl);
    }

    /// Evict every evaluation result ever stored under a scope, then the
    /// scope index itself. Other scopes are untouched.
    pub fn forget_evaluations(&self, scope: &Scope) {
        let index = index_key(scope);
        let mut state = self.lock();
        let mut keys = self.index_members(&mut state, &index);
        keys.push(index);
        self.delete(&mut state, &keys);
    }

    /// Best-effort broadcast that a scope's data changed. Fire-and-forget:
    /// no delivery guarantee, and a silent no-op once degraded (there is no
    /// pub/sub locally).
    pub fn publish_invalidation(&self, scope: &Scope) {
        let message = InvalidationMessage::for_scope(scope);
        let Some(payload) = encode(&message, "invalidation message") else {
            return;
        };
        let mut state = self.lock();
        // Degraded mode has no pub/sub; the broadcast is silently dropped.
        if let Remote::Value(()) =
            Self::remote(&mut state, |store| store.publish(&self.config.channel, &payload))
        {
            log::trace!(target: "flagcache",
                project_key = scope.project_key.as_str(),
                environment_key = scope.environment_key.as_str();
                "published invalidation broadcast");
        }
    }

    fn lock(&self) -> MutexGuard<'_, RepositoryState> {
        self.state
            .lock()
            .expect("thread holding cache state lock should not panic")
    }

    /// Run an operation against the remote store, degrading permanently on
    /// the first failure.
    fn remote<T>(
        state: &mut RepositoryState,
        op: impl FnOnce(&mut dyn RemoteStore) -> Result<T, TransportError>,
    ) -> Remote<T> {
        let Mode::Connected(store) = &mut state.mode else {
            return Remote::Offline;
        };
        match op(store.as_mut()) {
            Ok(value) => Remote::Value(value),
            Err(error) => {
                log::warn!(target: "flagcache", error:% = error;
                    "remote store unavailable, serving cache from in-process store");
                state.mode = Mode::Degraded;
                Remote::Offline
            }
        }
    }

    fn read(&self, state: &mut RepositoryState, key: &str) -> Option<Vec<u8>> {
        match Self::remote(state, |store| store.get(key)) {
            Remote::Value(payload) => payload,
            Remote::Offline => state.local.get(key, self.clock.now()),
        }
    }

    fn write(&self, state: &mut RepositoryState, key: &str, ttl_seconds: u64, payload: &[u8]) {
        match Self::remote(state, |store| store.set_ex(key, ttl_seconds, payload)) {
            Remote::Value(()) => {}
            Remote::Offline => state.local.set_ex(key, ttl_seconds, payload, self.clock.now()),
        }
    }

    fn delete(&self, state: &mut RepositoryState, keys: &[String]) {
        match Self::remote(state, |store| store.del(keys)) {
            Remote::Value(()) => {}
            Remote::Offline => state.local.del(keys),
        }
    }

    fn index_add(&self, state: &mut RepositoryState, index: &str, member: &str, ttl_seconds: u64) {
        match Self::remote(state, |store| {
            store.sadd(index, member)?;
            store.expire(index, ttl_seconds)
        }) {
            Remote::Value(()) => {}
            Remote::Offline => {
                let now = self.clock.now();
                state.local.sadd(index, member);
                state.local.expire(index, ttl_seconds, now);
            }
        }
    }

    fn index_members(&self, state: &mut RepositoryState, index: &str) -> Vec<String> {
        match Self::remote(state, |store| store.smembers(index)) {
            Remote::Value(members) => members,
            Remote::Offline => state.local.smembers(index, self.clock.now()),
        }
    }
}

fn encode<T: Serialize>(value: &T, what: &str) -> Option<Vec<u8>> {
    match serde_json::to_vec(value) {
        Ok(payload) => Some(payload),
        Err(error) => {
            let error = EncodingError::from(error);
            log::debug!(target: "flagcache", what, error:% = error;
                "payload not serializable, skipping cache write");
            None
        }
    }
}

fn snapshot_key(scope: &Scope) -> String {
    format!(
        "{SNAPSHOT_PREFIX}:{}:{}",
        scope.project_key, scope.environment_key
    )
}

fn evaluation_key(key: &EvaluationKey) -> String {
    format!(
        "{EVALUATION_PREFIX}:{}:{}:{}:{}:{}",
        key.scope.project_key, key.scope.environment_key, key.flag_key, key.signature,
        key.context_hash
    )
}

fn index_key(scope: &Scope) -> String {
    format!(
        "{INDEX_PREFIX}:{}:{}",
        scope.project_key, scope.environment_key
    )
}

/// In-process replica of the remote key space: value entries and sets, both
/// with TTL bookkeeping. Expired entries are dropped lazily on access.
#[derive(Default)]
struct MemoryStore {
    entries: HashMap<String, CacheEntry>,
    sets: HashMap<String, SetEntry>,
}

struct CacheEntry {
    payload: Vec<u8>,
    expires_at: DateTime<Utc>,
}

struct SetEntry {
    members: HashSet<String>,
    /// `None` until the first `expire` call, mirroring the remote `SADD` +
    /// `EXPIRE` pair.
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryStore {
    fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.payload.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set_ex(&mut self, key: &str, ttl_seconds: u64, payload: &[u8], now: DateTime<Utc>) {
        self.entries.insert(
            key.to_owned(),
            CacheEntry {
                payload: payload.to_vec(),
                expires_at: now + Duration::seconds(ttl_seconds as i64),
            },
        );
    }

    fn del(&mut self, keys: &[String]) {
        for key in keys {
            self.entries.remove(key);
            self.sets.remove(key);
        }
    }

    fn sadd(&mut self, key: &str, member: &str) {
        self.sets
            .entry(key.to_owned())
            .or_insert_with(|| SetEntry {
                members: HashSet::new(),
                expires_at: None,
            })
            .members
            .insert(member.to_owned());
    }

    fn expire(&mut self, key: &str, ttl_seconds: u64, now: DateTime<Utc>) {
        if let Some(set) = self.sets.get_mut(key) {
            set.expires_at = Some(now + Duration::seconds(ttl_seconds as i64));
        }
    }

    fn smembers(&mut self, key: &str, now: DateTime<Utc>) -> Vec<String> {
        match self.sets.get(key) {
            Some(set) if set.expires_at.map_or(true, |at| at > now) => {
                set.members.iter().cloned().collect()
            }
            Some(_) => {
                self.sets.remove(key);
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind};
    use std::sync::{Arc, Mutex as StdMutex};

    use chrono::TimeZone;

    use super::*;
    use crate::eval::EvaluationResult;

    /// Remote fake backed by plain maps. Records every command name so tests
    /// can assert ordering; ignores TTLs (the real remote owns those).
    #[derive(Default)]
    struct SharedRemote {
        entries: HashMap<String, Vec<u8>>,
        sets: HashMap<String, HashSet<String>>,
        published: Vec<(String, Vec<u8>)>,
        calls: Vec<String>,
        fail_next: bool,
    }

    #[derive(Clone, Default)]
    struct FakeRemote(Arc<StdMutex<SharedRemote>>);

    impl FakeRemote {
        fn with<T>(&self, f: impl FnOnce(&mut SharedRemote) -> T) -> T {
            f(&mut self.0.lock().unwrap())
        }

        fn check_failure(
            shared: &mut SharedRemote,
            command: &str,
            key: &str,
        ) -> Result<(), TransportError> {
            shared.calls.push(format!("{command} {key}"));
            if shared.fail_next {
                shared.fail_next = false;
                return Err(TransportError::Io(Arc::new(Error::new(
                    ErrorKind::ConnectionRefused,
                    "refused",
                ))));
            }
            Ok(())
        }
    }

    impl RemoteStore for FakeRemote {
        fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, TransportError> {
            self.with(|shared| {
                Self::check_failure(shared, "GET", key)?;
                Ok(shared.entries.get(key).cloned())
            })
        }

        fn set_ex(
            &mut self,
            key: &str,
            _ttl_seconds: u64,
            value: &[u8],
        ) -> Result<(), TransportError> {
            self.with(|shared| {
                Self::check_failure(shared, "SETEX", key)?;
                shared.entries.insert(key.to_owned(), value.to_vec());
                Ok(())
            })
        }

        fn del(&mut self, keys: &[String]) -> Result<(), TransportError> {
            self.with(|shared| {
                Self::check_failure(shared, "DEL", &keys.join(","))?;
                for key in keys {
                    shared.entries.remove(key);
                    shared.sets.remove(key);
                }
                Ok(())
            })
        }

        fn sadd(&mut self, key: &str, member: &str) -> Result<(), TransportError> {
            self.with(|shared| {
                Self::check_failure(shared, "SADD", key)?;
                shared
                    .sets
                    .entry(key.to_owned())
                    .or_default()
                    .insert(member.to_owned());
                Ok(())
            })
        }

        fn smembers(&mut self, key: &str) -> Result<Vec<String>, TransportError> {
            self.with(|shared| {
                Self::check_failure(shared, "SMEMBERS", key)?;
                Ok(shared
                    .sets
                    .get(key)
                    .map(|members| members.iter().cloned().collect())
                    .unwrap_or_default())
            })
        }

        fn expire(&mut self, key: &str, _ttl_seconds: u64) -> Result<(), TransportError> {
            self.with(|shared| Self::check_failure(shared, "EXPIRE", key))
        }

        fn publish(&mut self, channel: &str, message: &[u8]) -> Result<(), TransportError> {
            self.with(|shared| {
                Self::check_failure(shared, "PUBLISH", channel)?;
                shared.published.push((channel.to_owned(), message.to_vec()));
                Ok(())
            })
        }
    }

    /// Manually advanced clock for expiry tests.
    struct ManualClock(StdMutex<DateTime<Utc>>);

    impl ManualClock {
        fn start() -> Arc<Self> {
            Arc::new(Self(StdMutex::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            )))
        }

        fn advance(&self, seconds: i64) {
            *self.0.lock().unwrap() += Duration::seconds(seconds);
        }
    }

    impl Clock for Arc<ManualClock> {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn result(variant: &str) -> EvaluationResult {
        EvaluationResult {
            variant: Some(variant.to_string()),
            reason: "fallback_default".to_string(),
            rollout: 0,
            payload: None,
            bucket: None,
        }
    }

    fn eval_key(scope: &Scope, flag: &str, context_hash: &str) -> EvaluationKey {
        EvaluationKey {
            scope: scope.clone(),
            flag_key: flag.to_string(),
            signature: "sig-1".to_string(),
            context_hash: context_hash.to_string(),
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            project: serde_json::json!({"key": "proj"}),
            environment: serde_json::json!({"key": "prod"}),
            flags: Vec::new(),
        }
    }

    fn connected_repo(remote: &FakeRemote) -> CacheRepository {
        CacheRepository::with_store(Box::new(remote.clone()), CacheConfig::default())
    }

    /// Repository that degrades on its first operation.
    fn degraded_repo(clock: Arc<ManualClock>) -> CacheRepository {
        let remote = FakeRemote::default();
        remote.with(|shared| shared.fail_next = true);
        let repo = CacheRepository::with_store_and_clock(
            Box::new(remote),
            CacheConfig::default(),
            Box::new(clock),
        );
        // Trip the degrade.
        repo.get_snapshot(&Scope::new("trip", "trip"));
        assert!(repo.is_degraded());
        repo
    }

    #[test]
    fn evaluation_round_trip_through_remote() {
        let remote = FakeRemote::default();
        let repo = connected_repo(&remote);
        let scope = Scope::new("proj", "prod");
        let key = eval_key(&scope, "checkout", "ctx-1");

        assert_eq!(repo.get_evaluation(&key), None);
        repo.store_evaluation(&key, &result("treatment"));
        assert_eq!(repo.get_evaluation(&key), Some(result("treatment")));

        // The scope index picked up the entry's key.
        let indexed = remote.with(|shared| {
            shared
                .sets
                .get("flagcache:index:proj:prod")
                .cloned()
                .unwrap_or_default()
        });
        assert_eq!(indexed.len(), 1);
    }

    #[test]
    fn snapshot_round_trip_through_remote() {
        let remote = FakeRemote::default();
        let repo = connected_repo(&remote);
        let scope = Scope::new("proj", "prod");

        assert_eq!(repo.get_snapshot(&scope), None);
        repo.store_snapshot(&scope, &snapshot());
        assert_eq!(repo.get_snapshot(&scope), Some(snapshot()));

        repo.forget_snapshot(&scope);
        assert_eq!(repo.get_snapshot(&scope), None);
        assert!(!repo.is_degraded());
    }

    #[test]
    fn forget_evaluations_is_scope_isolated() {
        let remote = FakeRemote::default();
        let repo = connected_repo(&remote);
        let scope_a = Scope::new("proj", "staging");
        let scope_b = Scope::new("proj", "prod");
        let key_a = eval_key(&scope_a, "checkout", "ctx-1");
        let key_b = eval_key(&scope_b, "checkout", "ctx-1");

        repo.store_evaluation(&key_a, &result("a"));
        repo.store_evaluation(&key_b, &result("b"));

        repo.forget_evaluations(&scope_a);

        assert_eq!(repo.get_evaluation(&key_a), None);
        assert_eq!(repo.get_evaluation(&key_b), Some(result("b")));
        // The index itself is gone too.
        let index_left =
            remote.with(|shared| shared.sets.contains_key("flagcache:index:proj:staging"));
        assert!(!index_left);
    }

    #[test]
    fn malformed_evaluation_payload_is_a_miss() {
        let remote = FakeRemote::default();
        let repo = connected_repo(&remote);
        let scope = Scope::new("proj", "prod");
        let key = eval_key(&scope, "checkout", "ctx-1");
        let cache_key = evaluation_key(&key);

        let junk_payloads: [&[u8]; 4] = [
            b"not json",
            br#"{"variant": "a", "rollout": 100}"#, // missing reason
            br#"{"variant": "a", "reason": "matched_x", "rollout": 99.5}"#, // non-integer rollout
            br#"{"variant": 3, "reason": "matched_x", "rollout": 100}"#, // non-string variant
        ];
        for junk in junk_payloads {
            remote.with(|shared| {
                shared.entries.insert(cache_key.clone(), junk.to_vec());
            });
            assert_eq!(repo.get_evaluation(&key), None, "payload: {junk:?}");
        }
    }

    #[test]
    fn malformed_snapshot_is_a_miss_and_gets_deleted() {
        let remote = FakeRemote::default();
        let repo = connected_repo(&remote);
        let scope = Scope::new("proj", "prod");
        let key = snapshot_key(&scope);

        remote.with(|shared| {
            shared.entries.insert(key.clone(), b"{\"nope\":1}".to_vec());
        });
        assert_eq!(repo.get_snapshot(&scope), None);
        assert!(remote.with(|shared| !shared.entries.contains_key(&key)));
    }

    #[test]
    fn degrade_is_sticky_even_when_the_remote_recovers() {
        let _ = env_logger::builder().is_test(true).try_init();

        let remote = FakeRemote::default();
        remote.with(|shared| shared.fail_next = true);
        let repo = connected_repo(&remote);
        let scope = Scope::new("proj", "prod");
        let key = eval_key(&scope, "checkout", "ctx-1");

        // First call trips the transition.
        assert_eq!(repo.get_evaluation(&key), None);
        assert!(repo.is_degraded());

        // The remote would now succeed, but the repository must not go back.
        repo.store_evaluation(&key, &result("treatment"));
        assert_eq!(repo.get_evaluation(&key), Some(result("treatment")));
        assert!(remote.with(|shared| shared.entries.is_empty()));

        // Only the single failed call ever reached the remote.
        assert_eq!(remote.with(|shared| shared.calls.len()), 1);
    }

    #[test]
    fn fallback_store_honors_ttl_via_injected_clock() {
        let clock = ManualClock::start();
        let repo = degraded_repo(clock.clone());
        let scope = Scope::new("proj", "prod");
        let key = eval_key(&scope, "checkout", "ctx-1");

        repo.store_evaluation(&key, &result("treatment"));
        repo.store_snapshot(&scope, &snapshot());

        clock.advance(299);
        assert_eq!(repo.get_evaluation(&key), Some(result("treatment")));
        assert_eq!(repo.get_snapshot(&scope), Some(snapshot()));

        clock.advance(2);
        assert_eq!(repo.get_evaluation(&key), None);
        assert_eq!(repo.get_snapshot(&scope), None);
    }

    #[test]
    fn fallback_store_is_scope_isolated() {
        let clock = ManualClock::start();
        let repo = degraded_repo(clock);
        let scope_a = Scope::new("proj", "staging");
        let scope_b = Scope::new("proj", "prod");
        let key_a = eval_key(&scope_a, "checkout", "ctx-1");
        let key_b = eval_key(&scope_b, "checkout", "ctx-1");

        repo.store_evaluation(&key_a, &result("a"));
        repo.store_evaluation(&key_b, &result("b"));
        repo.forget_evaluations(&scope_a);

        assert_eq!(repo.get_evaluation(&key_a), None);
        assert_eq!(repo.get_evaluation(&key_b), Some(result("b")));
    }

    #[test]
    fn publish_reaches_the_remote_when_connected() {
        let remote = FakeRemote::default();
        let repo = connected_repo(&remote);
        repo.publish_invalidation(&Scope::new("proj", "prod"));

        let published = remote.with(|shared| shared.published.clone());
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "flagcache:invalidate");
        let message: InvalidationMessage = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(message.project_key, "proj");
        assert_eq!(message.environment_key, "prod");
    }

    #[test]
    fn publish_is_a_silent_noop_when_degraded() {
        let clock = ManualClock::start();
        let repo = degraded_repo(clock);
        // Must not panic and must not reconnect.
        repo.publish_invalidation(&Scope::new("proj", "prod"));
        assert!(repo.is_degraded());
    }
}
