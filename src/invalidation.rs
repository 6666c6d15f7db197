//! Cache invalidation after definition mutations.
//!
//! External mutation entry points (create/update/delete of a project,
//! environment, or flag) call the coordinator with the affected scope(s)
//! after a successful persistence commit. Each scope is processed
//! independently and synchronously; the semantics are at-least-once, not
//! exactly-once, and broadcasts carry no delivery guarantee.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheRepository, Scope};

/// Fire-and-forget broadcast payload telling other processes a scope's data
/// changed. The subscriber side is out of scope for this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    #[allow(missing_docs)]
    pub project_key: String,
    #[allow(missing_docs)]
    pub environment_key: String,
}

impl InvalidationMessage {
    #[allow(missing_docs)]
    pub fn for_scope(scope: &Scope) -> Self {
        Self {
            project_key: scope.project_key.clone(),
            environment_key: scope.environment_key.clone(),
        }
    }
}

/// Clears cache scopes and publishes invalidation broadcasts on mutation.
pub struct InvalidationCoordinator {
    cache: Arc<CacheRepository>,
}

impl InvalidationCoordinator {
    #[allow(missing_docs)]
    pub fn new(cache: Arc<CacheRepository>) -> Self {
        Self { cache }
    }

    /// Invalidate one scope: drop its snapshot, evict its evaluation entries,
    /// then broadcast. Order matters: local eviction completes before other
    /// processes are told to re-read.
    pub fn scope_changed(&self, scope: &Scope) {
        self.cache.forget_snapshot(scope);
        self.cache.forget_evaluations(scope);
        self.cache.publish_invalidation(scope);
        log::debug!(target: "flagcache",
            project_key = scope.project_key.as_str(),
            environment_key = scope.environment_key.as_str();
            "invalidated cache scope");
    }

    /// Invalidate several scopes, each independently. No batching and no
    /// deduplication: a scope listed twice is processed twice.
    pub fn scopes_changed<'a>(&self, scopes: impl IntoIterator<Item = &'a Scope>) {
        for scope in scopes {
            self.scope_changed(scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::cache::{EvaluationKey, RemoteStore};
    use crate::config::CacheConfig;
    use crate::error::TransportError;
    use crate::eval::EvaluationResult;

    /// Records the order of remote commands.
    #[derive(Clone, Default)]
    struct RecordingRemote {
        log: Arc<Mutex<Vec<String>>>,
        sets: Arc<Mutex<HashMap<String, Vec<String>>>>,
    }

    impl RecordingRemote {
        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    impl RemoteStore for RecordingRemote {
        fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, TransportError> {
            self.record(format!("GET {key}"));
            Ok(None)
        }

        fn set_ex(
            &mut self,
            key: &str,
            _ttl_seconds: u64,
            _value: &[u8],
        ) -> Result<(), TransportError> {
            self.record(format!("SETEX {key}"));
            Ok(())
        }

        fn del(&mut self, keys: &[String]) -> Result<(), TransportError> {
            self.record(format!("DEL {}", keys.join(",")));
            Ok(())
        }

        fn sadd(&mut self, key: &str, member: &str) -> Result<(), TransportError> {
            self.record(format!("SADD {key}"));
            self.sets
                .lock()
                .unwrap()
                .entry(key.to_owned())
                .or_default()
                .push(member.to_owned());
            Ok(())
        }

        fn smembers(&mut self, key: &str) -> Result<Vec<String>, TransportError> {
            self.record(format!("SMEMBERS {key}"));
            Ok(self
                .sets
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .unwrap_or_default())
        }

        fn expire(&mut self, key: &str, _ttl_seconds: u64) -> Result<(), TransportError> {
            self.record(format!("EXPIRE {key}"));
            Ok(())
        }

        fn publish(&mut self, channel: &str, _message: &[u8]) -> Result<(), TransportError> {
            self.record(format!("PUBLISH {channel}"));
            Ok(())
        }
    }

    #[test]
    fn forget_then_publish_in_order() {
        let remote = RecordingRemote::default();
        let cache = Arc::new(CacheRepository::with_store(
            Box::new(remote.clone()),
            CacheConfig::default(),
        ));
        let scope = Scope::new("proj", "prod");

        // Seed one evaluation entry so the eviction has something to chew on.
        cache.store_evaluation(
            &EvaluationKey {
                scope: scope.clone(),
                flag_key: "checkout".to_string(),
                signature: "sig".to_string(),
                context_hash: "ctx".to_string(),
            },
            &EvaluationResult {
                variant: Some("a".to_string()),
                reason: "fallback_default".to_string(),
                rollout: 0,
                payload: None,
                bucket: None,
            },
        );

        InvalidationCoordinator::new(cache).scope_changed(&scope);

        let log = remote.log.lock().unwrap().clone();
        let position = |needle: &str| {
            log.iter()
                .position(|entry| entry.starts_with(needle))
                .unwrap_or_else(|| panic!("{needle} not found in {log:?}"))
        };
        let snapshot_del = position("DEL flagcache:snapshot:proj:prod");
        let index_read = position("SMEMBERS flagcache:index:proj:prod");
        let publish = position("PUBLISH flagcache:invalidate");
        assert!(snapshot_del < index_read);
        assert!(index_read < publish);

        // The eviction deleted both the entry and the index.
        let eviction = &log[position("DEL flagcache:eval")];
        assert!(eviction.contains("flagcache:index:proj:prod"), "{eviction}");
    }

    #[test]
    fn each_scope_is_processed_independently() {
        let remote = RecordingRemote::default();
        let cache = Arc::new(CacheRepository::with_store(
            Box::new(remote.clone()),
            CacheConfig::default(),
        ));
        let scopes = [Scope::new("proj", "staging"), Scope::new("proj", "prod")];

        InvalidationCoordinator::new(cache).scopes_changed(scopes.iter());

        let log = remote.log.lock().unwrap().clone();
        let publishes = log.iter().filter(|e| e.starts_with("PUBLISH")).count();
        assert_eq!(publishes, 2);
    }
}
