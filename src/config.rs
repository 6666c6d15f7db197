//! Configuration consumed by the cache layer.
use std::time::Duration;

/// Default TTL for both snapshot and evaluation entries.
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// Default connect/read/write timeout for the remote store.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pub/sub channel for invalidation broadcasts.
pub const DEFAULT_CHANNEL: &str = "flagcache:invalidate";

/// Connection parameters for the remote key-value store.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Hostname or IP address of the store.
    pub host: String,
    /// TCP port of the store.
    pub port: u16,
    /// Password sent via `AUTH` on connect, if configured.
    pub password: Option<String>,
    /// Database index selected via `SELECT` on connect when non-zero.
    pub database: u32,
    /// Connect/read/write timeout. A timeout is the only abort mechanism;
    /// it surfaces as a transport error.
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 6379,
            password: None,
            database: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Cache behavior knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for cached scope snapshots, in seconds.
    pub snapshot_ttl_seconds: u64,
    /// TTL for cached evaluation results (and their scope index), in seconds.
    pub evaluation_ttl_seconds: u64,
    /// Channel invalidation broadcasts are published on.
    pub channel: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl_seconds: DEFAULT_TTL_SECONDS,
            evaluation_ttl_seconds: DEFAULT_TTL_SECONDS,
            channel: DEFAULT_CHANNEL.to_owned(),
        }
    }
}
