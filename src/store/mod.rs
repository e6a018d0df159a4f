//! Shared counter store backends.
//!
//! All mutable limiter state lives in the store. The limiter itself keeps no
//! per-identity state, which is what lets any number of server processes
//! share one quota per client.

mod memory;
mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::error::Result;

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

/// Outcome of one atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    /// Post-increment count for the active window
    pub count: u64,
    /// Time left before the window's key expires
    pub ttl: Duration,
}

/// A network-reachable counter store with atomic increment and key expiry.
///
/// Implementations must be safe to call from many requests at once over a
/// single process-wide handle.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it at 1 if absent.
    ///
    /// The expiry is set to `window` only when the increment created the key,
    /// so concurrent callers never push an active window's boundary forward.
    /// Any failure is reported as `StoreUnavailable`.
    async fn increment(&self, key: &str, window: Duration) -> Result<Tally>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Short backend label for logs.
    fn name(&self) -> &'static str;
}

/// Which store implementation backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis, shared by every process
    #[default]
    Redis,
    /// In-process map; only correct for a single process
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = crate::error::TurnstileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(crate::error::TurnstileError::Config(format!(
                "unknown store backend '{}', expected 'redis' or 'memory'",
                other
            ))),
        }
    }
}

/// How often the in-process store drops expired windows.
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Open the configured counter store.
///
/// An unreachable Redis is only fatal when `require_connection` is set;
/// otherwise requests resolve through the store fallback until it comes up.
pub async fn connect(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisCounterStore::new(&config.url, config.timeout())?;
            let url = redis_store::redacted(&config.url);
            match store.ensure_connected().await {
                Ok(()) => info!(url = %url, "Connected to redis counter store"),
                Err(e) if config.require_connection => return Err(e),
                Err(e) => warn!(url = %url, error = %e, "Redis counter store not reachable yet"),
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-process counter store; limits are not shared between processes");
            let store = Arc::new(MemoryCounterStore::new(clock));
            store.spawn_sweeper(MEMORY_SWEEP_INTERVAL);
            Ok(store)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("redis".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("etcd".parse::<StoreBackend>().is_err());
        assert_eq!(StoreBackend::default(), StoreBackend::Redis);
    }

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        };
        let store = connect(&config, Arc::new(SystemClock::new())).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_connect_unreachable_redis_is_tolerated() {
        let config = StoreConfig {
            url: "redis://127.0.0.1:1/".to_string(),
            timeout_ms: 100,
            ..StoreConfig::default()
        };
        let store = connect(&config, Arc::new(SystemClock::new())).await.unwrap();
        assert_eq!(store.name(), "redis");
    }

    #[tokio::test]
    async fn test_connect_unreachable_redis_fails_when_required() {
        let config = StoreConfig {
            url: "redis://127.0.0.1:1/".to_string(),
            timeout_ms: 100,
            require_connection: true,
            ..StoreConfig::default()
        };
        let err = connect(&config, Arc::new(SystemClock::new())).await.err().unwrap();
        assert!(err.is_store_unavailable());
    }
}
