//! Storage backends for rate limiting.

use std::time::Duration;

use config::StorageConfig;
use telemetry::metrics::{RATE_LIMIT_STORAGE_DURATION, Recorder};

pub mod memory;
pub mod redis;
mod redis_pool;

pub use self::memory::InMemoryStorage;
pub use self::redis::RedisStorage;

/// A counter after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Value of the counter including the increment.
    pub count: u64,
    /// Time until the counter expires.
    pub ttl: Duration,
}

/// Trait for rate limit storage backends.
#[allow(async_fn_in_trait)]
pub trait RateLimitStorage: Send + Sync {
    /// Atomically adds `amount` to the counter `key` and returns the new value. A counter that
    /// does not exist yet starts at zero and expires after `ttl`. An amount of zero reads the
    /// counter.
    async fn increment(&self, key: &str, amount: u64, ttl: Duration) -> Result<WindowCount, StorageError>;
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error.
    #[error("Query error: {0}")]
    Query(String),

    /// The backend did not answer within the response timeout.
    #[error("Storage did not respond within {0:?}")]
    Timeout(Duration),

    /// Internal storage error.
    #[error("Storage error: {0}")]
    Internal(String),
}

/// The configured storage backend, shared by all rule sets.
pub enum Storage {
    /// Counters local to this process.
    Memory(InMemoryStorage),
    /// Counters shared through Redis.
    Redis(RedisStorage),
}

impl Storage {
    /// Creates the backend. Redis connectivity is verified before returning.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let storage = match config {
            StorageConfig::Memory => Storage::Memory(InMemoryStorage::new()),
            StorageConfig::Redis(redis_config) => Storage::Redis(RedisStorage::new(redis_config).await?),
        };

        Ok(storage)
    }

    /// Name of the backend, as used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Storage::Memory(_) => "memory",
            Storage::Redis(_) => "redis",
        }
    }
}

impl RateLimitStorage for Storage {
    async fn increment(&self, key: &str, amount: u64, ttl: Duration) -> Result<WindowCount, StorageError> {
        let mut recorder = Recorder::new(RATE_LIMIT_STORAGE_DURATION);
        recorder.push_attribute("keylimit.storage", self.name());

        let result = match self {
            Storage::Memory(storage) => storage.increment(key, amount, ttl).await,
            Storage::Redis(storage) => storage.increment(key, amount, ttl).await,
        };

        recorder.push_attribute("keylimit.outcome", if result.is_ok() { "success" } else { "error" });
        recorder.record();

        result
    }
}
