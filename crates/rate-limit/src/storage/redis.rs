//! Redis fixed window counters, shared by every gateway using the same server.

use std::time::Duration;

use config::RedisConfig;
use redis::Script;

use super::{
    RateLimitStorage, StorageError, WindowCount,
    redis_pool::{Pool, create_pool},
};

/// Increments the counter and sets its expiry when the key is new. Returns the count and the
/// remaining time to live in milliseconds.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = redis.call('PTTL', KEYS[1])

if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    ttl = tonumber(ARGV[2])
end

return { count, ttl }
"#;

/// Redis-based rate limit storage implementation.
pub struct RedisStorage {
    pool: Pool,
    script: Script,
    key_prefix: String,
    response_timeout: Duration,
}

impl RedisStorage {
    /// Create the connection pool and check that the server answers.
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to get Redis connection from pool: {e}")))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))?;

        drop(conn);

        log::debug!("Connected to Redis rate limit storage");

        Ok(Self {
            pool,
            script: Script::new(INCREMENT_SCRIPT),
            key_prefix: config.key_prefix.clone(),
            response_timeout: config.response_timeout.unwrap_or(Duration::from_secs(1)),
        })
    }

    async fn run_script(&self, key: &str, amount: u64, ttl: Duration) -> Result<(i64, i64), StorageError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let ttl_millis = ttl.as_millis().max(1) as u64;

        self.script
            .key(format!("{}{key}", self.key_prefix))
            .arg(amount)
            .arg(ttl_millis)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))
    }
}

impl RateLimitStorage for RedisStorage {
    async fn increment(&self, key: &str, amount: u64, ttl: Duration) -> Result<WindowCount, StorageError> {
        let (count, ttl_millis) = tokio::time::timeout(self.response_timeout, self.run_script(key, amount, ttl))
            .await
            .map_err(|_| StorageError::Timeout(self.response_timeout))??;

        log::debug!("Redis counter '{}{key}' is at {count}", self.key_prefix);

        Ok(WindowCount {
            count: count.max(0) as u64,
            ttl: Duration::from_millis(ttl_millis.max(0) as u64),
        })
    }
}
