//! In-memory fixed window counters.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use tokio::time::Instant;

use super::{RateLimitStorage, StorageError, WindowCount};

/// Expired counters are swept after this many increments.
const SWEEP_INTERVAL: u64 = 1024;

struct Counter {
    count: u64,
    expires_at: Instant,
}

/// In-memory rate limit storage implementation. Counters are local to the process.
#[derive(Default)]
pub struct InMemoryStorage {
    counters: DashMap<String, Counter>,
    operations: AtomicU64,
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance.
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(&self, now: Instant) {
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at > now);

        log::debug!(
            "Swept {} expired rate limit counters",
            before.saturating_sub(self.counters.len())
        );
    }
}

impl RateLimitStorage for InMemoryStorage {
    async fn increment(&self, key: &str, amount: u64, ttl: Duration) -> Result<WindowCount, StorageError> {
        let now = Instant::now();

        // Must happen before an entry guard is held, retain locks every shard.
        if self.operations.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep(now);
        }

        let mut counter = self.counters.entry(key.to_string()).or_insert_with(|| Counter {
            count: 0,
            expires_at: now + ttl,
        });

        if counter.expires_at <= now {
            counter.count = 0;
            counter.expires_at = now + ttl;
        }

        counter.count = counter.count.saturating_add(amount);

        Ok(WindowCount {
            count: counter.count,
            ttl: counter.expires_at.saturating_duration_since(now),
        })
    }
}
