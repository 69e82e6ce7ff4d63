//! Fixed window counter keys.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use config::TimeWindow;

/// The fixed window a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CounterWindow {
    window: TimeWindow,
    bucket: u64,
}

impl CounterWindow {
    /// The window containing the current time.
    pub fn current(window: TimeWindow) -> Self {
        Self::at(window, unix_now())
    }

    pub fn at(window: TimeWindow, now: Duration) -> Self {
        Self {
            window,
            bucket: now.as_secs() / window.as_secs(),
        }
    }

    /// `{rule_name}:{dimension}:{value}:{bucket}`.
    pub fn key(&self, rule_name: &str, dimension: &str, value: &str) -> String {
        format!("{rule_name}:{dimension}:{value}:{}", self.bucket)
    }

    /// Time until the window ends, at least one second.
    pub fn ttl(&self) -> Duration {
        self.ttl_at(unix_now())
    }

    pub fn ttl_at(&self, now: Duration) -> Duration {
        let end = Duration::from_secs((self.bucket + 1) * self.window.as_secs());
        end.saturating_sub(now).max(Duration::from_secs(1))
    }
}

fn unix_now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}
