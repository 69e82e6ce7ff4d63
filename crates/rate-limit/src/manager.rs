//! Request counting.

use std::{sync::Arc, time::Duration};

use config::RuleSetConfig;

use crate::{
    error::RateLimitError,
    key::CounterWindow,
    matcher,
    request::RateLimitRequest,
    storage::{RateLimitStorage, Storage},
};

/// Quota of the counter an admitted request was counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaState {
    /// The threshold of the matched limit key.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// Time until the current window ends.
    pub reset: Duration,
}

/// Counts requests against a rule set.
#[derive(Clone)]
pub struct RateLimitManager {
    rule_set: Arc<RuleSetConfig>,
    storage: Arc<Storage>,
}

impl RateLimitManager {
    /// Create a manager counting in the given storage.
    pub fn new(rule_set: RuleSetConfig, storage: Arc<Storage>) -> Self {
        Self {
            rule_set: Arc::new(rule_set),
            storage,
        }
    }

    /// The rule set this manager enforces.
    pub fn rule_set(&self) -> &RuleSetConfig {
        &self.rule_set
    }

    /// Counts the request against the first matching limit key.
    ///
    /// Returns `Ok(None)` when no rule applies, the quota after counting when the request is
    /// within the threshold, and [`RateLimitError::LimitExceeded`] when it is over.
    pub async fn check_request(&self, request: &RateLimitRequest) -> Result<Option<QuotaState>, RateLimitError> {
        let rule_name = &self.rule_set.rule_name;

        let Some(matched) = matcher::find_match(&self.rule_set, request) else {
            log::debug!("No rule of '{rule_name}' matches the request");
            return Ok(None);
        };

        let window = CounterWindow::current(matched.threshold.window);
        let key = window.key(rule_name, &matched.dimension, &matched.value);

        let counted = self.storage.increment(&key, 1, window.ttl()).await?;
        let limit = matched.threshold.count;

        log::debug!("Counter {key} is at {} of {limit}", counted.count);

        if counted.count > limit {
            return Err(RateLimitError::LimitExceeded {
                rule: rule_name.clone(),
                limit,
                reset: counted.ttl,
            });
        }

        Ok(Some(QuotaState {
            limit,
            remaining: limit - counted.count,
            reset: counted.ttl,
        }))
    }
}
