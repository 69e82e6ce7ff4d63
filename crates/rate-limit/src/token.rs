//! Token counting for LLM upstreams.
//!
//! The number of tokens a request consumes is only known after the upstream answered, so the
//! budget is checked before forwarding and charged when the response body is complete. Requests
//! running concurrently may overshoot the threshold by the tokens of one response each.

use std::sync::Arc;

use config::RuleSetConfig;

use crate::{
    error::RateLimitError,
    key::CounterWindow,
    matcher,
    request::RateLimitRequest,
    storage::{RateLimitStorage, Storage},
};

/// The counter a forwarded request will be charged to.
#[derive(Debug, Clone)]
pub struct TokenReservation {
    key: String,
    window: CounterWindow,
    limit: u64,
    used: u64,
}

impl TokenReservation {
    /// The token threshold of the matched limit key.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Tokens used in the current window before this request.
    pub fn used(&self) -> u64 {
        self.used
    }
}

/// Counts LLM tokens against a rule set.
#[derive(Clone)]
pub struct TokenRateLimitManager {
    rule_set: Arc<RuleSetConfig>,
    storage: Arc<Storage>,
}

impl TokenRateLimitManager {
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

    /// Checks the remaining token budget of the first matching limit key.
    ///
    /// Returns `Ok(None)` when no rule applies, a reservation to [settle](Self::settle) once the
    /// response is complete, or [`RateLimitError::TokenLimitExceeded`] when the budget of the
    /// current window is used up.
    pub async fn check_request(&self, request: &RateLimitRequest) -> Result<Option<TokenReservation>, RateLimitError> {
        let rule_name = &self.rule_set.rule_name;

        let Some(matched) = matcher::find_match(&self.rule_set, request) else {
            log::debug!("No token rule of '{rule_name}' matches the request");
            return Ok(None);
        };

        let window = CounterWindow::current(matched.threshold.window);
        let key = window.key(rule_name, &matched.dimension, &matched.value);

        let used = self.storage.increment(&key, 0, window.ttl()).await?;
        let limit = matched.threshold.count;

        if used.count >= limit {
            log::debug!("Token counter {key} is at {} of {limit}", used.count);

            return Err(RateLimitError::TokenLimitExceeded {
                rule: rule_name.clone(),
                limit,
                reset: used.ttl,
            });
        }

        Ok(Some(TokenReservation {
            key,
            window,
            limit,
            used: used.count,
        }))
    }

    /// Charges the tokens a completed response consumed.
    pub async fn settle(&self, reservation: TokenReservation, tokens: u64) -> Result<(), RateLimitError> {
        if tokens == 0 {
            return Ok(());
        }

        let counted = self
            .storage
            .increment(&reservation.key, tokens, reservation.window.ttl())
            .await?;

        log::debug!(
            "Charged {tokens} tokens to {}, now at {} of {}",
            reservation.key,
            counted.count,
            reservation.limit
        );

        Ok(())
    }
}
