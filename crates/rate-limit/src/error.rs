//! Error types for rate limiting.

use std::time::Duration;

use crate::storage::StorageError;

/// Errors that can occur during rate limiting.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The request counter of a rule is over its threshold.
    #[error("Rate limit exceeded for rule {rule}")]
    LimitExceeded {
        /// Name of the rule set.
        rule: String,
        /// The threshold that was exceeded.
        limit: u64,
        /// Time until the current window ends.
        reset: Duration,
    },

    /// The token budget of a rule is used up.
    #[error("Token rate limit exceeded for rule {rule}")]
    TokenLimitExceeded {
        /// Name of the rule set.
        rule: String,
        /// The token threshold.
        limit: u64,
        /// Time until the current window ends.
        reset: Duration,
    },

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RateLimitError {
    /// Get the retry-after duration if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LimitExceeded { reset, .. } => Some(*reset),
            Self::TokenLimitExceeded { reset, .. } => Some(*reset),
            Self::Storage(_) => None,
        }
    }
}
