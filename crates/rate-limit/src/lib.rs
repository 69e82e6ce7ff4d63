//! Key based rate limiting.
//!
//! A rule set either counts every request against one global threshold, or walks its rule items
//! in order and counts the request against the first limit key matching the value extracted from
//! the request (a header, query parameter, cookie, consumer name or client address). Counters
//! live in fixed time windows in memory or in Redis, so several gateway instances sharing a
//! Redis server enforce one cluster wide limit.
//!
//! Request counting happens before the request is forwarded. Token counting checks the token
//! budget before forwarding and settles the tokens reported by the LLM upstream once the
//! response body is complete.

#![deny(missing_docs)]

mod error;
mod extract;
mod key;
mod manager;
mod matcher;
mod request;
mod storage;
mod token;
mod usage;

pub use error::RateLimitError;
pub use manager::{QuotaState, RateLimitManager};
pub use request::{RateLimitRequest, RateLimitRequestBuilder};
pub use storage::{InMemoryStorage, RateLimitStorage, RedisStorage, Storage, StorageError, WindowCount};
pub use token::{TokenRateLimitManager, TokenReservation};
pub use usage::{TokenUsage, UsageTracker};
