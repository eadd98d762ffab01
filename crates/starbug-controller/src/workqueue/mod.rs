//! Deduplicating work queue with rate-limited retries

pub mod queue;
pub mod rate_limiter;

pub use queue::WorkQueue;
pub use rate_limiter::{ItemExponentialBackoff, RateLimiter};
