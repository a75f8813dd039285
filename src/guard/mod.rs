//! Quota enforcement and memoization backed by the shared store.
//!
//! Both halves fail open: a store fault lets requests through and bypasses
//! the cache rather than blocking traffic. Correctness never depends on a
//! cache entry being present.

mod cache;
mod limiter;

pub use cache::{CacheGuard, DEFAULT_CACHE_TTL};
pub use limiter::{default_tiers, QuotaAction, RateDecision, RateLimiter, TierLimits, UNLIMITED};
