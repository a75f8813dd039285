//! Shared key-value store abstraction.
//!
//! All cross-process coordination (task state, rate counters, cache entries,
//! work queues, event topics) goes through this trait. Workers and the
//! submitting side share no memory; a flaky store must degrade features, not
//! crash them.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Errors from the shared store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store command error: {0}")]
    Command(String),

    #[error("Stored value could not be decoded: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared store operations used for distributed coordination.
///
/// Implementations must provide atomic `incr_with_expiry` semantics at the
/// store level; in-process locking is not a substitute since callers may run
/// in different processes.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Set a value without expiry.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a key. Returns whether the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically increment a counter, setting its expiry on first increment.
    /// Returns the post-increment count.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> StoreResult<u64>;

    /// Remaining time-to-live for a key, if it has one.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Push a value onto the head of a list (work queue producer side).
    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Pop a value from the tail of a list, waiting up to `timeout`.
    /// Returns None on timeout.
    async fn list_pop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>>;

    /// Add a member to a set.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Remove a member from a set.
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    /// All members of a set.
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Publish a payload on a channel (best-effort fan-out to other processes).
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;
}
