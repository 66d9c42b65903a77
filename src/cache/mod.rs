//! Shared counter store
//!
//! Fixed-window counters live outside the process so every instance of the
//! service sees the same count for a client. All mutual exclusion is delegated
//! to the store's atomic increment; nothing here takes an in-process lock on
//! behalf of a counter.

pub mod keys;
pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("counter store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("counter store task failed: {0}")]
    Task(String),
}

/// Atomic increment-with-expiry counters keyed by string.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments `key` by one and returns the new count.
    ///
    /// A key created by this call, or found without an expiry, is set to expire
    /// `window_secs` from now within the same atomic step.
    async fn hit(&self, key: &str, window_secs: u64) -> Result<u64, StoreError>;

    /// Remaining lifetime of `key` in seconds, `None` if it is absent or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Current value of `key` without touching it. Diagnostic read, never
    /// called on the request path.
    async fn count(&self, key: &str) -> Result<Option<u64>, StoreError>;
}
