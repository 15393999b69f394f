//! Shared key/value store linking the telemetry link and the control tick.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
pub mod memory;
pub mod valkey;

#[cfg(test)]
pub use memory::MemoryStore;
pub use valkey::ValkeyStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("store command timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Single-key atomic primitives; no operation spans more than one key.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Writes only when the key is absent. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Refreshes the TTL only while the key holds `expected`, returning the value seen.
    async fn refresh_if_held(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError>;

    /// Deletes only while the key holds `expected`.
    async fn delete_if_held(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Increments a counter, (re)arming its TTL, and returns the new count.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Pushes to the head of a list and trims it to `cap` entries.
    async fn push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), StoreError>;

    /// Whole list, newest first.
    async fn list(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

/// Reads a numeric key; unparseable values count as unknown.
pub async fn get_f64<S>(store: &S, key: &str) -> Result<Option<f64>, StoreError>
where
    S: StateStore + ?Sized,
{
    Ok(store
        .get(key)
        .await?
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite()))
}
