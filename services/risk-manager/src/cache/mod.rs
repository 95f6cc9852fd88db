//! Fast cache for mirrors, counters and the pending-order ledger
//!
//! A cache miss is never an error; callers fall back to the durable store or
//! a safe default. Counter operations are atomic on the backing store so they
//! stay correct across service instances.

pub mod memory;
pub mod redis_cache;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::MemoryCache;
pub use self::redis_cache::RedisCache;

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    /// Exists without an expiry
    Persistent,
    Expires(Duration),
}

/// Result of a sliding-window hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Whether this hit was recorded
    pub admitted: bool,
    /// Entries in the window after the hit
    pub count: u64,
}

/// Key/value cache with per-key expiry
#[async_trait]
pub trait FastCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Increment a counter, starting its expiry on the first increment
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64>;

    /// Evict entries older than `window`, then record this hit only if fewer
    /// than `max` remain
    async fn sliding_window_hit(&self, key: &str, window: Duration, max: u64) -> Result<WindowHit>;

    /// Entries currently inside the sliding window
    async fn sliding_window_count(&self, key: &str, window: Duration) -> Result<u64>;

    /// Set one hash field and (re)start the key's expiry
    async fn hset_ex(&self, key: &str, field: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove one hash field. Returns whether it existed.
    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    async fn ping(&self) -> Result<()>;
}

/// Read a JSON value from the cache, treating decode failures as misses
pub async fn get_json<T: serde::de::DeserializeOwned>(
    cache: &dyn FastCache,
    key: &str,
) -> Result<Option<T>> {
    Ok(cache
        .get(key)
        .await?
        .and_then(|raw| serde_json::from_str(&raw).ok()))
}

pub async fn set_json<T: serde::Serialize + Sync>(
    cache: &dyn FastCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set_ex(key, &raw, ttl).await
}
