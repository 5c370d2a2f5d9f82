use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheResult;

/// Key/value store with per-key expiry.
///
/// A zero `ttl` means "no expiry".
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get raw bytes from cache
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set raw bytes in cache with TTL, replacing any previous value and expiry
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete a value from cache
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Increment a counter by delta, returning the new value.
    ///
    /// The TTL is applied only when the key has no expiry yet, so repeated
    /// increments never push the expiry further out.
    async fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> CacheResult<i64>;

    /// Read a counter written by [`Cache::incr_by`].
    async fn get_counter(&self, key: &str) -> CacheResult<Option<i64>>;
}
