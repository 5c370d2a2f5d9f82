mod error;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

pub use error::{CacheError, CacheResult};
pub use keys::CacheKeys;
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::{RedisCache, StreamEntry};
pub use traits::Cache;

use crate::{clock::Clock, config::CacheConfig};

/// Build the configured cache backend.
pub async fn from_config(
    config: &CacheConfig,
    clock: Arc<dyn Clock>,
) -> CacheResult<Arc<dyn Cache>> {
    match config {
        CacheConfig::Memory(c) => Ok(Arc::new(MemoryCache::with_clock(c, clock))),
        #[cfg(feature = "redis")]
        CacheConfig::Redis(c) => Ok(Arc::new(RedisCache::from_config(c).await?)),
        #[cfg(not(feature = "redis"))]
        CacheConfig::Redis(_) => Err(CacheError::Internal(
            "Redis cache configured but the `redis` feature is not enabled".into(),
        )),
    }
}
