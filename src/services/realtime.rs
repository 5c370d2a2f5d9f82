//! Daily token counters kept in the cache.
//!
//! Counters live under `consumption:org:<org>:today` and
//! `consumption:user:<user>:today` and expire at the next 00:00 UTC, so a
//! fresh day starts from zero without a reset job.

use std::sync::Arc;

use crate::{
    cache::{Cache, CacheKeys, CacheResult},
    clock::{self, Clock},
};

pub struct RealtimeCounters {
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
}

impl RealtimeCounters {
    pub fn new(cache: Arc<dyn Cache>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    /// Add `tokens` to the organization's and the user's counters.
    pub async fn increment(&self, org_id: &str, user_id: &str, tokens: i64) -> CacheResult<()> {
        let ttl = clock::until_next_midnight(self.clock.now());

        let org_total = self
            .cache
            .incr_by(&CacheKeys::org_tokens_today(org_id), tokens, ttl)
            .await?;
        let user_total = self
            .cache
            .incr_by(&CacheKeys::user_tokens_today(user_id), tokens, ttl)
            .await?;

        tracing::trace!(
            org_id = org_id,
            user_id = user_id,
            tokens = tokens,
            org_total = org_total,
            user_total = user_total,
            "Realtime counters updated"
        );
        Ok(())
    }

    /// Current value of a counter key; an absent key reads as zero.
    pub async fn read(&self, key: &str) -> CacheResult<i64> {
        Ok(self.cache.get_counter(key).await?.unwrap_or(0))
    }

    pub async fn org_tokens_today(&self, org_id: &str) -> CacheResult<i64> {
        self.read(&CacheKeys::org_tokens_today(org_id)).await
    }

    pub async fn user_tokens_today(&self, user_id: &str) -> CacheResult<i64> {
        self.read(&CacheKeys::user_tokens_today(user_id)).await
    }
}
