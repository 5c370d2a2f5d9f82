use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};

use super::{error::CacheResult, traits::Cache};
use crate::{
    clock::{Clock, SystemClock},
    config::MemoryCacheConfig,
};

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
    last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

struct CounterEntry {
    value: i64,
    expires_at: Option<DateTime<Utc>>,
}

impl CounterEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// In-memory cache implementation using DashMap for concurrent access.
///
/// Expiry is evaluated against the injected [`Clock`], so tests can move time
/// forward without sleeping.
///
/// **WARNING**: Not suitable for multi-node deployments. Each process keeps its
/// own pending requests and counters; a response consumed by a different node
/// than its request will not be matched. Use Redis when running more than one
/// consumer.
pub struct MemoryCache {
    data: DashMap<String, CacheEntry>,
    counters: DashMap<String, CounterEntry>,
    max_entries: usize,
    eviction_batch_size: usize,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(config: &MemoryCacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &MemoryCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            data: DashMap::new(),
            counters: DashMap::new(),
            max_entries: config.max_entries,
            eviction_batch_size: config.eviction_batch_size.max(1),
            clock,
        }
    }

    fn expiry(&self, now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
        if ttl.is_zero() {
            return None;
        }
        chrono::Duration::from_std(ttl).ok().map(|ttl| now + ttl)
    }

    fn evict_if_needed(&self, now: DateTime<Utc>) {
        if self.data.len() < self.max_entries {
            return;
        }

        // First pass: remove all expired entries
        self.data.retain(|_, entry| !entry.is_expired(now));
        self.counters.retain(|_, entry| !entry.is_expired(now));

        let current_len = self.data.len();
        if current_len < self.max_entries {
            return;
        }

        let target_size = self.max_entries.saturating_sub(self.eviction_batch_size);
        let to_evict = current_len.saturating_sub(target_size);
        if to_evict == 0 {
            return;
        }

        // Oldest access first
        let mut entries: Vec<_> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_accessed))
            .collect();
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.data.remove(&key);
        }
    }

    /// Number of live (unexpired) entries, counters excluded.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.data.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        if let Some(mut entry) = self.data.get_mut(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.data.remove_if(key, |_, e| e.is_expired(now));
                return Ok(None);
            }

            entry.last_accessed = now;
            Ok(Some(entry.data.clone()))
        } else {
            Ok(None)
        }
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let now = self.clock.now();
        self.evict_if_needed(now);

        self.data.insert(
            key.to_string(),
            CacheEntry {
                data: value.to_vec(),
                expires_at: self.expiry(now, ttl),
                last_accessed: now,
            },
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.remove(key);
        self.counters.remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> CacheResult<i64> {
        let now = self.clock.now();
        let expires_at = self.expiry(now, ttl);

        // The entry guard holds the shard lock, making read-modify-write atomic
        let value = match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let counter = e.get_mut();
                if counter.is_expired(now) {
                    counter.value = 0;
                    counter.expires_at = None;
                }
                counter.value = counter.value.saturating_add(delta);
                if counter.expires_at.is_none() {
                    counter.expires_at = expires_at;
                }
                counter.value
            }
            Entry::Vacant(e) => {
                e.insert(CounterEntry {
                    value: delta,
                    expires_at,
                });
                delta
            }
        };

        Ok(value)
    }

    async fn get_counter(&self, key: &str) -> CacheResult<Option<i64>> {
        let now = self.clock.now();
        match self.counters.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.value)),
            Some(entry) => {
                drop(entry);
                self.counters.remove_if(key, |_, e| e.is_expired(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
