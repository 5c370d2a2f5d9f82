use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cache configuration.
///
/// The cache holds request events awaiting their response and the daily
/// realtime token counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CacheConfig {
    /// In-process cache. Single node only: requests and responses must be
    /// consumed by the same process to match.
    Memory(MemoryCacheConfig),

    /// Redis cache. Required when running more than one consumer.
    Redis(RedisCacheConfig),
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Memory(MemoryCacheConfig::default())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CacheConfig::Memory(c) => c.validate(),
            CacheConfig::Redis(c) => c.validate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries before least-recently-used eviction.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Entries removed per eviction pass once the cache is full.
    #[serde(default = "default_eviction_batch_size")]
    pub eviction_batch_size: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            eviction_batch_size: default_eviction_batch_size(),
        }
    }
}

impl MemoryCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::Validation(
                "cache.max_entries must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_entries() -> usize {
    100_000
}

fn default_eviction_batch_size() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisCacheConfig {
    /// Redis URL. In cluster mode, a comma-separated list of node URLs.
    pub url: String,

    /// Prefix applied to every key and stream name.
    #[serde(default)]
    pub key_prefix: String,

    /// Enables cluster mode when present.
    #[serde(default)]
    pub cluster: Option<RedisClusterConfig>,
}

impl RedisCacheConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisClusterConfig {
    #[serde(default)]
    pub read_from_replicas: bool,

    #[serde(default = "default_cluster_retries")]
    pub retries: u32,

    #[serde(default = "default_cluster_connection_timeout")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_cluster_response_timeout")]
    pub response_timeout_secs: u64,
}

fn default_cluster_retries() -> u32 {
    3
}

fn default_cluster_connection_timeout() -> u64 {
    5
}

fn default_cluster_response_timeout() -> u64 {
    1
}
