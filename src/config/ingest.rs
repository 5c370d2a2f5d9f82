use serde::{Deserialize, Serialize};

use super::{ConfigError, RedisCacheConfig};

/// Usage event consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    /// How long a request event waits in the cache for its response.
    #[serde(default = "default_match_ttl")]
    pub match_ttl_secs: u64,

    #[serde(default = "default_request_stream")]
    pub request_stream: String,

    #[serde(default = "default_response_stream")]
    pub response_stream: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Consumer name within the group. Defaults to a random per-process name.
    #[serde(default)]
    pub consumer_name: Option<String>,

    /// Messages fetched per read.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a read blocks waiting for new messages.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// Idle time after which an unacknowledged message is redelivered.
    #[serde(default = "default_redeliver_after_ms")]
    pub redeliver_after_ms: u64,

    #[serde(default)]
    pub streams: StreamsConfig,

    #[serde(default)]
    pub sweep: SweepConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            match_ttl_secs: default_match_ttl(),
            request_stream: default_request_stream(),
            response_stream: default_response_stream(),
            consumer_group: default_consumer_group(),
            consumer_name: None,
            batch_size: default_batch_size(),
            block_timeout_ms: default_block_timeout_ms(),
            redeliver_after_ms: default_redeliver_after_ms(),
            streams: StreamsConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.match_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "ingest.match_ttl_secs must be greater than 0".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "ingest.batch_size must be greater than 0".into(),
            ));
        }
        if self.request_stream == self.response_stream {
            return Err(ConfigError::Validation(
                "ingest.request_stream and ingest.response_stream must differ".into(),
            ));
        }
        match &self.streams {
            StreamsConfig::None => Ok(()),
            StreamsConfig::Redis(c) => c.validate(),
        }
    }
}

fn default_match_ttl() -> u64 {
    3600
}

fn default_request_stream() -> String {
    "llm.request".to_string()
}

fn default_response_stream() -> String {
    "llm.response".to_string()
}

fn default_consumer_group() -> String {
    "consumption-ledger".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_block_timeout_ms() -> u64 {
    5000
}

fn default_redeliver_after_ms() -> u64 {
    60_000
}

/// Transport the usage events arrive on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum StreamsConfig {
    /// Ingestion disabled; only the batch jobs and webhooks run.
    #[default]
    None,

    /// Redis Streams with consumer groups.
    Redis(RedisCacheConfig),
}

/// Reconciliation of request events whose response never arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Extra time past the match TTL before a pending request is swept.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Maximum pending requests reconciled per sweep.
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grace_secs: default_grace_secs(),
            batch_size: default_sweep_batch_size(),
        }
    }
}

fn default_grace_secs() -> u64 {
    300
}

fn default_sweep_batch_size() -> u32 {
    500
}
