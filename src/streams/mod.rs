//! Event streams carrying usage events from the gateway.
//!
//! Delivery is at-least-once: a message stays pending until acknowledged,
//! and a message that is never acknowledged is delivered again.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStream;
#[cfg(feature = "redis")]
pub use redis::RedisStream;

use crate::{cache::CacheError, config::IngestConfig};

/// Entry field holding the JSON event.
pub const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Transport-assigned id used to acknowledge the message.
    pub id: String,
    pub payload: String,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Stream backend error: {0}")]
    Backend(#[from] CacheError),

    #[error("Stream not configured")]
    NotConfigured,

    #[error("Stream closed")]
    Closed,
}

pub type StreamResult<T> = Result<T, StreamError>;

#[async_trait]
pub trait EventStream: Send + Sync {
    /// Stream key, for logs and metrics.
    fn name(&self) -> &str;

    /// Wait up to `block` for messages and return at most `max` of them.
    ///
    /// Returns an empty batch on timeout.
    async fn read(&self, max: usize, block: Duration) -> StreamResult<Vec<StreamMessage>>;

    /// Mark a message processed; it will not be delivered again.
    async fn ack(&self, id: &str) -> StreamResult<()>;

    /// Give a message back for later redelivery.
    async fn nack(&self, id: &str) -> StreamResult<()>;
}

/// The request and response streams of one deployment.
#[derive(Clone)]
pub struct UsageStreams {
    pub requests: Arc<dyn EventStream>,
    pub responses: Arc<dyn EventStream>,
}

/// Connect the configured stream transport.
///
/// Returns `Ok(None)` when no transport is configured.
pub async fn from_config(config: &IngestConfig) -> StreamResult<Option<UsageStreams>> {
    match &config.streams {
        crate::config::StreamsConfig::None => Ok(None),
        #[cfg(feature = "redis")]
        crate::config::StreamsConfig::Redis(redis_config) => {
            let client = Arc::new(crate::cache::RedisCache::from_config(redis_config).await?);
            let consumer = config.consumer_name.clone().unwrap_or_else(default_consumer_name);

            let requests =
                RedisStream::connect(client.clone(), &config.request_stream, config, &consumer)
                    .await?;
            let responses =
                RedisStream::connect(client, &config.response_stream, config, &consumer).await?;

            Ok(Some(UsageStreams {
                requests: Arc::new(requests),
                responses: Arc::new(responses),
            }))
        }
        #[cfg(not(feature = "redis"))]
        crate::config::StreamsConfig::Redis(_) => Err(StreamError::NotConfigured),
    }
}

#[cfg(feature = "redis")]
fn default_consumer_name() -> String {
    format!("ledger-{}", uuid::Uuid::new_v4().simple())
}
