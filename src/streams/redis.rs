use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use super::{EventStream, PAYLOAD_FIELD, StreamMessage, StreamResult};
use crate::{cache::RedisCache, config::IngestConfig};

/// One Redis stream read through a consumer group.
///
/// Each read first reclaims entries that another delivery left unacknowledged
/// for longer than `redeliver_after_ms`, then reads new entries. A nack leaves
/// the entry pending so it is reclaimed once idle.
pub struct RedisStream {
    client: Arc<RedisCache>,
    stream: String,
    group: String,
    consumer: String,
    redeliver_after_ms: u64,
}

impl RedisStream {
    /// Attach to `stream`, creating the consumer group if it does not exist.
    pub async fn connect(
        client: Arc<RedisCache>,
        stream: &str,
        config: &IngestConfig,
        consumer: &str,
    ) -> StreamResult<Self> {
        let created = client
            .stream_create_group(stream, &config.consumer_group)
            .await?;
        tracing::info!(
            stream,
            group = %config.consumer_group,
            consumer,
            created,
            "Attached to Redis stream"
        );

        Ok(Self {
            client,
            stream: stream.to_string(),
            group: config.consumer_group.clone(),
            consumer: consumer.to_string(),
            redeliver_after_ms: config.redeliver_after_ms,
        })
    }

    fn to_message(entry: crate::cache::StreamEntry) -> StreamMessage {
        // Entries without a payload field decode as empty and are dropped
        // by the matcher as undecodable.
        let payload = entry.get(PAYLOAD_FIELD).unwrap_or_default().to_string();
        StreamMessage {
            id: entry.id,
            payload,
        }
    }
}

#[async_trait]
impl EventStream for RedisStream {
    fn name(&self) -> &str {
        &self.stream
    }

    async fn read(&self, max: usize, block: Duration) -> StreamResult<Vec<StreamMessage>> {
        let reclaimed = self
            .client
            .stream_claim_idle(
                &self.stream,
                &self.group,
                &self.consumer,
                self.redeliver_after_ms,
                max,
            )
            .await?;
        if !reclaimed.is_empty() {
            tracing::debug!(
                stream = %self.stream,
                count = reclaimed.len(),
                "Reclaimed idle stream entries"
            );
            return Ok(reclaimed.into_iter().map(Self::to_message).collect());
        }

        let block_ms = u64::try_from(block.as_millis()).unwrap_or(u64::MAX);
        let entries = self
            .client
            .stream_read_group(
                &self.stream,
                &self.group,
                &self.consumer,
                max,
                Some(block_ms),
            )
            .await?;
        Ok(entries.into_iter().map(Self::to_message).collect())
    }

    async fn ack(&self, id: &str) -> StreamResult<()> {
        self.client
            .stream_ack(&self.stream, &self.group, &[id])
            .await?;
        Ok(())
    }

    async fn nack(&self, _id: &str) -> StreamResult<()> {
        Ok(())
    }
}
