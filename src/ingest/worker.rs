use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use super::{IngestResult, UsageMatcher};
use crate::{
    config::IngestConfig,
    observability::metrics,
    streams::{EventStream, StreamMessage, StreamResult},
};

/// Pause after a read error or a batch containing a retried message.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Requests,
    Responses,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Requests => "requests",
            StreamKind::Responses => "responses",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Processed,
    /// Undecodable; acknowledged so it never comes back.
    Dropped,
    /// Left unacknowledged for redelivery.
    Retried,
    /// Shutdown arrived mid-message; left unacknowledged.
    Interrupted,
}

impl MessageOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Processed => "processed",
            MessageOutcome::Dropped => "dropped",
            MessageOutcome::Retried => "retried",
            MessageOutcome::Interrupted => "interrupted",
        }
    }
}

/// Sequential consumer of one usage stream.
pub struct StreamWorker {
    kind: StreamKind,
    stream: Arc<dyn EventStream>,
    matcher: Arc<UsageMatcher>,
    batch_size: usize,
    block: Duration,
}

impl StreamWorker {
    pub fn new(
        kind: StreamKind,
        stream: Arc<dyn EventStream>,
        matcher: Arc<UsageMatcher>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            kind,
            stream,
            matcher,
            batch_size: config.batch_size,
            block: Duration::from_millis(config.block_timeout_ms),
        }
    }

    /// Consume until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            stream = self.stream.name(),
            kind = self.kind.as_str(),
            batch_size = self.batch_size,
            "Starting usage stream worker"
        );

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.poll(&cancel) => polled,
            };

            let pause = match polled {
                Ok(outcomes) => outcomes.contains(&MessageOutcome::Retried),
                Err(e) => {
                    tracing::error!(stream = self.stream.name(), error = %e, "Error reading usage stream");
                    true
                }
            };
            if pause {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }

        tracing::info!(stream = self.stream.name(), "Usage stream worker stopped");
    }

    /// Read one batch and process it in order.
    pub async fn poll(&self, cancel: &CancellationToken) -> StreamResult<Vec<MessageOutcome>> {
        let messages = self.stream.read(self.batch_size, self.block).await?;
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in &messages {
            if cancel.is_cancelled() {
                break;
            }
            outcomes.push(self.process(message, cancel).await);
        }
        Ok(outcomes)
    }

    async fn process(&self, message: &StreamMessage, cancel: &CancellationToken) -> MessageOutcome {
        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.dispatch(&message.payload) => Some(result),
        };

        let outcome = match result {
            None => MessageOutcome::Interrupted,
            Some(Ok(())) => MessageOutcome::Processed,
            Some(Err(e)) if e.should_ack() => {
                tracing::warn!(
                    stream = self.stream.name(),
                    message_id = %message.id,
                    error = %e,
                    "Dropping undecodable usage event"
                );
                MessageOutcome::Dropped
            }
            Some(Err(e)) => {
                tracing::error!(
                    stream = self.stream.name(),
                    message_id = %message.id,
                    error = %e,
                    "Failed to process usage event, leaving for redelivery"
                );
                MessageOutcome::Retried
            }
        };

        let settled = match outcome {
            MessageOutcome::Processed | MessageOutcome::Dropped => self.stream.ack(&message.id).await,
            MessageOutcome::Retried => self.stream.nack(&message.id).await,
            MessageOutcome::Interrupted => Ok(()),
        };
        if let Err(e) = settled {
            tracing::warn!(
                stream = self.stream.name(),
                message_id = %message.id,
                error = %e,
                "Failed to settle stream message"
            );
        }

        metrics::record_stream_message(self.stream.name(), outcome.as_str());
        outcome
    }

    async fn dispatch(&self, payload: &str) -> IngestResult<()> {
        match self.kind {
            StreamKind::Requests => self.matcher.handle_request(payload).await,
            StreamKind::Responses => self.matcher.handle_response(payload).await.map(|_| ()),
        }
    }
}
