use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{EventStream, StreamMessage, StreamResult};

#[derive(Default)]
struct State {
    next_id: u64,
    queue: VecDeque<StreamMessage>,
    pending: Vec<StreamMessage>,
}

/// In-process stream for tests and single-binary setups.
///
/// Nacked messages go back to the front of the queue so they are the next
/// ones delivered.
pub struct MemoryStream {
    name: String,
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryStream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Append a message and return its id.
    pub fn publish(&self, payload: impl Into<String>) -> String {
        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = format!("{}-0", state.next_id);
            state.queue.push_back(StreamMessage {
                id: id.clone(),
                payload: payload.into(),
            });
            id
        };
        self.notify.notify_one();
        id
    }

    /// Messages delivered but not yet acknowledged.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Messages not yet delivered.
    pub fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn take(&self, max: usize) -> Vec<StreamMessage> {
        let mut state = self.state.lock();
        let n = max.min(state.queue.len());
        let batch: Vec<StreamMessage> = state.queue.drain(..n).collect();
        state.pending.extend(batch.iter().cloned());
        batch
    }
}

#[async_trait]
impl EventStream for MemoryStream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, max: usize, block: Duration) -> StreamResult<Vec<StreamMessage>> {
        let batch = self.take(max);
        if !batch.is_empty() {
            return Ok(batch);
        }

        let _ = tokio::time::timeout(block, self.notify.notified()).await;
        Ok(self.take(max))
    }

    async fn ack(&self, id: &str) -> StreamResult<()> {
        self.state.lock().pending.retain(|m| m.id != id);
        Ok(())
    }

    async fn nack(&self, id: &str) -> StreamResult<()> {
        let mut state = self.state.lock();
        if let Some(pos) = state.pending.iter().position(|m| m.id == id) {
            let message = state.pending.remove(pos);
            state.queue.push_front(message);
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_ack() {
        let stream = MemoryStream::new("llm.request");
        stream.publish("a");
        stream.publish("b");

        let batch = stream.read(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, "a");
        assert_eq!(stream.pending_len(), 2);

        stream.ack(&batch[0].id).await.unwrap();
        stream.ack(&batch[1].id).await.unwrap();
        assert_eq!(stream.pending_len(), 0);
        assert_eq!(stream.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_batch_size_respected() {
        let stream = MemoryStream::new("s");
        for i in 0..5 {
            stream.publish(i.to_string());
        }
        let batch = stream.read(2, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(stream.queued_len(), 3);
    }

    #[tokio::test]
    async fn test_nack_redelivers_first() {
        let stream = MemoryStream::new("s");
        stream.publish("first");
        stream.publish("second");

        let batch = stream.read(1, Duration::from_millis(10)).await.unwrap();
        stream.nack(&batch[0].id).await.unwrap();

        let again = stream.read(1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(again[0].payload, "first");
        assert_eq!(again[0].id, batch[0].id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_times_out_empty() {
        let stream = MemoryStream::new("s");
        let batch = stream.read(10, Duration::from_secs(5)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_read_wakes_on_publish() {
        let stream = std::sync::Arc::new(MemoryStream::new("s"));
        let reader = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.read(10, Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        stream.publish("late");

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, "late");
    }
}
