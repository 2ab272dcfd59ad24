//! In-memory message source for testing and single-process use
//!
//! Holds a queue of pre-seeded messages behind a lock. `receive` pops
//! up to the requested batch size without waiting — an empty queue
//! returns an empty batch immediately, mirroring a drained queue.

use crate::error::Result;
use crate::source::{MessageSource, PendingMessage};
use crate::types::QueuedMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory FIFO message source
#[derive(Default)]
pub struct MemorySource {
    messages: Arc<Mutex<VecDeque<QueuedMessage>>>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a message onto the queue
    pub async fn push(&self, message: QueuedMessage) {
        let mut messages = self.messages.lock().await;
        messages.push_back(message);
    }

    /// Seed a JSON value as a message body
    pub async fn push_json(&self, value: &serde_json::Value) {
        self.push(QueuedMessage::new(value.to_string())).await;
    }

    /// Number of messages still queued
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn receive(&self, max_messages: usize, _wait: Duration) -> Result<Vec<PendingMessage>> {
        let mut messages = self.messages.lock().await;
        let count = max_messages.min(messages.len());
        // A pop is final here, so deliveries carry no ack callback
        Ok(messages.drain(..count).map(PendingMessage::new).collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_respects_batch_size() {
        let source = MemorySource::new();
        for i in 0..5 {
            source
                .push(QueuedMessage::new(format!("{{\"n\":{}}}", i)))
                .await;
        }

        let batch = source.receive(3, Duration::from_secs(1)).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(source.len().await, 2);
    }

    #[tokio::test]
    async fn test_receive_empty_queue() {
        let source = MemorySource::new();
        let batch = source.receive(10, Duration::from_secs(1)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_receive_preserves_order() {
        let source = MemorySource::new();
        source.push(QueuedMessage::new("first")).await;
        source.push(QueuedMessage::new("second")).await;

        let batch = source.receive(10, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&batch[0].message.body[..], b"first");
        assert_eq!(&batch[1].message.body[..], b"second");
    }
}
