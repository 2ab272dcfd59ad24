//! Message source trait — the acquisition boundary for queue backends
//!
//! The pipeline treats the queue as an opaque source with a single
//! long-poll acquisition call. Backends (NATS JetStream, in-memory)
//! implement `MessageSource`; an empty receive signals end-of-stream.
//! Deliveries carry a deferred ack handle so a message is only
//! acknowledged once it has been routed — a crash mid-processing
//! leaves it eligible for redelivery (at-least-once).

pub mod memory;
pub mod nats;

use crate::error::Result;
use crate::types::QueuedMessage;
use async_trait::async_trait;
use std::time::Duration;

/// Core trait for message-queue backends
///
/// `receive` is a long poll: it blocks up to `wait` for messages and
/// returns at most `max_messages`. An empty result means the queue has
/// been drained — the pipeline's sole termination condition.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Receive up to `max_messages`, waiting at most `wait`
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<PendingMessage>>;

    /// Source name (e.g., "nats", "memory")
    fn name(&self) -> &str;
}

/// A delivered message pending acknowledgement
///
/// The ack is a deferred callback: callers process the message first
/// and acknowledge afterwards, so the source's ack floor never moves
/// past work that has not been routed yet.
pub struct PendingMessage {
    /// The delivered message
    pub message: QueuedMessage,

    /// Ack callback — call to confirm processing
    ack_fn: Option<Box<dyn FnOnce() -> futures::future::BoxFuture<'static, Result<()>> + Send>>,
}

impl PendingMessage {
    /// A delivery needing no acknowledgement (in-memory backend)
    pub fn new(message: QueuedMessage) -> Self {
        Self {
            message,
            ack_fn: None,
        }
    }

    /// A delivery with an ack callback
    pub fn with_ack(
        message: QueuedMessage,
        ack_fn: impl FnOnce() -> futures::future::BoxFuture<'static, Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            message,
            ack_fn: Some(Box::new(ack_fn)),
        }
    }

    /// Acknowledge successful processing
    pub async fn ack(self) -> Result<()> {
        match self.ack_fn {
            Some(ack_fn) => ack_fn().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ack_without_callback_is_noop() {
        let pending = PendingMessage::new(QueuedMessage::new("{}"));
        pending.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_invokes_callback() {
        let acked = Arc::new(AtomicBool::new(false));
        let flag = acked.clone();

        let pending = PendingMessage::with_ack(QueuedMessage::new("{}"), move || {
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        });

        assert!(!acked.load(Ordering::SeqCst));
        pending.ack().await.unwrap();
        assert!(acked.load(Ordering::SeqCst));
    }
}
