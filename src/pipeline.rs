//! Pipeline driver — poll, transform, route, repeat until drained
//!
//! Orchestrates one sequential flow: long-poll the message source,
//! drive each message through the transform engine, route successes to
//! the login sink and failures to the error sink. An empty poll is the
//! sole termination condition.

use crate::error::{IngestError, Result};
use crate::redact;
use crate::source::MessageSource;
use crate::store::{ErrorSink, LoginSink};
use crate::types::QueuedMessage;
use std::sync::Arc;
use std::time::Duration;

/// Driver tuning knobs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum messages per poll
    pub batch_size: usize,

    /// Long-poll wait budget per receive call
    pub wait: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait: Duration::from_secs(20),
        }
    }
}

impl PipelineConfig {
    /// Build a config from `LOGIN_INGEST_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let batch_size = std::env::var("LOGIN_INGEST_BATCH_SIZE")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.batch_size);
        let wait = std::env::var("LOGIN_INGEST_WAIT_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.wait);

        Self { batch_size, wait }
    }
}

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Receive calls issued, including the final empty one
    pub polls: u64,

    /// Records committed to the primary store
    pub written: u64,

    /// Records dropped on insert/commit failure
    pub write_failures: u64,

    /// Messages routed to the error sink
    pub rejected: u64,
}

/// The ingestion pipeline driver
///
/// Owns the message source for the run; sinks are shared trait objects
/// so the same instances can be inspected by callers afterwards.
pub struct Pipeline {
    source: Box<dyn MessageSource>,
    logins: Arc<dyn LoginSink>,
    errors: Arc<dyn ErrorSink>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline over a source and a pair of sinks
    pub fn new(
        source: impl MessageSource + 'static,
        logins: Arc<dyn LoginSink>,
        errors: Arc<dyn ErrorSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source: Box::new(source),
            logins,
            errors,
            config,
        }
    }

    /// Run until the queue is observed empty
    ///
    /// Per-message and per-record failures are contained and counted;
    /// only source failures propagate out of the loop.
    pub async fn run(&self) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();

        loop {
            let batch = self
                .source
                .receive(self.config.batch_size, self.config.wait)
                .await?;
            stats.polls += 1;

            if batch.is_empty() {
                tracing::info!(
                    source = self.source.name(),
                    polls = stats.polls,
                    written = stats.written,
                    rejected = stats.rejected,
                    "No more messages to read, queue drained"
                );
                break;
            }

            for pending in batch {
                self.process(&pending.message, &mut stats).await;

                // Ack only after routing, so a crash mid-batch leaves
                // unprocessed messages eligible for redelivery
                if let Err(e) = pending.ack().await {
                    tracing::warn!(error = %e, "Failed to acknowledge message");
                }
            }
        }

        Ok(stats)
    }

    /// Deserialize, transform, and route one message
    async fn process(&self, message: &QueuedMessage, stats: &mut PipelineStats) {
        let value: serde_json::Value = match serde_json::from_slice(&message.body) {
            Ok(value) => value,
            Err(e) => {
                // Body is not JSON at all; keep it as a JSON string so
                // the error record still holds the original payload
                let body = String::from_utf8_lossy(&message.body).into_owned();
                let err = IngestError::from(e);
                self.reject(serde_json::Value::String(body), &err.to_string(), stats)
                    .await;
                return;
            }
        };

        let raw = match value.as_object() {
            Some(raw) => raw.clone(),
            None => {
                self.reject(value, "Payload is not a JSON object", stats)
                    .await;
                return;
            }
        };

        match redact::transform(&raw) {
            Ok(record) => {
                // One write call per successful record; the sink
                // isolates failures per record internally
                match self.logins.write_batch(std::slice::from_ref(&record)).await {
                    Ok(outcome) => {
                        stats.written += outcome.written as u64;
                        stats.write_failures += outcome.failed as u64;
                    }
                    Err(e) => {
                        tracing::error!(user_id = %record.user_id, error = %e, "Batch write failed");
                        stats.write_failures += 1;
                    }
                }
            }
            Err(e) => {
                self.reject(serde_json::Value::Object(raw), &e.to_string(), stats)
                    .await;
            }
        }
    }

    /// Route a rejected message to the error sink
    async fn reject(&self, json_data: serde_json::Value, reason: &str, stats: &mut PipelineStats) {
        tracing::warn!(reason = %reason, "Invalid or incomplete message skipped");
        stats.rejected += 1;

        if let Err(e) = self.errors.record(&json_data, reason).await {
            tracing::warn!(error = %e, "Failed to record rejected message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;
    use crate::store::{MemoryErrorSink, MemoryLoginSink};

    fn valid_login(user_id: &str) -> serde_json::Value {
        serde_json::json!({
            "device_id": "d1",
            "ip": "1.2.3.4",
            "user_id": user_id,
            "device_type": "android",
            "app_version": "2.3.0",
            "locale": "en_US",
        })
    }

    struct Harness {
        source: MemorySource,
        logins: Arc<MemoryLoginSink>,
        errors: Arc<MemoryErrorSink>,
    }

    impl Harness {
        fn new(logins: MemoryLoginSink) -> Self {
            Self {
                source: MemorySource::new(),
                logins: Arc::new(logins),
                errors: Arc::new(MemoryErrorSink::new()),
            }
        }

        fn pipeline(self) -> (Pipeline, Arc<MemoryLoginSink>, Arc<MemoryErrorSink>) {
            let logins = self.logins.clone();
            let errors = self.errors.clone();
            let pipeline = Pipeline::new(
                self.source,
                logins.clone() as Arc<dyn LoginSink>,
                errors.clone() as Arc<dyn ErrorSink>,
                PipelineConfig::default(),
            );
            (pipeline, logins, errors)
        }
    }

    #[tokio::test]
    async fn test_empty_queue_terminates_immediately() {
        let harness = Harness::new(MemoryLoginSink::new());
        let (pipeline, logins, errors) = harness.pipeline();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.polls, 1);
        assert_eq!(stats.written, 0);
        assert!(logins.is_empty().await);
        assert_eq!(errors.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_valid_messages_written() {
        let harness = Harness::new(MemoryLoginSink::new());
        harness.source.push_json(&valid_login("u1")).await;
        harness.source.push_json(&valid_login("u2")).await;
        let (pipeline, logins, errors) = harness.pipeline();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(stats.rejected, 0);
        assert_eq!(logins.len().await, 2);
        assert_eq!(errors.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_field_routed_to_error_sink() {
        let harness = Harness::new(MemoryLoginSink::new());
        let mut message = valid_login("u1");
        message.as_object_mut().unwrap().remove("locale");
        harness.source.push_json(&message).await;
        let (pipeline, logins, errors) = harness.pipeline();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.written, 0);
        assert_eq!(stats.rejected, 1);
        assert!(logins.is_empty().await);

        let records = errors.list(1).await.unwrap();
        assert_eq!(records[0].json_data, message);
        assert!(records[0].error_message.contains("locale"));
    }

    #[tokio::test]
    async fn test_non_json_body_routed_to_error_sink() {
        let harness = Harness::new(MemoryLoginSink::new());
        harness
            .source
            .push(QueuedMessage::new("not json at all"))
            .await;
        let (pipeline, _, errors) = harness.pipeline();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.rejected, 1);
        let records = errors.list(1).await.unwrap();
        assert_eq!(
            records[0].json_data,
            serde_json::Value::String("not json at all".to_string())
        );
        assert!(records[0].error_message.contains("Serialization error"));
    }

    #[tokio::test]
    async fn test_non_object_payload_routed_to_error_sink() {
        let harness = Harness::new(MemoryLoginSink::new());
        harness.source.push_json(&serde_json::json!([1, 2, 3])).await;
        let (pipeline, _, errors) = harness.pipeline();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.rejected, 1);
        let records = errors.list(1).await.unwrap();
        assert!(records[0].error_message.contains("JSON object"));
    }

    #[tokio::test]
    async fn test_write_failure_does_not_stop_run() {
        let harness = Harness::new(MemoryLoginSink::new().with_rejected_user("bad"));
        harness.source.push_json(&valid_login("u1")).await;
        harness.source.push_json(&valid_login("bad")).await;
        harness.source.push_json(&valid_login("u2")).await;
        let (pipeline, logins, errors) = harness.pipeline();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(stats.write_failures, 1);
        assert_eq!(logins.len().await, 2);
        // Write failures are logged and dropped, not error-sinked
        assert_eq!(errors.count().await.unwrap(), 0);
    }

    /// Source yielding one delivery with a caller-supplied ack callback
    struct SingleDeliverySource {
        pending: tokio::sync::Mutex<Option<crate::source::PendingMessage>>,
    }

    #[async_trait::async_trait]
    impl crate::source::MessageSource for SingleDeliverySource {
        async fn receive(
            &self,
            _max_messages: usize,
            _wait: Duration,
        ) -> crate::error::Result<Vec<crate::source::PendingMessage>> {
            Ok(self.pending.lock().await.take().into_iter().collect())
        }

        fn name(&self) -> &str {
            "single"
        }
    }

    #[tokio::test]
    async fn test_message_acked_only_after_write() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let logins = Arc::new(MemoryLoginSink::new());
        let errors = Arc::new(MemoryErrorSink::new());

        // Records how many rows were already committed when the ack fired;
        // MAX means the ack never ran
        let rows_at_ack = Arc::new(AtomicUsize::new(usize::MAX));
        let sink = logins.clone();
        let seen = rows_at_ack.clone();

        let pending = crate::source::PendingMessage::with_ack(
            QueuedMessage::new(valid_login("u1").to_string()),
            move || {
                Box::pin(async move {
                    seen.store(sink.len().await, Ordering::SeqCst);
                    Ok(())
                })
            },
        );

        let source = SingleDeliverySource {
            pending: tokio::sync::Mutex::new(Some(pending)),
        };
        let pipeline = Pipeline::new(
            source,
            logins.clone() as Arc<dyn LoginSink>,
            errors as Arc<dyn ErrorSink>,
            PipelineConfig::default(),
        );

        pipeline.run().await.unwrap();

        // The record must already be committed by the time the ack fires
        assert_eq!(rows_at_ack.load(Ordering::SeqCst), 1);
        assert_eq!(logins.len().await, 1);
    }

    #[tokio::test]
    async fn test_mixed_batch_counts() {
        let harness = Harness::new(MemoryLoginSink::new());
        harness.source.push_json(&valid_login("u1")).await;
        let mut incomplete = valid_login("u2");
        incomplete.as_object_mut().unwrap().remove("ip");
        harness.source.push_json(&incomplete).await;
        harness.source.push(QueuedMessage::new("{broken")).await;
        let (pipeline, logins, errors) = harness.pipeline();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.written, 1);
        assert_eq!(stats.rejected, 2);
        assert_eq!(logins.len().await, 1);
        assert_eq!(errors.count().await.unwrap(), 2);
    }
}
