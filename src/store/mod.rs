//! Persistence traits — batch writer and error sink seams
//!
//! The pipeline writes through these traits so the durable store stays
//! an opaque collaborator. Postgres implementations live in
//! [`postgres`]; in-memory implementations back the tests.

pub mod postgres;

use crate::error::Result;
use crate::types::{ErrorRecord, NormalizedRecord};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of a batch write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records committed
    pub written: usize,

    /// Records rolled back and dropped
    pub failed: usize,
}

/// Trait for the primary login-record sink
///
/// Implementations isolate failures per record: one bad record never
/// blocks or aborts the rest of the batch. Per-record failures are
/// reported in the [`BatchOutcome`], not raised to the caller.
#[async_trait]
pub trait LoginSink: Send + Sync {
    /// Persist a batch of normalized records, one unit of work per record
    async fn write_batch(&self, records: &[NormalizedRecord]) -> Result<BatchOutcome>;
}

/// Trait for the rejected-message sink
///
/// Best-effort: implementations log and swallow their own storage
/// failures rather than escalating them into the pipeline.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Record a rejected message alongside the failure reason
    async fn record(&self, json_data: &serde_json::Value, reason: &str) -> Result<()>;

    /// Number of recorded errors
    async fn count(&self) -> Result<usize>;

    /// List recent error records, newest first
    async fn list(&self, limit: usize) -> Result<Vec<ErrorRecord>>;
}

/// In-memory login sink for development and testing
///
/// Optionally rejects records for configured user ids so tests can
/// exercise the per-record isolation guarantee.
#[derive(Default)]
pub struct MemoryLoginSink {
    rows: Arc<RwLock<Vec<NormalizedRecord>>>,
    reject_users: HashSet<String>,
}

impl MemoryLoginSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every record carrying this user id
    pub fn with_rejected_user(mut self, user_id: impl Into<String>) -> Self {
        self.reject_users.insert(user_id.into());
        self
    }

    /// Snapshot of the committed rows
    pub async fn rows(&self) -> Vec<NormalizedRecord> {
        self.rows.read().await.clone()
    }

    /// Number of committed rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether any rows were committed
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl LoginSink for MemoryLoginSink {
    async fn write_batch(&self, records: &[NormalizedRecord]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let mut rows = self.rows.write().await;

        for record in records {
            if self.reject_users.contains(&record.user_id) {
                let err = crate::error::IngestError::Write {
                    user_id: record.user_id.clone(),
                    reason: "configured rejection".to_string(),
                };
                tracing::error!(error = %err, "Record dropped");
                outcome.failed += 1;
                continue;
            }
            rows.push(record.clone());
            outcome.written += 1;
        }

        Ok(outcome)
    }
}

/// In-memory error sink for development and testing
#[derive(Default)]
pub struct MemoryErrorSink {
    records: Arc<RwLock<Vec<ErrorRecord>>>,
}

impl MemoryErrorSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ErrorSink for MemoryErrorSink {
    async fn record(&self, json_data: &serde_json::Value, reason: &str) -> Result<()> {
        tracing::warn!(reason = %reason, "Message routed to error sink");
        let mut records = self.records.write().await;
        records.push(ErrorRecord::new(json_data.clone(), reason));
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let records = self.records.read().await;
        Ok(records.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<ErrorRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_record(user_id: &str) -> NormalizedRecord {
        NormalizedRecord {
            user_id: user_id.to_string(),
            device_type: "android".to_string(),
            masked_ip: "ab".repeat(32),
            masked_device_id: "cd".repeat(32),
            locale: "en_US".to_string(),
            app_version: "2.3.0".to_string(),
            create_date: Utc::now().date_naive(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_write_batch() {
        let sink = MemoryLoginSink::new();
        let outcome = sink
            .write_batch(&[test_record("u1"), test_record("u2")])
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome { written: 2, failed: 0 });
        assert_eq!(sink.len().await, 2);
    }

    #[tokio::test]
    async fn test_bad_record_does_not_abort_batch() {
        let sink = MemoryLoginSink::new().with_rejected_user("u2");
        let batch = [test_record("u1"), test_record("u2"), test_record("u3")];

        let outcome = sink.write_batch(&batch).await.unwrap();

        assert_eq!(outcome, BatchOutcome { written: 2, failed: 1 });
        let rows = sink.rows().await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.user_id != "u2"));
    }

    #[tokio::test]
    async fn test_error_sink_record_and_count() {
        let sink = MemoryErrorSink::new();
        assert_eq!(sink.count().await.unwrap(), 0);

        let raw = serde_json::json!({"user_id": "u1"});
        sink.record(&raw, "Missing required fields").await.unwrap();

        assert_eq!(sink.count().await.unwrap(), 1);
        let records = sink.list(10).await.unwrap();
        assert_eq!(records[0].json_data, raw);
        assert!(records[0].error_message.contains("Missing"));
    }

    #[tokio::test]
    async fn test_error_sink_list_newest_first() {
        let sink = MemoryErrorSink::new();
        for i in 0..4 {
            sink.record(&serde_json::json!({"n": i}), &format!("reason {}", i))
                .await
                .unwrap();
        }

        let records = sink.list(2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].error_message, "reason 3");
        assert_eq!(records[1].error_message, "reason 2");
    }
}
