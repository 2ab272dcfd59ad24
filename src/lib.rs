//! # login-ingest
//!
//! Queue-to-Postgres ingestion pipeline for login events with PII redaction.
//!
//! ## Overview
//!
//! `login-ingest` drains login-event messages from a queue, masks the PII
//! fields (`ip`, `device_id`) with one-way SHA-256 digests, validates the
//! required-field contract, and persists normalized records to a
//! `user_logins` table. Malformed messages are routed to a separate error
//! log with the original payload and the failure reason.
//!
//! ## Quick Start
//!
//! ```rust
//! use login_ingest::pipeline::{Pipeline, PipelineConfig};
//! use login_ingest::source::memory::MemorySource;
//! use login_ingest::store::{ErrorSink, LoginSink, MemoryErrorSink, MemoryLoginSink};
//! use std::sync::Arc;
//!
//! # async fn example() -> login_ingest::Result<()> {
//! let source = MemorySource::new();
//! source.push_json(&serde_json::json!({
//!     "device_id": "d1", "ip": "1.2.3.4", "user_id": "u1",
//!     "device_type": "android", "app_version": "2.3.0", "locale": "en_US",
//! })).await;
//!
//! let logins: Arc<MemoryLoginSink> = Arc::new(MemoryLoginSink::new());
//! let errors: Arc<MemoryErrorSink> = Arc::new(MemoryErrorSink::new());
//!
//! let pipeline = Pipeline::new(
//!     source,
//!     logins.clone() as Arc<dyn LoginSink>,
//!     errors.clone() as Arc<dyn ErrorSink>,
//!     PipelineConfig::default(),
//! );
//!
//! let stats = pipeline.run().await?;
//! println!("written: {}", stats.written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **MessageSource** trait — acquisition boundary; memory and NATS
//!   JetStream backends
//! - **redact** — pure transform from raw message to normalized record
//! - **LoginSink** / **ErrorSink** traits — write boundaries; memory and
//!   Postgres backends
//! - **Pipeline** — sequential poll/transform/route driver, terminating
//!   when the queue is observed empty

pub mod error;
pub mod pipeline;
pub mod redact;
pub mod source;
pub mod store;
pub mod types;

// Re-export core types
pub use error::{IngestError, Result};
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats};
pub use redact::{hash_pii, transform, REQUIRED_FIELDS};
pub use source::{MessageSource, PendingMessage};
pub use store::{BatchOutcome, ErrorSink, LoginSink};
pub use types::{ErrorRecord, NormalizedRecord, QueuedMessage, RawMessage};

// Re-export backends for convenience
pub use source::memory::MemorySource;
pub use source::nats::{NatsSource, NatsSourceConfig};
pub use store::postgres::{PgConfig, PgErrorSink, PgStore};
pub use store::{MemoryErrorSink, MemoryLoginSink};
