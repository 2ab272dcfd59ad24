//! Core data types for the login ingestion pipeline

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A raw login-event payload as received from the queue
///
/// Opaque mapping of string keys to arbitrary JSON values. Lives only for
/// the duration of one transform attempt; persisted verbatim only when
/// rejected (inside an [`ErrorRecord`]).
pub type RawMessage = serde_json::Map<String, serde_json::Value>;

/// One delivery from the message source
///
/// `body` is a JSON-encoded object expected to obey the [`RawMessage`]
/// required-field contract. Attributes carry source-specific metadata
/// (delivery counts, message ids) and are not interpreted by the pipeline.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// JSON-encoded message body
    pub body: Bytes,

    /// Source-specific message attributes
    pub attributes: HashMap<String, String>,
}

impl QueuedMessage {
    /// Create a message from a body with no attributes
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            attributes: HashMap::new(),
        }
    }

    /// Add an attribute entry
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The validated, redacted projection of a raw message
///
/// Every field is non-null; the record is immutable once constructed.
/// Created by the transform engine, consumed once by the batch writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Opaque user identifier, passed through unmodified
    pub user_id: String,

    /// Device platform (e.g., "android", "ios")
    pub device_type: String,

    /// SHA-256 hex digest of the raw IP address
    pub masked_ip: String,

    /// SHA-256 hex digest of the raw device identifier
    pub masked_device_id: String,

    /// Locale string (e.g., "en_US")
    pub locale: String,

    /// Version string, kept as text — source data uses a dotted n.n.n
    /// format incompatible with integer columns
    pub app_version: String,

    /// UTC calendar date assigned at transform time, not message time
    pub create_date: NaiveDate,
}

/// A rejected message persisted to the error log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Free text describing the failure
    pub error_message: String,

    /// When the failure was recorded
    pub error_time: DateTime<Utc>,

    /// The original raw message, verbatim
    pub json_data: serde_json::Value,
}

impl ErrorRecord {
    /// Create an error record stamped with the current time
    pub fn new(json_data: serde_json::Value, error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            error_time: Utc::now(),
            json_data,
        }
    }
}
