//! Error types for login-ingest

use thiserror::Error;

/// Errors that can occur in the ingestion pipeline
#[derive(Debug, Error)]
pub enum IngestError {
    /// Durable-store connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Message-source failure (consumer creation, poll, ack)
    #[error("Queue error: {0}")]
    Queue(String),

    /// Required fields absent from a raw message
    #[error("Missing required fields {fields:?} in message")]
    MissingFields {
        fields: Vec<String>,
    },

    /// Unexpected value shape while mapping a raw message
    #[error("Failed to transform message: {reason}")]
    Transform {
        reason: String,
    },

    /// Primary-store insert failure for a single record
    #[error("Failed to write record for user '{user_id}': {reason}")]
    Write {
        user_id: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;
