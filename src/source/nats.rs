//! NATS JetStream message source
//!
//! Implements `MessageSource` over a durable JetStream pull consumer.
//! Each `receive` is a bounded batch fetch — `expires` is the long-poll
//! wait budget. Acknowledgement is deferred: each delivery carries an
//! ack callback the pipeline invokes after routing, so an unprocessed
//! message stays below the ack floor and is redelivered (at-least-once).

use crate::error::{IngestError, Result};
use crate::source::{MessageSource, PendingMessage};
use crate::types::QueuedMessage;
use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

/// Configuration for the NATS message source
#[derive(Debug, Clone)]
pub struct NatsSourceConfig {
    /// NATS server URL
    pub url: String,

    /// JetStream stream holding login events
    pub stream_name: String,

    /// Subject the login producer publishes to
    pub subject: String,

    /// Durable consumer name
    pub consumer_name: String,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Optional auth token
    pub token: Option<String>,
}

impl Default for NatsSourceConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            stream_name: "LOGIN_EVENTS".to_string(),
            subject: "logins.raw".to_string(),
            consumer_name: "login-ingest".to_string(),
            connect_timeout_secs: 10,
            token: None,
        }
    }
}

impl NatsSourceConfig {
    /// Build a config from `LOGIN_INGEST_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_or("LOGIN_INGEST_NATS_URL", defaults.url),
            stream_name: env_or("LOGIN_INGEST_NATS_STREAM", defaults.stream_name),
            subject: env_or("LOGIN_INGEST_NATS_SUBJECT", defaults.subject),
            consumer_name: env_or("LOGIN_INGEST_NATS_CONSUMER", defaults.consumer_name),
            connect_timeout_secs: defaults.connect_timeout_secs,
            token: std::env::var("LOGIN_INGEST_NATS_TOKEN").ok(),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

/// NATS JetStream message source
///
/// Owns the connection and a durable pull consumer for the run.
pub struct NatsSource {
    consumer: jetstream::consumer::Consumer<jetstream::consumer::pull::Config>,
    stream_name: String,
}

impl NatsSource {
    /// Connect to NATS and set up the stream and durable consumer
    pub async fn connect(config: NatsSourceConfig) -> Result<Self> {
        let mut opts = async_nats::ConnectOptions::new()
            .connection_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(ref token) = config.token {
            opts = opts.token(token.clone());
        }

        let client = opts
            .connect(&config.url)
            .await
            .map_err(|e| IngestError::Queue(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let js = jetstream::new(client);

        let stream = js
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream_name.clone(),
                subjects: vec![config.subject.clone()],
                retention: jetstream::stream::RetentionPolicy::Limits,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                IngestError::Queue(format!(
                    "Failed to create/get stream '{}': {}",
                    config.stream_name, e
                ))
            })?;

        let consumer = stream
            .get_or_create_consumer(
                &config.consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(config.consumer_name.clone()),
                    filter_subject: config.subject.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                IngestError::Queue(format!(
                    "Failed to create durable consumer '{}': {}",
                    config.consumer_name, e
                ))
            })?;

        tracing::info!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            subject = %config.subject,
            "JetStream consumer ready"
        );

        Ok(Self {
            consumer,
            stream_name: config.stream_name,
        })
    }
}

#[async_trait]
impl MessageSource for NatsSource {
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<PendingMessage>> {
        let batch = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(wait)
            .messages()
            .await
            .map_err(|e| IngestError::Queue(format!("Failed to fetch batch: {}", e)))?;

        let mut messages = Vec::with_capacity(max_messages);
        let mut batch = std::pin::pin!(batch);
        while let Some(msg) = batch.next().await {
            let msg = msg.map_err(|e| IngestError::Queue(format!("Batch read failed: {}", e)))?;

            let mut queued = QueuedMessage::new(msg.payload.clone())
                .with_attribute("stream", self.stream_name.clone());
            if let Ok(info) = msg.info() {
                queued = queued
                    .with_attribute("sequence", info.stream_sequence.to_string())
                    .with_attribute("num_delivered", info.delivered.to_string());
            }

            // Ack stays with the caller: a crash before routing leaves
            // the message unacked and JetStream redelivers it
            messages.push(PendingMessage::with_ack(queued, move || {
                Box::pin(async move {
                    msg.ack()
                        .await
                        .map_err(|e| IngestError::Queue(format!("Failed to acknowledge message: {}", e)))
                })
            }));
        }

        tracing::debug!(count = messages.len(), "Fetched message batch");
        Ok(messages)
    }

    fn name(&self) -> &str {
        "nats"
    }
}
