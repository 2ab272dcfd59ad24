//! Postgres persistence — connection manager, migrations, batch writer,
//! and error sink
//!
//! The primary connection is owned by [`PgStore`] for the lifetime of a
//! run. The error sink opens its own connection per invocation, so
//! primary writes and error-log writes are never part of the same
//! transaction.

use crate::error::{IngestError, Result};
use crate::store::{BatchOutcome, ErrorSink, LoginSink};
use crate::types::{ErrorRecord, NormalizedRecord};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

/// Postgres connection parameters
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
        }
    }
}

impl PgConfig {
    /// Build a config from `LOGIN_INGEST_PG_*` environment variables,
    /// falling back to defaults for anything unset
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let port = match std::env::var("LOGIN_INGEST_PG_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| IngestError::Config(format!("Invalid Postgres port '{}'", raw)))?,
            Err(_) => defaults.port,
        };

        Ok(Self {
            host: env_or("LOGIN_INGEST_PG_HOST", defaults.host),
            port,
            dbname: env_or("LOGIN_INGEST_PG_DBNAME", defaults.dbname),
            user: env_or("LOGIN_INGEST_PG_USER", defaults.user),
            password: env_or("LOGIN_INGEST_PG_PASSWORD", defaults.password),
        })
    }

    /// Connection string in libpq keyword form
    pub fn conn_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.dbname, self.user, self.password
        )
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

/// Versioned startup migrations, applied in order exactly once each
///
/// 002 retypes `app_version` on pre-existing tables: the upstream schema
/// declared it as an integer while the queue delivers dotted n.n.n
/// version strings.
const MIGRATIONS: &[(i32, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS user_logins (
            user_id          VARCHAR NOT NULL,
            device_type      VARCHAR NOT NULL,
            masked_ip        VARCHAR NOT NULL,
            masked_device_id VARCHAR NOT NULL,
            locale           VARCHAR NOT NULL,
            app_version      VARCHAR NOT NULL,
            create_date      DATE NOT NULL
        )",
    ),
    (
        2,
        "ALTER TABLE user_logins
            ALTER COLUMN app_version TYPE VARCHAR USING app_version::VARCHAR",
    ),
];

/// Primary-store handle: one connection, owned for the run
///
/// Implements [`LoginSink`] with per-record transactions. The client
/// sits behind a `Mutex` because transactions need `&mut` access.
pub struct PgStore {
    client: Mutex<Client>,
    conn_task: JoinHandle<()>,
}

impl PgStore {
    /// Open the primary connection
    ///
    /// Connectivity failure is a checked outcome, not a panic — callers
    /// decide whether to abort or retry at a higher level.
    pub async fn connect(config: &PgConfig) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(&config.conn_string(), NoTls)
            .await
            .map_err(|e| {
                tracing::error!(host = %config.host, error = %e, "Failed to connect to Postgres");
                IngestError::Connection(format!("{}:{}: {}", config.host, config.port, e))
            })?;

        let conn_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });

        tracing::info!(host = %config.host, dbname = %config.dbname, "Connected to Postgres");

        Ok(Self {
            client: Mutex::new(client),
            conn_task,
        })
    }

    /// Apply pending schema migrations
    ///
    /// Keeps a `schema_migrations` ledger so re-running is a no-op. Must
    /// complete before the first batch write: `user_logins.app_version`
    /// has to accept text by then.
    pub async fn run_migrations(&self) -> Result<()> {
        let client = self.client.lock().await;

        client
            .execute(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version    INT PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
                )",
                &[],
            )
            .await
            .map_err(|e| IngestError::Connection(format!("Failed to create migration ledger: {}", e)))?;

        for (version, sql) in MIGRATIONS {
            let applied = client
                .query_opt(
                    "SELECT version FROM schema_migrations WHERE version = $1",
                    &[version],
                )
                .await
                .map_err(|e| IngestError::Connection(format!("Failed to read migration ledger: {}", e)))?;

            if applied.is_some() {
                continue;
            }

            client
                .batch_execute(sql)
                .await
                .map_err(|e| {
                    IngestError::Connection(format!("Migration {} failed: {}", version, e))
                })?;

            client
                .execute(
                    "INSERT INTO schema_migrations (version) VALUES ($1)",
                    &[version],
                )
                .await
                .map_err(|e| {
                    IngestError::Connection(format!("Failed to record migration {}: {}", version, e))
                })?;

            tracing::info!(version, "Applied schema migration");
        }

        Ok(())
    }

    /// Verify connectivity with a round-trip
    pub async fn ping(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .execute("SELECT 1", &[])
            .await
            .map_err(|e| IngestError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Release the connection
    ///
    /// Safe to call after a failed write sequence; dropping the client
    /// ends the connection task.
    pub async fn close(self) {
        drop(self.client);
        let _ = self.conn_task.await;
        tracing::info!("Postgres connection released");
    }
}

#[async_trait]
impl LoginSink for PgStore {
    async fn write_batch(&self, records: &[NormalizedRecord]) -> Result<BatchOutcome> {
        let mut client = self.client.lock().await;
        let mut outcome = BatchOutcome::default();

        for record in records {
            // One transaction per record: a constraint violation rolls
            // back that record only and the batch continues
            let tx = match client.transaction().await {
                Ok(tx) => tx,
                Err(e) => {
                    tracing::error!(user_id = %record.user_id, error = %e, "Failed to begin transaction");
                    outcome.failed += 1;
                    continue;
                }
            };

            let inserted = tx
                .execute(
                    "INSERT INTO user_logins
                        (user_id, device_type, masked_ip, masked_device_id, locale, app_version, create_date)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    &[
                        &record.user_id,
                        &record.device_type,
                        &record.masked_ip,
                        &record.masked_device_id,
                        &record.locale,
                        &record.app_version,
                        &record.create_date,
                    ],
                )
                .await;

            match inserted {
                Ok(_) => match tx.commit().await {
                    Ok(()) => outcome.written += 1,
                    Err(e) => {
                        tracing::error!(user_id = %record.user_id, error = %e, "Failed to commit record");
                        outcome.failed += 1;
                    }
                },
                Err(e) => {
                    let err = IngestError::Write {
                        user_id: record.user_id.clone(),
                        reason: e.to_string(),
                    };
                    tracing::error!(error = %err, "Record dropped");
                    if let Err(e) = tx.rollback().await {
                        tracing::warn!(error = %e, "Rollback failed");
                    }
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }
}

/// Postgres error sink
///
/// Opens an independent connection per invocation and lazily creates
/// the error table. Best-effort: if the connection cannot be acquired
/// the failure is logged and the record is dropped.
pub struct PgErrorSink {
    config: PgConfig,
}

impl PgErrorSink {
    /// Create a sink that connects with the given parameters
    pub fn new(config: PgConfig) -> Self {
        Self { config }
    }

    async fn acquire(&self) -> Result<Client> {
        let (client, connection) = tokio_postgres::connect(&self.config.conn_string(), NoTls)
            .await
            .map_err(|e| IngestError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Error-sink connection error");
            }
        });

        Ok(client)
    }

    /// Create the error table if absent — idempotent, safe to repeat
    async fn ensure_table(client: &Client) -> Result<()> {
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS error_log_table (
                    error_id      SERIAL PRIMARY KEY,
                    error_message TEXT NOT NULL,
                    error_time    TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    json_data     JSONB NOT NULL
                )",
            )
            .await
            .map_err(|e| IngestError::Connection(format!("Failed to ensure error table: {}", e)))
    }
}

#[async_trait]
impl ErrorSink for PgErrorSink {
    async fn record(&self, json_data: &serde_json::Value, reason: &str) -> Result<()> {
        // Best-effort: a sink that cannot reach the store drops the
        // record rather than failing the pipeline
        let client = match self.acquire().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, reason = %reason, "Error sink unavailable, record dropped");
                return Ok(());
            }
        };

        Self::ensure_table(&client).await?;

        client
            .execute(
                "INSERT INTO error_log_table (error_message, json_data) VALUES ($1, $2)",
                &[&reason, json_data],
            )
            .await
            .map_err(|e| IngestError::Connection(format!("Failed to insert error record: {}", e)))?;

        tracing::debug!(reason = %reason, "Rejected message recorded");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let client = self.acquire().await?;
        Self::ensure_table(&client).await?;

        let row = client
            .query_one("SELECT COUNT(*) FROM error_log_table", &[])
            .await
            .map_err(|e| IngestError::Connection(e.to_string()))?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }

    async fn list(&self, limit: usize) -> Result<Vec<ErrorRecord>> {
        let client = self.acquire().await?;
        Self::ensure_table(&client).await?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = client
            .query(
                "SELECT error_message, error_time, json_data
                 FROM error_log_table
                 ORDER BY error_id DESC
                 LIMIT $1",
                &[&limit],
            )
            .await
            .map_err(|e| IngestError::Connection(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| ErrorRecord {
                error_message: row.get(0),
                error_time: row.get(1),
                json_data: row.get(2),
            })
            .collect())
    }
}
