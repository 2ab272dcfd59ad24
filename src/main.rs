//! Process entry point — wire the NATS source to the Postgres sinks
//! and run the pipeline until the queue is drained.

use login_ingest::pipeline::{Pipeline, PipelineConfig};
use login_ingest::source::nats::{NatsSource, NatsSourceConfig};
use login_ingest::store::postgres::{PgConfig, PgErrorSink, PgStore};
use login_ingest::store::{ErrorSink, LoginSink};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let pg_config = match PgConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return 1;
        }
    };

    // Connection failure at startup is terminal: no retry loop here
    let store = match PgStore::connect(&pg_config).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Cannot reach the durable store, aborting");
            return 1;
        }
    };

    // Migrations must land before the first write: app_version has to
    // accept dotted version strings
    if let Err(e) = store.run_migrations().await {
        tracing::error!(error = %e, "Schema migration failed");
        store.close().await;
        return 1;
    }

    let source = match NatsSource::connect(NatsSourceConfig::from_env()).await {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(error = %e, "Cannot reach the message source, aborting");
            store.close().await;
            return 1;
        }
    };

    let store = Arc::new(store);
    let errors: Arc<dyn ErrorSink> = Arc::new(PgErrorSink::new(pg_config));

    let pipeline = Pipeline::new(
        source,
        store.clone() as Arc<dyn LoginSink>,
        errors,
        PipelineConfig::from_env(),
    );

    let outcome = pipeline.run().await;
    drop(pipeline);

    let code = match outcome {
        Ok(stats) => {
            tracing::info!(
                polls = stats.polls,
                written = stats.written,
                write_failures = stats.write_failures,
                rejected = stats.rejected,
                "Pipeline drained"
            );
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Pipeline aborted");
            1
        }
    };

    match Arc::try_unwrap(store) {
        Ok(store) => store.close().await,
        Err(_) => tracing::warn!("Store still shared at shutdown, connection dropped with process"),
    }

    code
}
