//! Registry GC - Main Entry Point

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use registry_gc::agent::Agent;
use registry_gc::clock::{Clock, SystemClock};
use registry_gc::config::Config;
use registry_gc::db::{self, PgBlobQueue, PgManifestQueue};
use registry_gc::error_tracker::{ErrorTracker, NoopErrorTracker, SentryErrorTracker};
use registry_gc::observability;
use registry_gc::storage::S3Storage;
use registry_gc::worker::blob::BlobWorker;
use registry_gc::worker::manifest::ManifestWorker;
use registry_gc::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let _sentry_guard = config.observability.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let (_otel_guard, _meter_provider) = observability::init(&config.observability);

    info!(version = env!("CARGO_PKG_VERSION"), "starting registry-gc");

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let storage = Arc::new(
        S3Storage::from_config(
            config.s3_endpoint.as_deref(),
            &config.s3_region,
            config.s3_bucket.clone(),
        )
        .await,
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tracker: Arc<dyn ErrorTracker> = if config.observability.sentry_dsn.is_some() {
        Arc::new(SentryErrorTracker)
    } else {
        Arc::new(NoopErrorTracker)
    };

    let blob_worker: Arc<dyn Worker> = Arc::new(BlobWorker::new(
        pool.clone(),
        PgBlobQueue,
        storage,
        Arc::clone(&clock),
        Arc::clone(&tracker),
        config.blob_worker,
        config.review_backoff,
    ));

    let manifest_worker: Arc<dyn Worker> = Arc::new(ManifestWorker::new(
        pool,
        PgManifestQueue,
        Arc::clone(&clock),
        Arc::clone(&tracker),
        config.manifest_worker,
        config.review_backoff,
    ));

    let cancel = CancellationToken::new();

    let blob_agent = Agent::new(blob_worker, Arc::clone(&clock), Arc::clone(&tracker), config.agent);
    let manifest_agent = Agent::new(manifest_worker, clock, tracker, config.agent);

    let blob_cancel = cancel.clone();
    let manifest_cancel = cancel.clone();

    let blob_handle = tokio::spawn(async move { blob_agent.start(blob_cancel).await });
    let manifest_handle = tokio::spawn(async move { manifest_agent.start(manifest_cancel).await });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    info!("received shutdown signal, cleaning up");
    cancel.cancel();

    let _ = tokio::join!(blob_handle, manifest_handle);

    info!("registry-gc shutdown complete");
    Ok(())
}
