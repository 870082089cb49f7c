//! Database layer: connection pool, migrations, review-queue row types and
//! stores.

pub mod models;
pub mod queue;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

pub use models::{BlobTask, ManifestTask};
pub use queue::{PgBlobQueue, PgManifestQueue, QueueStore};

/// Create the `PostgreSQL` connection pool backing both review queues.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    info!("connected to postgres");
    Ok(pool)
}

/// Run pending migrations (table creation, not data repair).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("database migrations completed");
    Ok(())
}
