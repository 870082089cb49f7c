//! End-to-end scenarios for the blob and manifest worker protocols
//! (spec.md §8).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use registry_gc::clock::SystemClock;
use registry_gc::config::{BlobWorkerConfig, ManifestWorkerConfig, ReviewBackoffConfig};
use registry_gc::db::{PgBlobQueue, PgManifestQueue};
use registry_gc::error_tracker::NoopErrorTracker;
use registry_gc::storage::fake::{FakeOutcome, FakeStorage};
use registry_gc::worker::blob::BlobWorker;
use registry_gc::worker::manifest::ManifestWorker;
use registry_gc::worker::Worker;
use sqlx::PgPool;
use uuid::Uuid;

async fn insert_blob(pool: &PgPool, digest: &str, media_type: &str, size_bytes: i64) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO blobs (digest, media_type, size_bytes) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(digest)
    .bind(media_type)
    .bind(size_bytes)
    .fetch_one(pool)
    .await
    .expect("insert blob")
}

async fn enqueue_blob_review(pool: &PgPool, blob_id: Uuid, review_count: i64) {
    sqlx::query(
        "INSERT INTO blob_review_queue (blob_id, review_after, review_count) VALUES ($1, now(), $2)",
    )
    .bind(blob_id)
    .bind(review_count)
    .execute(pool)
    .await
    .expect("enqueue blob review");
}

async fn insert_manifest(pool: &PgPool, repository: &str, digest: &str) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO manifests (repository, digest) VALUES ($1, $2) RETURNING id",
    )
    .bind(repository)
    .bind(digest)
    .fetch_one(pool)
    .await
    .expect("insert manifest")
}

async fn enqueue_manifest_review(pool: &PgPool, manifest_id: Uuid, review_count: i64) {
    sqlx::query(
        "INSERT INTO manifest_review_queue (manifest_id, review_after, review_count) VALUES ($1, now(), $2)",
    )
    .bind(manifest_id)
    .bind(review_count)
    .execute(pool)
    .await
    .expect("enqueue manifest review");
}

fn blob_worker(
    pool: PgPool,
    storage: Arc<FakeStorage>,
) -> BlobWorker<PgBlobQueue> {
    BlobWorker::new(
        pool,
        PgBlobQueue,
        storage,
        Arc::new(SystemClock),
        Arc::new(NoopErrorTracker),
        BlobWorkerConfig::default(),
        ReviewBackoffConfig::default(),
    )
}

fn manifest_worker(pool: PgPool) -> ManifestWorker<PgManifestQueue> {
    ManifestWorker::new(
        pool,
        PgManifestQueue,
        Arc::new(SystemClock),
        Arc::new(NoopErrorTracker),
        ManifestWorkerConfig::default(),
        ReviewBackoffConfig::default(),
    )
}

#[sqlx::test]
async fn happy_blob_delete(pool: PgPool) {
    let blob_id = insert_blob(&pool, "sha256:c6f9aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbd1", "application/octet-stream", 1024).await;
    enqueue_blob_review(&pool, blob_id, 1).await;

    let storage = Arc::new(FakeStorage::new());
    let worker = blob_worker(pool.clone(), Arc::clone(&storage));

    let outcome = worker.run().await;
    assert!(outcome.found);
    assert!(outcome.error.is_none());

    let blob_count: i64 = sqlx::query_scalar("SELECT count(*) FROM blobs WHERE id = $1")
        .bind(blob_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(blob_count, 0);

    let queue_count: i64 = sqlx::query_scalar("SELECT count(*) FROM blob_review_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(queue_count, 0);

    assert_eq!(storage.removed.lock().unwrap().len(), 1);
}

#[sqlx::test]
async fn not_dangling_skips_storage_call(pool: PgPool) {
    let blob_id = insert_blob(&pool, "sha256:stillreferenced", "application/octet-stream", 512).await;
    enqueue_blob_review(&pool, blob_id, 0).await;

    let manifest_id = insert_manifest(&pool, "library/app", "sha256:manifestdigest").await;
    sqlx::query("INSERT INTO manifest_blob_refs (manifest_id, blob_id) VALUES ($1, $2)")
        .bind(manifest_id)
        .bind(blob_id)
        .execute(&pool)
        .await
        .unwrap();

    let storage = Arc::new(FakeStorage::new());
    let worker = blob_worker(pool.clone(), Arc::clone(&storage));

    let outcome = worker.run().await;
    assert!(outcome.found);
    assert!(outcome.error.is_none());
    assert!(storage.removed.lock().unwrap().is_empty());

    let blob_count: i64 = sqlx::query_scalar("SELECT count(*) FROM blobs WHERE id = $1")
        .bind(blob_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(blob_count, 1, "referenced blob must survive");

    let queue_count: i64 = sqlx::query_scalar("SELECT count(*) FROM blob_review_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(queue_count, 0, "review task is still removed once checked");
}

#[sqlx::test]
async fn storage_unknown_error_postpones_and_increments_review_count(pool: PgPool) {
    let blob_id = insert_blob(&pool, "sha256:failstorage", "application/octet-stream", 2048).await;
    enqueue_blob_review(&pool, blob_id, 0).await;

    let storage = Arc::new(FakeStorage::with_outcome(FakeOutcome::Other));
    let worker = blob_worker(pool.clone(), Arc::clone(&storage));

    let outcome = worker.run().await;
    assert!(outcome.found);
    assert!(outcome.error.is_some());

    let (review_count, review_after): (i64, chrono::DateTime<Utc>) = sqlx::query_as(
        "SELECT review_count, review_after FROM blob_review_queue WHERE blob_id = $1",
    )
    .bind(blob_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(review_count, 1);
    assert!(review_after > Utc::now());
}

#[sqlx::test]
async fn manifest_delete_cascades_to_review_queue(pool: PgPool) {
    let manifest_id = insert_manifest(&pool, "library/cascade", "sha256:cascadetest").await;
    enqueue_manifest_review(&pool, manifest_id, 0).await;

    let worker = manifest_worker(pool.clone());
    let outcome = worker.run().await;
    assert!(outcome.found);
    assert!(outcome.error.is_none());

    let manifest_count: i64 = sqlx::query_scalar("SELECT count(*) FROM manifests WHERE id = $1")
        .bind(manifest_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(manifest_count, 0);

    let queue_count: i64 = sqlx::query_scalar("SELECT count(*) FROM manifest_review_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(queue_count, 0, "cascade must remove the queue row implicitly");
}

#[sqlx::test]
async fn manifest_not_dangling_deletes_task_row_explicitly(pool: PgPool) {
    let manifest_id = insert_manifest(&pool, "library/tagged", "sha256:taggedtest").await;
    enqueue_manifest_review(&pool, manifest_id, 0).await;
    sqlx::query("INSERT INTO tags (manifest_id, repository, name) VALUES ($1, $2, 'latest')")
        .bind(manifest_id)
        .bind("library/tagged")
        .execute(&pool)
        .await
        .unwrap();

    let worker = manifest_worker(pool.clone());
    let outcome = worker.run().await;
    assert!(outcome.found);
    assert!(outcome.error.is_none());

    let manifest_count: i64 = sqlx::query_scalar("SELECT count(*) FROM manifests WHERE id = $1")
        .bind(manifest_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(manifest_count, 1, "tagged manifest must survive");

    let queue_count: i64 = sqlx::query_scalar("SELECT count(*) FROM manifest_review_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(queue_count, 0);
}

#[sqlx::test]
async fn idle_queue_returns_not_found(pool: PgPool) {
    let storage = Arc::new(FakeStorage::new());
    let worker = blob_worker(pool, storage);

    let outcome = worker.run().await;
    assert!(!outcome.found);
    assert!(outcome.error.is_none());
}

#[sqlx::test]
async fn tx_timeout_returns_deadline_exceeded_without_postponing(pool: PgPool) {
    let blob_id = insert_blob(&pool, "sha256:timeouttest", "application/octet-stream", 10).await;
    enqueue_blob_review(&pool, blob_id, 3).await;

    let storage = Arc::new(FakeStorage::new());
    let mut config = BlobWorkerConfig::default();
    config.tx_timeout = Duration::from_nanos(1);

    let worker = BlobWorker::new(
        pool.clone(),
        PgBlobQueue,
        storage,
        Arc::new(SystemClock),
        Arc::new(NoopErrorTracker),
        config,
        ReviewBackoffConfig::default(),
    );

    let outcome = worker.run().await;
    assert!(outcome.error.is_some());

    let review_count: i64 = sqlx::query_scalar(
        "SELECT review_count FROM blob_review_queue WHERE blob_id = $1",
    )
    .bind(blob_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(review_count, 3, "deadline-exceeded must not postpone");
}
