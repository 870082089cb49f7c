//! Blob worker (spec.md §4.5): check dangling → storage delete → DB delete →
//! commit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::backoff::review_backoff;
use crate::clock::Clock;
use crate::config::{BlobWorkerConfig, ReviewBackoffConfig};
use crate::db::queue::{delete_blob_row, QueueStore};
use crate::db::BlobTask;
use crate::error::{QueueError, StorageError, WorkerError};
use crate::error_tracker::ErrorTracker;
use crate::observability::metrics;
use crate::storage::ObjectStorage;
use crate::worker::base;
use crate::worker::{RunOutcome, Worker};

pub struct BlobWorker<Q: QueueStore<Task = BlobTask> + Clone + 'static> {
    pool: PgPool,
    queue: Q,
    storage: Arc<dyn ObjectStorage>,
    clock: Arc<dyn Clock>,
    tracker: Arc<dyn ErrorTracker>,
    config: BlobWorkerConfig,
    review_backoff: ReviewBackoffConfig,
}

impl<Q: QueueStore<Task = BlobTask> + Clone + 'static> BlobWorker<Q> {
    pub fn new(
        pool: PgPool,
        queue: Q,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
        tracker: Arc<dyn ErrorTracker>,
        config: BlobWorkerConfig,
        review_backoff: ReviewBackoffConfig,
    ) -> Self {
        Self {
            pool,
            queue,
            storage,
            clock,
            tracker,
            config,
            review_backoff,
        }
    }
}

#[async_trait]
impl<Q: QueueStore<Task = BlobTask> + Clone + 'static> Worker for BlobWorker<Q> {
    fn name(&self) -> &'static str {
        "blob"
    }

    fn queue_name(&self) -> &'static str {
        "blob_review_queue"
    }

    async fn queue_size(&self) -> Result<i64, WorkerError> {
        self.queue.count(&self.pool).await.map_err(WorkerError::from)
    }

    async fn run(&self) -> RunOutcome {
        let correlation_id = base::new_correlation_id();
        let pool = self.pool.clone();
        let queue = self.queue.clone();
        let storage = Arc::clone(&self.storage);
        let clock = Arc::clone(&self.clock);
        let review_backoff_config = self.review_backoff;
        let storage_timeout = self.config.storage_timeout;
        let tx_timeout = self.config.tx_timeout;
        let correlation_id_for_body = correlation_id.clone();

        let started = Instant::now();
        let outcome = base::run_guarded(self.name(), self.tracker.as_ref(), &correlation_id, {
            move || async move {
                process_one(
                    &pool,
                    &queue,
                    storage.as_ref(),
                    clock.as_ref(),
                    tx_timeout,
                    storage_timeout,
                    review_backoff_config,
                    &correlation_id_for_body,
                )
                .await
            }
        })
        .await;

        let error = outcome.error.is_some();
        metrics::record_run("blob", outcome.found, error, started.elapsed());
        if let Some(err) = &outcome.error {
            self.tracker
                .capture(self.name(), &correlation_id, &err.to_string());
        }
        outcome
    }
}

async fn process_one<Q: QueueStore<Task = BlobTask>>(
    pool: &PgPool,
    queue: &Q,
    storage: &dyn ObjectStorage,
    clock: &dyn Clock,
    tx_timeout: Duration,
    storage_timeout: Duration,
    review_backoff_config: ReviewBackoffConfig,
    correlation_id: &str,
) -> RunOutcome {
    match tokio::time::timeout(
        tx_timeout,
        run_protocol(pool, queue, storage, clock, storage_timeout, review_backoff_config, correlation_id),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_elapsed) => RunOutcome::found_error(WorkerError::Queue(QueueError::DeadlineExceeded)),
    }
}

async fn run_protocol<Q: QueueStore<Task = BlobTask>>(
    pool: &PgPool,
    queue: &Q,
    storage: &dyn ObjectStorage,
    clock: &dyn Clock,
    storage_timeout: Duration,
    review_backoff_config: ReviewBackoffConfig,
    correlation_id: &str,
) -> RunOutcome {
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => return RunOutcome::not_found_error(WorkerError::Queue(QueueError::from(e))),
    };

    let task = match queue.next(&mut tx).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            let _ = tx.rollback().await;
            return RunOutcome::idle();
        }
        Err(e) => return RunOutcome::not_found_error(WorkerError::Queue(e)),
    };

    info!(
        correlation_id,
        worker = "blob",
        digest = %task.digest,
        "leased blob review task"
    );

    let dangling = match queue.is_dangling(&mut tx, &task).await {
        Ok(d) => d,
        Err(e) if e.is_deadline_exceeded() => {
            return RunOutcome::found_error(WorkerError::Queue(e));
        }
        Err(e) => {
            return postpone_and_commit(
                queue,
                tx,
                &task,
                clock,
                review_backoff_config,
                WorkerError::Queue(e),
            )
            .await;
        }
    };

    if dangling {
        let delete_started = Instant::now();
        match storage.remove_blob(&task.digest, storage_timeout).await {
            Ok(()) => {
                metrics::record_delete("storage", "blob", false, delete_started.elapsed());
                metrics::record_bytes_deleted(&task.media_type, u64::try_from(task.size_bytes).unwrap_or(0));
            }
            Err(StorageError::PathNotFound) => {
                warn!(correlation_id, digest = %task.digest, "blob missing from storage, proceeding");
                metrics::record_delete("storage", "blob", false, delete_started.elapsed());
            }
            Err(err) => {
                metrics::record_delete("storage", "blob", true, delete_started.elapsed());
                return postpone_and_commit(
                    queue,
                    tx,
                    &task,
                    clock,
                    review_backoff_config,
                    WorkerError::Storage(wrap_storage_error(err)),
                )
                .await;
            }
        }

        let db_delete_started = Instant::now();
        match delete_blob_row(&mut tx, task.blob_id).await {
            Ok(true) => {
                metrics::record_delete("database", "blob", false, db_delete_started.elapsed());
            }
            Ok(false) => {
                warn!(correlation_id, digest = %task.digest, "blob row already gone, proceeding");
                metrics::record_delete("database", "blob", false, db_delete_started.elapsed());
            }
            Err(e) if e.is_deadline_exceeded() => {
                metrics::record_delete("database", "blob", true, db_delete_started.elapsed());
                return RunOutcome::found_error(WorkerError::Queue(e));
            }
            Err(e) => {
                metrics::record_delete("database", "blob", true, db_delete_started.elapsed());
                return postpone_and_commit(
                    queue,
                    tx,
                    &task,
                    clock,
                    review_backoff_config,
                    WorkerError::Queue(e),
                )
                .await;
            }
        }
    }

    if let Err(e) = queue.delete(&mut tx, &task).await {
        return RunOutcome::found_error(WorkerError::Queue(e));
    }

    match tx.commit().await {
        Ok(()) => RunOutcome::ok(),
        Err(e) => RunOutcome::found_error(WorkerError::Commit(e)),
    }
}

/// Wrap a storage-delete failure with the context spec.md §4.5 step 4a
/// requires in the surfaced error text ("deleting blob from storage: <cause>").
fn wrap_storage_error(err: StorageError) -> StorageError {
    StorageError::Other(anyhow::Error::new(err).context("deleting blob from storage"))
}

/// Best-effort recovery path: postpone the task and commit. If either step
/// fails, the original and recovery errors are combined (spec.md §9).
async fn postpone_and_commit<Q: QueueStore<Task = BlobTask>>(
    queue: &Q,
    mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
    task: &BlobTask,
    clock: &dyn Clock,
    review_backoff_config: ReviewBackoffConfig,
    original: WorkerError,
) -> RunOutcome {
    let delay = review_backoff(
        task.review_count + 1,
        review_backoff_config.base,
        review_backoff_config.max,
    );

    if let Err(e) = queue
        .postpone(&mut tx, task, clock.now(), delay)
        .await
    {
        return RunOutcome::found_error(WorkerError::with_postpone_failure(
            original,
            WorkerError::Queue(e),
        ));
    }

    metrics::record_postpone("blob");

    if let Err(e) = tx.commit().await {
        return RunOutcome::found_error(WorkerError::with_postpone_failure(
            original,
            WorkerError::Commit(e),
        ));
    }

    RunOutcome::found_error(original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::{FakeOutcome, FakeStorage};

    #[tokio::test]
    async fn fake_storage_not_found_surfaces_as_path_not_found() {
        let storage = FakeStorage::with_outcome(FakeOutcome::NotFound);
        let result = storage
            .remove_blob("sha256:deadbeef", Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(StorageError::PathNotFound)));
    }

    #[tokio::test]
    async fn fake_storage_other_failure_is_not_collapsed() {
        let storage = FakeStorage::with_outcome(FakeOutcome::Other);
        let result = storage
            .remove_blob("sha256:deadbeef", Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(StorageError::Other(_))));
    }

    #[test]
    fn wrap_storage_error_carries_context_and_cause() {
        let err = StorageError::Other(anyhow::anyhow!("disk full"));
        let wrapped = wrap_storage_error(err);
        let text = WorkerError::Storage(wrapped).to_string();
        assert!(text.contains("deleting blob from storage"));
        assert!(text.contains("disk full"));
    }
}
