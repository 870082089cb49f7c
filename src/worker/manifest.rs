//! Manifest worker (spec.md §4.6): check dangling → DB delete only (cascades
//! to the queue row); does not touch object storage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use crate::backoff::review_backoff;
use crate::clock::Clock;
use crate::config::{ManifestWorkerConfig, ReviewBackoffConfig};
use crate::db::queue::{delete_manifest_row, QueueStore};
use crate::db::ManifestTask;
use crate::error::{QueueError, WorkerError};
use crate::error_tracker::ErrorTracker;
use crate::observability::metrics;
use crate::worker::base;
use crate::worker::{RunOutcome, Worker};

pub struct ManifestWorker<Q: QueueStore<Task = ManifestTask> + Clone + 'static> {
    pool: PgPool,
    queue: Q,
    clock: Arc<dyn Clock>,
    tracker: Arc<dyn ErrorTracker>,
    config: ManifestWorkerConfig,
    review_backoff: ReviewBackoffConfig,
}

impl<Q: QueueStore<Task = ManifestTask> + Clone + 'static> ManifestWorker<Q> {
    pub fn new(
        pool: PgPool,
        queue: Q,
        clock: Arc<dyn Clock>,
        tracker: Arc<dyn ErrorTracker>,
        config: ManifestWorkerConfig,
        review_backoff: ReviewBackoffConfig,
    ) -> Self {
        Self {
            pool,
            queue,
            clock,
            tracker,
            config,
            review_backoff,
        }
    }
}

#[async_trait]
impl<Q: QueueStore<Task = ManifestTask> + Clone + 'static> Worker for ManifestWorker<Q> {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn queue_name(&self) -> &'static str {
        "manifest_review_queue"
    }

    async fn queue_size(&self) -> Result<i64, WorkerError> {
        self.queue.count(&self.pool).await.map_err(WorkerError::from)
    }

    async fn run(&self) -> RunOutcome {
        let correlation_id = base::new_correlation_id();
        let pool = self.pool.clone();
        let queue = self.queue.clone();
        let clock = Arc::clone(&self.clock);
        let review_backoff_config = self.review_backoff;
        let tx_timeout = self.config.tx_timeout;
        let correlation_id_for_body = correlation_id.clone();

        let started = Instant::now();
        let outcome = base::run_guarded(self.name(), self.tracker.as_ref(), &correlation_id, {
            move || async move {
                process_one(&pool, &queue, clock.as_ref(), tx_timeout, review_backoff_config, &correlation_id_for_body)
                    .await
            }
        })
        .await;

        let error = outcome.error.is_some();
        metrics::record_run("manifest", outcome.found, error, started.elapsed());
        if let Some(err) = &outcome.error {
            self.tracker
                .capture(self.name(), &correlation_id, &err.to_string());
        }
        outcome
    }
}

async fn process_one<Q: QueueStore<Task = ManifestTask>>(
    pool: &PgPool,
    queue: &Q,
    clock: &dyn Clock,
    tx_timeout: Duration,
    review_backoff_config: ReviewBackoffConfig,
    correlation_id: &str,
) -> RunOutcome {
    match tokio::time::timeout(
        tx_timeout,
        run_protocol(pool, queue, clock, review_backoff_config, correlation_id),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_elapsed) => RunOutcome::found_error(WorkerError::Queue(QueueError::DeadlineExceeded)),
    }
}

async fn run_protocol<Q: QueueStore<Task = ManifestTask>>(
    pool: &PgPool,
    queue: &Q,
    clock: &dyn Clock,
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
        worker = "manifest",
        digest = %task.digest,
        repository = %task.repository,
        "leased manifest review task"
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
        match delete_manifest_row(&mut tx, task.manifest_id).await {
            Ok(_found) => {
                metrics::record_delete("database", "manifest", false, delete_started.elapsed());
            }
            Err(e) if e.is_deadline_exceeded() => {
                metrics::record_delete("database", "manifest", true, delete_started.elapsed());
                return RunOutcome::found_error(WorkerError::Queue(e));
            }
            Err(e) => {
                metrics::record_delete("database", "manifest", true, delete_started.elapsed());
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
        // manifest deletion cascades to manifest_review_queue; no explicit
        // queue delete here (spec.md §4.6, invariant 4).
    } else if let Err(e) = queue.delete(&mut tx, &task).await {
        return RunOutcome::found_error(WorkerError::Queue(e));
    }

    match tx.commit().await {
        Ok(()) => RunOutcome::ok(),
        Err(e) => RunOutcome::found_error(WorkerError::Commit(e)),
    }
}

async fn postpone_and_commit<Q: QueueStore<Task = ManifestTask>>(
    queue: &Q,
    mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
    task: &ManifestTask,
    clock: &dyn Clock,
    review_backoff_config: ReviewBackoffConfig,
    original: WorkerError,
) -> RunOutcome {
    let delay = review_backoff(
        task.review_count + 1,
        review_backoff_config.base,
        review_backoff_config.max,
    );

    if let Err(e) = queue.postpone(&mut tx, task, clock.now(), delay).await {
        return RunOutcome::found_error(WorkerError::with_postpone_failure(
            original,
            WorkerError::Queue(e),
        ));
    }

    metrics::record_postpone("manifest");

    if let Err(e) = tx.commit().await {
        return RunOutcome::found_error(WorkerError::with_postpone_failure(
            original,
            WorkerError::Commit(e),
        ));
    }

    RunOutcome::found_error(original)
}
