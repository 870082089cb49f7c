//! Common worker lifecycle (spec.md §4.4): correlation-id injection and
//! panic-safe rollback.
//!
//! `sqlx::Transaction` already rolls back on drop if it is never committed,
//! so the "roll back on panic" half of the contract falls out of RAII once
//! the task is isolated with `tokio::spawn`. What this module adds on top is
//! the reporting: a panic inside `processTask` must reach the error tracker
//! and the sink must be flushed before the panic is allowed to propagate,
//! mirroring the scoped-defer pattern used for commit guards elsewhere in
//! the stack.

use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::error::WorkerError;
use crate::error_tracker::ErrorTracker;
use crate::worker::RunOutcome;

/// Bound on sink flush time before a caught panic is re-raised.
const PANIC_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Generate a correlation identifier for one worker run.
#[must_use]
pub fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}

/// Run `body` (given the run's correlation id) in an isolated task so a
/// panic inside `processTask` cannot take down the agent loop. On panic: the
/// in-flight transaction is rolled back by `Drop` when the task unwinds, the
/// panic is reported to `tracker`, the sink is flushed (bounded by 5 s), and
/// the panic is then re-raised in the caller.
pub async fn run_guarded<F, Fut>(
    worker: &'static str,
    tracker: &(dyn ErrorTracker + 'static),
    correlation_id: &str,
    body: F,
) -> RunOutcome
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = RunOutcome> + Send + 'static,
{
    match tokio::spawn(body()).await {
        Ok(outcome) => outcome,
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(&join_err);
            tracker.capture(worker, correlation_id, &format!("panic: {message}"));
            tracker.flush(PANIC_FLUSH_TIMEOUT).await;
            std::panic::resume_unwind(join_err.into_panic());
        }
        Err(join_err) => {
            // The task was cancelled, not panicked; surface as a plain error.
            RunOutcome::not_found_error(WorkerError::Commit(sqlx::Error::Io(
                std::io::Error::other(join_err.to_string()),
            )))
        }
    }
}

fn panic_message(join_err: &tokio::task::JoinError) -> String {
    join_err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_tracker::NoopErrorTracker;

    #[tokio::test]
    async fn run_guarded_returns_body_result_on_success() {
        let tracker = NoopErrorTracker;
        let outcome = run_guarded("blob", &tracker, "corr-1", || async { RunOutcome::ok() }).await;
        assert!(outcome.found);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn run_guarded_repanics_after_reporting() {
        let tracker = NoopErrorTracker;
        let _ = run_guarded("blob", &tracker, "corr-2", || async {
            panic!("boom");
            #[allow(unreachable_code)]
            RunOutcome::idle()
        })
        .await;
    }
}
