//! Agent run loop (spec.md §4.7): jittered startup, adaptive sleep between
//! worker runs, and a concurrent queue-depth monitor (§4.7.1).
//!
//! The monitor follows the same "spawn a background tokio task, sleep,
//! consume cancellation at the next suspension point" shape used elsewhere
//! in the stack for periodic jobs; see `observability::metrics` for the
//! instruments it reports through. Its own poll interval backs off on error
//! and resets on success (spec.md §4.7.1), rather than polling at a fixed
//! cadence regardless of failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backoff::{start_jitter, Backoff, JITTER_FACTOR};
use crate::clock::Clock;
use crate::config::AgentConfig;
use crate::error_tracker::ErrorTracker;
use crate::observability::metrics;
use crate::worker::Worker;

/// Drives one worker with jittered startup and adaptive inter-run sleep.
pub struct Agent {
    worker: Arc<dyn Worker>,
    clock: Arc<dyn Clock>,
    tracker: Arc<dyn ErrorTracker>,
    config: AgentConfig,
}

impl Agent {
    #[must_use]
    pub fn new(
        worker: Arc<dyn Worker>,
        clock: Arc<dyn Clock>,
        tracker: Arc<dyn ErrorTracker>,
        config: AgentConfig,
    ) -> Self {
        Self {
            worker,
            clock,
            tracker,
            config,
        }
    }

    /// Blocking run loop. Returns once `cancel` is triggered.
    pub async fn start(&self, cancel: CancellationToken) {
        let jitter = start_jitter(self.config.start_jitter_max);
        info!(worker = self.worker.name(), jitter_ms = jitter.as_millis() as u64, "agent starting");

        tokio::select! {
            () = self.clock.sleep(jitter) => {}
            () = cancel.cancelled() => {
                info!(worker = self.worker.name(), "agent cancelled during startup jitter");
                return;
            }
        }

        let monitor_cancel = cancel.clone();
        let monitor_handle = spawn_queue_monitor(
            Arc::clone(&self.worker),
            Arc::clone(&self.tracker),
            self.config.queue_monitor_interval,
            self.config.queue_monitor_timeout,
            monitor_cancel,
        );

        let mut backoff = Backoff::new(
            self.config.initial_interval,
            self.config.max_backoff,
            self.config.backoff_jitter_factor,
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let started = Instant::now();
            let outcome = self.worker.run().await;
            let elapsed = started.elapsed();

            if let Some(err) = &outcome.error {
                error!(worker = self.worker.name(), error = %err, "worker run failed");
            }

            let sleep = if outcome.found && outcome.error.is_none() {
                backoff.reset();
                backoff.next_backoff()
            } else if outcome.error.is_none() {
                // idle
                if self.config.no_idle_backoff {
                    backoff.reset();
                }
                backoff.next_backoff()
            } else {
                backoff.next_backoff()
            };

            info!(
                worker = self.worker.name(),
                found = outcome.found,
                error = outcome.error.is_some(),
                run_ms = elapsed.as_millis() as u64,
                sleep_ms = sleep.as_millis() as u64,
                "run complete"
            );
            metrics::record_sleep(self.worker.name(), sleep);

            tokio::select! {
                () = self.clock.sleep(sleep) => {}
                () = cancel.cancelled() => break,
            }
        }

        monitor_cancel_and_join(monitor_handle, cancel).await;
        info!(worker = self.worker.name(), "agent stopped");
    }
}

async fn monitor_cancel_and_join(handle: tokio::task::JoinHandle<()>, cancel: CancellationToken) {
    // Idempotent: cancelling twice (once here, once by the caller) is a no-op.
    cancel.cancel();
    let _ = handle.await;
}

fn spawn_queue_monitor(
    worker: Arc<dyn Worker>,
    tracker: Arc<dyn ErrorTracker>,
    interval: Duration,
    per_call_timeout: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Backoff::new(interval, interval * 10, JITTER_FACTOR);
        let mut wait = interval;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }

            match tokio::time::timeout(per_call_timeout, worker.queue_size()).await {
                Ok(Ok(size)) => {
                    backoff.reset();
                    wait = backoff.next_backoff();
                    let size = u64::try_from(size).unwrap_or(0);
                    metrics::record_queue_size(worker.queue_name(), size);
                }
                Ok(Err(err)) => {
                    wait = backoff.next_backoff();
                    tracker.capture(worker.name(), "queue-monitor", &err.to_string());
                    error!(worker = worker.name(), error = %err, "queue size lookup failed");
                }
                Err(_elapsed) => {
                    wait = backoff.next_backoff();
                    tracker.capture(worker.name(), "queue-monitor", "queue size lookup timed out");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenClock;
    use crate::error::WorkerError;
    use crate::error_tracker::NoopErrorTracker;
    use crate::worker::RunOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWorker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        fn name(&self) -> &'static str {
            "test"
        }

        fn queue_name(&self) -> &'static str {
            "test_queue"
        }

        async fn queue_size(&self) -> Result<i64, WorkerError> {
            Ok(0)
        }

        async fn run(&self) -> RunOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            RunOutcome::idle()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn agent_stops_promptly_on_cancel_during_startup_jitter() {
        let worker = Arc::new(CountingWorker {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(FrozenClock::new(chrono::Utc::now()));
        let tracker = Arc::new(NoopErrorTracker);
        let mut config = AgentConfig {
            start_jitter_max: Duration::from_secs(60),
            ..test_config()
        };
        config.queue_monitor_interval = Duration::from_secs(600);

        let agent = Agent::new(worker.clone(), clock, tracker, config);
        let cancel = CancellationToken::new();
        cancel.cancel();

        agent.start(cancel).await;
        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    }

    struct FailingQueueSizeWorker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Worker for FailingQueueSizeWorker {
        fn name(&self) -> &'static str {
            "test"
        }

        fn queue_name(&self) -> &'static str {
            "test_queue"
        }

        async fn queue_size(&self) -> Result<i64, WorkerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(WorkerError::Commit(sqlx::Error::RowNotFound))
        }

        async fn run(&self) -> RunOutcome {
            RunOutcome::idle()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn queue_monitor_backs_off_on_repeated_errors() {
        let worker = Arc::new(FailingQueueSizeWorker {
            calls: AtomicUsize::new(0),
        });
        let tracker = Arc::new(NoopErrorTracker);
        let cancel = CancellationToken::new();

        let handle = spawn_queue_monitor(
            worker.clone(),
            tracker,
            Duration::from_secs(10),
            Duration::from_millis(100),
            cancel.clone(),
        );

        tokio::time::advance(Duration::from_secs(100)).await;
        cancel.cancel();
        let _ = handle.await;

        // At a fixed 10s cadence, 100s of virtual time would yield ~10 calls.
        // A backing-off monitor capped at 100s (interval * 10) must fall well
        // short of that.
        let calls = worker.calls.load(Ordering::SeqCst);
        assert!(calls < 6, "expected backoff to reduce poll frequency, got {calls} calls");
    }

    fn test_config() -> AgentConfig {
        AgentConfig {
            initial_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(3600),
            backoff_jitter_factor: 0.33,
            start_jitter_max: Duration::ZERO,
            no_idle_backoff: false,
            queue_monitor_interval: Duration::from_secs(600),
            queue_monitor_timeout: Duration::from_millis(100),
        }
    }
}
