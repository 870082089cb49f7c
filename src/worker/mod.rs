//! Worker capability consumed by the agent (spec.md §6).

pub mod base;
pub mod blob;
pub mod manifest;

use async_trait::async_trait;

use crate::error::WorkerError;

/// Outcome of one `Worker::run` call (spec.md §6: `Run(ctx) → (found bool,
/// err error)`). `found` is `true` iff a task row was leased, independent of
/// whether processing it then succeeded.
#[derive(Debug)]
pub struct RunOutcome {
    pub found: bool,
    pub error: Option<WorkerError>,
}

impl RunOutcome {
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            found: false,
            error: None,
        }
    }

    #[must_use]
    pub const fn not_found_error(error: WorkerError) -> Self {
        Self {
            found: false,
            error: Some(error),
        }
    }

    #[must_use]
    pub const fn ok() -> Self {
        Self {
            found: true,
            error: None,
        }
    }

    #[must_use]
    pub const fn found_error(error: WorkerError) -> Self {
        Self {
            found: true,
            error: Some(error),
        }
    }
}

/// A worker drives one review queue's per-task protocol. `run` leases and
/// processes at most one task per call; `found` reports whether a task row
/// was leased, regardless of the outcome of processing it.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable label used for metrics and logs.
    fn name(&self) -> &'static str;

    /// Stable label identifying the backing queue, used for queue-depth
    /// metrics.
    fn queue_name(&self) -> &'static str;

    /// Current depth of this worker's queue. Observability only.
    async fn queue_size(&self) -> Result<i64, WorkerError>;

    /// Lease and process at most one task.
    async fn run(&self) -> RunOutcome;
}
