//! Closed sentinel error sets for the GC core (spec.md §9).
//!
//! The original sources discriminate on sentinel values (`PathNotFound`,
//! `NotFound`, `DeadlineExceeded`, `TxDone`). Here each collaborator gets its
//! own closed `thiserror` enum so that every `match` on error kind in §4/§7
//! can be exhaustive.

use std::fmt;

use thiserror::Error;

/// Errors surfaced by the object-storage deleter (spec.md §4.3).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object did not exist. Collapsed to success by callers with a warning.
    #[error("object not found in storage")]
    PathNotFound,

    /// The per-call storage deadline elapsed.
    #[error("storage delete deadline exceeded")]
    DeadlineExceeded,

    /// Any other storage-driver failure, including partial-transfer
    /// failures (spec.md Glossary: "Partial-transfer"), which are treated as
    /// retryable storage failures for GC purposes.
    #[error("storage error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced by queue-store operations (spec.md §4.2).
#[derive(Debug, Error)]
pub enum QueueError {
    /// The referenced row no longer exists (e.g. raced delete).
    #[error("row not found")]
    NotFound,

    /// The enclosing transaction's deadline elapsed; the row lock has
    /// already been released by the aborted transaction/connection.
    #[error("transaction deadline exceeded")]
    DeadlineExceeded,

    /// The transaction had already been committed or rolled back
    /// (`sql.ErrTxDone` in the original sources) when a call was made
    /// against it. Treated as benign by the base worker's rollback helper.
    #[error("transaction already done")]
    TxDone,

    /// Any other database error.
    #[error("database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl QueueError {
    #[must_use]
    pub const fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }
}

/// Errors surfaced by a worker's `Run`/`processTask` (spec.md §6, §7).
///
/// `Postpone` carries both the original failure and a failure encountered
/// while trying to recover via postpone+commit — multi-error semantics
/// (spec.md §9): "both errors must be preserved and returned together."
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("processing task: {0}")]
    Storage(#[from] StorageError),

    #[error("processing task: {0}")]
    Queue(#[from] QueueError),

    #[error("processing task: committing database transaction: {0}")]
    Commit(sqlx::Error),

    #[error("processing task: {original}; additionally, recovery failed: {postpone}")]
    Postpone {
        original: Box<WorkerError>,
        postpone: Box<WorkerError>,
    },
}

impl WorkerError {
    /// Combine a primary failure with a failure encountered while trying to
    /// recover from it (postpone+commit). Preserves both texts (spec.md §9).
    #[must_use]
    pub fn with_postpone_failure(original: Self, postpone: Self) -> Self {
        Self::Postpone {
            original: Box::new(original),
            postpone: Box::new(postpone),
        }
    }
}

/// A minimal `Debug`-friendly wrapper used when reporting errors to the
/// error tracker, which only needs a `std::error::Error` trait object plus
/// structured fields.
pub struct Reportable<'a>(pub &'a (dyn std::error::Error + 'static));

impl fmt::Display for Reportable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postpone_error_preserves_both_texts() {
        let original = WorkerError::Storage(StorageError::Other(anyhow::anyhow!("disk full")));
        let postpone = WorkerError::Commit(sqlx::Error::RowNotFound);
        let combined = WorkerError::with_postpone_failure(original, postpone);

        let text = combined.to_string();
        assert!(text.contains("disk full"));
        assert!(text.contains("committing database transaction"));
    }
}
