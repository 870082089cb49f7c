//! Typed accessors over the two review queues (spec.md §4.2).
//!
//! `Next` leases the oldest eligible, unlocked row with
//! `FOR UPDATE SKIP LOCKED` — the Postgres idiom for a lease queue, chosen
//! per spec.md §9's ordering open question ("oldest eligible, then smallest
//! review_count").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::models::{BlobTask, ManifestTask};
use crate::error::QueueError;

/// Shared contract over a review queue's row-level operations. `Tx` is the
/// task row type (`BlobTask` or `ManifestTask`); implementors hold no
/// long-lived connection, only the transaction passed at each call.
#[async_trait]
pub trait QueueStore: Send + Sync {
    type Task: Send + Sync;

    /// Lease the oldest eligible, unlocked task. Returns `Ok(None)` (not an
    /// error) when the queue is idle.
    async fn next(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Option<Self::Task>, QueueError>;

    /// Re-evaluate reachability under the task's row lock.
    async fn is_dangling(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &Self::Task,
    ) -> Result<bool, QueueError>;

    /// Reschedule the task: `review_after = now + delay`, `review_count += 1`.
    async fn postpone(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &Self::Task,
        now: DateTime<Utc>,
        delay: std::time::Duration,
    ) -> Result<(), QueueError>;

    /// Remove the task row explicitly.
    async fn delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &Self::Task,
    ) -> Result<(), QueueError>;

    /// Current queue depth. Observability only; may be approximate.
    async fn count(&self, pool: &sqlx::PgPool) -> Result<i64, QueueError>;
}

/// Queue store backed by `blob_review_queue` joined to `blobs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgBlobQueue;

#[async_trait]
impl QueueStore for PgBlobQueue {
    type Task = BlobTask;

    async fn next(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Option<BlobTask>, QueueError> {
        let task = sqlx::query_as::<_, BlobTask>(
            r"
            SELECT q.id, q.blob_id, b.digest, b.media_type, b.size_bytes, q.review_after, q.review_count
            FROM blob_review_queue q
            JOIN blobs b ON b.id = q.blob_id
            WHERE q.review_after <= now()
            ORDER BY q.review_after ASC, q.review_count ASC
            LIMIT 1
            FOR UPDATE OF q SKIP LOCKED
            ",
        )
        .fetch_optional(&mut **tx)
        .await?;

        Ok(task)
    }

    async fn is_dangling(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &BlobTask,
    ) -> Result<bool, QueueError> {
        let referenced: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM manifest_blob_refs r WHERE r.blob_id = $1
            )
            ",
        )
        .bind(task.blob_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(!referenced)
    }

    async fn postpone(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &BlobTask,
        now: DateTime<Utc>,
        delay: std::time::Duration,
    ) -> Result<(), QueueError> {
        let review_after =
            now + chrono::Duration::from_std(delay).map_err(|e| {
                QueueError::Other(sqlx::Error::Protocol(e.to_string()))
            })?;

        let result = sqlx::query(
            r"
            UPDATE blob_review_queue
            SET review_after = $2, review_count = review_count + 1
            WHERE id = $1
            ",
        )
        .bind(task.id)
        .bind(review_after)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound);
        }
        Ok(())
    }

    async fn delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &BlobTask,
    ) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM blob_review_queue WHERE id = $1")
            .bind(task.id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn count(&self, pool: &sqlx::PgPool) -> Result<i64, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM blob_review_queue")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

/// Queue store backed by `manifest_review_queue` joined to `manifests`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgManifestQueue;

#[async_trait]
impl QueueStore for PgManifestQueue {
    type Task = ManifestTask;

    async fn next(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Option<ManifestTask>, QueueError> {
        let task = sqlx::query_as::<_, ManifestTask>(
            r"
            SELECT q.id, q.manifest_id, m.digest, m.repository, q.review_after, q.review_count
            FROM manifest_review_queue q
            JOIN manifests m ON m.id = q.manifest_id
            WHERE q.review_after <= now()
            ORDER BY q.review_after ASC, q.review_count ASC
            LIMIT 1
            FOR UPDATE OF q SKIP LOCKED
            ",
        )
        .fetch_optional(&mut **tx)
        .await?;

        Ok(task)
    }

    async fn is_dangling(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &ManifestTask,
    ) -> Result<bool, QueueError> {
        let referenced: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM tags t WHERE t.manifest_id = $1
            )
            ",
        )
        .bind(task.manifest_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(!referenced)
    }

    async fn postpone(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &ManifestTask,
        now: DateTime<Utc>,
        delay: std::time::Duration,
    ) -> Result<(), QueueError> {
        let review_after =
            now + chrono::Duration::from_std(delay).map_err(|e| {
                QueueError::Other(sqlx::Error::Protocol(e.to_string()))
            })?;

        let result = sqlx::query(
            r"
            UPDATE manifest_review_queue
            SET review_after = $2, review_count = review_count + 1
            WHERE id = $1
            ",
        )
        .bind(task.id)
        .bind(review_after)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound);
        }
        Ok(())
    }

    /// Explicit delete, used only on the non-dangling branch (spec.md §4.6);
    /// the dangling branch deletes the parent manifest row, which cascades.
    async fn delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &ManifestTask,
    ) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM manifest_review_queue WHERE id = $1")
            .bind(task.id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn count(&self, pool: &sqlx::PgPool) -> Result<i64, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM manifest_review_queue")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

/// Delete the manifest row itself; cascades to `manifest_review_queue` via
/// FK `ON DELETE CASCADE` (spec.md invariant 4). Returns whether a row was
/// actually removed, mirroring the manifest-store capability in spec.md §6.
pub async fn delete_manifest_row(
    tx: &mut Transaction<'_, Postgres>,
    manifest_id: Uuid,
) -> Result<bool, QueueError> {
    let result = sqlx::query("DELETE FROM manifests WHERE id = $1")
        .bind(manifest_id)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete the blob row by digest; no cascade (spec.md invariant 4).
pub async fn delete_blob_row(
    tx: &mut Transaction<'_, Postgres>,
    blob_id: Uuid,
) -> Result<bool, QueueError> {
    let result = sqlx::query("DELETE FROM blobs WHERE id = $1")
        .bind(blob_id)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() > 0)
}
