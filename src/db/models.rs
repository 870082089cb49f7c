//! Row types for the two review queues (spec.md §3).

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A row in `blob_review_queue`, joined against `blobs` for the digest and
/// media type the deleter needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlobTask {
    pub id: Uuid,
    pub blob_id: Uuid,
    pub digest: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub review_after: DateTime<Utc>,
    pub review_count: i64,
}

/// A row in `manifest_review_queue`, joined against `manifests`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ManifestTask {
    pub id: Uuid,
    pub manifest_id: Uuid,
    pub digest: String,
    pub repository: String,
    pub review_after: DateTime<Utc>,
    pub review_count: i64,
}
