//! Object-storage deleter (spec.md §4.3).

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;

use crate::error::StorageError;

/// Idempotent delete of a single blob by content digest.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Remove the object addressed by `digest`, honoring `timeout`. A
    /// missing object is collapsed to success with a warning by the caller,
    /// not by this trait — callers need to know whether the object actually
    /// existed to decide on a warn-and-continue vs. a clean no-op.
    async fn remove_blob(&self, digest: &str, timeout: Duration) -> Result<(), StorageError>;
}

/// S3-compatible object storage (AWS S3, `MinIO`, R2, B2).
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    #[must_use]
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client for the configured endpoint, falling back to real AWS
    /// S3 when no custom endpoint is configured.
    pub async fn from_config(
        endpoint: Option<&str>,
        region: &str,
        bucket: impl Into<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.to_string()));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared_config);
        if endpoint.is_some() {
            // Custom endpoints (MinIO, R2, ...) require path-style addressing.
            s3_config = s3_config.force_path_style(true);
        }

        Self::new(Client::from_conf(s3_config.build()), bucket)
    }

    fn object_key(digest: &str) -> String {
        format!("blobs/{digest}")
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn remove_blob(&self, digest: &str, timeout: Duration) -> Result<(), StorageError> {
        let key = Self::object_key(digest);

        let result = tokio::time::timeout(
            timeout,
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send(),
        )
        .await;

        match result {
            Err(_elapsed) => Err(StorageError::DeadlineExceeded),
            Ok(Err(err)) => {
                if is_not_found(&err) {
                    Err(StorageError::PathNotFound)
                } else {
                    Err(StorageError::Other(anyhow::anyhow!(err)))
                }
            }
            Ok(Ok(_)) => Ok(()),
        }
    }
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool
where
    E: std::error::Error,
{
    err.raw_response()
        .is_some_and(|resp| resp.status().as_u16() == 404)
}

/// A fake used by worker tests to exercise every disposition in spec.md
/// §4.5/§7 without a live S3-compatible backend.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use std::sync::Mutex;

    use super::{async_trait, Duration, ObjectStorage, StorageError};

    #[derive(Debug, Default)]
    pub struct FakeStorage {
        pub removed: Mutex<Vec<String>>,
        pub outcome: Mutex<Option<FakeOutcome>>,
    }

    #[derive(Debug, Clone, Copy)]
    pub enum FakeOutcome {
        NotFound,
        DeadlineExceeded,
        Other,
    }

    impl FakeStorage {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn with_outcome(outcome: FakeOutcome) -> Self {
            Self {
                removed: Mutex::new(Vec::new()),
                outcome: Mutex::new(Some(outcome)),
            }
        }
    }

    #[async_trait]
    impl ObjectStorage for FakeStorage {
        async fn remove_blob(&self, digest: &str, _timeout: Duration) -> Result<(), StorageError> {
            match *self.outcome.lock().expect("lock poisoned") {
                Some(FakeOutcome::NotFound) => Err(StorageError::PathNotFound),
                Some(FakeOutcome::DeadlineExceeded) => Err(StorageError::DeadlineExceeded),
                Some(FakeOutcome::Other) => {
                    Err(StorageError::Other(anyhow::anyhow!("injected failure")))
                }
                None => {
                    self.removed
                        .lock()
                        .expect("lock poisoned")
                        .push(digest.to_string());
                    Ok(())
                }
            }
        }
    }
}
