//! Object storage for backup artifacts.

pub mod s3;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// S3 refuses presigned URLs that live longer than seven days.
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Result of a presigned URL request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    /// The presigned URL for direct access
    pub url: String,
    /// Lifetime the URL was signed for
    pub expires_in: Duration,
}

/// Object storage operations the control plane needs for backups.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Sign a time-boxed GET URL for an object.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<PresignedUrl>;
}
