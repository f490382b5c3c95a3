//! S3 storage backend using rust-s3 crate.
//!
//! Supports AWS S3 and S3-compatible services (MinIO, etc.). Credentials come
//! from the default chain (env vars, ~/.aws/credentials, container or instance
//! metadata). Presigning can use a dedicated key pair instead, so signed URLs
//! are not limited by the remaining lifetime of short-lived STS credentials.

use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use std::future::Future;
use std::time::Duration;

use super::{ObjectStorage, PresignedUrl, MAX_PRESIGN_EXPIRY};
use crate::config::Config;
use crate::error::{AppError, Result};

/// S3 storage backend configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint URL (for MinIO compatibility)
    pub endpoint: Option<String>,
    /// Optional key prefix for all objects
    pub prefix: Option<String>,
    /// Dedicated access key for presigned URL signing
    pub presign_access_key: Option<String>,
    /// Dedicated secret key for presigned URL signing
    pub presign_secret_key: Option<String>,
    /// Upper bound for each request
    pub timeout: Duration,
}

impl S3Config {
    /// Create a new S3 config with required fields
    pub fn new(bucket: String, region: String) -> Self {
        Self {
            bucket,
            region,
            endpoint: None,
            prefix: None,
            presign_access_key: None,
            presign_secret_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Build from application config. Returns `None` when no bucket is set.
    pub fn from_config(config: &Config) -> Option<Self> {
        let bucket = config.s3_bucket.clone()?;
        Some(Self {
            bucket,
            region: config.s3_region.clone(),
            endpoint: config.s3_endpoint.clone(),
            prefix: config.s3_prefix.clone(),
            presign_access_key: config.s3_presign_access_key.clone(),
            presign_secret_key: config.s3_presign_secret_key.clone(),
            timeout: config.storage_timeout,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// S3-compatible storage backend
pub struct S3Backend {
    bucket: Box<Bucket>,
    /// Bucket used for presigning when dedicated credentials are configured
    signing_bucket: Option<Box<Bucket>>,
    prefix: Option<String>,
    timeout: Duration,
}

impl S3Backend {
    /// Create new S3 backend from configuration
    pub fn new(config: S3Config) -> Result<Self> {
        let credentials = Credentials::default()
            .map_err(|e| AppError::Config(format!("Failed to load AWS credentials: {}", e)))?;

        let region = match &config.endpoint {
            Some(endpoint) => Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.clone(),
            },
            None => config
                .region
                .parse()
                .map_err(|_| AppError::Config(format!("Invalid S3 region: {}", config.region)))?,
        };

        // Path-style addressing for MinIO and other custom endpoints
        let use_path_style = config.endpoint.is_some();
        let open_bucket = |creds: Credentials| -> Result<Box<Bucket>> {
            let bucket = Bucket::new(&config.bucket, region.clone(), creds)
                .map_err(|e| AppError::Config(format!("Failed to open S3 bucket: {}", e)))?;
            Ok(if use_path_style {
                bucket.with_path_style()
            } else {
                bucket
            })
        };

        let bucket = open_bucket(credentials)?;

        let signing_bucket = match (&config.presign_access_key, &config.presign_secret_key) {
            (Some(ak), Some(sk)) => {
                let creds = Credentials::new(Some(ak.as_str()), Some(sk.as_str()), None, None, None)
                    .map_err(|e| AppError::Config(format!("Invalid presign credentials: {}", e)))?;
                tracing::info!("Using dedicated credentials for presigned URL signing");
                Some(open_bucket(creds)?)
            }
            _ => None,
        };

        tracing::info!(
            bucket = %config.bucket,
            path_style = use_path_style,
            dedicated_signing_creds = signing_bucket.is_some(),
            "S3 backup storage configured"
        );

        Ok(Self {
            bucket,
            signing_bucket,
            prefix: config.prefix,
            timeout: config.timeout,
        })
    }

    /// Generate the full S3 key with optional prefix
    fn full_key(&self, key: &str) -> String {
        full_key(self.prefix.as_deref(), key)
    }

    /// Run one S3 call under the configured timeout. Only the timeout is
    /// mapped here; S3 failures are left to the caller.
    async fn bounded<T, F>(
        &self,
        op: &str,
        key: &str,
        fut: F,
    ) -> Result<std::result::Result<T, S3Error>>
    where
        F: Future<Output = std::result::Result<T, S3Error>>,
    {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            AppError::RemoteUnavailable(format!(
                "S3 {} of '{}' timed out after {:?}",
                op, key, self.timeout
            ))
        })
    }
}

fn full_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
        None => key.to_string(),
    }
}

fn map_s3_error(op: &str, key: &str, e: S3Error) -> AppError {
    match e {
        S3Error::HttpFailWithBody(status, body) if status >= 500 => AppError::RemoteUnavailable(
            format!("S3 {} of '{}' failed with {}: {}", op, key, status, body),
        ),
        S3Error::HttpFailWithBody(status, body) => {
            AppError::Storage(format!("S3 {} of '{}' failed with {}: {}", op, key, status, body))
        }
        other => AppError::RemoteUnavailable(format!("S3 {} of '{}' failed: {}", op, key, other)),
    }
}

#[async_trait]
impl ObjectStorage for S3Backend {
    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);

        match self
            .bounded("delete", key, self.bucket.delete_object(&full_key))
            .await?
        {
            Ok(_) => {}
            Err(S3Error::HttpFailWithBody(404, _)) => {
                tracing::debug!(key = %key, "S3 object already absent");
            }
            Err(e) => return Err(map_s3_error("delete", key, e)),
        }

        tracing::debug!(key = %key, "S3 delete object successful");
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<PresignedUrl> {
        let full_key = self.full_key(key);
        let expires_in = expires_in.min(MAX_PRESIGN_EXPIRY);
        let expiry_secs = expires_in.as_secs() as u32;

        let bucket = self.signing_bucket.as_ref().unwrap_or(&self.bucket);
        let url = self
            .bounded("presign", key, bucket.presign_get(&full_key, expiry_secs, None))
            .await?
            .map_err(|e| map_s3_error("presign", key, e))?;

        tracing::debug!(
            key = %key,
            expires_in_secs = expiry_secs,
            dedicated_creds = self.signing_bucket.is_some(),
            "Generated S3 presigned URL"
        );

        Ok(PresignedUrl { url, expires_in })
    }
}
