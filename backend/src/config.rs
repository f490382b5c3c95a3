//! Application configuration loaded from environment variables.

use crate::error::{AppError, Result};
use crate::models::backup::BackupDisk;
use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum pooled database connections
    pub database_max_connections: u32,

    /// Per-statement timeout applied to every database session
    pub database_statement_timeout: Duration,

    /// Public URL of this control plane, used as the download token issuer
    pub panel_url: String,

    /// Total timeout for a single node agent request
    pub agent_timeout: Duration,

    /// Connect timeout for node agent requests
    pub agent_connect_timeout: Duration,

    /// Disk new backups are written to
    pub backup_disk: BackupDisk,

    /// Lifetime requested for signed download URLs
    pub download_link_ttl: Duration,

    /// Backups allowed per server within `backup_throttle_period` (0 disables)
    pub backup_throttle_limit: i64,

    /// Throttle window (0 disables)
    pub backup_throttle_period: Duration,

    /// S3 bucket name (object storage disk)
    pub s3_bucket: Option<String>,

    /// S3 region
    pub s3_region: String,

    /// S3 endpoint URL (for MinIO or other S3-compatible services)
    pub s3_endpoint: Option<String>,

    /// Optional key prefix for backup objects
    pub s3_prefix: Option<String>,

    /// Dedicated access key for presigning (optional)
    pub s3_presign_access_key: Option<String>,

    /// Dedicated secret key for presigning (optional)
    pub s3_presign_secret_key: Option<String>,

    /// Timeout for a single object storage call
    pub storage_timeout: Duration,

    /// OTLP endpoint for span export (optional)
    pub otel_endpoint: Option<String>,
}

redacted_debug!(Config {
    redact_url database_url,
    show database_max_connections,
    show database_statement_timeout,
    show panel_url,
    show agent_timeout,
    show agent_connect_timeout,
    show backup_disk,
    show download_link_ttl,
    show backup_throttle_limit,
    show backup_throttle_period,
    show s3_bucket,
    show s3_region,
    show s3_endpoint,
    show s3_prefix,
    redact_option s3_presign_access_key,
    redact_option s3_presign_secret_key,
    show storage_timeout,
    show otel_endpoint,
});

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str, default: u64| -> Duration {
            Duration::from_secs(
                lookup(key)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default),
            )
        };

        let backup_disk = match lookup("BACKUP_DISK") {
            Some(value) => value
                .parse()
                .map_err(|e| AppError::Config(format!("BACKUP_DISK: {e}")))?,
            None => BackupDisk::NodeAgent,
        };

        let config = Self {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| AppError::Config("DATABASE_URL not set".into()))?,
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            database_statement_timeout: secs("DATABASE_STATEMENT_TIMEOUT_SECS", 30),
            panel_url: lookup("PANEL_URL").unwrap_or_else(|| "http://localhost:8080".into()),
            agent_timeout: secs("AGENT_TIMEOUT_SECS", 30),
            agent_connect_timeout: secs("AGENT_CONNECT_TIMEOUT_SECS", 5),
            backup_disk,
            download_link_ttl: secs("BACKUP_DOWNLOAD_TTL_SECS", 900),
            backup_throttle_limit: lookup("BACKUP_THROTTLE_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            backup_throttle_period: secs("BACKUP_THROTTLE_PERIOD_SECS", 600),
            s3_bucket: lookup("S3_BUCKET"),
            s3_region: lookup("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
            s3_endpoint: lookup("S3_ENDPOINT"),
            s3_prefix: lookup("S3_PREFIX"),
            s3_presign_access_key: lookup("S3_PRESIGN_ACCESS_KEY_ID"),
            s3_presign_secret_key: lookup("S3_PRESIGN_SECRET_ACCESS_KEY"),
            storage_timeout: secs("STORAGE_TIMEOUT_SECS", 30),
            otel_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        if config.backup_disk == BackupDisk::ObjectStorage && config.s3_bucket.is_none() {
            return Err(AppError::Config(
                "S3_BUCKET must be set when BACKUP_DISK=object_storage".into(),
            ));
        }

        Ok(config)
    }

    /// Whether creation throttling is active.
    pub fn throttle_enabled(&self) -> bool {
        self.backup_throttle_limit > 0 && !self.backup_throttle_period.is_zero()
    }
}
