//! Backup model.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ValidationError;

/// Where a backup artifact lives.
///
/// Persisted as text so rows written by other versions stay readable; every
/// code path goes through [`Backup::disk`] and matches on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupDisk {
    /// Artifact is kept on the node running the server.
    NodeAgent,
    /// Artifact is uploaded to S3-compatible object storage.
    ObjectStorage,
}

impl BackupDisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupDisk::NodeAgent => "node_agent",
            BackupDisk::ObjectStorage => "object_storage",
        }
    }
}

impl std::fmt::Display for BackupDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupDisk {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node_agent" => Ok(BackupDisk::NodeAgent),
            "object_storage" => Ok(BackupDisk::ObjectStorage),
            other => Err(ValidationError::UnsupportedDisk(other.to_string())),
        }
    }
}

/// A backup of one server.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Backup {
    pub uuid: Uuid,
    pub server_id: Uuid,
    pub name: String,
    #[sqlx(rename = "disk")]
    #[serde(rename = "disk")]
    pub disk_name: String,
    pub ignored_files: Vec<String>,
    pub is_successful: bool,
    pub is_locked: bool,
    pub checksum: Option<String>,
    pub bytes: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Backup {
    /// Parse the persisted disk name into a supported backend.
    pub fn disk(&self) -> Result<BackupDisk, ValidationError> {
        self.disk_name.parse()
    }

    /// A backup is terminal once its outcome, success or failure, is recorded.
    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some() || self.is_successful
    }

    /// Non-failed backups count toward a server's backup limit.
    pub fn is_non_failed(&self) -> bool {
        self.is_successful || self.completed_at.is_none()
    }

    /// Object key of the artifact, relative to the storage prefix.
    pub fn object_key(&self) -> String {
        format!("{}/{}.tar.gz", self.server_id, self.uuid)
    }
}

/// Values for a backup row created by the initiate flow.
#[derive(Debug, Clone)]
pub struct NewBackup {
    pub uuid: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub disk: BackupDisk,
    pub ignored_files: Vec<String>,
    pub is_locked: bool,
}

/// Outcome reported by the node agent once a backup finishes.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupCompletion {
    pub successful: bool,
    pub checksum: Option<String>,
    #[serde(default)]
    pub bytes: i64,
}
