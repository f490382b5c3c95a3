//! Application error types and result alias.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::server::ServerStatus;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Client-caused refusals. Each variant carries a stable code so callers can
/// render a deterministic response per condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("server is busy ({status}) and cannot accept this operation")]
    ServerBusy { status: ServerStatus },

    #[error("server is {status} and cannot create backups")]
    ServerStateConflict { status: ServerStatus },

    #[error("backup cannot be restored: it has not completed or failed yet")]
    BackupNotRestorable,

    #[error("backup is still in progress")]
    BackupInProgress,

    #[error("backup references an unsupported disk type: {0}")]
    UnsupportedDisk(String),

    #[error("backup is locked and cannot be deleted")]
    BackupLocked,

    #[error("server has reached its backup limit of {limit}")]
    BackupLimitReached { limit: i32 },

    #[error("backups are disabled for this server")]
    BackupsDisabled,

    #[error("only {limit} backups may be created within a {period_secs} second span")]
    BackupThrottled { limit: i64, period_secs: i64 },

    #[error("backup does not belong to this server")]
    BackupServerMismatch,

    #[error("backup has already been completed")]
    BackupAlreadyCompleted,

    #[error("server is not restoring a backup")]
    ServerNotRestoring,

    #[error("invalid ignored file pattern: {0}")]
    InvalidIgnoredFiles(String),

    #[error("invalid backup name: {0}")]
    InvalidName(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::ServerBusy { .. } => "SERVER_BUSY",
            ValidationError::ServerStateConflict { .. } => "SERVER_STATE_CONFLICT",
            ValidationError::BackupNotRestorable => "BACKUP_NOT_RESTORABLE",
            ValidationError::BackupInProgress => "BACKUP_IN_PROGRESS",
            ValidationError::UnsupportedDisk(_) => "UNSUPPORTED_BACKUP_DISK",
            ValidationError::BackupLocked => "BACKUP_LOCKED",
            ValidationError::BackupLimitReached { .. } => "BACKUP_LIMIT_REACHED",
            ValidationError::BackupsDisabled => "BACKUPS_DISABLED",
            ValidationError::BackupThrottled { .. } => "BACKUP_THROTTLED",
            ValidationError::BackupServerMismatch => "BACKUP_SERVER_MISMATCH",
            ValidationError::BackupAlreadyCompleted => "BACKUP_ALREADY_COMPLETED",
            ValidationError::ServerNotRestoring => "SERVER_NOT_RESTORING",
            ValidationError::InvalidIgnoredFiles(_) => "INVALID_IGNORED_FILES",
            ValidationError::InvalidName(_) => "INVALID_BACKUP_NAME",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ValidationError::ServerBusy { .. }
            | ValidationError::ServerStateConflict { .. }
            | ValidationError::BackupLocked
            | ValidationError::BackupAlreadyCompleted
            | ValidationError::ServerNotRestoring => StatusCode::CONFLICT,
            ValidationError::BackupThrottled { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Authorization error
    #[error("Access denied: {0}")]
    Authorization(String),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The node agent or object storage could not be reached in time.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The node agent answered but refused the request.
    #[error("Remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// Control-plane records and remote artifacts disagree; needs reconciliation.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl AppError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RemoteUnavailable(_))
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Migration(_) => "MIGRATION_ERROR",
            AppError::Authorization(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(v) => v.code(),
            AppError::RemoteUnavailable(_) => "REMOTE_UNAVAILABLE",
            AppError::RemoteRejected { .. } => "REMOTE_REJECTED",
            AppError::InconsistentState(_) => "INCONSISTENT_STATE",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Jwt(_) => "JWT_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match &self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database operation failed".to_string(),
            ),
            AppError::Migration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database migration failed".to_string(),
            ),
            AppError::Authorization(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(v) => (v.status_code(), v.to_string()),
            AppError::RemoteUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::RemoteRejected { message, .. } => (StatusCode::BAD_GATEWAY, message.clone()),
            AppError::InconsistentState(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Backup state requires reconciliation".to_string(),
            ),
            AppError::Storage(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO operation failed".to_string(),
            ),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "Invalid JSON".to_string()),
            AppError::Jwt(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Token signing failed".to_string(),
            ),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        // Log the error
        tracing::error!(error = %self, code = code, "Request error");

        let body = Json(json!({
            "code": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}
