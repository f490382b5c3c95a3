//! Server and node models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Non-idle server states. An idle server has no status at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "server_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Installing,
    InstallFailed,
    ReinstallFailed,
    Suspended,
    RestoringBackup,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Installing => "installing",
            ServerStatus::InstallFailed => "install_failed",
            ServerStatus::ReinstallFailed => "reinstall_failed",
            ServerStatus::Suspended => "suspended",
            ServerStatus::RestoringBackup => "restoring_backup",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server managed by the control plane.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Server {
    pub id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    pub status: Option<ServerStatus>,
    pub backup_limit: i32,
    pub created_at: DateTime<Utc>,
}

impl Server {
    /// True when no operation currently owns the server.
    pub fn is_idle(&self) -> bool {
        self.status.is_none()
    }
}

/// A machine running the node agent. Servers are placed on exactly one node.
#[derive(Clone, FromRow)]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub scheme: String,
    pub fqdn: String,
    pub daemon_listen: i32,
    pub daemon_token: String,
}

redacted_debug!(Node {
    show id,
    show name,
    show scheme,
    show fqdn,
    show daemon_listen,
    redact daemon_token,
});

impl Node {
    /// Base URL the agent listens on, without a trailing slash.
    pub fn agent_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.fqdn, self.daemon_listen)
    }
}
