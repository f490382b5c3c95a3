//! Node agent client.
//!
//! The agent runs on every node and performs the actual archive work. Calls
//! are authenticated with the node's daemon token. Download links for
//! node-local backups are JWTs signed with that same token, which the agent
//! verifies before streaming the archive.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::backup::BackupDisk;
use crate::models::principal::Principal;
use crate::models::server::Node;
use crate::storage::PresignedUrl;

/// Parameters for a restore dispatched to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub server_id: Uuid,
    pub backup_uuid: Uuid,
    pub disk: BackupDisk,
    /// Where the agent fetches the archive from, for remote disks.
    pub download_url: Option<String>,
    /// Wipe the server's files before extracting.
    pub truncate: bool,
}

/// Remote operations on the node that hosts a server.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Ask the agent to start archiving. Returns once the agent accepted the
    /// job; completion is reported back separately.
    async fn start_backup(
        &self,
        node: &Node,
        server_id: Uuid,
        backup_uuid: Uuid,
        disk: BackupDisk,
        ignored_files: &[String],
    ) -> Result<()>;

    /// Remove a node-local artifact. An artifact already gone counts as removed.
    async fn delete_backup(&self, node: &Node, server_id: Uuid, backup_uuid: Uuid) -> Result<()>;

    async fn restore(&self, node: &Node, request: &RestoreRequest) -> Result<()>;

    /// Mint a time-boxed URL for fetching a node-local artifact.
    async fn issue_download_url(
        &self,
        node: &Node,
        server_id: Uuid,
        backup_uuid: Uuid,
        principal: &Principal,
        ttl: Duration,
    ) -> Result<PresignedUrl>;
}

/// Claims of a backup download token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadClaims {
    /// Issuer (control plane URL)
    pub iss: String,
    /// Audience (agent URL)
    pub aud: String,
    /// Token ID
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Lets the agent reject replays of the same link
    pub unique_id: String,
    pub backup_uuid: Uuid,
    pub server_uuid: Uuid,
    pub user_uuid: Option<Uuid>,
}

/// Sign a download token for `node`.
pub fn sign_download_token(
    node: &Node,
    issuer: &str,
    server_id: Uuid,
    backup_uuid: Uuid,
    principal: &Principal,
    ttl: Duration,
) -> Result<String> {
    let now = Utc::now().timestamp();
    let id = Uuid::new_v4().to_string();
    let claims = DownloadClaims {
        iss: issuer.to_string(),
        aud: node.agent_url(),
        jti: id.clone(),
        iat: now,
        nbf: now - 300,
        exp: now + ttl.as_secs() as i64,
        unique_id: id,
        backup_uuid,
        server_uuid: server_id,
        user_uuid: principal.user_id,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(node.daemon_token.as_bytes()),
    )?;
    Ok(token)
}

/// HTTP client for the node agent API
pub struct HttpAgentClient {
    client: Client,
    panel_url: String,
}

impl HttpAgentClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.agent_timeout)
            .connect_timeout(config.agent_connect_timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build agent HTTP client: {}", e)))?;

        Ok(Self {
            client,
            panel_url: config.panel_url.trim_end_matches('/').to_string(),
        })
    }

    fn server_url(node: &Node, server_id: Uuid, path: &str) -> String {
        format!("{}/api/servers/{}/{}", node.agent_url(), server_id, path)
    }

    /// Send a request and classify the outcome. Returns the status of any
    /// response that was not refused.
    async fn send(&self, node: &Node, request: RequestBuilder) -> Result<StatusCode> {
        let response = request
            .bearer_auth(&node.daemon_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error(node, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(status);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(node, status, body))
    }
}

fn transport_error(node: &Node, e: reqwest::Error) -> AppError {
    let kind = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    AppError::RemoteUnavailable(format!("Node '{}' {}: {}", node.name, kind, e))
}

fn classify_status(node: &Node, status: StatusCode, body: String) -> AppError {
    if status.is_server_error() {
        AppError::RemoteUnavailable(format!(
            "Node '{}' returned {}: {}",
            node.name,
            status.as_u16(),
            body
        ))
    } else {
        AppError::RemoteRejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn start_backup(
        &self,
        node: &Node,
        server_id: Uuid,
        backup_uuid: Uuid,
        disk: BackupDisk,
        ignored_files: &[String],
    ) -> Result<()> {
        let body = json!({
            "adapter": disk.as_str(),
            "uuid": backup_uuid,
            "ignore": ignored_files.join("\n"),
        });

        self.send(
            node,
            self.client
                .post(Self::server_url(node, server_id, "backup"))
                .json(&body),
        )
        .await?;

        tracing::info!(
            node = %node.name,
            server_id = %server_id,
            backup_uuid = %backup_uuid,
            "Backup dispatched to node agent"
        );
        Ok(())
    }

    async fn delete_backup(&self, node: &Node, server_id: Uuid, backup_uuid: Uuid) -> Result<()> {
        let url = Self::server_url(node, server_id, &format!("backup/{}", backup_uuid));
        match self.send(node, self.client.delete(url)).await {
            Ok(_) => Ok(()),
            Err(AppError::RemoteRejected { status: 404, .. }) => {
                tracing::debug!(backup_uuid = %backup_uuid, "Backup already absent on node");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn restore(&self, node: &Node, request: &RestoreRequest) -> Result<()> {
        let body = json!({
            "adapter": request.disk.as_str(),
            "truncate_directory": request.truncate,
            "download_url": request.download_url,
        });
        let url = Self::server_url(
            node,
            request.server_id,
            &format!("backup/{}/restore", request.backup_uuid),
        );

        self.send(node, self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn issue_download_url(
        &self,
        node: &Node,
        server_id: Uuid,
        backup_uuid: Uuid,
        principal: &Principal,
        ttl: Duration,
    ) -> Result<PresignedUrl> {
        let token =
            sign_download_token(node, &self.panel_url, server_id, backup_uuid, principal, ttl)?;

        Ok(PresignedUrl {
            url: format!("{}/download/backup?token={}", node.agent_url(), token),
            expires_in: ttl,
        })
    }
}
