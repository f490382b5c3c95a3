//! Backup restore.
//!
//! The server is moved to `restoring_backup` with a compare-and-swap that is
//! committed before the agent is called, so the agent never sees a restore
//! for a server the control plane still considers idle. The status is cleared
//! when the agent reports the outcome.

use std::sync::Arc;

use crate::error::{AppError, Result, ValidationError};
use crate::models::backup::{Backup, BackupDisk};
use crate::models::principal::Principal;
use crate::models::server::{Server, ServerStatus};
use crate::services::agent_client::{AgentClient, RestoreRequest};
use crate::services::audit_service::{AuditEvent, AuditService};
use crate::services::backup_store::BackupRecordStore;
use crate::services::download_link_service::DownloadLinkService;

#[derive(Clone)]
pub struct RestoreBackupService {
    store: Arc<dyn BackupRecordStore>,
    audit: AuditService,
    agent: Arc<dyn AgentClient>,
    links: DownloadLinkService,
}

impl RestoreBackupService {
    pub fn new(
        store: Arc<dyn BackupRecordStore>,
        audit: AuditService,
        agent: Arc<dyn AgentClient>,
        links: DownloadLinkService,
    ) -> Self {
        Self {
            store,
            audit,
            agent,
            links,
        }
    }

    pub async fn handle(
        &self,
        principal: &Principal,
        server: &Server,
        backup: &Backup,
        truncate: bool,
    ) -> Result<()> {
        if let Some(status) = server.status {
            return Err(ValidationError::ServerBusy { status }.into());
        }
        if backup.server_id != server.id {
            return Err(ValidationError::BackupServerMismatch.into());
        }
        if !backup.is_terminal() {
            return Err(ValidationError::BackupNotRestorable.into());
        }
        let disk = backup.disk()?;
        let node = self.store.get_node(server.node_id).await?;

        let mut transition = self
            .audit
            .begin(AuditEvent::BackupRestoreStarted, server.id, principal)
            .await?;

        // Held until commit, which keeps a concurrent delete of this backup out.
        let backup = transition.tx().lock_backup(backup.uuid).await?;
        if !backup.is_terminal() {
            return Err(ValidationError::BackupNotRestorable.into());
        }
        transition.backup(backup.uuid);

        let download_url = match disk {
            BackupDisk::ObjectStorage => Some(self.links.issue(&backup, principal).await?.url),
            BackupDisk::NodeAgent => None,
        };

        let claimed = self
            .store
            .compare_and_set_server_status(server.id, None, Some(ServerStatus::RestoringBackup))
            .await?;
        if !claimed {
            let current = self.store.get_server(server.id).await?;
            return Err(ValidationError::ServerBusy {
                status: current.status.unwrap_or(ServerStatus::RestoringBackup),
            }
            .into());
        }

        let request = RestoreRequest {
            server_id: server.id,
            backup_uuid: backup.uuid,
            disk,
            download_url,
            truncate,
        };
        if let Err(e) = self.agent.restore(&node, &request).await {
            tracing::error!(
                alert = true,
                server_id = %server.id,
                backup_uuid = %backup.uuid,
                error = %e,
                "Restore dispatch failed after server was marked restoring_backup; \
                 server stays locked until reconciled"
            );
            return Err(e);
        }

        if let Err(e) = transition.commit().await {
            tracing::error!(
                alert = true,
                server_id = %server.id,
                backup_uuid = %backup.uuid,
                error = %e,
                "Restore dispatched but audit transaction failed to commit"
            );
            return Err(AppError::InconsistentState(format!(
                "restore of backup {} started without an audit record: {}",
                backup.uuid, e
            )));
        }

        tracing::info!(
            server_id = %server.id,
            backup_uuid = %backup.uuid,
            truncate,
            "Backup restore started"
        );
        Ok(())
    }
}
