//! Outcomes reported back by the node agent.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Result, ValidationError};
use crate::models::backup::{Backup, BackupCompletion};
use crate::models::principal::Principal;
use crate::models::server::ServerStatus;
use crate::services::audit_service::{AuditEvent, AuditService};
use crate::services::backup_store::BackupRecordStore;

#[derive(Clone)]
pub struct BackupStatusService {
    store: Arc<dyn BackupRecordStore>,
    audit: AuditService,
}

impl BackupStatusService {
    pub fn new(store: Arc<dyn BackupRecordStore>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    /// Record the outcome of an archive job. Each backup completes once.
    pub async fn record_backup_completion(
        &self,
        backup_uuid: Uuid,
        completion: BackupCompletion,
    ) -> Result<Backup> {
        let backup = self.store.get_backup(backup_uuid).await?;
        let event = if completion.successful {
            AuditEvent::BackupCompleted
        } else {
            AuditEvent::BackupFailed
        };

        let mut transition = self
            .audit
            .begin(event, backup.server_id, &Principal::system())
            .await?;

        let current = transition.tx().lock_backup(backup_uuid).await?;
        if current.is_terminal() {
            return Err(ValidationError::BackupAlreadyCompleted.into());
        }
        let updated = transition
            .tx()
            .complete_backup(backup_uuid, &completion)
            .await?;
        transition.backup(backup_uuid);
        transition.record("bytes", updated.bytes);
        transition.commit().await?;

        if updated.is_successful {
            tracing::info!(backup_uuid = %backup_uuid, bytes = updated.bytes, "Backup completed");
        } else {
            tracing::warn!(backup_uuid = %backup_uuid, "Backup failed on node");
        }
        Ok(updated)
    }

    /// Record the outcome of a restore and release the server.
    pub async fn record_restore_completion(
        &self,
        server_id: Uuid,
        backup_uuid: Uuid,
        successful: bool,
    ) -> Result<()> {
        let event = if successful {
            AuditEvent::BackupRestoreCompleted
        } else {
            AuditEvent::BackupRestoreFailed
        };

        let mut transition = self
            .audit
            .begin(event, server_id, &Principal::system())
            .await?;

        let released = transition
            .tx()
            .compare_and_set_server_status(server_id, Some(ServerStatus::RestoringBackup), None)
            .await?;
        if !released {
            return Err(ValidationError::ServerNotRestoring.into());
        }
        transition.backup(backup_uuid);
        transition.commit().await?;

        tracing::info!(
            server_id = %server_id,
            backup_uuid = %backup_uuid,
            successful,
            "Restore finished, server released"
        );
        Ok(())
    }
}
