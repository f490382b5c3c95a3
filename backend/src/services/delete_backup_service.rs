//! Backup deletion.
//!
//! The remote artifact is removed before the record. Once the artifact is
//! gone a failure to drop the record is surfaced as an inconsistency rather
//! than retried silently.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{AppError, Result, ValidationError};
use crate::models::backup::{Backup, BackupDisk};
use crate::models::principal::Principal;
use crate::models::server::ServerStatus;
use crate::services::agent_client::AgentClient;
use crate::services::audit_service::{AuditEvent, AuditService, AuditedTransition};
use crate::services::backup_store::BackupRecordStore;
use crate::storage::ObjectStorage;

#[derive(Clone)]
pub struct DeleteBackupService {
    store: Arc<dyn BackupRecordStore>,
    audit: AuditService,
    agent: Arc<dyn AgentClient>,
    storage: Option<Arc<dyn ObjectStorage>>,
}

impl DeleteBackupService {
    pub fn new(
        store: Arc<dyn BackupRecordStore>,
        audit: AuditService,
        agent: Arc<dyn AgentClient>,
        storage: Option<Arc<dyn ObjectStorage>>,
    ) -> Self {
        Self {
            store,
            audit,
            agent,
            storage,
        }
    }

    pub async fn handle(&self, principal: &Principal, backup: &Backup) -> Result<()> {
        let server = self.store.get_server(backup.server_id).await?;
        Self::ensure_not_restoring(server.status)?;
        let node = self.store.get_node(server.node_id).await?;

        let mut transition = self
            .audit
            .begin(AuditEvent::BackupDeleted, server.id, principal)
            .await?;

        // Re-read under the row lock; a concurrent restore or delete holds it
        // for the duration of its own transition. A restore that won the lock
        // has committed its status claim by the time it releases it.
        let backup = transition.tx().lock_backup(backup.uuid).await?;
        let status = transition.tx().server_status(server.id).await?;
        Self::ensure_not_restoring(status)?;
        if backup.is_locked && backup.is_successful {
            return Err(ValidationError::BackupLocked.into());
        }
        let disk = backup.disk()?;
        transition.backup(backup.uuid);

        match disk {
            BackupDisk::ObjectStorage => {
                let storage = self.storage.as_ref().ok_or_else(|| {
                    AppError::Config("Object storage is not configured".to_string())
                })?;
                storage.delete(&backup.object_key()).await?;
            }
            BackupDisk::NodeAgent => {
                self.agent
                    .delete_backup(&node, server.id, backup.uuid)
                    .await?;
            }
        }

        if let Err(e) = Self::remove_record(transition, backup.uuid).await {
            tracing::error!(
                backup_uuid = %backup.uuid,
                server_id = %server.id,
                error = %e,
                "Backup artifact removed but record could not be deleted"
            );
            return Err(AppError::InconsistentState(format!(
                "artifact for backup {} was removed but its record remains: {}",
                backup.uuid, e
            )));
        }

        tracing::info!(backup_uuid = %backup.uuid, server_id = %server.id, "Backup deleted");
        Ok(())
    }

    fn ensure_not_restoring(status: Option<ServerStatus>) -> Result<()> {
        if status == Some(ServerStatus::RestoringBackup) {
            return Err(ValidationError::ServerBusy {
                status: ServerStatus::RestoringBackup,
            }
            .into());
        }
        Ok(())
    }

    async fn remove_record(mut transition: AuditedTransition, uuid: Uuid) -> Result<()> {
        transition.tx().delete_backup(uuid).await?;
        transition.commit().await?;
        Ok(())
    }
}
