//! Time-boxed download links for backup artifacts.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result, ValidationError};
use crate::models::backup::{Backup, BackupDisk};
use crate::models::principal::Principal;
use crate::services::agent_client::AgentClient;
use crate::services::backup_store::BackupRecordStore;
use crate::storage::{ObjectStorage, PresignedUrl};

/// Issues download URLs, dispatching on where the artifact lives.
#[derive(Clone)]
pub struct DownloadLinkService {
    store: Arc<dyn BackupRecordStore>,
    agent: Arc<dyn AgentClient>,
    storage: Option<Arc<dyn ObjectStorage>>,
    ttl: Duration,
}

impl DownloadLinkService {
    pub fn new(
        store: Arc<dyn BackupRecordStore>,
        agent: Arc<dyn AgentClient>,
        storage: Option<Arc<dyn ObjectStorage>>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            agent,
            storage,
            ttl,
        }
    }

    /// Issue a URL for a completed backup. Nothing is persisted.
    pub async fn issue(&self, backup: &Backup, principal: &Principal) -> Result<PresignedUrl> {
        let disk = backup.disk()?;
        if !backup.is_terminal() {
            return Err(ValidationError::BackupInProgress.into());
        }

        match disk {
            BackupDisk::ObjectStorage => {
                self.object_storage()?
                    .presign_get(&backup.object_key(), self.ttl)
                    .await
            }
            BackupDisk::NodeAgent => {
                let server = self.store.get_server(backup.server_id).await?;
                let node = self.store.get_node(server.node_id).await?;
                self.agent
                    .issue_download_url(&node, server.id, backup.uuid, principal, self.ttl)
                    .await
            }
        }
    }

    fn object_storage(&self) -> Result<&Arc<dyn ObjectStorage>> {
        self.storage
            .as_ref()
            .ok_or_else(|| AppError::Config("Object storage is not configured".to_string()))
    }
}
