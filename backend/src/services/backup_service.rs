//! Backup lifecycle service.
//!
//! Entry point for everything that touches server backups: creation,
//! deletion, download links, restores, locking and the completion callbacks
//! from node agents. Capability checks happen before these methods are
//! called; the principal is passed through for attribution.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::models::audit_log::AuditLog;
use crate::models::backup::{Backup, BackupCompletion, BackupDisk};
use crate::models::pagination::{Page, Pagination};
use crate::models::principal::Principal;
use crate::models::server::Server;
use crate::services::agent_client::AgentClient;
use crate::services::audit_service::{AuditEvent, AuditService};
use crate::services::backup_status_service::BackupStatusService;
use crate::services::backup_store::BackupRecordStore;
use crate::services::delete_backup_service::DeleteBackupService;
use crate::services::download_link_service::DownloadLinkService;
use crate::services::initiate_backup_service::{CreateBackup, InitiateBackupService};
use crate::services::restore_backup_service::RestoreBackupService;
use crate::storage::{ObjectStorage, PresignedUrl};

/// Tunables shared by the backup operations
#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// Disk new backups are written to
    pub disk: BackupDisk,
    /// Lifetime of download links
    pub download_ttl: Duration,
    /// `(max backups, window)` per server, if throttling is on
    pub throttle: Option<(i64, Duration)>,
}

impl BackupSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            disk: config.backup_disk,
            download_ttl: config.download_link_ttl,
            throttle: config
                .throttle_enabled()
                .then_some((config.backup_throttle_limit, config.backup_throttle_period)),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            disk: BackupDisk::NodeAgent,
            download_ttl: Duration::from_secs(15 * 60),
            throttle: None,
        }
    }
}

/// Backup service
#[derive(Clone)]
pub struct BackupService {
    store: Arc<dyn BackupRecordStore>,
    audit: AuditService,
    links: DownloadLinkService,
    initiate: InitiateBackupService,
    delete: DeleteBackupService,
    restore: RestoreBackupService,
    status: BackupStatusService,
}

impl BackupService {
    pub fn new(
        store: Arc<dyn BackupRecordStore>,
        agent: Arc<dyn AgentClient>,
        storage: Option<Arc<dyn ObjectStorage>>,
        settings: BackupSettings,
    ) -> Self {
        let audit = AuditService::new(store.clone());
        let links = DownloadLinkService::new(
            store.clone(),
            agent.clone(),
            storage.clone(),
            settings.download_ttl,
        );
        let delete =
            DeleteBackupService::new(store.clone(), audit.clone(), agent.clone(), storage);
        let initiate = InitiateBackupService::new(
            store.clone(),
            audit.clone(),
            agent.clone(),
            delete.clone(),
            settings,
        );
        let restore =
            RestoreBackupService::new(store.clone(), audit.clone(), agent, links.clone());
        let status = BackupStatusService::new(store.clone(), audit.clone());

        Self {
            store,
            audit,
            links,
            initiate,
            delete,
            restore,
            status,
        }
    }

    pub async fn get_server(&self, server_id: Uuid) -> Result<Server> {
        self.store.get_server(server_id).await
    }

    pub async fn get_backup(&self, backup_uuid: Uuid) -> Result<Backup> {
        self.store.get_backup(backup_uuid).await
    }

    /// List a server's backups, newest first.
    pub async fn list_backups(&self, server: &Server, pagination: Pagination) -> Result<Page<Backup>> {
        self.store.list_backups(server.id, pagination).await
    }

    pub async fn create_backup(
        &self,
        principal: &Principal,
        server: &Server,
        request: CreateBackup,
    ) -> Result<Backup> {
        self.initiate.handle(principal, server, request).await
    }

    pub async fn delete_backup(&self, principal: &Principal, backup: &Backup) -> Result<()> {
        self.delete.handle(principal, backup).await
    }

    /// Issue a download link and record who asked for it.
    pub async fn download_link(
        &self,
        principal: &Principal,
        backup: &Backup,
    ) -> Result<PresignedUrl> {
        let mut transition = self
            .audit
            .begin(AuditEvent::BackupDownloaded, backup.server_id, principal)
            .await?;
        let url = self.links.issue(backup, principal).await?;
        transition.backup(backup.uuid);
        transition.commit().await?;
        Ok(url)
    }

    pub async fn restore_backup(
        &self,
        principal: &Principal,
        server: &Server,
        backup: &Backup,
        truncate: bool,
    ) -> Result<()> {
        self.restore.handle(principal, server, backup, truncate).await
    }

    /// Flip the lock on a backup. Locked backups survive deletion and rotation.
    pub async fn toggle_lock(&self, principal: &Principal, backup: &Backup) -> Result<Backup> {
        let mut transition = self
            .audit
            .begin(AuditEvent::BackupLocked, backup.server_id, principal)
            .await?;

        let current = transition.tx().lock_backup(backup.uuid).await?;
        if current.is_locked {
            transition.set_event(AuditEvent::BackupUnlocked);
        }
        let updated = transition
            .tx()
            .set_backup_locked(current.uuid, !current.is_locked)
            .await?;
        transition.backup(current.uuid);
        transition.commit().await?;
        Ok(updated)
    }

    pub async fn record_backup_completion(
        &self,
        backup_uuid: Uuid,
        completion: BackupCompletion,
    ) -> Result<Backup> {
        self.status
            .record_backup_completion(backup_uuid, completion)
            .await
    }

    pub async fn record_restore_completion(
        &self,
        server: &Server,
        backup_uuid: Uuid,
        successful: bool,
    ) -> Result<()> {
        self.status
            .record_restore_completion(server.id, backup_uuid, successful)
            .await
    }

    pub async fn audit_history(&self, server: &Server, limit: i64) -> Result<Vec<AuditLog>> {
        self.audit.history(server.id, limit).await
    }
}
