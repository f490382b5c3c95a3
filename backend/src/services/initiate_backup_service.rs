//! Backup creation.
//!
//! Rotation runs as its own audited deletion before the new backup's
//! transition opens. It is not undone if the agent then refuses to start the
//! new backup, so the server ends up one backup short until the next attempt.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, Result, ValidationError};
use crate::models::backup::{Backup, NewBackup};
use crate::models::principal::Principal;
use crate::models::server::Server;
use crate::services::agent_client::AgentClient;
use crate::services::audit_service::{AuditEvent, AuditService};
use crate::services::backup_service::BackupSettings;
use crate::services::backup_store::BackupRecordStore;
use crate::services::delete_backup_service::DeleteBackupService;

/// Longest accepted backup name.
pub const MAX_NAME_LENGTH: usize = 191;

/// Request to create a backup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBackup {
    pub name: Option<String>,
    #[serde(default)]
    pub ignored_files: Vec<String>,
    #[serde(default)]
    pub locked: bool,
    /// Make room by deleting the oldest unlocked backup when at the limit.
    #[serde(default)]
    pub rotate: bool,
}

#[derive(Clone)]
pub struct InitiateBackupService {
    store: Arc<dyn BackupRecordStore>,
    audit: AuditService,
    agent: Arc<dyn AgentClient>,
    deleter: DeleteBackupService,
    settings: BackupSettings,
}

impl InitiateBackupService {
    pub fn new(
        store: Arc<dyn BackupRecordStore>,
        audit: AuditService,
        agent: Arc<dyn AgentClient>,
        deleter: DeleteBackupService,
        settings: BackupSettings,
    ) -> Self {
        Self {
            store,
            audit,
            agent,
            deleter,
            settings,
        }
    }

    pub async fn handle(
        &self,
        principal: &Principal,
        server: &Server,
        request: CreateBackup,
    ) -> Result<Backup> {
        if let Some(status) = server.status {
            return Err(ValidationError::ServerStateConflict { status }.into());
        }
        validate_ignored_files(&request.ignored_files)?;
        let name = resolve_name(request.name.as_deref())?;

        self.check_throttle(server).await?;
        let node = self.store.get_node(server.node_id).await?;
        self.make_room(principal, server, request.rotate).await?;

        let disk = self.settings.disk;

        let mut transition = self
            .audit
            .begin(AuditEvent::BackupStarted, server.id, principal)
            .await?;

        let backup = transition
            .tx()
            .insert_backup(&NewBackup {
                uuid: Uuid::new_v4(),
                server_id: server.id,
                name,
                disk,
                ignored_files: request.ignored_files,
                is_locked: request.locked,
            })
            .await?;

        self.agent
            .start_backup(&node, server.id, backup.uuid, disk, &backup.ignored_files)
            .await?;
        transition.backup(backup.uuid);

        if let Err(e) = transition.commit().await {
            tracing::error!(
                alert = true,
                server_id = %server.id,
                backup_uuid = %backup.uuid,
                error = %e,
                "Backup dispatched to node but its record could not be committed"
            );
            return Err(AppError::InconsistentState(format!(
                "backup {} was started without a record: {}",
                backup.uuid, e
            )));
        }

        tracing::info!(
            server_id = %server.id,
            backup_uuid = %backup.uuid,
            disk = %disk,
            "Backup started"
        );
        Ok(backup)
    }

    async fn check_throttle(&self, server: &Server) -> Result<()> {
        let Some((limit, period)) = self.settings.throttle else {
            return Ok(());
        };

        let window = chrono::Duration::from_std(period)
            .map_err(|e| AppError::Config(format!("Invalid throttle period: {}", e)))?;
        let recent = self
            .store
            .count_backups_since(server.id, Utc::now() - window)
            .await?;

        if recent >= limit {
            return Err(ValidationError::BackupThrottled {
                limit,
                period_secs: period.as_secs() as i64,
            }
            .into());
        }
        Ok(())
    }

    async fn make_room(&self, principal: &Principal, server: &Server, rotate: bool) -> Result<()> {
        if server.backup_limit == 0 {
            return Err(ValidationError::BackupsDisabled.into());
        }

        let existing = self.store.non_failed_backups(server.id).await?;
        if (existing.len() as i64) < i64::from(server.backup_limit) {
            return Ok(());
        }

        let limit_reached = ValidationError::BackupLimitReached {
            limit: server.backup_limit,
        };
        if !rotate {
            return Err(limit_reached.into());
        }

        let oldest = existing
            .iter()
            .find(|b| !b.is_locked)
            .ok_or(limit_reached)?;

        tracing::info!(
            server_id = %server.id,
            backup_uuid = %oldest.uuid,
            "Rotating oldest backup to stay within limit"
        );
        self.deleter.handle(principal, oldest).await
    }
}

fn validate_ignored_files(patterns: &[String]) -> Result<()> {
    for pattern in patterns {
        if pattern.trim().is_empty() {
            return Err(ValidationError::InvalidIgnoredFiles("empty pattern".to_string()).into());
        }
        if pattern.contains('\n') || pattern.contains('\0') {
            return Err(ValidationError::InvalidIgnoredFiles(format!(
                "pattern {:?} contains a control character",
                pattern
            ))
            .into());
        }
    }
    Ok(())
}

fn resolve_name(name: Option<&str>) -> Result<String> {
    match name {
        None => Ok(format!("Backup at {}", Utc::now().format("%Y-%m-%d %H:%M:%S"))),
        Some(name) if name.trim().is_empty() => {
            Err(ValidationError::InvalidName("name must not be blank".to_string()).into())
        }
        Some(name) if name.chars().count() > MAX_NAME_LENGTH => Err(ValidationError::InvalidName(
            format!("name exceeds {} characters", MAX_NAME_LENGTH),
        )
        .into()),
        Some(name) => Ok(name.to_string()),
    }
}
