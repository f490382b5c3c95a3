//! Execution of `backupctl` commands.

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;

use crate::cli::backup::{output, BackupCli, BackupCommand};
use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::models::pagination::Pagination;
use crate::models::principal::Principal;
use crate::services::agent_client::HttpAgentClient;
use crate::services::backup_service::{BackupService, BackupSettings};
use crate::services::backup_store::PgBackupStore;
use crate::services::initiate_backup_service::CreateBackup;
use crate::storage::s3::{S3Backend, S3Config};
use crate::storage::ObjectStorage;

/// Wire the backup service to PostgreSQL, the node agents and, when a bucket
/// is configured, S3.
pub fn build_service(pool: PgPool, config: &Config) -> Result<BackupService> {
    let store = Arc::new(PgBackupStore::new(pool));
    let agent = Arc::new(HttpAgentClient::new(config)?);
    let storage = match S3Config::from_config(config) {
        Some(s3) => Some(Arc::new(S3Backend::new(s3)?) as Arc<dyn ObjectStorage>),
        None => None,
    };

    Ok(BackupService::new(
        store,
        agent,
        storage,
        BackupSettings::from_config(config),
    ))
}

/// Run a CLI command
pub async fn run(cli: BackupCli, config: &Config) -> Result<()> {
    let pool = db::create_pool(config).await?;
    let format = cli.format.as_str();

    if let BackupCommand::Migrate = cli.command {
        db::migrate(&pool).await?;
        output(format, "Database migrations complete", None);
        return Ok(());
    }

    let service = build_service(pool, config)?;
    let principal = cli.user.map(Principal::user).unwrap_or_default();

    match cli.command {
        BackupCommand::Migrate => {}
        BackupCommand::List {
            server,
            page,
            per_page,
        } => {
            let server = service.get_server(server).await?;
            let page = service
                .list_backups(&server, Pagination::new(page, per_page))
                .await?;
            let lines: Vec<String> = page
                .items
                .iter()
                .map(|b| format!("{}\t{}\t{}", b.uuid, b.name, b.disk_name))
                .collect();
            output(format, &lines.join("\n"), Some(serde_json::to_value(&page)?));
        }
        BackupCommand::Create {
            server,
            name,
            ignored_files,
            locked,
            rotate,
        } => {
            let server = service.get_server(server).await?;
            let backup = service
                .create_backup(
                    &principal,
                    &server,
                    CreateBackup {
                        name,
                        ignored_files,
                        locked,
                        rotate,
                    },
                )
                .await?;
            output(
                format,
                &format!("Backup {} started", backup.uuid),
                Some(serde_json::to_value(&backup)?),
            );
        }
        BackupCommand::Delete { backup } => {
            let backup = service.get_backup(backup).await?;
            service.delete_backup(&principal, &backup).await?;
            output(
                format,
                &format!("Backup {} deleted", backup.uuid),
                Some(json!({ "deleted": backup.uuid })),
            );
        }
        BackupCommand::DownloadUrl { backup } => {
            let backup = service.get_backup(backup).await?;
            let link = service.download_link(&principal, &backup).await?;
            output(
                format,
                &link.url,
                Some(json!({
                    "url": link.url,
                    "expires_in_secs": link.expires_in.as_secs(),
                })),
            );
        }
        BackupCommand::Restore { backup, truncate } => {
            let backup = service.get_backup(backup).await?;
            let server = service.get_server(backup.server_id).await?;
            service
                .restore_backup(&principal, &server, &backup, truncate)
                .await?;
            output(
                format,
                &format!("Restore of backup {} started", backup.uuid),
                Some(json!({
                    "server_id": server.id,
                    "backup_uuid": backup.uuid,
                    "truncate": truncate,
                })),
            );
        }
        BackupCommand::Lock { backup } => {
            let backup = service.get_backup(backup).await?;
            let updated = service.toggle_lock(&principal, &backup).await?;
            let state = if updated.is_locked { "locked" } else { "unlocked" };
            output(
                format,
                &format!("Backup {} {}", updated.uuid, state),
                Some(serde_json::to_value(&updated)?),
            );
        }
        BackupCommand::History { server, limit } => {
            let server = service.get_server(server).await?;
            let entries = service.audit_history(&server, limit).await?;
            let lines: Vec<String> = entries
                .iter()
                .map(|e| format!("{}\t{}\t{}", e.created_at, e.event, e.metadata))
                .collect();
            output(format, &lines.join("\n"), Some(serde_json::to_value(&entries)?));
        }
    }

    Ok(())
}
