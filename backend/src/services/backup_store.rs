//! Record store for servers, backups and the audit log.
//!
//! Reads and the server-status compare-and-swap run directly against the
//! pool and are visible to other sessions as soon as they return. Everything
//! else is written through a [`StoreTransaction`], which rolls back when
//! dropped without `commit`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::audit_log::AuditLog;
use crate::models::backup::{Backup, BackupCompletion, NewBackup};
use crate::models::pagination::{Page, Pagination};
use crate::models::server::{Node, Server, ServerStatus};
use crate::services::audit_service::AuditEntry;

/// Persisted state owned by the control plane.
#[async_trait]
pub trait BackupRecordStore: Send + Sync {
    async fn get_server(&self, id: Uuid) -> Result<Server>;

    async fn get_node(&self, id: Uuid) -> Result<Node>;

    async fn get_backup(&self, uuid: Uuid) -> Result<Backup>;

    /// Backups of a server, newest first.
    async fn list_backups(&self, server_id: Uuid, pagination: Pagination) -> Result<Page<Backup>>;

    /// Successful or still running backups of a server, oldest first.
    async fn non_failed_backups(&self, server_id: Uuid) -> Result<Vec<Backup>>;

    /// Number of backups created for a server at or after `since`.
    async fn count_backups_since(&self, server_id: Uuid, since: DateTime<Utc>) -> Result<i64>;

    /// Set `status` to `next` only if it currently equals `expected`.
    /// Returns whether the swap happened. The write is committed on return.
    async fn compare_and_set_server_status(
        &self,
        server_id: Uuid,
        expected: Option<ServerStatus>,
        next: Option<ServerStatus>,
    ) -> Result<bool>;

    /// Most recent audit entries for a server, newest first.
    async fn audit_history(&self, server_id: Uuid, limit: i64) -> Result<Vec<AuditLog>>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// Writes that must commit together with an audit entry.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Load a backup and hold it against concurrent writers until the
    /// transaction ends.
    async fn lock_backup(&mut self, uuid: Uuid) -> Result<Backup>;

    /// Current server status as seen by this transaction.
    async fn server_status(&mut self, server_id: Uuid) -> Result<Option<ServerStatus>>;

    async fn insert_backup(&mut self, backup: &NewBackup) -> Result<Backup>;

    async fn delete_backup(&mut self, uuid: Uuid) -> Result<()>;

    async fn set_backup_locked(&mut self, uuid: Uuid, locked: bool) -> Result<Backup>;

    async fn complete_backup(&mut self, uuid: Uuid, completion: &BackupCompletion)
        -> Result<Backup>;

    async fn compare_and_set_server_status(
        &mut self,
        server_id: Uuid,
        expected: Option<ServerStatus>,
        next: Option<ServerStatus>,
    ) -> Result<bool>;

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<AuditLog>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

fn backup_not_found(uuid: Uuid) -> AppError {
    AppError::NotFound(format!("Backup {} not found", uuid))
}

/// PostgreSQL record store
#[derive(Clone)]
pub struct PgBackupStore {
    db: PgPool,
}

impl PgBackupStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BackupRecordStore for PgBackupStore {
    async fn get_server(&self, id: Uuid) -> Result<Server> {
        sqlx::query_as::<_, Server>(
            r#"
            SELECT id, node_id, name, status, backup_limit, created_at
            FROM servers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("Server {} not found", id)))
    }

    async fn get_node(&self, id: Uuid) -> Result<Node> {
        sqlx::query_as::<_, Node>(
            "SELECT id, name, scheme, fqdn, daemon_listen, daemon_token FROM nodes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("Node {} not found", id)))
    }

    async fn get_backup(&self, uuid: Uuid) -> Result<Backup> {
        sqlx::query_as::<_, Backup>(
            r#"
            SELECT uuid, server_id, name, disk, ignored_files, is_successful,
                   is_locked, checksum, bytes, completed_at, created_at
            FROM backups
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| backup_not_found(uuid))
    }

    async fn list_backups(&self, server_id: Uuid, pagination: Pagination) -> Result<Page<Backup>> {
        let items = sqlx::query_as::<_, Backup>(
            r#"
            SELECT uuid, server_id, name, disk, ignored_files, is_successful,
                   is_locked, checksum, bytes, completed_at, created_at
            FROM backups
            WHERE server_id = $1
            ORDER BY created_at DESC
            OFFSET $2
            LIMIT $3
            "#,
        )
        .bind(server_id)
        .bind(pagination.offset())
        .bind(pagination.limit())
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backups WHERE server_id = $1")
            .bind(server_id)
            .fetch_one(&self.db)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Page::new(items, total, pagination))
    }

    async fn non_failed_backups(&self, server_id: Uuid) -> Result<Vec<Backup>> {
        let backups = sqlx::query_as::<_, Backup>(
            r#"
            SELECT uuid, server_id, name, disk, ignored_files, is_successful,
                   is_locked, checksum, bytes, completed_at, created_at
            FROM backups
            WHERE server_id = $1
              AND (is_successful OR completed_at IS NULL)
            ORDER BY created_at ASC
            "#,
        )
        .bind(server_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(backups)
    }

    async fn count_backups_since(&self, server_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM backups WHERE server_id = $1 AND created_at >= $2",
        )
        .bind(server_id)
        .bind(since)
        .fetch_one(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(count)
    }

    async fn compare_and_set_server_status(
        &self,
        server_id: Uuid,
        expected: Option<ServerStatus>,
        next: Option<ServerStatus>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE servers SET status = $3 WHERE id = $1 AND status IS NOT DISTINCT FROM $2",
        )
        .bind(server_id)
        .bind(expected)
        .bind(next)
        .execute(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn audit_history(&self, server_id: Uuid, limit: i64) -> Result<Vec<AuditLog>> {
        let entries = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT id, event, server_id, backup_uuid, actor_id, actor_ip, metadata, created_at
            FROM audit_log
            WHERE server_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(server_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(entries)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }
}

/// Open PostgreSQL transaction
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn lock_backup(&mut self, uuid: Uuid) -> Result<Backup> {
        sqlx::query_as::<_, Backup>(
            r#"
            SELECT uuid, server_id, name, disk, ignored_files, is_successful,
                   is_locked, checksum, bytes, completed_at, created_at
            FROM backups
            WHERE uuid = $1
            FOR UPDATE
            "#,
        )
        .bind(uuid)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| backup_not_found(uuid))
    }

    async fn server_status(&mut self, server_id: Uuid) -> Result<Option<ServerStatus>> {
        sqlx::query_scalar::<_, Option<ServerStatus>>("SELECT status FROM servers WHERE id = $1")
            .bind(server_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(format!("Server {} not found", server_id)))
    }

    async fn insert_backup(&mut self, backup: &NewBackup) -> Result<Backup> {
        let row = sqlx::query_as::<_, Backup>(
            r#"
            INSERT INTO backups (uuid, server_id, name, disk, ignored_files, is_locked)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING uuid, server_id, name, disk, ignored_files, is_successful,
                      is_locked, checksum, bytes, completed_at, created_at
            "#,
        )
        .bind(backup.uuid)
        .bind(backup.server_id)
        .bind(&backup.name)
        .bind(backup.disk.as_str())
        .bind(&backup.ignored_files)
        .bind(backup.is_locked)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row)
    }

    async fn delete_backup(&mut self, uuid: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM backups WHERE uuid = $1")
            .bind(uuid)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(backup_not_found(uuid));
        }
        Ok(())
    }

    async fn set_backup_locked(&mut self, uuid: Uuid, locked: bool) -> Result<Backup> {
        sqlx::query_as::<_, Backup>(
            r#"
            UPDATE backups SET is_locked = $2
            WHERE uuid = $1
            RETURNING uuid, server_id, name, disk, ignored_files, is_successful,
                      is_locked, checksum, bytes, completed_at, created_at
            "#,
        )
        .bind(uuid)
        .bind(locked)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| backup_not_found(uuid))
    }

    async fn complete_backup(
        &mut self,
        uuid: Uuid,
        completion: &BackupCompletion,
    ) -> Result<Backup> {
        sqlx::query_as::<_, Backup>(
            r#"
            UPDATE backups
            SET is_successful = $2, checksum = $3, bytes = $4, completed_at = NOW()
            WHERE uuid = $1
            RETURNING uuid, server_id, name, disk, ignored_files, is_successful,
                      is_locked, checksum, bytes, completed_at, created_at
            "#,
        )
        .bind(uuid)
        .bind(completion.successful)
        .bind(&completion.checksum)
        .bind(completion.bytes)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| backup_not_found(uuid))
    }

    async fn compare_and_set_server_status(
        &mut self,
        server_id: Uuid,
        expected: Option<ServerStatus>,
        next: Option<ServerStatus>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE servers SET status = $3 WHERE id = $1 AND status IS NOT DISTINCT FROM $2",
        )
        .bind(server_id)
        .bind(expected)
        .bind(next)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<AuditLog> {
        let row = sqlx::query_as::<_, AuditLog>(
            r#"
            INSERT INTO audit_log (event, server_id, backup_uuid, actor_id, actor_ip, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, event, server_id, backup_uuid, actor_id, actor_ip, metadata, created_at
            "#,
        )
        .bind(entry.event().as_str())
        .bind(entry.server_id())
        .bind(entry.backup_uuid())
        .bind(entry.actor_id())
        .bind(entry.actor_ip().map(|ip| ip.to_string()))
        .bind(entry.metadata_value())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
