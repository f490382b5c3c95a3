//! Audit logging service.
//!
//! Every state-changing backup operation runs inside an [`AuditedTransition`].
//! The transition owns a store transaction; committing it appends exactly one
//! audit entry in that same transaction. Dropping it without committing rolls
//! everything back, so an operation that returns early through `?` leaves no
//! record changes and no audit entry behind.

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::models::audit_log::AuditLog;
use crate::models::principal::Principal;
use crate::services::backup_store::{BackupRecordStore, StoreTransaction};

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    BackupStarted,
    BackupCompleted,
    BackupFailed,
    BackupDeleted,
    BackupDownloaded,
    BackupLocked,
    BackupUnlocked,
    BackupRestoreStarted,
    BackupRestoreCompleted,
    BackupRestoreFailed,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::BackupStarted => "BACKUP_STARTED",
            AuditEvent::BackupCompleted => "BACKUP_COMPLETED",
            AuditEvent::BackupFailed => "BACKUP_FAILED",
            AuditEvent::BackupDeleted => "BACKUP_DELETED",
            AuditEvent::BackupDownloaded => "BACKUP_DOWNLOADED",
            AuditEvent::BackupLocked => "BACKUP_LOCKED",
            AuditEvent::BackupUnlocked => "BACKUP_UNLOCKED",
            AuditEvent::BackupRestoreStarted => "BACKUP_RESTORE_STARTED",
            AuditEvent::BackupRestoreCompleted => "BACKUP_RESTORE_COMPLETED",
            AuditEvent::BackupRestoreFailed => "BACKUP_RESTORE_FAILED",
        }
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit log entry builder
#[derive(Debug, Clone)]
pub struct AuditEntry {
    event: AuditEvent,
    server_id: Uuid,
    backup_uuid: Option<Uuid>,
    actor_id: Option<Uuid>,
    actor_ip: Option<IpAddr>,
    metadata: Map<String, Value>,
}

impl AuditEntry {
    pub fn new(event: AuditEvent, server_id: Uuid) -> Self {
        Self {
            event,
            server_id,
            backup_uuid: None,
            actor_id: None,
            actor_ip: None,
            metadata: Map::new(),
        }
    }

    pub fn actor(mut self, principal: &Principal) -> Self {
        self.actor_id = principal.user_id;
        self.actor_ip = principal.ip;
        self
    }

    pub fn backup(mut self, backup_uuid: Uuid) -> Self {
        self.set_backup(backup_uuid);
        self
    }

    pub fn metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    fn set_backup(&mut self, backup_uuid: Uuid) {
        self.backup_uuid = Some(backup_uuid);
        self.metadata
            .insert("backup_uuid".to_string(), Value::String(backup_uuid.to_string()));
    }

    pub fn event(&self) -> AuditEvent {
        self.event
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn backup_uuid(&self) -> Option<Uuid> {
        self.backup_uuid
    }

    pub fn actor_id(&self) -> Option<Uuid> {
        self.actor_id
    }

    pub fn actor_ip(&self) -> Option<IpAddr> {
        self.actor_ip
    }

    /// Metadata as a JSON object, ready for the JSONB column.
    pub fn metadata_value(&self) -> Value {
        Value::Object(self.metadata.clone())
    }
}

/// An open transaction that will produce one audit entry on commit.
pub struct AuditedTransition {
    tx: Box<dyn StoreTransaction>,
    entry: AuditEntry,
}

impl AuditedTransition {
    /// The underlying store transaction.
    pub fn tx(&mut self) -> &mut dyn StoreTransaction {
        self.tx.as_mut()
    }

    /// Attach the backup this transition concerns. Also recorded in metadata
    /// as `backup_uuid`.
    pub fn backup(&mut self, backup_uuid: Uuid) {
        self.entry.set_backup(backup_uuid);
    }

    /// Change the event once the locked rows show which transition applies.
    pub fn set_event(&mut self, event: AuditEvent) {
        self.entry.event = event;
    }

    pub fn record(&mut self, key: &str, value: impl Into<Value>) {
        self.entry.metadata.insert(key.to_string(), value.into());
    }

    pub fn entry(&self) -> &AuditEntry {
        &self.entry
    }

    /// Append the audit entry and commit. Either both persist or neither does.
    pub async fn commit(self) -> Result<AuditLog> {
        let AuditedTransition { mut tx, entry } = self;
        let log = tx.append_audit(&entry).await?;
        tx.commit().await?;

        tracing::info!(
            event = %entry.event(),
            server_id = %entry.server_id(),
            backup_uuid = ?entry.backup_uuid(),
            actor_id = ?entry.actor_id(),
            "Audit event recorded"
        );

        Ok(log)
    }
}

/// Audit service
#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn BackupRecordStore>,
}

impl AuditService {
    pub fn new(store: Arc<dyn BackupRecordStore>) -> Self {
        Self { store }
    }

    /// Open a transaction that will be attributed to `principal` as `event`.
    pub async fn begin(
        &self,
        event: AuditEvent,
        server_id: Uuid,
        principal: &Principal,
    ) -> Result<AuditedTransition> {
        let tx = self.store.begin().await?;
        Ok(AuditedTransition {
            tx,
            entry: AuditEntry::new(event, server_id).actor(principal),
        })
    }

    /// Most recent audit entries for a server, newest first.
    pub async fn history(&self, server_id: Uuid, limit: i64) -> Result<Vec<AuditLog>> {
        self.store.audit_history(server_id, limit.clamp(1, 500)).await
    }
}
