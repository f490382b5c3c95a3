//! In-memory collaborators for service tests.
//!
//! `MemoryStore` stages transaction writes and applies them on commit, so a
//! dropped or failed transaction leaves no trace. The server-status
//! compare-and-swap outside a transaction is applied immediately under the
//! state mutex, matching an autocommit `UPDATE`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::audit_log::AuditLog;
use crate::models::backup::{Backup, BackupCompletion, BackupDisk, NewBackup};
use crate::models::pagination::{Page, Pagination};
use crate::models::principal::Principal;
use crate::models::server::{Node, Server, ServerStatus};
use crate::services::agent_client::{AgentClient, RestoreRequest};
use crate::services::audit_service::{AuditEntry, AuditService};
use crate::services::backup_service::{BackupService, BackupSettings};
use crate::services::backup_status_service::BackupStatusService;
use crate::services::backup_store::{BackupRecordStore, StoreTransaction};
use crate::services::delete_backup_service::DeleteBackupService;
use crate::services::download_link_service::DownloadLinkService;
use crate::services::initiate_backup_service::InitiateBackupService;
use crate::services::restore_backup_service::RestoreBackupService;
use crate::storage::{ObjectStorage, PresignedUrl};

#[derive(Default)]
struct State {
    nodes: HashMap<Uuid, Node>,
    servers: HashMap<Uuid, Server>,
    /// Insertion order
    backups: Vec<Backup>,
    audit: Vec<AuditLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_commits: Arc<AtomicBool>,
    /// Status committed by a concurrent writer just before the next
    /// transaction opens
    status_on_begin: Arc<Mutex<Option<(Uuid, Option<ServerStatus>)>>>,
    begun: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: Node) {
        self.state.lock().unwrap().nodes.insert(node.id, node);
    }

    pub fn remove_node(&self, id: Uuid) {
        self.state.lock().unwrap().nodes.remove(&id);
    }

    /// Number of transactions opened so far.
    pub fn transactions_begun(&self) -> i64 {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn add_server(&self, server: Server) {
        self.state.lock().unwrap().servers.insert(server.id, server);
    }

    pub fn insert(&self, backup: Backup) {
        self.state.lock().unwrap().backups.push(backup);
    }

    pub fn backup(&self, uuid: Uuid) -> Option<Backup> {
        self.state
            .lock()
            .unwrap()
            .backups
            .iter()
            .find(|b| b.uuid == uuid)
            .cloned()
    }

    pub fn backup_count(&self) -> usize {
        self.state.lock().unwrap().backups.len()
    }

    pub fn update_backup(&self, uuid: Uuid, f: impl FnOnce(&mut Backup)) {
        let mut state = self.state.lock().unwrap();
        if let Some(backup) = state.backups.iter_mut().find(|b| b.uuid == uuid) {
            f(backup);
        }
    }

    pub fn remove_backup(&self, uuid: Uuid) {
        self.state.lock().unwrap().backups.retain(|b| b.uuid != uuid);
    }

    pub fn server_status(&self, server_id: Uuid) -> Option<ServerStatus> {
        self.state
            .lock()
            .unwrap()
            .servers
            .get(&server_id)
            .and_then(|s| s.status)
    }

    pub fn set_server_status(&self, server_id: Uuid, status: Option<ServerStatus>) {
        if let Some(server) = self.state.lock().unwrap().servers.get_mut(&server_id) {
            server.status = status;
        }
    }

    /// Audit entries in the order they were committed.
    pub fn audit_entries(&self) -> Vec<AuditLog> {
        self.state.lock().unwrap().audit.clone()
    }

    pub fn status_on_next_begin(&self, server_id: Uuid, status: Option<ServerStatus>) {
        *self.status_on_begin.lock().unwrap() = Some((server_id, status));
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

fn not_found(what: &str, id: Uuid) -> AppError {
    AppError::NotFound(format!("{} {} not found", what, id))
}

#[async_trait]
impl BackupRecordStore for MemoryStore {
    async fn get_server(&self, id: Uuid) -> Result<Server> {
        self.state
            .lock()
            .unwrap()
            .servers
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Server", id))
    }

    async fn get_node(&self, id: Uuid) -> Result<Node> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Node", id))
    }

    async fn get_backup(&self, uuid: Uuid) -> Result<Backup> {
        self.backup(uuid).ok_or_else(|| not_found("Backup", uuid))
    }

    async fn list_backups(&self, server_id: Uuid, pagination: Pagination) -> Result<Page<Backup>> {
        let state = self.state.lock().unwrap();
        let mut backups: Vec<Backup> = state
            .backups
            .iter()
            .filter(|b| b.server_id == server_id)
            .cloned()
            .collect();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = backups.len() as i64;
        let items = backups
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();
        Ok(Page::new(items, total, pagination))
    }

    async fn non_failed_backups(&self, server_id: Uuid) -> Result<Vec<Backup>> {
        let state = self.state.lock().unwrap();
        let mut backups: Vec<Backup> = state
            .backups
            .iter()
            .filter(|b| b.server_id == server_id && b.is_non_failed())
            .cloned()
            .collect();
        backups.sort_by_key(|b| b.created_at);
        Ok(backups)
    }

    async fn count_backups_since(&self, server_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .backups
            .iter()
            .filter(|b| b.server_id == server_id && b.created_at >= since)
            .count() as i64)
    }

    async fn compare_and_set_server_status(
        &self,
        server_id: Uuid,
        expected: Option<ServerStatus>,
        next: Option<ServerStatus>,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.servers.get_mut(&server_id) {
            Some(server) if server.status == expected => {
                server.status = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn audit_history(&self, server_id: Uuid, limit: i64) -> Result<Vec<AuditLog>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| e.server_id == server_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        let pending = self.status_on_begin.lock().unwrap().take();
        if let Some((server_id, status)) = pending {
            self.set_server_status(server_id, status);
        }
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            fail_commit: self.fail_commits.clone(),
            ops: Vec::new(),
        }))
    }
}

enum Op {
    PutBackup(Backup),
    DeleteBackup(Uuid),
    ServerStatus(Uuid, Option<ServerStatus>),
    Audit(AuditLog),
}

struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    fail_commit: Arc<AtomicBool>,
    ops: Vec<Op>,
}

impl MemoryTransaction {
    /// The backup as seen from inside this transaction.
    fn view_backup(&self, uuid: Uuid) -> Option<Backup> {
        for op in self.ops.iter().rev() {
            match op {
                Op::PutBackup(b) if b.uuid == uuid => return Some(b.clone()),
                Op::DeleteBackup(id) if *id == uuid => return None,
                _ => {}
            }
        }
        self.state
            .lock()
            .unwrap()
            .backups
            .iter()
            .find(|b| b.uuid == uuid)
            .cloned()
    }

    fn view_status(&self, server_id: Uuid) -> Option<Option<ServerStatus>> {
        for op in self.ops.iter().rev() {
            if let Op::ServerStatus(id, status) = op {
                if *id == server_id {
                    return Some(*status);
                }
            }
        }
        self.state
            .lock()
            .unwrap()
            .servers
            .get(&server_id)
            .map(|s| s.status)
    }

    fn update(&mut self, uuid: Uuid, f: impl FnOnce(&mut Backup)) -> Result<Backup> {
        let mut backup = self
            .view_backup(uuid)
            .ok_or_else(|| not_found("Backup", uuid))?;
        f(&mut backup);
        self.ops.push(Op::PutBackup(backup.clone()));
        Ok(backup)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_backup(&mut self, uuid: Uuid) -> Result<Backup> {
        self.view_backup(uuid)
            .ok_or_else(|| not_found("Backup", uuid))
    }

    async fn server_status(&mut self, server_id: Uuid) -> Result<Option<ServerStatus>> {
        self.view_status(server_id)
            .ok_or_else(|| not_found("Server", server_id))
    }

    async fn insert_backup(&mut self, backup: &NewBackup) -> Result<Backup> {
        let row = Backup {
            uuid: backup.uuid,
            server_id: backup.server_id,
            name: backup.name.clone(),
            disk_name: backup.disk.as_str().to_string(),
            ignored_files: backup.ignored_files.clone(),
            is_successful: false,
            is_locked: backup.is_locked,
            checksum: None,
            bytes: 0,
            completed_at: None,
            created_at: Utc::now(),
        };
        self.ops.push(Op::PutBackup(row.clone()));
        Ok(row)
    }

    async fn delete_backup(&mut self, uuid: Uuid) -> Result<()> {
        if self.view_backup(uuid).is_none() {
            return Err(not_found("Backup", uuid));
        }
        self.ops.push(Op::DeleteBackup(uuid));
        Ok(())
    }

    async fn set_backup_locked(&mut self, uuid: Uuid, locked: bool) -> Result<Backup> {
        self.update(uuid, |b| b.is_locked = locked)
    }

    async fn complete_backup(
        &mut self,
        uuid: Uuid,
        completion: &BackupCompletion,
    ) -> Result<Backup> {
        self.update(uuid, |b| {
            b.is_successful = completion.successful;
            b.checksum = completion.checksum.clone();
            b.bytes = completion.bytes;
            b.completed_at = Some(Utc::now());
        })
    }

    async fn compare_and_set_server_status(
        &mut self,
        server_id: Uuid,
        expected: Option<ServerStatus>,
        next: Option<ServerStatus>,
    ) -> Result<bool> {
        match self.view_status(server_id) {
            Some(current) if current == expected => {
                self.ops.push(Op::ServerStatus(server_id, next));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<AuditLog> {
        let log = AuditLog {
            id: Uuid::new_v4(),
            event: entry.event().as_str().to_string(),
            server_id: entry.server_id(),
            backup_uuid: entry.backup_uuid(),
            actor_id: entry.actor_id(),
            actor_ip: entry.actor_ip().map(|ip| ip.to_string()),
            metadata: entry.metadata_value(),
            created_at: Utc::now(),
        };
        self.ops.push(Op::Audit(log.clone()));
        Ok(log)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(AppError::Database("injected commit failure".to_string()));
        }

        let this = *self;
        let mut state = this.state.lock().unwrap();
        for op in this.ops {
            match op {
                Op::PutBackup(backup) => {
                    match state.backups.iter_mut().find(|b| b.uuid == backup.uuid) {
                        Some(existing) => *existing = backup,
                        None => state.backups.push(backup),
                    }
                }
                Op::DeleteBackup(uuid) => state.backups.retain(|b| b.uuid != uuid),
                Op::ServerStatus(id, status) => {
                    if let Some(server) = state.servers.get_mut(&id) {
                        server.status = status;
                    }
                }
                Op::Audit(log) => state.audit.push(log),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCall {
    StartBackup {
        server_id: Uuid,
        backup_uuid: Uuid,
        disk: BackupDisk,
        ignored_files: Vec<String>,
    },
    DeleteBackup {
        server_id: Uuid,
        backup_uuid: Uuid,
    },
    Restore {
        server_id: Uuid,
        backup_uuid: Uuid,
        download_url: Option<String>,
        truncate: bool,
        /// Committed server status at the moment the agent was called
        observed_status: Option<ServerStatus>,
    },
    IssueDownloadUrl {
        server_id: Uuid,
        backup_uuid: Uuid,
    },
}

/// Agent that records every call and can be told to fail.
pub struct RecordingAgent {
    store: Arc<MemoryStore>,
    calls: Mutex<Vec<AgentCall>>,
    fail_start: AtomicBool,
    fail_delete: AtomicBool,
    fail_restore: AtomicBool,
}

impl RecordingAgent {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            calls: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_restore: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_restore(&self, fail: bool) {
        self.fail_restore.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: AgentCall, fail: &AtomicBool) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if fail.load(Ordering::SeqCst) {
            return Err(AppError::RemoteUnavailable("node agent unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentClient for RecordingAgent {
    async fn start_backup(
        &self,
        _node: &Node,
        server_id: Uuid,
        backup_uuid: Uuid,
        disk: BackupDisk,
        ignored_files: &[String],
    ) -> Result<()> {
        self.record(
            AgentCall::StartBackup {
                server_id,
                backup_uuid,
                disk,
                ignored_files: ignored_files.to_vec(),
            },
            &self.fail_start,
        )
    }

    async fn delete_backup(&self, _node: &Node, server_id: Uuid, backup_uuid: Uuid) -> Result<()> {
        self.record(
            AgentCall::DeleteBackup {
                server_id,
                backup_uuid,
            },
            &self.fail_delete,
        )
    }

    async fn restore(&self, _node: &Node, request: &RestoreRequest) -> Result<()> {
        let observed_status = self.store.server_status(request.server_id);
        self.record(
            AgentCall::Restore {
                server_id: request.server_id,
                backup_uuid: request.backup_uuid,
                download_url: request.download_url.clone(),
                truncate: request.truncate,
                observed_status,
            },
            &self.fail_restore,
        )
    }

    async fn issue_download_url(
        &self,
        node: &Node,
        server_id: Uuid,
        backup_uuid: Uuid,
        _principal: &Principal,
        ttl: Duration,
    ) -> Result<PresignedUrl> {
        self.record(
            AgentCall::IssueDownloadUrl {
                server_id,
                backup_uuid,
            },
            &AtomicBool::new(false),
        )?;
        Ok(PresignedUrl {
            url: format!("{}/download/backup?token=test-{}", node.agent_url(), backup_uuid),
            expires_in: ttl,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    Delete(String),
    Presign(String),
}

#[derive(Default)]
pub struct RecordingStorage {
    calls: Mutex<Vec<StorageCall>>,
    fail_delete: AtomicBool,
}

impl RecordingStorage {
    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
    async fn delete(&self, key: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(StorageCall::Delete(key.to_string()));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AppError::RemoteUnavailable("storage unreachable".to_string()));
        }
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<PresignedUrl> {
        self.calls
            .lock()
            .unwrap()
            .push(StorageCall::Presign(key.to_string()));
        Ok(PresignedUrl {
            url: format!(
                "https://storage.test/backups/{}?X-Amz-Expires={}",
                key,
                expires_in.as_secs()
            ),
            expires_in,
        })
    }
}

/// One idle server on one node, wired to recording collaborators.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub agent: Arc<RecordingAgent>,
    pub storage: Arc<RecordingStorage>,
    pub node: Node,
    pub server: Server,
    pub settings: BackupSettings,
    seq: AtomicI64,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let node = Node {
            id: Uuid::new_v4(),
            name: "node-1".to_string(),
            scheme: "https".to_string(),
            fqdn: "node1.example.com".to_string(),
            daemon_listen: 8080,
            daemon_token: "daemon-token".to_string(),
        };
        store.add_node(node.clone());

        let fixture = Self {
            agent: Arc::new(RecordingAgent::new(store.clone())),
            storage: Arc::new(RecordingStorage::default()),
            server: Self::server_on(&node),
            store,
            node,
            settings: BackupSettings::default(),
            seq: AtomicI64::new(0),
        };
        fixture.store.add_server(fixture.server.clone());
        fixture
    }

    fn server_on(node: &Node) -> Server {
        Server {
            id: Uuid::new_v4(),
            node_id: node.id,
            name: "survival".to_string(),
            status: None,
            backup_limit: 10,
            created_at: Utc::now(),
        }
    }

    pub fn with_throttle(mut self, limit: i64, period: Duration) -> Self {
        self.settings.throttle = Some((limit, period));
        self
    }

    /// Another idle server on the same node.
    pub fn add_server(&self) -> Server {
        let server = Self::server_on(&self.node);
        self.store.add_server(server.clone());
        server
    }

    /// A successful (terminal) or in-progress backup on the node.
    pub fn add_backup(&self, terminal: bool) -> Backup {
        self.add_backup_on(BackupDisk::NodeAgent, terminal)
    }

    pub fn add_backup_on(&self, disk: BackupDisk, terminal: bool) -> Backup {
        let mut backup = self.new_backup(disk);
        if terminal {
            backup.is_successful = true;
            backup.completed_at = Some(backup.created_at);
        }
        self.store.insert(backup.clone());
        backup
    }

    pub fn add_failed_backup(&self) -> Backup {
        let mut backup = self.new_backup(BackupDisk::NodeAgent);
        backup.completed_at = Some(backup.created_at);
        self.store.insert(backup.clone());
        backup
    }

    fn new_backup(&self, disk: BackupDisk) -> Backup {
        // Strictly increasing creation times keep ordering deterministic.
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        Backup {
            uuid: Uuid::new_v4(),
            server_id: self.server.id,
            name: format!("backup-{}", n),
            disk_name: disk.as_str().to_string(),
            ignored_files: vec![],
            is_successful: false,
            is_locked: false,
            checksum: None,
            bytes: 0,
            completed_at: None,
            created_at: Utc::now() + chrono::Duration::milliseconds(n),
        }
    }

    fn storage_handle(&self) -> Option<Arc<dyn ObjectStorage>> {
        Some(self.storage.clone() as Arc<dyn ObjectStorage>)
    }

    pub fn audit(&self) -> AuditService {
        AuditService::new(self.store.clone())
    }

    pub fn links(&self) -> DownloadLinkService {
        DownloadLinkService::new(
            self.store.clone(),
            self.agent.clone(),
            self.storage_handle(),
            self.settings.download_ttl,
        )
    }

    pub fn deleter(&self) -> DeleteBackupService {
        DeleteBackupService::new(
            self.store.clone(),
            self.audit(),
            self.agent.clone(),
            self.storage_handle(),
        )
    }

    pub fn initiator(&self) -> InitiateBackupService {
        InitiateBackupService::new(
            self.store.clone(),
            self.audit(),
            self.agent.clone(),
            self.deleter(),
            self.settings.clone(),
        )
    }

    pub fn restorer(&self) -> RestoreBackupService {
        RestoreBackupService::new(
            self.store.clone(),
            self.audit(),
            self.agent.clone(),
            self.links(),
        )
    }

    pub fn status_service(&self) -> BackupStatusService {
        BackupStatusService::new(self.store.clone(), self.audit())
    }

    pub fn service(&self) -> BackupService {
        BackupService::new(
            self.store.clone(),
            self.agent.clone(),
            self.storage_handle(),
            self.settings.clone(),
        )
    }
}
