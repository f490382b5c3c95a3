//! Business logic services.

pub mod agent_client;
pub mod audit_service;
pub mod backup_service;
pub mod backup_status_service;
pub mod backup_store;
pub mod delete_backup_service;
pub mod download_link_service;
pub mod initiate_backup_service;
pub mod restore_backup_service;

#[cfg(test)]
pub(crate) mod testing;
