//! Database models (SQLx).

pub mod audit_log;
pub mod backup;
pub mod pagination;
pub mod principal;
pub mod server;
