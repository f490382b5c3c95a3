//! Backup lifecycle control plane.
//!
//! Coordinates server backups held on node agents or in S3-compatible object
//! storage: creation, deletion, download links and restores, each recorded in
//! an audit log in the same transaction as the change it describes.

#[macro_use]
mod macros;

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
