//! Command-line interface.

pub mod backup;
pub mod backup_runner;

pub use backup::{BackupCli, BackupCommand};
pub use backup_runner::run;
