//! Operator CLI for server backups.

use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;

/// Manage server backups from the command line
#[derive(Parser, Debug)]
#[command(name = "backupctl")]
#[command(about = "Create, restore and inspect server backups", long_about = None)]
pub struct BackupCli {
    #[command(subcommand)]
    pub command: BackupCommand,

    /// User the actions are attributed to in the audit log
    #[arg(long, env = "BACKUPCTL_USER", global = true)]
    pub user: Option<Uuid>,

    /// Output format (json, text)
    #[arg(long, default_value = "json", global = true)]
    pub format: String,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Apply pending database migrations
    Migrate,

    /// List a server's backups, newest first
    List {
        /// Server ID
        server: Uuid,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },

    /// Start a backup
    Create {
        /// Server ID
        server: Uuid,

        /// Backup name (defaults to a timestamped name)
        #[arg(long)]
        name: Option<String>,

        /// Pattern to leave out of the archive; repeatable
        #[arg(long = "ignore")]
        ignored_files: Vec<String>,

        /// Protect the backup from deletion and rotation
        #[arg(long)]
        locked: bool,

        /// Delete the oldest unlocked backup if the server is at its limit
        #[arg(long)]
        rotate: bool,
    },

    /// Delete a backup and its artifact
    Delete {
        /// Backup UUID
        backup: Uuid,
    },

    /// Print a time-limited download URL
    DownloadUrl {
        /// Backup UUID
        backup: Uuid,
    },

    /// Restore a backup onto its server
    Restore {
        /// Backup UUID
        backup: Uuid,

        /// Delete existing server files before extracting
        #[arg(long)]
        truncate: bool,
    },

    /// Toggle the lock on a backup
    Lock {
        /// Backup UUID
        backup: Uuid,
    },

    /// Show a server's audit history
    History {
        /// Server ID
        server: Uuid,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

/// Print a result
pub fn output(format: &str, message: &str, json_value: Option<serde_json::Value>) {
    match format {
        "json" => {
            let value = json_value.unwrap_or_else(|| json!({ "message": message }));
            println!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_default()
            );
        }
        _ => println!("{}", message),
    }
}

/// Print an error with its stable code
pub fn error(format: &str, err: &AppError) {
    match format {
        "json" => eprintln!(
            "{}",
            json!({ "code": err.code(), "message": err.to_string() })
        ),
        _ => eprintln!("Error [{}]: {}", err.code(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        BackupCli::command().debug_assert();
    }

    #[test]
    fn test_parse_create() {
        let server = Uuid::new_v4();
        let cli = BackupCli::try_parse_from([
            "backupctl",
            "create",
            &server.to_string(),
            "--name",
            "before-update",
            "--ignore",
            "*.log",
            "--ignore",
            "cache/",
            "--rotate",
        ])
        .unwrap();

        match cli.command {
            BackupCommand::Create {
                server: parsed,
                name,
                ignored_files,
                locked,
                rotate,
            } => {
                assert_eq!(parsed, server);
                assert_eq!(name.as_deref(), Some("before-update"));
                assert_eq!(ignored_files, vec!["*.log", "cache/"]);
                assert!(!locked);
                assert!(rotate);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.format, "json");
    }

    #[test]
    fn test_parse_restore_with_user() {
        let backup = Uuid::new_v4();
        let user = Uuid::new_v4();
        let cli = BackupCli::try_parse_from([
            "backupctl",
            "--user",
            &user.to_string(),
            "restore",
            &backup.to_string(),
            "--truncate",
        ])
        .unwrap();

        assert_eq!(cli.user, Some(user));
        assert!(matches!(
            cli.command,
            BackupCommand::Restore { truncate: true, .. }
        ));
    }

    #[test]
    fn test_invalid_uuid_is_rejected() {
        assert!(BackupCli::try_parse_from(["backupctl", "delete", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_output_text() {
        output("text", "done", None);
        output("json", "done", None);
    }
}
