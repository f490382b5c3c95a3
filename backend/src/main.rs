//! `backupctl` - backup control plane CLI

use std::process::ExitCode;

use clap::Parser;

use backup_control_plane::{
    cli::{self, BackupCli},
    config::Config,
    error::Result,
    telemetry,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = BackupCli::parse();
    let format = args.format.clone();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "Command failed");
            cli::backup::error(&format, &e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: BackupCli) -> Result<()> {
    let config = Config::from_env()?;
    let _otel_guard = telemetry::init_tracing(config.otel_endpoint.as_deref(), "backupctl")?;
    tracing::debug!(?config, "Configuration loaded");

    cli::run(args, &config).await
}
