//! pinvault-backup
//!
//! Replicates files to the configured backup providers and restores
//! content from public gateways.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pinvault::backup::BackupReplicator;
use pinvault::config::PinvaultConfig;
use pinvault::item::{UploadItem, UploadOptions};
use pinvault::telemetry;
use serde::Serialize;
use tracing::{info, warn};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    " ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(
    name = "pinvault-backup",
    version = VERSION,
    about = "Replicate files to backup IPFS providers and restore them"
)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, env = "PINVAULT_LOG_JSON")]
    json: bool,

    /// Write OpenMetrics text to this file when the command finishes
    #[arg(long, value_name = "PATH")]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload one file to every configured backup provider
    Upload {
        file: PathBuf,
        /// Display name recorded with the upload
        #[arg(long)]
        name: Option<String>,
    },
    /// Restore a CID from the first gateway that serves it
    Restore { cid: String, output: PathBuf },
    /// Upload many files, a bounded number at a time
    Batch {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
        /// Files in flight at once (defaults to MAX_CONCURRENT_UPLOADS)
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize result")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.json);
    info!("Starting pinvault-backup v{}", VERSION);

    let result = run(cli.command).await;

    if let Some(path) = &cli.metrics_out {
        write_metrics(path).await?;
    }
    telemetry::shutdown_telemetry();
    result
}

async fn run(command: Command) -> anyhow::Result<()> {
    let config = PinvaultConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    let replicator = BackupReplicator::new(&config).context("failed to build HTTP client")?;

    match command {
        Command::Upload { file, name } => {
            if !file.is_file() {
                bail!("file not found: {}", file.display());
            }
            let options = UploadOptions {
                name,
                ..UploadOptions::default()
            };
            let report = replicator.backup_upload(&file, &options).await;
            print_json(&report)?;
            if report.summary.total > 0 && !report.is_backed_up() {
                bail!("{} could not be stored on any backup provider", report.file_name);
            }
        }
        Command::Restore { cid, output } => {
            let restored = replicator
                .restore_from_backup(&cid, &output)
                .await
                .with_context(|| format!("restore of {cid} failed"))?;
            print_json(&restored)?;
        }
        Command::Batch { files, concurrency } => {
            if let Some(missing) = files.iter().find(|f| !f.is_file()) {
                bail!("file not found: {}", missing.display());
            }
            let items = files
                .into_iter()
                .map(|path| {
                    let name = UploadOptions::default().display_name(&path);
                    UploadItem::new(path, name)
                })
                .collect();
            let concurrency = concurrency.unwrap_or(config.max_concurrent_uploads);
            let batch = replicator.batch_backup_upload(items, concurrency).await;
            print_json(&batch)?;
            if batch.summary.failed_files > 0 {
                warn!(
                    "{}/{} files were not stored on any backup provider",
                    batch.summary.failed_files, batch.summary.total_files
                );
            }
        }
    }
    Ok(())
}

#[cfg(feature = "metrics")]
async fn write_metrics(path: &Path) -> anyhow::Result<()> {
    tokio::fs::write(path, pinvault::metrics::render())
        .await
        .with_context(|| format!("failed to write metrics to {}", path.display()))
}

#[cfg(not(feature = "metrics"))]
async fn write_metrics(path: &Path) -> anyhow::Result<()> {
    warn!(
        "Built without the metrics feature; not writing {}",
        path.display()
    );
    Ok(())
}
