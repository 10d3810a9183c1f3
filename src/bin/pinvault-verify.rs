//! pinvault-verify
//!
//! Checks a CID on the configured public gateways.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use pinvault::config::PinvaultConfig;
use pinvault::telemetry;
use pinvault::verify::{IntegrityVerifier, MonitorOptions, VerifyOptions};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "pinvault-verify",
    version,
    about = "Verify CID availability across IPFS gateways"
)]
struct Cli {
    cid: String,

    /// Wait for every gateway instead of stopping at the quorum
    #[arg(long)]
    all: bool,

    /// Sample reachability for this many seconds
    #[arg(long, value_name = "SECONDS")]
    monitor: Option<u64>,

    /// Seconds between monitoring checks
    #[arg(long, default_value_t = 10, requires = "monitor")]
    interval: u64,

    /// Full report: verification, content hash and pin status
    #[arg(long, conflicts_with = "monitor")]
    info: bool,

    /// Also write the JSON result to this file
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "PINVAULT_LOG_JSON")]
    json: bool,
}

async fn emit<T: Serialize>(value: &T, output: Option<&PathBuf>) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{rendered}");
    if let Some(path) = output {
        tokio::fs::write(path, &rendered)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Result written to {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.json);

    let result = run(&cli).await;
    telemetry::shutdown_telemetry();
    result
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = PinvaultConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    let verifier = IntegrityVerifier::new(&config).context("failed to build HTTP client")?;

    if let Some(seconds) = cli.monitor {
        let session = verifier
            .monitor_cid(
                &cli.cid,
                MonitorOptions {
                    duration: Duration::from_secs(seconds),
                    interval: Duration::from_secs(cli.interval),
                },
            )
            .await?;
        return emit(&session, cli.output.as_ref()).await;
    }

    if cli.info {
        let info = verifier.get_cid_info(&cli.cid).await;
        emit(&info, cli.output.as_ref()).await?;
        if !info.verification.valid {
            bail!("{} is not available on enough gateways", cli.cid);
        }
        return Ok(());
    }

    let result = verifier
        .verify_cid(
            &cli.cid,
            VerifyOptions {
                verify_all: cli.all,
                required_gateways: config.gateways.required,
            },
        )
        .await;
    emit(&result, cli.output.as_ref()).await?;
    if !result.valid {
        bail!(
            "{} reachable on {}/{} gateways, {} required",
            cli.cid,
            result.accessible,
            result.total,
            result.quorum()
        );
    }
    Ok(())
}
