use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warpcast_outreach::config;
use warpcast_outreach::sender::{self, RunOutcome, SendPolicy};
use warpcast_outreach::store::FileStore;
use warpcast_outreach::warpcast::WarpcastClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Send the outreach direct cast to queued FIDs within the daily limit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    if let Err(err) = cfg.require_api_key() {
        error!(%err, "cannot send direct casts");
        return Ok(ExitCode::FAILURE);
    }
    cfg.ensure_dirs()?;

    let client = WarpcastClient::from_config(&cfg)?;
    let store = FileStore::from_config(&cfg);
    let policy = SendPolicy::from_pacing(&cfg.pacing);

    info!(
        started_at = %Utc::now().to_rfc3339(),
        message = %policy.message,
        "direct cast run started"
    );

    let today = Utc::now().date_naive();
    match sender::run(&client, &store, &policy, today).await? {
        RunOutcome::QuotaExhausted { daily_total } => {
            info!(daily_total, quota = policy.daily_quota, "nothing to do until tomorrow");
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::EmptyList => {
            error!(list = %store.list_path().display(), "no FIDs found");
            Ok(ExitCode::FAILURE)
        }
        RunOutcome::Completed(_) => Ok(ExitCode::SUCCESS),
    }
}
