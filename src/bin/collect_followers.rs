use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warpcast_outreach::collector;
use warpcast_outreach::config;
use warpcast_outreach::store::FileStore;
use warpcast_outreach::warpcast::WarpcastClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Append every new follower of a Warpcast channel to the FID list"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Channel to collect; overrides CHANNEL_ID and the config file
    #[arg(long)]
    channel: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?;
    if let Some(channel) = args.channel {
        cfg.warpcast.channel_id = channel;
        config::validate(&cfg)?;
    }
    cfg.ensure_dirs()?;

    let client = WarpcastClient::from_config(&cfg)?;
    let store = FileStore::from_config(&cfg);
    let channel_id = cfg.warpcast.channel_id.clone();

    info!(channel = %channel_id, list = %store.list_path().display(), "collecting channel followers");
    match collector::collect(&client, &store, &channel_id, cfg.pacing.page_delay()).await {
        Ok(report) => info!(
            channel = %channel_id,
            pages = report.pages,
            fetched = report.fetched,
            existing = report.existing,
            added = report.added,
            "collection finished"
        ),
        Err(err) => error!(channel = %channel_id, err = ?err, "collection aborted; FID list untouched"),
    }

    Ok(())
}
