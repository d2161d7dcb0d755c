//! Quota-bounded direct-cast delivery.
//!
//! Each run takes a snapshot of the list capped at the day's remaining quota and walks it
//! once. Every FID ends in one of three places: delivered (removed, counter bumped),
//! rejected (removed) or rate limited (moved to the back of the list for a later run).
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::Pacing;
use crate::model::Fid;
use crate::store::FidStore;
use crate::warpcast::{DirectCastSender, SendOutcome};

pub const DAILY_LIMIT: u32 = 5_000;

pub const DEFAULT_MESSAGE: &str = "Hey! I'm launching a new onchain game, it's speculative, \
controversial, and volatile. Check it out and give us a follow on X if you're intrigued. \
We'll be giving out WL spots soon. https://x.com/DeathRowdotfun";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPolicy {
    pub daily_quota: u32,
    pub message: String,
    pub send_delay: Duration,
    pub rate_limit_delay: Duration,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self::from_pacing(&Pacing::default())
    }
}

impl SendPolicy {
    pub fn from_pacing(pacing: &Pacing) -> Self {
        Self {
            daily_quota: DAILY_LIMIT,
            message: DEFAULT_MESSAGE.to_string(),
            send_delay: pacing.send_delay(),
            rate_limit_delay: pacing.rate_limit_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sent: u32,
    pub failed: u32,
    pub requeued: u32,
    pub daily_total: u32,
    pub remaining: usize,
    pub quota_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The quota for `today` was already used up; nothing was sent.
    QuotaExhausted { daily_total: u32 },
    /// No FIDs were waiting.
    EmptyList,
    Completed(RunReport),
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Remove `fid`, logging instead of failing the run. Returns whether the list was rewritten.
async fn drop_fid(store: &dyn FidStore, fid: Fid) -> bool {
    match store.remove_one(fid).await {
        Ok(()) => true,
        Err(err) => {
            warn!(%fid, ?err, "failed to remove FID from list");
            false
        }
    }
}

/// Move `fid` to the back of the list. If the removal failed the FID is still listed
/// where it was, and appending would duplicate it.
async fn requeue_fid(store: &dyn FidStore, fid: Fid) {
    if !drop_fid(store, fid).await {
        return;
    }
    if let Err(err) = store.append(&[fid]).await {
        warn!(%fid, ?err, "failed to re-queue FID");
    }
}

/// First `limit` distinct FIDs in list order.
fn take_batch(fids: &[Fid], limit: usize) -> Vec<Fid> {
    let mut seen = HashSet::new();
    fids.iter()
        .copied()
        .filter(|fid| seen.insert(*fid))
        .take(limit)
        .collect()
}

#[instrument(skip_all, fields(today = %today))]
pub async fn run(
    api: &dyn DirectCastSender,
    store: &dyn FidStore,
    policy: &SendPolicy,
    today: NaiveDate,
) -> Result<RunOutcome> {
    let quota = policy.daily_quota;
    let mut daily_count = store
        .get_counter(today)
        .await
        .context("failed to read daily message count")?;
    info!(daily_count, quota, "daily message count so far");

    if daily_count >= quota {
        warn!(quota, "daily limit already reached; try again tomorrow");
        return Ok(RunOutcome::QuotaExhausted {
            daily_total: daily_count,
        });
    }

    let fids = store.load_all().await.context("failed to read FID list")?;
    if fids.is_empty() {
        return Ok(RunOutcome::EmptyList);
    }

    let remaining_today = (quota - daily_count) as usize;
    let batch = take_batch(&fids, remaining_today);
    info!(
        pending = fids.len(),
        remaining_today,
        batch = batch.len(),
        "processing batch"
    );

    let mut report = RunReport::default();

    for fid in batch {
        let idempotency_key = Uuid::new_v4().to_string();
        info!(%fid, "sending direct cast");

        match api
            .send_direct_cast(fid, &policy.message, &idempotency_key)
            .await
        {
            SendOutcome::Delivered => {
                info!(%fid, "direct cast sent");
                drop_fid(store, fid).await;
                report.sent += 1;
                daily_count += 1;
                match store.increment_counter(today).await {
                    Ok(persisted) if persisted != daily_count => {
                        warn!(persisted, daily_count, "daily counter drifted from run count");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(?err, "failed to update daily message count"),
                }

                if daily_count >= quota {
                    warn!(quota, "daily limit reached; stopping");
                    report.quota_reached = true;
                    break;
                }
                pause(policy.send_delay).await;
            }
            SendOutcome::Transient(err) => {
                warn!(%fid, %err, delay = ?policy.rate_limit_delay, "rate limited; re-queueing FID");
                requeue_fid(store, fid).await;
                report.requeued += 1;
                pause(policy.rate_limit_delay).await;
            }
            SendOutcome::Permanent(err) => {
                error!(%fid, %err, "failed to send direct cast; dropping FID");
                drop_fid(store, fid).await;
                report.failed += 1;
            }
        }
    }

    report.daily_total = daily_count;
    report.quota_reached = report.quota_reached || daily_count >= quota;
    report.remaining = match store.load_all().await {
        Ok(left) => left.len(),
        Err(err) => {
            warn!(?err, "failed to re-read FID list");
            fids.len().saturating_sub((report.sent + report.failed) as usize)
        }
    };

    info!(
        sent = report.sent,
        failed = report.failed,
        requeued = report.requeued,
        daily_total = report.daily_total,
        quota,
        remaining = report.remaining,
        "run summary"
    );
    if report.quota_reached {
        info!("daily limit reached; run again tomorrow");
    }

    Ok(RunOutcome::Completed(report))
}
