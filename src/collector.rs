use anyhow::{Context, Result};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, instrument};

use crate::model::Fid;
use crate::store::FidStore;
use crate::warpcast::FollowerSource;

/// Totals from one collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub pages: usize,
    pub fetched: usize,
    pub existing: usize,
    pub added: usize,
}

/// Keep the first occurrence of each FID that is not already in `existing`.
pub fn new_fids<I>(existing: &HashSet<Fid>, fetched: I) -> Vec<Fid>
where
    I: IntoIterator<Item = Fid>,
{
    let mut seen = existing.clone();
    fetched.into_iter().filter(|fid| seen.insert(*fid)).collect()
}

/// Page through every follower of `channel_id` and append the unseen ones to `store`.
///
/// The store is read once up front and written once at the end, so a failed page leaves
/// the list exactly as it was.
#[instrument(skip(source, store))]
pub async fn collect(
    source: &dyn FollowerSource,
    store: &dyn FidStore,
    channel_id: &str,
    page_delay: Duration,
) -> Result<CollectReport> {
    let existing: HashSet<Fid> = store
        .load_all()
        .await
        .context("failed to read existing FIDs")?
        .into_iter()
        .collect();
    info!(existing = existing.len(), "loaded existing FIDs");

    let mut fetched: Vec<Fid> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut page = 0usize;

    loop {
        page += 1;
        info!(page, "fetching followers page");
        let response = source
            .channel_followers(channel_id, cursor.as_deref())
            .await
            .with_context(|| format!("failed to fetch followers page {page}"))?;

        let users = response.users();
        info!(page, count = users.len(), "received followers");
        fetched.extend(users.iter().map(|u| u.fid));
        cursor = response.next_cursor().map(str::to_string);

        if !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
        if cursor.is_none() {
            break;
        }
    }
    info!(total = fetched.len(), pages = page, "finished paging followers");

    let fetched_count = fetched.len();
    let added = new_fids(&existing, fetched);
    info!(new = added.len(), "computed new FIDs");

    if !added.is_empty() {
        store
            .append(&added)
            .await
            .context("failed to append new FIDs")?;
        info!(added = added.len(), "appended new FIDs");
    }

    Ok(CollectReport {
        pages: page,
        fetched: fetched_count,
        existing: existing.len(),
        added: added.len(),
    })
}
