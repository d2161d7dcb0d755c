use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use warpcast_outreach::model::Fid;
use warpcast_outreach::sender::{self, RunOutcome, RunReport, SendPolicy};
use warpcast_outreach::store::{FidStore, FileStore, StoreError};
use warpcast_outreach::warpcast::{ApiError, DirectCastSender, SendOutcome};

#[derive(Debug, Clone, Copy)]
enum Reply {
    Ok,
    RateLimited,
    Rejected,
}

#[derive(Debug, Clone)]
struct SendCall {
    fid: Fid,
    message: String,
    idempotency_key: String,
}

#[derive(Clone, Default)]
struct RecordingSender {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    calls: Arc<Mutex<Vec<SendCall>>>,
}

impl RecordingSender {
    fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<SendCall> {
        self.calls.lock().await.clone()
    }

    async fn sent_to(&self) -> Vec<Fid> {
        self.calls().await.into_iter().map(|c| c.fid).collect()
    }
}

#[async_trait]
impl DirectCastSender for RecordingSender {
    async fn send_direct_cast(
        &self,
        recipient: Fid,
        message: &str,
        idempotency_key: &str,
    ) -> SendOutcome {
        self.calls.lock().await.push(SendCall {
            fid: recipient,
            message: message.to_string(),
            idempotency_key: idempotency_key.to_string(),
        });
        let reply = self.replies.lock().await.pop_front().unwrap_or(Reply::Ok);
        match reply {
            Reply::Ok => SendOutcome::Delivered,
            Reply::RateLimited => SendOutcome::from(Err::<(), _>(ApiError::from_response(
                StatusCode::TOO_MANY_REQUESTS,
                r#"{"errors":[{"message":"Too many requests"}]}"#,
            ))),
            Reply::Rejected => SendOutcome::from(Err::<(), _>(ApiError::from_response(
                StatusCode::BAD_REQUEST,
                r#"{"errors":[{"message":"Recipient has direct casts disabled"}]}"#,
            ))),
        }
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn fids(raw: &[u64]) -> Vec<Fid> {
    raw.iter().copied().map(Fid).collect()
}

fn policy(quota: u32) -> SendPolicy {
    SendPolicy {
        daily_quota: quota,
        message: "gm".into(),
        send_delay: Duration::ZERO,
        rate_limit_delay: Duration::ZERO,
    }
}

async fn seeded_store(dir: &std::path::Path, list: &[u64], count: u32) -> FileStore {
    let store = FileStore::new(dir, "list.txt");
    store.append(&fids(list)).await.unwrap();
    std::fs::write(store.counter_path(today()), count.to_string()).unwrap();
    store
}

fn completed(outcome: RunOutcome) -> RunReport {
    match outcome {
        RunOutcome::Completed(report) => report,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

#[tokio::test]
async fn batch_is_capped_by_remaining_quota() {
    let td = tempfile::tempdir().unwrap();
    let store = seeded_store(td.path(), &[1, 2, 3, 4, 5], 8).await;
    let api = RecordingSender::default();

    let report = completed(sender::run(&api, &store, &policy(10), today()).await.unwrap());

    assert_eq!(api.sent_to().await, fids(&[1, 2]));
    assert_eq!(report.sent, 2);
    assert_eq!(report.daily_total, 10);
    assert!(report.quota_reached);
    assert_eq!(report.remaining, 3);
    assert_eq!(store.load_all().await.unwrap(), fids(&[3, 4, 5]));
    assert_eq!(store.get_counter(today()).await.unwrap(), 10);
}

#[tokio::test]
async fn success_removes_fid_and_bumps_counter_once() {
    let td = tempfile::tempdir().unwrap();
    let store = seeded_store(td.path(), &[7, 8], 0).await;
    let api = RecordingSender::with_replies(vec![Reply::Ok, Reply::Rejected]);

    let report = completed(sender::run(&api, &store, &policy(100), today()).await.unwrap());

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);
    assert!(!report.quota_reached);
    assert_eq!(store.get_counter(today()).await.unwrap(), 1);
    assert!(store.load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn rate_limited_fid_is_requeued_without_counting() {
    let td = tempfile::tempdir().unwrap();
    let store = seeded_store(td.path(), &[1, 2, 3], 0).await;
    let api = RecordingSender::with_replies(vec![Reply::RateLimited, Reply::Ok, Reply::Ok]);

    let report = completed(sender::run(&api, &store, &policy(100), today()).await.unwrap());

    // The re-queued FID is not retried within the same run.
    assert_eq!(api.sent_to().await, fids(&[1, 2, 3]));
    assert_eq!(report.requeued, 1);
    assert_eq!(report.sent, 2);
    assert_eq!(store.load_all().await.unwrap(), fids(&[1]));
    assert_eq!(store.get_counter(today()).await.unwrap(), 2);
}

#[tokio::test]
async fn requeued_fid_moves_to_back_of_list() {
    let td = tempfile::tempdir().unwrap();
    let store = seeded_store(td.path(), &[1, 2, 3], 8).await;
    let api = RecordingSender::with_replies(vec![Reply::RateLimited, Reply::Ok]);

    let report = completed(sender::run(&api, &store, &policy(10), today()).await.unwrap());

    assert_eq!(api.sent_to().await, fids(&[1, 2]));
    assert_eq!(report.requeued, 1);
    assert!(!report.quota_reached);
    assert_eq!(store.load_all().await.unwrap(), fids(&[3, 1]));
    assert_eq!(store.get_counter(today()).await.unwrap(), 9);
}

#[tokio::test]
async fn permanent_failure_drops_fid_without_counting() {
    let td = tempfile::tempdir().unwrap();
    let store = seeded_store(td.path(), &[4, 5], 3).await;
    let api = RecordingSender::with_replies(vec![Reply::Rejected, Reply::Ok]);

    let report = completed(sender::run(&api, &store, &policy(100), today()).await.unwrap());

    assert_eq!(report.failed, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(store.get_counter(today()).await.unwrap(), 4);
}

#[tokio::test]
async fn exhausted_quota_sends_nothing() {
    let td = tempfile::tempdir().unwrap();
    let store = seeded_store(td.path(), &[1, 2], 10).await;
    let api = RecordingSender::default();

    let outcome = sender::run(&api, &store, &policy(10), today()).await.unwrap();

    assert_eq!(outcome, RunOutcome::QuotaExhausted { daily_total: 10 });
    assert!(api.calls().await.is_empty());
    assert_eq!(store.load_all().await.unwrap(), fids(&[1, 2]));
}

#[tokio::test]
async fn rerun_after_quota_reached_is_a_no_op() {
    let td = tempfile::tempdir().unwrap();
    let store = seeded_store(td.path(), &[1, 2, 3], 0).await;
    let api = RecordingSender::default();

    let first = completed(sender::run(&api, &store, &policy(2), today()).await.unwrap());
    assert!(first.quota_reached);

    let second = sender::run(&api, &store, &policy(2), today()).await.unwrap();
    assert_eq!(second, RunOutcome::QuotaExhausted { daily_total: 2 });
    assert_eq!(api.calls().await.len(), 2);
    assert_eq!(store.load_all().await.unwrap(), fids(&[3]));
}

#[tokio::test]
async fn empty_list_is_reported() {
    let td = tempfile::tempdir().unwrap();
    let store = FileStore::new(td.path(), "list.txt");
    let api = RecordingSender::default();

    let outcome = sender::run(&api, &store, &policy(10), today()).await.unwrap();
    assert_eq!(outcome, RunOutcome::EmptyList);
    assert!(api.calls().await.is_empty());
}

#[tokio::test]
async fn each_attempt_gets_a_fresh_idempotency_key() {
    let td = tempfile::tempdir().unwrap();
    let store = seeded_store(td.path(), &[1, 2, 3], 0).await;
    let api = RecordingSender::default();

    sender::run(&api, &store, &policy(10), today()).await.unwrap();

    let calls = api.calls().await;
    let keys: HashSet<&str> = calls.iter().map(|c| c.idempotency_key.as_str()).collect();
    assert_eq!(keys.len(), 3);
    assert!(calls.iter().all(|c| c.message == "gm"));
}

/// Wraps a [`FileStore`] but refuses to rewrite the list.
struct ReadOnlyList {
    inner: FileStore,
}

#[async_trait]
impl FidStore for ReadOnlyList {
    async fn load_all(&self) -> Result<Vec<Fid>, StoreError> {
        self.inner.load_all().await
    }

    async fn append(&self, _fids: &[Fid]) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: self.inner.list_path().to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    async fn remove_one(&self, _fid: Fid) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: self.inner.list_path().to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    async fn get_counter(&self, day: NaiveDate) -> Result<u32, StoreError> {
        self.inner.get_counter(day).await
    }

    async fn increment_counter(&self, day: NaiveDate) -> Result<u32, StoreError> {
        self.inner.increment_counter(day).await
    }
}

#[tokio::test]
async fn list_write_failures_do_not_stop_the_run() {
    let td = tempfile::tempdir().unwrap();
    let inner = seeded_store(td.path(), &[1, 2, 3], 0).await;
    let store = ReadOnlyList { inner };
    let api = RecordingSender::with_replies(vec![Reply::Ok, Reply::RateLimited, Reply::Rejected]);

    let report = completed(sender::run(&api, &store, &policy(10), today()).await.unwrap());

    assert_eq!(api.sent_to().await, fids(&[1, 2, 3]));
    assert_eq!(report.sent, 1);
    assert_eq!(report.requeued, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 3);
    assert_eq!(store.get_counter(today()).await.unwrap(), 1);
}

/// Wraps a [`FileStore`] whose list cannot be rewritten but can still be appended to.
struct StuckRemoval {
    inner: FileStore,
}

#[async_trait]
impl FidStore for StuckRemoval {
    async fn load_all(&self) -> Result<Vec<Fid>, StoreError> {
        self.inner.load_all().await
    }

    async fn append(&self, fids: &[Fid]) -> Result<(), StoreError> {
        self.inner.append(fids).await
    }

    async fn remove_one(&self, _fid: Fid) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: self.inner.list_path().to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
        })
    }

    async fn get_counter(&self, day: NaiveDate) -> Result<u32, StoreError> {
        self.inner.get_counter(day).await
    }

    async fn increment_counter(&self, day: NaiveDate) -> Result<u32, StoreError> {
        self.inner.increment_counter(day).await
    }
}

#[tokio::test]
async fn failed_removal_does_not_duplicate_requeued_fid() {
    let td = tempfile::tempdir().unwrap();
    let inner = seeded_store(td.path(), &[1, 2], 0).await;
    let store = StuckRemoval { inner };
    let api = RecordingSender::with_replies(vec![Reply::RateLimited, Reply::Rejected]);

    let report = completed(sender::run(&api, &store, &policy(10), today()).await.unwrap());

    assert_eq!(report.requeued, 1);
    assert_eq!(store.load_all().await.unwrap(), fids(&[1, 2]));
}

#[tokio::test]
async fn repeated_fid_is_sent_once_per_run() {
    let td = tempfile::tempdir().unwrap();
    let store = FileStore::new(td.path(), "list.txt");
    std::fs::write(store.list_path(), "1\n1\n2\n").unwrap();
    let api = RecordingSender::default();

    let report = completed(sender::run(&api, &store, &policy(10), today()).await.unwrap());

    assert_eq!(api.sent_to().await, fids(&[1, 2]));
    assert_eq!(report.sent, 2);
    assert_eq!(store.get_counter(today()).await.unwrap(), 2);
    assert!(store.load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn repeats_do_not_use_up_the_batch() {
    let td = tempfile::tempdir().unwrap();
    let store = FileStore::new(td.path(), "list.txt");
    std::fs::write(store.list_path(), "1\n1\n2\n3\n").unwrap();
    std::fs::write(store.counter_path(today()), "8").unwrap();
    let api = RecordingSender::default();

    let report = completed(sender::run(&api, &store, &policy(10), today()).await.unwrap());

    assert_eq!(api.sent_to().await, fids(&[1, 2]));
    assert!(report.quota_reached);
    assert_eq!(store.load_all().await.unwrap(), fids(&[3]));
}

/// In-memory list and counters; keeps the paused-clock tests free of file I/O.
#[derive(Default)]
struct MemoryStore {
    list: Mutex<Vec<Fid>>,
    count: Mutex<u32>,
}

impl MemoryStore {
    fn with_fids(raw: &[u64]) -> Self {
        Self {
            list: Mutex::new(fids(raw)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl FidStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<Fid>, StoreError> {
        Ok(self.list.lock().await.clone())
    }

    async fn append(&self, new: &[Fid]) -> Result<(), StoreError> {
        self.list.lock().await.extend_from_slice(new);
        Ok(())
    }

    async fn remove_one(&self, fid: Fid) -> Result<(), StoreError> {
        self.list.lock().await.retain(|f| *f != fid);
        Ok(())
    }

    async fn get_counter(&self, _day: NaiveDate) -> Result<u32, StoreError> {
        Ok(*self.count.lock().await)
    }

    async fn increment_counter(&self, _day: NaiveDate) -> Result<u32, StoreError> {
        let mut count = self.count.lock().await;
        *count += 1;
        Ok(*count)
    }
}

fn paced_policy(quota: u32) -> SendPolicy {
    SendPolicy {
        daily_quota: quota,
        message: "gm".into(),
        send_delay: Duration::from_secs(2),
        rate_limit_delay: Duration::from_secs(30),
    }
}

#[tokio::test(start_paused = true)]
async fn pauses_follow_each_outcome() {
    let store = MemoryStore::with_fids(&[1, 2, 3]);
    let api = RecordingSender::with_replies(vec![Reply::Ok, Reply::RateLimited, Reply::Rejected]);

    let started = tokio::time::Instant::now();
    completed(sender::run(&api, &store, &paced_policy(100), today()).await.unwrap());

    // 2s after the delivery, 30s after the rate limit, nothing after the rejection.
    assert_eq!(started.elapsed(), Duration::from_secs(32));
}

#[tokio::test(start_paused = true)]
async fn no_pause_once_quota_is_reached() {
    let store = MemoryStore::with_fids(&[1, 2, 3]);
    let api = RecordingSender::default();

    let started = tokio::time::Instant::now();
    let report = completed(sender::run(&api, &store, &paced_policy(2), today()).await.unwrap());

    assert!(report.quota_reached);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn permanent_failures_do_not_pause() {
    let store = MemoryStore::with_fids(&[1, 2]);
    let api = RecordingSender::with_replies(vec![Reply::Rejected, Reply::Rejected]);

    let started = tokio::time::Instant::now();
    completed(sender::run(&api, &store, &paced_policy(100), today()).await.unwrap());

    assert_eq!(started.elapsed(), Duration::ZERO);
}
