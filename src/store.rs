//! Persistence shared by the collector and the sender.
//!
//! The collector and sender only meet through this store: an ordered list of FIDs and a
//! per-day send counter. [`FileStore`] keeps the plain-text layout both tools have always
//! used, one FID per line and one `message_count_YYYY-MM-DD.txt` file per UTC day.
//! Nothing here is locked; running two tools against the same directory at once is unsupported.
use async_trait::async_trait;
use chrono::NaiveDate;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::Fid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
pub trait FidStore: Send + Sync {
    /// All pending FIDs in insertion order.
    async fn load_all(&self) -> Result<Vec<Fid>, StoreError>;

    /// Append FIDs to the end of the list.
    async fn append(&self, fids: &[Fid]) -> Result<(), StoreError>;

    /// Drop every entry equal to `fid`.
    async fn remove_one(&self, fid: Fid) -> Result<(), StoreError>;

    /// Sends recorded for `day`; starts at zero.
    async fn get_counter(&self, day: NaiveDate) -> Result<u32, StoreError>;

    /// Record one more send for `day` and return the new total.
    async fn increment_counter(&self, day: NaiveDate) -> Result<u32, StoreError>;
}

#[derive(Debug, Clone)]
pub struct FileStore {
    list_path: PathBuf,
    counter_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>, list_file: &str) -> Self {
        let counter_dir = data_dir.into();
        Self {
            list_path: counter_dir.join(list_file),
            counter_dir,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.data_dir(), &cfg.app.list_file)
    }

    pub fn list_path(&self) -> &Path {
        &self.list_path
    }

    pub fn counter_path(&self, day: NaiveDate) -> PathBuf {
        self.counter_dir
            .join(format!("message_count_{}.txt", day.format("%Y-%m-%d")))
    }

    async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    async fn write_counter(&self, path: &Path, value: u32) -> Result<(), StoreError> {
        fs::write(path, value.to_string())
            .await
            .map_err(|e| StoreError::io(path, e))
    }
}

fn non_blank_lines(content: &str) -> impl Iterator<Item = &str> {
    content.lines().map(str::trim).filter(|l| !l.is_empty())
}

#[async_trait]
impl FidStore for FileStore {
    async fn load_all(&self) -> Result<Vec<Fid>, StoreError> {
        let Some(content) = Self::read_optional(&self.list_path).await? else {
            return Ok(Vec::new());
        };
        let mut fids = Vec::new();
        for line in non_blank_lines(&content) {
            match line.parse::<Fid>() {
                Ok(fid) => fids.push(fid),
                Err(err) => warn!(line, ?err, "skipping malformed FID entry"),
            }
        }
        Ok(fids)
    }

    async fn append(&self, fids: &[Fid]) -> Result<(), StoreError> {
        if fids.is_empty() {
            return Ok(());
        }
        let path = &self.list_path;
        let needs_newline = Self::read_optional(path)
            .await?
            .is_some_and(|c| !c.is_empty() && !c.ends_with('\n'));

        let mut buf = String::new();
        if needs_newline {
            buf.push('\n');
        }
        for fid in fids {
            buf.push_str(&fid.to_string());
            buf.push('\n');
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| StoreError::io(path, e))?;
        file.flush().await.map_err(|e| StoreError::io(path, e))?;
        debug!(count = fids.len(), path = %path.display(), "appended FIDs");
        Ok(())
    }

    async fn remove_one(&self, fid: Fid) -> Result<(), StoreError> {
        let path = &self.list_path;
        let Some(content) = Self::read_optional(path).await? else {
            return Ok(());
        };
        let target = fid.to_string();
        // Lines that fail to parse are kept verbatim; only exact matches go.
        let kept: Vec<&str> = non_blank_lines(&content)
            .filter(|line| *line != target)
            .collect();
        let mut out = kept.join("\n");
        if !kept.is_empty() {
            out.push('\n');
        }
        fs::write(path, out)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        debug!(%fid, path = %path.display(), "removed FID");
        Ok(())
    }

    async fn get_counter(&self, day: NaiveDate) -> Result<u32, StoreError> {
        let path = self.counter_path(day);
        match Self::read_optional(&path).await? {
            None => {
                self.write_counter(&path, 0).await?;
                Ok(0)
            }
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(count) => Ok(count),
                Err(err) => {
                    warn!(path = %path.display(), ?err, "unreadable daily counter; treating as 0");
                    Ok(0)
                }
            },
        }
    }

    async fn increment_counter(&self, day: NaiveDate) -> Result<u32, StoreError> {
        let next = self.get_counter(day).await?.saturating_add(1);
        self.write_counter(&self.counter_path(day), next).await?;
        Ok(next)
    }
}
