//! Configuration loader and validator for the follower collector and direct-cast sender.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.warpcast.com/";
pub const DEFAULT_LIST_FILE: &str = "hugeWalletsList.txt";
pub const DEFAULT_CHANNEL_ID: &str = "blackhole";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("API_KEY not found in environment variables or warpcast.api_key")]
    MissingApiKey,
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub warpcast: Warpcast,
    pub pacing: Pacing,
}

/// Where the shared identifier list and daily counters live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct App {
    pub data_dir: String,
    pub list_file: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            data_dir: ".".into(),
            list_file: DEFAULT_LIST_FILE.into(),
        }
    }
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Warpcast {
    pub base_url: String,
    pub channel_id: String,
    /// Only the sender needs a key; the followers endpoint is public.
    pub api_key: Option<String>,
}

impl Default for Warpcast {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            channel_id: DEFAULT_CHANNEL_ID.into(),
            api_key: None,
        }
    }
}

/// Fixed pauses between remote calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Pacing {
    pub page_delay_ms: u64,
    pub send_delay_ms: u64,
    pub rate_limit_delay_ms: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            page_delay_ms: 500,
            send_delay_ms: 2_000,
            rate_limit_delay_ms: 30_000,
        }
    }
}

impl Pacing {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.data_dir)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.warpcast.base_url)
            .map_err(|_| ConfigError::Invalid("warpcast.base_url must be a valid URL"))
    }

    /// Returns the API key, treating blank values as missing.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.warpcast
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// Apply overrides from a variable lookup. Split out from [`Config::apply_env`] for tests.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHANNEL_ID").filter(|v| !v.trim().is_empty()) {
            self.warpcast.channel_id = v;
        }
        if let Some(v) = lookup("API_KEY").filter(|v| !v.trim().is_empty()) {
            self.warpcast.api_key = Some(v);
        }
        if let Some(v) = lookup("WARPCAST_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.warpcast.base_url = v;
        }
        if let Some(v) = lookup("DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.app.data_dir = v;
        }
    }

    /// Apply overrides from the process environment, falling back to `dotenv` entries.
    pub fn apply_env(&mut self, dotenv: &HashMap<String, String>) {
        self.apply_overrides(|key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()));
    }
}

/// Read `KEY=value` pairs from a `.env` file. A missing file yields no entries; malformed
/// lines are logged and skipped.
pub fn read_dotenv(path: &Path) -> HashMap<String, String> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(err) if err.not_found() => return HashMap::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "ignoring unreadable env file");
            return HashMap::new();
        }
    };
    iter.filter_map(|item| match item {
        Ok(pair) => Some(pair),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "skipping malformed env file entry");
            None
        }
    })
    .collect()
}

/// Load configuration from a YAML file, apply environment overrides and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
/// - A missing file yields the defaults; a present but malformed file is an error.
/// - `.env` in the working directory supplies variables not set in the environment.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_with_env_file(path, Path::new(".env"))
}

pub fn load_with_env_file(path: Option<&Path>, env_file: &Path) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let mut cfg = match fs::read_to_string(path) {
        Ok(content) => serde_yaml::from_str(&content)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(err) => return Err(err.into()),
    };
    cfg.apply_env(&read_dotenv(env_file));
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.list_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.list_file must be non-empty"));
    }
    if cfg.warpcast.channel_id.trim().is_empty() {
        return Err(ConfigError::Invalid("warpcast.channel_id must be non-empty"));
    }
    cfg.base_url()?;
    Ok(())
}

/// Returns a sample YAML configuration with every field spelled out.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  list_file: "hugeWalletsList.txt"

warpcast:
  base_url: "https://api.warpcast.com/"
  channel_id: "blackhole"
  # Prefer the API_KEY environment variable.
  api_key: "YOUR_WARPCAST_API_KEY"

pacing:
  page_delay_ms: 500
  send_delay_ms: 2000
  rate_limit_delay_ms: 30000
"#
}
