//! HTTP client for the two Warpcast endpoints the tools talk to.
//!
//! `GET v1/channel-followers` is public and cursor paginated. `PUT v2/ext-send-direct-cast`
//! needs a bearer key and an idempotency key per attempt. Failures come back as a typed
//! [`ApiError`]; sends are reduced to a [`SendOutcome`] so callers never inspect error text.
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, ConfigError, DEFAULT_BASE_URL};
use crate::model::{ErrorBody, Fid, FollowersPage, SendDirectCast};

const FOLLOWERS_PATH: &str = "v1/channel-followers";
const SEND_PATH: &str = "v2/ext-send-direct-cast";
const RATE_LIMIT_MARKER: &str = "rate limit";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to Warpcast failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rate limited by Warpcast ({status}): {message}")]
    RateLimited { status: StatusCode, message: String },
    #[error("Warpcast error {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("invalid Warpcast response: {0}")]
    Decode(String),
    #[error("invalid Warpcast endpoint URL: {0}")]
    InvalidUrl(String),
    #[error("no API key configured for an authenticated endpoint")]
    MissingApiKey,
}

impl ApiError {
    /// Build an error from a non-2xx response, parsing the structured error body when possible.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .map(|b| b.messages())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.trim().to_string());

        if status == StatusCode::TOO_MANY_REQUESTS
            || message.to_ascii_lowercase().contains(RATE_LIMIT_MARKER)
        {
            ApiError::RateLimited { status, message }
        } else {
            ApiError::Status { status, message }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

/// Result of a single direct-cast attempt.
#[derive(Debug)]
pub enum SendOutcome {
    Delivered,
    /// Worth retrying on a later run.
    Transient(ApiError),
    Permanent(ApiError),
}

impl From<Result<(), ApiError>> for SendOutcome {
    fn from(res: Result<(), ApiError>) -> Self {
        match res {
            Ok(()) => SendOutcome::Delivered,
            Err(err) if err.is_transient() => SendOutcome::Transient(err),
            Err(err) => SendOutcome::Permanent(err),
        }
    }
}

#[async_trait]
pub trait FollowerSource: Send + Sync {
    async fn channel_followers(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
    ) -> Result<FollowersPage, ApiError>;
}

#[async_trait]
pub trait DirectCastSender: Send + Sync {
    async fn send_direct_cast(
        &self,
        recipient: Fid,
        message: &str,
        idempotency_key: &str,
    ) -> SendOutcome;
}

#[derive(Clone)]
pub struct WarpcastClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl fmt::Debug for WarpcastClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarpcastClient")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl WarpcastClient {
    pub fn new(api_key: Option<String>) -> Self {
        let base_url = Url::parse(DEFAULT_BASE_URL).expect("valid default Warpcast URL");
        Self::with_base_url(base_url, api_key)
    }

    pub fn with_base_url(base_url: Url, api_key: Option<String>) -> Self {
        let http = Client::builder()
            .user_agent(concat!("warpcast-outreach/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self::with_client(http, base_url, api_key)
    }

    pub fn with_client(http: Client, base_url: Url, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let api_key = cfg.require_api_key().ok().map(str::to_string);
        Ok(Self::with_base_url(cfg.base_url()?, api_key))
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{}{path}: {e}", self.base_url)))
    }

    pub fn build_followers_request(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
    ) -> Result<reqwest::Request, ApiError> {
        let mut query = vec![("channelId", channel_id)];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        Ok(self
            .http
            .get(self.endpoint(FOLLOWERS_PATH)?)
            .query(&query)
            .build()?)
    }

    pub fn build_send_request(&self, body: &SendDirectCast) -> Result<reqwest::Request, ApiError> {
        let key = self.api_key.as_deref().ok_or(ApiError::MissingApiKey)?;
        Ok(self
            .http
            .put(self.endpoint(SEND_PATH)?)
            .header("Authorization", format!("Bearer {key}"))
            .header("Content-Type", "application/json")
            .json(body)
            .build()?)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, ApiError> {
        debug!(method = %request.method(), url = %request.url(), "sending warpcast request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::from_response(status, &body));
        }
        Ok(res)
    }

    async fn try_send(&self, body: &SendDirectCast) -> Result<(), ApiError> {
        let request = self.build_send_request(body)?;
        let res = self.execute(request).await?;
        let bytes = res.bytes().await?;
        let ack = decode_ack(&bytes)?;
        debug!(fid = %body.recipient_fid, response = %ack, "direct cast accepted");
        Ok(())
    }
}

/// A 2xx send response must carry JSON; anything else (e.g. a proxy's HTML page) is not
/// proof of delivery.
fn decode_ack(bytes: &[u8]) -> Result<serde_json::Value, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl FollowerSource for WarpcastClient {
    async fn channel_followers(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
    ) -> Result<FollowersPage, ApiError> {
        let request = self.build_followers_request(channel_id, cursor)?;
        let res = self.execute(request).await?;
        res.json::<FollowersPage>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DirectCastSender for WarpcastClient {
    async fn send_direct_cast(
        &self,
        recipient: Fid,
        message: &str,
        idempotency_key: &str,
    ) -> SendOutcome {
        let body = SendDirectCast {
            recipient_fid: recipient,
            message: message.to_string(),
            idempotency_key: idempotency_key.to_string(),
        };
        self.try_send(&body).await.into()
    }
}
