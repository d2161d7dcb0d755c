use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Farcaster identifier of a recipient. Persisted as its decimal string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Fid(pub u64);

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Fid {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Fid)
    }
}

impl From<u64> for Fid {
    fn from(value: u64) -> Self {
        Fid(value)
    }
}

/// One page of `GET v1/channel-followers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowersPage {
    #[serde(default)]
    pub result: Option<FollowersResult>,
    #[serde(default)]
    pub next: Option<NextCursor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowersResult {
    #[serde(default)]
    pub users: Vec<Follower>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Follower {
    pub fid: Fid,
    #[serde(rename = "followedAt", default, skip_serializing_if = "Option::is_none")]
    pub followed_at: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextCursor {
    #[serde(default)]
    pub cursor: Option<String>,
}

impl FollowersPage {
    pub fn users(&self) -> &[Follower] {
        self.result.as_ref().map(|r| r.users.as_slice()).unwrap_or(&[])
    }

    /// The cursor for the following page; empty cursors end pagination too.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next
            .as_ref()
            .and_then(|n| n.cursor.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// Body of `PUT v2/ext-send-direct-cast`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendDirectCast {
    pub recipient_fid: Fid,
    pub message: String,
    pub idempotency_key: String,
}

/// Structured error body returned with non-2xx responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
}

impl ErrorBody {
    pub fn messages(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
