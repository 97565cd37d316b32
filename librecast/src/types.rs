//! Core types for Recast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External platforms a user can connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// Social feed posting (LinkedIn-style share API)
    SocialPost,
    /// SMS/short-message delivery
    Messaging,
    /// Podcast feed host (episode source)
    FeedHost,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SocialPost => "social-post",
            Self::Messaging => "messaging",
            Self::FeedHost => "feed-host",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "social-post" => Some(Self::SocialPost),
            "messaging" => Some(Self::Messaging),
            "feed-host" => Some(Self::FeedHost),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Connected,
    Disconnected,
}

/// One external-provider grant for one user.
///
/// At most one credential exists per (user, provider); the store enforces
/// this with upsert-by-key. A disconnected credential must never be used
/// to attempt delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub provider_account_id: String,
    pub account_name: Option<String>,
    pub status: CredentialStatus,
    pub last_sync_at: Option<i64>,
}

impl Credential {
    /// Whether the access token expires within `margin_secs` of `now`.
    /// A credential without an expiry never needs a refresh.
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + margin_secs,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "published" => Some(Self::Published),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Why a post landed in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotConnected,
    ReauthRequired,
    ContentInvalid,
    RetriesExhausted,
    Upstream,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::ReauthRequired => "reauth_required",
            Self::ContentInvalid => "content_invalid",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Upstream => "upstream",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_connected" => Some(Self::NotConnected),
            "reauth_required" => Some(Self::ReauthRequired),
            "content_invalid" => Some(Self::ContentInvalid),
            "retries_exhausted" => Some(Self::RetriesExhausted),
            "upstream" => Some(Self::Upstream),
            _ => None,
        }
    }
}

/// Terminal result recorded on a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PostOutcome {
    Published {
        platform_post_id: String,
        url: Option<String>,
        published_at: i64,
    },
    Failed {
        kind: FailureKind,
        message: String,
        failed_at: i64,
    },
}

/// What a publisher adapter returns on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub platform_post_id: String,
    pub url: Option<String>,
}

/// One unit of outbound work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
    pub content: String,
    pub scheduled_at: i64,
    pub status: PostStatus,
    pub outcome: Option<PostOutcome>,
    pub created_at: i64,
    /// Set when an invocation claims the post; stale claims are reclaimable.
    pub claimed_at: Option<i64>,
}

impl ScheduledPost {
    pub fn new(user_id: String, provider: Provider, content: String, scheduled_at: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            provider,
            content,
            scheduled_at,
            status: PostStatus::Scheduled,
            outcome: None,
            created_at: chrono::Utc::now().timestamp(),
            claimed_at: None,
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.status == PostStatus::Scheduled && self.scheduled_at <= now
    }
}

/// Per-user podcast feed connection; carries the resync cooldown stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConnection {
    pub id: String,
    pub user_id: String,
    pub feed_external_id: String,
    pub last_resync_at: Option<i64>,
    pub created_at: i64,
}

impl FeedConnection {
    pub fn new(user_id: String, feed_external_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            feed_external_id,
            last_resync_at: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A known feed item, deduplicated by (connection, external id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub connection_id: String,
    pub external_id: String,
    pub title: String,
    pub published_at: Option<i64>,
    pub created_at: i64,
}

impl Episode {
    pub fn new(
        connection_id: String,
        external_id: String,
        title: String,
        published_at: Option<i64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            connection_id,
            external_id,
            title,
            published_at,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}
