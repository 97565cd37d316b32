//! Cooldown-gated feed resync
//!
//! User-initiated feed refreshes share the upstream feed-fetch capability
//! with initial connection, so they are rate limited per connection: a
//! resync inside the cooldown window is rejected outright, with the exact
//! remaining wait, before any network traffic. Completed fetch attempts
//! stamp `last_resync_at` whether they succeeded or not, so a failing feed
//! cannot be hammered in a hot loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::credentials::CredentialManager;
use crate::db::Store;
use crate::error::ResyncError;
use crate::retry::{self, CallError, RetryPolicy};
use crate::types::{Credential, Episode, Provider};

pub const DEFAULT_COOLDOWN_SECS: i64 = 300;

/// One item discovered in the upstream feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedItem {
    /// Stable external identifier (episode guid); the dedupe key.
    pub external_id: String,
    pub title: String,
    pub published_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResyncReport {
    pub episode_count_total: i64,
    pub new_episode_count: usize,
    pub last_sync_at: i64,
}

/// Fetches the current item list for a feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_items(
        &self,
        credential: &Credential,
        feed_external_id: &str,
    ) -> Result<Vec<FeedItem>, CallError>;
}

/// Episode listing via the feed host's JSON API.
pub struct HostedFeedFetcher {
    http: reqwest::Client,
    api_base: String,
}

impl HostedFeedFetcher {
    pub fn new(api_base: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EpisodeListResponse {
    episodes: Vec<FeedItem>,
}

#[async_trait]
impl FeedFetcher for HostedFeedFetcher {
    async fn fetch_items(
        &self,
        credential: &Credential,
        feed_external_id: &str,
    ) -> Result<Vec<FeedItem>, CallError> {
        let url = format!("{}/v1/feeds/{}/episodes", self.api_base, feed_external_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(CallError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let listing: EpisodeListResponse =
            response.json().await.map_err(CallError::from_reqwest)?;
        Ok(listing.episodes)
    }
}

pub struct ResyncGuard {
    store: Store,
    credentials: Arc<CredentialManager>,
    fetcher: Arc<dyn FeedFetcher>,
    policy: RetryPolicy,
    cooldown_secs: i64,
}

impl ResyncGuard {
    pub fn new(
        store: Store,
        credentials: Arc<CredentialManager>,
        fetcher: Arc<dyn FeedFetcher>,
        policy: RetryPolicy,
        cooldown_secs: i64,
    ) -> Self {
        Self {
            store,
            credentials,
            fetcher,
            policy,
            cooldown_secs,
        }
    }

    /// Refresh one feed connection, inserting episodes not seen before.
    pub async fn resync(&self, connection_id: &str, now: i64) -> Result<ResyncReport, ResyncError> {
        let connection = self
            .store
            .get_feed_connection(connection_id)
            .await?
            .ok_or_else(|| ResyncError::UnknownConnection(connection_id.to_string()))?;

        if let Some(last) = connection.last_resync_at {
            let elapsed = now - last;
            if elapsed < self.cooldown_secs {
                return Err(ResyncError::Cooldown {
                    retry_after_ms: (self.cooldown_secs - elapsed) * 1000,
                });
            }
        }

        let credential = self
            .credentials
            .get_valid_credential(&connection.user_id, Provider::FeedHost)
            .await?;

        let fetched = retry::execute(
            || self.fetcher.fetch_items(&credential, &connection.feed_external_id),
            &self.policy,
            retry::default_retryable,
        )
        .await;

        // The attempt consumed upstream budget either way; stamp the
        // cooldown before looking at the result.
        self.store.touch_feed_resync(&connection.id, now).await?;

        let items = fetched.map_err(|e| {
            let exhausted = e.is_exhausted();
            let inner = e.into_inner();
            if exhausted {
                ResyncError::Fetch(format!("retries exhausted: {}", inner))
            } else {
                ResyncError::Fetch(inner.to_string())
            }
        })?;

        let mut new_episode_count = 0;
        for item in items {
            let episode = Episode::new(
                connection.id.clone(),
                item.external_id,
                item.title,
                item.published_at,
            );
            if self.store.insert_episode_if_unseen(&episode).await? {
                new_episode_count += 1;
            }
        }

        let episode_count_total = self.store.count_episodes(&connection.id).await?;
        info!(
            connection_id = %connection.id,
            new = new_episode_count,
            total = episode_count_total,
            "feed resync complete"
        );

        Ok(ResyncReport {
            episode_count_total,
            new_episode_count,
            last_sync_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CredentialStatus, FeedConnection};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct ScriptedFetcher {
        calls: AtomicUsize,
        items: Vec<FeedItem>,
        fail: bool,
    }

    impl ScriptedFetcher {
        fn with_items(items: Vec<FeedItem>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                items,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                items: Vec::new(),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl FeedFetcher for ScriptedFetcher {
        async fn fetch_items(
            &self,
            _credential: &Credential,
            _feed_external_id: &str,
        ) -> Result<Vec<FeedItem>, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CallError::Status {
                    status: 404,
                    body: "feed not found".to_string(),
                })
            } else {
                Ok(self.items.clone())
            }
        }
    }

    fn feed_item(id: &str) -> FeedItem {
        FeedItem {
            external_id: id.to_string(),
            title: format!("Episode {}", id),
            published_at: Some(1_000),
        }
    }

    async fn setup(
        fetcher: Arc<ScriptedFetcher>,
    ) -> (TempDir, Store, ResyncGuard, FeedConnection) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = Store::new(&db_path.to_string_lossy()).await.unwrap();

        store
            .upsert_credential(&Credential {
                user_id: "u1".to_string(),
                provider: Provider::FeedHost,
                access_token: "token".to_string(),
                refresh_token: None,
                expires_at: None,
                provider_account_id: "host-acct".to_string(),
                account_name: None,
                status: CredentialStatus::Connected,
                last_sync_at: None,
            })
            .await
            .unwrap();

        let connection = FeedConnection::new("u1".to_string(), "feed-1".to_string());
        store.create_feed_connection(&connection).await.unwrap();

        let credentials = Arc::new(CredentialManager::new(
            store.clone(),
            RetryPolicy::default(),
        ));
        let guard = ResyncGuard::new(
            store.clone(),
            credentials,
            fetcher,
            RetryPolicy {
                base_delay: Duration::from_millis(1),
                max_retries: 2,
                max_jitter: Duration::ZERO,
            },
            DEFAULT_COOLDOWN_SECS,
        );
        (temp_dir, store, guard, connection)
    }

    #[tokio::test]
    async fn test_first_resync_inserts_all_items() {
        let fetcher = Arc::new(ScriptedFetcher::with_items(vec![
            feed_item("g1"),
            feed_item("g2"),
            feed_item("g3"),
        ]));
        let (_temp, _store, guard, connection) = setup(fetcher).await;

        let report = guard.resync(&connection.id, 1_000_000).await.unwrap();
        assert_eq!(report.new_episode_count, 3);
        assert_eq!(report.episode_count_total, 3);
        assert_eq!(report.last_sync_at, 1_000_000);
    }

    #[tokio::test]
    async fn test_second_call_within_cooldown_makes_no_fetch() {
        let fetcher = Arc::new(ScriptedFetcher::with_items(vec![feed_item("g1")]));
        let (_temp, _store, guard, connection) = setup(fetcher.clone()).await;

        guard.resync(&connection.id, 1_000_000).await.unwrap();
        let result = guard.resync(&connection.id, 1_000_060).await;

        match result {
            Err(ResyncError::Cooldown { retry_after_ms }) => {
                assert_eq!(retry_after_ms, (DEFAULT_COOLDOWN_SECS - 60) * 1000);
                assert!(retry_after_ms <= DEFAULT_COOLDOWN_SECS * 1000);
            }
            other => panic!("expected cooldown rejection, got {:?}", other.err()),
        }
        assert_eq!(
            fetcher.calls.load(Ordering::SeqCst),
            1,
            "the feed fetch ran exactly once"
        );
    }

    #[tokio::test]
    async fn test_resync_after_cooldown_dedupes_by_external_id() {
        let fetcher = Arc::new(ScriptedFetcher::with_items(vec![
            feed_item("g1"),
            feed_item("g2"),
        ]));
        let (_temp, _store, guard, connection) = setup(fetcher).await;

        guard.resync(&connection.id, 1_000_000).await.unwrap();

        // Past the window: same feed, one new item would be "g3"
        let report = guard
            .resync(&connection.id, 1_000_000 + DEFAULT_COOLDOWN_SECS)
            .await
            .unwrap();
        assert_eq!(report.new_episode_count, 0, "known guids are not re-inserted");
        assert_eq!(report.episode_count_total, 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_still_stamps_cooldown() {
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let (_temp, store, guard, connection) = setup(fetcher.clone()).await;

        let result = guard.resync(&connection.id, 1_000_000).await;
        assert!(matches!(result, Err(ResyncError::Fetch(_))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1, "404 is permanent");

        let stored = store
            .get_feed_connection(&connection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.last_resync_at,
            Some(1_000_000),
            "failure completion still starts the cooldown"
        );

        // And an immediate retry is rejected without a fetch
        let result = guard.resync(&connection.id, 1_000_001).await;
        assert!(matches!(result, Err(ResyncError::Cooldown { .. })));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let fetcher = Arc::new(ScriptedFetcher::with_items(vec![]));
        let (_temp, _store, guard, _connection) = setup(fetcher).await;

        let result = guard.resync("no-such-connection", 1_000_000).await;
        assert!(matches!(result, Err(ResyncError::UnknownConnection(_))));
    }

    #[tokio::test]
    async fn test_disconnected_feed_host_surfaces_credential_error() {
        let fetcher = Arc::new(ScriptedFetcher::with_items(vec![feed_item("g1")]));
        let (_temp, store, guard, connection) = setup(fetcher.clone()).await;

        store
            .set_credential_status("u1", Provider::FeedHost, CredentialStatus::Disconnected)
            .await
            .unwrap();

        let result = guard.resync(&connection.id, 1_000_000).await;
        assert!(matches!(result, Err(ResyncError::Credential(_))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0, "no fetch without a credential");
    }
}
