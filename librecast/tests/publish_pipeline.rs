//! End-to-end pipeline tests: enqueue -> credential lifecycle -> publish
//! -> terminal state, over a real SQLite store with scripted platform and
//! refresh behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use librecast::credentials::{
    CredentialManager, RefreshClient, RefreshError, TokenSet,
};
use librecast::db::Store;
use librecast::platforms::mock::MockPublisher;
use librecast::platforms::PublisherRegistry;
use librecast::retry::RetryPolicy;
use librecast::scheduler::{PublishWorker, WorkerSettings};
use librecast::types::{
    Credential, CredentialStatus, FailureKind, PostOutcome, PostStatus, Provider, ScheduledPost,
};

struct ScriptedRefresher {
    calls: AtomicUsize,
    reject: bool,
}

impl ScriptedRefresher {
    fn succeeding() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reject: false,
        }
    }

    fn rejecting() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reject: true,
        }
    }
}

#[async_trait]
impl RefreshClient for ScriptedRefresher {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            Err(RefreshError::Rejected("invalid_grant".to_string()))
        } else {
            Ok(TokenSet {
                access_token: "fresh-token".to_string(),
                refresh_token: None,
                expires_at: Some(chrono::Utc::now().timestamp() + 3600),
            })
        }
    }
}

async fn setup_store() -> (TempDir, Store) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("pipeline.db");
    let store = Store::new(&db_path.to_string_lossy()).await.unwrap();
    (temp_dir, store)
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_retries: 2,
        max_jitter: Duration::ZERO,
    }
}

fn credential_expiring_in(user_id: &str, secs: i64) -> Credential {
    Credential {
        user_id: user_id.to_string(),
        provider: Provider::SocialPost,
        access_token: "stale-token".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        expires_at: Some(chrono::Utc::now().timestamp() + secs),
        provider_account_id: "acct-1".to_string(),
        account_name: Some("Ada".to_string()),
        status: CredentialStatus::Connected,
        last_sync_at: None,
    }
}

fn build_worker(
    store: &Store,
    refresher: Arc<ScriptedRefresher>,
    publisher: Arc<MockPublisher>,
) -> PublishWorker {
    let mut manager = CredentialManager::new(store.clone(), fast_policy());
    manager.register_refresher(Provider::SocialPost, refresher);

    let mut registry = PublisherRegistry::new();
    registry.register(publisher);

    PublishWorker::new(
        store.clone(),
        Arc::new(manager),
        Arc::new(registry),
        WorkerSettings::default(),
    )
}

// A post due now whose credential expires inside the safety margin: the
// worker must refresh before publishing.
#[tokio::test]
async fn refreshes_near_expiry_credential_before_publishing() {
    let (_temp, store) = setup_store().await;
    let now = chrono::Utc::now().timestamp();

    store
        .upsert_credential(&credential_expiring_in("u1", 30))
        .await
        .unwrap();
    let post = ScheduledPost::new("u1".into(), Provider::SocialPost, "due now".into(), now - 1);
    store.create_post(&post).await.unwrap();

    let refresher = Arc::new(ScriptedRefresher::succeeding());
    let publisher = Arc::new(MockPublisher::succeeding(Provider::SocialPost));
    let worker = build_worker(&store, refresher.clone(), publisher.clone());

    let summary = worker.run_once(now).await.unwrap();
    assert_eq!(summary.published, 1);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(publisher.call_count(), 1);

    // The refreshed token was persisted
    let stored = store
        .get_credential("u1", Provider::SocialPost)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "fresh-token");
}

// Same setup, but the refresh token is revoked: the post lands in Failed
// with ReauthRequired and the credential flips to disconnected.
#[tokio::test]
async fn permanent_refresh_failure_fails_post_and_disconnects() {
    let (_temp, store) = setup_store().await;
    let now = chrono::Utc::now().timestamp();

    store
        .upsert_credential(&credential_expiring_in("u1", 30))
        .await
        .unwrap();
    let post = ScheduledPost::new("u1".into(), Provider::SocialPost, "due now".into(), now - 1);
    store.create_post(&post).await.unwrap();

    let refresher = Arc::new(ScriptedRefresher::rejecting());
    let publisher = Arc::new(MockPublisher::succeeding(Provider::SocialPost));
    let worker = build_worker(&store, refresher, publisher.clone());

    let summary = worker.run_once(now).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(publisher.call_count(), 0, "no publish with a dead credential");

    let stored_post = store.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored_post.status, PostStatus::Failed);
    match stored_post.outcome {
        Some(PostOutcome::Failed { kind, .. }) => assert_eq!(kind, FailureKind::ReauthRequired),
        other => panic!("expected reauth failure, got {:?}", other),
    }

    let stored_credential = store
        .get_credential("u1", Provider::SocialPost)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_credential.status, CredentialStatus::Disconnected);
}

// A batch where one post always fails validation: the rest still reach a
// terminal state in the same invocation, and repeat invocations do not
// resurrect anything.
#[tokio::test]
async fn batch_survives_poison_post_and_converges() {
    let (_temp, store) = setup_store().await;
    let now = chrono::Utc::now().timestamp();

    store
        .upsert_credential(&credential_expiring_in("u1", 7200))
        .await
        .unwrap();

    for i in 0..4i64 {
        let content = if i == 0 {
            "this content is far longer than the platform allows".to_string()
        } else {
            format!("ok {}", i)
        };
        let post = ScheduledPost::new("u1".into(), Provider::SocialPost, content, now - 10 + i);
        store.create_post(&post).await.unwrap();
    }

    let refresher = Arc::new(ScriptedRefresher::succeeding());
    let publisher = Arc::new(MockPublisher::with_limit(Provider::SocialPost, 10));
    let worker = build_worker(&store, refresher, publisher.clone());

    let summary = worker.run_once(now).await.unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.published, 3);
    assert_eq!(summary.failed, 1);

    // Second invocation finds nothing to do
    let summary = worker.run_once(now + 1).await.unwrap();
    assert_eq!(summary.processed, 0);
}

// Two invocations racing over the same due set: each post is published at
// most once.
#[tokio::test]
async fn concurrent_invocations_never_double_publish() {
    let (_temp, store) = setup_store().await;
    let now = chrono::Utc::now().timestamp();

    store
        .upsert_credential(&credential_expiring_in("u1", 7200))
        .await
        .unwrap();
    for i in 0..12i64 {
        let post = ScheduledPost::new(
            "u1".into(),
            Provider::SocialPost,
            format!("post {}", i),
            now - 60 + i,
        );
        store.create_post(&post).await.unwrap();
    }

    let publisher = Arc::new(MockPublisher::succeeding(Provider::SocialPost));
    let worker_a = build_worker(
        &store,
        Arc::new(ScriptedRefresher::succeeding()),
        publisher.clone(),
    );
    let worker_b = build_worker(
        &store,
        Arc::new(ScriptedRefresher::succeeding()),
        publisher.clone(),
    );

    let (a, b) = tokio::join!(worker_a.run_once(now), worker_b.run_once(now));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.published + b.published, 12);
    assert_eq!(publisher.call_count(), 12, "one adapter call per post");

    let remaining = store.due_posts(now, 25, 600).await.unwrap();
    assert!(remaining.is_empty());
}

// Deleting a post is only possible while it is still queued and only by
// its owner (ownership is checked at the HTTP layer; the store enforces
// the state machine side).
#[tokio::test]
async fn published_posts_are_retained_and_undeletable() {
    let (_temp, store) = setup_store().await;
    let now = chrono::Utc::now().timestamp();

    store
        .upsert_credential(&credential_expiring_in("u1", 7200))
        .await
        .unwrap();
    let post = ScheduledPost::new("u1".into(), Provider::SocialPost, "keep me".into(), now - 1);
    store.create_post(&post).await.unwrap();

    let worker = build_worker(
        &store,
        Arc::new(ScriptedRefresher::succeeding()),
        Arc::new(MockPublisher::succeeding(Provider::SocialPost)),
    );
    worker.run_once(now).await.unwrap();

    assert!(!store.delete_post(&post.id).await.unwrap());
    let stored = store.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Published);
}
