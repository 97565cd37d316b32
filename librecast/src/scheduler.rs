//! Batch publishing worker
//!
//! Driven by an external cron trigger. Each invocation pulls due posts,
//! claims them one by one, resolves the owner's credential, dispatches to
//! the matching publisher, and persists a terminal outcome per post. One
//! post's failure never touches its batch-mates; only losing the store
//! aborts an invocation.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::credentials::CredentialManager;
use crate::db::Store;
use crate::error::{CredentialError, PublishError, StoreError};
use crate::platforms::PublisherRegistry;
use crate::types::{FailureKind, PublishReceipt, ScheduledPost};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Maximum due posts handled per invocation.
    pub batch_size: usize,
    /// Concurrent in-flight posts within one invocation.
    pub concurrency: usize,
    /// Outer deadline for a single post's delivery, credential resolution
    /// included.
    pub post_timeout: Duration,
    /// Claims older than this belong to a dead invocation and may be
    /// re-claimed.
    pub claim_ttl_secs: i64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            concurrency: 5,
            post_timeout: Duration::from_secs(30),
            claim_ttl_secs: 600,
        }
    }
}

/// Aggregate result of one invocation.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub published: usize,
    pub failed: usize,
}

enum Disposition {
    Published,
    Failed,
    /// Claim lost or post already terminal; nothing was attempted.
    Skipped,
}

pub struct PublishWorker {
    store: Store,
    credentials: Arc<CredentialManager>,
    publishers: Arc<PublisherRegistry>,
    settings: WorkerSettings,
}

impl PublishWorker {
    pub fn new(
        store: Store,
        credentials: Arc<CredentialManager>,
        publishers: Arc<PublisherRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            credentials,
            publishers,
            settings,
        }
    }

    /// Process one batch of due posts. Safe to invoke concurrently with a
    /// still-running prior invocation: the claim step makes each post go to
    /// exactly one of them.
    pub async fn run_once(&self, now: i64) -> Result<BatchSummary, StoreError> {
        let due = self
            .store
            .due_posts(now, self.settings.batch_size, self.settings.claim_ttl_secs)
            .await?;

        if due.is_empty() {
            return Ok(BatchSummary::default());
        }

        info!(count = due.len(), "processing due posts");

        let results: Vec<Result<Disposition, StoreError>> =
            stream::iter(due.into_iter().map(|post| self.process_post(post, now)))
                .buffer_unordered(self.settings.concurrency)
                .collect()
                .await;

        let mut summary = BatchSummary::default();
        for result in results {
            match result? {
                Disposition::Published => {
                    summary.processed += 1;
                    summary.published += 1;
                }
                Disposition::Failed => {
                    summary.processed += 1;
                    summary.failed += 1;
                }
                Disposition::Skipped => {}
            }
        }

        info!(
            processed = summary.processed,
            published = summary.published,
            failed = summary.failed,
            "publish batch complete"
        );
        Ok(summary)
    }

    async fn process_post(
        &self,
        post: ScheduledPost,
        now: i64,
    ) -> Result<Disposition, StoreError> {
        if !self
            .store
            .claim_post(&post.id, now, self.settings.claim_ttl_secs)
            .await?
        {
            debug!(post_id = %post.id, "claim lost, skipping");
            return Ok(Disposition::Skipped);
        }

        match self.deliver(&post).await? {
            Ok(receipt) => {
                if self.store.mark_published(&post.id, &receipt, now).await? {
                    info!(
                        post_id = %post.id,
                        provider = %post.provider,
                        platform_post_id = %receipt.platform_post_id,
                        "post published"
                    );
                    Ok(Disposition::Published)
                } else {
                    // Another invocation finished it first; the adapter's
                    // idempotency keys make the duplicate send harmless.
                    debug!(post_id = %post.id, "already terminal, dropping result");
                    Ok(Disposition::Skipped)
                }
            }
            Err((kind, message)) => {
                warn!(
                    post_id = %post.id,
                    provider = %post.provider,
                    kind = kind.as_str(),
                    "post failed: {}",
                    message
                );
                if self
                    .store
                    .mark_failed(&post.id, kind, &message, now)
                    .await?
                {
                    Ok(Disposition::Failed)
                } else {
                    Ok(Disposition::Skipped)
                }
            }
        }
    }

    /// Attempt delivery of one claimed post. The inner Result is the post's
    /// verdict; the outer one is infrastructure failure.
    async fn deliver(
        &self,
        post: &ScheduledPost,
    ) -> Result<Result<PublishReceipt, (FailureKind, String)>, StoreError> {
        let attempt = async {
            let credential = match self
                .credentials
                .get_valid_credential(&post.user_id, post.provider)
                .await
            {
                Ok(credential) => credential,
                Err(CredentialError::Store(e)) => return Err(e),
                Err(e) => return Ok(Err(classify_credential_error(e))),
            };

            let Some(publisher) = self.publishers.get(post.provider) else {
                return Ok(Err((
                    FailureKind::Upstream,
                    format!("no publisher registered for {}", post.provider),
                )));
            };

            match publisher.publish(&credential, &post.content).await {
                Ok(receipt) => Ok(Ok(receipt)),
                Err(e) => Ok(Err(classify_publish_error(e))),
            }
        };

        match tokio::time::timeout(self.settings.post_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Ok(Err((
                FailureKind::RetriesExhausted,
                format!(
                    "delivery timed out after {:?}",
                    self.settings.post_timeout
                ),
            ))),
        }
    }
}

fn classify_credential_error(err: CredentialError) -> (FailureKind, String) {
    match err {
        CredentialError::NotConnected { .. } => (FailureKind::NotConnected, err.to_string()),
        CredentialError::ReauthRequired(_) => (FailureKind::ReauthRequired, err.to_string()),
        CredentialError::TemporarilyUnavailable(_) => {
            (FailureKind::RetriesExhausted, err.to_string())
        }
        CredentialError::Store(e) => (FailureKind::Upstream, e.to_string()),
    }
}

fn classify_publish_error(err: PublishError) -> (FailureKind, String) {
    let message = err.to_string();
    match err {
        PublishError::ContentInvalid(_) => (FailureKind::ContentInvalid, message),
        PublishError::ReauthRequired(_) => (FailureKind::ReauthRequired, message),
        PublishError::RetriesExhausted(_) => (FailureKind::RetriesExhausted, message),
        PublishError::Upstream(_) => (FailureKind::Upstream, message),
    }
}
