//! Publisher adapters for external platforms
//!
//! Each adapter implements the [`Publisher`] contract: validate content
//! against platform constraints before any network call, perform the
//! platform HTTP call through the retry executor with a resolved
//! credential, and map platform rejections onto the publish error
//! taxonomy. The scheduler dispatches through [`PublisherRegistry`];
//! adding a provider means registering an adapter, not editing the worker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PublishError;
use crate::retry::{CallError, RetryError};
use crate::types::{Credential, Provider, PublishReceipt};

pub mod linkedin;
pub mod messaging;

// Mock publisher is available for all builds to support integration tests
pub mod mock;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Which provider this adapter serves.
    fn provider(&self) -> Provider;

    /// Human-readable platform name for logs and error messages.
    fn name(&self) -> &'static str;

    /// Hard content-length ceiling, if the platform has one.
    fn character_limit(&self) -> Option<usize>;

    /// Validate content before any network call. Violations are permanent:
    /// they are never retried and never consume backoff budget.
    fn validate_content(&self, content: &str) -> Result<(), PublishError> {
        if content.trim().is_empty() {
            return Err(PublishError::ContentInvalid(
                "content cannot be empty".to_string(),
            ));
        }
        if let Some(limit) = self.character_limit() {
            let count = content.chars().count();
            if count > limit {
                return Err(PublishError::ContentInvalid(format!(
                    "content exceeds the {} character {} limit (current: {})",
                    limit,
                    self.name(),
                    count
                )));
            }
        }
        Ok(())
    }

    /// Deliver `content` on behalf of the credential's owner.
    async fn publish(
        &self,
        credential: &Credential,
        content: &str,
    ) -> Result<PublishReceipt, PublishError>;
}

/// Provider-to-adapter dispatch table.
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Provider, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.insert(publisher.provider(), publisher);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&provider).cloned()
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.publishers.keys().copied().collect()
    }
}

/// Map a retried call failure onto the publish taxonomy.
///
/// 401/403 means the platform rejected the token out-of-band of our own
/// expiry tracking; 422 is the platform's content validation; everything
/// else permanent is a generic upstream rejection.
pub(crate) fn map_call_error(platform: &str, err: RetryError<CallError>) -> PublishError {
    match err {
        RetryError::Exhausted(e) => {
            PublishError::RetriesExhausted(format!("{}: {}", platform, e))
        }
        RetryError::Permanent(CallError::Status { status, body }) if status == 401 || status == 403 => {
            PublishError::ReauthRequired(format!(
                "{} rejected the access token ({}): {}",
                platform, status, body
            ))
        }
        RetryError::Permanent(CallError::Status { status, body }) if status == 422 => {
            PublishError::ContentInvalid(format!("{} rejected the content: {}", platform, body))
        }
        RetryError::Permanent(e) => PublishError::Upstream(format!("{}: {}", platform, e)),
    }
}
