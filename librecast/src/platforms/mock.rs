//! Mock publisher for tests
//!
//! Configurable outcomes and call recording, so worker and pipeline tests
//! can script platform behavior without network access or credentials.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PublishError;
use crate::platforms::Publisher;
use crate::types::{Credential, Provider, PublishReceipt};

pub struct MockPublisher {
    provider: Provider,
    character_limit: Option<usize>,
    /// Scripted outcomes consumed in order; when empty, `default_outcome`
    /// applies.
    script: Mutex<VecDeque<Result<PublishReceipt, PublishError>>>,
    default_outcome: Option<PublishError>,
    /// Content of every publish call, in order.
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockPublisher {
    /// A publisher that succeeds with a fresh receipt on every call.
    pub fn succeeding(provider: Provider) -> Self {
        Self {
            provider,
            character_limit: None,
            script: Mutex::new(VecDeque::new()),
            default_outcome: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A publisher that fails every call with the given error.
    pub fn failing_with(provider: Provider, error: PublishError) -> Self {
        Self {
            default_outcome: Some(error),
            ..Self::succeeding(provider)
        }
    }

    /// A publisher with a content-length ceiling.
    pub fn with_limit(provider: Provider, limit: usize) -> Self {
        Self {
            character_limit: Some(limit),
            ..Self::succeeding(provider)
        }
    }

    /// Queue one scripted outcome ahead of the default behavior.
    pub fn push_outcome(&self, outcome: Result<PublishReceipt, PublishError>) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock call lock poisoned").len()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn character_limit(&self) -> Option<usize> {
        self.character_limit
    }

    async fn publish(
        &self,
        _credential: &Credential,
        content: &str,
    ) -> Result<PublishReceipt, PublishError> {
        self.validate_content(content)?;

        self.calls
            .lock()
            .expect("mock call lock poisoned")
            .push(content.to_string());

        if let Some(outcome) = self
            .script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front()
        {
            return outcome;
        }

        if let Some(error) = &self.default_outcome {
            return Err(error.clone());
        }

        Ok(PublishReceipt {
            platform_post_id: format!("mock-{}", Uuid::new_v4()),
            url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialStatus;

    fn test_credential() -> Credential {
        Credential {
            user_id: "u".to_string(),
            provider: Provider::SocialPost,
            access_token: "t".to_string(),
            refresh_token: None,
            expires_at: None,
            provider_account_id: "a".to_string(),
            account_name: None,
            status: CredentialStatus::Connected,
            last_sync_at: None,
        }
    }

    #[tokio::test]
    async fn test_succeeding_mock_records_calls() {
        let publisher = MockPublisher::succeeding(Provider::SocialPost);
        let receipt = publisher
            .publish(&test_credential(), "hello")
            .await
            .unwrap();
        assert!(receipt.platform_post_id.starts_with("mock-"));
        assert_eq!(publisher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcome_takes_precedence() {
        let publisher = MockPublisher::succeeding(Provider::SocialPost);
        publisher.push_outcome(Err(PublishError::RetriesExhausted("503".to_string())));

        let first = publisher.publish(&test_credential(), "a").await;
        assert!(matches!(first, Err(PublishError::RetriesExhausted(_))));

        let second = publisher.publish(&test_credential(), "b").await;
        assert!(second.is_ok(), "script exhausted, default applies");
    }

    #[tokio::test]
    async fn test_failing_mock() {
        let publisher = MockPublisher::failing_with(
            Provider::Messaging,
            PublishError::ContentInvalid("nope".to_string()),
        );
        let result = publisher.publish(&test_credential(), "x").await;
        assert!(matches!(result, Err(PublishError::ContentInvalid(_))));
    }
}
