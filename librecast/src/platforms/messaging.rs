//! SMS delivery through a Twilio-style Messages API
//!
//! The messaging payload is provider-specific JSON: `{"to": "+1...",
//! "body": "..."}`. The credential's `provider_account_id` is the account
//! SID and its `access_token` the API auth token.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PublishError;
use crate::platforms::{map_call_error, Publisher};
use crate::retry::{self, CallError, RetryPolicy};
use crate::types::{Credential, Provider, PublishReceipt};

const CHARACTER_LIMIT: usize = 1600;

#[derive(Debug, Deserialize)]
struct MessagePayload {
    to: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
}

pub struct MessagingPublisher {
    http: reqwest::Client,
    api_base: String,
    from_number: String,
    policy: RetryPolicy,
}

impl MessagingPublisher {
    pub fn new(api_base: String, from_number: String, policy: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            api_base: api_base.trim_end_matches('/').to_string(),
            from_number,
            policy,
        }
    }

    fn parse_payload(&self, content: &str) -> Result<MessagePayload, PublishError> {
        let payload: MessagePayload = serde_json::from_str(content).map_err(|e| {
            PublishError::ContentInvalid(format!(
                "messaging payload must be JSON with \"to\" and \"body\": {}",
                e
            ))
        })?;
        if !payload.to.starts_with('+') || payload.to.len() < 8 {
            return Err(PublishError::ContentInvalid(format!(
                "\"to\" must be an E.164 phone number, got {:?}",
                payload.to
            )));
        }
        if payload.body.trim().is_empty() {
            return Err(PublishError::ContentInvalid(
                "message body cannot be empty".to_string(),
            ));
        }
        let count = payload.body.chars().count();
        if count > CHARACTER_LIMIT {
            return Err(PublishError::ContentInvalid(format!(
                "message body exceeds the {} character limit (current: {})",
                CHARACTER_LIMIT, count
            )));
        }
        Ok(payload)
    }
}

#[async_trait]
impl Publisher for MessagingPublisher {
    fn provider(&self) -> Provider {
        Provider::Messaging
    }

    fn name(&self) -> &'static str {
        "twilio"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn validate_content(&self, content: &str) -> Result<(), PublishError> {
        self.parse_payload(content).map(|_| ())
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &str,
    ) -> Result<PublishReceipt, PublishError> {
        let payload = self.parse_payload(content)?;

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, credential.provider_account_id
        );

        let response = retry::execute(
            || async {
                let form = [
                    ("To", payload.to.as_str()),
                    ("From", self.from_number.as_str()),
                    ("Body", payload.body.as_str()),
                ];
                let response = self
                    .http
                    .post(&url)
                    .basic_auth(
                        &credential.provider_account_id,
                        Some(&credential.access_token),
                    )
                    .form(&form)
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
                response
                    .json::<MessageResponse>()
                    .await
                    .map_err(CallError::from_reqwest)
            },
            &self.policy,
            retry::default_retryable,
        )
        .await
        .map_err(|e| map_call_error(self.name(), e))?;

        Ok(PublishReceipt {
            platform_post_id: response.sid,
            url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialStatus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_credential() -> Credential {
        Credential {
            user_id: "user-1".to_string(),
            provider: Provider::Messaging,
            access_token: "auth-token".to_string(),
            refresh_token: None,
            expires_at: None,
            provider_account_id: "AC123".to_string(),
            account_name: None,
            status: CredentialStatus::Connected,
            last_sync_at: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_retries: 2,
            max_jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_send_returns_message_sid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"sid": "SM42"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let publisher =
            MessagingPublisher::new(server.uri(), "+15550001111".to_string(), fast_policy());
        let receipt = publisher
            .publish(
                &test_credential(),
                r#"{"to": "+15557654321", "body": "New episode is live"}"#,
            )
            .await
            .unwrap();
        assert_eq!(receipt.platform_post_id, "SM42");
        assert!(receipt.url.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_content_invalid() {
        let server = MockServer::start().await;
        let publisher =
            MessagingPublisher::new(server.uri(), "+15550001111".to_string(), fast_policy());

        for content in [
            "not json",
            r#"{"to": "5551234", "body": "missing plus"}"#,
            r#"{"to": "+15557654321", "body": "   "}"#,
        ] {
            let result = publisher.publish(&test_credential(), content).await;
            assert!(
                matches!(result, Err(PublishError::ContentInvalid(_))),
                "expected ContentInvalid for {:?}",
                content
            );
        }
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_reauth_required() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            .respond_with(ResponseTemplate::new(401).set_body_string("authentication failed"))
            .mount(&server)
            .await;

        let publisher =
            MessagingPublisher::new(server.uri(), "+15550001111".to_string(), fast_policy());
        let result = publisher
            .publish(
                &test_credential(),
                r#"{"to": "+15557654321", "body": "hi"}"#,
            )
            .await;
        assert!(matches!(result, Err(PublishError::ReauthRequired(_))));
    }

    #[test]
    fn test_body_at_limit_is_accepted() {
        let publisher = MessagingPublisher::new(
            "https://api.example.com".to_string(),
            "+15550001111".to_string(),
            fast_policy(),
        );
        let body = "a".repeat(CHARACTER_LIMIT);
        let content = serde_json::json!({"to": "+15557654321", "body": body}).to_string();
        assert!(publisher.validate_content(&content).is_ok());

        let over = "a".repeat(CHARACTER_LIMIT + 1);
        let content = serde_json::json!({"to": "+15557654321", "body": over}).to_string();
        assert!(publisher.validate_content(&content).is_err());
    }
}
