//! LinkedIn share publishing
//!
//! Posts member shares through the UGC posts API. The credential's
//! `provider_account_id` is the member id the share is authored as.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::PublishError;
use crate::platforms::{map_call_error, Publisher};
use crate::retry::{self, CallError, RetryPolicy};
use crate::types::{Credential, Provider, PublishReceipt};

const CHARACTER_LIMIT: usize = 3000;

pub struct LinkedInPublisher {
    http: reqwest::Client,
    api_base: String,
    policy: RetryPolicy,
}

impl LinkedInPublisher {
    pub fn new(api_base: String, policy: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            api_base: api_base.trim_end_matches('/').to_string(),
            policy,
        }
    }
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn provider(&self) -> Provider {
        Provider::SocialPost
    }

    fn name(&self) -> &'static str {
        "linkedin"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    async fn publish(
        &self,
        credential: &Credential,
        content: &str,
    ) -> Result<PublishReceipt, PublishError> {
        self.validate_content(content)?;

        let url = format!("{}/v2/ugcPosts", self.api_base);
        let body = json!({
            "author": format!("urn:li:person:{}", credential.provider_account_id),
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": content },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
            }
        });

        let post_id = retry::execute(
            || async {
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&credential.access_token)
                    .header("X-Restli-Protocol-Version", "2.0.0")
                    .json(&body)
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

                // The created share urn comes back in the X-RestLi-Id
                // header; older API versions carry it in the body instead.
                if let Some(id) = response
                    .headers()
                    .get("x-restli-id")
                    .and_then(|v| v.to_str().ok())
                {
                    return Ok(id.to_string());
                }
                let value: serde_json::Value =
                    response.json().await.map_err(CallError::from_reqwest)?;
                value
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| CallError::Decode("response carries no share id".to_string()))
            },
            &self.policy,
            retry::default_retryable,
        )
        .await
        .map_err(|e| map_call_error(self.name(), e))?;

        let url = Some(format!("https://www.linkedin.com/feed/update/{}", post_id));
        Ok(PublishReceipt {
            platform_post_id: post_id,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialStatus;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_credential() -> Credential {
        Credential {
            user_id: "user-1".to_string(),
            provider: Provider::SocialPost,
            access_token: "access-token".to_string(),
            refresh_token: None,
            expires_at: None,
            provider_account_id: "AbC123".to_string(),
            account_name: Some("Ada".to_string()),
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
    async fn test_publish_returns_share_id_and_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .and(bearer_token("access-token"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-restli-id", "urn:li:share:42")
                    .set_body_json(serde_json::json!({"id": "urn:li:share:42"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let publisher = LinkedInPublisher::new(server.uri(), fast_policy());
        let receipt = publisher
            .publish(&test_credential(), "Hello network")
            .await
            .unwrap();

        assert_eq!(receipt.platform_post_id, "urn:li:share:42");
        assert_eq!(
            receipt.url.as_deref(),
            Some("https://www.linkedin.com/feed/update/urn:li:share:42")
        );
    }

    #[tokio::test]
    async fn test_revoked_token_maps_to_reauth_required() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string("token revoked by member"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let publisher = LinkedInPublisher::new(server.uri(), fast_policy());
        let result = publisher.publish(&test_credential(), "Hello").await;
        assert!(matches!(result, Err(PublishError::ReauthRequired(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .respond_with(ResponseTemplate::new(429).set_body_string("throttled"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .respond_with(
                ResponseTemplate::new(201).insert_header("x-restli-id", "urn:li:share:7"),
            )
            .mount(&server)
            .await;

        let publisher = LinkedInPublisher::new(server.uri(), fast_policy());
        let receipt = publisher
            .publish(&test_credential(), "Hello again")
            .await
            .unwrap();
        assert_eq!(receipt.platform_post_id, "urn:li:share:7");
    }

    #[tokio::test]
    async fn test_oversized_content_fails_without_network_call() {
        let server = MockServer::start().await;
        // No mock mounted: any request would 404 and fail differently
        let publisher = LinkedInPublisher::new(server.uri(), fast_policy());
        let huge = "x".repeat(CHARACTER_LIMIT + 1);
        let result = publisher.publish(&test_credential(), &huge).await;
        assert!(matches!(result, Err(PublishError::ContentInvalid(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
