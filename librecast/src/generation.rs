//! Client for the generative-content provider
//!
//! The analysis pipeline turns transcripts into platform copy through one
//! opaque call. Prompting and response shaping live upstream; this client
//! only owns transport, auth, and resilience, through the same executor
//! the publish path uses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::retry::{self, CallError, RetryError, RetryPolicy};

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// What to derive, e.g. "linkedin-post" or "sms-blast".
    pub kind: String,
    pub transcript: String,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedContent {
    pub content: String,
}

pub struct GenerationClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    policy: RetryPolicy,
}

impl GenerationClient {
    pub fn new(api_base: String, api_key: String, policy: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            policy,
        }
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, GenerationError> {
        let url = format!("{}/v1/generate", self.api_base);

        let outcome = retry::execute(
            || async {
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(request)
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
                    .json::<GeneratedContent>()
                    .await
                    .map_err(CallError::from_reqwest)
            },
            &self.policy,
            retry::default_retryable,
        )
        .await;

        outcome.map_err(|e| match e {
            RetryError::Exhausted(inner) => GenerationError::RetriesExhausted(inner.to_string()),
            RetryError::Permanent(CallError::Decode(message)) => {
                GenerationError::InvalidResponse(message)
            }
            RetryError::Permanent(inner) => GenerationError::Upstream(inner.to_string()),
        })
    }
}
