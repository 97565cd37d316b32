//! Credential lifecycle management
//!
//! One manager owns expiry detection and refresh-on-demand for every
//! provider. Adapters never refresh tokens themselves; they ask
//! [`CredentialManager::get_valid_credential`] and get back a credential
//! that is good for at least the safety margin, or a classified error
//! telling the caller whether user action is needed.
//!
//! Refreshes are serialized per (user, provider): two concurrent callers
//! hitting the same near-expiry credential produce one network refresh,
//! not two competing ones that would invalidate each other's token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::Store;
use crate::error::CredentialError;
use crate::retry::{self, CallError, RetryPolicy};
use crate::types::{Credential, CredentialStatus, Provider};

/// Refresh this long before the recorded expiry.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// Tokens returned by a provider's refresh endpoint.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    /// Some providers rotate the refresh token on every exchange.
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

#[derive(Error, Debug)]
pub enum RefreshError {
    /// The provider rejected the grant itself (revoked/expired refresh
    /// token). Retrying cannot help; the user must reconnect.
    #[error("refresh token rejected: {0}")]
    Rejected(String),

    /// The exchange failed for reasons unrelated to the grant.
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Per-provider token refresh client.
#[async_trait]
pub trait RefreshClient: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, RefreshError>;
}

/// Standard OAuth2 `refresh_token` grant over a form-encoded token endpoint.
pub struct OAuthRefreshClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl OAuthRefreshClient {
    pub fn new(token_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            token_url,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl RefreshClient for OAuthRefreshClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, RefreshError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(CallError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 400/401 from a token endpoint means the grant is dead
            // (invalid_grant and friends), not a flaky upstream.
            if status.as_u16() == 400 || status.as_u16() == 401 {
                return Err(RefreshError::Rejected(body));
            }
            return Err(CallError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(CallError::from_reqwest)?;

        let expires_at = tokens
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs);

        Ok(TokenSet {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
        })
    }
}

type RefreshLockKey = (String, Provider);

pub struct CredentialManager {
    store: Store,
    refreshers: HashMap<Provider, Arc<dyn RefreshClient>>,
    policy: RetryPolicy,
    refresh_locks: Mutex<HashMap<RefreshLockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialManager {
    pub fn new(store: Store, policy: RetryPolicy) -> Self {
        Self {
            store,
            refreshers: HashMap::new(),
            policy,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_refresher(&mut self, provider: Provider, client: Arc<dyn RefreshClient>) {
        self.refreshers.insert(provider, client);
    }

    /// Resolve a credential that is valid for at least the safety margin.
    ///
    /// Fresh credentials return without any network call. Near-expiry ones
    /// are refreshed through the retry executor and persisted before being
    /// returned; callers must not cache beyond the returned `expires_at`.
    pub async fn get_valid_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Credential, CredentialError> {
        let credential = self
            .store
            .get_credential(user_id, provider)
            .await?
            .filter(|c| c.status == CredentialStatus::Connected)
            .ok_or(CredentialError::NotConnected { provider })?;

        let now = chrono::Utc::now().timestamp();
        if !credential.expires_within(now, EXPIRY_SAFETY_MARGIN_SECS) {
            return Ok(credential);
        }

        self.refresh_and_persist(credential).await
    }

    async fn refresh_and_persist(
        &self,
        stale: Credential,
    ) -> Result<Credential, CredentialError> {
        let lock = self.lock_for(&stale.user_id, stale.provider);
        let _guard = lock.lock().await;

        // A caller we queued behind may already have refreshed.
        let credential = self
            .store
            .get_credential(&stale.user_id, stale.provider)
            .await?
            .filter(|c| c.status == CredentialStatus::Connected)
            .ok_or(CredentialError::NotConnected {
                provider: stale.provider,
            })?;

        let now = chrono::Utc::now().timestamp();
        if !credential.expires_within(now, EXPIRY_SAFETY_MARGIN_SECS) {
            return Ok(credential);
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            // Expired with no way to refresh: the grant is unusable.
            self.store
                .set_credential_status(
                    &credential.user_id,
                    credential.provider,
                    CredentialStatus::Disconnected,
                )
                .await?;
            return Err(CredentialError::ReauthRequired(
                "access token expired and no refresh token is stored".to_string(),
            ));
        };

        let Some(refresher) = self.refreshers.get(&credential.provider) else {
            return Err(CredentialError::TemporarilyUnavailable(format!(
                "no refresh client registered for {}",
                credential.provider
            )));
        };

        let outcome = retry::execute(
            || refresher.refresh(&refresh_token),
            &self.policy,
            |err| match err {
                RefreshError::Rejected(_) => false,
                RefreshError::Call(call) => retry::default_retryable(call),
            },
        )
        .await;

        match outcome {
            Ok(tokens) => {
                self.store
                    .update_credential_tokens(
                        &credential.user_id,
                        credential.provider,
                        &tokens.access_token,
                        tokens.refresh_token.as_deref(),
                        tokens.expires_at,
                    )
                    .await?;
                info!(
                    user_id = %credential.user_id,
                    provider = %credential.provider,
                    "refreshed access token"
                );
                let mut refreshed = credential;
                refreshed.access_token = tokens.access_token;
                if tokens.refresh_token.is_some() {
                    refreshed.refresh_token = tokens.refresh_token;
                }
                refreshed.expires_at = tokens.expires_at;
                Ok(refreshed)
            }
            Err(err) => {
                let exhausted = err.is_exhausted();
                match err.into_inner() {
                    RefreshError::Rejected(message) => {
                        warn!(
                            user_id = %credential.user_id,
                            provider = %credential.provider,
                            "refresh token rejected, disconnecting credential"
                        );
                        self.store
                            .set_credential_status(
                                &credential.user_id,
                                credential.provider,
                                CredentialStatus::Disconnected,
                            )
                            .await?;
                        Err(CredentialError::ReauthRequired(message))
                    }
                    RefreshError::Call(call) => {
                        let message = if exhausted {
                            format!("retries exhausted: {}", call)
                        } else {
                            call.to_string()
                        };
                        Err(CredentialError::TemporarilyUnavailable(message))
                    }
                }
            }
        }
    }

    fn lock_for(&self, user_id: &str, provider: Provider) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry((user_id.to_string(), provider))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
