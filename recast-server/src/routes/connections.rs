//! Credential status and disconnect
//!
//! Connect flows are OAuth redirects handled elsewhere; they end in a
//! stored credential. These endpoints let the UI reflect connection
//! reality and cut a grant loose.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use librecast::types::{CredentialStatus, Provider};

use crate::auth::CallerId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

fn parse_provider(raw: &str) -> Result<Provider, axum::response::Response> {
    Provider::parse(raw).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown provider: {}", raw) })),
        )
            .into_response()
    })
}

pub async fn status(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(provider): Path<String>,
) -> axum::response::Response {
    let provider = match parse_provider(&provider) {
        Ok(provider) => provider,
        Err(response) => return response,
    };

    match state.store.get_credential(&user_id, provider).await {
        Ok(Some(credential)) if credential.status == CredentialStatus::Connected => {
            let now = chrono::Utc::now().timestamp();
            let token_expired = credential.expires_at.map(|at| at <= now);
            let expires_at = credential.expires_at.and_then(|at| {
                Utc.timestamp_opt(at, 0).single().map(|dt| dt.to_rfc3339())
            });
            (
                StatusCode::OK,
                Json(ConnectionStatus {
                    connected: true,
                    account_name: credential.account_name,
                    token_expired,
                    expires_at,
                }),
            )
                .into_response()
        }
        Ok(_) => (
            StatusCode::OK,
            Json(ConnectionStatus {
                connected: false,
                account_name: None,
                token_expired: None,
                expires_at: None,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("failed to load credential: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "store unavailable" })),
            )
                .into_response()
        }
    }
}

pub async fn disconnect(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(provider): Path<String>,
) -> axum::response::Response {
    let provider = match parse_provider(&provider) {
        Ok(provider) => provider,
        Err(response) => return response,
    };

    match state
        .store
        .set_credential_status(&user_id, provider, CredentialStatus::Disconnected)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(e) => {
            error!("failed to disconnect credential: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "store unavailable" })),
            )
                .into_response()
        }
    }
}
