//! User-initiated feed resync

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use tracing::error;

use librecast::error::{CredentialError, ResyncError};

use crate::auth::CallerId;
use crate::state::AppState;

pub async fn resync(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> axum::response::Response {
    let Some(guard) = state.resync.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "feed host is not configured" })),
        )
            .into_response();
    };

    let connection = match state.store.get_feed_connection_for_user(&user_id).await {
        Ok(Some(connection)) => connection,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "no podcast connection for this account" })),
            )
                .into_response()
        }
        Err(e) => {
            error!("failed to load feed connection: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "store unavailable" })),
            )
                .into_response();
        }
    };

    let now = chrono::Utc::now().timestamp();
    match guard.resync(&connection.id, now).await {
        Ok(report) => {
            let last_sync_at = Utc
                .timestamp_opt(report.last_sync_at, 0)
                .single()
                .map(|dt| dt.to_rfc3339());
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "episodeCountTotal": report.episode_count_total,
                    "newEpisodeCount": report.new_episode_count,
                    "lastSyncAt": last_sync_at,
                })),
            )
                .into_response()
        }
        Err(ResyncError::Cooldown { retry_after_ms }) => {
            let next_allowed_at = (Utc::now() + Duration::milliseconds(retry_after_ms))
                .to_rfc3339();
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "resync cooldown active",
                    "cooldownMs": retry_after_ms,
                    "nextAllowedAt": next_allowed_at,
                })),
            )
                .into_response()
        }
        Err(ResyncError::Credential(
            err @ (CredentialError::NotConnected { .. } | CredentialError::ReauthRequired(_)),
        )) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": err.to_string(),
                "reconnectRequired": true,
            })),
        )
            .into_response(),
        Err(e) => {
            error!("resync failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
