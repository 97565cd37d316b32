//! Cron-triggered jobs

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::state::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

/// Run one publish batch. The external scheduler calls this every few
/// minutes with the shared secret; a missing or wrong secret does no work.
pub async fn publish_scheduled(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(expected) = state.cron_secret.as_deref() else {
        error!("publish trigger called but no cron secret is configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "cron secret is not configured" })),
        );
    };

    let presented = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid cron secret" })),
        );
    }

    let now = chrono::Utc::now().timestamp();
    match state.worker.run_once(now).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "processed": summary.processed,
                "published": summary.published,
                "failed": summary.failed,
            })),
        ),
        Err(e) => {
            error!("publish batch aborted: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "store unavailable" })),
            )
        }
    }
}
