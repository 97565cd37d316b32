//! Schedule management: enqueue, list, delete

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use librecast::types::{PostOutcome, PostStatus, Provider, ScheduledPost};

use crate::auth::CallerId;
use crate::state::AppState;

/// Schedules more than a year overdue are almost certainly client bugs.
const MAX_PAST_SECS: i64 = 365 * 24 * 3600;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub provider: Provider,
    pub content: String,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub provider: Provider,
    pub content: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: PostStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PostOutcome>,
    pub created_at: DateTime<Utc>,
}

impl PostView {
    fn from_post(post: ScheduledPost) -> Self {
        Self {
            id: post.id,
            provider: post.provider,
            content: post.content,
            scheduled_at: timestamp_to_datetime(post.scheduled_at),
            status: post.status,
            outcome: post.outcome,
            created_at: timestamp_to_datetime(post.created_at),
        }
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

pub async fn enqueue(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(request): Json<EnqueueRequest>,
) -> impl IntoResponse {
    if request.content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "content cannot be empty" })),
        )
            .into_response();
    }

    let scheduled_at = request.scheduled_at.timestamp();
    let now = chrono::Utc::now().timestamp();
    if scheduled_at < now - MAX_PAST_SECS {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "scheduledAt is too far in the past" })),
        )
            .into_response();
    }

    if state.publishers.get(request.provider).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("{} is not available for publishing", request.provider)
            })),
        )
            .into_response();
    }

    let post = ScheduledPost::new(user_id, request.provider, request.content, scheduled_at);
    match state.store.create_post(&post).await {
        Ok(()) => (StatusCode::CREATED, Json(PostView::from_post(post))).into_response(),
        Err(e) => {
            error!("failed to enqueue post: {}", e);
            store_unavailable()
        }
    }
}

pub async fn list(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> impl IntoResponse {
    match state.store.list_posts_for_user(&user_id).await {
        Ok(posts) => {
            let views: Vec<PostView> = posts.into_iter().map(PostView::from_post).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(e) => {
            error!("failed to list posts: {}", e);
            store_unavailable()
        }
    }
}

pub async fn delete_post(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let post = match state.store.get_post(&id).await {
        Ok(Some(post)) => post,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "no such post" })),
            )
                .into_response()
        }
        Err(e) => {
            error!("failed to load post: {}", e);
            return store_unavailable();
        }
    };

    if post.user_id != user_id {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "not your post" })),
        )
            .into_response();
    }

    match state.store.delete_post(&id).await {
        Ok(true) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        // The worker got there first; terminal posts are retained.
        Ok(false) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "post is no longer scheduled" })),
        )
            .into_response(),
        Err(e) => {
            error!("failed to delete post: {}", e);
            store_unavailable()
        }
    }
}

fn store_unavailable() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "store unavailable" })),
    )
        .into_response()
}
