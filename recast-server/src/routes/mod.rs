//! HTTP routes

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod connections;
pub mod jobs;
pub mod podcast;
pub mod schedule;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs/publish-scheduled", post(jobs::publish_scheduled))
        .route("/schedule", post(schedule::enqueue).get(schedule::list))
        .route("/schedule/{id}/delete", post(schedule::delete_post))
        .route("/connections/{provider}/status", get(connections::status))
        .route(
            "/connections/{provider}/disconnect",
            delete(connections::disconnect),
        )
        .route("/podcast/resync-rss", post(podcast::resync))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
