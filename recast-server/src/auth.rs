//! Caller identity extraction
//!
//! Session handling lives upstream; by the time a request reaches this
//! service the authenticated user id is carried in the `x-user-id`
//! header. Requests without it are rejected before any handler runs.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, as resolved by the upstream auth layer.
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match user_id {
            Some(user_id) => Ok(CallerId(user_id.to_string())),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing caller identity" })),
            )),
        }
    }
}
