use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use tandem_types::api::Claims;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// GET /messages/{other_user_id} — the caller's conversation with another
/// user, newest first. Revealed selfies show up here as attachments, so a
/// participant who was offline at completion can still find the photo.
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(other_user_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.min(200);
    let messages = state
        .messages
        .conversation(claims.sub, other_user_id, limit)
        .await
        .map_err(|e| {
            error!("Failed to load conversation for {}: {}", claims.sub, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(messages))
}
