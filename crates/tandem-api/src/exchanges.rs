use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use tandem_types::api::{Claims, CreateExchangeRequest, SubmitSelfieRequest};

use crate::AppState;
use crate::error::ApiError;

/// POST /selfie-exchanges
pub async fn create_exchange(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateExchangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.service.create(claims.sub, req.receiver_id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// POST /selfie-exchanges/{exchange_id}/accept
pub async fn accept_exchange(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exchange_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.service.accept(exchange_id, claims.sub).await?;
    Ok(Json(view))
}

/// POST /selfie-exchanges/{exchange_id}/submit
pub async fn submit_selfie(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exchange_id): Path<Uuid>,
    Json(req): Json<SubmitSelfieRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .service
        .submit(exchange_id, claims.sub, &req.object_key, &req.content_hash)
        .await?;
    Ok(Json(view))
}

/// POST /selfie-exchanges/{exchange_id}/cancel — replies with the exchange as
/// it stands afterwards.
pub async fn cancel_exchange(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exchange_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.cancel(exchange_id, claims.sub).await?;
    let view = state.service.view(exchange_id, claims.sub).await?;
    Ok(Json(view))
}

/// GET /selfie-exchanges/{exchange_id}
pub async fn get_exchange(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exchange_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.service.view(exchange_id, claims.sub).await?;
    Ok(Json(view))
}

/// GET /selfie-exchanges/active/{other_user_id}
pub async fn get_active_exchange(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(other_user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match state.service.active_between(claims.sub, other_user_id).await? {
        Some(view) => Ok(Json(view).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
