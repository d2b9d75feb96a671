use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, info, warn};

use tandem_exchange::ports::MediaStore;
use tandem_media::UploadRejected;
use tandem_types::api::{Claims, PresignResponse, UploadResponse};

use crate::AppState;

/// 10 MB upload limit for selfies
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct SignedUpload {
    pub expires: i64,
    pub signature: String,
}

/// POST /media/presign — a fresh key plus a signed link to PUT it to.
pub async fn presign_upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let ticket = state.media.presign_upload(claims.sub).await.map_err(|e| {
        error!("Failed to presign upload: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    info!("Presigned {} for {}", ticket.key, claims.sub);
    Ok(Json(PresignResponse {
        upload_url: ticket.upload_url,
        key: ticket.key,
    }))
}

/// PUT /uploads/{*key}?expires=..&signature=.. — the signature is the
/// credential; no bearer token needed.
pub async fn signed_upload(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(signed): Query<SignedUpload>,
    bytes: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .media
        .verify_upload(&key, signed.expires, &signed.signature)
        .map_err(|e| {
            warn!("Rejected upload to {}: {}", key, e);
            match e {
                UploadRejected::BadKey(_) => StatusCode::BAD_REQUEST,
                UploadRejected::Expired | UploadRejected::BadSignature => StatusCode::FORBIDDEN,
                UploadRejected::AlreadyExists(_) => StatusCode::CONFLICT,
            }
        })?;

    if bytes.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if bytes.len() > MAX_UPLOAD_SIZE {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let stored = state.media.store_upload(&key, &bytes).await.map_err(|e| {
        if matches!(e.downcast_ref::<UploadRejected>(), Some(UploadRejected::AlreadyExists(_))) {
            warn!("Rejected upload to {}: {}", key, e);
            return StatusCode::CONFLICT;
        }
        error!("Failed to store upload {}: {}", key, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            key: stored.key,
            content_hash: stored.content_hash,
            size: stored.size,
        }),
    ))
}

/// GET /media/{*key}
pub async fn download(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    if tandem_media::validate_key(&key).is_err() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let bytes = state.media.download(&key).await.map_err(|e| {
        warn!("Failed to read media {}: {}", key, e);
        StatusCode::NOT_FOUND
    })?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}
