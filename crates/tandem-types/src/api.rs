use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared across tandem-api (REST middleware) and tandem-gateway
/// (WebSocket authentication). Tokens are minted by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Selfie exchanges --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateExchangeRequest {
    pub receiver_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitSelfieRequest {
    pub object_key: String,
    /// Optional; checked against the stored bytes when present.
    #[serde(default)]
    pub content_hash: String,
}

// -- Media --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignResponse {
    pub upload_url: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub key: String,
    pub content_hash: String,
    pub size: u64,
}
