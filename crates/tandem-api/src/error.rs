use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use tandem_exchange::ExchangeError;

/// HTTP face of an [`ExchangeError`].
pub struct ApiError(pub ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ExchangeError::NotFound(_) => StatusCode::NOT_FOUND,
            ExchangeError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ExchangeError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            ExchangeError::Conflict(_) => StatusCode::CONFLICT,
            ExchangeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            ExchangeError::Storage(e) => {
                error!("Exchange storage error: {}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
