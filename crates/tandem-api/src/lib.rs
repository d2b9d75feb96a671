pub mod error;
pub mod exchanges;
pub mod media;
pub mod messages;
pub mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

use tandem_exchange::ExchangeService;
use tandem_exchange::ports::MessageHistory;
use tandem_media::LocalMediaStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: Arc<ExchangeService>,
    pub media: Arc<LocalMediaStore>,
    pub messages: Arc<dyn MessageHistory>,
    pub jwt_secret: String,
}

/// REST routes. Everything except the signed upload needs a bearer token.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/selfie-exchanges", post(exchanges::create_exchange))
        .route("/selfie-exchanges/{exchange_id}", get(exchanges::get_exchange))
        .route("/selfie-exchanges/{exchange_id}/accept", post(exchanges::accept_exchange))
        .route("/selfie-exchanges/{exchange_id}/submit", post(exchanges::submit_selfie))
        .route("/selfie-exchanges/{exchange_id}/cancel", post(exchanges::cancel_exchange))
        .route(
            "/selfie-exchanges/active/{other_user_id}",
            get(exchanges::get_active_exchange),
        )
        .route("/messages/{other_user_id}", get(messages::get_conversation))
        .route("/media/presign", post(media::presign_upload))
        .route("/media/{*key}", get(media::download))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state.clone());

    let upload_routes = Router::new()
        .route("/uploads/{*key}", put(media::signed_upload))
        .layer(DefaultBodyLimit::max(media::MAX_UPLOAD_SIZE))
        .with_state(state);

    Router::new().merge(protected_routes).merge(upload_routes)
}

#[cfg(test)]
mod tests;
