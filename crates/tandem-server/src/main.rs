mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tandem_api::AppStateInner;
use tandem_api::middleware::validate_token;
use tandem_exchange::ExchangeService;
use tandem_exchange::delivery::RevealDelivery;
use tandem_exchange::ports::SystemClock;
use tandem_exchange::sqlite::SqliteStore;
use tandem_gateway::connection;
use tandem_gateway::dispatcher::Dispatcher;
use tandem_media::LocalMediaStore;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    service: Arc<ExchangeService>,
    jwt_secret: String,
}

#[derive(Deserialize)]
struct GatewayAuth {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(tandem_db::Database::open(&config.db_path)?);
    let store = SqliteStore::new(db);
    let media = Arc::new(
        LocalMediaStore::new(
            config.media_dir.clone(),
            &config.public_url,
            config.jwt_secret.as_bytes(),
            config.upload_ttl,
        )
        .await?,
    );
    let dispatcher = Dispatcher::new();

    let (service, queues) = ExchangeService::new(
        Arc::new(store.clone()),
        media.clone(),
        Arc::new(store.clone()),
        Arc::new(dispatcher.clone()),
        Arc::new(SystemClock),
    );

    // Background work: fired expiry timers and reveal delivery
    tokio::spawn(service.clone().run_expiry_loop(queues.fired));
    let delivery = RevealDelivery::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(dispatcher.clone()),
    );
    tokio::spawn(delivery.run(queues.reveals));
    service.recover().await?;

    let app_state = Arc::new(AppStateInner {
        service: service.clone(),
        media,
        messages: Arc::new(store),
        jwt_secret: config.jwt_secret.clone(),
    });
    let state = ServerState {
        dispatcher,
        service: service.clone(),
        jwt_secret: config.jwt_secret.clone(),
    };

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(tandem_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Tandem server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Pending timers die with the process; `recover` re-arms them on the
    // next start.
    service.shutdown();
    info!("Tandem server stopped");
    Ok(())
}

/// The JWT is checked here, before the upgrade, so the connection loop only
/// ever sees authenticated users.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(auth): Query<GatewayAuth>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(claims) = validate_token(&auth.token, &state.jwt_secret) else {
        warn!("Rejected gateway connection with invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.service, claims.sub)
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
