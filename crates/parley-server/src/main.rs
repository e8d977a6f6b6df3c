mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::state::AppStateInner;
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::typing::TypingDebouncer;

use config::ServerConfig;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    typing: TypingDebouncer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = parley_db::Database::open(&config.db_path)?.with_typing_window(config.typing_stale_ms);
    let db = Arc::new(db);

    // Shared state
    let dispatcher = Dispatcher::new(db);
    let typing = TypingDebouncer::new(dispatcher.clone(), config.typing_debounce);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(GatewayState { dispatcher: dispatcher.clone(), typing });

    let app = parley_api::router(AppStateInner::new(dispatcher))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.typing))
}
