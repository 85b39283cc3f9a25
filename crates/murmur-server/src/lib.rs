pub mod config;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use murmur_api::{AppState, AppStateInner};
use murmur_db::Database;
use murmur_gateway::{Dispatcher, connection};

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    message: &'static str,
    active_users: usize,
    groups: usize,
    database_connected: bool,
}

/// Assemble the full HTTP surface: auth routes, the gateway socket and the
/// health probe.
pub fn app(config: &Config, db: Arc<Database>) -> Router {
    let dispatcher = Dispatcher::new(db.clone(), config.gateway());

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
    });

    let gateway_routes = Router::new()
        .route("/", get(health))
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState { dispatcher });

    Router::new()
        .merge(murmur_api::router(app_state))
        .merge(gateway_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher))
}

async fn health(State(state): State<ServerState>) -> Json<Health> {
    let db = state.dispatcher.db().clone();
    let database_connected = tokio::task::spawn_blocking(move || db.ping())
        .await
        .unwrap_or(false);

    Json(Health {
        message: "Chat Server is running",
        active_users: state.dispatcher.active_users().await.len(),
        groups: state.dispatcher.group_count().await,
        database_connected,
    })
}
