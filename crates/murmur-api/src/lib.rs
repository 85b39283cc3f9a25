pub mod auth;
pub mod error;
pub mod middleware;

use axum::{
    Router,
    routing::{get, post},
};

pub use auth::{AppState, AppStateInner};

/// Routes under `/api/auth`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/verify", get(auth::verify))
        .with_state(state)
}
