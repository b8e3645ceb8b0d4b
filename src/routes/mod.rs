pub mod auth;
pub mod contact;
pub mod issues;
pub mod uploads;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

async fn health() -> &'static str {
    "ok"
}

/// The full HTTP surface with tracing and CORS applied.
pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.config.storage.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(contact::router())
        .merge(issues::router())
        .merge(uploads::router(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
