pub mod error;
mod notices;
mod reservations;
mod slots;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// The full API surface. One router, one shared engine.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .merge(slots::routes())
        .merge(reservations::routes())
        .merge(notices::routes())
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

async fn health() -> &'static str {
    "ok"
}
