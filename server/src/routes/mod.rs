//! HTTP routes

pub mod predict;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// The service exposes exactly one route: `POST /predict`
pub fn router(state: SharedState, body_limit: usize) -> Router {
    Router::new()
        .route("/predict", post(predict::predict))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
