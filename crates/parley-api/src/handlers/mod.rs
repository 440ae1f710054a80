//! HTTP handlers.

pub mod conversations;
pub mod read_state;
pub mod stream;

use axum::{extract::State, response::IntoResponse, Json};

use crate::state::AppState;

/// Liveness plus the number of open event streams.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "streams": state.active_streams(),
    }))
}
