//! `GET /api/v1/stream`: server-sent conversation events.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::{header, HeaderName},
    response::{sse::Event, IntoResponse, Sse},
};
use futures::StreamExt;
use tracing::warn;

use crate::auth::StreamAuth;
use crate::state::AppState;
use crate::stream::EventStream;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Open an event stream for the caller.
///
/// Authentication happens in the extractor, so an unknown caller gets a 401
/// and no stream. The bus subscription is registered before the response is
/// returned, so nothing published after this point is missed. Each event is
/// one `data: <json>` frame.
pub async fn stream_events(
    State(state): State<AppState>,
    StreamAuth { user_id }: StreamAuth,
) -> impl IntoResponse {
    let events = EventStream::open(
        &state.event_bus,
        user_id,
        &state.stream_config,
        state.shutdown.child_token(),
        state.stream_connections.clone(),
    );

    let frames = events.into_stream().filter_map(move |event| async move {
        match serde_json::to_string(&*event) {
            Ok(json) => Some(Ok::<_, Infallible>(Event::default().data(json))),
            Err(e) => {
                warn!(
                    subsystem = "stream",
                    user_id = %user_id,
                    event_type = event.event_type(),
                    error = %e,
                    "Failed to serialize event; frame skipped"
                );
                None
            }
        }
    });

    (
        [
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(frames),
    )
}
