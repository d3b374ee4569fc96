use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

/// GET /api/events: SSE stream of pipeline events, one JSON payload each.
///
/// The SSE event name is the event kind (`transitioned`, `critical_risk`, ...).
/// A subscriber that lags behind the channel silently drops the missed events.
pub async fn sse_events(State(app): State<AppState>) -> impl axum::response::IntoResponse {
    let rx = app.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        let event = msg.ok()?;
        let payload = serde_json::to_value(&event).ok()?;
        let kind = payload["kind"].as_str().unwrap_or("event").to_string();
        Some(Ok::<Event, Infallible>(
            Event::default().event(kind).data(payload.to_string()),
        ))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
