//! Server-Sent Events stream of cache mutations.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures_util::{Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use tracing::debug;

use crate::application::broadcaster::Frame;
use crate::state::AppState;

/// Opens a push channel for cache invalidation events.
///
/// # Endpoint
///
/// `GET /api/cache-events`
///
/// # Stream
///
/// ```text
/// event: connected
/// data: {"type":"connected","timestamp":1735689600000}
///
/// data: {"type":"url_updated","originalUrl":"https://example.com","shortCode":"3f9a1c2"}
///
/// : keep-alive
/// ```
///
/// The client is unregistered when the connection closes.
pub async fn cache_events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.connect();
    debug!(client = subscription.id(), "Push client connected");

    Sse::new(subscription.map(|frame| Ok(to_event(frame))))
}

fn to_event(frame: Frame) -> Event {
    match frame {
        Frame::Connected { timestamp } => Event::default()
            .event("connected")
            .data(json!({ "type": "connected", "timestamp": timestamp }).to_string()),
        Frame::Event(payload) => Event::default().data(&*payload),
        Frame::KeepAlive => Event::default().comment("keep-alive"),
    }
}
