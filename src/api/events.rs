//! Server-sent events for one session.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use tracing::debug;
use wagate_core::error::GatewayError;

use super::{api_err, ApiError, ApiState};

/// `GET /sessions/{name}/sse/events`
///
/// Opens with an `event: connected` frame, then relays every envelope of the
/// session as `event: message`. The stream ends when the session is deleted.
pub(super) async fn subscribe(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let subscription = state
        .registry
        .dispatcher()
        .hub()
        .register(&handle.id)
        .await
        .ok_or_else(|| api_err(GatewayError::Internal("event hub stopped".into())))?;
    debug!(session = %name, "sse client connected");

    let hello = Event::default()
        .event("connected")
        .data(json!({"sessionId": handle.id, "session": name}).to_string());
    let events = subscription
        .map(|payload| Ok(Event::default().event("message").data(&*payload)));
    let stream = stream::once(async move { Ok(hello) }).chain(events);

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.keepalive)
            .text("keep-alive"),
    ))
}
