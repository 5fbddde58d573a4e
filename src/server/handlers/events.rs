//! Server-sent event feed of printer lifecycle and discovery events.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tracing::warn;

use crate::events::PrinterEvent;

use super::super::state::AppState;

/// Handle GET /api/events
///
/// Each event is sent with its `event` name and the JSON body as data.
/// A subscriber that falls behind skips the missed events.
pub async fn stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry.events().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(event) => to_sse(&event),
        Err(e) => {
            warn!(error = %e, "event subscriber lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn to_sse(event: &PrinterEvent) -> Option<Result<Event, Infallible>> {
    match Event::default().event(event.name()).json_data(event) {
        Ok(sse) => Some(Ok(sse)),
        Err(e) => {
            warn!(error = %e, "failed to encode printer event");
            None
        }
    }
}
