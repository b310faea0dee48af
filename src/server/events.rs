//! Server-Sent Events stream of refresh signals.
//!
//! Each connection gets its own subscription on the change notifier. The
//! stream opens with a `connected` event, then emits one `pr_update` event per
//! refresh signal. It ends when the server shuts down or the client goes
//! away, and the subscription goes with it.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt, stream};
use tracing::debug;

use super::AppState;
use crate::notify::RefreshSignal;

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_PR_UPDATE: &str = "pr_update";

/// Event stream handler.
///
/// # Example
///
/// ```ignore
/// GET /api/events HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: text/event-stream
///
/// event: connected
/// data: {"message":"Connected to server"}
///
/// event: pr_update
/// data: {"refresh":true}
/// ```
pub async fn events_handler(
    State(app_state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = app_state.notifier().subscribe();
    debug!("Dashboard connected to event stream");

    let connected = Event::default()
        .event(EVENT_CONNECTED)
        .data(r#"{"message":"Connected to server"}"#);

    let updates = subscription
        .until_cancelled(app_state.shutdown().clone())
        .map(|signal| Ok(update_event(signal)));

    Sse::new(stream::once(async move { Ok(connected) }).chain(updates))
        .keep_alive(KeepAlive::default())
}

fn update_event(signal: RefreshSignal) -> Event {
    match Event::default().event(EVENT_PR_UPDATE).json_data(signal) {
        Ok(event) => event,
        // RefreshSignal always serializes; keep the stream alive regardless.
        Err(_) => Event::default()
            .event(EVENT_PR_UPDATE)
            .data(r#"{"refresh":true}"#),
    }
}

