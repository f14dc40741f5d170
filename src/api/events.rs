//! Live audit feed (`GET /events`) as server-sent events.
//!
//! The cursor starts at the highest audit id when the client connects, so
//! history is never replayed. A per-connection task polls the store and
//! pushes new entries until the client goes away or the server shuts down.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use super::{ApiError, AppState};
use crate::shutdown::Shutdown;
use crate::store::{AuditEntry, Database};

/// Entries fetched per poll.
const PAGE_SIZE: usize = 100;

/// Pause after a failed poll.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

const CHANNEL_CAPACITY: usize = 64;

/// GET /events
pub async fn event_stream(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    // Taken before responding so nothing appended after connect is missed.
    let cursor = state.store.max_audit_id().await?;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(CHANNEL_CAPACITY);

    debug!(cursor, "Event stream opened");
    tokio::spawn(pump(
        state.store.clone(),
        cursor,
        state.event_poll,
        state.shutdown.clone(),
        tx,
    ));

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

fn to_event(entry: &AuditEntry) -> Option<Event> {
    match Event::default().id(entry.id.to_string()).json_data(entry) {
        Ok(event) => Some(event),
        Err(e) => {
            error!(id = entry.id, "Failed to encode audit entry: {e}");
            None
        }
    }
}

async fn pump(
    store: std::sync::Arc<dyn Database>,
    mut cursor: i64,
    poll: Duration,
    shutdown: Shutdown,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    if tx.send(Ok(Event::default().comment("keepalive"))).await.is_err() {
        return;
    }

    loop {
        let wait = match store.audit_after(cursor, PAGE_SIZE).await {
            Ok(entries) => {
                let full_page = entries.len() == PAGE_SIZE;
                for entry in entries {
                    cursor = entry.id;
                    if let Some(event) = to_event(&entry) {
                        if tx.send(Ok(event)).await.is_err() {
                            debug!("Event stream client disconnected");
                            return;
                        }
                    }
                }
                if full_page { Duration::ZERO } else { poll }
            }
            Err(e) => {
                error!("Event stream poll failed: {e}");
                ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tx.closed() => {
                debug!("Event stream client disconnected");
                return;
            }
            _ = shutdown.wait() => return,
        }
    }
}
