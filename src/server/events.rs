//! Live notification stream for local dashboards

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::routes::ServerState;
use crate::apps::{EventSink, Notification};

pub const EVENTS_PATH: &str = "/events";
/// Notifications kept for slow subscribers before they start lagging
pub const EVENT_BUFFER: usize = 256;

/// Fans notifications out to every open event stream
#[derive(Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, notification: &Notification) {
        // Err only means nobody is listening
        let _ = self.tx.send(notification.clone());
    }
}

fn to_sse(notification: &Notification) -> SseEvent {
    SseEvent::default()
        .event(notification.name())
        .json_data(notification)
        .unwrap_or_else(|e| SseEvent::default().event("error").data(e.to_string()))
}

/// GET /events - current app list, then every notification as it happens
pub async fn events_handler(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    // Subscribe before reading the app list so nothing falls in between
    let rx = state.events.subscribe();
    let current = Notification::Apps(state.ctx.app_summaries());
    debug!("Event stream opened ({} subscribers)", state.events.receiver_count());

    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    return Some((Ok::<_, Infallible>(to_sse(&notification)), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, {} notifications dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream::once(async move { Ok::<_, Infallible>(to_sse(&current)) }).chain(live))
        .keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{Event, EventHandler};
    use serde_json::json;

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let sink = BroadcastEventSink::new(8);
        sink.emit(&Notification::Apps(vec![]));

        let mut first = sink.subscribe();
        let mut second = sink.subscribe();
        assert_eq!(sink.receiver_count(), 2);

        let handler = EventHandler::new();
        handler.set_sink(std::sync::Arc::new(sink.clone()));
        handler.task_event(&Event::task("to_int", json!(["10"])));

        for rx in [&mut first, &mut second] {
            match rx.try_recv().unwrap() {
                Notification::Task(event) => assert_eq!(event.id, "to_int"),
                other => panic!("unexpected notification {other:?}"),
            }
            assert!(rx.try_recv().is_err());
        }
    }
}
