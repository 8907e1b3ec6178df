use std::time::Duration;

use axum::response::sse::{Event, KeepAlive};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::debug;

use fis_core::types::FlightNotification;

const FEED_CAPACITY: usize = 256;

/// Fan-out of committed flight changes to live board subscribers.
#[derive(Clone)]
pub struct FlightFeed {
    sender: broadcast::Sender<FlightNotification>,
}

impl FlightFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, notification: FlightNotification) {
        // Sending only fails when nobody is listening.
        if self.sender.send(notification).is_err() {
            debug!(stage = "feed", "no live feed subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlightNotification> {
        self.sender.subscribe()
    }
}

impl Default for FlightFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the SSE frame for a committed change. The event id is the
/// notification id so clients can correlate frames with the audit log.
pub fn into_sse_event(notification: &FlightNotification) -> Result<Event, serde_json::Error> {
    let data = serde_json::to_string(notification)?;
    Ok(Event::default()
        .event(notification.change_type.as_str())
        .id(notification.event_id.clone())
        .data(data))
}

/// Streams changes as SSE events, optionally restricted to one flight.
/// Lagged receivers skip the frames they missed.
pub fn feed_stream(
    feed: FlightFeed,
    flight_id: Option<i64>,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static {
    BroadcastStream::new(feed.subscribe()).filter_map(move |result| match result {
        Ok(notification) if flight_id.map_or(true, |id| notification.flight.id == id) => {
            Some(into_sse_event(&notification))
        }
        Ok(_) => None,
        Err(_) => None,
    })
}

pub fn feed_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(20))
        .text("heartbeat")
}
