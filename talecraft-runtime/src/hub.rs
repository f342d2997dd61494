//! The stream hub: per-session subscribers, SSE framing and heartbeats.
//!
//! One channel exists per session id. Events arrive from the session
//! runtime through the [`EventSink`] impl, are serialized to
//! `data: <json>\n\n` frames, and reach the subscriber through a bounded
//! channel. Publication never blocks: when the buffer is full the event
//! is dropped for that subscriber and a single `error` event follows
//! once the channel drains.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use talecraft_core::{EventSink, GameEvent};

/// Interval between `:heartbeat` comment frames.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Frames buffered per subscriber before events are dropped.
const SUBSCRIBER_BUFFER: usize = 256;

/// The comment frame sent on the heartbeat cadence.
pub const HEARTBEAT_FRAME: &str = ":heartbeat\n\n";

struct Subscriber {
    tx: mpsc::Sender<String>,
    #[allow(dead_code)]
    connected_at: DateTime<Utc>,
    /// Set after a dropped event; cleared once the error frame lands.
    overflowed: bool,
}

/// Registry of per-session event subscribers.
pub struct StreamHub {
    subscribers: Arc<Mutex<HashMap<String, Subscriber>>>,
    heartbeat: Duration,
}

/// A subscriber's receiving end. Dropping it disconnects.
pub struct Subscription {
    pub session_id: String,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    /// Receive the next wire frame.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receive without waiting; `None` when the buffer is empty.
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Adapt into a `Stream` of frames for response bodies.
    pub fn into_stream(self) -> ReceiverStream<String> {
        ReceiverStream::new(self.rx)
    }
}

impl StreamHub {
    pub fn new() -> Self {
        Self::with_heartbeat(HEARTBEAT_INTERVAL)
    }

    /// Override the heartbeat cadence (tests use a short one).
    pub fn with_heartbeat(heartbeat: Duration) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            heartbeat,
        }
    }

    /// Register the subscriber for a session, replacing any previous one.
    ///
    /// The first frame delivered is the `connected` event; a heartbeat
    /// task runs for as long as the channel stays open. Must be called
    /// within a tokio runtime.
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let connected = GameEvent::Connected {
            session_id: session_id.to_string(),
            ts: Utc::now(),
        };
        // Capacity is fresh; this cannot fail.
        let _ = tx.try_send(event_frame(&connected));

        self.subscribers.lock().unwrap().insert(
            session_id.to_string(),
            Subscriber {
                tx: tx.clone(),
                connected_at: Utc::now(),
                overflowed: false,
            },
        );

        // Heartbeat until the subscriber goes away or is replaced.
        let registry = Arc::clone(&self.subscribers);
        let session = session_id.to_string();
        let heartbeat = self.heartbeat;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(heartbeat).await;
                match tx.try_send(HEARTBEAT_FRAME.to_string()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Subscriber is lagging; the heartbeat is droppable.
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        let mut map = registry.lock().unwrap();
                        if map
                            .get(&session)
                            .is_some_and(|s| s.tx.same_channel(&tx))
                        {
                            map.remove(&session);
                            debug!(session = %session, "subscriber disconnected");
                        }
                        break;
                    }
                }
            }
        });

        Subscription {
            session_id: session_id.to_string(),
            rx,
        }
    }

    /// Remove a session's subscriber, closing its channel.
    pub fn disconnect(&self, session_id: &str) {
        self.subscribers.lock().unwrap().remove(session_id);
    }

    /// Whether a subscriber is currently registered.
    pub fn has_subscriber(&self, session_id: &str) -> bool {
        self.subscribers.lock().unwrap().contains_key(session_id)
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for StreamHub {
    fn publish(&self, session_id: &str, event: GameEvent) {
        let mut map = self.subscribers.lock().unwrap();
        let Some(subscriber) = map.get_mut(session_id) else {
            return;
        };

        // A previous drop owes this subscriber one error event.
        if subscriber.overflowed {
            let overflow_error = GameEvent::Error {
                error: "event stream overflow; some events were dropped".to_string(),
            };
            match subscriber.tx.try_send(event_frame(&overflow_error)) {
                Ok(()) => subscriber.overflowed = false,
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    map.remove(session_id);
                    return;
                }
            }
        }

        match subscriber.tx.try_send(event_frame(&event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %session_id, "subscriber buffer full, dropping event");
                subscriber.overflowed = true;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                map.remove(session_id);
            }
        }
    }
}

/// Serialize one event as an SSE data frame.
fn event_frame(event: &GameEvent) -> String {
    // GameEvent serialization cannot fail; all payloads are plain data.
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {json}\n\n")
}
