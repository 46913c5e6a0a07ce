//! Per-request progress broadcasting.
//!
//! A parallel channel keyed by request id: workers emit lifecycle events
//! (plus a `Chunk` event per arrived LLM delta) and outside consumers —
//! e.g. a streaming HTTP endpoint — subscribe per request. Events reach
//! each subscriber in emission order; the channel is torn down after a
//! terminal event.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::request::RequestId;

/// Default per-request event buffer.
const DEFAULT_CAPACITY: usize = 256;

/// One progress event.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "UPPERCASE")]
pub enum StatusEvent {
    Queued,
    Started,
    /// An LLM delta arrived. Purely informational for live UX.
    Chunk { text: String },
    Completed,
    Failed { error: String },
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusEvent::Completed | StatusEvent::Failed { .. })
    }
}

/// Status channel registry.
#[derive(Debug)]
pub struct StatusChannel {
    capacity: usize,
    senders: Mutex<HashMap<RequestId, broadcast::Sender<StatusEvent>>>,
}

impl StatusChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a request's events.
    ///
    /// Events emitted before the subscription are not replayed; the
    /// persisted result record covers late readers.
    pub fn subscribe(&self, request_id: RequestId) -> broadcast::Receiver<StatusEvent> {
        let mut senders = self.senders.lock().unwrap();
        senders
            .entry(request_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Emit an event for a request. A terminal event removes the channel.
    ///
    /// Events for requests with no channel (nobody ever subscribed) are
    /// dropped: broadcast channels do not replay, so there is nothing to
    /// buffer for.
    pub fn emit(&self, request_id: RequestId, event: StatusEvent) {
        let mut senders = self.senders.lock().unwrap();
        let terminal = event.is_terminal();
        if let Some(sender) = senders.get(&request_id) {
            // Send errors just mean nobody is listening right now.
            let _ = sender.send(event);
        }
        if terminal {
            senders.remove(&request_id);
        }
    }

    /// Number of live channels. For observability.
    pub fn live_channels(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let channel = StatusChannel::default();
        let id = RequestId::new();
        let mut rx = channel.subscribe(id);

        channel.emit(id, StatusEvent::Queued);
        channel.emit(id, StatusEvent::Started);
        channel.emit(
            id,
            StatusEvent::Chunk {
                text: "token".into(),
            },
        );
        channel.emit(id, StatusEvent::Completed);

        assert_eq!(rx.recv().await.unwrap(), StatusEvent::Queued);
        assert_eq!(rx.recv().await.unwrap(), StatusEvent::Started);
        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::Chunk {
                text: "token".into()
            }
        );
        assert_eq!(rx.recv().await.unwrap(), StatusEvent::Completed);
    }

    #[tokio::test]
    async fn channels_are_isolated_per_request() {
        let channel = StatusChannel::default();
        let a = RequestId::new();
        let b = RequestId::new();
        let mut rx_a = channel.subscribe(a);
        let mut rx_b = channel.subscribe(b);

        channel.emit(a, StatusEvent::Queued);
        channel.emit(b, StatusEvent::Started);

        assert_eq!(rx_a.recv().await.unwrap(), StatusEvent::Queued);
        assert_eq!(rx_b.recv().await.unwrap(), StatusEvent::Started);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_events() {
        let channel = StatusChannel::default();
        let id = RequestId::new();
        let mut rx1 = channel.subscribe(id);
        let mut rx2 = channel.subscribe(id);

        channel.emit(id, StatusEvent::Started);

        assert_eq!(rx1.recv().await.unwrap(), StatusEvent::Started);
        assert_eq!(rx2.recv().await.unwrap(), StatusEvent::Started);
    }

    #[tokio::test]
    async fn terminal_event_tears_down_channel() {
        let channel = StatusChannel::default();
        let id = RequestId::new();
        let _rx = channel.subscribe(id);
        assert_eq!(channel.live_channels(), 1);

        channel.emit(
            id,
            StatusEvent::Failed {
                error: "boom".into(),
            },
        );
        assert_eq!(channel.live_channels(), 0);
    }

    #[tokio::test]
    async fn emit_without_subscriber_creates_no_channel() {
        let channel = StatusChannel::default();
        let id = RequestId::new();
        channel.emit(id, StatusEvent::Queued);
        channel.emit(id, StatusEvent::Completed);
        assert_eq!(channel.live_channels(), 0);
    }

    #[tokio::test]
    async fn late_subscriber_catches_subsequent_events() {
        let channel = StatusChannel::default();
        let id = RequestId::new();
        // Emitted before anyone subscribed: dropped.
        channel.emit(id, StatusEvent::Queued);

        let mut rx = channel.subscribe(id);
        channel.emit(id, StatusEvent::Started);
        assert_eq!(rx.recv().await.unwrap(), StatusEvent::Started);
    }

    #[test]
    fn serialization_shape() {
        let event = StatusEvent::Failed {
            error: "x".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"FAILED","error":"x"}"#);
        assert_eq!(
            serde_json::to_string(&StatusEvent::Queued).unwrap(),
            r#"{"event":"QUEUED"}"#
        );
    }
}
