//! Panel event system for the UI collaborator.
//!
//! The session core never renders anything. It reports decoded field values
//! and connection-state changes as [`PanelEvent`]s on a broadcast channel;
//! a UI subscribes to that channel directly or implements
//! [`PanelListener`] and hands it to [`forward_events`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use helios_types::{ConnectionState, FieldTag, FieldUpdate};

/// Events emitted by a panel session.
///
/// All events are serializable for logging and IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum PanelEvent {
    /// A field value was decoded.
    FieldUpdate(FieldUpdate),
    /// The connection state changed.
    ConnectionStateChanged {
        /// The new state.
        state: ConnectionState,
        /// Session generation the transition belongs to.
        generation: u64,
    },
    /// Periodic liveness report. Carries no radio traffic.
    Heartbeat {
        /// Current session generation.
        generation: u64,
        /// Current connection state.
        state: ConnectionState,
    },
    /// A session-level failure, reported alongside the state change.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// Consumer side of the UI collaborator interface.
pub trait PanelListener: Send {
    /// A decoded field value arrived.
    fn on_field_update(&mut self, field: FieldTag, value: i32);

    /// The connection state changed.
    fn on_connection_state_changed(&mut self, state: ConnectionState);

    /// Optional liveness tick.
    fn on_heartbeat(&mut self, _generation: u64) {}

    /// Optional session failure report.
    fn on_error(&mut self, _message: &str) {}
}

/// Sender for panel events.
pub type EventSender = broadcast::Sender<PanelEvent>;

/// Receiver for panel events.
pub type EventReceiver = broadcast::Receiver<PanelEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: PanelEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Dispatch one event to a listener.
pub fn dispatch<L: PanelListener + ?Sized>(listener: &mut L, event: &PanelEvent) {
    match event {
        PanelEvent::FieldUpdate(update) => listener.on_field_update(update.field, update.value),
        PanelEvent::ConnectionStateChanged { state, .. } => {
            listener.on_connection_state_changed(*state)
        }
        PanelEvent::Heartbeat { generation, .. } => listener.on_heartbeat(*generation),
        PanelEvent::Error { message } => listener.on_error(message),
    }
}

/// Drive a listener from a receiver until the channel closes.
///
/// Lagging receivers skip the events they missed and keep going.
pub async fn forward_events<L: PanelListener + ?Sized>(
    mut receiver: EventReceiver,
    listener: &mut L,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => dispatch(listener, &event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event listener lagged, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        fields: Vec<(FieldTag, i32)>,
        states: Vec<ConnectionState>,
        errors: Vec<String>,
    }

    impl PanelListener for Recorder {
        fn on_field_update(&mut self, field: FieldTag, value: i32) {
            self.fields.push((field, value));
        }

        fn on_connection_state_changed(&mut self, state: ConnectionState) {
            self.states.push(state);
        }

        fn on_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
    }

    #[test]
    fn test_dispatch() {
        let mut rec = Recorder::default();
        dispatch(
            &mut rec,
            &PanelEvent::FieldUpdate(FieldUpdate::polled(FieldTag::ReadingC, 9)),
        );
        dispatch(
            &mut rec,
            &PanelEvent::ConnectionStateChanged {
                state: ConnectionState::Connected,
                generation: 1,
            },
        );
        dispatch(
            &mut rec,
            &PanelEvent::Error {
                message: "gone".to_string(),
            },
        );
        assert_eq!(rec.fields, vec![(FieldTag::ReadingC, 9)]);
        assert_eq!(rec.states, vec![ConnectionState::Connected]);
        assert_eq!(rec.errors, vec!["gone".to_string()]);
    }

    #[tokio::test]
    async fn test_forward_events_until_closed() {
        let dispatcher = EventDispatcher::new(8);
        let rx = dispatcher.subscribe();
        dispatcher.send(PanelEvent::FieldUpdate(FieldUpdate::polled(
            FieldTag::PowerLevel,
            40,
        )));
        drop(dispatcher);

        let mut rec = Recorder::default();
        forward_events(rx, &mut rec).await;
        assert_eq!(rec.fields, vec![(FieldTag::PowerLevel, 40)]);
    }

    #[test]
    fn test_event_serialization() {
        let event = PanelEvent::ConnectionStateChanged {
            state: ConnectionState::Connecting,
            generation: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"connection_state_changed\""));
        assert!(json.contains("\"connecting\""));
    }

    #[test]
    fn test_send_without_receivers() {
        let dispatcher = EventDispatcher::default();
        assert_eq!(dispatcher.receiver_count(), 0);
        dispatcher.send(PanelEvent::Error {
            message: "nobody listening".to_string(),
        });
    }
}
