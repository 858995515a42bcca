//! Periodic liveness reports.
//!
//! The heartbeat only reads the connection manager's state and publishes a
//! [`PanelEvent::Heartbeat`]. It never touches the link, so it cannot break
//! the one-operation-at-a-time rule of the polling loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection::ConnectionManager;
use crate::events::{EventDispatcher, PanelEvent};
use crate::traits::PanelLink;

/// A running heartbeat task.
#[derive(Debug)]
pub struct Heartbeat {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl Heartbeat {
    /// Start ticking every `period`.
    ///
    /// The task stops when `parent` is cancelled or [`Heartbeat::stop`] is
    /// called.
    pub fn spawn<L: PanelLink + 'static>(
        connection: Arc<ConnectionManager<L>>,
        events: EventDispatcher,
        period: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel_token = parent.child_token();
        let task_token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Heartbeat cancelled, stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let generation = connection.generation();
                        let state = connection.state();
                        trace!(generation, %state, "Heartbeat");
                        events.send(PanelEvent::Heartbeat { generation, state });
                    }
                }
            }
        });

        Self {
            handle,
            cancel_token,
        }
    }

    /// Stop the heartbeat.
    pub fn stop(self) {
        self.cancel_token.cancel();
    }

    /// Whether the task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPanel;
    use helios_types::ConnectionState;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ticks_without_gatt_traffic() {
        let panel = Arc::new(MockPanel::helios());
        let connection = Arc::new(ConnectionManager::new(Arc::clone(&panel)));
        let events = EventDispatcher::new(16);
        let mut rx = events.subscribe();
        let root = CancellationToken::new();

        let heartbeat = Heartbeat::spawn(
            Arc::clone(&connection),
            events.clone(),
            Duration::from_secs(1),
            &root,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            PanelEvent::Heartbeat {
                generation: 0,
                state: ConnectionState::Disconnected
            }
        );
        assert!(panel.ops().is_empty());

        heartbeat.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_heartbeat() {
        let connection = Arc::new(ConnectionManager::new(Arc::new(MockPanel::helios())));
        let root = CancellationToken::new();
        let heartbeat = Heartbeat::spawn(
            connection,
            EventDispatcher::default(),
            Duration::from_secs(1),
            &root,
        );

        root.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!heartbeat.is_active());
    }
}
