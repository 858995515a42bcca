//! Connection state ownership.
//!
//! [`ConnectionManager`] is the only component that decides the
//! [`ConnectionState`]. Every transition is broadcast once as a
//! [`ConnectionStateEvent`]; repeated transitions into the current state are
//! swallowed, so consumers never see the same state twice in a row.
//!
//! Each connect attempt opens a new session generation. Work tagged with an
//! older generation is stale and must be ignored by its consumer.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use helios_types::ConnectionState;

use crate::error::{Error, Result};
use crate::events::{EventDispatcher, PanelEvent};
use crate::traits::PanelLink;

/// Why a link went to [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Disconnect was requested locally.
    Requested,
    /// The platform reported the link gone.
    LinkLost,
    /// The connect attempt failed.
    ConnectFailed(String),
    /// The session ended on a fatal error after connecting.
    SessionFailed(String),
}

/// One connection state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStateEvent {
    /// State entered.
    pub state: ConnectionState,
    /// Session generation the transition belongs to.
    pub generation: u64,
    /// Set when `state` is `Disconnected`.
    pub reason: Option<DisconnectReason>,
}

/// Stream of connection state transitions.
pub struct ConnectionEvents {
    inner: BoxStream<'static, ConnectionStateEvent>,
}

impl ConnectionEvents {
    fn new(receiver: broadcast::Receiver<ConnectionStateEvent>) -> Self {
        let inner = futures::stream::unfold(receiver, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Connection event stream lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed();
        Self { inner }
    }
}

impl Stream for ConnectionEvents {
    type Item = ConnectionStateEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for ConnectionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEvents").finish_non_exhaustive()
    }
}

fn state_to_u8(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
        ConnectionState::Disconnecting => 3,
    }
}

fn state_from_u8(value: u8) -> ConnectionState {
    match value {
        1 => ConnectionState::Connecting,
        2 => ConnectionState::Connected,
        3 => ConnectionState::Disconnecting,
        _ => ConnectionState::Disconnected,
    }
}

/// Owns the link and its state.
pub struct ConnectionManager<L: PanelLink> {
    link: Arc<L>,
    state: AtomicU8,
    generation: AtomicU64,
    sender: broadcast::Sender<ConnectionStateEvent>,
    ui: Option<EventDispatcher>,
}

impl<L: PanelLink> ConnectionManager<L> {
    /// Create a manager for `link`, initially disconnected at generation 0.
    pub fn new(link: Arc<L>) -> Self {
        let (sender, _) = broadcast::channel(32);
        Self {
            link,
            state: AtomicU8::new(state_to_u8(ConnectionState::Disconnected)),
            generation: AtomicU64::new(0),
            sender,
            ui: None,
        }
    }

    /// Also report every transition to the UI as
    /// [`PanelEvent::ConnectionStateChanged`].
    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.ui = Some(events);
        self
    }

    /// The managed link.
    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    /// Generation of the current (or most recent) session.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Subscribe to transitions without connecting.
    pub fn subscribe(&self) -> ConnectionEvents {
        ConnectionEvents::new(self.sender.subscribe())
    }

    /// Move to `state`, broadcasting only if it differs from the current one.
    fn transition(&self, state: ConnectionState, reason: Option<DisconnectReason>) -> bool {
        let previous = state_from_u8(self.state.swap(state_to_u8(state), Ordering::AcqRel));
        if previous == state {
            return false;
        }
        let generation = self.generation();
        debug!(%previous, %state, generation, ?reason, "Connection state changed");
        self.emit(ConnectionStateEvent {
            state,
            generation,
            reason,
        });
        true
    }

    fn emit(&self, event: ConnectionStateEvent) {
        if let Some(ui) = &self.ui {
            ui.send(PanelEvent::ConnectionStateChanged {
                state: event.state,
                generation: event.generation,
            });
        }
        let _ = self.sender.send(event);
    }

    /// Start one physical connection attempt.
    ///
    /// The returned stream starts with the `Connecting` transition of this
    /// attempt. On failure the stream (and every other subscriber) sees
    /// `Disconnected` and the error is returned. Calling this while already
    /// connected makes no new attempt.
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.link.address()))]
    pub async fn connect(&self) -> Result<ConnectionEvents> {
        let events = self.subscribe();

        let claimed = self.state.compare_exchange(
            state_to_u8(ConnectionState::Disconnected),
            state_to_u8(ConnectionState::Connecting),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match claimed {
            Ok(_) => {}
            Err(current) if state_from_u8(current) == ConnectionState::Connected => {
                debug!("Already connected");
                return Ok(events);
            }
            Err(current) => {
                return Err(Error::connect_failure(
                    Some(self.link.address().to_string()),
                    format!("cannot connect while {}", state_from_u8(current)),
                ));
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.emit(ConnectionStateEvent {
            state: ConnectionState::Connecting,
            generation,
            reason: None,
        });

        match self.link.connect().await {
            Ok(()) => {
                if self.generation() != generation {
                    // Superseded while the platform was connecting.
                    return Err(Error::Cancelled);
                }
                if self.state() != ConnectionState::Connecting {
                    return Err(Error::connect_failure(
                        Some(self.link.address().to_string()),
                        "link dropped during connect",
                    ));
                }
                info!(generation, "Connected");
                self.transition(ConnectionState::Connected, None);
                Ok(events)
            }
            Err(e) => {
                warn!(generation, error = %e, "Connect failed");
                self.transition(
                    ConnectionState::Disconnected,
                    Some(DisconnectReason::ConnectFailed(e.to_string())),
                );
                Err(match e {
                    Error::ConnectFailure { .. } => e,
                    other => Error::connect_failure(
                        Some(self.link.address().to_string()),
                        other.to_string(),
                    ),
                })
            }
        }
    }

    /// Disconnect intentionally.
    pub async fn disconnect(&self) -> Result<()> {
        self.disconnect_with(DisconnectReason::Requested).await
    }

    /// Disconnect with an explicit reason.
    ///
    /// Does nothing unless the link is connecting or connected. Always ends
    /// in `Disconnected`, even when the platform call fails.
    pub async fn disconnect_with(&self, reason: DisconnectReason) -> Result<()> {
        if !self.state().is_active() {
            return Ok(());
        }
        self.transition(ConnectionState::Disconnecting, None);
        let result = self.link.disconnect().await;
        if let Err(e) = &result {
            warn!(error = %e, "Platform disconnect failed");
        }
        self.transition(ConnectionState::Disconnected, Some(reason));
        result
    }

    /// Record that the platform dropped the link of `generation`.
    ///
    /// Ignored when `generation` is not the current one. Returns whether a
    /// transition was reported.
    pub fn mark_link_lost(&self, generation: u64) -> bool {
        if generation != self.generation() {
            debug!(generation, current = self.generation(), "Ignoring stale link loss");
            return false;
        }
        self.transition(
            ConnectionState::Disconnected,
            Some(DisconnectReason::LinkLost),
        )
    }
}

impl<L: PanelLink> std::fmt::Debug for ConnectionManager<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.link.address())
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish()
    }
}
