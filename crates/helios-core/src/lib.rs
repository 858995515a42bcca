//! BLE GATT session core for the Helios solar panel.
//!
//! This crate keeps a Bluetooth Low Energy session with one Helios panel and
//! turns it into a stream of decoded field values for a user interface. It
//! owns the connection lifecycle, service discovery, notification setup, a
//! round-robin polling schedule, and the hand-off of user commands to the
//! panel.
//!
//! # Features
//!
//! - **Device resolution**: Find the panel by bonded name or fixed address
//! - **Connection lifecycle**: Observable state transitions with session generations
//! - **Service resolution**: Target service picked by UUID, with an optional index fallback
//! - **Polling**: Every characteristic read in turn, one GATT operation at a time
//! - **Commands**: Latest-wins command slots written when their field comes up
//! - **Auto-reconnection**: Configurable backoff between sessions
//! - **Testing**: An in-memory [`MockPanel`] behind the same [`PanelLink`] trait
//!
//! # Architecture
//!
//! ```text
//! UI ── CommandQueue ──▶ PollingScheduler ◀── SchedulerEvent ── PanelSession
//!  ▲                                    │                            │
//!  └──────── PanelEvent ◀── Emit ───────┘        ConnectionManager ──┤
//!                                                ServiceResolver ────┤
//!                                                NotificationSubscriber
//!                                                            │
//!                                                        PanelLink
//!                                                (BlePanel / MockPanel)
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use helios_core::{BlePanel, ConnectionConfig, DeviceSelector, PanelEvent, PanelSession,
//!     ReconnectOptions, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let selector = DeviceSelector::parse("Helios Panel");
//!     let panel = BlePanel::find(&selector, Duration::from_secs(10), ConnectionConfig::default())
//!         .await?;
//!
//!     let session = Arc::new(PanelSession::new(Arc::new(panel), SessionOptions::default()));
//!     let mut events = session.subscribe();
//!
//!     let runner = Arc::clone(&session);
//!     tokio::spawn(async move { runner.run(&ReconnectOptions::default()).await });
//!
//!     while let Ok(event) = events.recv().await {
//!         if let PanelEvent::FieldUpdate(update) = event {
//!             println!("{}: {}", update.field, update.value);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod mock;
pub mod reconnect;
pub mod resolver;
pub mod scan;
pub mod scheduler;
pub mod session;
pub mod subscriber;
pub mod traits;

// Core exports
pub use device::{BlePanel, ConnectionConfig};
pub use error::{DeviceNotFoundReason, Error, Result};
pub use session::{PanelSession, SessionEnd, SessionOptions};
pub use traits::{LinkEvent, PanelLink};

pub use commands::CommandQueue;
pub use config::{Config, ConfigError, ValidationError, default_config_path};
pub use connection::{ConnectionEvents, ConnectionManager, ConnectionStateEvent, DisconnectReason};
pub use events::{
    EventDispatcher, EventReceiver, EventSender, PanelEvent, PanelListener, dispatch,
    forward_events,
};
pub use heartbeat::Heartbeat;
pub use mock::{MockOp, MockPanel, MockPanelBuilder};
pub use reconnect::ReconnectOptions;
pub use resolver::{ResolvedService, ServiceResolver, ServiceSelector};
pub use scan::{Candidate, DeviceSelector, find_panel, get_adapter, select_unique};
pub use scheduler::{
    Characteristic, PollingScheduler, SchedulerAction, SchedulerEvent, SchedulerState,
    SessionStats,
};
pub use subscriber::{NotificationSubscriber, SubscriptionReport};

// Re-export from helios-types
pub use helios_types;
pub use helios_types::{ConnectionState, FieldTag, FieldUpdate, RemoteService, UpdateOrigin};
