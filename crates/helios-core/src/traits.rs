//! Trait abstraction for the panel's radio link.
//!
//! This module provides the [`PanelLink`] trait that abstracts over the
//! btleplug-backed [`crate::BlePanel`] and the in-memory
//! [`crate::MockPanel`] used in tests. Every component above this seam
//! (connection manager, resolver, subscriber, session driver) is generic
//! over it.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use helios_types::RemoteService;

use crate::error::Result;

/// Asynchronous events raised by the link itself, outside any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The platform reported the link is gone.
    Disconnected,
    /// An unsolicited value change on a subscribed characteristic.
    Notification {
        /// The characteristic that changed.
        characteristic: Uuid,
        /// The new raw value.
        value: Vec<u8>,
    },
}

/// The radio link to one Helios panel.
///
/// Implementations must tolerate being driven by a single caller that keeps
/// at most one read, write or discovery outstanding at a time; they are not
/// required to queue concurrent requests.
///
/// # Example
///
/// ```ignore
/// use helios_core::{PanelLink, Result};
///
/// async fn first_service<L: PanelLink>(link: &L) -> Result<()> {
///     link.connect().await?;
///     let services = link.discover_services().await?;
///     println!("{} services", services.len());
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait PanelLink: Send + Sync {
    /// Hardware address (or platform identifier on macOS).
    fn address(&self) -> &str;

    /// Advertised or bonded name, if known.
    fn name(&self) -> Option<&str>;

    /// Whether the platform believes the link is up.
    async fn is_connected(&self) -> bool;

    /// Establish the link. Completes once the platform confirms it.
    async fn connect(&self) -> Result<()>;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<()>;

    /// Discover services and their characteristics, in platform order.
    async fn discover_services(&self) -> Result<Vec<RemoteService>>;

    /// Enable change notifications on one characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Read one characteristic value.
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Write one characteristic value, with response.
    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()>;

    /// Subscribe to link events (disconnects and notifications).
    fn link_events(&self) -> broadcast::Receiver<LinkEvent>;
}
