//! The panel over a real Bluetooth Low Energy link.
//!
//! [`BlePanel`] implements [`PanelLink`] on top of btleplug. Link loss and
//! notifications are forwarded from background tasks into a broadcast
//! channel so the session driver can watch them alongside its own requests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use helios_types::RemoteService;

use crate::error::{Error, Result};
use crate::scan::{DeviceSelector, create_identifier, find_panel, format_peripheral_id};
use crate::traits::{LinkEvent, PanelLink};

/// Timeouts for BLE operations.
///
/// Every timeout is optional. Unset means the platform stack decides when a
/// stuck operation fails.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use helios_core::device::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .operation_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Timeout for establishing the link.
    pub connection_timeout: Option<Duration>,
    /// Timeout for service discovery.
    pub discovery_timeout: Option<Duration>,
    /// Timeout for a single read or write.
    pub operation_timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// Create a new config relying on platform timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Set the discovery timeout.
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    /// Set the per-operation timeout.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

async fn bounded<T, F>(limit: Option<Duration>, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, btleplug::Error>>,
{
    match limit {
        Some(duration) => timeout(duration, fut)
            .await
            .map_err(|_| Error::timeout(operation, duration))?
            .map_err(Error::from),
        None => fut.await.map_err(Error::from),
    }
}

fn is_link_error(err: &Error) -> bool {
    matches!(
        err,
        Error::NotConnected | Error::Bluetooth(btleplug::Error::NotConnected)
    )
}

/// Direction of a characteristic access, used to label its failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl Access {
    fn failure(self, uuid: Uuid, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        match self {
            Access::Read => Error::ReadFailure { uuid, reason },
            Access::Write => Error::WriteFailure { uuid, reason },
        }
    }

    /// Link errors become [`Error::NotConnected`] and timeouts pass through.
    fn classify(self, uuid: Uuid, err: Error) -> Error {
        match err {
            e if is_link_error(&e) => Error::NotConnected,
            e @ Error::Timeout { .. } => e,
            e => self.failure(uuid, e.to_string()),
        }
    }
}

/// A Helios panel reachable over BLE.
///
/// # Cleanup
///
/// Call [`PanelLink::disconnect`] before dropping the panel. Dropping a
/// connected panel logs a warning and disconnects in the background.
pub struct BlePanel {
    /// Kept alive for the lifetime of the peripheral.
    #[allow(dead_code)]
    adapter: Adapter,
    peripheral: Peripheral,
    name: Option<String>,
    address: String,
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
    events: broadcast::Sender<LinkEvent>,
    /// Adapter event watcher, alive as long as the panel.
    watcher: JoinHandle<()>,
    /// Notification forwarders, one per connection.
    notification_tasks: Mutex<Vec<JoinHandle<()>>>,
    disconnected: AtomicBool,
    config: ConnectionConfig,
}

impl std::fmt::Debug for BlePanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlePanel")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BlePanel {
    /// Locate the panel and wrap it, without connecting.
    #[tracing::instrument(level = "info", skip_all, fields(selector = %selector))]
    pub async fn find(
        selector: &DeviceSelector,
        scan_timeout: Duration,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let (adapter, peripheral) = find_panel(selector, scan_timeout).await?;
        Self::from_peripheral(adapter, peripheral, config).await
    }

    /// Wrap an already discovered peripheral, without connecting.
    pub async fn from_peripheral(
        adapter: Adapter,
        peripheral: Peripheral,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let properties = peripheral.properties().await?;
        let name = properties.as_ref().and_then(|p| p.local_name.clone());
        // On macOS the address may be all zeros, so fall back to the peripheral ID
        let address = properties
            .as_ref()
            .map(|p| create_identifier(&p.address.to_string(), &peripheral.id()))
            .unwrap_or_else(|| format_peripheral_id(&peripheral.id()));

        let (events, _) = broadcast::channel(64);
        let watcher = {
            let mut adapter_events = adapter.events().await?;
            let id = peripheral.id();
            let sender = events.clone();
            let address = address.clone();
            tokio::spawn(async move {
                while let Some(event) = adapter_events.next().await {
                    if let CentralEvent::DeviceDisconnected(disconnected) = event
                        && disconnected == id
                    {
                        debug!(%address, "Platform reported disconnect");
                        let _ = sender.send(LinkEvent::Disconnected);
                    }
                }
            })
        };

        Ok(Self {
            adapter,
            peripheral,
            name,
            address,
            characteristics: RwLock::new(HashMap::new()),
            events,
            watcher,
            notification_tasks: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(true),
            config,
        })
    }

    /// The timeouts in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn find_characteristic(&self, uuid: Uuid, access: Access) -> Result<Characteristic> {
        if let Some(characteristic) = self.characteristics.read().await.get(&uuid) {
            return Ok(characteristic.clone());
        }
        // Discovery may not have gone through this handle.
        self.peripheral
            .services()
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or_else(|| access.failure(uuid, "characteristic not discovered"))
    }

    async fn start_notifications(&self) -> Result<()> {
        let mut stream = self.peripheral.notifications().await?;
        let sender = self.events.clone();
        let handle = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let _ = sender.send(LinkEvent::Notification {
                    characteristic: notification.uuid,
                    value: notification.value,
                });
            }
        });
        self.notification_tasks.lock().await.push(handle);
        Ok(())
    }

    async fn stop_notifications(&self) {
        let mut handles = self.notification_tasks.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl PanelLink for BlePanel {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address))]
    async fn connect(&self) -> Result<()> {
        info!("Connecting to panel...");
        bounded(
            self.config.connection_timeout,
            "connect to panel",
            self.peripheral.connect(),
        )
        .await
        .map_err(|e| Error::connect_failure(Some(self.address.clone()), e.to_string()))?;
        self.disconnected.store(false, Ordering::SeqCst);

        self.stop_notifications().await;
        self.start_notifications().await?;
        info!("Connected!");
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address))]
    async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from panel...");
        self.disconnected.store(true, Ordering::SeqCst);
        self.stop_notifications().await;
        self.characteristics.write().await.clear();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<RemoteService>> {
        bounded(
            self.config.discovery_timeout,
            "discover services",
            self.peripheral.discover_services(),
        )
        .await?;

        let services = self.peripheral.services();
        let mut cache = HashMap::new();
        let mut remote = Vec::with_capacity(services.len());
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for characteristic in &service.characteristics {
                debug!("    Characteristic: {}", characteristic.uuid);
                cache.insert(characteristic.uuid, characteristic.clone());
            }
            remote.push(RemoteService::new(
                service.uuid,
                service.characteristics.iter().map(|c| c.uuid),
            ));
        }
        *self.characteristics.write().await = cache;
        Ok(remote)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let target = self.find_characteristic(characteristic, Access::Read).await?;
        self.peripheral.subscribe(&target).await?;
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let target = self.find_characteristic(characteristic, Access::Read).await?;
        let operation = format!("read characteristic {}", characteristic);
        bounded(
            self.config.operation_timeout,
            &operation,
            self.peripheral.read(&target),
        )
        .await
        .map_err(|e| Access::Read.classify(characteristic, e))
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        let target = self.find_characteristic(characteristic, Access::Write).await?;
        let operation = format!("write characteristic {}", characteristic);
        bounded(
            self.config.operation_timeout,
            &operation,
            self.peripheral
                .write(&target, value, WriteType::WithResponse),
        )
        .await
        .map_err(|e| Access::Write.classify(characteristic, e))
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}

impl Drop for BlePanel {
    fn drop(&mut self) {
        self.watcher.abort();
        if let Ok(mut handles) = self.notification_tasks.try_lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }

        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(
            address = %self.address,
            "BlePanel dropped without calling disconnect() - performing best-effort cleanup"
        );

        let peripheral = self.peripheral.clone();
        let address = self.address.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(%address, error = %e, "Best-effort disconnect failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_defaults_to_platform() {
        let config = ConnectionConfig::default();
        assert!(config.connection_timeout.is_none());
        assert!(config.discovery_timeout.is_none());
        assert!(config.operation_timeout.is_none());
    }

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new()
            .connection_timeout(Duration::from_secs(15))
            .operation_timeout(Duration::from_secs(2));
        assert_eq!(config.connection_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_link_error_classification() {
        assert!(is_link_error(&Error::NotConnected));
        assert!(is_link_error(&Error::Bluetooth(btleplug::Error::NotConnected)));
        assert!(!is_link_error(&Error::LinkLost));
    }

    #[test]
    fn test_write_failures_are_labelled_as_writes() {
        let uuid = helios_types::uuid::POWER_COMMAND;
        assert!(matches!(
            Access::Write.failure(uuid, "characteristic not discovered"),
            Error::WriteFailure { uuid: u, .. } if u == uuid
        ));
        assert!(matches!(
            Access::Write.classify(uuid, Error::Bluetooth(btleplug::Error::NotSupported("write".into()))),
            Error::WriteFailure { .. }
        ));
        assert!(matches!(
            Access::Read.failure(uuid, "characteristic not discovered"),
            Error::ReadFailure { .. }
        ));
    }

    #[test]
    fn test_classify_keeps_link_loss_and_timeouts() {
        let uuid = helios_types::uuid::READING_A;
        assert!(matches!(
            Access::Write.classify(uuid, Error::Bluetooth(btleplug::Error::NotConnected)),
            Error::NotConnected
        ));
        assert!(matches!(
            Access::Read.classify(uuid, Error::timeout("read", Duration::from_secs(1))),
            Error::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<()> = bounded(
            Some(Duration::from_millis(10)),
            "slow op",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_bounded_without_limit() {
        let result: Result<u8> = bounded(None, "fast op", async { Ok(3) }).await;
        assert_eq!(result.unwrap(), 3);
    }
}
