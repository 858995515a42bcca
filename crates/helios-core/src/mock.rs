//! Mock panel implementation for testing.
//!
//! This module provides an in-memory panel that can be used for unit testing
//! without requiring actual BLE hardware.
//!
//! The [`MockPanel`] implements the [`PanelLink`] trait, allowing it to be
//! used interchangeably with a real [`crate::BlePanel`] in generic code.
//!
//! # Features
//!
//! - **Failure injection**: fail connects, or the next N reads or writes of a
//!   characteristic
//! - **Latency simulation**: delay every GATT operation
//! - **Operation log**: every call is recorded as a [`MockOp`]
//! - **Scripted disconnects**: drop the link while the Nth operation is in
//!   flight, then complete that operation late

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use helios_types::uuid::{
    GAP_SERVICE, GATT_SERVICE, HELIOS_SERVICE, POWER_COMMAND, POWER_LEVEL, READING_A, READING_B,
    READING_C, READING_D, SEARCH_COMMAND,
};
use helios_types::{FieldTag, RemoteService};

use crate::error::{Error, Result};
use crate::traits::{LinkEvent, PanelLink};

/// One recorded call on a [`MockPanel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    /// `connect`
    Connect,
    /// `disconnect`
    Disconnect,
    /// `discover_services`
    Discover,
    /// `subscribe`
    Subscribe(Uuid),
    /// `read`
    Read(Uuid),
    /// `write`
    Write(Uuid, Vec<u8>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mock Helios panel for testing.
///
/// # Example
///
/// ```
/// use helios_core::{MockPanel, PanelLink};
/// use helios_types::uuid::READING_A;
///
/// #[tokio::main]
/// async fn main() {
///     let panel = MockPanel::helios();
///     panel.connect().await.unwrap();
///     let value = panel.read(READING_A).await.unwrap();
///     assert_eq!(value, vec![10]);
/// }
/// ```
pub struct MockPanel {
    name: String,
    address: String,
    connected: AtomicBool,
    services: Vec<RemoteService>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    ops: Mutex<Vec<MockOp>>,
    events: broadcast::Sender<LinkEvent>,
    connect_failure: Mutex<Option<String>>,
    /// Connect attempts to fail before succeeding.
    remaining_connect_failures: AtomicU32,
    read_failures: Mutex<HashMap<Uuid, u32>>,
    write_failures: Mutex<HashMap<Uuid, u32>>,
    refused_subscriptions: Mutex<HashSet<Uuid>>,
    /// Simulated GATT latency in milliseconds (0 = no delay).
    op_latency_ms: AtomicU64,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    /// Read/write operations left before the scripted link loss (0 = none).
    disconnect_countdown: AtomicU32,
    /// Delay before an operation interrupted by the scripted link loss completes.
    late_completion_ms: AtomicU64,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl std::fmt::Debug for MockPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPanel")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("services", &self.services.len())
            .finish()
    }
}

impl MockPanel {
    /// A panel laid out like the shipped firmware.
    ///
    /// Services in discovery order: GAP, GATT, then the Helios service with
    /// the four readings, power level and both toggles. Readings start at
    /// 10, 20, 30 and 40, power at 55, toggles at 0.
    pub fn helios() -> Self {
        MockPanelBuilder::new().build()
    }

    /// Start building a custom panel.
    pub fn builder() -> MockPanelBuilder {
        MockPanelBuilder::new()
    }

    /// Mark the link up without going through `connect`.
    pub fn connect_now(&self) {
        self.connected.store(true, Ordering::Relaxed);
    }

    /// Check if connected.
    pub fn is_connected_sync(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Services this panel reports.
    pub fn services(&self) -> &[RemoteService] {
        &self.services
    }

    /// Set the raw value of a characteristic.
    pub fn set_value(&self, characteristic: Uuid, value: &[u8]) {
        lock(&self.values).insert(characteristic, value.to_vec());
    }

    /// Current raw value of a characteristic.
    pub fn value(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        lock(&self.values).get(&characteristic).cloned()
    }

    /// Fail every connect with `reason` until cleared with `None`.
    pub fn set_connect_failure(&self, reason: Option<String>) {
        *lock(&self.connect_failure) = reason;
    }

    /// Fail the next `count` connect attempts, then succeed.
    pub fn set_transient_connect_failures(&self, count: u32) {
        self.remaining_connect_failures
            .store(count, Ordering::Relaxed);
    }

    /// Fail the next `count` reads of `characteristic`.
    pub fn fail_reads(&self, characteristic: Uuid, count: u32) {
        lock(&self.read_failures).insert(characteristic, count);
    }

    /// Fail the next `count` writes to `characteristic`.
    pub fn fail_writes(&self, characteristic: Uuid, count: u32) {
        lock(&self.write_failures).insert(characteristic, count);
    }

    /// Refuse notifications on `characteristic`.
    pub fn refuse_subscribe(&self, characteristic: Uuid) {
        lock(&self.refused_subscriptions).insert(characteristic);
    }

    /// Set simulated GATT operation latency.
    pub fn set_op_latency(&self, latency: Duration) {
        self.op_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Set simulated connect latency.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Drop the link while the `nth` next read or write is in flight.
    ///
    /// The interrupted operation still completes, `late` after the link
    /// event, returning the value it would have returned. This mirrors a
    /// platform callback that fires after the disconnect.
    pub fn disconnect_during_op(&self, nth: u32, late: Duration) {
        self.disconnect_countdown.store(nth, Ordering::Relaxed);
        self.late_completion_ms
            .store(late.as_millis() as u64, Ordering::Relaxed);
    }

    /// Simulate the platform reporting the link gone.
    pub fn trigger_disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        let _ = self.events.send(LinkEvent::Disconnected);
    }

    /// Simulate a late platform report about an earlier link: emits
    /// `Disconnected` without touching the current connection.
    pub fn report_stale_disconnect(&self) {
        let _ = self.events.send(LinkEvent::Disconnected);
    }

    /// Simulate an unsolicited notification.
    pub fn notify(&self, characteristic: Uuid, value: &[u8]) {
        self.set_value(characteristic, value);
        let _ = self.events.send(LinkEvent::Notification {
            characteristic,
            value: value.to_vec(),
        });
    }

    /// Every call made so far.
    pub fn ops(&self) -> Vec<MockOp> {
        lock(&self.ops).clone()
    }

    /// Clear the operation log.
    pub fn clear_ops(&self) {
        lock(&self.ops).clear();
    }

    fn count(&self, pred: impl Fn(&MockOp) -> bool) -> usize {
        lock(&self.ops).iter().filter(|op| pred(op)).count()
    }

    /// Number of connect calls.
    pub fn connect_count(&self) -> usize {
        self.count(|op| matches!(op, MockOp::Connect))
    }

    /// Number of discovery calls.
    pub fn discover_count(&self) -> usize {
        self.count(|op| matches!(op, MockOp::Discover))
    }

    /// Number of subscribe calls.
    pub fn subscribe_count(&self) -> usize {
        self.count(|op| matches!(op, MockOp::Subscribe(_)))
    }

    /// Number of read calls.
    pub fn read_count(&self) -> usize {
        self.count(|op| matches!(op, MockOp::Read(_)))
    }

    /// Writes made so far, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        lock(&self.ops)
            .iter()
            .filter_map(|op| match op {
                MockOp::Write(uuid, value) => Some((*uuid, value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Highest number of reads and writes ever outstanding at once.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::Relaxed)
    }

    fn record(&self, op: MockOp) {
        lock(&self.ops).push(op);
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn take_failure(map: &Mutex<HashMap<Uuid, u32>>, characteristic: Uuid) -> bool {
        let mut map = lock(map);
        match map.get_mut(&characteristic) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Run the shared part of a read or write: latency, scripted loss,
    /// and the single-outstanding-operation bookkeeping.
    async fn gatt_op(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
        // Also released when the caller drops the operation mid-flight.
        let _in_flight = InFlight(&self.in_flight);

        let latency = self.op_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        } else {
            tokio::task::yield_now().await;
        }

        let countdown = self.disconnect_countdown.load(Ordering::Relaxed);
        if countdown > 0 {
            self.disconnect_countdown
                .store(countdown - 1, Ordering::Relaxed);
            if countdown == 1 {
                self.trigger_disconnect();
                let late = self.late_completion_ms.load(Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(late)).await;
            }
        }
    }
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl PanelLink for MockPanel {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    async fn is_connected(&self) -> bool {
        self.is_connected_sync()
    }

    async fn connect(&self) -> Result<()> {
        self.record(MockOp::Connect);

        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.remaining_connect_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_connect_failures
                .fetch_sub(1, Ordering::Relaxed);
            return Err(Error::connect_failure(
                Some(self.address.clone()),
                "transient mock failure",
            ));
        }
        if let Some(reason) = lock(&self.connect_failure).clone() {
            return Err(Error::connect_failure(Some(self.address.clone()), reason));
        }

        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(MockOp::Disconnect);
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<RemoteService>> {
        self.check_connected()?;
        self.record(MockOp::Discover);
        Ok(self.services.clone())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        self.check_connected()?;
        self.record(MockOp::Subscribe(characteristic));
        if lock(&self.refused_subscriptions).contains(&characteristic) {
            return Err(Error::InvalidData(format!(
                "characteristic {} does not support notify",
                characteristic
            )));
        }
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        self.check_connected()?;
        self.record(MockOp::Read(characteristic));
        let value = self.value(characteristic);
        self.gatt_op().await;

        if Self::take_failure(&self.read_failures, characteristic) {
            return Err(Error::ReadFailure {
                uuid: characteristic,
                reason: "injected failure".to_string(),
            });
        }
        value.ok_or_else(|| Error::ReadFailure {
            uuid: characteristic,
            reason: "unknown characteristic".to_string(),
        })
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        self.check_connected()?;
        self.record(MockOp::Write(characteristic, value.to_vec()));
        self.gatt_op().await;

        if Self::take_failure(&self.write_failures, characteristic) {
            return Err(Error::WriteFailure {
                uuid: characteristic,
                reason: "injected failure".to_string(),
            });
        }
        self.set_value(characteristic, value);
        Ok(())
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}

/// Builder for creating mock panels with custom settings.
#[derive(Debug, Clone)]
pub struct MockPanelBuilder {
    name: String,
    address: String,
    services: Vec<RemoteService>,
    values: HashMap<Uuid, Vec<u8>>,
    auto_connect: bool,
}

impl Default for MockPanelBuilder {
    fn default() -> Self {
        let characteristics = [
            READING_A,
            READING_B,
            READING_C,
            READING_D,
            POWER_LEVEL,
            POWER_COMMAND,
            SEARCH_COMMAND,
        ];
        let values = [
            (READING_A, 10),
            (READING_B, 20),
            (READING_C, 30),
            (READING_D, 40),
            (POWER_LEVEL, 55),
            (POWER_COMMAND, 0),
            (SEARCH_COMMAND, 0),
        ]
        .into_iter()
        .map(|(uuid, v)| (uuid, vec![v]))
        .collect();

        Self {
            name: "Helios Panel".to_string(),
            address: "98:4F:EE:10:AB:C3".to_string(),
            services: vec![
                RemoteService::new(GAP_SERVICE, []),
                RemoteService::new(GATT_SERVICE, []),
                RemoteService::new(HELIOS_SERVICE, characteristics),
            ],
            values,
            auto_connect: false,
        }
    }
}

impl MockPanelBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the panel name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the panel address.
    #[must_use]
    pub fn address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    /// Replace the reported services.
    #[must_use]
    pub fn services(mut self, services: Vec<RemoteService>) -> Self {
        self.services = services;
        self
    }

    /// Replace the Helios service's characteristics, keeping GAP and GATT first.
    ///
    /// Every characteristic without a value gets a one-byte zero.
    #[must_use]
    pub fn helios_characteristics(mut self, characteristics: &[Uuid]) -> Self {
        for uuid in characteristics {
            self.values.entry(*uuid).or_insert_with(|| vec![0]);
        }
        self.services = vec![
            RemoteService::new(GAP_SERVICE, []),
            RemoteService::new(GATT_SERVICE, []),
            RemoteService::new(HELIOS_SERVICE, characteristics.iter().copied()),
        ];
        self
    }

    /// Set the raw value of a characteristic.
    #[must_use]
    pub fn value(mut self, characteristic: Uuid, value: &[u8]) -> Self {
        self.values.insert(characteristic, value.to_vec());
        self
    }

    /// Set the single-byte value of a field, using the standard UUID layout.
    #[must_use]
    pub fn field(self, field: FieldTag, value: i8) -> Self {
        match field.characteristic_uuid(HELIOS_SERVICE) {
            Some(uuid) => self.value(uuid, &value.to_le_bytes()),
            None => self,
        }
    }

    /// Set whether the panel starts connected.
    #[must_use]
    pub fn auto_connect(mut self, auto: bool) -> Self {
        self.auto_connect = auto;
        self
    }

    /// Build the mock panel.
    #[must_use]
    pub fn build(self) -> MockPanel {
        let (events, _) = broadcast::channel(32);
        MockPanel {
            name: self.name,
            address: self.address,
            connected: AtomicBool::new(self.auto_connect),
            services: self.services,
            values: Mutex::new(self.values),
            ops: Mutex::new(Vec::new()),
            events,
            connect_failure: Mutex::new(None),
            remaining_connect_failures: AtomicU32::new(0),
            read_failures: Mutex::new(HashMap::new()),
            write_failures: Mutex::new(HashMap::new()),
            refused_subscriptions: Mutex::new(HashSet::new()),
            op_latency_ms: AtomicU64::new(0),
            connect_latency_ms: AtomicU64::new(0),
            disconnect_countdown: AtomicU32::new(0),
            late_completion_ms: AtomicU64::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        }
    }
}
