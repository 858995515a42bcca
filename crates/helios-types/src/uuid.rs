//! Bluetooth UUIDs for the Helios panel.
//!
//! The panel firmware exposes a single custom service whose characteristics
//! share one base UUID and differ only in the first hex digit of the second
//! 16-bit group (index 7 of the hyphenated string). That digit carries the
//! field meaning; see [`crate::FieldTag`].

use uuid::{Uuid, uuid};

// --- Helios Service UUIDs ---

/// Helios custom service UUID.
pub const HELIOS_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// Position of the Helios service in the discovered service list on the
/// early panel firmware.
///
/// Older firmware advertised GAP, GATT and then the custom service, so the
/// custom service was always the third entry. This is an assumption about the
/// remote firmware's attribute table order, kept only as a fallback.
pub const LEGACY_SERVICE_INDEX: usize = 2;

// --- Helios Characteristic UUIDs ---

/// Template every Helios characteristic UUID is derived from.
///
/// The field digit at index 7 is substituted per characteristic.
pub const CHARACTERISTIC_TEMPLATE: Uuid = uuid!("6e400000-b5a3-f393-e0a9-e50e24dcca9e");

/// North-west light sensor reading.
pub const READING_A: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// North-east light sensor reading.
pub const READING_B: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

/// South-west light sensor reading.
pub const READING_C: Uuid = uuid!("6e400004-b5a3-f393-e0a9-e50e24dcca9e");

/// South-east light sensor reading.
pub const READING_D: Uuid = uuid!("6e400005-b5a3-f393-e0a9-e50e24dcca9e");

/// Generated power level (read-only).
pub const POWER_LEVEL: Uuid = uuid!("6e400006-b5a3-f393-e0a9-e50e24dcca9e");

/// Power toggle (readable status, writable command).
pub const POWER_COMMAND: Uuid = uuid!("6e400007-b5a3-f393-e0a9-e50e24dcca9e");

/// Sun search toggle (readable status, writable command).
pub const SEARCH_COMMAND: Uuid = uuid!("6e400008-b5a3-f393-e0a9-e50e24dcca9e");

// --- Standard BLE Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Generic Attribute Profile (GATT) service.
pub const GATT_SERVICE: Uuid = uuid!("00001801-0000-1000-8000-00805f9b34fb");
