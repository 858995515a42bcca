//! Core types for Helios panel data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Semantic meaning of a Helios characteristic.
///
/// The tag is derived once from the characteristic UUID (see
/// [`FieldTag::from_identifier`]) and never changes for the lifetime of a
/// session.
///
/// The four readings are the tracker's light sensors, laid out in a quadrant
/// behind a cross-shaped shade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FieldTag {
    /// North-west light sensor.
    ReadingA,
    /// North-east light sensor.
    ReadingB,
    /// South-west light sensor.
    ReadingC,
    /// South-east light sensor.
    ReadingD,
    /// Generated power, display only.
    PowerLevel,
    /// Power toggle: readable status plus writable command.
    PowerCommand,
    /// Sun search toggle: readable status plus writable command.
    SearchCommand,
    /// Not part of the convention. Occupies a polling slot, never reported.
    Unknown,
}

impl FieldTag {
    /// Every tag that maps to a convention digit, in digit order.
    pub const KNOWN: [FieldTag; 7] = [
        FieldTag::ReadingA,
        FieldTag::ReadingB,
        FieldTag::ReadingC,
        FieldTag::ReadingD,
        FieldTag::PowerLevel,
        FieldTag::PowerCommand,
        FieldTag::SearchCommand,
    ];

    /// Tags the command intake accepts.
    pub const WRITABLE: [FieldTag; 2] = [FieldTag::PowerCommand, FieldTag::SearchCommand];

    /// Map a convention digit to its field.
    #[must_use]
    pub fn from_digit(digit: char) -> Self {
        match digit {
            '2' => FieldTag::ReadingA,
            '3' => FieldTag::ReadingB,
            '4' => FieldTag::ReadingC,
            '5' => FieldTag::ReadingD,
            '6' => FieldTag::PowerLevel,
            '7' => FieldTag::PowerCommand,
            '8' => FieldTag::SearchCommand,
            _ => FieldTag::Unknown,
        }
    }

    /// The convention digit for this field, or `None` for [`FieldTag::Unknown`].
    #[must_use]
    pub fn digit(self) -> Option<char> {
        match self {
            FieldTag::ReadingA => Some('2'),
            FieldTag::ReadingB => Some('3'),
            FieldTag::ReadingC => Some('4'),
            FieldTag::ReadingD => Some('5'),
            FieldTag::PowerLevel => Some('6'),
            FieldTag::PowerCommand => Some('7'),
            FieldTag::SearchCommand => Some('8'),
            FieldTag::Unknown => None,
        }
    }

    /// Whether commands may be written to this field.
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, FieldTag::PowerCommand | FieldTag::SearchCommand)
    }

    /// Whether reads of this field are forwarded to the UI.
    ///
    /// The search characteristic's status is only used to decide when to
    /// write a pending search, so its reads stay silent.
    #[must_use]
    pub fn is_reported(self) -> bool {
        !matches!(self, FieldTag::Unknown | FieldTag::SearchCommand)
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            FieldTag::ReadingA => "North-west",
            FieldTag::ReadingB => "North-east",
            FieldTag::ReadingC => "South-west",
            FieldTag::ReadingD => "South-east",
            FieldTag::PowerLevel => "Power",
            FieldTag::PowerCommand => "Power switch",
            FieldTag::SearchCommand => "Sun search",
            FieldTag::Unknown => "Unknown",
        }
    }

    /// Display unit, if the value has one.
    #[must_use]
    pub fn unit(self) -> Option<&'static str> {
        match self {
            FieldTag::PowerLevel => Some("Wh"),
            _ => None,
        }
    }
}

impl fmt::Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Connection state of the panel link.
///
/// Exactly one value holds at a time. Transitions are reported by the
/// connection manager and never inferred elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// A physical connection attempt is in progress.
    Connecting,
    /// The platform confirmed the link layer is up.
    Connected,
    /// An intentional disconnect is in progress.
    Disconnecting,
}

impl ConnectionState {
    /// Whether a link exists or is being established.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Where a field value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum UpdateOrigin {
    /// A scheduled read in the polling rotation.
    Poll,
    /// An unsolicited change notification.
    Notification,
}

/// A decoded value for one field, as delivered to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldUpdate {
    /// The field the value belongs to.
    pub field: FieldTag,
    /// Signed 8-bit wire value, widened.
    pub value: i32,
    /// How the value arrived.
    pub origin: UpdateOrigin,
}

impl FieldUpdate {
    /// A value produced by the polling rotation.
    #[must_use]
    pub fn polled(field: FieldTag, value: i8) -> Self {
        Self {
            field,
            value: i32::from(value),
            origin: UpdateOrigin::Poll,
        }
    }

    /// A value produced by a change notification.
    #[must_use]
    pub fn notified(field: FieldTag, value: i8) -> Self {
        Self {
            field,
            value: i32::from(value),
            origin: UpdateOrigin::Notification,
        }
    }
}

/// A GATT service as reported by the platform, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristic UUIDs in the order the platform reported them.
    pub characteristics: Vec<Uuid>,
}

impl RemoteService {
    /// Create a service description.
    pub fn new(uuid: Uuid, characteristics: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            uuid,
            characteristics: characteristics.into_iter().collect(),
        }
    }
}
