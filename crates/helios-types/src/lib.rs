//! Platform-agnostic types for the Helios solar panel BLE protocol.
//!
//! The Helios panel is a sun-tracking solar array that exposes four light
//! sensor readings, a generated power level and two toggles over a custom
//! GATT service. This crate holds the pieces of that protocol that do not
//! need a Bluetooth stack:
//!
//! - [`FieldTag`] and the identifier convention that maps characteristic
//!   UUIDs to fields
//! - One-byte value codec ([`decode_value`], [`encode_command`])
//! - [`ConnectionState`], [`FieldUpdate`] and [`RemoteService`]
//! - UUID constants for the Helios service
//!
//! # Example
//!
//! ```
//! use helios_types::{FieldTag, decode_value};
//!
//! let field = FieldTag::from_identifier("6e400006-b5a3-f393-e0a9-e50e24dcca9e");
//! assert_eq!(field, FieldTag::PowerLevel);
//! assert_eq!(decode_value(&[42]).unwrap(), 42);
//! ```

pub mod decoder;
pub mod error;
pub mod types;
pub mod uuid;

pub use decoder::{
    COMMAND_ACTIVATE, FIELD_DIGIT_INDEX, VALUE_LEN, decode_value, encode_command, field_of,
    parse_identifier,
};
pub use error::{ParseError, ParseResult};
pub use types::{ConnectionState, FieldTag, FieldUpdate, RemoteService, UpdateOrigin};
