//! Identifier and value decoding for the Helios wire convention.
//!
//! Every characteristic UUID carries its field in the character at index 7
//! (the first hex digit of the second 16-bit group). Every value is exactly
//! one byte: signed on read, unsigned on write.

use uuid::Uuid;

use crate::error::{ParseError, ParseResult};
use crate::types::FieldTag;

/// Index of the field digit in a hyphenated UUID string.
pub const FIELD_DIGIT_INDEX: usize = 7;

/// Width of every value in this protocol.
pub const VALUE_LEN: usize = 1;

/// Byte written to a command characteristic to activate it.
pub const COMMAND_ACTIVATE: u8 = 1;

impl FieldTag {
    /// Decode the field from a characteristic identifier string.
    ///
    /// Total over all inputs: anything that does not carry a known digit at
    /// index 7, including strings that are too short, maps to
    /// [`FieldTag::Unknown`].
    ///
    /// ```
    /// use helios_types::FieldTag;
    ///
    /// assert_eq!(FieldTag::from_identifier("6E400005-B5A3-F393-E0A9-E50E24DCCA9E"), FieldTag::ReadingD);
    /// assert_eq!(FieldTag::from_identifier("6E400007-B5A3-F393-E0A9-E50E24DCCA9E"), FieldTag::PowerCommand);
    /// assert_eq!(FieldTag::from_identifier("6E40000F-B5A3-F393-E0A9-E50E24DCCA9E"), FieldTag::Unknown);
    /// ```
    #[must_use]
    pub fn from_identifier(identifier: &str) -> Self {
        identifier
            .chars()
            .nth(FIELD_DIGIT_INDEX)
            .map_or(FieldTag::Unknown, FieldTag::from_digit)
    }

    /// Decode the field from a characteristic UUID.
    #[must_use]
    pub fn from_uuid(uuid: &Uuid) -> Self {
        // Hyphenated form keeps the digit at the same index as the string form.
        let mut buf = Uuid::encode_buffer();
        FieldTag::from_identifier(uuid.hyphenated().encode_lower(&mut buf))
    }

    /// Build the characteristic UUID for this field from a template UUID.
    ///
    /// Returns `None` for [`FieldTag::Unknown`].
    #[must_use]
    pub fn characteristic_uuid(self, template: Uuid) -> Option<Uuid> {
        let digit = self.digit()?.to_digit(16)? as u8;
        let mut bytes = *template.as_bytes();
        // Index 7 of the string is the low nibble of byte 3.
        bytes[3] = (bytes[3] & 0xF0) | digit;
        Some(Uuid::from_bytes(bytes))
    }
}

/// Decode the field for an identifier.
///
/// Free-function form of [`FieldTag::from_identifier`].
#[must_use]
pub fn field_of(identifier: &str) -> FieldTag {
    FieldTag::from_identifier(identifier)
}

/// Check that an identifier is shaped like a hyphenated UUID.
///
/// The decoder itself never fails; this is for configuration input.
pub fn parse_identifier(identifier: &str) -> ParseResult<Uuid> {
    Uuid::parse_str(identifier).map_err(|_| ParseError::InvalidIdentifier(identifier.to_string()))
}

/// Decode a read value as a signed 8-bit integer.
///
/// Only the first byte is significant. Trailing bytes are ignored, matching
/// how the panel firmware pads some characteristics.
pub fn decode_value(bytes: &[u8]) -> ParseResult<i8> {
    match bytes.first() {
        Some(&b) => Ok(b as i8),
        None => Err(ParseError::InsufficientBytes {
            expected: VALUE_LEN,
            actual: 0,
        }),
    }
}

/// Encode a command value for writing.
#[must_use]
pub fn encode_command(value: u8) -> [u8; VALUE_LEN] {
    [value]
}
