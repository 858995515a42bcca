//! Error types for data parsing in helios-types.

use thiserror::Error;

/// Errors that can occur when decoding Helios wire data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in helios-core).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The characteristic value was shorter than the protocol requires.
    #[error("Insufficient bytes: expected {expected}, got {actual}")]
    InsufficientBytes {
        /// Number of bytes required.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// The identifier is not shaped like a characteristic UUID.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Result type alias using helios-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
