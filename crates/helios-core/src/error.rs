//! Error types for helios-core.
//!
//! This module defines all error types that can occur while running a
//! session against the Helios panel.
//!
//! # Session-level vs operation-level failures
//!
//! | Error Type | Level | Handling |
//! |------------|-------|----------|
//! | [`Error::ConnectFailure`] | Session | Recoverable, the supervisor retries with backoff |
//! | [`Error::ServiceNotFound`] | Session | Fatal for the session, torn down and surfaced |
//! | [`Error::LinkLost`] | Session | In-flight operation discarded, session rebuilt on reconnect |
//! | [`Error::ReadFailure`] | Operation | Slot skipped for this rotation |
//! | [`Error::WriteFailure`] | Operation | Slot skipped, command restored if no newer one arrived |
//! | [`Error::Timeout`] | Operation | Treated like the read or write that timed out |
//! | [`Error::InvalidData`] | Operation | Slot skipped |
//!
//! Operation-level failures are absorbed by the polling rotation, which
//! retries every slot on its next turn. Session-level failures always end
//! in `Disconnected` and are reported through the connection state events.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use helios_types::FieldTag;

use crate::config::ConfigError;

/// Errors that can occur when talking to the Helios panel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device could not be resolved before connecting.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// The link could not be established.
    #[error("Connection failed: {reason}")]
    ConnectFailure {
        /// The device that failed to connect.
        device_id: Option<String>,
        /// Why the connection failed.
        reason: String,
    },

    /// The expected custom service was absent after discovery.
    #[error("Service not found: {selector} (searched {service_count} services)")]
    ServiceNotFound {
        /// Description of how the service was selected.
        selector: String,
        /// Number of services discovered.
        service_count: usize,
    },

    /// A single characteristic read failed.
    #[error("Read failed on characteristic {uuid}: {reason}")]
    ReadFailure {
        /// The characteristic UUID.
        uuid: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// A single characteristic write failed.
    #[error("Write failed on characteristic {uuid}: {reason}")]
    WriteFailure {
        /// The characteristic UUID.
        uuid: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// The link dropped while a session was active.
    #[error("Link lost")]
    LinkLost,

    /// Operation attempted without a link.
    #[error("Not connected to device")]
    NotConnected,

    /// A command was requested for a field that is not writable.
    #[error("Field '{0}' does not accept commands")]
    NotWritable(FieldTag),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Failed to decode data received from the panel.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be loaded or saved.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Reason why a device was not resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// No Bluetooth adapter available.
    NoAdapter,
    /// Nothing matched the selector.
    NotFound {
        /// What was searched for.
        identifier: String,
    },
    /// More than one device matched the selector.
    Ambiguous {
        /// What was searched for.
        identifier: String,
        /// Number of matching devices.
        matches: usize,
    },
    /// Scan timed out before the device was seen.
    ScanTimeout {
        /// How long the scan ran.
        duration: Duration,
    },
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::Ambiguous {
                identifier,
                matches,
            } => write!(
                f,
                "'{}' matched {} devices, expected exactly one",
                identifier, matches
            ),
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a connection failure.
    pub fn connect_failure(device_id: Option<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailure {
            device_id,
            reason: reason.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error ends the session.
    ///
    /// Everything else is an operation-level failure that the polling
    /// rotation absorbs.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailure { .. }
                | Self::ServiceNotFound { .. }
                | Self::LinkLost
                | Self::NotConnected
                | Self::Cancelled
                | Self::DeviceNotFound(_)
        )
    }
}

impl From<helios_types::ParseError> for Error {
    fn from(err: helios_types::ParseError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

/// Result type alias using helios-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("Helios Panel");
        assert!(err.to_string().contains("Helios Panel"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::ServiceNotFound {
            selector: "uuid 6e400001".to_string(),
            service_count: 3,
        };
        assert!(err.to_string().contains("6e400001"));
        assert!(err.to_string().contains("3 services"));

        let err = Error::timeout("read", Duration::from_secs(2));
        assert!(err.to_string().contains("read"));
        assert!(err.to_string().contains("2s"));
    }

    #[test]
    fn test_not_writable_display() {
        let err = Error::NotWritable(FieldTag::ReadingA);
        assert_eq!(err.to_string(), "Field 'North-west' does not accept commands");
    }

    #[test]
    fn test_ambiguous_reason() {
        let err = Error::DeviceNotFound(DeviceNotFoundReason::Ambiguous {
            identifier: "Helios".to_string(),
            matches: 2,
        });
        assert!(err.to_string().contains("matched 2 devices"));
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(Error::LinkLost.is_session_fatal());
        assert!(
            Error::ServiceNotFound {
                selector: String::new(),
                service_count: 0
            }
            .is_session_fatal()
        );
        assert!(Error::connect_failure(None, "refused").is_session_fatal());

        assert!(
            !Error::ReadFailure {
                uuid: Uuid::nil(),
                reason: "gatt 0x85".to_string()
            }
            .is_session_fatal()
        );
        assert!(!Error::timeout("write", Duration::from_secs(1)).is_session_fatal());
        assert!(!Error::InvalidData("empty".to_string()).is_session_fatal());
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = helios_types::ParseError::InsufficientBytes {
            expected: 1,
            actual: 0,
        }
        .into();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
