//! Panel session configuration.
//!
//! Loaded from `config.toml` in the platform config directory (see
//! [`default_config_path`]) or from an explicit path. Every section has
//! defaults that match the shipped panel firmware, so an empty or missing
//! file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use helios_types::uuid::{HELIOS_SERVICE, LEGACY_SERVICE_INDEX};

use crate::reconnect::ReconnectOptions;
use crate::resolver::ServiceSelector;
use crate::scan::DeviceSelector;
use crate::session::SessionOptions;

/// Fixed hardware address of the panel.
pub const DEFAULT_PANEL_ADDRESS: &str = "98:4F:EE:10:AB:C3";

/// Bonded name of the panel.
pub const DEFAULT_PANEL_NAME: &str = "Helios Panel";

/// Session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which panel to talk to.
    pub device: DeviceConfig,
    /// How to find the panel's service.
    pub service: ServiceConfig,
    /// Session behaviour.
    pub session: SessionConfig,
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Address and name are not both empty
    /// - The service UUID parses
    /// - The event buffer is not zero
    /// - The reconnect backoff is well formed
    ///
    /// # Example
    ///
    /// ```
    /// use helios_core::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.device.validate());
        errors.extend(self.service.validate());
        errors.extend(self.session.validate());
        errors.extend(self.reconnect.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Device selector described by the `[device]` section.
    pub fn device_selector(&self) -> Result<DeviceSelector, ConfigError> {
        let address = non_empty(&self.device.address);
        let name = non_empty(&self.device.name);
        match (name, address) {
            (Some(name), Some(address)) => Ok(DeviceSelector::NameOrAddress {
                name: name.to_string(),
                address: address.to_string(),
            }),
            (Some(name), None) => Ok(DeviceSelector::Name(name.to_string())),
            (None, Some(address)) => Ok(DeviceSelector::Address(address.to_string())),
            (None, None) => Err(ConfigError::Validation(self.device.validate())),
        }
    }

    /// Service selector described by the `[service]` section.
    pub fn service_selector(&self) -> Result<ServiceSelector, ConfigError> {
        let uuid = self.service.parsed_uuid().ok_or_else(|| {
            ConfigError::Validation(self.service.validate())
        })?;
        Ok(match self.service.legacy_index {
            Some(index) => ServiceSelector::UuidOrIndex { uuid, index },
            None => ServiceSelector::Uuid(uuid),
        })
    }

    /// Session options described by the `[session]` and `[service]` sections.
    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        Ok(SessionOptions {
            service: self.service_selector()?,
            operation_timeout: self.session.operation_timeout_ms.map(Duration::from_millis),
            forward_notifications: self.session.forward_notifications,
            heartbeat_interval: match self.session.heartbeat_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            event_buffer: self.session.event_buffer,
        })
    }

    /// Reconnect options described by the `[reconnect]` section.
    pub fn reconnect_options(&self) -> ReconnectOptions {
        ReconnectOptions {
            max_attempts: self.reconnect.max_attempts,
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            backoff_multiplier: self.reconnect.backoff_multiplier,
            use_exponential_backoff: self.reconnect.backoff_multiplier > 1.0,
            stop_on_service_not_found: self.reconnect.stop_on_service_not_found,
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Device selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hardware address (or platform identifier on macOS).
    pub address: String,
    /// Bonded name, tried before the address.
    pub name: String,
    /// How long to scan when the panel is not already known.
    pub scan_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_PANEL_ADDRESS.to_string(),
            name: DEFAULT_PANEL_NAME.to_string(),
            scan_timeout_secs: 10,
        }
    }
}

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if non_empty(&self.address).is_none() && non_empty(&self.name).is_none() {
            errors.push(ValidationError {
                field: "device".to_string(),
                message: "either address or name must be set".to_string(),
            });
        }
        if self.scan_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "device.scan_timeout_secs".to_string(),
                message: "scan timeout must be > 0".to_string(),
            });
        }
        errors
    }

    /// Scan timeout as a duration.
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

/// Service selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Target service UUID.
    pub uuid: String,
    /// Positional fallback into the discovered service list.
    ///
    /// Only consulted when no service matches `uuid`. Relies on the panel
    /// firmware advertising its services in a fixed order; the shipped
    /// firmware puts the custom service at index 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_index: Option<usize>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            uuid: HELIOS_SERVICE.to_string(),
            legacy_index: None,
        }
    }
}

impl ServiceConfig {
    /// Config with the positional fallback enabled at the shipped index.
    pub fn with_legacy_index() -> Self {
        Self {
            legacy_index: Some(LEGACY_SERVICE_INDEX),
            ..Self::default()
        }
    }

    fn parsed_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(self.uuid.trim()).ok()
    }

    /// Validate service configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.parsed_uuid().is_none() {
            errors.push(ValidationError {
                field: "service.uuid".to_string(),
                message: format!("'{}' is not a valid UUID", self.uuid),
            });
        }
        errors
    }
}

/// Session behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-operation timeout. Unset relies on the platform stack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_timeout_ms: Option<u64>,
    /// Report unsolicited notifications as field updates.
    pub forward_notifications: bool,
    /// Liveness heartbeat period, 0 disables.
    pub heartbeat_secs: u64,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: None,
            forward_notifications: false,
            heartbeat_secs: 1,
            event_buffer: 64,
        }
    }
}

impl SessionConfig {
    /// Validate session configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.event_buffer == 0 {
            errors.push(ValidationError {
                field: "session.event_buffer".to_string(),
                message: "event buffer must be > 0".to_string(),
            });
        }
        if self.operation_timeout_ms == Some(0) {
            errors.push(ValidationError {
                field: "session.operation_timeout_ms".to_string(),
                message: "operation timeout must be > 0 when set".to_string(),
            });
        }
        errors
    }
}

/// Reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum consecutive failed attempts (unset = unlimited).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// First backoff delay.
    pub initial_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
    /// Backoff growth factor.
    pub backoff_multiplier: f64,
    /// Give up when the panel lacks the service.
    pub stop_on_service_not_found: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            stop_on_service_not_found: true,
        }
    }
}

impl ReconnectConfig {
    /// Validate reconnect configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            errors.push(ValidationError {
                field: "reconnect.backoff_multiplier".to_string(),
                message: format!("must be >= 1.0, got {}", self.backoff_multiplier),
            });
        }
        if self.initial_delay_ms == 0 {
            errors.push(ValidationError {
                field: "reconnect.initial_delay_ms".to_string(),
                message: "initial delay must be > 0".to_string(),
            });
        }
        if self.max_delay_ms < self.initial_delay_ms {
            errors.push(ValidationError {
                field: "reconnect.max_delay_ms".to_string(),
                message: format!(
                    "max delay ({}ms) must be >= initial delay ({}ms)",
                    self.max_delay_ms, self.initial_delay_ms
                ),
            });
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `service.uuid`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("helios")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.device.address, DEFAULT_PANEL_ADDRESS);
        assert_eq!(config.device.name, DEFAULT_PANEL_NAME);
        assert_eq!(config.service.uuid, HELIOS_SERVICE.to_string());
        assert_eq!(config.service.legacy_index, None);
        assert_eq!(config.session.operation_timeout_ms, None);
        assert_eq!(config.session.heartbeat_secs, 1);
        assert!(!config.session.forward_notifications);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_toml() {
        let toml = r#"
            [device]
            name = "Roof Panel"

            [service]
            legacy_index = 2

            [session]
            operation_timeout_ms = 1500
            heartbeat_secs = 0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.device.name, "Roof Panel");
        assert_eq!(config.device.address, DEFAULT_PANEL_ADDRESS);
        assert_eq!(config.service.legacy_index, Some(2));

        let opts = config.session_options().unwrap();
        assert_eq!(opts.operation_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(opts.heartbeat_interval, None);
        assert_eq!(
            opts.service,
            ServiceSelector::UuidOrIndex {
                uuid: HELIOS_SERVICE,
                index: 2
            }
        );
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.device.address = "AA:BB:CC:DD:EE:FF".to_string();
        config.session.forward_notifications = true;
        config.reconnect.max_attempts = Some(3);

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("helios/config.toml"));
    }

    #[test]
    fn test_device_validation() {
        let mut config = Config::default();
        config.device.address = String::new();
        config.device.name = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("either address or name"));
        assert!(config.device_selector().is_err());
    }

    #[test]
    fn test_device_selector_from_config() {
        let mut config = Config::default();
        assert_eq!(
            config.device_selector().unwrap(),
            DeviceSelector::NameOrAddress {
                name: DEFAULT_PANEL_NAME.to_string(),
                address: DEFAULT_PANEL_ADDRESS.to_string(),
            }
        );

        config.device.name = String::new();
        assert_eq!(
            config.device_selector().unwrap(),
            DeviceSelector::Address(DEFAULT_PANEL_ADDRESS.to_string())
        );
    }

    #[test]
    fn test_service_uuid_validation() {
        let mut config = Config::default();
        config.service.uuid = "not-a-uuid".to_string();
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "service.uuid");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(config.service_selector().is_err());
    }

    #[test]
    fn test_reconnect_validation() {
        let mut config = Config::default();
        config.reconnect.backoff_multiplier = 0.5;
        config.reconnect.initial_delay_ms = 0;
        let err = config.validate().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("reconnect.backoff_multiplier"));
        assert!(text.contains("reconnect.initial_delay_ms"));

        let mut config = Config::default();
        config.reconnect.initial_delay_ms = 5_000;
        config.reconnect.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_event_buffer_validation() {
        let mut config = Config::default();
        config.session.event_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_options_mapping() {
        let mut config = Config::default();
        config.reconnect.max_attempts = Some(4);
        config.reconnect.backoff_multiplier = 1.0;
        let opts = config.reconnect_options();
        assert_eq!(opts.max_attempts, Some(4));
        assert!(!opts.use_exponential_backoff);
        assert_eq!(opts.initial_delay, Duration::from_secs(1));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_legacy_index_constructor() {
        assert_eq!(ServiceConfig::with_legacy_index().legacy_index, Some(2));
    }

    #[test]
    fn test_validation_error_display() {
        let error = ValidationError {
            field: "service.uuid".to_string(),
            message: "bad".to_string(),
        };
        assert_eq!(error.to_string(), "service.uuid: bad");
    }
}
