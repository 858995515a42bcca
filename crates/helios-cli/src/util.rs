//! Shared helpers for CLI commands.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use helios_core::{BlePanel, Config, ConnectionConfig, DeviceSelector, default_config_path};

use crate::cli::DeviceArgs;

/// Global options every command sees.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub config_path: Option<PathBuf>,
    pub quiet: bool,
    pub no_color: bool,
}

impl Context {
    /// The configuration file in use.
    pub fn config_path(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(default_config_path)
    }

    /// Load and validate the configuration.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load_config(&self) -> Result<Config> {
        let config = match &self.config_path {
            Some(path) => Config::load_validated(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => {
                let config = Config::load_default().context("Failed to load config")?;
                config.validate().context("Invalid config")?;
                config
            }
        };
        Ok(config)
    }
}

/// Which panel to use: the command line wins over the config file.
pub fn resolve_selector(device: Option<&str>, config: &Config) -> Result<DeviceSelector> {
    match device.map(str::trim).filter(|d| !d.is_empty()) {
        Some(identifier) => Ok(DeviceSelector::parse(identifier)),
        None => config.device_selector().context(
            "No panel configured. Use --device <NAME|ADDRESS>, set HELIOS_DEVICE, \
             or run 'helios config init'.",
        ),
    }
}

/// Find the panel and prepare it for a session.
pub async fn find_panel(ctx: &Context, args: &DeviceArgs, config: &Config) -> Result<BlePanel> {
    let selector = resolve_selector(args.device.as_deref(), config)?;
    let connection = ConnectionConfig::default()
        .connection_timeout(Duration::from_secs(args.timeout))
        .discovery_timeout(Duration::from_secs(args.timeout));

    if !ctx.quiet {
        eprintln!("Looking for panel {}...", selector);
    }
    BlePanel::find(&selector, config.device.scan_timeout(), connection)
        .await
        .with_context(|| format!("Could not find panel {}", selector))
}
