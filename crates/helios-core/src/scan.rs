//! Resolving the panel to exactly one peripheral.
//!
//! The panel is selected by bonded name, by fixed hardware address, or by
//! name with the address as fallback. Known peripherals are checked first;
//! a bounded scan runs only when nothing known matches. A selector that
//! matches more than one peripheral is an error, never a guess.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{DeviceNotFoundReason, Error, Result};

/// Which peripheral is the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Hardware address, or peripheral ID on macOS. Case-insensitive.
    Address(String),
    /// Exact advertised or bonded name. Case-insensitive.
    Name(String),
    /// Try the name first, then the address.
    NameOrAddress {
        /// Name to try first.
        name: String,
        /// Address to fall back to.
        address: String,
    },
}

impl DeviceSelector {
    /// Interpret a user-supplied identifier.
    ///
    /// Anything shaped like a MAC address or a UUID is an address; the rest
    /// is a name.
    pub fn parse(identifier: &str) -> Self {
        let identifier = identifier.trim();
        if looks_like_mac(identifier) || uuid::Uuid::parse_str(identifier).is_ok() {
            Self::Address(identifier.to_string())
        } else {
            Self::Name(identifier.to_string())
        }
    }

    /// Whether a peripheral with this name and identifier matches.
    pub fn matches(&self, name: Option<&str>, identifier: &str) -> bool {
        match self {
            Self::Address(address) => identifier.eq_ignore_ascii_case(address),
            Self::Name(wanted) => name.is_some_and(|n| n.trim().eq_ignore_ascii_case(wanted)),
            Self::NameOrAddress { name: wanted, address } => {
                name.is_some_and(|n| n.trim().eq_ignore_ascii_case(wanted))
                    || identifier.eq_ignore_ascii_case(address)
            }
        }
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{}", address),
            Self::Name(name) => write!(f, "'{}'", name),
            Self::NameOrAddress { name, address } => write!(f, "'{}' or {}", name, address),
        }
    }
}

fn looks_like_mac(s: &str) -> bool {
    let parts: Vec<&str> = s.split([':', '-']).collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// A peripheral as seen by the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Advertised name, if any.
    pub name: Option<String>,
    /// Connection identifier (address, or peripheral ID on macOS).
    pub identifier: String,
}

/// Pick the single candidate `selector` matches.
///
/// For [`DeviceSelector::NameOrAddress`] a unique name match wins; the
/// address is consulted only when no name matches. Returns `Ok(None)` when
/// nothing matches.
pub fn select_unique(selector: &DeviceSelector, candidates: &[Candidate]) -> Result<Option<usize>> {
    if let DeviceSelector::NameOrAddress { name, address } = selector {
        return match select_unique(&DeviceSelector::Name(name.clone()), candidates)? {
            Some(index) => Ok(Some(index)),
            None => select_unique(&DeviceSelector::Address(address.clone()), candidates),
        };
    }

    let matches: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| selector.matches(c.name.as_deref(), &c.identifier))
        .map(|(i, _)| i)
        .collect();

    match matches.as_slice() {
        [] => Ok(None),
        [index] => Ok(Some(*index)),
        many => Err(Error::DeviceNotFound(DeviceNotFoundReason::Ambiguous {
            identifier: selector.to_string(),
            matches: many.len(),
        })),
    }
}

/// Format a peripheral ID as a string.
pub(crate) fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Create an identifier string from an address and peripheral ID.
///
/// On macOS where addresses are 00:00:00:00:00:00, uses the peripheral ID.
pub(crate) fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == "00:00:00:00:00:00" {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

async fn candidates(adapter: &Adapter) -> Result<Vec<(Peripheral, Candidate)>> {
    let mut found = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                debug!("Error reading peripheral properties: {}", e);
                continue;
            }
        };
        let identifier = create_identifier(&properties.address.to_string(), &peripheral.id());
        found.push((
            peripheral,
            Candidate {
                name: properties.local_name,
                identifier,
            },
        ));
    }
    Ok(found)
}

async fn pick(adapter: &Adapter, selector: &DeviceSelector) -> Result<Option<Peripheral>> {
    let mut found = candidates(adapter).await?;
    let described: Vec<Candidate> = found.iter().map(|(_, c)| c.clone()).collect();
    Ok(select_unique(selector, &described)?.map(|index| found.swap_remove(index).0))
}

/// Find the panel on the first adapter.
#[tracing::instrument(level = "info", skip_all, fields(selector = %selector))]
pub async fn find_panel(
    selector: &DeviceSelector,
    scan_timeout: Duration,
) -> Result<(Adapter, Peripheral)> {
    let adapter = get_adapter().await?;
    let peripheral = find_panel_with_adapter(&adapter, selector, scan_timeout).await?;
    Ok((adapter, peripheral))
}

/// Find the panel using a specific adapter.
pub async fn find_panel_with_adapter(
    adapter: &Adapter,
    selector: &DeviceSelector,
    scan_timeout: Duration,
) -> Result<Peripheral> {
    if let Some(peripheral) = pick(adapter, selector).await? {
        info!("Found panel among known peripherals (no scan needed)");
        return Ok(peripheral);
    }

    info!("Scanning for {} seconds...", scan_timeout.as_secs());
    adapter.start_scan(ScanFilter::default()).await?;
    sleep(scan_timeout).await;
    if let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }

    match pick(adapter, selector).await? {
        Some(peripheral) => Ok(peripheral),
        None => {
            warn!("Panel not found after scanning");
            Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                duration: scan_timeout,
            }))
        }
    }
}
