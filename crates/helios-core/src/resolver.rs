//! Target service selection after connecting.

use std::fmt;

use tracing::{debug, info, warn};
use uuid::Uuid;

use helios_types::RemoteService;
use helios_types::uuid::HELIOS_SERVICE;

use crate::error::{Error, Result};
use crate::traits::PanelLink;

/// How the target service is picked from the discovered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSelector {
    /// Match the service UUID exactly.
    Uuid(Uuid),
    /// Match the UUID, else take the service at `index` in discovery order.
    ///
    /// The positional fallback assumes the panel firmware advertises its
    /// services in a fixed order. It exists for firmware that reports a
    /// different service UUID than the one documented.
    UuidOrIndex {
        /// Preferred service UUID.
        uuid: Uuid,
        /// Fallback position.
        index: usize,
    },
}

impl Default for ServiceSelector {
    fn default() -> Self {
        Self::Uuid(HELIOS_SERVICE)
    }
}

impl fmt::Display for ServiceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(uuid) => write!(f, "uuid {}", uuid),
            Self::UuidOrIndex { uuid, index } => write!(f, "uuid {} or index {}", uuid, index),
        }
    }
}

impl ServiceSelector {
    /// Pick the target service from `services`.
    pub fn select<'a>(&self, services: &'a [RemoteService]) -> Option<&'a RemoteService> {
        match *self {
            Self::Uuid(uuid) => services.iter().find(|s| s.uuid == uuid),
            Self::UuidOrIndex { uuid, index } => {
                services.iter().find(|s| s.uuid == uuid).or_else(|| {
                    let fallback = services.get(index);
                    if let Some(service) = fallback {
                        warn!(
                            index,
                            service = %service.uuid,
                            "Service UUID not found, using positional fallback"
                        );
                    }
                    fallback
                })
            }
        }
    }
}

/// The target service and its characteristics, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    /// Selected service UUID.
    pub service: Uuid,
    /// Characteristic UUIDs of that service.
    pub characteristics: Vec<Uuid>,
}

/// Discovers services and selects the target one.
#[derive(Debug, Clone, Default)]
pub struct ServiceResolver {
    selector: ServiceSelector,
}

impl ServiceResolver {
    /// Create a resolver using `selector`.
    pub fn new(selector: ServiceSelector) -> Self {
        Self { selector }
    }

    /// The selector in use.
    pub fn selector(&self) -> ServiceSelector {
        self.selector
    }

    /// Run discovery on `link` and select the target service.
    ///
    /// The result is only returned once complete; callers never see a
    /// partially populated characteristic list.
    #[tracing::instrument(level = "debug", skip_all, fields(selector = %self.selector))]
    pub async fn discover<L: PanelLink + ?Sized>(&self, link: &L) -> Result<ResolvedService> {
        let services = link.discover_services().await?;
        debug!(count = services.len(), "Services discovered");
        self.resolve(&services)
    }

    /// Select the target service from an already discovered list.
    pub fn resolve(&self, services: &[RemoteService]) -> Result<ResolvedService> {
        let service = self
            .selector
            .select(services)
            .ok_or_else(|| Error::ServiceNotFound {
                selector: self.selector.to_string(),
                service_count: services.len(),
            })?;
        info!(
            service = %service.uuid,
            characteristics = service.characteristics.len(),
            "Target service resolved"
        );
        Ok(ResolvedService {
            service: service.uuid,
            characteristics: service.characteristics.clone(),
        })
    }
}
