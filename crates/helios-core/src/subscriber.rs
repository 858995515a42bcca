//! Change notification setup for the target service.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::traits::PanelLink;

/// Enables notifications on every characteristic of the target service.
///
/// Subscribing is idempotent per session generation: a second call for the
/// same generation does nothing.
#[derive(Debug, Default)]
pub struct NotificationSubscriber {
    subscribed: AtomicU64,
}

/// Outcome of a subscription pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    /// Characteristics now notifying.
    pub enabled: Vec<Uuid>,
    /// Characteristics that refused (for example, no notify property).
    pub refused: Vec<Uuid>,
    /// Whether this call was a repeat for the same generation.
    pub already_subscribed: bool,
}

impl NotificationSubscriber {
    /// Create a subscriber that has not subscribed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable notifications on `characteristics` for session `generation`.
    ///
    /// Individual refusals are logged and reported but do not fail the pass;
    /// polling does not depend on notifications. Losing the link does.
    pub async fn subscribe<L: PanelLink + ?Sized>(
        &self,
        link: &L,
        generation: u64,
        characteristics: &[Uuid],
    ) -> Result<SubscriptionReport> {
        if generation != 0 && self.subscribed.load(Ordering::Acquire) == generation {
            debug!(generation, "Notifications already enabled");
            return Ok(SubscriptionReport {
                already_subscribed: true,
                ..SubscriptionReport::default()
            });
        }

        let mut report = SubscriptionReport::default();
        for &uuid in characteristics {
            match link.subscribe(uuid).await {
                Ok(()) => report.enabled.push(uuid),
                Err(e @ (Error::LinkLost | Error::NotConnected | Error::Cancelled)) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(%uuid, error = %e, "Could not enable notifications");
                    report.refused.push(uuid);
                }
            }
        }

        self.subscribed.store(generation, Ordering::Release);
        debug!(
            generation,
            enabled = report.enabled.len(),
            refused = report.refused.len(),
            "Notifications enabled"
        );
        Ok(report)
    }

    /// Forget the subscribed generation.
    pub fn reset(&self) {
        self.subscribed.store(0, Ordering::Release);
    }
}
