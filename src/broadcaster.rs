use log::{debug, error, warn};
use std::sync::Arc;

use crate::error::SendError;
use crate::messages::OutboundEvent;
use crate::outbound::Outbound;
use crate::registry::Registry;

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans events out to every connection in the registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Broadcaster { registry }
    }

    /// Best-effort delivery: a failing recipient is counted and skipped.
    pub async fn broadcast(&self, event: &OutboundEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize outbound event: {}", e);
                return report;
            }
        };

        self.registry
            .for_each_connection(|id, outbound| match outbound.send(&payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Dropped event for connection {}: {}", id, e);
                }
            })
            .await;

        debug!(
            "Broadcast delivered to {} connection(s), {} failed",
            report.delivered, report.failed
        );
        report
    }

    pub async fn announce_user_list(&self) -> DeliveryReport {
        let names = self.registry.snapshot().await;
        self.broadcast(&OutboundEvent::user_list(names)).await
    }

    /// Sends `event` to one connection only.
    pub fn send_to(outbound: &dyn Outbound, event: &OutboundEvent) -> Result<(), SendError> {
        match serde_json::to_string(event) {
            Ok(payload) => outbound.send(&payload),
            Err(e) => {
                error!("Failed to serialize outbound event: {}", e);
                Err(SendError::Encode)
            }
        }
    }
}
