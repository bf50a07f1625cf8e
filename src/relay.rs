use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::broadcaster::{Broadcaster, DeliveryReport};
use crate::error::ProtocolViolation;
use crate::messages::OutboundEvent;
use crate::outbound::{ConnectionId, Outbound};
use crate::registry::Registry;

/// Per-connection limits applied by sessions.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    /// Rejected payloads tolerated before the connection is closed. 0 never closes.
    pub max_violations: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Policy { max_violations: 5 }
    }
}

/// State shared by every connection worker.
pub struct Relay {
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    // Held from a membership change until its user list is queued, so the
    // lists clients see never lag behind announcements.
    membership: Mutex<()>,
    policy: Policy,
}

impl Relay {
    pub fn new(policy: Policy) -> Self {
        let registry = Arc::new(Registry::new());
        Relay {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            membership: Mutex::new(()),
            policy,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// First login of a connection: register, announce, publish the list.
    pub async fn join(&self, id: ConnectionId, name: String, outbound: Arc<dyn Outbound>) {
        let _guard = self.membership.lock().await;
        let announcement = OutboundEvent::joined(&name);
        self.registry.register(id, name, outbound).await;
        info!(
            "Connection {} joined, {} online",
            id,
            self.registry.len().await
        );
        self.broadcaster.broadcast(&announcement).await;
        self.broadcaster.announce_user_list().await;
    }

    /// Later login on an authenticated connection. Nobody is told it joined
    /// or left; only the user list is refreshed.
    pub async fn rename(&self, id: ConnectionId, name: String) {
        let _guard = self.membership.lock().await;
        let Some(previous) = self.registry.rename(id, name.clone()).await else {
            warn!("Rename of unregistered connection {} ignored", id);
            return;
        };
        info!("Connection {} renamed from {:?} to {:?}", id, previous, name);
        self.broadcaster.announce_user_list().await;
    }

    /// Removes `id` and tells the room. Safe to call more than once; only the
    /// call that actually removed an entry announces anything.
    pub async fn leave(&self, id: ConnectionId) -> Option<String> {
        let _guard = self.membership.lock().await;
        let name = self.registry.remove(id).await?;
        info!(
            "Connection {} ({:?}) left, {} online",
            id,
            name,
            self.registry.len().await
        );
        self.broadcaster.broadcast(&OutboundEvent::left(&name)).await;
        self.broadcaster.announce_user_list().await;
        Some(name)
    }

    /// Broadcasts `text` under the registered name of `id`.
    pub async fn chat(
        &self,
        id: ConnectionId,
        text: String,
    ) -> Result<DeliveryReport, ProtocolViolation> {
        let sender = self
            .registry
            .name_of(id)
            .await
            .ok_or(ProtocolViolation::ChatBeforeLogin)?;
        Ok(self
            .broadcaster
            .broadcast(&OutboundEvent::chat(sender, text))
            .await)
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}
