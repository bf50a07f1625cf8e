use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::outbound::{ConnectionId, Outbound};

#[derive(Clone)]
struct Member {
    name: String,
    outbound: Arc<dyn Outbound>,
}

/// Authenticated connections and their display names, in login order.
///
/// Display names are not unique: two connections may present the same name.
#[derive(Default)]
pub struct Registry {
    members: RwLock<IndexMap<ConnectionId, Member>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id`, or overwrites its entry in place if it is already
    /// present. Returns the previous name.
    pub async fn register(
        &self,
        id: ConnectionId,
        name: String,
        outbound: Arc<dyn Outbound>,
    ) -> Option<String> {
        let mut members = self.members.write().await;
        members
            .insert(id, Member { name, outbound })
            .map(|previous| previous.name)
    }

    /// Changes the name of a registered connection, keeping its position.
    /// Returns the previous name, or `None` if `id` is not registered.
    pub async fn rename(&self, id: ConnectionId, name: String) -> Option<String> {
        let mut members = self.members.write().await;
        let member = members.get_mut(&id)?;
        Some(std::mem::replace(&mut member.name, name))
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<String> {
        let mut members = self.members.write().await;
        members.shift_remove(&id).map(|member| member.name)
    }

    pub async fn snapshot(&self) -> Vec<String> {
        let members = self.members.read().await;
        members.values().map(|member| member.name.clone()).collect()
    }

    pub async fn name_of(&self, id: ConnectionId) -> Option<String> {
        let members = self.members.read().await;
        members.get(&id).map(|member| member.name.clone())
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Calls `f` for every registered connection.
    ///
    /// Recipients are copied out first and `f` runs with the lock released,
    /// so slow work in `f` never holds up logins or disconnects.
    pub async fn for_each_connection<F>(&self, mut f: F)
    where
        F: FnMut(ConnectionId, &dyn Outbound),
    {
        let recipients: Vec<(ConnectionId, Arc<dyn Outbound>)> = {
            let members = self.members.read().await;
            members
                .iter()
                .map(|(id, member)| (*id, Arc::clone(&member.outbound)))
                .collect()
        };

        for (id, outbound) in &recipients {
            f(*id, outbound.as_ref());
        }
    }
}
