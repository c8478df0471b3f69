use std::sync::Arc;

use dashmap::DashMap;
use relay_core::ClientId;

/// Live session counts per client.
#[derive(Default)]
pub struct SessionRegistry {
    active: DashMap<ClientId, usize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a session as active until the returned guard drops.
    pub fn enter(self: &Arc<Self>, client_id: &ClientId) -> SessionGuard {
        *self.active.entry(client_id.clone()).or_insert(0) += 1;
        SessionGuard {
            registry: Arc::clone(self),
            client_id: client_id.clone(),
        }
    }

    pub fn sessions_for(&self, client_id: &ClientId) -> usize {
        self.active.get(client_id).map(|n| *n).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.active.iter().map(|entry| *entry.value()).sum()
    }

    fn leave(&self, client_id: &ClientId) {
        let _ = self.active.remove_if_mut(client_id, |_, n| {
            *n = n.saturating_sub(1);
            *n == 0
        });
    }
}

pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    client_id: ClientId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.leave(&self.client_id);
    }
}
