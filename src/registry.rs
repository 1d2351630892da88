//! Connection registry.
//!
//! Tracks every open WebSocket session by a generated id together with the
//! sending half of its outbound queue, so a message can be fanned out to all
//! clients.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::observability::metrics;
use crate::protocol::ServerEvent;

/// Identifier of one client session.
pub type ConnectionId = Uuid;

/// Concurrent map of open connections.
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under a fresh id.
    ///
    /// The returned guard removes the entry when dropped.
    #[must_use]
    pub fn register(&self, sender: mpsc::Sender<ServerEvent>) -> RegistrationGuard {
        let id = Uuid::new_v4();
        self.connections.insert(id, sender);
        metrics::set_connections_active(self.connections.len());
        debug!(connection_id = %id, "connection registered");
        RegistrationGuard {
            registry: self.clone(),
            id,
        }
    }

    /// Removes a connection. Removing an unknown or already removed id is a
    /// no-op, so normal and error paths may both call this.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            metrics::set_connections_active(self.connections.len());
            debug!(connection_id = %id, "connection removed");
        }
        removed
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Queues `event` for every connection and returns how many accepted it.
    ///
    /// A connection whose queue is closed is treated as gone and removed. A
    /// connection whose queue is full misses this event but stays
    /// registered.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0;
        for entry in self.connections.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        connection_id = %entry.key(),
                        kind = event.kind(),
                        "outbound queue full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => dead.push(*entry.key()),
            }
        }
        // removal must happen after iteration releases the shard locks
        for id in dead {
            debug!(connection_id = %id, "dropping unreachable connection");
            self.remove(id);
        }
        delivered
    }
}

/// RAII guard that removes a connection from the registry on drop.
///
/// Ensures the entry is cleaned up on every exit path of the connection
/// handler.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: ConnectionRegistry,
    id: ConnectionId,
}

impl RegistrationGuard {
    /// Id assigned to this connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
