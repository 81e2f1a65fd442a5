//! Live connection tracking.
//!
//! The registry holds one entry per dispatched connection handler and
//! backs the full-drain shutdown barrier: stop snapshots the completion
//! handles of all live entries and waits for every one of them. The
//! only mutation discipline is own-key insert on dispatch and own-key
//! remove on completion, so sessions never coordinate with each other.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Opaque handle identifying one dispatched connection.
pub type ConnectionId = u64;

/// The set of in-flight connection handlers.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, watch::Sender<bool>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Registers a connection handler under its id. Dropping the
    /// returned guard removes the entry and signals completion, on
    /// every exit path including panic unwind.
    pub fn register(self: &Arc<Self>, id: ConnectionId) -> ConnectionGuard {
        let (done, _) = watch::channel(false);
        self.connections.insert(id, done);
        ConnectionGuard {
            id,
            registry: Arc::clone(self),
        }
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Completion wait-handles for all currently live connections.
    /// Handlers that complete after the snapshot resolve their handle;
    /// handlers registered after the snapshot are not included.
    pub fn snapshot(&self) -> Vec<watch::Receiver<bool>> {
        self.connections
            .iter()
            .map(|entry| entry.value().subscribe())
            .collect()
    }

    /// Waits until every connection present at the time of the call has
    /// completed. No timeout: a stuck handler stalls the drain, so
    /// handlers must stay cancellation-responsive.
    pub async fn drain(&self) {
        for mut handle in self.snapshot() {
            // A closed channel means the handler is already gone.
            let _ = handle.wait_for(|done| *done).await;
        }
    }
}

/// Removes its registry entry and signals completion on drop.
pub struct ConnectionGuard {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionGuard {
    /// Returns the connection id this guard owns.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some((_, done)) = self.registry.connections.remove(&self.id) {
            let _ = done.send(true);
        }
    }
}
