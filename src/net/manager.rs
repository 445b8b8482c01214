//! Host-side bookkeeping for many controller connections

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::connection::{Connection, MessageHandler, StreamPair, TransportError, TransportKind};
use super::message::{ConnectionId, Message};

struct ManagerInner {
    next_id: AtomicU32,
    connections: RwLock<BTreeMap<ConnectionId, Connection>>,
}

/// The set of open controller connections, keyed by host-assigned id.
///
/// Ids start at 1 and are never reused within one manager. Connections
/// whose peer goes away are dropped from the set automatically.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                next_id: AtomicU32::new(1),
                connections: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Adopt an accepted stream under a fresh id.
    pub fn accept(
        &self,
        pair: StreamPair,
        kind: TransportKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<ConnectionId, TransportError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let tracked = Arc::new(Tracked {
            manager: Arc::downgrade(&self.inner),
            handler,
        });
        let connection = Connection::accepted(id, kind, pair, tracked)?;
        self.inner.connections.write().insert(id, connection.clone());

        // The reader may have seen EOF before the entry existed, in which
        // case nobody else will remove it.
        if !connection.is_connected() {
            self.inner.connections.write().remove(&id);
            connection.close();
            debug!(id, "controller hung up during accept");
            return Err(TransportError::Closed);
        }
        info!(id, kind = ?kind, "controller connected");
        Ok(id)
    }

    /// Send to every connection. Returns how many accepted the message.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.broadcast_where(message, |_| true)
    }

    /// Send to every connection whose id passes `include`.
    ///
    /// A connection that can't take the message is logged and skipped; it
    /// never stops delivery to the rest.
    pub fn broadcast_where(&self, message: &Message, mut include: impl FnMut(ConnectionId) -> bool) -> usize {
        let targets: Vec<(ConnectionId, Connection)> = self
            .inner
            .connections
            .read()
            .iter()
            .filter(|(id, _)| include(**id))
            .map(|(id, c)| (*id, c.clone()))
            .collect();

        let mut delivered = 0;
        for (id, connection) in targets {
            match self.deliver(id, &connection, message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(id, command = ?message.command, error = %e, "broadcast skipped a connection"),
            }
        }
        delivered
    }

    pub fn send(&self, message: Message, id: ConnectionId) -> Result<(), TransportError> {
        let connection = self.get(id).ok_or(TransportError::Closed)?;
        self.deliver(id, &connection, message)
    }

    /// Queue one message; a peer that has fallen too far behind is dropped.
    fn deliver(&self, id: ConnectionId, connection: &Connection, message: Message) -> Result<(), TransportError> {
        let result = connection.try_send(message);
        if let Err(TransportError::Backlogged) = result {
            warn!(id, "controller is not keeping up, disconnecting");
            self.inner.connections.write().remove(&id);
            connection.abort();
        }
        result
    }

    /// Close and forget a connection. Unknown ids are ignored.
    pub fn disconnect(&self, id: ConnectionId) {
        let removed = self.inner.connections.write().remove(&id);
        if let Some(connection) = removed {
            connection.close();
            info!(id, "controller disconnected by host");
        }
    }

    pub fn disconnect_all(&self) {
        let all = std::mem::take(&mut *self.inner.connections.write());
        for connection in all.into_values() {
            connection.close();
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.inner.connections.read().get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.inner.connections.read().keys().copied().collect()
    }

    pub fn connected_count(&self) -> usize {
        self.inner
            .connections
            .read()
            .values()
            .filter(|c| c.is_connected())
            .count()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards to the host's handler and drops dead connections from the set.
struct Tracked {
    manager: Weak<ManagerInner>,
    handler: Arc<dyn MessageHandler>,
}

impl MessageHandler for Tracked {
    fn on_message(&self, connection: &Connection, message: Message) {
        self.handler.on_message(connection, message);
    }

    fn on_disconnect(&self, connection: &Connection) {
        let id = connection.id();
        if let Some(manager) = self.manager.upgrade() {
            let removed = manager.connections.write().remove(&id);
            if removed.is_some() {
                info!(id, "controller went away");
            }
        }
        connection.close();
        self.handler.on_disconnect(connection);
    }
}
