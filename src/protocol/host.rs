//! The authoritative end of the sync protocol

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::algorithm::AlgorithmKind;
use crate::graph::GraphError;
use crate::net::{
    Command, Connection, ConnectionId, ConnectionManager, Listener, Message, MessageHandler, ProtocolError,
    StreamPair, TransportError, TransportKind,
};
use crate::node::{NodeId, Position};
use crate::processor::AudioProcessor;
use crate::property::{Property, PropertyId};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// What the host knows about one controller.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Peer {
    pub color: [f32; 3],
    /// Set once the controller sent HELLO; only greeted peers get graph traffic
    pub greeted: bool,
    pub focus: Option<NodeId>,
}

impl Peer {
    fn new(color: [f32; 3]) -> Self {
        Self {
            color,
            greeted: false,
            focus: None,
        }
    }
}

fn random_color() -> [f32; 3] {
    let mut rng = rand::thread_rng();
    [rng.gen(), rng.gen(), rng.gen()]
}

struct HostInner {
    processor: AudioProcessor,
    connections: ConnectionManager,
    peers: Mutex<HashMap<ConnectionId, Peer>>,
}

/// Owns the graph and keeps every greeted controller's mirror in step with it.
///
/// Edits made through the host (the local UI) and edits arriving from
/// controllers both go through here:
///
/// - structural edits broadcast a full SEND_NODES snapshot
/// - parameter edits broadcast a single CHANGE_PARAM
/// - an edit from a controller is relayed to every *other* greeted controller
///
/// Concurrent edits to the same property resolve last-write-wins.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    pub fn new(processor: AudioProcessor) -> Self {
        Self {
            inner: Arc::new(HostInner {
                processor,
                connections: ConnectionManager::new(),
                peers: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[inline]
    pub fn processor(&self) -> &AudioProcessor {
        &self.inner.processor
    }

    #[inline]
    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// Adopt a new controller stream: assign an id and send SEND_ID.
    pub fn accept(&self, pair: StreamPair, kind: TransportKind) -> Result<ConnectionId, TransportError> {
        let handler = Arc::new(HostHandler {
            host: Arc::downgrade(&self.inner),
        });
        let id = self.inner.connections.accept(pair, kind, handler)?;

        let color = random_color();
        self.inner
            .peers
            .lock()
            .entry(id)
            .or_insert_with(|| Peer::new(color))
            .color = color;

        let sent = self.inner.connections.send(Message::send_id(id, color), id);
        // A hangup handled before the record existed left nothing to clean it up.
        if sent.is_err() || self.inner.connections.get(id).is_none() {
            self.inner.peers.lock().remove(&id);
        }
        sent?;
        Ok(id)
    }

    /// Accept controllers from `listener` on a background thread.
    pub fn serve(&self, mut listener: impl Listener + 'static) -> Result<ServeHandle, TransportError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let host = self.clone();
        let kind = listener.kind();

        let thread = thread::Builder::new()
            .name("syngraph-accept".into())
            .spawn(move || {
                info!(kind = ?kind, "accepting controllers");
                while !flag.load(Ordering::Acquire) {
                    match listener.accept(ACCEPT_POLL) {
                        Ok(Some(pair)) => {
                            if let Err(e) = host.accept(pair, kind) {
                                warn!(error = %e, "failed to adopt controller");
                            }
                        }
                        Ok(None) => {}
                        Err(TransportError::Closed) => {
                            debug!("listener closed");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            thread::sleep(ACCEPT_POLL);
                        }
                    }
                }
                debug!("accept loop stopped");
            })?;

        Ok(ServeHandle {
            stop,
            thread: Some(thread),
        })
    }

    pub fn peer(&self, id: ConnectionId) -> Option<Peer> {
        self.inner.peers.lock().get(&id).copied()
    }

    /// The highlight colour drawn for a connection
    pub fn color_of(&self, id: ConnectionId) -> Option<[f32; 3]> {
        self.peer(id).map(|p| p.color)
    }

    /// The node a connection last selected
    pub fn focus_of(&self, id: ConnectionId) -> Option<NodeId> {
        self.peer(id)?.focus
    }

    pub fn is_greeted(&self, id: ConnectionId) -> bool {
        self.peer(id).is_some_and(|p| p.greeted)
    }

    pub fn add_node(&self, kind: AlgorithmKind, position: Position) -> NodeId {
        let id = self.inner.processor.add_node(kind, position);
        self.inner.broadcast_nodes();
        id
    }

    pub fn remove_node(&self, id: NodeId) -> bool {
        let removed = self.inner.processor.remove_node(id);
        if removed {
            self.inner.broadcast_nodes();
        }
        removed
    }

    pub fn wire(&self, src: NodeId, dst: NodeId, slot: usize) -> Result<(), GraphError> {
        self.inner.processor.wire(src, dst, slot)?;
        self.inner.broadcast_nodes();
        Ok(())
    }

    pub fn unwire(&self, dst: NodeId, slot: usize) -> bool {
        let unwired = self.inner.processor.unwire(dst, slot);
        if unwired {
            self.inner.broadcast_nodes();
        }
        unwired
    }

    /// Edit a property locally and tell every greeted controller.
    pub fn set_property_value(
        &self,
        node: NodeId,
        property: PropertyId,
        value: f32,
    ) -> Result<Property, GraphError> {
        let stored = self.inner.processor.set_property_value(node, property, value)?;
        self.inner
            .broadcast_greeted(&Message::change_param(node, stored.clone()), None);
        Ok(stored)
    }

    /// Drop every controller.
    pub fn shutdown(&self) {
        self.inner.connections.disconnect_all();
        self.inner.peers.lock().clear();
    }
}

impl HostInner {
    fn broadcast_nodes(&self) {
        let message = Message::send_nodes(self.processor.snapshot());
        self.broadcast_greeted(&message, None);
    }

    fn broadcast_greeted(&self, message: &Message, except: Option<ConnectionId>) -> usize {
        let greeted: HashSet<ConnectionId> = self
            .peers
            .lock()
            .iter()
            .filter(|(id, peer)| peer.greeted && Some(**id) != except)
            .map(|(id, _)| *id)
            .collect();
        self.connections
            .broadcast_where(message, |id| greeted.contains(&id))
    }

    fn handle(&self, from: ConnectionId, message: Message) -> Result<(), ProtocolError> {
        match message.command {
            Command::Hello => {
                self.peers
                    .lock()
                    .entry(from)
                    .or_insert_with(|| Peer::new(random_color()))
                    .greeted = true;
                debug!(id = from, "controller greeted");
                let snapshot = Message::send_nodes(self.processor.snapshot());
                if let Err(e) = self.connections.send(snapshot, from) {
                    warn!(id = from, error = %e, "could not send snapshot");
                }
            }
            Command::ChangeParam | Command::ChangeParams => {
                let node = message.node()?;
                let mut applied = Vec::new();
                for property in message.changed_properties()? {
                    match self
                        .processor
                        .set_property_value(node, property.id(), property.value())
                    {
                        Ok(stored) => applied.push(stored),
                        Err(e) => warn!(id = from, error = %e, "ignoring edit"),
                    }
                }

                let relay = match (message.command, applied.len()) {
                    (_, 0) => return Ok(()),
                    (Command::ChangeParam, _) => Message::change_param(node, applied.remove(0)),
                    _ => Message::change_params(node, applied),
                };
                self.broadcast_greeted(&relay.with_sender(from), Some(from));
            }
            Command::SelectNode => {
                let node = message.node()?;
                if let Some(peer) = self.peers.lock().get_mut(&from) {
                    peer.focus = Some(node);
                }
            }
            other @ (Command::SendId | Command::SendNodes) => {
                return Err(ProtocolError::UnexpectedCommand(other));
            }
        }
        Ok(())
    }
}

struct HostHandler {
    host: Weak<HostInner>,
}

impl MessageHandler for HostHandler {
    fn on_message(&self, connection: &Connection, message: Message) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        if let Err(e) = host.handle(connection.id(), message) {
            warn!(id = connection.id(), error = %e, "dropping message");
        }
    }

    fn on_disconnect(&self, connection: &Connection) {
        if let Some(host) = self.host.upgrade() {
            host.peers.lock().remove(&connection.id());
        }
    }
}

/// Stops the accept loop started by [`Host::serve`] when dropped.
pub struct ServeHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServeHandle {
    /// Stop accepting and wait for the loop to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("accept loop panicked");
            }
        }
    }
}

impl Drop for ServeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
