//! The remote end of the sync protocol: a mirror of the host's graph

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::net::{Command, Connection, ConnectionId, Message, MessageHandler, ProtocolError, Transport, TransportError};
use crate::node::NodeId;
use crate::processor::Snapshot;
use crate::property::{Property, PropertyId};

/// A controller's local copy of the host's nodes, plus its selection.
///
/// [`apply`](Self::apply) is a pure reducer: it updates the mirror from one
/// host message and returns the replies to send back.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mirror {
    id: ConnectionId,
    color: Option<[f32; 3]>,
    nodes: Snapshot,
    selected: Option<NodeId>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigned by the host; 0 until SEND_ID arrives
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn color(&self) -> Option<[f32; 3]> {
        self.color
    }

    #[inline]
    pub fn nodes(&self) -> &Snapshot {
        &self.nodes
    }

    #[inline]
    pub fn selected(&self) -> Option<NodeId> {
        self.selected
    }

    /// Position of the selected node in id order
    pub fn selected_index(&self) -> Option<usize> {
        let selected = self.selected?;
        self.nodes.keys().position(|id| *id == selected)
    }

    pub fn property(&self, node: NodeId, property: PropertyId) -> Option<&Property> {
        self.nodes.get(&node)?.get(property)
    }

    /// Reconcile one message from the host.
    pub fn apply(&mut self, message: &Message) -> Result<Vec<Message>, ProtocolError> {
        match message.command {
            Command::SendId => {
                self.id = message.id()?;
                self.color = Some(message.color()?);
                Ok(vec![Message::hello()])
            }
            Command::SendNodes => {
                self.nodes = message.nodes()?.clone();
                // re-resolve by id; positions shift when nodes come and go
                if self.selected.is_some_and(|id| self.nodes.contains_key(&id)) {
                    return Ok(Vec::new());
                }
                self.selected = self.nodes.keys().next().copied();
                Ok(self.selected.map(Message::select_node).into_iter().collect())
            }
            Command::ChangeParam | Command::ChangeParams => {
                let node = message.node()?;
                let changed = message.changed_properties()?;
                match self.nodes.get_mut(&node) {
                    Some(props) => {
                        for property in changed {
                            props.replace(property);
                        }
                    }
                    None => debug!(node = %node, "edit for a node not in the mirror"),
                }
                Ok(Vec::new())
            }
            Command::SelectNode => {
                let node = message.node()?;
                if self.nodes.contains_key(&node) {
                    self.selected = Some(node);
                }
                Ok(Vec::new())
            }
            Command::Hello => Err(ProtocolError::UnexpectedCommand(Command::Hello)),
        }
    }

    /// Select a node locally; returns the SELECT_NODE to tell the host.
    pub fn select(&mut self, node: NodeId) -> Option<Message> {
        if !self.nodes.contains_key(&node) {
            return None;
        }
        self.selected = Some(node);
        Some(Message::select_node(node))
    }

    /// Edit a mirrored property; returns the CHANGE_PARAM to send.
    ///
    /// The mirror is patched right away, clamped to the mirrored bounds.
    pub fn change_param(&mut self, node: NodeId, property: PropertyId, value: f32) -> Option<Message> {
        let props = self.nodes.get_mut(&node)?;
        let edited = props.get(property)?.with_value(value);
        props.replace(edited.clone());
        Some(Message::change_param(node, edited))
    }

    /// Edit several properties of one node; returns one CHANGE_PARAMS.
    pub fn change_params(
        &mut self,
        node: NodeId,
        values: impl IntoIterator<Item = (PropertyId, f32)>,
    ) -> Option<Message> {
        let props = self.nodes.get_mut(&node)?;
        let edited: Vec<Property> = values
            .into_iter()
            .filter_map(|(id, value)| props.get(id).map(|p| p.with_value(value)))
            .collect();
        if edited.is_empty() {
            return None;
        }
        for property in &edited {
            props.replace(property.clone());
        }
        Some(Message::change_params(node, edited))
    }
}

struct MirrorHandler {
    mirror: Arc<Mutex<Mirror>>,
}

impl MessageHandler for MirrorHandler {
    fn on_message(&self, connection: &Connection, message: Message) {
        let (replies, id) = {
            let mut mirror = self.mirror.lock();
            match mirror.apply(&message) {
                Ok(replies) => (replies, mirror.id()),
                Err(e) => {
                    warn!(command = ?message.command, error = %e, "dropping message");
                    return;
                }
            }
        };
        if message.command == Command::SendId {
            connection.set_id(id);
        }
        for reply in replies {
            connection.send(reply);
        }
    }

    fn on_disconnect(&self, connection: &Connection) {
        debug!(id = connection.id(), "host went away");
    }
}

/// A connected controller: one connection plus its mirror.
///
/// Closes its connection when dropped.
pub struct Controller {
    connection: Connection,
    mirror: Arc<Mutex<Mirror>>,
}

impl Controller {
    /// Connect over `transport`. The handshake with the host then runs on
    /// its own: SEND_ID, HELLO, SEND_NODES.
    pub fn connect(transport: &dyn Transport) -> Result<Self, TransportError> {
        let connection = Connection::new(transport.kind());
        let mirror = Arc::new(Mutex::new(Mirror::new()));
        connection.connect(
            transport,
            Arc::new(MirrorHandler {
                mirror: mirror.clone(),
            }),
        )?;
        Ok(Self { connection, mirror })
    }

    #[inline]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn id(&self) -> ConnectionId {
        self.mirror.lock().id()
    }

    /// A copy of the current mirror
    pub fn mirror(&self) -> Mirror {
        self.mirror.lock().clone()
    }

    pub fn with_mirror<R>(&self, f: impl FnOnce(&Mirror) -> R) -> R {
        f(&self.mirror.lock())
    }

    pub fn select(&self, node: NodeId) -> bool {
        let message = self.mirror.lock().select(node);
        message.map(|m| self.connection.send(m)).is_some()
    }

    /// Edit a property and send it to the host. Returns the local value.
    pub fn change_param(&self, node: NodeId, property: PropertyId, value: f32) -> Option<Property> {
        let message = self.mirror.lock().change_param(node, property, value)?;
        let edited = message.property().ok().cloned();
        self.connection.send(message);
        edited
    }

    pub fn change_params(&self, node: NodeId, values: impl IntoIterator<Item = (PropertyId, f32)>) -> bool {
        let message = self.mirror.lock().change_params(node, values);
        message.map(|m| self.connection.send(m)).is_some()
    }

    pub fn close(&self) {
        self.connection.close();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AlgorithmKind;
    use crate::property::NodeProperties;
    use pretty_assertions::assert_eq;

    fn node(volume: f32) -> NodeProperties {
        NodeProperties::new(
            AlgorithmKind::Sinewave,
            [
                Property::new(PropertyId::Frequency, 440.0, 20.0, 2000.0),
                Property::new(PropertyId::Volume, volume, 0.0, 1.0),
            ],
        )
    }

    fn snapshot(ids: &[u32]) -> Snapshot {
        ids.iter().map(|&id| (NodeId::from(id), node(1.0))).collect()
    }

    #[test]
    fn send_id_triggers_hello() {
        let mut mirror = Mirror::new();
        let replies = mirror.apply(&Message::send_id(4, [0.1, 0.2, 0.3])).unwrap();
        assert_eq!(mirror.id(), 4);
        assert_eq!(mirror.color(), Some([0.1, 0.2, 0.3]));
        assert_eq!(replies, vec![Message::hello()]);
    }

    #[test]
    fn first_snapshot_selects_first_node() {
        let mut mirror = Mirror::new();
        let replies = mirror.apply(&Message::send_nodes(snapshot(&[3, 7]))).unwrap();
        assert_eq!(mirror.selected(), Some(NodeId::from(3)));
        assert_eq!(replies, vec![Message::select_node(NodeId::from(3))]);
    }

    #[test]
    fn selection_follows_id_not_position() {
        let mut mirror = Mirror::new();
        mirror.apply(&Message::send_nodes(snapshot(&[1, 2, 3]))).unwrap();
        mirror.select(NodeId::from(3)).unwrap();
        assert_eq!(mirror.selected_index(), Some(2));

        // node 1 went away: 3 is now at index 1, still selected
        let replies = mirror.apply(&Message::send_nodes(snapshot(&[2, 3]))).unwrap();
        assert!(replies.is_empty());
        assert_eq!(mirror.selected(), Some(NodeId::from(3)));
        assert_eq!(mirror.selected_index(), Some(1));
    }

    #[test]
    fn vanished_selection_falls_back() {
        let mut mirror = Mirror::new();
        mirror.apply(&Message::send_nodes(snapshot(&[1, 2]))).unwrap();
        mirror.select(NodeId::from(2)).unwrap();

        mirror.apply(&Message::send_nodes(snapshot(&[5]))).unwrap();
        assert_eq!(mirror.selected(), Some(NodeId::from(5)));

        mirror.apply(&Message::send_nodes(Snapshot::new())).unwrap();
        assert_eq!(mirror.selected(), None);
    }

    #[test]
    fn change_param_is_idempotent() {
        let mut mirror = Mirror::new();
        mirror.apply(&Message::send_nodes(snapshot(&[1]))).unwrap();
        let edit = Message::change_param(
            NodeId::from(1),
            Property::new(PropertyId::Volume, 0.25, 0.0, 1.0),
        );

        mirror.apply(&edit).unwrap();
        let once = mirror.clone();
        mirror.apply(&edit).unwrap();
        assert_eq!(mirror, once);
        assert_eq!(mirror.property(NodeId::from(1), PropertyId::Volume).unwrap().value(), 0.25);
    }

    #[test]
    fn local_edit_clamps_to_mirrored_bounds() {
        let mut mirror = Mirror::new();
        mirror.apply(&Message::send_nodes(snapshot(&[1]))).unwrap();

        let msg = mirror.change_param(NodeId::from(1), PropertyId::Volume, 3.0).unwrap();
        assert_eq!(msg.property().unwrap().value(), 1.0);
        assert_eq!(mirror.property(NodeId::from(1), PropertyId::Volume).unwrap().value(), 1.0);
        assert!(mirror.change_param(NodeId::from(9), PropertyId::Volume, 0.5).is_none());
        assert!(mirror.change_param(NodeId::from(1), PropertyId::Time, 0.5).is_none());
    }

    #[test]
    fn batch_edit_skips_unknown_properties() {
        let mut mirror = Mirror::new();
        mirror.apply(&Message::send_nodes(snapshot(&[1]))).unwrap();
        let msg = mirror
            .change_params(
                NodeId::from(1),
                [(PropertyId::Volume, 0.5), (PropertyId::Feedback, 0.2), (PropertyId::Frequency, 880.0)],
            )
            .unwrap();
        assert_eq!(msg.command, Command::ChangeParams);
        assert_eq!(msg.changed_properties().unwrap().len(), 2);
    }

    #[test]
    fn hello_is_not_for_controllers() {
        let mut mirror = Mirror::new();
        assert!(mirror.apply(&Message::hello()).is_err());
    }
}
