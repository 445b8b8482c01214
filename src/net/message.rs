//! The command vocabulary exchanged between host and controllers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::NodeId;
use crate::processor::Snapshot;
use crate::property::Property;

/// Host-assigned connection id. 0 means "not assigned yet".
pub type ConnectionId = u32;

/// Extras keys used by the built-in commands.
pub mod keys {
    pub const ID: &str = "id";
    pub const COLOR: &str = "color";
    pub const NODES: &str = "nodes";
    pub const NODE: &str = "node";
    pub const PROPERTY: &str = "property";
    pub const PROPERTIES: &str = "properties";
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Host to controller: your id and highlight colour
    SendId,
    /// Controller to host: ready for graph traffic
    Hello,
    /// Host to controller: full snapshot of every node
    SendNodes,
    /// One property of one node changed
    ChangeParam,
    /// Several properties of one node changed
    ChangeParams,
    /// A controller focused a node
    SelectNode,
}

/// A typed value carried in [`Message::extras`].
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Extra {
    Int(i64),
    Float(f32),
    Text(String),
    Color([f32; 3]),
    Node(NodeId),
    Property(Property),
    Properties(Vec<Property>),
    Nodes(Snapshot),
}

impl Extra {
    fn type_name(&self) -> &'static str {
        match self {
            Extra::Int(_) => "int",
            Extra::Float(_) => "float",
            Extra::Text(_) => "text",
            Extra::Color(_) => "color",
            Extra::Node(_) => "node",
            Extra::Property(_) => "property",
            Extra::Properties(_) => "properties",
            Extra::Nodes(_) => "nodes",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{command:?} is missing extra `{key}`")]
    MissingExtra { command: Command, key: &'static str },

    #[error("extra `{key}` should be {expected}, got {found}")]
    WrongExtraType {
        key: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0:?} is not valid here")]
    UnexpectedCommand(Command),
}

/// A command plus its extras.
///
/// ```
/// use syngraph::net::{Command, Message};
/// use syngraph::NodeId;
///
/// let msg = Message::select_node(NodeId::from(3));
/// assert_eq!(msg.command, Command::SelectNode);
/// assert_eq!(msg.node().unwrap(), NodeId::from(3));
/// ```
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Message {
    pub command: Command,
    #[serde(default)]
    pub extras: BTreeMap<String, Extra>,
    /// Id of the controller this message originated from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ConnectionId>,
}

impl Message {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            extras: BTreeMap::new(),
            sender: None,
        }
    }

    /// Attach an extra (builder pattern)
    pub fn with_extra(mut self, key: &str, value: Extra) -> Self {
        self.extras.insert(key.to_string(), value);
        self
    }

    pub fn with_sender(mut self, sender: ConnectionId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn send_id(id: ConnectionId, color: [f32; 3]) -> Self {
        Self::new(Command::SendId)
            .with_extra(keys::ID, Extra::Int(id.into()))
            .with_extra(keys::COLOR, Extra::Color(color))
    }

    pub fn hello() -> Self {
        Self::new(Command::Hello)
    }

    pub fn send_nodes(snapshot: Snapshot) -> Self {
        Self::new(Command::SendNodes).with_extra(keys::NODES, Extra::Nodes(snapshot))
    }

    pub fn change_param(node: NodeId, property: Property) -> Self {
        Self::new(Command::ChangeParam)
            .with_extra(keys::NODE, Extra::Node(node))
            .with_extra(keys::PROPERTY, Extra::Property(property))
    }

    pub fn change_params(node: NodeId, properties: Vec<Property>) -> Self {
        Self::new(Command::ChangeParams)
            .with_extra(keys::NODE, Extra::Node(node))
            .with_extra(keys::PROPERTIES, Extra::Properties(properties))
    }

    pub fn select_node(node: NodeId) -> Self {
        Self::new(Command::SelectNode).with_extra(keys::NODE, Extra::Node(node))
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a message body. Unknown commands are a decode error.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn extra(&self, key: &'static str) -> Result<&Extra, ProtocolError> {
        self.extras.get(key).ok_or(ProtocolError::MissingExtra {
            command: self.command,
            key,
        })
    }

    fn wrong(key: &'static str, expected: &'static str, found: &Extra) -> ProtocolError {
        ProtocolError::WrongExtraType {
            key,
            expected,
            found: found.type_name(),
        }
    }

    /// The connection id carried by SEND_ID
    pub fn id(&self) -> Result<ConnectionId, ProtocolError> {
        match self.extra(keys::ID)? {
            Extra::Int(id) => {
                ConnectionId::try_from(*id).map_err(|_| ProtocolError::WrongExtraType {
                    key: keys::ID,
                    expected: "connection id",
                    found: "int",
                })
            }
            other => Err(Self::wrong(keys::ID, "int", other)),
        }
    }

    pub fn color(&self) -> Result<[f32; 3], ProtocolError> {
        match self.extra(keys::COLOR)? {
            Extra::Color(c) => Ok(*c),
            other => Err(Self::wrong(keys::COLOR, "color", other)),
        }
    }

    pub fn nodes(&self) -> Result<&Snapshot, ProtocolError> {
        match self.extra(keys::NODES)? {
            Extra::Nodes(n) => Ok(n),
            other => Err(Self::wrong(keys::NODES, "nodes", other)),
        }
    }

    pub fn node(&self) -> Result<NodeId, ProtocolError> {
        match self.extra(keys::NODE)? {
            Extra::Node(n) => Ok(*n),
            other => Err(Self::wrong(keys::NODE, "node", other)),
        }
    }

    pub fn property(&self) -> Result<&Property, ProtocolError> {
        match self.extra(keys::PROPERTY)? {
            Extra::Property(p) => Ok(p),
            other => Err(Self::wrong(keys::PROPERTY, "property", other)),
        }
    }

    /// The changed properties of CHANGE_PARAM or CHANGE_PARAMS
    pub fn changed_properties(&self) -> Result<Vec<Property>, ProtocolError> {
        match self.command {
            Command::ChangeParam => Ok(vec![self.property()?.clone()]),
            Command::ChangeParams => match self.extra(keys::PROPERTIES)? {
                Extra::Properties(ps) => Ok(ps.clone()),
                other => Err(Self::wrong(keys::PROPERTIES, "properties", other)),
            },
            other => Err(ProtocolError::UnexpectedCommand(other)),
        }
    }
}
