//! Node graph - owns nodes, wiring and the evaluation order

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use hashbrown::HashMap;
use itertools::Itertools;
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use thiserror::Error;
use tracing::{debug, trace};

use crate::algorithm::{AlgorithmKind, AudioAlgorithm};
use crate::node::{Node, NodeId, Position};
use crate::property::{NodeProperties, PropertyBank};

/// Why a `wire` call was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WiringError {
    #[error("node {0} is a generator and has no inputs")]
    GeneratorHasNoInputs(NodeId),
    #[error("slot {slot} out of range for node {node} ({inputs} inputs)")]
    SlotOutOfRange {
        node: NodeId,
        slot: usize,
        inputs: usize,
    },
    #[error("node {0} cannot feed itself")]
    SelfLoop(NodeId),
    #[error("wiring {src} into {dst} would create a cycle")]
    Cycle { src: NodeId, dst: NodeId },
}

/// Errors from graph operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {node} has no property {property:?}")]
    UnknownProperty {
        node: NodeId,
        property: crate::property::PropertyId,
    },
    #[error("invalid wiring: {0}")]
    InvalidWiring(#[from] WiringError),
}

/// The mutable node graph.
///
/// Nodes live in an id-keyed arena and refer to each other only by id, so
/// removing a node is one map deletion plus a sweep of dangling input ids.
/// The evaluation order is cached and recomputed after structural edits.
pub struct NodeGraph {
    sample_rate: u32,
    nodes: HashMap<NodeId, Node>,
    next_node_id: u32,
    arrangement: Option<Vec<NodeId>>,
}

impl NodeGraph {
    /// Create an empty graph at the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            nodes: HashMap::with_capacity(64),
            next_node_id: 1,
            arrangement: Some(Vec::new()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Add a node running the default algorithm of `kind`
    pub fn add_node(&mut self, kind: AlgorithmKind, position: Position) -> NodeId {
        let algorithm = AudioAlgorithm::from_kind(kind, self.sample_rate);
        self.add_algorithm(algorithm, position)
    }

    /// Add a node around an already-configured algorithm. All input slots start empty.
    pub fn add_algorithm(&mut self, algorithm: AudioAlgorithm, position: Position) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        debug!(node = %id, kind = ?algorithm.kind(), "node added");
        self.nodes.insert(id, Node::new(id, position, algorithm));
        self.arrangement = None;
        id
    }

    /// Remove a node and clear it from every other node's inputs.
    ///
    /// Effects that lose an input stay in the graph, unwired. Removing an
    /// unknown id does nothing. Returns whether a node was removed.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if self.nodes.remove(&id).is_none() {
            return false;
        }

        for node in self.nodes.values_mut() {
            for slot in node.inputs.iter_mut() {
                if *slot == Some(id) {
                    *slot = None;
                    debug!(node = %node.id, removed = %id, "input unwired by removal");
                }
            }
        }

        debug!(node = %id, "node removed");
        self.arrangement = None;
        true
    }

    /// Feed the output of `src` into input `slot` of `dst`.
    ///
    /// Replaces whatever was in that slot. Checked before anything is
    /// touched: on error the graph is unchanged.
    pub fn wire(&mut self, src: NodeId, dst: NodeId, slot: usize) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&src) {
            return Err(GraphError::UnknownNode(src));
        }
        let dst_node = self.nodes.get(&dst).ok_or(GraphError::UnknownNode(dst))?;

        let inputs = dst_node.algorithm.num_inputs();
        if inputs == 0 {
            return Err(WiringError::GeneratorHasNoInputs(dst).into());
        }
        if slot >= inputs {
            return Err(WiringError::SlotOutOfRange {
                node: dst,
                slot,
                inputs,
            }
            .into());
        }
        if src == dst {
            return Err(WiringError::SelfLoop(dst).into());
        }

        // The new edge is src -> dst; it closes a cycle iff dst already reaches src.
        let topology = self.topology_without(dst, slot);
        if has_path_connecting(&topology, dst, src, None) {
            return Err(WiringError::Cycle { src, dst }.into());
        }

        if let Some(node) = self.nodes.get_mut(&dst) {
            node.inputs[slot] = Some(src);
        }
        debug!(src = %src, dst = %dst, slot, "wired");
        self.arrangement = None;
        Ok(())
    }

    /// Empty input `slot` of `dst`. Unknown nodes or slots are ignored.
    pub fn unwire(&mut self, dst: NodeId, slot: usize) -> bool {
        let Some(node) = self.nodes.get_mut(&dst) else {
            return false;
        };
        match node.inputs.get_mut(slot) {
            Some(s @ Some(_)) => {
                *s = None;
                self.arrangement = None;
                true
            }
            _ => false,
        }
    }

    /// Edges `input -> consumer` for every filled slot, optionally leaving out one slot.
    fn topology_without(&self, skip_node: NodeId, skip_slot: usize) -> DiGraphMap<NodeId, ()> {
        let mut g = DiGraphMap::with_capacity(self.nodes.len(), self.nodes.len());
        for id in self.nodes.keys() {
            g.add_node(*id);
        }
        for node in self.nodes.values() {
            for (slot, input) in node.inputs.iter().enumerate() {
                if node.id == skip_node && slot == skip_slot {
                    continue;
                }
                if let Some(src) = input {
                    g.add_edge(*src, node.id, ());
                }
            }
        }
        g
    }

    fn topology(&self) -> DiGraphMap<NodeId, ()> {
        self.topology_without(NodeId(0), usize::MAX)
    }

    /// Whether a structural edit happened since the last arrangement.
    pub fn is_dirty(&self) -> bool {
        self.arrangement.is_none()
    }

    /// Recompute the evaluation order.
    ///
    /// Kahn's algorithm over the input edges. Among nodes whose inputs are
    /// all placed, the smallest id goes first, so identical graphs always
    /// arrange identically.
    pub fn arrange_all(&mut self) -> &[NodeId] {
        let topology = self.topology();

        let mut pending: HashMap<NodeId, usize> = topology
            .nodes()
            .map(|n| (n, topology.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeId>> = pending
            .iter()
            .filter(|&(_, &deps)| deps == 0)
            .map(|(&n, _)| Reverse(n))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for next in topology.neighbors_directed(id, Direction::Outgoing) {
                if let Some(deps) = pending.get_mut(&next) {
                    *deps -= 1;
                    if *deps == 0 {
                        ready.push(Reverse(next));
                    }
                }
            }
        }

        trace!(order = %order.iter().join(" "), "arranged");
        self.arrangement.insert(order)
    }

    /// The cached order, recomputing it if the graph changed.
    pub fn arrangement(&mut self) -> &[NodeId] {
        if self.arrangement.is_none() {
            self.arrange_all();
        }
        self.arrangement.as_deref().unwrap_or(&[])
    }

    /// Nodes that no other node consumes, in ascending id order.
    pub fn terminals(&self) -> Vec<NodeId> {
        let consumed: hashbrown::HashSet<NodeId> = self
            .nodes
            .values()
            .flat_map(|n| n.inputs.iter().flatten().copied())
            .collect();
        self.nodes
            .keys()
            .filter(|id| !consumed.contains(*id))
            .copied()
            .sorted_unstable()
            .collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in ascending order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().sorted_unstable().collect()
    }

    pub fn set_position(&mut self, id: NodeId, position: Position) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.position = position;
                true
            }
            None => false,
        }
    }

    pub(crate) fn bank(&self, id: NodeId) -> Option<Arc<PropertyBank>> {
        self.nodes.get(&id).map(|n| Arc::clone(&n.bank))
    }

    /// Copy out one node's current parameters and wiring.
    pub fn node_properties(&self, id: NodeId) -> Option<NodeProperties> {
        let node = self.nodes.get(&id)?;
        Some(
            NodeProperties::new(node.algorithm.kind(), node.bank.snapshot())
                .with_inputs(node.inputs()),
        )
    }
}
