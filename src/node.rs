//! Graph vertices and the context passed to every processing call.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::algorithm::AudioAlgorithm;
use crate::property::PropertyBank;

/// Information available during audio processing.
///
/// Passed to every [`AudioAlgorithm::process`] call. Contains the graph's
/// sample rate and the number of samples requested for the current tick.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of samples in the current tick
    pub buffer_size: usize,
}

/// Unique identifier for a node within a graph.
///
/// Assigned by the host, starting at 1 and never reused within a graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for NodeId {
    fn from(raw: u32) -> Self {
        NodeId(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Layout position of a node on the editor surface. Not used for audio.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A graph vertex: one algorithm plus its input wiring.
///
/// `inputs` has one slot per input the algorithm requires; an empty slot is
/// `None`. A node whose slots are not all filled is *unwired* and renders
/// silence.
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) position: Position,
    pub(crate) inputs: Vec<Option<NodeId>>,
    pub(crate) algorithm: AudioAlgorithm,
    pub(crate) bank: Arc<PropertyBank>,
}

impl Node {
    pub(crate) fn new(id: NodeId, position: Position, algorithm: AudioAlgorithm) -> Self {
        let bank = Arc::new(PropertyBank::new(algorithm.default_properties()));
        Self {
            id,
            position,
            inputs: vec![None; algorithm.num_inputs()],
            algorithm,
            bank,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn algorithm(&self) -> &AudioAlgorithm {
        &self.algorithm
    }

    /// Ids currently wired into this node, in slot order, skipping empty slots.
    pub fn inputs(&self) -> Vec<NodeId> {
        self.inputs.iter().flatten().copied().collect()
    }

    pub fn slots(&self) -> &[Option<NodeId>] {
        &self.inputs
    }

    /// Every input slot is filled. Always true for generators.
    pub fn is_wired(&self) -> bool {
        self.inputs.iter().all(Option::is_some)
    }

    pub fn properties(&self) -> &Arc<PropertyBank> {
        &self.bank
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.algorithm.kind())
            .field("inputs", &self.inputs)
            .finish()
    }
}
