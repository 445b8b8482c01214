//! The per-tick driver and the handle every other context edits the graph through

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::algorithm::{AlgorithmKind, AudioAlgorithm};
use crate::config::SynthConfig;
use crate::graph::{GraphError, NodeGraph};
use crate::node::{NodeId, Position, ProcessContext};
use crate::property::{NodeProperties, Property, PropertyBank, PropertyId};

/// Copy of every node's parameters and wiring, keyed by node id.
pub type Snapshot = BTreeMap<NodeId, NodeProperties>;

/// Render state that only exists while holding the engine lock
struct Engine {
    graph: NodeGraph,
    /// Evaluation order, refreshed when the graph is dirty
    order: Vec<NodeId>,
    /// Nodes nobody consumes, refreshed alongside `order`
    terminals: Vec<NodeId>,
    /// Last rendered block of every node
    buffers: HashMap<NodeId, Vec<f32>>,
    /// Nodes that actually ran this tick
    evaluated: HashSet<NodeId>,
    silence: Vec<f32>,
    /// Input slices of the node being rendered; emptied after every node
    inputs: Vec<&'static [f32]>,
    blocks_processed: u64,
}

/// Hand an empty vec's allocation over to a different borrow.
fn recycle<'a, 'b>(mut v: Vec<&'a [f32]>) -> Vec<&'b [f32]> {
    v.clear();
    v.into_iter().map(|_| &[][..]).collect()
}

impl Engine {
    fn new(sample_rate: u32) -> Self {
        Self {
            graph: NodeGraph::new(sample_rate),
            order: Vec::new(),
            terminals: Vec::new(),
            buffers: HashMap::with_capacity(64),
            evaluated: HashSet::with_capacity(64),
            silence: Vec::new(),
            inputs: Vec::with_capacity(4),
            blocks_processed: 0,
        }
    }

    fn refresh_arrangement(&mut self) {
        if self.graph.is_dirty() {
            self.arrange();
        }
    }

    /// Recompute the evaluation order and the terminal set.
    fn arrange(&mut self) {
        self.order = self.graph.arrange_all().to_vec();
        self.terminals = self.graph.terminals();
        let graph = &self.graph;
        self.buffers.retain(|id, _| graph.contains(*id));
        trace!(nodes = self.order.len(), terminals = self.terminals.len(), "arrangement refreshed");
    }

    /// Run every node once, in arrangement order, for a block of `len` samples.
    fn render(&mut self, len: usize) {
        self.refresh_arrangement();

        let ctx = ProcessContext {
            sample_rate: self.graph.sample_rate(),
            buffer_size: len,
        };
        self.silence.clear();
        self.silence.resize(len, 0.0);
        self.evaluated.clear();

        for &id in &self.order {
            let mut out = self.buffers.remove(&id).unwrap_or_default();
            out.clear();
            out.resize(len, 0.0);

            if let Some(node) = self.graph.node_mut(id) {
                // Unwired effects stay silent and don't count toward the mix.
                if node.is_wired() {
                    let mut inputs = recycle(std::mem::take(&mut self.inputs));
                    inputs.extend(node.inputs.iter().flatten().map(|src| {
                        self.buffers
                            .get(src)
                            .map_or(self.silence.as_slice(), Vec::as_slice)
                    }));
                    node.algorithm.process(&ctx, &node.bank, &inputs, &mut out);
                    self.inputs = recycle(inputs);
                    self.evaluated.insert(id);
                }
            }

            self.buffers.insert(id, out);
        }

        self.blocks_processed += 1;
    }

    /// Terminal nodes that ran this tick, with their pan.
    fn contributors(&self) -> impl Iterator<Item = (&[f32], f32)> + '_ {
        self.terminals
            .iter()
            .filter(|id| self.evaluated.contains(*id))
            .filter_map(|id| {
                let buffer = self.buffers.get(id)?;
                let pan = self
                    .graph
                    .node(*id)
                    .map_or(0.0, |n| n.bank.value_or(PropertyId::Pan, 0.0));
                Some((buffer.as_slice(), pan))
            })
    }

    /// Sum of terminals divided by how many contributed.
    fn mix_mono(&self, out: &mut [f32]) {
        out.iter_mut().for_each(|s| *s = 0.0);
        let mut count = 0usize;
        for (buffer, _) in self.contributors() {
            for (o, s) in out.iter_mut().zip(buffer) {
                *o += *s;
            }
            count += 1;
        }
        let scale = 1.0 / count.max(1) as f32;
        out.iter_mut().for_each(|s| *s *= scale);
    }

    /// Interleaved stereo mix. Pan uses a balance law: centre leaves both
    /// sides at unity, full left silences the right side and vice versa.
    fn mix_stereo(&self, out: &mut [f32]) {
        out.iter_mut().for_each(|s| *s = 0.0);
        let mut count = 0usize;
        for (buffer, pan) in self.contributors() {
            let left = (1.0 - pan).min(1.0);
            let right = (1.0 + pan).min(1.0);
            for (frame, s) in out.chunks_exact_mut(2).zip(buffer) {
                frame[0] += *s * left;
                frame[1] += *s * right;
            }
            count += 1;
        }
        let scale = 1.0 / count.max(1) as f32;
        out.iter_mut().for_each(|s| *s *= scale);
    }
}

struct Shared {
    engine: Mutex<Engine>,
    /// Parameter banks by node, readable without the engine lock
    banks: RwLock<HashMap<NodeId, Arc<PropertyBank>>>,
}

/// The audio processor: owns the node graph and renders it tick by tick.
///
/// `AudioProcessor` is a cheap, cloneable handle. The audio context calls
/// [`tick`](Self::tick); UI and network contexts edit through the same
/// handle from other threads.
///
/// - Structural edits (`add_node`, `remove_node`, `wire`, `unwire`) take the
///   same lock as `tick`, so a tick sees the graph entirely before or
///   entirely after an edit.
/// - Parameter edits never touch that lock. Each property is an atomic slot
///   that gets a whole new value per edit, and the audio thread reads it
///   once per block.
///
/// # Example
///
/// ```
/// use syngraph::{AlgorithmKind, AudioProcessor, Position};
///
/// let synth = AudioProcessor::new(44_100);
/// let osc = synth.add_node(AlgorithmKind::Sinewave, Position::default());
/// let delay = synth.add_node(AlgorithmKind::TapDelay, Position::default());
/// synth.wire(osc, delay, 0).unwrap();
///
/// let block = synth.tick(256);
/// assert_eq!(block.len(), 256);
/// ```
#[derive(Clone)]
pub struct AudioProcessor {
    shared: Arc<Shared>,
}

impl AudioProcessor {
    /// Create a processor with an empty graph at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine: Mutex::new(Engine::new(sample_rate)),
                banks: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn from_config(config: &SynthConfig) -> Self {
        Self::new(config.sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.engine.lock().graph.sample_rate()
    }

    /// Add a node running the default algorithm of `kind`
    pub fn add_node(&self, kind: AlgorithmKind, position: Position) -> NodeId {
        let mut engine = self.shared.engine.lock();
        let id = engine.graph.add_node(kind, position);
        self.register_bank(&engine.graph, id);
        id
    }

    /// Add a node around a pre-configured algorithm
    pub fn add_algorithm(&self, algorithm: AudioAlgorithm, position: Position) -> NodeId {
        let mut engine = self.shared.engine.lock();
        let id = engine.graph.add_algorithm(algorithm, position);
        self.register_bank(&engine.graph, id);
        id
    }

    fn register_bank(&self, graph: &NodeGraph, id: NodeId) {
        if let Some(bank) = graph.bank(id) {
            self.shared.banks.write().insert(id, bank);
        }
    }

    /// Remove a node. Unknown ids are a no-op; returns whether anything was removed.
    pub fn remove_node(&self, id: NodeId) -> bool {
        let mut engine = self.shared.engine.lock();
        let removed = engine.graph.remove_node(id);
        if removed {
            self.shared.banks.write().remove(&id);
        }
        removed
    }

    /// Wire `src` into input `slot` of `dst`; see [`NodeGraph::wire`]
    pub fn wire(&self, src: NodeId, dst: NodeId, slot: usize) -> Result<(), GraphError> {
        self.shared.engine.lock().graph.wire(src, dst, slot)
    }

    pub fn unwire(&self, dst: NodeId, slot: usize) -> bool {
        self.shared.engine.lock().graph.unwire(dst, slot)
    }

    pub fn set_position(&self, id: NodeId, position: Position) -> bool {
        self.shared.engine.lock().graph.set_position(id, position)
    }

    /// Store a new value for one property, clamped into its range.
    ///
    /// Returns the property as stored.
    pub fn set_property_value(
        &self,
        node: NodeId,
        property: PropertyId,
        value: f32,
    ) -> Result<Property, GraphError> {
        let bank = self
            .shared
            .banks
            .read()
            .get(&node)
            .cloned()
            .ok_or(GraphError::UnknownNode(node))?;

        let stored = bank
            .set(property, value)
            .ok_or(GraphError::UnknownProperty { node, property })?;
        trace!(node = %node, property = ?property, value = stored.value(), "property set");
        Ok(stored)
    }

    pub fn property(&self, node: NodeId, property: PropertyId) -> Option<Property> {
        self.shared.banks.read().get(&node)?.get(property)
    }

    /// Copy out every node's parameters and wiring.
    ///
    /// The result owns its data; later edits don't show through it.
    pub fn snapshot(&self) -> Snapshot {
        let engine = self.shared.engine.lock();
        engine
            .graph
            .ids()
            .into_iter()
            .filter_map(|id| Some((id, engine.graph.node_properties(id)?)))
            .collect()
    }

    pub fn node_properties(&self, id: NodeId) -> Option<NodeProperties> {
        self.shared.engine.lock().graph.node_properties(id)
    }

    /// Recompute the evaluation order now rather than on the next tick.
    pub fn arrange_all(&self) -> Vec<NodeId> {
        let mut engine = self.shared.engine.lock();
        engine.arrange();
        engine.order.clone()
    }

    /// Run `f` against the graph while holding the engine lock.
    pub fn with_graph<R>(&self, f: impl FnOnce(&NodeGraph) -> R) -> R {
        f(&self.shared.engine.lock().graph)
    }

    pub fn node_count(&self) -> usize {
        self.shared.engine.lock().graph.len()
    }

    pub fn blocks_processed(&self) -> u64 {
        self.shared.engine.lock().blocks_processed
    }

    /// Render `buffer_size` mono samples.
    pub fn tick(&self, buffer_size: usize) -> Vec<f32> {
        let mut out = vec![0.0; buffer_size];
        self.tick_into(&mut out);
        out
    }

    /// Render `out.len()` mono samples into `out`.
    ///
    /// Terminal nodes are summed and divided by the number that ran, so
    /// in-range node output never clips. An empty graph renders silence.
    pub fn tick_into(&self, out: &mut [f32]) {
        let mut engine = self.shared.engine.lock();
        engine.render(out.len());
        engine.mix_mono(out);
    }

    /// Render `frames` stereo frames, interleaved left/right.
    pub fn tick_interleaved(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        self.tick_interleaved_into(&mut out);
        out
    }

    /// Render `out.len() / 2` interleaved stereo frames into `out`.
    pub fn tick_interleaved_into(&self, out: &mut [f32]) {
        let mut engine = self.shared.engine.lock();
        engine.render(out.len() / 2);
        engine.mix_stereo(out);
    }
}

impl Default for AudioProcessor {
    fn default() -> Self {
        Self::from_config(&SynthConfig::default())
    }
}

impl std::fmt::Debug for AudioProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engine = self.shared.engine.lock();
        f.debug_struct("AudioProcessor")
            .field("sample_rate", &engine.graph.sample_rate())
            .field("nodes", &engine.graph.len())
            .field("blocks_processed", &engine.blocks_processed)
            .finish()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        debug!(nodes = self.engine.get_mut().graph.len(), "audio processor dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{Oscillator, Waveform};

    #[test]
    fn explicit_arrange_is_seen_by_the_next_tick() {
        let synth = AudioProcessor::new(48_000);
        let osc = synth.add_node(AlgorithmKind::Square, Position::default());
        assert_eq!(synth.arrange_all(), vec![osc]);
        assert!(synth.tick(16).iter().all(|s| s.abs() == 1.0));

        let delay = synth.add_node(AlgorithmKind::TapDelay, Position::default());
        synth.wire(osc, delay, 0).unwrap();
        assert_eq!(synth.arrange_all(), vec![osc, delay]);
        assert!(synth.tick(64).iter().any(|&s| s != 0.0));
        assert_eq!(synth.with_graph(|g| g.terminals()), vec![delay]);
    }

    #[test]
    fn empty_graph_is_silent() {
        let synth = AudioProcessor::new(48_000);
        assert!(synth.tick(64).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn unwired_effect_alone_is_silent() {
        let synth = AudioProcessor::new(48_000);
        synth.add_node(AlgorithmKind::TapDelay, Position::default());
        assert!(synth.tick(64).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn unwired_effect_does_not_dilute_the_mix() {
        let synth = AudioProcessor::new(48_000);
        synth.add_algorithm(
            Oscillator::new(Waveform::Square).with_volume(0.5).into(),
            Position::default(),
        );
        synth.add_node(AlgorithmKind::Lfo, Position::default());
        assert!(synth.tick(32).iter().all(|&s| s.abs() == 0.5));
    }

    #[test]
    fn summed_terminals_are_divided_by_count() {
        let synth = AudioProcessor::new(48_000);
        for _ in 0..8 {
            synth.add_node(AlgorithmKind::Square, Position::default());
        }
        // eight in-phase full-scale squares would sum to 8.0
        let out = synth.tick(128);
        assert!(out.iter().all(|&s| (s.abs() - 1.0).abs() < 1e-6));
    }

    #[test]
    fn consumed_nodes_are_not_mixed_directly() {
        let synth = AudioProcessor::new(48_000);
        let osc = synth.add_node(AlgorithmKind::Square, Position::default());
        let lfo = synth.add_node(AlgorithmKind::Lfo, Position::default());
        synth.set_property_value(lfo, PropertyId::Volume, 0.0).unwrap();
        synth.wire(osc, lfo, 0).unwrap();
        // the only terminal is the muted LFO
        assert!(synth.tick(64).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn set_property_clamps_and_reports_unknowns() {
        let synth = AudioProcessor::new(48_000);
        let osc = synth.add_node(AlgorithmKind::Sinewave, Position::default());

        let p = synth.set_property_value(osc, PropertyId::Volume, 7.0).unwrap();
        assert_eq!(p.value(), 1.0);
        let p = synth.set_property_value(osc, PropertyId::Volume, -7.0).unwrap();
        assert_eq!(p.value(), 0.0);

        assert_eq!(
            synth.set_property_value(osc, PropertyId::Time, 1.0),
            Err(GraphError::UnknownProperty {
                node: osc,
                property: PropertyId::Time
            })
        );
        let ghost = NodeId::from(42);
        assert_eq!(
            synth.set_property_value(ghost, PropertyId::Volume, 1.0),
            Err(GraphError::UnknownNode(ghost))
        );
    }

    #[test]
    fn snapshot_is_a_copy() {
        let synth = AudioProcessor::new(48_000);
        let osc = synth.add_node(AlgorithmKind::Sinewave, Position::default());
        let before = synth.snapshot();
        synth.set_property_value(osc, PropertyId::Frequency, 880.0).unwrap();

        let old = before[&osc].get(PropertyId::Frequency).unwrap().value();
        let new = synth.snapshot()[&osc].get(PropertyId::Frequency).unwrap().value();
        assert_eq!(old, 440.0);
        assert_eq!(new, 880.0);
    }

    #[test]
    fn hard_left_pan_silences_right_channel() {
        let synth = AudioProcessor::new(48_000);
        let osc = synth.add_node(AlgorithmKind::Square, Position::default());
        synth.set_property_value(osc, PropertyId::Pan, -1.0).unwrap();

        let out = synth.tick_interleaved(16);
        for frame in out.chunks_exact(2) {
            assert_eq!(frame[0].abs(), 1.0);
            assert_eq!(frame[1], 0.0);
        }
    }

    #[test]
    fn rearranges_only_when_dirty() {
        let synth = AudioProcessor::new(48_000);
        synth.add_node(AlgorithmKind::Sinewave, Position::default());
        synth.tick(8);
        assert!(!synth.with_graph(NodeGraph::is_dirty));
        synth.add_node(AlgorithmKind::Sinewave, Position::default());
        assert!(synth.with_graph(NodeGraph::is_dirty));
        synth.tick(8);
        assert!(!synth.with_graph(NodeGraph::is_dirty));
        assert_eq!(synth.blocks_processed(), 2);
    }
}
