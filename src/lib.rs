//! Syngraph - a live audio node graph shared with remote controllers
//!
//! One host owns the graph and renders it; any number of controllers keep
//! a mirror of every node's parameters and edit them over the network.
//!
//! Design principles:
//! - Nodes live in an arena keyed by [`NodeId`]; wiring refers to ids only
//! - Evaluation order is a topological sort with ascending-id tie-break
//! - Parameters are atomic value slots, replaced whole on every edit
//! - Structural edits are serialized against `tick`; parameter edits aren't
//! - Transports are pluggable; the protocol only sees [`net::Message`]s
//!
//! ```
//! use syngraph::{AlgorithmKind, AudioProcessor, Position, PropertyId};
//!
//! let synth = AudioProcessor::new(44_100);
//! let osc = synth.add_node(AlgorithmKind::Sinewave, Position::default());
//! synth.set_property_value(osc, PropertyId::Frequency, 220.0).unwrap();
//!
//! let left_right = synth.tick_interleaved(128);
//! assert_eq!(left_right.len(), 256);
//! ```

pub mod algorithm;
mod config;
mod graph;
pub mod net;
mod node;
mod output;
mod processor;
mod property;
pub mod protocol;

pub use algorithm::{AlgorithmKind, AudioAlgorithm};
pub use config::{ConfigError, SynthConfig};
pub use graph::{GraphError, NodeGraph, WiringError};
pub use node::{Node, NodeId, Position, ProcessContext};
pub use output::{ring_output, RingOutput};
pub use processor::{AudioProcessor, Snapshot};
pub use property::{NodeProperties, Property, PropertyBank, PropertyId};
pub use protocol::{Controller, Host, Mirror};
