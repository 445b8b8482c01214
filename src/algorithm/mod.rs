//! Signal-processing algorithms carried by graph nodes.
//!
//! Algorithms come in two families:
//!
//! ## Sources ([`source`])
//!
//! Generate audio with no inputs:
//! - [`Oscillator`] - phase-accumulating oscillator over a [`Waveform`],
//!   either free-running at `FREQUENCY` or locked to a [`Scale`] via `TONE`
//!
//! ## Effects ([`effect`])
//!
//! Transform the buffers of upstream nodes:
//! - [`Lfo`] - amplitude modulation by a low-frequency waveform
//! - [`TapDelay`] - feedback delay line
//!
//! Dispatch is by variant tag: [`AudioAlgorithm`] is a plain enum and every
//! capability (`process`, `num_inputs`, `default_properties`) is a `match`.

pub mod effect;
pub mod source;

use serde::{Deserialize, Serialize};

use crate::node::ProcessContext;
use crate::property::{Property, PropertyBank};

pub use effect::{Effect, Lfo, TapDelay};
pub use source::{Oscillator, Scale, ScaleBase, ScaleMode, Waveform};

/// Tag naming a concrete algorithm.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgorithmKind {
    Square,
    Sinewave,
    Sawtooth,
    Triangle,
    Lfo,
    TapDelay,
}

impl AlgorithmKind {
    pub fn label(self) -> &'static str {
        match self {
            AlgorithmKind::Square => "Square",
            AlgorithmKind::Sinewave => "Sinewave",
            AlgorithmKind::Sawtooth => "Sawtooth",
            AlgorithmKind::Triangle => "Triangle",
            AlgorithmKind::Lfo => "LFO",
            AlgorithmKind::TapDelay => "TapDelay",
        }
    }

    pub fn is_generator(self) -> bool {
        !matches!(self, AlgorithmKind::Lfo | AlgorithmKind::TapDelay)
    }
}

/// A generator or effect plus whatever state it needs across ticks.
#[derive(Debug)]
pub enum AudioAlgorithm {
    Generator(Oscillator),
    Effect(Effect),
}

impl AudioAlgorithm {
    /// Build the default algorithm for `kind` at the given sample rate.
    pub fn from_kind(kind: AlgorithmKind, sample_rate: u32) -> Self {
        match kind {
            AlgorithmKind::Square => Oscillator::new(Waveform::Square).into(),
            AlgorithmKind::Sinewave => Oscillator::new(Waveform::Sine).into(),
            AlgorithmKind::Sawtooth => Oscillator::new(Waveform::Sawtooth).into(),
            AlgorithmKind::Triangle => Oscillator::new(Waveform::Triangle).into(),
            AlgorithmKind::Lfo => Effect::Lfo(Lfo::new(Waveform::Sine)).into(),
            AlgorithmKind::TapDelay => Effect::TapDelay(TapDelay::new(sample_rate)).into(),
        }
    }

    pub fn kind(&self) -> AlgorithmKind {
        match self {
            AudioAlgorithm::Generator(osc) => match osc.waveform() {
                Waveform::Square => AlgorithmKind::Square,
                Waveform::Sine => AlgorithmKind::Sinewave,
                Waveform::Sawtooth => AlgorithmKind::Sawtooth,
                Waveform::Triangle => AlgorithmKind::Triangle,
            },
            AudioAlgorithm::Effect(Effect::Lfo(_)) => AlgorithmKind::Lfo,
            AudioAlgorithm::Effect(Effect::TapDelay(_)) => AlgorithmKind::TapDelay,
        }
    }

    pub fn is_generator(&self) -> bool {
        matches!(self, AudioAlgorithm::Generator(_))
    }

    /// Number of input slots (0 for generators).
    pub fn num_inputs(&self) -> usize {
        match self {
            AudioAlgorithm::Generator(_) => 0,
            AudioAlgorithm::Effect(fx) => fx.num_inputs(),
        }
    }

    /// The properties a fresh node of this algorithm starts with.
    pub fn default_properties(&self) -> Vec<Property> {
        match self {
            AudioAlgorithm::Generator(osc) => osc.default_properties(),
            AudioAlgorithm::Effect(fx) => fx.default_properties(),
        }
    }

    /// Render one block into `output`.
    ///
    /// `inputs` holds one buffer per input slot, in slot order. Generators
    /// ignore it. Parameter values are read from `params` once per block.
    pub fn process(
        &mut self,
        ctx: &ProcessContext,
        params: &PropertyBank,
        inputs: &[&[f32]],
        output: &mut [f32],
    ) {
        match self {
            AudioAlgorithm::Generator(osc) => osc.process(ctx, params, output),
            AudioAlgorithm::Effect(fx) => fx.process(ctx, params, inputs, output),
        }
    }
}

impl From<Oscillator> for AudioAlgorithm {
    fn from(osc: Oscillator) -> Self {
        AudioAlgorithm::Generator(osc)
    }
}

impl From<Effect> for AudioAlgorithm {
    fn from(fx: Effect) -> Self {
        AudioAlgorithm::Effect(fx)
    }
}
