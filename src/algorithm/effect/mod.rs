mod lfo;
mod tap_delay;

pub use lfo::*;
pub use tap_delay::*;

use crate::node::ProcessContext;
use crate::property::{Property, PropertyBank};

/// The effect algorithms. Each consumes the buffers wired into its slots.
#[derive(Debug)]
pub enum Effect {
    Lfo(Lfo),
    TapDelay(TapDelay),
}

impl Effect {
    pub fn num_inputs(&self) -> usize {
        match self {
            Effect::Lfo(_) => Lfo::INPUTS,
            Effect::TapDelay(_) => TapDelay::INPUTS,
        }
    }

    pub fn default_properties(&self) -> Vec<Property> {
        match self {
            Effect::Lfo(lfo) => lfo.default_properties(),
            Effect::TapDelay(delay) => delay.default_properties(),
        }
    }

    pub fn process(
        &mut self,
        ctx: &ProcessContext,
        params: &PropertyBank,
        inputs: &[&[f32]],
        output: &mut [f32],
    ) {
        // Callers only evaluate wired effects, but never read past what we got.
        let Some(&input) = inputs.first() else {
            output.iter_mut().for_each(|s| *s = 0.0);
            return;
        };

        match self {
            Effect::Lfo(lfo) => lfo.process(ctx, params, input, output),
            Effect::TapDelay(delay) => delay.process(ctx, params, input, output),
        }
    }
}
