//! Low-frequency amplitude modulation

use crate::algorithm::source::{advance, Waveform};
use crate::node::ProcessContext;
use crate::property::{Property, PropertyBank, PropertyId};

/// Scales its input by a slow waveform mapped to `[0, 1]`.
#[derive(Debug)]
pub struct Lfo {
    waveform: Waveform,
    rate: f32,
    phase: f32,
}

impl Lfo {
    pub const INPUTS: usize = 1;

    pub fn new(waveform: Waveform) -> Self {
        let rate = match waveform {
            Waveform::Sawtooth => 2.0,
            _ => 0.66,
        };
        Self {
            waveform,
            rate,
            phase: 0.0,
        }
    }

    /// Modulation rate in Hz (builder pattern)
    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate.clamp(0.05, 20.0);
        self
    }

    #[inline]
    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn default_properties(&self) -> Vec<Property> {
        vec![
            Property::named(PropertyId::Frequency, "Rate", self.rate, 0.05, 20.0),
            Property::new(PropertyId::Volume, 1.0, 0.0, 1.0),
            Property::new(PropertyId::Pan, 0.0, -1.0, 1.0),
        ]
    }

    pub fn process(
        &mut self,
        ctx: &ProcessContext,
        params: &PropertyBank,
        input: &[f32],
        output: &mut [f32],
    ) {
        let phase_inc = params.value_or(PropertyId::Frequency, self.rate) / ctx.sample_rate as f32;
        let volume = params.value_or(PropertyId::Volume, 1.0);

        for (out, &x) in output.iter_mut().zip(input.iter()) {
            let depth = (self.waveform.sample(self.phase) + 1.0) * 0.5;
            *out = x * depth * volume;
            advance(&mut self.phase, phase_inc);
        }
    }
}
