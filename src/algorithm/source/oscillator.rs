//! Phase-accumulating oscillators

use serde::{Deserialize, Serialize};

use crate::algorithm::source::Scale;
use crate::node::ProcessContext;
use crate::property::{Property, PropertyBank, PropertyId};

pub const MIN_FREQUENCY: f32 = 20.0;
pub const MAX_FREQUENCY: f32 = 2000.0;

/// Shape of one oscillator period.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// Value at `phase` in `[0, 1)`, in `[-1, 1]`.
    #[inline]
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * core::f32::consts::TAU).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Advance `phase` by `inc`, keeping it in `[0, 1)`.
#[inline]
pub(crate) fn advance(phase: &mut f32, inc: f32) {
    *phase += inc;
    // Branchless phase wrap (phase is always positive)
    *phase -= (*phase >= 1.0) as u32 as f32;
}

/// An oscillator generator.
///
/// Free-running oscillators expose `FREQUENCY`. Oscillators built with
/// [`Oscillator::with_scale`] expose `TONE` instead: the rounded step index
/// into the scale picks the pitch.
#[derive(Debug)]
pub struct Oscillator {
    waveform: Waveform,
    frequency: f32,
    volume: f32,
    scale: Option<Scale>,
    phase: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            frequency: 440.0,
            volume: 1.0,
            scale: None,
            phase: 0.0,
        }
    }

    /// Initial frequency (builder pattern)
    pub fn with_frequency(mut self, frequency: f32) -> Self {
        self.frequency = frequency.clamp(MIN_FREQUENCY, MAX_FREQUENCY);
        self
    }

    /// Initial volume (builder pattern)
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Lock pitch to the steps of `scale`
    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = Some(scale);
        self
    }

    #[inline]
    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    #[inline]
    pub fn scale(&self) -> Option<&Scale> {
        self.scale.as_ref()
    }

    pub fn default_properties(&self) -> Vec<Property> {
        let pitch = match &self.scale {
            Some(scale) => {
                Property::new(PropertyId::Tone, 0.0, 0.0, (scale.len() - 1) as f32)
            }
            None => Property::new(
                PropertyId::Frequency,
                self.frequency,
                MIN_FREQUENCY,
                MAX_FREQUENCY,
            ),
        };
        vec![
            pitch,
            Property::new(PropertyId::Volume, self.volume, 0.0, 1.0),
            Property::new(PropertyId::Pan, 0.0, -1.0, 1.0),
        ]
    }

    fn current_frequency(&self, params: &PropertyBank) -> f32 {
        match &self.scale {
            Some(scale) => {
                let step = params.value_or(PropertyId::Tone, 0.0).round() as usize;
                scale.frequency(step)
            }
            None => params.value_or(PropertyId::Frequency, self.frequency),
        }
    }

    pub fn process(&mut self, ctx: &ProcessContext, params: &PropertyBank, output: &mut [f32]) {
        let phase_inc = self.current_frequency(params) / ctx.sample_rate as f32;
        let volume = params.value_or(PropertyId::Volume, self.volume);

        for sample in output.iter_mut() {
            *sample = self.waveform.sample(self.phase) * volume;
            advance(&mut self.phase, phase_inc);
        }
    }
}
