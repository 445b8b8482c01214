//! Feedback delay line

use dasp_ring_buffer::Fixed;

use crate::node::ProcessContext;
use crate::property::{Property, PropertyBank, PropertyId};

/// Longest delay time in seconds; sizes the ring buffer.
pub const MAX_DELAY_SECS: f32 = 2.0;
const MAX_FEEDBACK: f32 = 0.95;

/// A single-tap echo with feedback.
///
/// Each output sample is `(dry + feedback * echo) / (1 + feedback)`, where
/// `echo` is the output from `TIME` seconds ago. The echo is read before the
/// new sample is written, so a tick never hears its own unwritten output.
/// The normalisation keeps the output inside `[-1, 1]` for in-range input.
pub struct TapDelay {
    ring: Fixed<Vec<f32>>,
    time: f32,
    feedback: f32,
    volume: f32,
}

impl TapDelay {
    pub const INPUTS: usize = 1;

    pub fn new(sample_rate: u32) -> Self {
        Self::with_params(sample_rate, 0.5, 0.6, 0.4)
    }

    pub fn with_params(sample_rate: u32, time: f32, feedback: f32, volume: f32) -> Self {
        let capacity = ((sample_rate as f32 * MAX_DELAY_SECS).ceil() as usize).max(1);
        Self {
            ring: Fixed::from(vec![0.0; capacity]),
            time: time.clamp(0.0, MAX_DELAY_SECS),
            feedback: feedback.clamp(0.0, MAX_FEEDBACK),
            volume: volume.clamp(0.0, 1.0),
        }
    }

    pub fn default_properties(&self) -> Vec<Property> {
        vec![
            Property::new(PropertyId::Time, self.time, 0.0, MAX_DELAY_SECS),
            Property::new(PropertyId::Feedback, self.feedback, 0.0, MAX_FEEDBACK),
            Property::new(PropertyId::Volume, self.volume, 0.0, 1.0),
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
        let capacity = self.ring.len();
        let time = params.value_or(PropertyId::Time, self.time);
        let feedback = params.value_or(PropertyId::Feedback, self.feedback);
        let volume = params.value_or(PropertyId::Volume, self.volume);

        let delay = ((time * ctx.sample_rate as f32).round() as usize).clamp(1, capacity);
        let norm = 1.0 / (1.0 + feedback);

        for (out, &dry) in output.iter_mut().zip(input.iter()) {
            // Index `capacity - k` holds the sample pushed k samples ago.
            let echo = *self.ring.get(capacity - delay);
            let y = (dry + feedback * echo) * norm;
            self.ring.push(y);
            *out = y * volume;
        }
    }
}

impl std::fmt::Debug for TapDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapDelay")
            .field("capacity", &self.ring.len())
            .field("time", &self.time)
            .field("feedback", &self.feedback)
            .finish()
    }
}
