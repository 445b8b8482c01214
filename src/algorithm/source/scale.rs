//! Musical scales for pitch-locked oscillators

use serde::{Deserialize, Serialize};

/// Root note of a scale.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ScaleBase {
    /// C4, 261.63 Hz
    C,
    /// A3, 220 Hz
    A,
}

impl ScaleBase {
    fn frequency(self) -> f32 {
        match self {
            ScaleBase::C => 261.63,
            ScaleBase::A => 220.0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ScaleMode {
    MajorPentatonic,
    MajorOctave,
    MinorOctave,
}

impl ScaleMode {
    /// Semitone offsets of one octave.
    fn intervals(self) -> &'static [u8] {
        match self {
            ScaleMode::MajorPentatonic => &[0, 2, 4, 7, 9],
            ScaleMode::MajorOctave => &[0, 2, 4, 5, 7, 9, 11],
            ScaleMode::MinorOctave => &[0, 2, 3, 5, 7, 8, 10],
        }
    }
}

/// Two octaves of a mode above a root, plus the closing octave.
#[derive(Clone, Debug, PartialEq)]
pub struct Scale {
    steps: Vec<f32>,
}

impl Scale {
    pub const OCTAVES: u8 = 2;

    pub fn new(base: ScaleBase, mode: ScaleMode) -> Self {
        let root = base.frequency();
        let mut steps: Vec<f32> = (0..Self::OCTAVES)
            .flat_map(|octave| {
                mode.intervals()
                    .iter()
                    .map(move |&i| semitones(root, octave * 12 + i))
            })
            .collect();
        steps.push(semitones(root, Self::OCTAVES * 12));
        Self { steps }
    }

    /// Number of addressable steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Frequency of `step`; steps past the top clamp to the highest note.
    pub fn frequency(&self, step: usize) -> f32 {
        self.steps[step.min(self.steps.len() - 1)]
    }
}

fn semitones(root: f32, n: u8) -> f32 {
    root * 2f32.powf(n as f32 / 12.0)
}
