//! Ring buffer output for feeding rendered audio to another thread

use rtrb::{Consumer, Producer, RingBuffer};

use crate::config::SynthConfig;
use crate::processor::AudioProcessor;

/// Renders blocks from an [`AudioProcessor`] into an rtrb ring buffer.
///
/// The consumer end goes to whatever plays or records the audio. Samples
/// are interleaved when `channels` is 2.
///
/// Useful for:
/// - Handing audio to a device callback
/// - Recording/analysis on another thread
pub struct RingOutput {
    processor: AudioProcessor,
    producer: Producer<f32>,
    channels: usize,
    block: Vec<f32>,
}

/// Build an output and the consumer that drains it, sized from `config`.
pub fn ring_output(processor: AudioProcessor, config: &SynthConfig) -> (RingOutput, Consumer<f32>) {
    let (producer, consumer) = RingBuffer::new(config.ring_capacity.max(1));
    let output = RingOutput::new(processor, producer, config.channels, config.block_size);
    (output, consumer)
}

impl RingOutput {
    /// Render `block_size` frames per pump into `producer`.
    ///
    /// Channel counts other than 1 are treated as stereo.
    pub fn new(processor: AudioProcessor, producer: Producer<f32>, channels: usize, block_size: usize) -> Self {
        let channels = if channels <= 1 { 1 } else { 2 };
        Self {
            processor,
            producer,
            channels,
            block: vec![0.0; block_size.max(1) * channels],
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Returns how many sample slots are free
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// Render and push one block if the whole block fits.
    ///
    /// Returns the number of samples pushed, 0 when the ring is too full.
    pub fn pump(&mut self) -> usize {
        if self.producer.slots() < self.block.len() {
            return 0;
        }

        if self.channels == 1 {
            self.processor.tick_into(&mut self.block);
        } else {
            self.processor.tick_interleaved_into(&mut self.block);
        }

        let mut pushed = 0;
        for &sample in &self.block {
            if self.producer.push(sample).is_err() {
                break;
            }
            pushed += 1;
        }
        pushed
    }

    /// Pump until the ring can't take another block.
    pub fn fill(&mut self) -> usize {
        let mut total = 0;
        loop {
            let pushed = self.pump();
            if pushed == 0 {
                return total;
            }
            total += pushed;
        }
    }
}
