mod oscillator;
mod scale;

pub use oscillator::*;
pub use scale::*;
