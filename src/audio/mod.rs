//! Audio handling: payload decoding, PCM arithmetic, and energy-based
//! pause detection.

pub mod decode;
pub mod energy;
pub mod pcm;

pub use decode::{AudioDecoder, MockDecoder, Pcm16Decoder};
pub use energy::{SplitConfig, find_lowest_energy_interval, rms, split_by_energy};
