//! Per-stream buffering: key derivation, the buffer record and its state
//! machine, and the sharded store that owns all records.

pub mod key;
pub mod record;
pub mod store;

pub use key::BufferKey;
pub use record::{AudioBuffer, BufferState, PendingAudio};
pub use store::{BufferStore, Lookup};
