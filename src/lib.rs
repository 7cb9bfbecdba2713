//! uttermill - word-boundary-safe audio aggregation for streaming speech
//! recognition.
//!
//! Ingests out-of-order-tagged audio chunks per session stream and turns
//! them into correctly-sized PCM batches, without losing bytes, mixing
//! utterances, or silently dropping audio a caller is entitled to see
//! processed.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod aggregator;
pub mod audio;
pub mod batch;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod job;
pub mod observe;

// Core entry point
pub use aggregator::Aggregator;

// Collaborator seams (decode → aggregate → attribute)
pub use audio::decode::{AudioDecoder, MockDecoder, Pcm16Decoder};
pub use clock::{Clock, MockClock, SystemClock};
pub use observe::{CollectorReporter, Decision, DecisionReporter, LogReporter, NullReporter};

// Wire types
pub use job::{AudioChunkResult, AudioFormat, JobRequest, JobSpan, ResultReason, TriggerKind};

// Error handling
pub use error::{Result, UttermillError};

// Config
pub use config::Config;

// Buffer internals (for advanced users)
pub use buffer::key::BufferKey;
pub use buffer::record::BufferState;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
