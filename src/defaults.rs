//! Default configuration constants for uttermill.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per PCM16 sample frame (mono, 16-bit little-endian).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Target duration of one delivery batch in milliseconds.
///
/// Recognition backends perform best on ~5 second windows; shorter batches
/// waste per-call overhead, longer ones add latency.
pub const BATCH_TARGET_MS: u64 = 5000;

/// Minimum total duration for a timeout finalize to emit rather than cache.
///
/// A scheduler-timeout finalize below one full batch is held as pending
/// audio awaiting a natural follow-up chunk. Manual cuts ignore this and
/// always emit.
pub const MIN_BATCH_MS: u64 = 5000;

/// Maximum segment duration before the energy splitter recurses (milliseconds).
pub const MAX_SEGMENT_MS: u64 = 5000;

/// Minimum segment duration the energy splitter will produce (milliseconds).
///
/// Splitting below this over-fragments speech and hurts recognition accuracy.
pub const MIN_SEGMENT_MS: u64 = 2000;

/// Extra audio kept on the first half after a detected pause (milliseconds).
///
/// Prevents truncating a word whose tail energy dips below the silence
/// threshold slightly before the word actually ends.
pub const HANGOVER_MS: u64 = 600;

/// Hard recursion depth cap for the energy splitter.
pub const MAX_SPLIT_DEPTH: u32 = 10;

/// RMS analysis window for pause detection (milliseconds).
pub const RMS_WINDOW_MS: u64 = 100;

/// Minimum silence run length to qualify as a pause (milliseconds).
pub const MIN_PAUSE_MS: u64 = 200;

/// Absolute floor for the adaptive silence threshold, in raw PCM16 RMS units.
///
/// The adaptive threshold is `max(SILENCE_FLOOR, median_rms * SILENCE_RATIO)`,
/// keeping pause detection robust in noisy rooms without a fixed absolute
/// threshold.
pub const SILENCE_FLOOR: f64 = 200.0;

/// Fraction of the median window RMS used for the adaptive silence threshold.
pub const SILENCE_RATIO: f64 = 0.3;

/// Shortest interval considered by the lowest-energy fallback search (milliseconds).
pub const FLAT_INTERVAL_MIN_MS: u64 = 300;

/// Longest interval considered by the lowest-energy fallback search (milliseconds).
pub const FLAT_INTERVAL_MAX_MS: u64 = 600;

/// Time budget for pending timeout audio before it is force-flushed.
///
/// Short timeout finalizes wait this long for the follow-up chunk of the
/// same utterance; past it the next call on the key flushes them unmerged.
pub const PENDING_TTL: &str = "10s";

/// Idle ceiling after which the cleanup sweep deletes a buffer outright.
pub const IDLE_CEILING: &str = "5m";

/// Interval between cleanup sweep passes.
pub const SWEEP_INTERVAL: &str = "30s";

/// Number of mutex shards in the buffer store.
///
/// Unrelated keys on different shards are processed fully in parallel;
/// 16 shards keeps contention negligible at typical session counts.
pub const STORE_SHARDS: usize = 16;

/// Maximum utterance-index distance for merging a pending cache.
///
/// Distance 0 is a duplicate delivery, above this the cache belongs to an
/// unrelated utterance and is flushed independently.
pub const UTTERANCE_MERGE_WINDOW: u64 = 2;
