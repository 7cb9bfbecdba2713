//! Wire-level job records and result types.
//!
//! Defines the data structures that cross the aggregation boundary: the
//! incoming per-chunk job record, byte-range provenance spans, and the
//! outgoing batch result.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire encoding of a chunk's audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// Opus-encoded audio (decoded by an injected codec collaborator).
    Opus,
    /// Raw PCM, 16-bit little-endian mono.
    #[default]
    Pcm16,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Opus => write!(f, "opus"),
            AudioFormat::Pcm16 => write!(f, "pcm16"),
        }
    }
}

/// Typed control trigger carried by a chunk.
///
/// The wire record transports three loosely-typed booleans; they collapse
/// into this exhaustive enum with precedence Manual > Timeout > MaxDuration,
/// so simultaneous flags are never ambiguous downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// No control signal; keep buffering.
    None,
    /// User ended the utterance explicitly.
    Manual,
    /// The scheduler decided the utterance is over.
    Timeout,
    /// The utterance exceeded the maximum streaming duration.
    MaxDuration,
}

/// One arriving audio chunk, as received from the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Caller-side job identifier; output batches are attributed to these.
    pub job_id: String,
    /// Owning session.
    pub session_id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub speaker_id: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    /// Position of this chunk's utterance within the session.
    #[serde(default)]
    pub utterance_index: u64,
    /// Base64-encoded audio payload; may be empty.
    #[serde(default)]
    pub audio: String,
    #[serde(default)]
    pub audio_format: AudioFormat,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub is_manual_cut: bool,
    #[serde(default)]
    pub is_timeout_triggered: bool,
    #[serde(default)]
    pub is_max_duration_triggered: bool,
    #[serde(default)]
    pub expected_duration_ms: Option<u64>,
}

fn default_sample_rate() -> u32 {
    defaults::SAMPLE_RATE
}

impl JobRequest {
    /// Creates a minimal PCM16 record with no audio and no trigger flags.
    pub fn new(job_id: &str, session_id: &str, utterance_index: u64) -> Self {
        Self {
            job_id: job_id.to_string(),
            session_id: session_id.to_string(),
            room_id: None,
            stream_id: None,
            speaker_id: None,
            target_language: None,
            utterance_index,
            audio: String::new(),
            audio_format: AudioFormat::Pcm16,
            sample_rate: defaults::SAMPLE_RATE,
            is_manual_cut: false,
            is_timeout_triggered: false,
            is_max_duration_triggered: false,
            expected_duration_ms: None,
        }
    }

    /// Collapses the wire flags into a typed trigger.
    pub fn trigger(&self) -> TriggerKind {
        if self.is_manual_cut {
            TriggerKind::Manual
        } else if self.is_timeout_triggered {
            TriggerKind::Timeout
        } else if self.is_max_duration_triggered {
            TriggerKind::MaxDuration
        } else {
            TriggerKind::None
        }
    }
}

/// Byte-range provenance of one job within an aggregated audio buffer.
///
/// Offsets are byte positions into the buffer the span was recorded
/// against; spans are contiguous and non-decreasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpan {
    pub job_id: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub utterance_index: u64,
    #[serde(default)]
    pub expected_duration_ms: Option<u64>,
}

impl JobSpan {
    /// Byte length of the span.
    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    /// True if the span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.end_offset <= self.start_offset
    }
}

/// Shifts every span right by `delta` bytes.
pub fn shift_spans(spans: &mut [JobSpan], delta: usize) {
    for span in spans {
        span.start_offset += delta;
        span.end_offset += delta;
    }
}

/// Intersects spans with the byte range `[start, end)` and rebases the
/// survivors to offset 0.
///
/// Used when a tail of an aggregated buffer is cached: the cache keeps
/// provenance for exactly the bytes it holds.
pub fn spans_for_range(spans: &[JobSpan], start: usize, end: usize) -> Vec<JobSpan> {
    spans
        .iter()
        .filter(|s| s.end_offset > start && s.start_offset < end)
        .map(|s| JobSpan {
            job_id: s.job_id.clone(),
            start_offset: s.start_offset.max(start) - start,
            end_offset: s.end_offset.min(end) - start,
            utterance_index: s.utterance_index,
            expected_duration_ms: s.expected_duration_ms,
        })
        .collect()
}

/// Utterance index of the last (most recent) span, if any.
pub fn last_utterance_index(spans: &[JobSpan]) -> Option<u64> {
    spans.last().map(|s| s.utterance_index)
}

/// Why a result carries (or does not carry) audio segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultReason {
    /// One or more batches were emitted.
    Batched,
    /// No trigger; audio was appended and the buffer stays open.
    Buffering,
    /// Nothing buffered, nothing pending, nothing in the chunk.
    EmptyInput,
    /// A short timeout finalize was cached awaiting a follow-up chunk.
    TimeoutPending,
    /// An emission path produced zero batches although audio is retained;
    /// the buffer was NOT deleted.
    AsrFailurePartial,
}

/// Output of one aggregation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunkResult {
    /// Base64-encoded PCM16 batches, ready for recognition calls.
    pub audio_segments: Vec<String>,
    /// Job id attributed to each segment (parallel to `audio_segments`).
    pub original_job_ids: Vec<String>,
    /// Provenance of every job that contributed bytes to this call.
    pub original_job_info: Vec<JobSpan>,
    /// Jobs that contributed bytes but own no emitted batch; downstream
    /// must send each an explicit empty acknowledgment.
    pub needs_empty_ack: Vec<String>,
    /// True when no segments were emitted.
    pub should_return_empty: bool,
    pub reason: ResultReason,
    /// True when audio was cached by a timeout finalize.
    pub is_timeout_pending: bool,
}

impl AudioChunkResult {
    /// A result with no segments and no provenance.
    pub fn empty(reason: ResultReason) -> Self {
        Self {
            audio_segments: Vec::new(),
            original_job_ids: Vec::new(),
            original_job_info: Vec::new(),
            needs_empty_ack: Vec::new(),
            should_return_empty: true,
            reason,
            is_timeout_pending: false,
        }
    }
}
