//! Structured decision reporting.
//!
//! Every non-obvious branch in the aggregation pipeline emits a typed
//! [`Decision`] through an injected [`DecisionReporter`], so callers and
//! tests can observe what happened to their audio without parsing log
//! strings.

use crate::buffer::key::BufferKey;
use std::sync::Mutex;

/// Which pending cache a decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Short audio held back by a timeout finalize.
    Timeout,
    /// Remainder cached by the max-duration handler.
    MaxDuration,
    /// Sub-batch tail segments retained by the stream batcher.
    SmallSegments,
}

/// One decision taken while processing a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Decoded PCM had an odd byte length; the trailing byte was dropped.
    OddLengthRepaired { dropped_bytes: usize },
    /// Pending timeout audio aged past its TTL and was force-flushed.
    TtlFlush { age_ms: u64 },
    /// A pending cache was concatenated with the current audio.
    CacheMerged { kind: CacheKind, utterance_gap: u64 },
    /// A pending cache was a duplicate delivery and was discarded.
    CacheDiscarded { kind: CacheKind },
    /// A pending cache belonged to an unrelated utterance and was flushed
    /// independently of the current audio.
    CacheFlushedUnrelated { kind: CacheKind, utterance_gap: u64 },
    /// A short timeout finalize was cached instead of emitted.
    TimeoutCached { duration_ms: u64 },
    /// A sub-batch remainder was cached for the next call.
    RemainderCached { kind: CacheKind, duration_ms: u64 },
    /// No pause was found in over-long audio; a cut was forced at the
    /// flattest interval near the middle.
    ForcedCut { offset_ms: u64 },
    /// A chunk arrived for a closed buffer; a fresh epoch was allocated.
    EpochRollover { epoch: u64 },
    /// The cleanup sweep deleted this buffer.
    Swept { idle_ms: u64 },
    /// A chunk was rejected before touching the buffer (station loop only).
    ChunkRejected { message: String },
}

/// Trait for reporting aggregation decisions.
pub trait DecisionReporter: Send + Sync {
    /// Reports a decision taken for the given buffer key.
    fn report(&self, key: &BufferKey, decision: &Decision);
}

/// Simple reporter that logs to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl DecisionReporter for LogReporter {
    fn report(&self, key: &BufferKey, decision: &Decision) {
        eprintln!("[{}] {:?}", key, decision);
    }
}

/// Reporter that collects decisions in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectorReporter {
    events: Mutex<Vec<(String, Decision)>>,
}

impl CollectorReporter {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all reported decisions so far.
    pub fn events(&self) -> Vec<(String, Decision)> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns true if any reported decision satisfies the predicate.
    pub fn any(&self, pred: impl Fn(&Decision) -> bool) -> bool {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|(_, d)| pred(d))
    }
}

impl DecisionReporter for CollectorReporter {
    fn report(&self, key: &BufferKey, decision: &Decision) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key.as_str().to_string(), decision.clone()));
    }
}

/// No-op reporter for callers that do not care about decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl DecisionReporter for NullReporter {
    fn report(&self, _key: &BufferKey, _decision: &Decision) {}
}
