//! Per-key audio buffer record.
//!
//! One [`AudioBuffer`] exists per buffer key and is mutated exclusively by
//! the call currently holding its store shard. It accumulates raw PCM
//! chunks, tracks byte-range provenance per contributing job, and carries
//! the pending caches that survive a finalize.

use crate::audio::pcm;
use crate::job::{self, JobRequest, JobSpan, TriggerKind};

/// Lifecycle state of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Accepting chunks.
    Open,
    /// A finalize computation is running synchronously.
    Finalizing,
    /// Holding timeout-finalize audio awaiting the next chunk.
    PendingTimeout,
    /// Holding a max-duration remainder awaiting the next chunk.
    PendingMaxDuration,
    /// Terminal; the store deletes the record on unlock.
    Closed,
}

/// Short audio held for merge with a later chunk of the same utterance.
#[derive(Debug, Clone)]
pub struct PendingAudio {
    pub bytes: Vec<u8>,
    pub created_at_ms: u64,
    /// Provenance of the cached bytes, rebased to offset 0.
    pub job_info: Vec<JobSpan>,
}

impl PendingAudio {
    pub fn new(bytes: Vec<u8>, created_at_ms: u64, job_info: Vec<JobSpan>) -> Self {
        Self {
            bytes,
            created_at_ms,
            job_info,
        }
    }

    /// Age of the cache relative to `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    /// Utterance index of the most recent contributing job.
    pub fn last_utterance_index(&self) -> Option<u64> {
        job::last_utterance_index(&self.job_info)
    }

    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        pcm::duration_ms(self.bytes.len(), sample_rate)
    }
}

/// Mutable per-key buffer record.
#[derive(Debug)]
pub struct AudioBuffer {
    pub state: BufferState,
    /// Generation counter; bumped when a closed key is reused.
    pub epoch: u64,
    /// Fixed by the first chunk of the epoch.
    pub sample_rate: u32,
    /// Raw PCM chunks accumulated since the last finalize.
    pub audio_chunks: Vec<Vec<u8>>,
    /// Byte sum of `audio_chunks`.
    pub total_bytes: usize,
    pub start_time_ms: u64,
    pub last_chunk_time_ms: u64,
    pub last_write_at_ms: u64,
    pub last_finalize_at_ms: Option<u64>,
    /// Sticky across chunks of the current epoch.
    pub manual_cut: bool,
    pub timeout_triggered: bool,
    /// Short audio from a timeout finalize, awaiting a follow-up.
    pub pending_timeout: Option<PendingAudio>,
    /// Remainder cached by the max-duration handler.
    pub pending_max_duration: Option<PendingAudio>,
    /// Sub-batch tail segments retained by the stream batcher.
    pub pending_small: Option<PendingAudio>,
    /// Provenance of each contributing job within `audio_chunks`.
    pub job_info: Vec<JobSpan>,
}

impl AudioBuffer {
    /// Creates an open, empty buffer.
    pub fn new(epoch: u64, sample_rate: u32, now_ms: u64) -> Self {
        Self {
            state: BufferState::Open,
            epoch,
            sample_rate,
            audio_chunks: Vec::new(),
            total_bytes: 0,
            start_time_ms: now_ms,
            last_chunk_time_ms: now_ms,
            last_write_at_ms: now_ms,
            last_finalize_at_ms: None,
            manual_cut: false,
            timeout_triggered: false,
            pending_timeout: None,
            pending_max_duration: None,
            pending_small: None,
            job_info: Vec::new(),
        }
    }

    /// Appends decoded PCM bytes and records the contributing job's span.
    ///
    /// Sticky trigger flags are OR-ed; timestamps advance even for empty
    /// chunks so idle accounting reflects the last contact.
    pub fn append_chunk(&mut self, bytes: Vec<u8>, job: &JobRequest, now_ms: u64) {
        self.last_write_at_ms = now_ms;
        match job.trigger() {
            TriggerKind::Manual => self.manual_cut = true,
            TriggerKind::Timeout => self.timeout_triggered = true,
            TriggerKind::MaxDuration | TriggerKind::None => {}
        }
        if bytes.is_empty() {
            return;
        }
        if self.audio_chunks.is_empty() && self.pending_small.is_none() {
            self.start_time_ms = now_ms;
        }
        let start = self.total_bytes;
        let end = start + bytes.len();
        self.job_info.push(JobSpan {
            job_id: job.job_id.clone(),
            start_offset: start,
            end_offset: end,
            utterance_index: job.utterance_index,
            expected_duration_ms: job.expected_duration_ms,
        });
        self.total_bytes = end;
        self.last_chunk_time_ms = now_ms;
        self.audio_chunks.push(bytes);
    }

    /// Duration of the audio accumulated since the last finalize.
    pub fn buffered_duration_ms(&self) -> u64 {
        pcm::duration_ms(self.total_bytes, self.sample_rate)
    }

    /// True if any chunk bytes or a small-segment tail are buffered.
    pub fn has_buffered_audio(&self) -> bool {
        self.total_bytes > 0 || self.pending_small.is_some()
    }

    /// True if any pending cache holds audio.
    pub fn has_pending(&self) -> bool {
        self.pending_timeout.is_some()
            || self.pending_max_duration.is_some()
            || self.pending_small.is_some()
    }

    /// Age of the oldest pending cache, if any.
    pub fn oldest_pending_age_ms(&self, now_ms: u64) -> Option<u64> {
        [
            self.pending_timeout.as_ref(),
            self.pending_max_duration.as_ref(),
            self.pending_small.as_ref(),
        ]
        .into_iter()
        .flatten()
        .map(|p| p.age_ms(now_ms))
        .max()
    }

    /// Milliseconds since the last write.
    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_write_at_ms)
    }

    /// Drains buffered audio (small-segment tail first, then chunks) into
    /// one contiguous PCM buffer with provenance spans covering it.
    pub fn aggregate(&mut self) -> (Vec<u8>, Vec<JobSpan>) {
        let mut merged = Vec::new();
        let mut spans = Vec::new();

        if let Some(tail) = self.pending_small.take() {
            merged.extend_from_slice(&tail.bytes);
            spans = tail.job_info;
        }
        let mut current = std::mem::take(&mut self.job_info);
        job::shift_spans(&mut current, merged.len());
        spans.extend(current);

        for chunk in self.audio_chunks.drain(..) {
            merged.extend_from_slice(&chunk);
        }
        self.total_bytes = 0;
        (merged, spans)
    }

    /// Recomputes the state after a finalize: demoted to a pending state if
    /// a cache survives, otherwise closed.
    pub fn settle_after_finalize(&mut self, now_ms: u64) {
        self.last_finalize_at_ms = Some(now_ms);
        self.state = if self.pending_timeout.is_some() || self.pending_small.is_some() {
            BufferState::PendingTimeout
        } else if self.pending_max_duration.is_some() {
            BufferState::PendingMaxDuration
        } else {
            BufferState::Closed
        };
    }

    /// Recomputes the state after a max-duration pass: the utterance is
    /// still running, so the buffer stays open unless a remainder is held.
    pub fn settle_after_max_duration(&mut self) {
        self.state = if self.pending_max_duration.is_some() {
            BufferState::PendingMaxDuration
        } else if self.pending_timeout.is_some() || self.pending_small.is_some() {
            BufferState::PendingTimeout
        } else {
            BufferState::Open
        };
    }
}
