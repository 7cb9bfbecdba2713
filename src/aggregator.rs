//! Chunk aggregation orchestrator.
//!
//! One [`Aggregator::process`] call per arriving chunk: decode and repair
//! the payload, run the lazy TTL check, append to the per-key buffer, then
//! dispatch on the chunk's trigger (continue buffering, finalize, or
//! max-duration streaming). All buffer mutation happens under the store's
//! shard lock; decoding completes before the lock is taken so two chunks
//! for the same key can never interleave decode with mutation.

use crate::audio::decode::{AudioDecoder, Pcm16Decoder, encode_base64};
use crate::audio::energy::{self, SplitConfig};
use crate::audio::pcm;
use crate::batch::assign;
use crate::batch::batcher;
use crate::buffer::key::BufferKey;
use crate::buffer::record::{AudioBuffer, BufferState, PendingAudio};
use crate::buffer::store::{BufferStore, Lookup};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Result, UttermillError};
use crate::job::{self, AudioChunkResult, JobRequest, JobSpan, ResultReason, TriggerKind};
use crate::observe::{CacheKind, Decision, DecisionReporter, LogReporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Batches attributed to a job id, accumulated across the handlers of one
/// call.
type Emitted = Vec<(Vec<u8>, String)>;

/// Per-stream audio aggregator.
///
/// Generic over the clock so TTL and idle behavior is testable; decoder and
/// reporter are injected collaborators.
pub struct Aggregator<C: Clock = SystemClock> {
    config: Config,
    split: SplitConfig,
    pending_ttl_ms: u64,
    idle_ceiling_ms: u64,
    sweep_interval_ms: u64,
    store: BufferStore,
    decoder: Box<dyn AudioDecoder>,
    reporter: Arc<dyn DecisionReporter>,
    clock: C,
}

impl Aggregator<SystemClock> {
    /// Creates an aggregator with the system clock and the standard PCM16
    /// decoder.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, SystemClock::default())
    }
}

impl<C: Clock> Aggregator<C> {
    /// Creates an aggregator with an injected clock.
    pub fn with_clock(config: Config, clock: C) -> Result<Self> {
        config.validate()?;
        let split = config.split.to_split_config();
        let pending_ttl_ms = config.ttl.pending_ms()?;
        let idle_ceiling_ms = config.ttl.idle_ceiling_ms()?;
        let sweep_interval_ms = config.ttl.sweep_interval_ms()?;
        let store = BufferStore::new(config.store.shards);
        Ok(Self {
            config,
            split,
            pending_ttl_ms,
            idle_ceiling_ms,
            sweep_interval_ms,
            store,
            decoder: Box::new(Pcm16Decoder),
            reporter: Arc::new(LogReporter),
            clock,
        })
    }

    /// Replaces the payload decoder (e.g. to inject an opus codec).
    pub fn with_decoder(mut self, decoder: Box<dyn AudioDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replaces the decision reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn DecisionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Number of live buffers, for tests and operational introspection.
    pub fn live_buffers(&self) -> usize {
        self.store.len()
    }

    /// Processes one arriving chunk.
    ///
    /// Decode errors are fatal for this chunk only and leave the buffer
    /// untouched. Business outcomes (short, long, empty audio) are result
    /// variants, never errors.
    pub fn process(&self, request: &JobRequest) -> Result<AudioChunkResult> {
        let key = BufferKey::from_job(request)?;
        let now = self.clock.now_ms();

        let mut bytes = if request.audio.is_empty() {
            Vec::new()
        } else {
            self.decoder
                .decode(&request.audio, request.audio_format, request.sample_rate)?
        };
        let dropped = pcm::repair_alignment(&mut bytes);
        if dropped > 0 {
            self.reporter.report(
                &key,
                &Decision::OddLengthRepaired {
                    dropped_bytes: dropped,
                },
            );
        }

        self.store
            .with_buffer(&key, request.sample_rate, now, |buf, lookup| {
                if lookup == Lookup::RolledOver {
                    self.reporter
                        .report(&key, &Decision::EpochRollover { epoch: buf.epoch });
                }
                if buf.sample_rate != request.sample_rate {
                    return Err(UttermillError::SampleRateMismatch {
                        expected: buf.sample_rate,
                        actual: request.sample_rate,
                    });
                }
                Ok(self.process_locked(buf, &key, request, bytes, now))
            })
    }

    fn process_locked(
        &self,
        buf: &mut AudioBuffer,
        key: &BufferKey,
        request: &JobRequest,
        bytes: Vec<u8>,
        now: u64,
    ) -> AudioChunkResult {
        let chunk_empty = bytes.is_empty();
        let mut emitted: Emitted = Vec::new();
        let mut provenance: Vec<JobSpan> = Vec::new();

        // Lazy TTL check, before any new audio is appended: pending timeout
        // audio past its budget is flushed whether or not this chunk is
        // related to it.
        if let Some(cache) = buf
            .pending_timeout
            .take_if(|p| p.age_ms(now) >= self.pending_ttl_ms)
        {
            self.reporter.report(
                key,
                &Decision::TtlFlush {
                    age_ms: cache.age_ms(now),
                },
            );
            self.flush_cache(cache, buf.sample_rate, &mut emitted, &mut provenance);
        }

        buf.append_chunk(bytes, request, now);

        let trigger = request.trigger();
        let mut new_spans: Vec<JobSpan> = Vec::new();
        let mut timeout_pending = false;

        match trigger {
            TriggerKind::None => {
                if !buf.has_buffered_audio() && !buf.has_pending() {
                    buf.state = BufferState::Closed;
                    if emitted.is_empty() && chunk_empty {
                        return AudioChunkResult::empty(ResultReason::EmptyInput);
                    }
                } else if !buf.has_pending() {
                    buf.state = BufferState::Open;
                }
            }
            TriggerKind::MaxDuration => {
                new_spans = buf.job_info.clone();
                self.handle_max_duration(buf, key, request, now, &mut emitted, &mut provenance);
            }
            TriggerKind::Manual | TriggerKind::Timeout => {
                new_spans = buf.job_info.clone();
                timeout_pending =
                    self.handle_finalize(buf, key, request, now, &mut emitted, &mut provenance);
            }
        }

        self.build_result(buf, trigger, emitted, provenance, new_spans, timeout_pending)
    }

    /// Finalize handler: manual cut or scheduler timeout ends the current
    /// utterance.
    ///
    /// Returns true if the audio was cached instead of emitted (short
    /// timeout finalize).
    fn handle_finalize(
        &self,
        buf: &mut AudioBuffer,
        key: &BufferKey,
        request: &JobRequest,
        now: u64,
        emitted: &mut Emitted,
        provenance: &mut Vec<JobSpan>,
    ) -> bool {
        buf.state = BufferState::Finalizing;
        let sample_rate = buf.sample_rate;
        // A retained small-segment tail is a pending cache too: its jobs
        // were accounted when it was cached, so its bytes are absorbed by
        // the current job below.
        let mut merged_from_cache = buf.pending_small.is_some();
        let (mut merged, mut spans) = buf.aggregate();

        for (slot, kind) in [
            (&mut buf.pending_timeout, CacheKind::Timeout),
            (&mut buf.pending_max_duration, CacheKind::MaxDuration),
        ] {
            let Some(cache) = slot.take() else { continue };
            let gap = utterance_gap(&cache, request);
            if gap == 0 {
                // Duplicate delivery of the utterance that produced the cache.
                self.reporter.report(key, &Decision::CacheDiscarded { kind });
            } else if gap > self.config.batch.utterance_merge_window {
                self.reporter.report(
                    key,
                    &Decision::CacheFlushedUnrelated {
                        kind,
                        utterance_gap: gap,
                    },
                );
                self.flush_cache(cache, sample_rate, emitted, provenance);
            } else {
                self.reporter.report(
                    key,
                    &Decision::CacheMerged {
                        kind,
                        utterance_gap: gap,
                    },
                );
                let mut combined = cache.bytes;
                job::shift_spans(&mut spans, combined.len());
                combined.extend_from_slice(&merged);
                merged = combined;
                let mut combined_spans = cache.job_info;
                combined_spans.extend(std::mem::take(&mut spans));
                spans = combined_spans;
                merged_from_cache = true;
            }
        }

        if merged.is_empty() {
            buf.settle_after_finalize(now);
            return false;
        }

        let duration = pcm::duration_ms(merged.len(), sample_rate);
        let is_timeout = request.trigger() == TriggerKind::Timeout;

        // A short timeout finalize waits for a natural follow-up instead of
        // emitting a fragment; manual cuts always emit everything.
        if is_timeout && duration < self.config.batch.min_batch_ms {
            self.reporter.report(
                key,
                &Decision::TimeoutCached {
                    duration_ms: duration,
                },
            );
            provenance.extend(spans.iter().cloned());
            buf.pending_timeout = Some(PendingAudio::new(merged, now, spans));
            buf.settle_after_finalize(now);
            return true;
        }

        let segments = energy::split_by_energy(&merged, sample_rate, &self.split);
        let plan = batcher::create_streaming_batches(
            &segments,
            sample_rate,
            self.config.batch.target_ms,
            is_timeout,
        );

        let assigned = if merged_from_cache {
            // The cache's own jobs were accounted when it was created; the
            // job whose finalize caused the merge absorbs the batches.
            vec![request.job_id.clone(); plan.batches.len()]
        } else {
            assign::assign_containers(&plan.batches, &spans)
        };
        for (batch, job_id) in plan.batches.into_iter().zip(assigned) {
            emitted.push((batch.bytes, job_id));
        }

        if let Some(remainder) = plan.remainder {
            self.reporter.report(
                key,
                &Decision::RemainderCached {
                    kind: CacheKind::SmallSegments,
                    duration_ms: pcm::duration_ms(remainder.bytes.len(), sample_rate),
                },
            );
            let tail_spans =
                job::spans_for_range(&spans, remainder.start_offset, remainder.end_offset());
            buf.pending_small = Some(PendingAudio::new(remainder.bytes, now, tail_spans));
        }

        provenance.extend(spans);
        buf.settle_after_finalize(now);
        false
    }

    /// Max-duration handler: the utterance overflowed the streaming bound,
    /// so the front of the audio is processed now and the tail cached for
    /// the next call. Keeps end-to-end latency bounded for long utterances.
    fn handle_max_duration(
        &self,
        buf: &mut AudioBuffer,
        key: &BufferKey,
        request: &JobRequest,
        now: u64,
        emitted: &mut Emitted,
        provenance: &mut Vec<JobSpan>,
    ) {
        let sample_rate = buf.sample_rate;
        let mut merged_from_cache = buf.pending_small.is_some();
        let (current, mut current_spans) = buf.aggregate();
        let mut merged: Vec<u8> = Vec::new();
        let mut spans: Vec<JobSpan> = Vec::new();

        // Caches hold the head of the running utterance; absorb them in
        // arrival order ahead of the freshly buffered audio. A stale
        // timeout cache is merged too rather than left to misorder audio.
        for (slot, kind) in [
            (&mut buf.pending_timeout, CacheKind::Timeout),
            (&mut buf.pending_max_duration, CacheKind::MaxDuration),
        ] {
            let Some(cache) = slot.take() else { continue };
            self.reporter.report(
                key,
                &Decision::CacheMerged {
                    kind,
                    utterance_gap: utterance_gap(&cache, request),
                },
            );
            let mut cache_spans = cache.job_info;
            job::shift_spans(&mut cache_spans, merged.len());
            merged.extend_from_slice(&cache.bytes);
            spans.extend(cache_spans);
            merged_from_cache = true;
        }
        job::shift_spans(&mut current_spans, merged.len());
        merged.extend_from_slice(&current);
        spans.extend(current_spans);

        if merged.is_empty() {
            buf.settle_after_max_duration();
            return;
        }

        let mut segments = energy::split_by_energy(&merged, sample_rate, &self.split);
        let mut forced_head: Option<batcher::Batch> = None;
        if segments.len() == 1
            && pcm::duration_ms(segments[0].len(), sample_rate) > self.split.max_segment_ms
            && let Some((start, end)) =
                energy::find_lowest_energy_interval(&segments[0], sample_rate, &self.split)
        {
            // No pause anywhere; cut at the flattest interval so the
            // streaming bound holds even for continuous speech. The head
            // becomes a batch of its own (the batcher would otherwise
            // re-merge the halves), the tail goes through normal batching.
            let cut = pcm::align_to_frame(start + (end - start) / 2).min(segments[0].len());
            self.reporter.report(
                key,
                &Decision::ForcedCut {
                    offset_ms: pcm::duration_ms(cut, sample_rate),
                },
            );
            let whole = segments.pop().unwrap_or_default();
            let (head, tail) = whole.split_at(cut);
            forced_head = Some(batcher::Batch {
                start_offset: 0,
                bytes: head.to_vec(),
            });
            segments = vec![tail.to_vec()];
        }

        let mut plan = batcher::create_streaming_batches(
            &segments,
            sample_rate,
            self.config.batch.target_ms,
            true,
        );
        if let Some(head) = forced_head {
            let delta = head.bytes.len();
            for batch in &mut plan.batches {
                batch.start_offset += delta;
            }
            if let Some(remainder) = &mut plan.remainder {
                remainder.start_offset += delta;
            }
            plan.batches.insert(0, head);
        }

        let assigned = if merged_from_cache {
            vec![request.job_id.clone(); plan.batches.len()]
        } else {
            assign::assign_containers(&plan.batches, &spans)
        };
        for (batch, job_id) in plan.batches.into_iter().zip(assigned) {
            emitted.push((batch.bytes, job_id));
        }

        if let Some(remainder) = plan.remainder {
            self.reporter.report(
                key,
                &Decision::RemainderCached {
                    kind: CacheKind::MaxDuration,
                    duration_ms: pcm::duration_ms(remainder.bytes.len(), sample_rate),
                },
            );
            let tail_spans =
                job::spans_for_range(&spans, remainder.start_offset, remainder.end_offset());
            buf.pending_max_duration = Some(PendingAudio::new(remainder.bytes, now, tail_spans));
        }

        provenance.extend(spans);
        buf.settle_after_max_duration();
    }

    /// Splits and batches a cache with no remainder caching, attributing by
    /// head alignment over the cache's own job info.
    fn flush_cache(
        &self,
        cache: PendingAudio,
        sample_rate: u32,
        emitted: &mut Emitted,
        provenance: &mut Vec<JobSpan>,
    ) {
        let segments = energy::split_by_energy(&cache.bytes, sample_rate, &self.split);
        let plan = batcher::create_streaming_batches(
            &segments,
            sample_rate,
            self.config.batch.target_ms,
            false,
        );
        let assigned = assign::assign_containers(&plan.batches, &cache.job_info);
        for (batch, job_id) in plan.batches.into_iter().zip(assigned) {
            emitted.push((batch.bytes, job_id));
        }
        provenance.extend(cache.job_info);
    }

    fn build_result(
        &self,
        buf: &AudioBuffer,
        trigger: TriggerKind,
        emitted: Emitted,
        provenance: Vec<JobSpan>,
        new_spans: Vec<JobSpan>,
        timeout_pending: bool,
    ) -> AudioChunkResult {
        let audio_segments: Vec<String> = emitted.iter().map(|(b, _)| encode_base64(b)).collect();
        let original_job_ids: Vec<String> = emitted.into_iter().map(|(_, id)| id).collect();

        // Jobs are accounted the moment their bytes leave the open buffer:
        // either they own a batch, or they join the empty-ack set (including
        // jobs whose bytes were cached for a later cycle).
        let needs_empty_ack = match trigger {
            TriggerKind::None => Vec::new(),
            _ => assign::empty_containers(&new_spans, &original_job_ids),
        };

        let reason = if !audio_segments.is_empty() {
            ResultReason::Batched
        } else if timeout_pending {
            ResultReason::TimeoutPending
        } else if trigger == TriggerKind::None {
            if buf.has_buffered_audio() || buf.has_pending() {
                ResultReason::Buffering
            } else {
                ResultReason::EmptyInput
            }
        } else if buf.has_buffered_audio() || buf.has_pending() {
            // Emission path produced nothing although audio is retained;
            // distinct from true emptiness so callers never drop audio.
            ResultReason::AsrFailurePartial
        } else {
            ResultReason::EmptyInput
        };

        AudioChunkResult {
            should_return_empty: audio_segments.is_empty(),
            audio_segments,
            original_job_ids,
            original_job_info: provenance,
            needs_empty_ack,
            reason,
            is_timeout_pending: timeout_pending,
        }
    }

    /// One cleanup pass: deletes buffers idle past the ceiling or holding a
    /// pending cache past twice the TTL. Emission-free by design; the lazy
    /// TTL check is the only path that emits held audio.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let swept = self
            .store
            .cleanup_expired(now, self.idle_ceiling_ms, self.pending_ttl_ms);
        let count = swept.len();
        for (key, idle_ms) in swept {
            self.reporter.report(&key, &Decision::Swept { idle_ms });
        }
        count
    }
}

impl<C: Clock + 'static> Aggregator<C> {
    /// Runs the aggregator as a station: drains job records from `input`,
    /// emits one result per record to `output`.
    ///
    /// Per-chunk failures (decode errors, invalid records) are reported and
    /// skipped; the loop ends when either channel closes.
    pub async fn run(
        self: Arc<Self>,
        mut input: mpsc::Receiver<JobRequest>,
        output: mpsc::Sender<AudioChunkResult>,
    ) {
        while let Some(request) = input.recv().await {
            match self.process(&request) {
                Ok(result) => {
                    if output.send(result).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    if let Ok(key) = BufferKey::from_job(&request) {
                        self.reporter.report(
                            &key,
                            &Decision::ChunkRejected {
                                message: e.to_string(),
                            },
                        );
                    }
                }
            }
        }
    }

    /// Periodic cleanup sweep; never returns. Spawn alongside the station
    /// loop.
    ///
    /// Note: a pending cache on a key that never sees another chunk is
    /// reclaimed here without emission (the configured ceiling bounds
    /// memory, the lazy TTL check covers every key that stays active).
    pub async fn run_sweep(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.sweep_interval_ms));
        loop {
            interval.tick().await;
            self.sweep();
        }
    }
}

fn utterance_gap(cache: &PendingAudio, request: &JobRequest) -> u64 {
    cache
        .last_utterance_index()
        .map_or(1, |idx| idx.abs_diff(request.utterance_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::MockDecoder;
    use crate::clock::MockClock;
    use crate::observe::CollectorReporter;

    const SR: u32 = 16000;

    fn make_tone(ms: u64, amplitude: i16) -> Vec<u8> {
        let samples = (ms * SR as u64 / 1000) as usize;
        let pcm: Vec<i16> = (0..samples)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        pcm::from_samples(&pcm)
    }

    fn make_silence(ms: u64) -> Vec<u8> {
        vec![0u8; pcm::bytes_for_ms(ms, SR)]
    }

    fn request_with_audio(job_id: &str, utterance: u64, audio: &[u8]) -> JobRequest {
        let mut request = JobRequest::new(job_id, "session-1", utterance);
        request.audio = encode_base64(audio);
        request
    }

    fn test_aggregator() -> (Aggregator<MockClock>, MockClock, Arc<CollectorReporter>) {
        let clock = MockClock::new();
        let reporter = Arc::new(CollectorReporter::new());
        let agg = Aggregator::with_clock(Config::default(), clock.clone())
            .unwrap()
            .with_reporter(reporter.clone());
        (agg, clock, reporter)
    }

    fn decoded_len(result: &AudioChunkResult) -> usize {
        result
            .audio_segments
            .iter()
            .map(|s| crate::audio::decode::decode_base64(s).unwrap().len())
            .sum()
    }

    #[test]
    fn chunk_without_trigger_keeps_buffering() {
        let (agg, _, _) = test_aggregator();
        let result = agg
            .process(&request_with_audio("a", 1, &make_tone(1000, 3000)))
            .unwrap();
        assert_eq!(result.reason, ResultReason::Buffering);
        assert!(result.should_return_empty);
        assert!(result.needs_empty_ack.is_empty());
        assert_eq!(agg.live_buffers(), 1);
    }

    #[test]
    fn empty_chunk_with_empty_buffer_is_empty_input() {
        let (agg, _, _) = test_aggregator();
        let result = agg.process(&JobRequest::new("a", "session-1", 1)).unwrap();
        assert_eq!(result.reason, ResultReason::EmptyInput);
        assert_eq!(agg.live_buffers(), 0);
    }

    #[test]
    fn manual_cut_emits_even_short_audio() {
        let (agg, _, _) = test_aggregator();
        agg.process(&request_with_audio("a", 1, &make_tone(300, 3000)))
            .unwrap();

        let mut cut = request_with_audio("a", 1, &[]);
        cut.is_manual_cut = true;
        let result = agg.process(&cut).unwrap();

        assert_eq!(result.reason, ResultReason::Batched);
        assert_eq!(result.audio_segments.len(), 1);
        assert_eq!(decoded_len(&result), pcm::bytes_for_ms(300, SR));
        // Everything emitted, nothing cached: the buffer is gone.
        assert_eq!(agg.live_buffers(), 0);
    }

    #[test]
    fn manual_cut_with_no_audio_at_all_is_empty_input() {
        let (agg, _, _) = test_aggregator();
        let mut cut = JobRequest::new("a", "session-1", 1);
        cut.is_manual_cut = true;
        let result = agg.process(&cut).unwrap();
        assert_eq!(result.reason, ResultReason::EmptyInput);
        assert!(result.should_return_empty);
    }

    #[test]
    fn short_timeout_finalize_is_cached_not_emitted() {
        let (agg, _, reporter) = test_aggregator();
        let mut timeout = request_with_audio("a", 1, &make_tone(2000, 3000));
        timeout.is_timeout_triggered = true;
        let result = agg.process(&timeout).unwrap();

        assert_eq!(result.reason, ResultReason::TimeoutPending);
        assert!(result.is_timeout_pending);
        assert!(result.audio_segments.is_empty());
        // The job is accounted now; its audio rides on a later job.
        assert_eq!(result.needs_empty_ack, vec!["a"]);
        assert_eq!(agg.live_buffers(), 1);
        assert!(reporter.any(|d| matches!(d, Decision::TimeoutCached { .. })));
    }

    #[test]
    fn cached_timeout_audio_merges_into_next_finalize() {
        let (agg, _, reporter) = test_aggregator();
        let mut timeout = request_with_audio("a", 1, &make_tone(2000, 3000));
        timeout.is_timeout_triggered = true;
        agg.process(&timeout).unwrap();

        let mut cut = request_with_audio("b", 2, &make_tone(1000, 3000));
        cut.is_manual_cut = true;
        let result = agg.process(&cut).unwrap();

        assert_eq!(result.reason, ResultReason::Batched);
        assert_eq!(decoded_len(&result), pcm::bytes_for_ms(3000, SR));
        // Merge attribution: the absorbing job owns every batch.
        assert!(result.original_job_ids.iter().all(|id| id == "b"));
        assert!(reporter.any(|d| matches!(
            d,
            Decision::CacheMerged {
                kind: CacheKind::Timeout,
                ..
            }
        )));
        assert_eq!(agg.live_buffers(), 0);
    }

    #[test]
    fn duplicate_utterance_cache_is_discarded() {
        let (agg, _, reporter) = test_aggregator();
        let mut timeout = request_with_audio("a", 5, &make_tone(2000, 3000));
        timeout.is_timeout_triggered = true;
        agg.process(&timeout).unwrap();

        // Same utterance index again: the cache is a duplicate delivery.
        let mut cut = request_with_audio("a", 5, &make_tone(1000, 3000));
        cut.is_manual_cut = true;
        let result = agg.process(&cut).unwrap();

        assert!(reporter.any(|d| matches!(
            d,
            Decision::CacheDiscarded {
                kind: CacheKind::Timeout
            }
        )));
        // Only the fresh 1000ms survive.
        assert_eq!(decoded_len(&result), pcm::bytes_for_ms(1000, SR));
    }

    #[test]
    fn unrelated_cache_is_flushed_independently() {
        let (agg, _, reporter) = test_aggregator();
        let mut timeout = request_with_audio("a", 1, &make_tone(2000, 3000));
        timeout.is_timeout_triggered = true;
        agg.process(&timeout).unwrap();

        // Utterance distance 9 > merge window: flush the cache on its own.
        let mut cut = request_with_audio("b", 10, &make_tone(1000, 3000));
        cut.is_manual_cut = true;
        let result = agg.process(&cut).unwrap();

        assert!(reporter.any(|d| matches!(d, Decision::CacheFlushedUnrelated { .. })));
        assert_eq!(result.audio_segments.len(), 2);
        // The flushed cache keeps its own attribution; the new audio its own.
        assert!(result.original_job_ids.contains(&"a".to_string()));
        assert!(result.original_job_ids.contains(&"b".to_string()));
        assert_eq!(decoded_len(&result), pcm::bytes_for_ms(3000, SR));
    }

    #[test]
    fn ttl_flush_emits_cache_without_a_finalize() {
        let (agg, clock, reporter) = test_aggregator();
        let mut timeout = request_with_audio("a", 1, &make_tone(2000, 3000));
        timeout.is_timeout_triggered = true;
        agg.process(&timeout).unwrap();

        clock.advance_ms(11_000);
        // Unrelated empty chunk; no trigger at all.
        let result = agg.process(&JobRequest::new("b", "session-1", 2)).unwrap();

        assert!(reporter.any(|d| matches!(d, Decision::TtlFlush { .. })));
        assert_eq!(result.reason, ResultReason::Batched);
        assert_eq!(decoded_len(&result), pcm::bytes_for_ms(2000, SR));
        assert_eq!(result.original_job_ids, vec!["a"]);
        assert_eq!(agg.live_buffers(), 0);
    }

    #[test]
    fn pending_cache_survives_within_ttl() {
        let (agg, clock, _) = test_aggregator();
        let mut timeout = request_with_audio("a", 1, &make_tone(2000, 3000));
        timeout.is_timeout_triggered = true;
        agg.process(&timeout).unwrap();

        clock.advance_ms(5_000);
        let result = agg
            .process(&request_with_audio("b", 2, &make_tone(500, 3000)))
            .unwrap();
        assert_eq!(result.reason, ResultReason::Buffering);
        assert_eq!(agg.live_buffers(), 1);
    }

    #[test]
    fn max_duration_emits_front_and_caches_remainder() {
        let (agg, _, reporter) = test_aggregator();
        // 4000ms speech, 400ms pause, 4600ms speech.
        let mut audio = make_tone(4000, 3000);
        audio.extend(make_silence(400));
        audio.extend(make_tone(4600, 3000));

        let mut overflow = request_with_audio("a", 1, &audio);
        overflow.is_max_duration_triggered = true;
        let result = agg.process(&overflow).unwrap();

        assert_eq!(result.reason, ResultReason::Batched);
        assert_eq!(result.audio_segments.len(), 1);
        assert_eq!(decoded_len(&result), pcm::bytes_for_ms(5000, SR));
        assert_eq!(result.original_job_ids, vec!["a"]);
        assert!(result.needs_empty_ack.is_empty());
        assert!(reporter.any(|d| matches!(
            d,
            Decision::RemainderCached {
                kind: CacheKind::MaxDuration,
                ..
            }
        )));
        // Remainder held, buffer stays alive.
        assert_eq!(agg.live_buffers(), 1);
    }

    #[test]
    fn max_duration_without_pause_forces_a_cut() {
        let (agg, _, reporter) = test_aggregator();
        let mut overflow = request_with_audio("a", 1, &make_tone(8000, 3000));
        overflow.is_max_duration_triggered = true;
        let result = agg.process(&overflow).unwrap();

        assert!(reporter.any(|d| matches!(d, Decision::ForcedCut { .. })));
        assert_eq!(result.audio_segments.len(), 1);
        // Head emitted, tail cached; everything is conserved.
        let emitted = decoded_len(&result);
        assert!(emitted > 0 && emitted < pcm::bytes_for_ms(8000, SR));
    }

    #[test]
    fn short_max_duration_retains_audio_as_partial() {
        let (agg, _, _) = test_aggregator();
        let mut overflow = request_with_audio("a", 1, &make_tone(3000, 3000));
        overflow.is_max_duration_triggered = true;
        let result = agg.process(&overflow).unwrap();

        // Zero batches but the audio is retained: distinct from EmptyInput,
        // and the buffer must survive.
        assert_eq!(result.reason, ResultReason::AsrFailurePartial);
        assert!(result.should_return_empty);
        assert_eq!(result.needs_empty_ack, vec!["a"]);
        assert_eq!(agg.live_buffers(), 1);
    }

    #[test]
    fn decode_error_leaves_buffer_untouched() {
        let (agg, _, _) = test_aggregator();
        agg.process(&request_with_audio("a", 1, &make_tone(1000, 3000)))
            .unwrap();

        let mut bad = JobRequest::new("b", "session-1", 1);
        bad.audio = "!!!not base64!!!".to_string();
        assert!(agg.process(&bad).is_err());

        // The buffered 1000ms are still intact.
        let mut cut = JobRequest::new("c", "session-1", 1);
        cut.is_manual_cut = true;
        let result = agg.process(&cut).unwrap();
        assert_eq!(decoded_len(&result), pcm::bytes_for_ms(1000, SR));
    }

    #[test]
    fn sample_rate_mismatch_is_rejected() {
        let (agg, _, _) = test_aggregator();
        agg.process(&request_with_audio("a", 1, &make_tone(1000, 3000)))
            .unwrap();

        let mut other = request_with_audio("b", 1, &make_tone(100, 3000));
        other.sample_rate = 8000;
        let err = agg.process(&other).unwrap_err();
        assert!(matches!(err, UttermillError::SampleRateMismatch { .. }));
    }

    #[test]
    fn odd_length_payload_is_repaired() {
        let (agg, _, reporter) = test_aggregator();
        let mut audio = make_tone(100, 3000);
        audio.push(0x7f);
        agg.process(&request_with_audio("a", 1, &audio)).unwrap();
        assert!(reporter.any(|d| matches!(d, Decision::OddLengthRepaired { dropped_bytes: 1 })));
    }

    #[test]
    fn mock_decoder_is_injectable() {
        let clock = MockClock::new();
        let agg = Aggregator::with_clock(Config::default(), clock)
            .unwrap()
            .with_decoder(Box::new(
                MockDecoder::new().with_output(make_tone(500, 3000)),
            ));

        let mut request = JobRequest::new("a", "session-1", 1);
        request.audio = "opaque-payload".to_string();
        request.audio_format = crate::job::AudioFormat::Opus;
        request.is_manual_cut = true;

        let result = agg.process(&request).unwrap();
        assert_eq!(decoded_len(&result), pcm::bytes_for_ms(500, SR));
    }

    #[test]
    fn sweep_reclaims_idle_buffers() {
        let (agg, clock, reporter) = test_aggregator();
        agg.process(&request_with_audio("a", 1, &make_tone(1000, 3000)))
            .unwrap();
        assert_eq!(agg.live_buffers(), 1);

        clock.advance_ms(301_000);
        let swept = agg.sweep();
        assert_eq!(swept, 1);
        assert_eq!(agg.live_buffers(), 0);
        assert!(reporter.any(|d| matches!(d, Decision::Swept { .. })));
    }

    #[test]
    fn sweep_keeps_active_buffers() {
        let (agg, clock, _) = test_aggregator();
        agg.process(&request_with_audio("a", 1, &make_tone(1000, 3000)))
            .unwrap();
        clock.advance_ms(1_000);
        assert_eq!(agg.sweep(), 0);
        assert_eq!(agg.live_buffers(), 1);
    }

    #[tokio::test]
    async fn station_loop_processes_and_emits() {
        let clock = MockClock::new();
        let agg = Arc::new(
            Aggregator::with_clock(Config::default(), clock)
                .unwrap()
                .with_reporter(Arc::new(crate::observe::NullReporter)),
        );

        let (input_tx, input_rx) = mpsc::channel(8);
        let (output_tx, mut output_rx) = mpsc::channel(8);
        tokio::spawn(agg.run(input_rx, output_tx));

        let mut cut = request_with_audio("a", 1, &make_tone(300, 3000));
        cut.is_manual_cut = true;
        input_tx.send(cut).await.unwrap();

        let result = output_rx.recv().await.unwrap();
        assert_eq!(result.reason, ResultReason::Batched);
        drop(input_tx);
    }

    #[tokio::test]
    async fn station_loop_skips_rejected_chunks() {
        let clock = MockClock::new();
        let reporter = Arc::new(CollectorReporter::new());
        let agg = Arc::new(
            Aggregator::with_clock(Config::default(), clock)
                .unwrap()
                .with_reporter(reporter.clone()),
        );

        let (input_tx, input_rx) = mpsc::channel(8);
        let (output_tx, mut output_rx) = mpsc::channel(8);
        tokio::spawn(agg.run(input_rx, output_tx));

        let mut bad = JobRequest::new("a", "session-1", 1);
        bad.audio = "###".to_string();
        input_tx.send(bad).await.unwrap();

        let mut good = request_with_audio("b", 1, &make_tone(300, 3000));
        good.is_manual_cut = true;
        input_tx.send(good).await.unwrap();

        // Only the good chunk produces a result.
        let result = output_rx.recv().await.unwrap();
        assert_eq!(result.original_job_ids, vec!["b"]);
        assert!(reporter.any(|d| matches!(d, Decision::ChunkRejected { .. })));
        drop(input_tx);
    }
}
