//! Stream batcher.
//!
//! Groups variable-length split segments into ~5 second delivery batches.
//! The final partial batch is either retained for a later call (ongoing
//! utterance) or flushed as-is (manual cut / independent utterance).

use crate::audio::pcm;

/// One delivery batch, with its byte position inside the merged buffer it
/// was assembled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Byte offset of the batch's first byte in the merged buffer.
    pub start_offset: usize,
    /// Concatenated PCM16 bytes.
    pub bytes: Vec<u8>,
}

impl Batch {
    /// Byte offset one past the batch's last byte.
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.bytes.len()
    }

    /// Duration of the batch in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        pcm::duration_ms(self.bytes.len(), sample_rate)
    }
}

/// Result of one batching pass.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// Full batches, in emission order.
    pub batches: Vec<Batch>,
    /// Undersized tail retained for the next call, when requested.
    pub remainder: Option<Batch>,
}

impl BatchPlan {
    /// Total bytes across batches and remainder.
    pub fn total_bytes(&self) -> usize {
        self.batches.iter().map(|b| b.bytes.len()).sum::<usize>()
            + self.remainder.as_ref().map_or(0, |r| r.bytes.len())
    }
}

/// Accumulates consecutive segments until the running duration reaches the
/// target, then starts a new batch.
///
/// Segments must be a contiguous partition of one merged buffer (as the
/// energy splitter produces); batch offsets index into that buffer. With
/// `cache_remaining` the trailing sub-target batch becomes the plan's
/// remainder instead of being emitted.
pub fn create_streaming_batches(
    segments: &[Vec<u8>],
    sample_rate: u32,
    target_ms: u64,
    cache_remaining: bool,
) -> BatchPlan {
    let mut plan = BatchPlan::default();
    let mut offset = 0usize;
    let mut current: Option<Batch> = None;

    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        let batch = current.get_or_insert_with(|| Batch {
            start_offset: offset,
            bytes: Vec::new(),
        });
        batch.bytes.extend_from_slice(segment);
        offset += segment.len();
        let full = batch.duration_ms(sample_rate) >= target_ms;

        if full && let Some(done) = current.take() {
            plan.batches.push(done);
        }
    }

    if let Some(tail) = current.take() {
        if cache_remaining {
            plan.remainder = Some(tail);
        } else {
            plan.batches.push(tail);
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16000;

    fn seg(ms: u64) -> Vec<u8> {
        vec![0u8; pcm::bytes_for_ms(ms, SR)]
    }

    #[test]
    fn single_full_segment_is_one_batch() {
        let plan = create_streaming_batches(&[seg(5000)], SR, 5000, true);
        assert_eq!(plan.batches.len(), 1);
        assert!(plan.remainder.is_none());
        assert_eq!(plan.batches[0].duration_ms(SR), 5000);
    }

    #[test]
    fn segments_accumulate_until_target() {
        let plan = create_streaming_batches(&[seg(2000), seg(2000), seg(2000)], SR, 5000, true);
        // 2000+2000 < 5000, +2000 = 6000 >= 5000 closes the batch.
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].duration_ms(SR), 6000);
        assert!(plan.remainder.is_none());
    }

    #[test]
    fn undersized_tail_is_cached_when_requested() {
        let plan = create_streaming_batches(&[seg(5000), seg(3000)], SR, 5000, true);
        assert_eq!(plan.batches.len(), 1);
        let remainder = plan.remainder.unwrap();
        assert_eq!(remainder.duration_ms(SR), 3000);
        assert_eq!(remainder.start_offset, pcm::bytes_for_ms(5000, SR));
    }

    #[test]
    fn undersized_tail_is_flushed_on_manual_cut() {
        let plan = create_streaming_batches(&[seg(5000), seg(3000)], SR, 5000, false);
        assert_eq!(plan.batches.len(), 2);
        assert!(plan.remainder.is_none());
        assert_eq!(plan.batches[1].duration_ms(SR), 3000);
    }

    #[test]
    fn short_lone_segment_becomes_remainder_or_batch() {
        let cached = create_streaming_batches(&[seg(1500)], SR, 5000, true);
        assert!(cached.batches.is_empty());
        assert_eq!(cached.remainder.unwrap().duration_ms(SR), 1500);

        let flushed = create_streaming_batches(&[seg(1500)], SR, 5000, false);
        assert_eq!(flushed.batches.len(), 1);
        assert!(flushed.remainder.is_none());
    }

    #[test]
    fn offsets_are_contiguous() {
        let plan = create_streaming_batches(&[seg(3000), seg(3000), seg(3000), seg(2000)], SR, 5000, true);
        // 3000+3000 closes; 3000+2000 closes; nothing left.
        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0].start_offset, 0);
        assert_eq!(plan.batches[1].start_offset, plan.batches[0].end_offset());
        assert!(plan.remainder.is_none());
    }

    #[test]
    fn empty_input_yields_empty_plan() {
        let plan = create_streaming_batches(&[], SR, 5000, true);
        assert!(plan.batches.is_empty());
        assert!(plan.remainder.is_none());

        let plan = create_streaming_batches(&[Vec::new()], SR, 5000, false);
        assert!(plan.batches.is_empty());
    }

    #[test]
    fn plan_conserves_bytes() {
        let segments = [seg(4000), seg(1500), seg(2500), seg(900)];
        let input: usize = segments.iter().map(Vec::len).sum();
        let plan = create_streaming_batches(&segments, SR, 5000, true);
        assert_eq!(plan.total_bytes(), input);
    }
}
