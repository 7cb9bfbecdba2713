//! Job container assignment.
//!
//! Maps emitted batches back to the job ids that contributed their bytes,
//! using the head-alignment rule: a batch belongs to the job owning its
//! first byte. Jobs that contributed bytes but own no batch are "empty
//! containers" and must receive an explicit empty acknowledgment downstream
//! so the 1-job : 1-result accounting invariant holds.

use crate::batch::batcher::Batch;
use crate::job::JobSpan;

/// Attributes each batch to the job owning its first byte.
///
/// Offsets in `spans` and `batches` must index the same merged buffer. If a
/// batch head falls past the last span boundary (possible only after a
/// hangover rounding at the very tail), the nearest preceding span owns it.
pub fn assign_containers(batches: &[Batch], spans: &[JobSpan]) -> Vec<String> {
    batches
        .iter()
        .map(|batch| owner_of(batch.start_offset, spans))
        .collect()
}

fn owner_of(offset: usize, spans: &[JobSpan]) -> String {
    if let Some(span) = spans
        .iter()
        .find(|s| s.start_offset <= offset && offset < s.end_offset)
    {
        return span.job_id.clone();
    }
    // Nearest span starting at or before the offset, else the first span.
    spans
        .iter()
        .rev()
        .find(|s| s.start_offset <= offset)
        .or_else(|| spans.first())
        .map(|s| s.job_id.clone())
        .unwrap_or_default()
}

/// Job ids present in `spans` but absent from the assigned set, in first
/// contribution order, deduplicated.
pub fn empty_containers(spans: &[JobSpan], assigned: &[String]) -> Vec<String> {
    let mut empty = Vec::new();
    for span in spans {
        if !assigned.contains(&span.job_id) && !empty.contains(&span.job_id) {
            empty.push(span.job_id.clone());
        }
    }
    empty
}
