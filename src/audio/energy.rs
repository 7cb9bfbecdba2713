//! Energy-based pause detection and splitting.
//!
//! Finds low-energy ("pause") intervals in PCM buffers and recursively
//! splits long audio at pause points, bounded by min/max segment duration
//! and a hard recursion depth cap. Tuned for human speech pause detection,
//! not arbitrary signal segmentation.

use crate::audio::pcm;
use crate::defaults;

/// Tuning for the energy splitter.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Maximum segment duration before a split is attempted (ms).
    pub max_segment_ms: u64,
    /// Minimum segment duration a split may produce (ms).
    pub min_segment_ms: u64,
    /// Extra audio kept on the first half after a pause (ms).
    pub hangover_ms: u64,
    /// Hard recursion depth cap.
    pub max_depth: u32,
    /// RMS analysis window (ms).
    pub window_ms: u64,
    /// Minimum silence run to qualify as a pause (ms).
    pub min_pause_ms: u64,
    /// Absolute floor for the adaptive silence threshold (raw PCM16 RMS).
    pub silence_floor: f64,
    /// Fraction of median window RMS for the adaptive threshold.
    pub silence_ratio: f64,
    /// Bounds for the lowest-energy fallback interval (ms).
    pub flat_interval_min_ms: u64,
    pub flat_interval_max_ms: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            max_segment_ms: defaults::MAX_SEGMENT_MS,
            min_segment_ms: defaults::MIN_SEGMENT_MS,
            hangover_ms: defaults::HANGOVER_MS,
            max_depth: defaults::MAX_SPLIT_DEPTH,
            window_ms: defaults::RMS_WINDOW_MS,
            min_pause_ms: defaults::MIN_PAUSE_MS,
            silence_floor: defaults::SILENCE_FLOOR,
            silence_ratio: defaults::SILENCE_RATIO,
            flat_interval_min_ms: defaults::FLAT_INTERVAL_MIN_MS,
            flat_interval_max_ms: defaults::FLAT_INTERVAL_MAX_MS,
        }
    }
}

/// Calculates the Root Mean Square of samples in raw PCM16 units.
///
/// 0.0 is silence; a full-scale square wave is ~32767.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Per-window RMS over a PCM16 byte buffer. The trailing partial window is
/// included when non-empty.
fn window_rms(audio: &[u8], sample_rate: u32, window_ms: u64) -> Vec<f64> {
    let window_bytes = pcm::bytes_for_ms(window_ms, sample_rate).max(pcm::align_to_frame(2));
    audio
        .chunks(window_bytes)
        .map(|chunk| {
            let samples: Vec<i16> = chunk
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            rms(&samples)
        })
        .collect()
}

/// Adaptive silence threshold: `max(floor, median * ratio)`.
///
/// Scaling off the median keeps pause detection working in noisy rooms
/// where a fixed absolute threshold would never fire.
fn adaptive_threshold(windows: &[f64], floor: f64, ratio: f64) -> f64 {
    if windows.is_empty() {
        return floor;
    }
    let mut sorted = windows.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = sorted[sorted.len() / 2];
    (median * ratio).max(floor)
}

/// Maximal runs of consecutive sub-threshold windows, as `(start, end)`
/// window indices (end exclusive), keeping only runs of at least
/// `min_windows`.
fn silence_runs(windows: &[f64], threshold: f64, min_windows: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, &level) in windows.iter().enumerate() {
        if level < threshold {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else if let Some(start) = run_start.take()
            && i - start >= min_windows
        {
            runs.push((start, i));
        }
    }
    if let Some(start) = run_start
        && windows.len() - start >= min_windows
    {
        runs.push((start, windows.len()));
    }
    runs
}

/// Finds the byte offset to split `audio` at, or None if no pause yields
/// two halves of at least the minimum segment duration.
///
/// The split lands at the END of the longest pause (preserving trailing
/// context for the next segment) plus the hangover, so the first half never
/// ends mid-word.
fn best_split_offset(audio: &[u8], sample_rate: u32, cfg: &SplitConfig) -> Option<usize> {
    let duration = pcm::duration_ms(audio.len(), sample_rate);
    let windows = window_rms(audio, sample_rate, cfg.window_ms);
    let threshold = adaptive_threshold(&windows, cfg.silence_floor, cfg.silence_ratio);
    let min_windows = (cfg.min_pause_ms.div_ceil(cfg.window_ms)).max(1) as usize;

    let mut best: Option<(usize, usize)> = None; // (run_len, split_ms)
    for (start, end) in silence_runs(&windows, threshold, min_windows) {
        let split_ms = (end as u64 * cfg.window_ms + cfg.hangover_ms).min(duration);
        if split_ms < cfg.min_segment_ms || duration - split_ms < cfg.min_segment_ms {
            continue;
        }
        let run_len = end - start;
        if best.is_none_or(|(len, _)| run_len > len) {
            best = Some((run_len, split_ms as usize));
        }
    }

    best.map(|(_, split_ms)| {
        pcm::align_to_frame(pcm::bytes_for_ms(split_ms as u64, sample_rate)).min(audio.len())
    })
}

/// Recursively splits `audio` at pause points.
///
/// Buffers at or below the maximum segment duration are returned unchanged
/// (likewise anything below the minimum, to avoid over-fragmenting). When no
/// valid split point exists the whole buffer is returned unsplit rather than
/// failing. The concatenation of the returned segments is byte-identical to
/// the input.
pub fn split_by_energy(audio: &[u8], sample_rate: u32, cfg: &SplitConfig) -> Vec<Vec<u8>> {
    let mut segments = Vec::new();
    split_recursive(audio, sample_rate, cfg, cfg.max_depth, &mut segments);
    segments
}

fn split_recursive(
    audio: &[u8],
    sample_rate: u32,
    cfg: &SplitConfig,
    depth: u32,
    out: &mut Vec<Vec<u8>>,
) {
    let duration = pcm::duration_ms(audio.len(), sample_rate);
    if duration <= cfg.max_segment_ms || depth == 0 {
        out.push(audio.to_vec());
        return;
    }
    match best_split_offset(audio, sample_rate, cfg) {
        Some(at) if at > 0 && at < audio.len() => {
            split_recursive(&audio[..at], sample_rate, cfg, depth - 1, out);
            split_recursive(&audio[at..], sample_rate, cfg, depth - 1, out);
        }
        _ => out.push(audio.to_vec()),
    }
}

/// Searches the 40–60% (fallback 30–70%) region around the buffer midpoint
/// for the flattest short interval, returning its byte range.
///
/// Noise-robust fallback for audio where the primary pause-finder yields
/// nothing: even continuous speech has a lowest-energy stretch, and cutting
/// there is the least damaging forced cut.
pub fn find_lowest_energy_interval(
    audio: &[u8],
    sample_rate: u32,
    cfg: &SplitConfig,
) -> Option<(usize, usize)> {
    let duration = pcm::duration_ms(audio.len(), sample_rate);
    if duration < cfg.flat_interval_min_ms * 2 {
        return None;
    }
    let interval_ms = (duration / 20).clamp(cfg.flat_interval_min_ms, cfg.flat_interval_max_ms);
    let windows = window_rms(audio, sample_rate, cfg.window_ms);
    let interval_windows = (interval_ms / cfg.window_ms).max(1) as usize;

    for (lo, hi) in [(0.4, 0.6), (0.3, 0.7)] {
        let start_win = (windows.len() as f64 * lo) as usize;
        let end_win = ((windows.len() as f64 * hi) as usize).min(windows.len());
        if end_win.saturating_sub(start_win) < interval_windows {
            continue;
        }

        let mut best: Option<(f64, usize)> = None; // (mean rms, start window)
        for w in start_win..=end_win - interval_windows {
            let mean: f64 =
                windows[w..w + interval_windows].iter().sum::<f64>() / interval_windows as f64;
            if best.is_none_or(|(m, _)| mean < m) {
                best = Some((mean, w));
            }
        }

        if let Some((_, w)) = best {
            let start = pcm::align_to_frame(pcm::bytes_for_ms(
                w as u64 * cfg.window_ms,
                sample_rate,
            ))
            .min(audio.len());
            let end = pcm::align_to_frame(pcm::bytes_for_ms(
                (w + interval_windows) as u64 * cfg.window_ms,
                sample_rate,
            ))
            .min(audio.len());
            if end > start {
                return Some((start, end));
            }
        }
    }
    None
}
