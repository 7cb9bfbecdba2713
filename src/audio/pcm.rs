//! PCM16 byte arithmetic.
//!
//! All buffered audio is raw PCM, 16-bit little-endian mono. These helpers
//! keep byte/duration conversions and frame alignment in one place.

use crate::defaults::BYTES_PER_SAMPLE;

/// Duration in milliseconds of `byte_len` bytes of PCM16 at `sample_rate`.
pub fn duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (byte_len as u64 / BYTES_PER_SAMPLE as u64) * 1000 / sample_rate as u64
}

/// Byte count of `ms` milliseconds of PCM16 at `sample_rate`, frame-aligned.
pub fn bytes_for_ms(ms: u64, sample_rate: u32) -> usize {
    let samples = ms * sample_rate as u64 / 1000;
    samples as usize * BYTES_PER_SAMPLE
}

/// Rounds a byte offset down to a whole sample frame.
pub fn align_to_frame(offset: usize) -> usize {
    offset & !(BYTES_PER_SAMPLE - 1)
}

/// Truncates a trailing partial sample, returning the number of bytes dropped.
///
/// Decoders occasionally hand back an odd byte count; a partial frame is
/// unplayable and would shift every later sample boundary, so it is dropped
/// rather than failing the request.
pub fn repair_alignment(bytes: &mut Vec<u8>) -> usize {
    let aligned = align_to_frame(bytes.len());
    let dropped = bytes.len() - aligned;
    bytes.truncate(aligned);
    dropped
}

/// Decodes PCM16LE bytes into samples.
///
/// The byte slice must be frame-aligned; a trailing partial frame is ignored.
pub fn to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encodes samples as PCM16LE bytes.
pub fn from_samples(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
