//! Wire payload decoding.
//!
//! Converts a chunk's base64 payload into raw PCM16 bytes. Opus decoding is
//! a black-box collaborator: the trait is the contract, and deployments
//! inject a real codec implementation behind it.

use crate::error::{Result, UttermillError};
use crate::job::AudioFormat;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;

/// Trait for decoding a wire payload into PCM16 bytes.
///
/// This trait allows swapping implementations (real codec vs mock).
/// Callers must not assume the returned byte count is frame-aligned; the
/// aggregator repairs odd lengths by truncation.
pub trait AudioDecoder: Send + Sync {
    /// Decode a base64 payload of the declared format into PCM16LE bytes.
    fn decode(&self, payload_b64: &str, format: AudioFormat, sample_rate: u32) -> Result<Vec<u8>>;

    /// Whether this decoder can handle the given format.
    fn supports(&self, format: AudioFormat) -> bool;
}

/// Implement AudioDecoder for Arc<T> to allow sharing across aggregators.
impl<T: AudioDecoder> AudioDecoder for Arc<T> {
    fn decode(&self, payload_b64: &str, format: AudioFormat, sample_rate: u32) -> Result<Vec<u8>> {
        (**self).decode(payload_b64, format, sample_rate)
    }

    fn supports(&self, format: AudioFormat) -> bool {
        (**self).supports(format)
    }
}

/// Standard decoder: passes PCM16 payloads through, rejects opus.
///
/// Deployments with opus input inject their codec as a separate
/// [`AudioDecoder`]; this keeps the codec dependency out of the core.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pcm16Decoder;

impl AudioDecoder for Pcm16Decoder {
    fn decode(&self, payload_b64: &str, format: AudioFormat, _sample_rate: u32) -> Result<Vec<u8>> {
        match format {
            AudioFormat::Pcm16 => decode_base64(payload_b64),
            AudioFormat::Opus => Err(UttermillError::UnsupportedFormat {
                format: format.to_string(),
            }),
        }
    }

    fn supports(&self, format: AudioFormat) -> bool {
        format == AudioFormat::Pcm16
    }
}

/// Decodes a base64 payload, mapping failures to a decode error.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    BASE64
        .decode(payload)
        .map_err(|e| UttermillError::DecodeFailed {
            message: e.to_string(),
        })
}

/// Encodes PCM bytes for the wire.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Mock decoder for testing.
#[derive(Debug, Clone, Default)]
pub struct MockDecoder {
    output: Vec<u8>,
    should_fail: bool,
}

impl MockDecoder {
    /// Create a mock that decodes every payload to an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to return specific PCM bytes.
    pub fn with_output(mut self, output: Vec<u8>) -> Self {
        self.output = output;
        self
    }

    /// Configure the mock to fail on decode.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl AudioDecoder for MockDecoder {
    fn decode(&self, _payload_b64: &str, _format: AudioFormat, _sample_rate: u32) -> Result<Vec<u8>> {
        if self.should_fail {
            Err(UttermillError::DecodeFailed {
                message: "mock decode failure".to_string(),
            })
        } else {
            Ok(self.output.clone())
        }
    }

    fn supports(&self, _format: AudioFormat) -> bool {
        !self.should_fail
    }
}
