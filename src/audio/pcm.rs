//! PCM16 frame encoding and decoding
//!
//! The wire format for audio in both directions is 16-bit signed
//! little-endian linear PCM. Encoding clamps to [-1.0, 1.0] and scales by
//! the full signed 16-bit range; decoding is the inverse scaling, so a
//! round trip is lossless to within one quantization step (1/32767).

use crate::{Error, Result};

/// Scale factor between f32 samples and signed 16-bit PCM
const PCM16_SCALE: f32 = 32767.0;

/// A fixed-size block of captured f32 samples
#[derive(Debug, Clone)]
pub struct CapturedBlock {
    /// Samples in [-1.0, 1.0], mono
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// An encoded outbound audio frame, ready for transport
#[derive(Debug, Clone)]
pub struct WireFrame {
    /// Monotonic sequence number assigned by the session
    pub seq: u64,
    /// PCM16-LE bytes
    pub data: Vec<u8>,
    /// MIME-like format tag (e.g. `audio/pcm;rate=16000`)
    pub mime_type: String,
}

/// MIME format tag for PCM at the given sample rate
#[must_use]
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Encode f32 samples to PCM16-LE bytes
///
/// Each sample is clamped to [-1.0, 1.0] and scaled to the signed 16-bit
/// range. Deterministic; no loss beyond quantization.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode PCM16-LE bytes to f32 samples
///
/// # Errors
///
/// Returns [`Error::Codec`] if the byte length is not a multiple of the
/// sample width. Callers drop the malformed frame and continue.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Codec(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM16_SCALE)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One quantization step of the 16-bit encoding
    const STEP: f32 = 1.0 / PCM16_SCALE;

    #[test]
    fn test_roundtrip_within_one_step() {
        let samples = vec![0.0, 0.25, -0.25, 0.5, -0.5, 0.999, -0.999, 1.0, -1.0];
        let decoded = decode(&encode(&samples)).unwrap();

        assert_eq!(decoded.len(), samples.len());
        for (original, roundtripped) in samples.iter().zip(&decoded) {
            assert!(
                (original - roundtripped).abs() <= STEP,
                "{original} -> {roundtripped} differs by more than one step"
            );
        }
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let bytes = encode(&[2.0, -2.0]);
        let decoded = decode(&bytes).unwrap();

        assert!((decoded[0] - 1.0).abs() <= STEP);
        assert!((decoded[1] + 1.0).abs() <= STEP);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let result = decode(&[0x00, 0x01, 0x02]);
        assert!(matches!(result, Err(Error::Codec(_))));
    }

    #[test]
    fn test_empty_block() {
        assert!(encode(&[]).is_empty());
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_mime_type_format() {
        assert_eq!(pcm_mime_type(16000), "audio/pcm;rate=16000");
    }
}
