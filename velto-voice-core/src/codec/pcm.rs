//! Float ↔ signed 16-bit PCM conversion.
//!
//! Negative samples scale through `[-32768, -1]` and non-negative samples
//! through `[0, 32767]`, matching the usual signed-range convention. Decoding
//! divides by 32768 for both halves.

use crate::error::{Result, VoiceError};

/// Convert normalized samples to PCM16.
///
/// Input is clamped to `[-1.0, 1.0]` first; NaN becomes silence.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert PCM16 samples back to normalized floats.
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Serialize samples as little-endian byte pairs.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian byte pairs into samples.
///
/// # Errors
/// `VoiceError::MalformedAudio` when `bytes` has an odd length.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::MalformedAudio(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
