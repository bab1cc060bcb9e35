//! Transport-safe audio envelopes.
//!
//! The remote channel only carries text, so PCM16 bytes travel as standard
//! padded base64 tagged with a MIME-style descriptor such as
//! `audio/pcm;rate=16000`.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use super::pcm::{float_to_pcm16, le_bytes_to_pcm16, pcm16_to_float, pcm16_to_le_bytes};
use crate::buffering::chunk::AudioChunk;
use crate::error::{Result, VoiceError};

const PCM_MIME_PREFIX: &str = "audio/pcm";

/// Encode arbitrary bytes as transport text.
pub fn bytes_to_transport_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode transport text back to bytes.
///
/// # Errors
/// `VoiceError::MalformedAudio` if `text` is not valid base64.
pub fn transport_text_to_bytes(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| VoiceError::MalformedAudio(format!("invalid base64 payload: {e}")))
}

/// One audio chunk in transport form.
///
/// Field names match the inline blob shape used by the remote service, so the
/// type serializes directly into wire messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioEnvelope {
    pub mime_type: String,
    pub data: String,
}

impl AudioEnvelope {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// MIME descriptor for raw PCM16 at `sample_rate`.
    pub fn pcm_mime(sample_rate: u32) -> String {
        format!("{PCM_MIME_PREFIX};rate={sample_rate}")
    }

    /// Encode a chunk: float → PCM16 LE → base64.
    pub fn encode(chunk: &AudioChunk) -> Self {
        let pcm = float_to_pcm16(&chunk.samples);
        Self {
            mime_type: Self::pcm_mime(chunk.sample_rate()),
            data: bytes_to_transport_text(&pcm16_to_le_bytes(&pcm)),
        }
    }

    /// Sample rate declared by the `rate=` parameter, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .skip(1)
            .filter_map(|param| param.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
            .and_then(|(_, value)| value.trim().parse().ok())
    }

    /// Whether the payload is raw PCM (as opposed to some other media type).
    pub fn is_pcm(&self) -> bool {
        self.mime_type
            .split(';')
            .next()
            .map(|base| base.trim().eq_ignore_ascii_case(PCM_MIME_PREFIX))
            .unwrap_or(false)
    }

    /// Raw PCM16 samples carried by this envelope.
    pub fn pcm16(&self) -> Result<Vec<i16>> {
        le_bytes_to_pcm16(&transport_text_to_bytes(&self.data)?)
    }

    /// Decode into a float chunk.
    ///
    /// The chunk's rate comes from the descriptor, or `default_rate` when the
    /// descriptor has none.
    ///
    /// # Errors
    /// `VoiceError::MalformedAudio` for non-PCM media, bad base64, or an odd
    /// byte count.
    pub fn decode(&self, default_rate: u32) -> Result<AudioChunk> {
        if !self.is_pcm() {
            return Err(VoiceError::MalformedAudio(format!(
                "unsupported media type '{}'",
                self.mime_type
            )));
        }
        let samples = pcm16_to_float(&self.pcm16()?);
        Ok(AudioChunk::new(
            samples,
            self.sample_rate().unwrap_or(default_rate),
        ))
    }
}
