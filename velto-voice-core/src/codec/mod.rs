//! Raw audio codec: PCM16 conversion, transport text envelopes, and the WAV
//! container. Everything here is pure.

pub mod envelope;
pub mod pcm;
pub mod wav;

pub use envelope::{bytes_to_transport_text, transport_text_to_bytes, AudioEnvelope};
pub use pcm::{float_to_pcm16, le_bytes_to_pcm16, pcm16_to_float, pcm16_to_le_bytes};
pub use wav::{wrap_pcm, wrap_pcm_with, WavFormat, WAV_HEADER_LEN};
