//! # velto-voice-core
//!
//! Real-time duplex voice pipeline between a local microphone/speaker and a
//! remote conversational model.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → InputBackend → SPSC RingBuffer → CapturePump(velto-capture)
//!                                                    │ resample, frame, RMS
//!                                               gate == Active?
//!                                                    │ AudioEnvelope
//!                                    session loop ──► Transport ──► remote
//!                                         ▲
//!               remote ──► TransportEvent ┘
//!                                         │ Audio / Interrupted
//!                                  PlaybackScheduler ──► PlaybackSink → Speaker
//! ```
//!
//! The audio callbacks never allocate in steady state or touch the network.
//! `VoiceSession` owns every acquired resource and releases them in one
//! teardown path.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;
#[cfg(feature = "tts")]
pub mod synthesis;
pub mod transport;

// Convenience re-exports for downstream crates
pub use buffering::chunk::AudioChunk;
pub use codec::AudioEnvelope;
pub use error::{Result, VoiceError};
pub use ipc::events::{
    AudioActivityEvent, SessionPhase, SessionSnapshot, SessionStatusEvent, SpeakingEvent,
};
pub use playback::{OutputBackend, PlaybackScheduler, PlaybackSink};
pub use session::{SessionConfig, VoiceSession};
pub use transport::{LiveConfig, Transport, TransportEvent};

#[cfg(feature = "audio-cpal")]
pub use audio::{CpalInput, CpalOutput};

#[cfg(feature = "live")]
pub use transport::GeminiLiveTransport;

#[cfg(feature = "tts")]
pub use synthesis::SpeechSynthesizer;
