//! Remote conversational transport.
//!
//! A transport carries outbound microphone envelopes to the remote model and
//! reports everything it hears back as [`TransportEvent`]s on a bounded
//! channel owned by the session loop.

pub mod protocol;

#[cfg(feature = "live")]
pub mod gemini;

#[cfg(feature = "live")]
pub use gemini::GeminiLiveTransport;
pub use protocol::LiveConfig;

use tokio::sync::mpsc;

use crate::{codec::AudioEnvelope, error::Result};

/// Something the remote side did.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection confirmed; the session may start sending.
    Opened,
    /// A chunk of model speech.
    Audio(AudioEnvelope),
    /// The user barged in; queued playback should be abandoned.
    Interrupted,
    /// The model finished its turn.
    TurnComplete,
    /// The connection closed, with an optional reason.
    Closed(Option<String>),
    /// The connection failed.
    Error(String),
}

/// Bidirectional audio channel to the remote model.
pub trait Transport: Send + 'static {
    /// Start connecting. Events, including `Opened`, are delivered on
    /// `events`. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// `Transport` if the connection cannot even be attempted.
    fn open(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<()>;

    /// Queue one envelope for delivery.
    ///
    /// # Errors
    /// `Send` when the envelope could not be queued. Never fatal on its own.
    fn send(&mut self, envelope: AudioEnvelope) -> Result<()>;

    /// Close the connection. Idempotent.
    fn close(&mut self);
}
