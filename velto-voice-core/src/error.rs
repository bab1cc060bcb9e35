use thiserror::Error;

/// All errors produced by velto-voice-core.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("audio output error: {0}")]
    OutputDevice(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// A single outbound frame could not be handed to the transport.
    /// Never fatal to the session on its own.
    #[error("send failed: {0}")]
    Send(String),

    /// Inbound audio arrived with no open playback sink.
    #[error("playback sink is not open")]
    PlaybackClosed,

    #[error("malformed audio payload: {0}")]
    MalformedAudio(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session start was cancelled")]
    Cancelled,

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoiceError {
    /// Human-readable message for the host UI.
    ///
    /// Distinguishes permission, device and network causes so the user knows
    /// what to fix before restarting the session.
    pub fn user_message(&self) -> String {
        match self {
            VoiceError::PermissionDenied(_) => {
                "Microphone access was denied. Allow microphone access and try again.".into()
            }
            VoiceError::DeviceUnavailable(_) => {
                "No microphone was found. Connect an input device and try again.".into()
            }
            VoiceError::AudioStream(detail) | VoiceError::OutputDevice(detail) => {
                format!("Audio device error. {detail}")
            }
            VoiceError::Transport(detail) | VoiceError::Send(detail) => {
                format!("Failed to connect to Voice Agent. {detail}")
            }
            other => other.to_string(),
        }
    }

    /// Whether this error describes a failed or dropped remote connection.
    pub fn is_network(&self) -> bool {
        matches!(self, VoiceError::Transport(_) | VoiceError::Send(_))
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
