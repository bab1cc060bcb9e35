//! Gemini Live wire messages.
//!
//! Pure JSON mapping between the bidirectional streaming API and
//! [`TransportEvent`]. No I/O here; the socket lives in `gemini.rs`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TransportEvent;
use crate::codec::AudioEnvelope;

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Kore";
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are 'Velto Support', a friendly and helpful AI \
customer support agent for the Velto AI web application. Velto AI is a creative suite with a \
thumbnail maker, a title and tag generator, a product photo generator and an image enhancer. \
Answer questions about how to use these features, guide users towards better results, and be \
concise, professional and enthusiastic.";

/// Connection settings for the live transport.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub endpoint: String,
    /// Outbound envelopes buffered ahead of the socket.
    pub outbound_queue: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_LIVE_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
            endpoint: LIVE_ENDPOINT.into(),
            outbound_queue: 32,
        }
    }
}

impl LiveConfig {
    /// Defaults plus the API key from `GEMINI_API_KEY` (or `API_KEY`).
    pub fn from_env() -> Self {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .unwrap_or_default();
        Self {
            api_key,
            ..Self::default()
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Full socket URL including the key query parameter.
    pub fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }

    /// Model path as the API expects it.
    fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl GenerationConfig {
    pub fn audio(voice: &str) -> Self {
        Self {
            response_modalities: vec!["AUDIO".into()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.into(),
                    },
                },
            },
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<AudioEnvelope>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [&'a AudioEnvelope; 1],
}

/// First message on a new socket.
pub fn setup_message(config: &LiveConfig) -> SetupMessage {
    SetupMessage {
        setup: Setup {
            model: config.model_path(),
            generation_config: GenerationConfig::audio(&config.voice),
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(config.system_instruction.clone()),
                    inline_data: None,
                }],
            },
        },
    }
}

/// Serialize one microphone envelope as a realtime input message.
pub fn realtime_input_json(envelope: &AudioEnvelope) -> serde_json::Result<String> {
    serde_json::to_string(&RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [envelope],
        },
    })
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<Content>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

/// Map one server frame to zero or more transport events, in the order the
/// session should apply them.
///
/// Unknown or unparseable frames yield no events.
pub fn parse_server_message(text: &str) -> Vec<TransportEvent> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("ignoring unparseable server frame: {e}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(TransportEvent::Opened);
    }
    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|p| p.inline_data)
                    .filter(|d| !d.data.is_empty())
                    .map(TransportEvent::Audio),
            );
        }
        if content.interrupted {
            events.push(TransportEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(TransportEvent::TurnComplete);
        }
    }
    if message.go_away.is_some() {
        events.push(TransportEvent::Closed(Some("server requested disconnect".into())));
    }
    events
}
