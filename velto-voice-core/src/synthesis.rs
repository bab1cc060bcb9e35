//! One-shot text-to-speech into a playable WAV file.
//!
//! The TTS model answers with raw 24 kHz mono PCM16 as base64 inline data;
//! the WAV builder adds the container.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    codec::{transport_text_to_bytes, wrap_pcm_with, AudioEnvelope, WavFormat},
    error::{Result, VoiceError},
    transport::protocol::{Content, GenerationConfig, Part, DEFAULT_VOICE},
};

pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Sample format of synthesized speech.
pub const TTS_FORMAT: WavFormat = WavFormat {
    sample_rate: 24_000,
    channels: 1,
    bits_per_sample: 16,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content; 1],
    generation_config: &'a GenerationConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
}

/// Speech synthesizer for a single voice.
pub struct SpeechSynthesizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    generation_config: GenerationConfig,
}

impl SpeechSynthesizer {
    /// # Errors
    /// `Synthesis` if the API key is empty.
    pub fn new(api_key: impl Into<String>, voice: Option<&str>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(VoiceError::Synthesis(
                "API key required for speech synthesis".into(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_TTS_MODEL.into(),
            generation_config: GenerationConfig::audio(voice.unwrap_or(DEFAULT_VOICE)),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Synthesize `text` and return raw PCM16 little-endian bytes.
    ///
    /// # Errors
    /// `Synthesis` on HTTP failure or when the response carries no audio.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let request = GenerateRequest {
            contents: [Content {
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            generation_config: &self.generation_config,
        };

        let url = format!("{API_BASE}/{}:generateContent", self.model);
        debug!(model = self.model.as_str(), chars = text.len(), "requesting speech");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!("TTS error {status}: {body}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to read response: {e}")))?;
        let pcm = extract_audio(&body)?;
        info!(bytes = pcm.len(), "speech synthesized");
        Ok(pcm)
    }

    /// Synthesize `text` and wrap it as a 24 kHz mono 16-bit WAV file.
    pub async fn synthesize_wav(&self, text: &str) -> Result<Vec<u8>> {
        let pcm = self.synthesize(text).await?;
        Ok(wrap_pcm_with(&pcm, TTS_FORMAT))
    }
}

/// Pull the first inline audio payload out of a `generateContent` response.
///
/// # Errors
/// `Synthesis("no audio data generated")` when none is present;
/// `MalformedAudio` when the payload is not valid base64.
pub fn extract_audio(body: &str) -> Result<Vec<u8>> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| VoiceError::Synthesis(format!("unexpected response: {e}")))?;

    let inline: Option<AudioEnvelope> = response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data.filter(|d| !d.data.is_empty()));

    match inline {
        Some(envelope) => transport_text_to_bytes(&envelope.data),
        None => Err(VoiceError::Synthesis("no audio data generated".into())),
    }
}
