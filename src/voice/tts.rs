//! Text-to-speech processing
//!
//! Synthesizes assistant replies into encoded audio for the front-end to
//! play. The audio stays opaque to the gateway: no decoding, no resampling.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::conversation::SpeechSynthesizer;
use crate::{Error, Result};

/// TTS backend
#[derive(Clone, Copy, Debug)]
enum TtsBackend {
    OpenAi,
    ElevenLabs,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    model: String,
    speed: f32,
    default_voice: String,
    /// Active voice, overridable per session
    voice: Mutex<String>,
    backend: TtsBackend,
}

impl TextToSpeech {
    /// Create a synthesizer backed by the `OpenAI` speech API
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new_openai(api_key: String, model: String, voice: String, speed: f32) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            speed,
            default_voice: voice.clone(),
            voice: Mutex::new(voice),
            backend: TtsBackend::OpenAi,
        })
    }

    /// Create a synthesizer backed by ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new_elevenlabs(api_key: String, model: String, voice_id: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            // ElevenLabs voices carry their own pacing
            speed: 1.0,
            default_voice: voice_id.clone(),
            voice: Mutex::new(voice_id),
            backend: TtsBackend::ElevenLabs,
        })
    }

    fn active_voice(&self) -> String {
        self.voice
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn synthesize_openai(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn synthesize_elevenlabs(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let request = SpeechRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(format!(
                "https://api.elevenlabs.io/v1/text-to-speech/{voice}"
            ))
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn begin_session(&self, voice_id: Option<&str>) {
        let mut voice = self
            .voice
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *voice = voice_id.map_or_else(|| self.default_voice.clone(), String::from);
        tracing::debug!(voice = %voice, "synthesizer session reset");
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let voice = self.active_voice();
        tracing::debug!(chars = text.len(), voice = %voice, backend = ?self.backend, "synthesizing");

        let audio = match self.backend {
            TtsBackend::OpenAi => self.synthesize_openai(text, &voice).await?,
            TtsBackend::ElevenLabs => self.synthesize_elevenlabs(text, &voice).await?,
        };

        tracing::info!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio)
    }
}
