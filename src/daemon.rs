//! Daemon - the main gateway service
//!
//! Wires configuration into the collaborator clients, the conversation
//! orchestrator and the API server, then runs until interrupted. Without a
//! chat provider key the gateway still serves its API in setup mode so the
//! front-end can surface a configuration prompt.

use std::sync::Arc;

use crate::api::{self, ApiState};
use crate::chat::ChatClient;
use crate::config::Config;
use crate::conversation::ConversationManager;
use crate::voice::{SpeechToText, TextToSpeech};
use crate::Result;

/// The Talkie daemon - owns the conversation orchestrator
pub struct Daemon {
    config: Config,
    port: u16,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config, port: u16) -> Self {
        Self { config, port }
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the API server cannot start
    pub async fn run(self) -> Result<()> {
        let chat = init_chat(&self.config);
        let synth = init_tts(&self.config);
        let stt = init_stt(&self.config);

        let manager = match (chat, synth) {
            (Some(chat), Some(synth)) => Some(ConversationManager::new(
                chat,
                synth,
                self.config.conversation.clone(),
            )),
            (chat, synth) => {
                tracing::warn!(
                    chat = chat.is_some(),
                    tts = synth.is_some(),
                    "running in setup mode - conversation unavailable until providers are configured"
                );
                None
            }
        };

        if stt.is_none() {
            tracing::info!("no STT provider configured - audio ingest disabled");
        }

        let state = Arc::new(ApiState::new(manager.clone(), stt));
        let cors = self.config.api_server.cors_permissive;
        let port = self.port;

        let api_task = tokio::spawn(api::serve(state, port, cors));

        tracing::info!(port, "daemon running");

        tokio::select! {
            result = api_task => {
                result.map_err(|e| crate::Error::Session(format!("API server task failed: {e}")))??;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
            }
        }

        if let Some(manager) = manager {
            manager.stop();
        }

        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Build the chat responder from configured keys
///
/// Preference order: custom endpoint, `OpenAI`, `OpenRouter`.
#[must_use]
pub fn init_chat(config: &Config) -> Option<Arc<ChatClient>> {
    let model = config.llm_model.clone();
    let prompt = config.system_prompt.clone();

    let client = if let Some(base_url) = &config.chat_base_url {
        let key = config
            .api_keys
            .openai
            .clone()
            .or_else(|| config.api_keys.openrouter.clone())?;
        ChatClient::new(key, base_url.clone(), model, prompt)
    } else if let Some(key) = config.api_keys.openai.clone() {
        ChatClient::new_openai(key, model, prompt)
    } else if let Some(key) = config.api_keys.openrouter.clone() {
        ChatClient::new_openrouter(key, model, prompt)
    } else {
        return None;
    };

    match client {
        Ok(client) => {
            tracing::info!(model = %config.llm_model, "chat client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize chat client");
            None
        }
    }
}

/// Build the speech synthesizer from configured keys
#[must_use]
pub fn init_tts(config: &Config) -> Option<Arc<TextToSpeech>> {
    let voice = &config.voice;

    let synth = if voice.tts_provider == "elevenlabs" {
        let key = config.api_keys.elevenlabs.clone()?;
        TextToSpeech::new_elevenlabs(key, voice.tts_model.clone(), voice.tts_voice.clone())
    } else {
        let key = config.api_keys.openai.clone()?;
        TextToSpeech::new_openai(
            key,
            voice.tts_model.clone(),
            voice.tts_voice.clone(),
            voice.tts_speed,
        )
    };

    match synth {
        Ok(synth) => {
            tracing::info!(
                provider = %voice.tts_provider,
                model = %voice.tts_model,
                voice = %voice.tts_voice,
                "TTS client initialized"
            );
            Some(Arc::new(synth))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize TTS client");
            None
        }
    }
}

/// Build the batch transcriber from configured keys
#[must_use]
pub fn init_stt(config: &Config) -> Option<Arc<SpeechToText>> {
    let voice = &config.voice;

    let stt = if voice.stt_provider == "deepgram" {
        let key = config.api_keys.deepgram.clone()?;
        SpeechToText::new_deepgram(key, voice.stt_model.clone())
    } else {
        let key = config.api_keys.openai.clone()?;
        SpeechToText::new_whisper(key, voice.stt_model.clone())
    };

    match stt {
        Ok(stt) => {
            tracing::info!(
                provider = %voice.stt_provider,
                model = %voice.stt_model,
                "STT client initialized"
            );
            Some(Arc::new(stt))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize STT client");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeys, ApiServerConfig, VoiceConfig};
    use crate::conversation::ConversationConfig;

    fn config_with_keys(keys: ApiKeys) -> Config {
        Config {
            data_dir: std::path::PathBuf::from("."),
            api_server: ApiServerConfig {
                port: 0,
                cors_permissive: false,
            },
            voice: VoiceConfig::default(),
            conversation: ConversationConfig::default(),
            api_keys: keys,
            llm_model: "gpt-4o-mini".to_string(),
            chat_base_url: None,
            system_prompt: None,
        }
    }

    #[test]
    fn no_keys_means_setup_mode() {
        let config = config_with_keys(ApiKeys::default());
        assert!(init_chat(&config).is_none());
        assert!(init_tts(&config).is_none());
        assert!(init_stt(&config).is_none());
    }

    #[test]
    fn openai_key_enables_all_collaborators() {
        let config = config_with_keys(ApiKeys {
            openai: Some("test-key".to_string()),
            ..ApiKeys::default()
        });
        assert!(init_chat(&config).is_some());
        assert!(init_tts(&config).is_some());
        assert!(init_stt(&config).is_some());
    }

    #[test]
    fn openrouter_key_enables_chat_only() {
        let config = config_with_keys(ApiKeys {
            openrouter: Some("test-key".to_string()),
            ..ApiKeys::default()
        });
        assert!(init_chat(&config).is_some());
        assert!(init_tts(&config).is_none());
        assert!(init_stt(&config).is_none());
    }

    #[test]
    fn deepgram_provider_requires_deepgram_key() {
        let mut config = config_with_keys(ApiKeys {
            openai: Some("test-key".to_string()),
            ..ApiKeys::default()
        });
        config.voice.stt_provider = "deepgram".to_string();
        assert!(init_stt(&config).is_none());

        config.api_keys.deepgram = Some("dg-key".to_string());
        assert!(init_stt(&config).is_some());
    }
}
