//! Configuration management for the Talkie gateway
//!
//! Environment variables take precedence; an optional `talkie.toml` in the
//! XDG config directory supplies the `[conversation]` and `[voice]` sections
//! plus chat defaults.

use std::path::PathBuf;

use crate::conversation::ConversationConfig;
use crate::Result;

/// Default HTTP API port
const DEFAULT_API_PORT: u16 = 18790;

/// Default chat model
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Talkie gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (logs, caches)
    pub data_dir: PathBuf,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Voice provider configuration
    pub voice: VoiceConfig,

    /// Turn state machine timing and filtering
    pub conversation: ConversationConfig,

    /// API keys for external services
    pub api_keys: ApiKeys,

    /// Chat model identifier
    pub llm_model: String,

    /// Custom OpenAI-compatible chat endpoint (overrides provider selection)
    pub chat_base_url: Option<String>,

    /// Default system prompt for the assistant
    pub system_prompt: Option<String>,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Allow any origin (desktop front-ends served from file:// need this)
    pub cors_permissive: bool,
}

/// Voice provider configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT backend: "whisper" or "deepgram"
    pub stt_provider: String,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// TTS backend: "openai" or "elevenlabs"
    pub tts_provider: String,

    /// TTS model (e.g. "tts-1", "eleven_monolingual_v1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (OpenAI only)
    pub tts_speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_provider: "whisper".to_string(),
            stt_model: "whisper-1".to_string(),
            tts_provider: "openai".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat, Whisper, TTS)
    pub openai: Option<String>,

    /// `OpenRouter` API key (chat via any routed model)
    pub openrouter: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,
}

/// Optional file-based configuration (`talkie.toml`)
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
struct FileConfig {
    conversation: ConversationConfig,
    voice: VoiceOverrides,
    llm_model: Option<String>,
    system_prompt: Option<String>,
}

/// `[voice]` section of `talkie.toml`
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
struct VoiceOverrides {
    stt_provider: Option<String>,
    stt_model: Option<String>,
    tts_provider: Option<String>,
    tts_model: Option<String>,
    tts_voice: Option<String>,
    tts_speed: Option<f32>,
}

/// Return the XDG config file path (`~/.config/talkie/talkie.toml` on Linux)
#[must_use]
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = std::env::var("TALKIE_CONFIG") {
        return PathBuf::from(path);
    }

    directories::ProjectDirs::from("dev", "talkie", "talkie").map_or_else(
        || PathBuf::from("talkie.toml"),
        |d| d.config_dir().join("talkie.toml"),
    )
}

impl Config {
    /// Load configuration from the environment and the optional config file
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn load() -> Result<Self> {
        let file = load_file_config(&config_file_path());

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok(),
            openrouter: std::env::var("OPENROUTER_API_KEY").ok(),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY").ok(),
            deepgram: std::env::var("DEEPGRAM_API_KEY").ok(),
        };

        let api_server = ApiServerConfig {
            port: std::env::var("TALKIE_API_PORT")
                .or_else(|_| std::env::var("PORT"))
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_API_PORT),
            cors_permissive: std::env::var("TALKIE_CORS_PERMISSIVE")
                .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        };

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_provider: std::env::var("TALKIE_STT_PROVIDER")
                .ok()
                .or(file.voice.stt_provider)
                .unwrap_or(defaults.stt_provider),
            stt_model: std::env::var("TALKIE_STT_MODEL")
                .ok()
                .or(file.voice.stt_model)
                .unwrap_or(defaults.stt_model),
            tts_provider: std::env::var("TALKIE_TTS_PROVIDER")
                .ok()
                .or(file.voice.tts_provider)
                .unwrap_or(defaults.tts_provider),
            tts_model: std::env::var("TALKIE_TTS_MODEL")
                .ok()
                .or(file.voice.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: std::env::var("TALKIE_TTS_VOICE")
                .ok()
                .or(file.voice.tts_voice)
                .unwrap_or(defaults.tts_voice),
            tts_speed: std::env::var("TALKIE_TTS_SPEED")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(file.voice.tts_speed)
                .unwrap_or(defaults.tts_speed),
        };

        let llm_model = std::env::var("TALKIE_LLM_MODEL")
            .ok()
            .or(file.llm_model)
            .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string());

        let chat_base_url = std::env::var("TALKIE_CHAT_BASE_URL").ok();

        let system_prompt = std::env::var("TALKIE_SYSTEM_PROMPT")
            .ok()
            .or(file.system_prompt);

        // ~/.local/share/talkie on Linux
        let data_dir = directories::ProjectDirs::from("dev", "talkie", "talkie")
            .map_or_else(|| PathBuf::from("."), |d| d.data_dir().to_path_buf());
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            api_server,
            voice,
            conversation: file.conversation,
            api_keys,
            llm_model,
            chat_base_url,
            system_prompt,
        })
    }
}

/// Load the optional config file; malformed files log a warning and fall back
fn load_file_config(path: &std::path::Path) -> FileConfig {
    if !path.exists() {
        return FileConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                FileConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FileConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_defaults() {
        let voice = VoiceConfig::default();
        assert_eq!(voice.stt_provider, "whisper");
        assert_eq!(voice.tts_provider, "openai");
        assert_eq!(voice.tts_voice, "alloy");
        assert!((voice.tts_speed - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn file_config_parses_sections() {
        let toml = r#"
            llm_model = "gpt-4o"

            [conversation]
            collection_window_ms = 5000
            min_fragment_chars = 2

            [voice]
            tts_voice = "nova"
        "#;

        let config: FileConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.llm_model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.conversation.collection_window_ms, 5000);
        assert_eq!(config.conversation.min_fragment_chars, 2);
        // unspecified fields keep their defaults
        assert_eq!(config.conversation.transcript_grace_ms, 3000);
        assert_eq!(config.voice.tts_voice.as_deref(), Some("nova"));
        assert!(config.voice.stt_model.is_none());
    }

    #[test]
    fn empty_file_config_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.conversation.collection_window_ms, 7000);
        assert!(config.llm_model.is_none());
    }
}
