//! Talkie Gateway - push-to-talk voice conversation gateway for AI assistants
//!
//! This library provides the core functionality for the Talkie gateway:
//! - Conversation turn orchestration (collection windows, single-flight turns)
//! - Vendor clients for chat completion, STT and TTS
//! - The HTTP + WebSocket boundary the desktop front-end talks to
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Desktop front-end (mic + UI)            │
//! │   commands  │  transcript fragments  │  event WS    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Talkie Gateway                       │
//! │   API  │  Turn Orchestrator  │  STT / Chat / TTS    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │        Vendor APIs (Whisper/Deepgram,                │
//! │        OpenAI/OpenRouter chat, OpenAI/ElevenLabs)    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The orchestrator never touches audio hardware: the front-end owns the
//! microphone and the speakers, the gateway owns the turn state machine.

pub mod api;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod error;
pub mod voice;

pub use chat::ChatClient;
pub use config::Config;
pub use conversation::{
    ChatResponder, ConversationConfig, ConversationEvent, ConversationManager, ConversationMode,
    ConversationStatus, RecordingStart, SpeechSynthesizer, StartOptions, TurnState,
};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use voice::{SpeechToText, TextToSpeech, TranscriptEvent, TranscriptFeed};
