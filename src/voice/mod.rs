//! Voice processing module
//!
//! Vendor clients for transcription and synthesis, plus the transcript-source
//! event contract the orchestrator consumes. The microphone and the speakers
//! live in the front-end; this module only moves text and encoded audio.

mod stt;
pub mod transcript;
mod tts;

pub use stt::SpeechToText;
pub use transcript::{TranscriptEvent, TranscriptFeed};
pub use tts::TextToSpeech;
