//! Transcript source event contract
//!
//! The streaming speech recognizer is owned by the front-end (directly, or via
//! the `/api/transcript` ingest routes). The gateway never drives it, it only
//! consumes the recognizer's event stream through the channel created here.

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Transcript channel capacity
const CHANNEL_CAPACITY: usize = 64;

/// Event emitted by a streaming speech-recognition session
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// Voice activity detected
    SpeechStarted,
    /// Voice activity ended
    SpeechStopped,
    /// A transcript fragment was recognized
    Transcription { text: String },
    /// The recognition session reported a failure
    Error { message: String },
}

/// Producer handle for feeding recognizer events into an active conversation
///
/// Cheap to clone; the receiver half is bound by
/// [`ConversationManager::start`](crate::conversation::ConversationManager::start)
/// and dropped on stop, at which point sends fail and the feed should be
/// discarded.
#[derive(Debug, Clone)]
pub struct TranscriptFeed {
    tx: mpsc::Sender<TranscriptEvent>,
}

impl TranscriptFeed {
    /// Create a feed and the receiver half to hand to the orchestrator
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<TranscriptEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Forward a recognizer event
    ///
    /// # Errors
    ///
    /// Returns error if the conversation side has been stopped (receiver dropped)
    pub async fn send(&self, event: TranscriptEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::Transcript("transcript channel closed".to_string()))
    }

    /// Forward a recognized transcript fragment
    ///
    /// # Errors
    ///
    /// Returns error if the conversation side has been stopped
    pub async fn transcribed(&self, text: impl Into<String>) -> Result<()> {
        self.send(TranscriptEvent::Transcription { text: text.into() })
            .await
    }

    /// Forward a recognizer failure
    ///
    /// # Errors
    ///
    /// Returns error if the conversation side has been stopped
    pub async fn error(&self, message: impl Into<String>) -> Result<()> {
        self.send(TranscriptEvent::Error {
            message: message.into(),
        })
        .await
    }

    /// Whether the conversation side has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcription_event_deserializes() {
        let json = r#"{"type":"transcription","text":"turn the lights on"}"#;
        let event: TranscriptEvent = serde_json::from_str(json).unwrap();
        match event {
            TranscriptEvent::Transcription { text } => assert_eq!(text, "turn the lights on"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn marker_events_deserialize() {
        let started: TranscriptEvent = serde_json::from_str(r#"{"type":"speech_started"}"#).unwrap();
        assert!(matches!(started, TranscriptEvent::SpeechStarted));

        let stopped: TranscriptEvent = serde_json::from_str(r#"{"type":"speech_stopped"}"#).unwrap();
        assert!(matches!(stopped, TranscriptEvent::SpeechStopped));
    }

    #[tokio::test]
    async fn feed_delivers_to_receiver() {
        let (feed, mut rx) = TranscriptFeed::channel();
        feed.transcribed("hello").await.unwrap();

        match rx.recv().await {
            Some(TranscriptEvent::Transcription { text }) => assert_eq!(text, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn feed_errors_after_receiver_dropped() {
        let (feed, rx) = TranscriptFeed::channel();
        drop(rx);

        assert!(feed.is_closed());
        assert!(feed.transcribed("late").await.is_err());
    }
}
