//! Conversation turn orchestration
//!
//! Coordinates one push-to-talk exchange across the three collaborators:
//!
//! 1. **Listen**: open a fixed-length collection window and accumulate
//!    transcript fragments from the recognizer (last fragment wins).
//! 2. **Transcribe**: after the window closes, poll briefly for a trailing
//!    fragment to absorb recognizer latency.
//! 3. **Respond**: send the transcript to the chat responder.
//! 4. **Synthesize**: convert the reply to speech.
//! 5. **Speak**: emit the audio for playback and wait out an estimated
//!    playback duration.
//!
//! At most one turn pipeline runs at a time; every failure path returns the
//! session to idle. Each turn is tagged with the session epoch, checked before
//! any late-arriving callback may touch state, which is what makes [`stop`]
//! safe against in-flight collaborator calls.
//!
//! [`stop`]: ConversationManager::stop

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::voice::TranscriptEvent;
use crate::{Error, Result};

/// Outward event buffer size
const EVENT_CAPACITY: usize = 64;

/// Turn state of the active conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Waiting for a recording trigger
    Idle,
    /// Collection window open, accepting transcript fragments
    Listening,
    /// Window closed, waiting for a trailing fragment
    Transcribing,
    /// Chat completion in flight
    Responding,
    /// Speech synthesis in flight
    Synthesizing,
    /// Audio emitted, waiting out estimated playback
    Speaking,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Responding => "responding",
            Self::Synthesizing => "synthesizing",
            Self::Speaking => "speaking",
        };
        write!(f, "{s}")
    }
}

/// Session mode, chosen at start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    /// Stay active across turns; each turn is triggered manually
    #[default]
    Continuous,
    /// Stop the session after one completed turn
    SingleTurn,
}

/// Options for starting a conversation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    /// Session mode
    pub mode: ConversationMode,
    /// System prompt override for the chat responder
    pub system_prompt: Option<String>,
    /// Voice override for the synthesizer
    pub voice_id: Option<String>,
    /// Model override for the chat responder
    pub model_id: Option<String>,
}

/// Snapshot of the session for the UI boundary
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStatus {
    /// True between start and stop
    pub is_active: bool,
    /// Identifier of the active session, if any
    pub session_id: Option<Uuid>,
    /// Current turn state
    pub state: TurnState,
    /// Session mode
    pub mode: ConversationMode,
    /// True while a turn pipeline is in flight
    pub processing_response: bool,
}

/// Outcome of a recording trigger
///
/// Rejection is a benign signal, not an error: a redundant trigger from the
/// UI while a window or turn is in flight is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStart {
    /// A collection window was opened
    Accepted,
    /// Busy or inactive; nothing happened
    Rejected,
}

impl RecordingStart {
    /// Whether a window was opened
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Events emitted at the UI boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// Turn state transition
    StateChanged(TurnState),
    /// Transcript handed to the chat responder
    UserSpoke(String),
    /// Assistant reply text
    AiResponse(String),
    /// Synthesized reply audio, ready for playback
    AiAudio(Vec<u8>),
    /// Collection window closed with no usable transcript
    NoSpeechDetected,
    /// Full turn pipeline completed
    TurnComplete,
    /// A turn or the transcript source failed
    Error(String),
    /// Session ended
    Stopped,
}

/// Timing and filtering knobs for the turn state machine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Length of each manual recording window in milliseconds
    pub collection_window_ms: u64,

    /// Maximum wait for a trailing transcript fragment after window close
    pub transcript_grace_ms: u64,

    /// Poll increment during the grace wait
    pub transcript_poll_ms: u64,

    /// Fragments shorter than this (trimmed) are recognizer noise
    pub min_fragment_chars: usize,

    /// Speaking-rate constant for estimating playback duration
    pub playback_words_per_sec: f64,

    /// Fixed padding added to the playback estimate
    pub playback_padding_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            collection_window_ms: 7000,
            transcript_grace_ms: 3000,
            transcript_poll_ms: 100,
            min_fragment_chars: 3,
            playback_words_per_sec: 2.5,
            playback_padding_ms: 500,
        }
    }
}

/// Produces one assistant reply per user utterance
#[async_trait]
pub trait ChatResponder: Send + Sync {
    /// Whether the responder can accept a session
    fn is_ready(&self) -> bool;

    /// Reset conversation history for a fresh session
    fn begin_session(&self, system_prompt: Option<&str>, model_id: Option<&str>);

    /// Send one user utterance and return the assistant reply
    ///
    /// # Errors
    ///
    /// Returns error on any chat completion fault; the orchestrator treats
    /// all faults uniformly as turn failure and never retries
    async fn send_message(&self, user_text: &str) -> Result<String>;
}

/// Converts reply text into encoded audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Whether the synthesizer can accept a session
    fn is_ready(&self) -> bool;

    /// Apply a per-session voice selection
    fn begin_session(&self, voice_id: Option<&str>);

    /// Synthesize speech for the given text
    ///
    /// # Errors
    ///
    /// Returns error on any synthesis fault
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Per-session state, guarded by the orchestrator's mutex
///
/// All transitions happen under the lock with no await in between, so event
/// arrival order is transition order.
struct Session {
    active: bool,
    session_id: Option<Uuid>,
    state: TurnState,
    mode: ConversationMode,
    /// Most recent fragment seen during the open window; overwritten, never appended
    pending_transcript: String,
    is_collecting: bool,
    is_processing_turn: bool,
    /// Bumped on every start and stop; tasks carry the value they were spawned
    /// under and go inert once it goes stale
    epoch: u64,
    window_started: Option<Instant>,
    /// The single outstanding collection-window/turn task
    window_task: Option<JoinHandle<()>>,
    listener_task: Option<JoinHandle<()>>,
}

impl Session {
    const fn new() -> Self {
        Self {
            active: false,
            session_id: None,
            state: TurnState::Idle,
            mode: ConversationMode::Continuous,
            pending_transcript: String::new(),
            is_collecting: false,
            is_processing_turn: false,
            epoch: 0,
            window_started: None,
            window_task: None,
            listener_task: None,
        }
    }
}

/// The conversation turn orchestrator
///
/// Owns the single process-wide session and drives the chat responder and
/// speech synthesizer in sequence for each turn. Cheap to clone; all clones
/// share the same session.
#[derive(Clone)]
pub struct ConversationManager {
    inner: Arc<Inner>,
}

struct Inner {
    chat: Arc<dyn ChatResponder>,
    synth: Arc<dyn SpeechSynthesizer>,
    config: ConversationConfig,
    session: Mutex<Session>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationManager {
    /// Create a manager over the given collaborators
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatResponder>,
        synth: Arc<dyn SpeechSynthesizer>,
        config: ConversationConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                chat,
                synth,
                config,
                session: Mutex::new(Session::new()),
                events,
            }),
        }
    }

    /// Subscribe to the outward event stream
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot the session for the UI boundary
    #[must_use]
    pub fn status(&self) -> ConversationStatus {
        let sess = self.inner.lock();
        ConversationStatus {
            is_active: sess.active,
            session_id: sess.session_id,
            state: sess.state,
            mode: sess.mode,
            processing_response: sess.is_processing_turn,
        }
    }

    /// Start a conversation bound to the given transcript stream
    ///
    /// # Errors
    ///
    /// Returns error if a conversation is already active or a collaborator
    /// reports not-ready
    pub fn start(
        &self,
        options: StartOptions,
        transcript_rx: mpsc::Receiver<TranscriptEvent>,
    ) -> Result<()> {
        if !self.inner.chat.is_ready() {
            return Err(Error::Session("chat responder is not ready".to_string()));
        }
        if !self.inner.synth.is_ready() {
            return Err(Error::Session(
                "speech synthesizer is not ready".to_string(),
            ));
        }

        let mut sess = self.inner.lock();
        if sess.active {
            return Err(Error::Session("conversation already active".to_string()));
        }

        self.inner
            .chat
            .begin_session(options.system_prompt.as_deref(), options.model_id.as_deref());
        self.inner.synth.begin_session(options.voice_id.as_deref());

        let session_id = Uuid::new_v4();
        sess.active = true;
        sess.session_id = Some(session_id);
        sess.mode = options.mode;
        sess.state = TurnState::Idle;
        sess.pending_transcript.clear();
        sess.is_collecting = false;
        sess.is_processing_turn = false;
        sess.window_started = None;
        sess.epoch += 1;

        let epoch = sess.epoch;
        let inner = Arc::clone(&self.inner);
        sess.listener_task = Some(tokio::spawn(async move {
            inner.listen_transcripts(epoch, transcript_rx).await;
        }));

        tracing::info!(session_id = %session_id, mode = ?options.mode, "conversation started");
        Ok(())
    }

    /// Stop the conversation, cancelling any in-flight window or turn
    ///
    /// Idempotent: stopping an inactive session is a no-op. Returns whether a
    /// session was actually stopped.
    #[allow(clippy::must_use_candidate)]
    pub fn stop(&self) -> bool {
        self.inner.stop()
    }

    /// Open a collection window for one turn
    ///
    /// Rejected (not an error) while inactive, while a window is already open,
    /// or while a turn pipeline is in flight.
    pub fn start_recording(&self) -> RecordingStart {
        let mut sess = self.inner.lock();
        if !sess.active || sess.is_collecting || sess.is_processing_turn {
            tracing::debug!(
                active = sess.active,
                collecting = sess.is_collecting,
                processing = sess.is_processing_turn,
                "recording trigger rejected"
            );
            return RecordingStart::Rejected;
        }

        sess.pending_transcript.clear();
        sess.is_collecting = true;
        sess.window_started = Some(Instant::now());
        self.inner.set_state(&mut sess, TurnState::Listening);

        let epoch = sess.epoch;
        let window = Duration::from_millis(self.inner.config.collection_window_ms);
        let inner = Arc::clone(&self.inner);
        sess.window_task = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            inner.run_turn(epoch).await;
        }));

        tracing::info!(
            window_ms = self.inner.config.collection_window_ms,
            "recording window opened"
        );
        RecordingStart::Accepted
    }
}

impl Inner {
    /// Consume recognizer events for the lifetime of one session epoch
    async fn listen_transcripts(&self, epoch: u64, mut rx: mpsc::Receiver<TranscriptEvent>) {
        while let Some(event) = rx.recv().await {
            let current = match event {
                TranscriptEvent::Transcription { text } => self.accept_fragment(epoch, &text),
                TranscriptEvent::Error { message } => self.transcript_failed(epoch, &message),
                TranscriptEvent::SpeechStarted => {
                    tracing::trace!("speech started");
                    true
                }
                TranscriptEvent::SpeechStopped => {
                    tracing::trace!("speech stopped");
                    true
                }
            };
            if !current {
                tracing::debug!("transcript listener superseded");
                return;
            }
        }
        tracing::debug!("transcript stream ended");
    }

    /// Apply fragment filtering; returns false once the epoch is stale
    fn accept_fragment(&self, epoch: u64, text: &str) -> bool {
        let Some(mut sess) = self.guard(epoch) else {
            return false;
        };

        let trimmed = text.trim();
        // The window stays open for fragments through the grace wait: the
        // recognizer often delivers its final transcript after VAD stop.
        let window_open = sess.is_collecting || sess.state == TurnState::Transcribing;
        if sess.is_processing_turn || !window_open {
            tracing::debug!(text = %trimmed, "fragment ignored outside collection window");
            return true;
        }
        if trimmed.chars().count() < self.config.min_fragment_chars {
            tracing::debug!(text = %trimmed, "fragment below minimum length, ignored");
            return true;
        }

        // Last fragment wins: the recognizer re-emits a refined transcript
        // for the same utterance, so overwriting beats concatenation.
        sess.pending_transcript = trimmed.to_string();
        tracing::debug!(text = %trimmed, "transcript fragment accepted");
        true
    }

    /// Handle a recognizer failure; returns false once the epoch is stale
    fn transcript_failed(&self, epoch: u64, message: &str) -> bool {
        let Some(mut sess) = self.guard(epoch) else {
            return false;
        };

        self.emit(ConversationEvent::Error(format!(
            "transcript source: {message}"
        )));

        if sess.is_collecting || sess.is_processing_turn {
            if let Some(task) = sess.window_task.take() {
                task.abort();
            }
            sess.is_collecting = false;
            sess.is_processing_turn = false;
            sess.pending_transcript.clear();
            sess.window_started = None;
            self.set_state(&mut sess, TurnState::Idle);
            tracing::warn!(error = %message, "transcript failure aborted active turn");
        } else {
            tracing::warn!(error = %message, "transcript source error while idle");
        }
        true
    }

    /// Run one turn pipeline, starting at window expiry
    async fn run_turn(&self, epoch: u64) {
        {
            let Some(mut sess) = self.guard(epoch) else {
                return;
            };
            sess.is_collecting = false;
            let open_for = sess.window_started.take().map(|t| t.elapsed());
            self.set_state(&mut sess, TurnState::Transcribing);
            tracing::debug!(?open_for, "collection window closed");
        }

        // Grace wait: the recognizer may still be flushing the fragment for
        // speech that ended just before the window did.
        let poll = Duration::from_millis(self.config.transcript_poll_ms.max(1));
        let grace = Duration::from_millis(self.config.transcript_grace_ms);
        let mut waited = Duration::ZERO;
        let transcript = loop {
            {
                let Some(mut sess) = self.guard(epoch) else {
                    return;
                };
                if !sess.pending_transcript.is_empty() {
                    break Some(std::mem::take(&mut sess.pending_transcript));
                }
            }
            if waited >= grace {
                break None;
            }
            tokio::time::sleep(poll).await;
            waited += poll;
        };

        let Some(transcript) = transcript else {
            let Some(mut sess) = self.guard(epoch) else {
                return;
            };
            self.set_state(&mut sess, TurnState::Idle);
            self.emit(ConversationEvent::NoSpeechDetected);
            tracing::info!("no speech detected in collection window");
            return;
        };

        {
            let Some(mut sess) = self.guard(epoch) else {
                return;
            };
            sess.is_processing_turn = true;
            self.set_state(&mut sess, TurnState::Responding);
            self.emit(ConversationEvent::UserSpoke(transcript.clone()));
        }
        tracing::info!(text = %transcript, "user spoke");

        let reply = match self.chat.send_message(&transcript).await {
            Ok(reply) => reply,
            Err(e) => {
                self.fail_turn(epoch, &e);
                return;
            }
        };

        {
            let Some(mut sess) = self.guard(epoch) else {
                return;
            };
            self.set_state(&mut sess, TurnState::Synthesizing);
            self.emit(ConversationEvent::AiResponse(reply.clone()));
        }
        tracing::info!(chars = reply.len(), "assistant replied");

        let audio = match self.synth.synthesize(&reply).await {
            Ok(audio) => audio,
            Err(e) => {
                self.fail_turn(epoch, &e);
                return;
            }
        };

        {
            let Some(mut sess) = self.guard(epoch) else {
                return;
            };
            self.set_state(&mut sess, TurnState::Speaking);
            self.emit(ConversationEvent::AiAudio(audio));
        }

        // The gateway relays encoded audio without decoding it, so playback
        // completion is estimated from the reply length.
        let playback = self.estimate_playback(&reply);
        tracing::debug!(?playback, "waiting out estimated playback");
        tokio::time::sleep(playback).await;

        let single_turn = {
            let Some(mut sess) = self.guard(epoch) else {
                return;
            };
            sess.is_processing_turn = false;
            sess.pending_transcript.clear();
            self.set_state(&mut sess, TurnState::Idle);
            self.emit(ConversationEvent::TurnComplete);
            tracing::info!("turn complete");
            sess.mode == ConversationMode::SingleTurn
        };

        if single_turn {
            self.stop();
        }
    }

    /// Unwind a failed turn back to idle
    fn fail_turn(&self, epoch: u64, err: &Error) {
        let Some(mut sess) = self.guard(epoch) else {
            tracing::debug!(error = %err, "discarding failure from superseded turn");
            return;
        };

        tracing::warn!(error = %err, state = %sess.state, "turn failed");
        sess.is_processing_turn = false;
        sess.is_collecting = false;
        sess.pending_transcript.clear();
        self.emit(ConversationEvent::Error(err.to_string()));
        self.set_state(&mut sess, TurnState::Idle);
    }

    /// Tear the session down; shared by [`ConversationManager::stop`] and
    /// single-turn completion
    fn stop(&self) -> bool {
        let mut sess = self.lock();
        if !sess.active {
            tracing::debug!("stop ignored, no active conversation");
            return false;
        }

        let session_id = sess.session_id.take();
        sess.active = false;
        // Everything spawned under the old epoch is now inert even if it
        // outlives the aborts below.
        sess.epoch += 1;
        if let Some(task) = sess.window_task.take() {
            task.abort();
        }
        if let Some(task) = sess.listener_task.take() {
            task.abort();
        }
        sess.is_collecting = false;
        sess.is_processing_turn = false;
        sess.pending_transcript.clear();
        sess.window_started = None;
        self.set_state(&mut sess, TurnState::Idle);
        self.emit(ConversationEvent::Stopped);

        tracing::info!(session_id = ?session_id, "conversation stopped");
        true
    }

    /// Estimated playback duration for synthesized speech
    #[allow(clippy::cast_precision_loss)]
    fn estimate_playback(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count();
        let rate = self.config.playback_words_per_sec.max(0.1);
        Duration::from_secs_f64(words as f64 / rate)
            + Duration::from_millis(self.config.playback_padding_ms)
    }

    /// Transition to a new state, emitting `StateChanged` when it changes
    fn set_state(&self, sess: &mut Session, state: TurnState) {
        if sess.state != state {
            tracing::debug!(from = %sess.state, to = %state, "state transition");
            sess.state = state;
            self.emit(ConversationEvent::StateChanged(state));
        }
    }

    /// Publish an event; receivers may come and go
    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Lock the session only if the given epoch is still the live one
    fn guard(&self, epoch: u64) -> Option<MutexGuard<'_, Session>> {
        let sess = self.lock();
        (sess.active && sess.epoch == epoch).then_some(sess)
    }
}
