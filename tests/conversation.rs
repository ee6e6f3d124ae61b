//! Conversation orchestration integration tests
//!
//! Drives the turn state machine with mock collaborators and a paused tokio
//! clock, so the 7s collection window and the grace wait cost nothing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use talkie_gateway::conversation::{
    ChatResponder, ConversationConfig, ConversationEvent, ConversationManager, ConversationMode,
    RecordingStart, SpeechSynthesizer, StartOptions, TurnState,
};
use talkie_gateway::voice::TranscriptFeed;
use talkie_gateway::{Error, Result};

/// Mock chat responder recording every request
#[derive(Default)]
struct MockChat {
    reply: String,
    fail: bool,
    not_ready: bool,
    delay_ms: u64,
    requests: Mutex<Vec<String>>,
}

impl MockChat {
    fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn not_ready() -> Self {
        Self {
            not_ready: true,
            ..Self::default()
        }
    }

    fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatResponder for MockChat {
    fn is_ready(&self) -> bool {
        !self.not_ready
    }

    fn begin_session(&self, _system_prompt: Option<&str>, _model_id: Option<&str>) {}

    async fn send_message(&self, user_text: &str) -> Result<String> {
        self.requests.lock().unwrap().push(user_text.to_string());
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail {
            return Err(Error::Chat("mock chat failure".to_string()));
        }
        Ok(self.reply.clone())
    }
}

/// Mock synthesizer recording every synthesized text
#[derive(Default)]
struct MockSynth {
    audio: Vec<u8>,
    fail: bool,
    delay_ms: u64,
    calls: Mutex<Vec<String>>,
}

impl MockSynth {
    fn returning(audio: Vec<u8>) -> Self {
        Self {
            audio,
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynth {
    fn is_ready(&self) -> bool {
        true
    }

    fn begin_session(&self, _voice_id: Option<&str>) {}

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail {
            return Err(Error::Tts("mock synthesis failure".to_string()));
        }
        Ok(self.audio.clone())
    }
}

/// Running session plus handles to everything the tests poke at
struct Harness {
    manager: ConversationManager,
    chat: Arc<MockChat>,
    synth: Arc<MockSynth>,
    feed: TranscriptFeed,
    events: broadcast::Receiver<ConversationEvent>,
}

impl Harness {
    fn start(mode: ConversationMode, chat: MockChat, synth: MockSynth) -> Self {
        let chat = Arc::new(chat);
        let synth = Arc::new(synth);
        let manager = ConversationManager::new(
            Arc::clone(&chat) as Arc<dyn ChatResponder>,
            Arc::clone(&synth) as Arc<dyn SpeechSynthesizer>,
            ConversationConfig::default(),
        );

        let (feed, rx) = TranscriptFeed::channel();
        manager
            .start(
                StartOptions {
                    mode,
                    ..StartOptions::default()
                },
                rx,
            )
            .expect("start failed");
        let events = manager.subscribe();

        Self {
            manager,
            chat,
            synth,
            feed,
            events,
        }
    }

    async fn next_event(&mut self) -> ConversationEvent {
        tokio::time::timeout(Duration::from_secs(300), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn expect_event(&mut self, expected: ConversationEvent) {
        let event = self.next_event().await;
        assert_eq!(event, expected);
    }

    async fn expect_state(&mut self, state: TurnState) {
        self.expect_event(ConversationEvent::StateChanged(state)).await;
    }

    /// Assert that no event is pending after letting timers run dry
    async fn expect_quiet(&mut self) {
        tokio::time::sleep(Duration::from_secs(120)).await;
        match self.events.try_recv() {
            Err(broadcast::error::TryRecvError::Empty) => {}
            other => panic!("expected no pending events, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn single_turn_happy_path_event_order() {
    let mut h = Harness::start(
        ConversationMode::SingleTurn,
        MockChat::replying("hi there"),
        MockSynth::returning(vec![0x01, 0x02]),
    );

    assert_eq!(h.manager.start_recording(), RecordingStart::Accepted);
    h.expect_state(TurnState::Listening).await;

    h.feed.transcribed("hello").await.unwrap();

    h.expect_state(TurnState::Transcribing).await;
    h.expect_state(TurnState::Responding).await;
    h.expect_event(ConversationEvent::UserSpoke("hello".to_string())).await;
    h.expect_state(TurnState::Synthesizing).await;
    h.expect_event(ConversationEvent::AiResponse("hi there".to_string())).await;
    h.expect_state(TurnState::Speaking).await;
    h.expect_event(ConversationEvent::AiAudio(vec![0x01, 0x02])).await;
    h.expect_state(TurnState::Idle).await;
    h.expect_event(ConversationEvent::TurnComplete).await;

    // single-turn mode stops the session after the completed turn
    h.expect_event(ConversationEvent::Stopped).await;
    assert!(!h.manager.status().is_active);

    assert_eq!(h.chat.requests(), vec!["hello"]);
    assert_eq!(h.synth.calls(), vec!["hi there"]);
}

#[tokio::test(start_paused = true)]
async fn empty_window_reports_no_speech_and_skips_chat() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("unused"),
        MockSynth::returning(vec![0xff]),
    );

    assert_eq!(h.manager.start_recording(), RecordingStart::Accepted);
    h.expect_state(TurnState::Listening).await;
    h.expect_state(TurnState::Transcribing).await;
    h.expect_state(TurnState::Idle).await;
    h.expect_event(ConversationEvent::NoSpeechDetected).await;

    assert!(h.chat.requests().is_empty());
    assert!(h.manager.status().is_active);
}

#[tokio::test(start_paused = true)]
async fn last_fragment_wins_over_earlier_ones() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("done"),
        MockSynth::returning(vec![0x00]),
    );

    h.manager.start_recording();
    h.feed.transcribed("turn the").await.unwrap();
    h.feed.transcribed("turn the lights on").await.unwrap();

    loop {
        if let ConversationEvent::UserSpoke(text) = h.next_event().await {
            assert_eq!(text, "turn the lights on");
            break;
        }
    }

    assert_eq!(h.chat.requests(), vec!["turn the lights on"]);
}

#[tokio::test(start_paused = true)]
async fn redundant_recording_triggers_are_rejected() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("reply").with_delay(5000),
        MockSynth::returning(vec![0x01]),
    );

    // while collecting
    assert_eq!(h.manager.start_recording(), RecordingStart::Accepted);
    assert_eq!(h.manager.start_recording(), RecordingStart::Rejected);

    h.feed.transcribed("hello there").await.unwrap();
    h.expect_state(TurnState::Listening).await;
    h.expect_state(TurnState::Transcribing).await;
    h.expect_state(TurnState::Responding).await;

    // while the turn pipeline is mid-flight
    assert_eq!(h.manager.start_recording(), RecordingStart::Rejected);

    loop {
        if h.next_event().await == ConversationEvent::TurnComplete {
            break;
        }
    }

    // idle again: next trigger is accepted
    assert_eq!(h.manager.start_recording(), RecordingStart::Accepted);
    assert_eq!(h.chat.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fragments_outside_a_window_are_ignored() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("unused"),
        MockSynth::returning(vec![0x01]),
    );

    // no window open: the fragment must not leak into the next turn
    h.feed.transcribed("stale fragment").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        h.events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    h.manager.start_recording();
    h.expect_state(TurnState::Listening).await;
    h.expect_state(TurnState::Transcribing).await;
    h.expect_state(TurnState::Idle).await;
    h.expect_event(ConversationEvent::NoSpeechDetected).await;

    assert!(h.chat.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn short_fragments_are_filtered_as_noise() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("unused"),
        MockSynth::returning(vec![0x01]),
    );

    h.manager.start_recording();
    h.feed.transcribed("hm").await.unwrap();
    h.feed.transcribed("  a  ").await.unwrap();

    h.expect_state(TurnState::Listening).await;
    h.expect_state(TurnState::Transcribing).await;
    h.expect_state(TurnState::Idle).await;
    h.expect_event(ConversationEvent::NoSpeechDetected).await;

    assert!(h.chat.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn chat_failure_unwinds_and_recording_recovers() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::failing(),
        MockSynth::returning(vec![0x01]),
    );

    h.manager.start_recording();
    h.feed.transcribed("hello").await.unwrap();

    h.expect_state(TurnState::Listening).await;
    h.expect_state(TurnState::Transcribing).await;
    h.expect_state(TurnState::Responding).await;
    h.expect_event(ConversationEvent::UserSpoke("hello".to_string())).await;

    match h.next_event().await {
        ConversationEvent::Error(message) => assert!(message.contains("mock chat failure")),
        other => panic!("expected error event, got {other:?}"),
    }
    h.expect_state(TurnState::Idle).await;

    // synthesis never ran, and a new turn can start immediately
    assert!(h.synth.calls().is_empty());
    assert_eq!(h.manager.start_recording(), RecordingStart::Accepted);
}

#[tokio::test(start_paused = true)]
async fn synthesis_failure_unwinds_to_idle() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("say this"),
        MockSynth::failing(),
    );

    h.manager.start_recording();
    h.feed.transcribed("hello").await.unwrap();

    h.expect_state(TurnState::Listening).await;
    h.expect_state(TurnState::Transcribing).await;
    h.expect_state(TurnState::Responding).await;
    h.expect_event(ConversationEvent::UserSpoke("hello".to_string())).await;
    h.expect_state(TurnState::Synthesizing).await;
    h.expect_event(ConversationEvent::AiResponse("say this".to_string())).await;

    match h.next_event().await {
        ConversationEvent::Error(message) => assert!(message.contains("mock synthesis failure")),
        other => panic!("expected error event, got {other:?}"),
    }
    h.expect_state(TurnState::Idle).await;
    assert!(!h.manager.status().processing_response);
}

#[tokio::test(start_paused = true)]
async fn stop_during_synthesis_discards_the_turn() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("long reply"),
        MockSynth::returning(vec![0x0a]).with_delay(60_000),
    );

    h.manager.start_recording();
    h.feed.transcribed("hello").await.unwrap();

    h.expect_state(TurnState::Listening).await;
    h.expect_state(TurnState::Transcribing).await;
    h.expect_state(TurnState::Responding).await;
    h.expect_event(ConversationEvent::UserSpoke("hello".to_string())).await;
    h.expect_state(TurnState::Synthesizing).await;
    h.expect_event(ConversationEvent::AiResponse("long reply".to_string())).await;

    // stop while the synthesizer call is in flight
    assert!(h.manager.stop());
    h.expect_state(TurnState::Idle).await;
    h.expect_event(ConversationEvent::Stopped).await;

    // even after the mock's delay would have elapsed, no audio surfaces
    h.expect_quiet().await;
    assert!(!h.manager.status().is_active);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("reply"),
        MockSynth::returning(vec![0x01]),
    );

    assert!(h.manager.stop());
    h.expect_event(ConversationEvent::Stopped).await;

    assert!(!h.manager.stop());
    h.expect_quiet().await;
}

#[tokio::test(start_paused = true)]
async fn transcript_error_mid_window_resets_to_idle() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("unused"),
        MockSynth::returning(vec![0x01]),
    );

    h.manager.start_recording();
    h.expect_state(TurnState::Listening).await;

    h.feed.error("recognizer connection lost").await.unwrap();

    match h.next_event().await {
        ConversationEvent::Error(message) => {
            assert!(message.contains("recognizer connection lost"));
        }
        other => panic!("expected error event, got {other:?}"),
    }
    h.expect_state(TurnState::Idle).await;

    // the aborted window never produces a no-speech signal
    h.expect_quiet().await;
    assert_eq!(h.manager.start_recording(), RecordingStart::Accepted);
}

#[tokio::test(start_paused = true)]
async fn transcript_error_while_idle_keeps_state() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("unused"),
        MockSynth::returning(vec![0x01]),
    );

    h.feed.error("recognizer hiccup").await.unwrap();

    match h.next_event().await {
        ConversationEvent::Error(message) => assert!(message.contains("recognizer hiccup")),
        other => panic!("expected error event, got {other:?}"),
    }

    let status = h.manager.status();
    assert!(status.is_active);
    assert_eq!(status.state, TurnState::Idle);
}

#[tokio::test(start_paused = true)]
async fn start_fails_while_active_and_after_stop_succeeds() {
    let h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("reply"),
        MockSynth::returning(vec![0x01]),
    );

    let (_feed, rx) = TranscriptFeed::channel();
    assert!(h.manager.start(StartOptions::default(), rx).is_err());

    h.manager.stop();

    let (_feed, rx) = TranscriptFeed::channel();
    tokio_test::assert_ok!(h.manager.start(StartOptions::default(), rx));
}

#[tokio::test(start_paused = true)]
async fn start_fails_when_chat_responder_not_ready() {
    let chat = Arc::new(MockChat::not_ready());
    let synth = Arc::new(MockSynth::returning(vec![0x01]));
    let manager = ConversationManager::new(
        chat as Arc<dyn ChatResponder>,
        synth as Arc<dyn SpeechSynthesizer>,
        ConversationConfig::default(),
    );

    let (_feed, rx) = TranscriptFeed::channel();
    let err = manager.start(StartOptions::default(), rx).unwrap_err();
    assert!(err.to_string().contains("not ready"));
    assert!(!manager.status().is_active);
}

#[tokio::test(start_paused = true)]
async fn trailing_fragment_within_grace_window_is_used() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("caught it"),
        MockSynth::returning(vec![0x01]),
    );

    h.manager.start_recording();
    h.expect_state(TurnState::Listening).await;
    h.expect_state(TurnState::Transcribing).await;

    // window already expired; the recognizer delivers late
    h.feed.transcribed("late but present").await.unwrap();

    h.expect_state(TurnState::Responding).await;
    h.expect_event(ConversationEvent::UserSpoke("late but present".to_string())).await;
    assert_eq!(h.chat.requests(), vec!["late but present"]);
}

#[tokio::test(start_paused = true)]
async fn status_tracks_the_turn_lifecycle() {
    let mut h = Harness::start(
        ConversationMode::Continuous,
        MockChat::replying("reply").with_delay(2000),
        MockSynth::returning(vec![0x01]),
    );

    let status = h.manager.status();
    assert!(status.is_active);
    assert_eq!(status.state, TurnState::Idle);
    assert_eq!(status.mode, ConversationMode::Continuous);

    h.manager.start_recording();
    assert_eq!(h.manager.status().state, TurnState::Listening);

    h.feed.transcribed("hello").await.unwrap();
    h.expect_state(TurnState::Listening).await;
    h.expect_state(TurnState::Transcribing).await;
    h.expect_state(TurnState::Responding).await;
    assert!(h.manager.status().processing_response);

    loop {
        if h.next_event().await == ConversationEvent::TurnComplete {
            break;
        }
    }
    let status = h.manager.status();
    assert!(!status.processing_response);
    assert_eq!(status.state, TurnState::Idle);
}
