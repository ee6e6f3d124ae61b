//! HTTP + WebSocket API - the UI boundary
//!
//! The desktop front-end drives the conversation over plain HTTP commands
//! (start/stop/record/status), feeds recognizer output through the transcript
//! ingest routes, and watches the session over a WebSocket event stream.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::conversation::{ConversationEvent, ConversationManager, StartOptions, TurnState};
use crate::voice::{SpeechToText, TranscriptEvent, TranscriptFeed};
use crate::Result;

/// Shared API state
pub struct ApiState {
    /// The orchestrator; absent while the gateway runs in setup mode
    pub manager: Option<ConversationManager>,

    /// Batch transcriber for the audio ingest route
    pub stt: Option<Arc<SpeechToText>>,

    /// Feed half of the active session's transcript channel
    pub transcript: tokio::sync::Mutex<Option<TranscriptFeed>>,
}

impl ApiState {
    /// Create state over the given collaborators
    #[must_use]
    pub fn new(manager: Option<ConversationManager>, stt: Option<Arc<SpeechToText>>) -> Self {
        Self {
            manager,
            stt,
            transcript: tokio::sync::Mutex::new(None),
        }
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct StartedResponse {
    started: bool,
}

#[derive(Serialize)]
struct StoppedResponse {
    stopped: bool,
}

#[derive(Serialize)]
struct RecordResponse {
    accepted: bool,
}

#[derive(Serialize)]
struct TranscriptAccepted {
    text: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Conversation event as a WebSocket JSON frame
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    StateChanged { state: TurnState },
    UserSpoke { text: String },
    AiResponse { text: String },
    /// Base64-encoded audio payload
    AiAudio { audio: String },
    NoSpeechDetected,
    TurnComplete,
    Error { message: String },
    Stopped,
}

impl From<ConversationEvent> for WsEvent {
    fn from(event: ConversationEvent) -> Self {
        match event {
            ConversationEvent::StateChanged(state) => Self::StateChanged { state },
            ConversationEvent::UserSpoke(text) => Self::UserSpoke { text },
            ConversationEvent::AiResponse(text) => Self::AiResponse { text },
            ConversationEvent::AiAudio(audio) => Self::AiAudio {
                audio: base64::engine::general_purpose::STANDARD.encode(audio),
            },
            ConversationEvent::NoSpeechDetected => Self::NoSpeechDetected,
            ConversationEvent::TurnComplete => Self::TurnComplete,
            ConversationEvent::Error(message) => Self::Error { message },
            ConversationEvent::Stopped => Self::Stopped,
        }
    }
}

/// Build the gateway router
#[must_use]
pub fn router(state: Arc<ApiState>, cors_permissive: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/api/conversation/status", get(conversation_status))
        .route("/api/conversation/start", post(start_conversation))
        .route("/api/conversation/stop", post(stop_conversation))
        .route("/api/conversation/record", post(start_recording))
        .route("/api/conversation/events", get(conversation_events))
        .route("/api/transcript", post(ingest_transcript))
        .route("/api/transcript/audio", post(ingest_audio))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Bind and serve the API until the process exits
///
/// # Errors
///
/// Returns error if the port cannot be bound
pub async fn serve(state: Arc<ApiState>, port: u16, cors_permissive: bool) -> Result<()> {
    let app = router(state, cors_permissive);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn setup_mode() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "gateway is in setup mode - no chat provider configured".to_string(),
        }),
    )
        .into_response()
}

/// Current session snapshot
async fn conversation_status(State(state): State<Arc<ApiState>>) -> Response {
    state.manager.as_ref().map_or_else(setup_mode, |manager| {
        Json(manager.status()).into_response()
    })
}

/// Start a conversation and bind a fresh transcript channel
async fn start_conversation(
    State(state): State<Arc<ApiState>>,
    Json(options): Json<StartOptions>,
) -> Response {
    let Some(manager) = &state.manager else {
        return setup_mode();
    };

    let (feed, rx) = TranscriptFeed::channel();
    match manager.start(options, rx) {
        Ok(()) => {
            *state.transcript.lock().await = Some(feed);
            Json(StartedResponse { started: true }).into_response()
        }
        Err(e) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Stop the conversation; idempotent
async fn stop_conversation(State(state): State<Arc<ApiState>>) -> Response {
    let Some(manager) = &state.manager else {
        return setup_mode();
    };

    let stopped = manager.stop();
    state.transcript.lock().await.take();
    Json(StoppedResponse { stopped }).into_response()
}

/// Trigger a recording window; rejection is a 200 with `accepted: false`
async fn start_recording(State(state): State<Arc<ApiState>>) -> Response {
    state.manager.as_ref().map_or_else(setup_mode, |manager| {
        Json(RecordResponse {
            accepted: manager.start_recording().is_accepted(),
        })
        .into_response()
    })
}

/// Feed one recognizer event into the active session
async fn ingest_transcript(
    State(state): State<Arc<ApiState>>,
    Json(event): Json<TranscriptEvent>,
) -> Response {
    let Some(feed) = state.transcript.lock().await.clone() else {
        return no_session();
    };

    if feed.send(event).await.is_err() {
        // The session stopped underneath us; drop the stale feed.
        state.transcript.lock().await.take();
        return no_session();
    }

    StatusCode::ACCEPTED.into_response()
}

/// Transcribe a WAV capture and feed the result as one fragment
async fn ingest_audio(State(state): State<Arc<ApiState>>, body: Bytes) -> Response {
    let Some(stt) = &state.stt else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "no STT provider configured".to_string(),
            }),
        )
            .into_response();
    };

    let Some(feed) = state.transcript.lock().await.clone() else {
        return no_session();
    };

    let text = match stt.transcribe(body.to_vec()).await {
        Ok(text) => text,
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    if feed.transcribed(text.clone()).await.is_err() {
        state.transcript.lock().await.take();
        return no_session();
    }

    (StatusCode::ACCEPTED, Json(TranscriptAccepted { text })).into_response()
}

fn no_session() -> Response {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: "no active conversation".to_string(),
        }),
    )
        .into_response()
}

/// Upgrade to the event stream WebSocket
async fn conversation_events(
    State(state): State<Arc<ApiState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(manager) = &state.manager else {
        return setup_mode();
    };

    let events = manager.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, events))
}

/// Forward conversation events to one WebSocket client
async fn forward_events(socket: WebSocket, mut events: broadcast::Receiver<ConversationEvent>) {
    let (mut sender, mut receiver) = socket.split();

    tracing::debug!("event subscriber connected");

    // Push conversation events out as JSON frames
    let mut send_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let frame = WsEvent::from(event);
                    match serde_json::to_string(&frame) {
                        Ok(text) => {
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to encode event frame"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Drain the client side so pings are answered and closes are seen
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::debug!("event subscriber disconnected");
}
