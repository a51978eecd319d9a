use super::state::AppState;
use crate::audio::AudioConfig;
use crate::error::{Result, TranscriberError};
use crate::session::{
    ConversationTranscriber, Participant, SessionState, SessionStats, TranscriptSegment,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// Optional conversation ID (if not provided, generate UUID)
    pub conversation_id: Option<String>,

    /// WAV file to transcribe
    pub wav_path: String,

    /// Participants to add before transcription starts
    #[serde(default)]
    pub participants: Vec<ParticipantRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantRequest {
    pub user_id: String,
    pub preferred_language: Option<String>,
    pub voice_signature: Option<String>,
}

impl ParticipantRequest {
    fn into_participant(self) -> Result<Participant> {
        let mut participant = Participant::new(self.user_id);
        if let Some(language) = self.preferred_language {
            participant.set_preferred_language(language)?;
        }
        if let Some(signature) = self.voice_signature {
            participant.set_voice_signature(signature)?;
        }
        Ok(participant)
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_id: String,
    pub session_id: Option<String>,
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub conversation_id: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StopConversationResponse {
    pub conversation_id: String,
    pub status: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A failed request rendered as an HTTP error
#[derive(Debug)]
pub enum ApiError {
    UnknownConversation(String),
    Transcriber(TranscriberError),
}

impl From<TranscriberError> for ApiError {
    fn from(error: TranscriberError) -> Self {
        Self::Transcriber(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match self {
            Self::UnknownConversation(id) => {
                warn!("Unknown conversation: {}", id);
                return (
                    StatusCode::NOT_FOUND,
                    Json(ErrorResponse {
                        error: format!("Conversation {} not found", id),
                    }),
                )
                    .into_response();
            }
            Self::Transcriber(error) => error,
        };

        let status = match &error {
            TranscriberError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            TranscriberError::NotFound { .. } => StatusCode::NOT_FOUND,
            TranscriberError::InvalidState { .. } => StatusCode::CONFLICT,
            TranscriberError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            TranscriberError::Connection { .. } | TranscriberError::Service { .. } => {
                StatusCode::BAD_GATEWAY
            }
            TranscriberError::Audio { .. } | TranscriberError::Config { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!("Request failed: {}", error);
        } else {
            warn!("Request rejected: {}", error);
        }

        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn find(state: &AppState, conversation_id: &str) -> ApiResult<Arc<ConversationTranscriber>> {
    let sessions = state.sessions.read().await;
    sessions
        .get(conversation_id)
        .cloned()
        .ok_or_else(|| ApiError::UnknownConversation(conversation_id.to_string()))
}

fn conflict(conversation_id: &str) -> Response {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: format!("Conversation {} already exists", conversation_id),
        }),
    )
        .into_response()
}

/// Bound for operations that may open a connection and then wait for an acknowledgment
fn operation_timeout(state: &AppState) -> Duration {
    state.speech.connect_timeout + state.speech.request_timeout
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /conversations
/// Create a transcriber for a WAV file, add participants and start transcribing
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<Response> {
    let transcriber = state.create_transcriber(AudioConfig::from_wav_file_input(&req.wav_path))?;
    if let Some(id) = req.conversation_id {
        transcriber.set_conversation_id(id)?;
    }
    let conversation_id = transcriber.conversation_id();

    info!("Creating conversation {} from {}", conversation_id, req.wav_path);

    if state.sessions.read().await.contains_key(&conversation_id) {
        return Ok(conflict(&conversation_id));
    }

    let started = async {
        for participant in req.participants {
            transcriber.add_participant(participant.into_participant()?).await?;
        }
        transcriber
            .start_transcribing_async()
            .wait_timeout(operation_timeout(&state))
            .await
    }
    .await;

    if let Err(e) = started {
        transcriber.close().await;
        return Err(e.into());
    }

    let transcriber = Arc::new(transcriber);
    let inserted = {
        let mut sessions = state.sessions.write().await;
        match sessions.entry(conversation_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&transcriber));
                true
            }
        }
    };
    if !inserted {
        transcriber.close().await;
        return Ok(conflict(&conversation_id));
    }

    info!("Transcription started for conversation: {}", conversation_id);

    Ok((
        StatusCode::OK,
        Json(ConversationResponse {
            conversation_id,
            session_id: transcriber.session_id(),
            state: transcriber.state(),
        }),
    )
        .into_response())
}

/// POST /conversations/:conversation_id/participants
pub async fn add_participant(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<ParticipantRequest>,
) -> ApiResult<Json<ParticipantsResponse>> {
    let transcriber = find(&state, &conversation_id).await?;
    let participant = req.into_participant()?;

    info!("Adding {} to conversation {}", participant.id(), conversation_id);
    transcriber.add_participant(participant).await?;

    Ok(Json(participants_response(conversation_id, &transcriber).await))
}

/// DELETE /conversations/:conversation_id/participants/:user_id
pub async fn remove_participant(
    State(state): State<AppState>,
    Path((conversation_id, user_id)): Path<(String, String)>,
) -> ApiResult<Json<ParticipantsResponse>> {
    let transcriber = find(&state, &conversation_id).await?;

    info!("Removing {} from conversation {}", user_id, conversation_id);
    transcriber.remove_participant(user_id.as_str()).await?;

    Ok(Json(participants_response(conversation_id, &transcriber).await))
}

async fn participants_response(
    conversation_id: String,
    transcriber: &ConversationTranscriber,
) -> ParticipantsResponse {
    ParticipantsResponse {
        conversation_id,
        participants: transcriber
            .participants()
            .await
            .iter()
            .map(|p| p.id().to_string())
            .collect(),
    }
}

/// POST /conversations/:conversation_id/stop
/// Stop transcription, close the transcriber and report its statistics
pub async fn stop_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<StopConversationResponse>> {
    info!("Stopping conversation: {}", conversation_id);

    let transcriber = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&conversation_id)
    }
    .ok_or_else(|| ApiError::UnknownConversation(conversation_id.clone()))?;

    let stopped = if transcriber.state() == SessionState::Streaming {
        transcriber
            .stop_transcribing_async()
            .wait_timeout(operation_timeout(&state))
            .await
    } else {
        Ok(())
    };

    let stats = transcriber.stats().await;
    transcriber.close().await;
    stopped?;

    info!("Conversation {} stopped", conversation_id);

    Ok(Json(StopConversationResponse {
        conversation_id,
        status: stats.state.to_string(),
        stats,
    }))
}

/// GET /conversations/:conversation_id/status
pub async fn get_conversation_status(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<SessionStats>> {
    let transcriber = find(&state, &conversation_id).await?;
    Ok(Json(transcriber.stats().await))
}

/// GET /conversations/:conversation_id/transcript
/// Get the transcript accumulated so far
pub async fn get_conversation_transcript(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Vec<TranscriptSegment>>> {
    let transcriber = find(&state, &conversation_id).await?;
    Ok(Json(transcriber.transcript()))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
