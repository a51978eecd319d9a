use super::result::ConversationTranscriptionResult;
use super::state::SessionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a transcription session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current lifecycle state
    pub state: SessionState,

    /// Conversation this session transcribes
    pub conversation_id: String,

    /// Service-assigned session id, once connected
    pub session_id: Option<String>,

    /// When the service confirmed the start of transcription
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since start
    pub duration_secs: f64,

    /// Audio frames streamed to the service
    pub audio_frames_sent: u64,

    /// Participants currently in the roster
    pub participants_count: usize,

    /// Final transcript segments received
    pub transcript_segments_count: usize,
}

/// A final transcript segment from the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Utterance id
    pub utterance_id: String,

    /// Transcribed text
    pub text: String,

    /// Attributed participant, if any
    pub user_id: Option<String>,

    /// Offset of the utterance in the audio (milliseconds)
    pub offset_ms: u64,

    /// Length of the utterance (milliseconds)
    pub duration_ms: u64,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,

    /// Confidence score (0.0 to 1.0), with detailed output
    pub confidence: Option<f32>,
}

impl From<&ConversationTranscriptionResult> for TranscriptSegment {
    fn from(result: &ConversationTranscriptionResult) -> Self {
        Self {
            utterance_id: result.result_id.clone(),
            text: result.text.clone(),
            user_id: result.user_id.clone(),
            offset_ms: result.offset.as_millis() as u64,
            duration_ms: result.duration.as_millis() as u64,
            timestamp: Utc::now(),
            confidence: result.confidence,
        }
    }
}
