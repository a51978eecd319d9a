use crate::audio::{AudioFormat, AudioFrame};
use crate::session::OutputFormat;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Messages sent from the client to the recognition service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake, answered by `ServiceMessage::Connected`
    Connect {
        request_id: Uuid,
        conversation_id: String,
        language: String,
        output_format: OutputFormat,
        audio: AudioFormat,
    },
    StartTranscribing {
        request_id: Uuid,
    },
    Audio(AudioFrameMessage),
    UpdateRoster {
        request_id: Uuid,
        action: RosterAction,
        participant: ParticipantPayload,
    },
    StopTranscribing {
        request_id: Uuid,
    },
    Ping,
    Disconnect,
}

/// Audio frame streamed to the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub sequence: u64,
    pub pcm: String, // Base64-encoded PCM bytes
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp_ms: u64,
    #[serde(rename = "final")]
    pub final_frame: bool,
}

impl AudioFrameMessage {
    pub fn from_frame(frame: &AudioFrame, sequence: u64) -> Self {
        Self {
            sequence,
            pcm: base64::engine::general_purpose::STANDARD.encode(frame.to_pcm_bytes()),
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            timestamp_ms: frame.timestamp_ms,
            final_frame: false,
        }
    }

    /// Empty frame marking the end of audio
    pub fn end_of_stream(format: AudioFormat, sequence: u64, timestamp_ms: u64) -> Self {
        Self {
            sequence,
            pcm: String::new(),
            sample_rate: format.sample_rate,
            channels: format.channels,
            timestamp_ms,
            final_frame: true,
        }
    }

    /// Decode the PCM payload back into interleaved samples
    pub fn samples(&self) -> Result<Vec<i16>, base64::DecodeError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(&self.pcm)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPayload {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_signature: Option<String>,
}

/// Messages received from the recognition service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceMessage {
    Connected {
        request_id: Uuid,
        session_id: String,
    },
    TranscribingStarted {
        request_id: Uuid,
    },
    Hypothesis(HypothesisMessage),
    Phrase(PhraseMessage),
    RosterUpdated {
        request_id: Uuid,
        outcome: RosterOutcome,
    },
    TranscribingStopped {
        request_id: Uuid,
    },
    Pong,
    Error {
        #[serde(default)]
        request_id: Option<Uuid>,
        code: ErrorCode,
        message: String,
    },
}

impl ServiceMessage {
    /// Correlation id when this message acknowledges a request
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            Self::Connected { request_id, .. }
            | Self::TranscribingStarted { request_id }
            | Self::RosterUpdated { request_id, .. }
            | Self::TranscribingStopped { request_id } => Some(*request_id),
            Self::Error { request_id, .. } => *request_id,
            Self::Hypothesis(_) | Self::Phrase(_) | Self::Pong => None,
        }
    }
}

/// Intermediate result for an utterance still in progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisMessage {
    pub utterance_id: String,
    pub text: String,
    pub offset_ms: u64,
    pub duration_ms: u64,
}

/// Final result for a completed utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseMessage {
    pub utterance_id: String,
    pub status: PhraseStatus,
    pub text: String,
    pub offset_ms: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub words: Option<Vec<WordMessage>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseStatus {
    Success,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordMessage {
    pub word: String,
    pub offset_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RosterOutcome {
    Applied,
    NotFound,
    Rejected { message: String },
}

/// Error codes reported by the service and carried by `canceled` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthenticationFailure,
    BadRequest,
    TooManyRequests,
    Forbidden,
    ConnectionFailure,
    ServiceTimeout,
    ServiceError,
    ServiceUnavailable,
    RuntimeError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AuthenticationFailure => "authentication failure",
            Self::BadRequest => "bad request",
            Self::TooManyRequests => "too many requests",
            Self::Forbidden => "forbidden",
            Self::ConnectionFailure => "connection failure",
            Self::ServiceTimeout => "service timeout",
            Self::ServiceError => "service error",
            Self::ServiceUnavailable => "service unavailable",
            Self::RuntimeError => "runtime error",
        };
        f.write_str(name)
    }
}
