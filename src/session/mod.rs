//! Conversation transcription sessions
//!
//! This module provides the `ConversationTranscriber` abstraction that manages:
//! - The lazily opened connection to the recognition service
//! - Start/stop of audio streaming as pending operations
//! - The participant roster, mutated through acknowledged requests
//! - Event delivery of intermediate and final results
//! - Transcript collection and session statistics

mod config;
mod events;
mod operation;
mod participant;
mod result;
mod roster;
mod session;
mod state;
mod stats;
mod validation;

pub use config::{Endpoint, OutputFormat, SpeechConfig, CONVERSATION_PATH, MANAGED_HOST_SUFFIX};
pub use events::{
    CanceledEventArgs, EventSignal, EventSignals, ListenerId, SessionEventArgs,
    TranscriptionEventArgs,
};
pub use operation::PendingOperation;
pub use participant::{Participant, ParticipantIdentity, User};
pub use result::{ConversationTranscriptionResult, ResultReason, WordTiming};
pub use roster::Roster;
pub use session::ConversationTranscriber;
pub use state::SessionState;
pub use stats::{SessionStats, TranscriptSegment};
pub use validation::{
    validate_conversation_id, validate_language, validate_user_id, validate_voice_signature,
};
