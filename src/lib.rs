pub mod audio;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod session;

pub use audio::{
    AudioConfig, AudioFile, AudioFormat, AudioFrame, AudioSource, PullAudioCallback,
    PullAudioInputStream, PushAudioInputStream, PushAudioWriter, WavFileSource,
};
pub use config::Config;
pub use connection::{
    Connection, ErrorCode, LoopbackTransport, NatsTransport, SegmenterConfig, Transport,
    WebSocketTransport,
};
pub use error::{Result, TranscriberError};
pub use http::{create_router, AppState};
pub use session::{
    CanceledEventArgs, ConversationTranscriber, ConversationTranscriptionResult, Endpoint,
    OutputFormat, Participant, ParticipantIdentity, PendingOperation, ResultReason,
    SessionEventArgs, SessionState, SessionStats, SpeechConfig, TranscriptSegment,
    TranscriptionEventArgs, User,
};
