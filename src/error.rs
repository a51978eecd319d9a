//! Error types for conversation transcription.

use crate::connection::ErrorCode;
use crate::session::SessionState;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscriberError {
    // Detected locally, before any network traffic
    #[error("Invalid {name}: {message}")]
    InvalidArgument { name: &'static str, message: String },

    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Participant '{id}' is not in the roster")]
    NotFound { id: String },

    // Transport and service failures
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Service rejected the request ({code}): {message}")]
    Service { code: ErrorCode, message: String },

    #[error("Timed out after {waited:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },

    // Collaborators
    #[error("Audio source error: {message}")]
    Audio { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

pub type Result<T> = std::result::Result<T, TranscriberError>;

impl TranscriberError {
    pub(crate) fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    pub(crate) fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub(crate) fn audio(message: impl Into<String>) -> Self {
        Self::Audio {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The terminal error every pending wait observes once the session is closed.
    pub(crate) fn closed(operation: &'static str) -> Self {
        Self::InvalidState {
            operation,
            state: SessionState::Closed,
        }
    }

    /// True when the failure was detected without contacting the service.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::InvalidState { .. }
                | Self::NotFound { .. }
                | Self::Audio { .. }
                | Self::Config { .. }
        )
    }

    /// True when the service received the request and rejected it.
    pub fn reached_service(&self) -> bool {
        matches!(self, Self::Service { .. })
    }

    /// Error code reported in a `canceled` event for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Service { code, .. } => *code,
            Self::Connection { .. } => ErrorCode::ConnectionFailure,
            Self::Timeout { .. } => ErrorCode::ServiceTimeout,
            Self::InvalidArgument { .. } | Self::NotFound { .. } => ErrorCode::BadRequest,
            Self::InvalidState { .. } | Self::Audio { .. } | Self::Config { .. } => {
                ErrorCode::RuntimeError
            }
        }
    }
}
