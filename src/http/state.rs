use crate::audio::AudioConfig;
use crate::connection::Transport;
use crate::error::Result;
use crate::session::{ConversationTranscriber, SpeechConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Live transcribers (conversation_id → transcriber)
    pub sessions: Arc<RwLock<HashMap<String, Arc<ConversationTranscriber>>>>,

    /// Configuration every new transcriber starts from
    pub speech: SpeechConfig,

    /// Overrides the transport the endpoint would select
    transport: Option<Arc<dyn Transport>>,
}

impl AppState {
    pub fn new(speech: SpeechConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            speech,
            transport: None,
        }
    }

    /// State whose transcribers all use `transport`
    pub fn with_transport(speech: SpeechConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new(speech)
        }
    }

    pub(crate) fn create_transcriber(&self, audio: AudioConfig) -> Result<ConversationTranscriber> {
        match &self.transport {
            Some(transport) => {
                ConversationTranscriber::with_transport(self.speech.clone(), audio, Arc::clone(transport))
            }
            None => ConversationTranscriber::new(self.speech.clone(), audio),
        }
    }
}
