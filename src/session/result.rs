use crate::connection::{HypothesisMessage, PhraseMessage, PhraseStatus, WordMessage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultReason {
    /// Intermediate text, superseded by later results for the same utterance
    RecognizingSpeech,
    /// Final text for an utterance
    RecognizedSpeech,
    /// Speech was detected but not recognized
    NoMatch,
    /// The session was canceled before the utterance completed
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub offset: Duration,
    pub duration: Duration,
}

/// One recognition result for one utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTranscriptionResult {
    /// Utterance id, shared by every result of the same utterance
    pub result_id: String,
    pub text: String,
    pub reason: ResultReason,
    /// Participant the service attributed the speech to
    pub user_id: Option<String>,
    /// Start of the utterance from the beginning of the audio
    pub offset: Duration,
    pub duration: Duration,
    /// Present with detailed output
    pub confidence: Option<f32>,
    /// Per-word timing, present with detailed output
    pub words: Vec<WordTiming>,
}

impl ConversationTranscriptionResult {
    pub(crate) fn from_hypothesis(hypothesis: HypothesisMessage) -> Self {
        Self {
            result_id: hypothesis.utterance_id,
            text: hypothesis.text,
            reason: ResultReason::RecognizingSpeech,
            user_id: None,
            offset: Duration::from_millis(hypothesis.offset_ms),
            duration: Duration::from_millis(hypothesis.duration_ms),
            confidence: None,
            words: Vec::new(),
        }
    }

    pub(crate) fn from_phrase(phrase: PhraseMessage) -> Self {
        let reason = match phrase.status {
            PhraseStatus::Success => ResultReason::RecognizedSpeech,
            PhraseStatus::NoMatch => ResultReason::NoMatch,
        };
        Self {
            result_id: phrase.utterance_id,
            text: phrase.text,
            reason,
            user_id: phrase.user_id,
            offset: Duration::from_millis(phrase.offset_ms),
            duration: Duration::from_millis(phrase.duration_ms),
            confidence: phrase.confidence,
            words: phrase
                .words
                .unwrap_or_default()
                .into_iter()
                .map(WordTiming::from)
                .collect(),
        }
    }

    /// Final result closing an utterance cut short by cancellation
    pub(crate) fn canceled_from(partial: &Self) -> Self {
        Self {
            reason: ResultReason::Canceled,
            ..partial.clone()
        }
    }

    pub fn is_final(&self) -> bool {
        self.reason != ResultReason::RecognizingSpeech
    }
}

impl From<WordMessage> for WordTiming {
    fn from(word: WordMessage) -> Self {
        Self {
            word: word.word,
            offset: Duration::from_millis(word.offset_ms),
            duration: Duration::from_millis(word.duration_ms),
        }
    }
}
