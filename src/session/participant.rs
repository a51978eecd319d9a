use super::validation::{validate_language, validate_user_id, validate_voice_signature};
use crate::connection::ParticipantPayload;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// A conversation user identified by an opaque id (e.g. an email address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    id: String,
}

impl User {
    pub fn from_user_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// A user plus session-scoped attributes the service uses for attribution
///
/// Setters reject empty values and keep the previous value when they do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    user: User,
    preferred_language: Option<String>,
    voice_signature: Option<String>,
}

impl Participant {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::from_user(User::from_user_id(user_id))
    }

    pub fn from_user(user: User) -> Self {
        Self {
            user,
            preferred_language: None,
            voice_signature: None,
        }
    }

    /// Participant with language and voice signature, both validated
    pub fn from_details(
        user_id: impl Into<String>,
        preferred_language: impl Into<String>,
        voice_signature: impl Into<String>,
    ) -> Result<Self> {
        let mut participant = Self::new(user_id);
        participant.set_preferred_language(preferred_language)?;
        participant.set_voice_signature(voice_signature)?;
        Ok(participant)
    }

    pub fn id(&self) -> &str {
        self.user.id()
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn preferred_language(&self) -> Option<&str> {
        self.preferred_language.as_deref()
    }

    pub fn voice_signature(&self) -> Option<&str> {
        self.voice_signature.as_deref()
    }

    pub fn set_preferred_language(&mut self, language: impl Into<String>) -> Result<()> {
        let language = language.into();
        validate_language(&language)?;
        self.preferred_language = Some(language);
        Ok(())
    }

    pub fn set_voice_signature(&mut self, signature: impl Into<String>) -> Result<()> {
        let signature = signature.into();
        validate_voice_signature(&signature)?;
        self.voice_signature = Some(signature);
        Ok(())
    }

    pub(crate) fn to_payload(&self) -> ParticipantPayload {
        ParticipantPayload {
            id: self.id().to_string(),
            preferred_language: self.preferred_language.clone(),
            voice_signature: self.voice_signature.clone(),
        }
    }
}

/// Anything roster operations accept as a participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantIdentity {
    UserId(String),
    User(User),
    Participant(Participant),
}

impl ParticipantIdentity {
    /// Canonical roster key
    pub fn key(&self) -> &str {
        match self {
            Self::UserId(id) => id,
            Self::User(user) => user.id(),
            Self::Participant(participant) => participant.id(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_user_id(self.key())
    }

    /// Participant state to store in the roster
    pub fn into_participant(self) -> Participant {
        match self {
            Self::UserId(id) => Participant::new(id),
            Self::User(user) => Participant::from_user(user),
            Self::Participant(participant) => participant,
        }
    }
}

impl From<&str> for ParticipantIdentity {
    fn from(id: &str) -> Self {
        Self::UserId(id.to_string())
    }
}

impl From<String> for ParticipantIdentity {
    fn from(id: String) -> Self {
        Self::UserId(id)
    }
}

impl From<User> for ParticipantIdentity {
    fn from(user: User) -> Self {
        Self::User(user)
    }
}

impl From<&User> for ParticipantIdentity {
    fn from(user: &User) -> Self {
        Self::User(user.clone())
    }
}

impl From<Participant> for ParticipantIdentity {
    fn from(participant: Participant) -> Self {
        Self::Participant(participant)
    }
}

impl From<&Participant> for ParticipantIdentity {
    fn from(participant: &Participant) -> Self {
        Self::Participant(participant.clone())
    }
}
