use super::participant::Participant;
use std::collections::HashMap;

/// Local mirror of the service's participant list
///
/// Only updated after the service acknowledges a change.
#[derive(Debug, Default)]
pub struct Roster {
    entries: HashMap<String, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update; returns true when the participant was new
    pub fn upsert(&mut self, participant: Participant) -> bool {
        self.entries
            .insert(participant.id().to_string(), participant)
            .is_none()
    }

    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot ordered by id
    pub fn participants(&self) -> Vec<Participant> {
        let mut participants: Vec<Participant> = self.entries.values().cloned().collect();
        participants.sort_by(|a, b| a.id().cmp(b.id()));
        participants
    }
}
