//! Event subscription for conversation transcribers.
//!
//! Each event kind has its own `EventSignal`, a registry of callbacks. The
//! callbacks run on the session's delivery task, never on the caller's task
//! and never inline with network I/O. Slow callbacks delay later events.

use super::result::ConversationTranscriptionResult;
use crate::connection::ErrorCode;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEventArgs {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionEventArgs {
    pub session_id: String,
    pub result: ConversationTranscriptionResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanceledEventArgs {
    pub session_id: String,
    pub error_code: ErrorCode,
    pub error_details: String,
}

/// Identifies a registered listener for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Multi-listener notification point for one event kind
pub struct EventSignal<E> {
    listeners: RwLock<Vec<(ListenerId, Listener<E>)>>,
    next_id: AtomicU64,
}

impl<E> Default for EventSignal<E> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> EventSignal<E> {
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    /// Returns false when `id` was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        match self.listeners.write() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(existing, _)| *existing != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// Invoke every listener; a panicking listener does not stop delivery
    pub(crate) fn emit(&self, args: &E) {
        let snapshot: Vec<Listener<E>> = match self.listeners.read() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(args))).is_err() {
                warn!("Event listener panicked");
            }
        }
    }
}

/// All event kinds a transcriber raises
#[derive(Default)]
pub struct EventSignals {
    /// Intermediate results
    pub recognizing: EventSignal<TranscriptionEventArgs>,
    /// Final results, exactly one per utterance
    pub recognized: EventSignal<TranscriptionEventArgs>,
    /// Abnormal termination; no recognition events follow
    pub canceled: EventSignal<CanceledEventArgs>,
    pub session_started: EventSignal<SessionEventArgs>,
    pub session_stopped: EventSignal<SessionEventArgs>,
}
