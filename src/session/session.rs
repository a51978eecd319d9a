use super::config::SpeechConfig;
use super::events::{CanceledEventArgs, EventSignal, EventSignals, SessionEventArgs, TranscriptionEventArgs};
use super::operation::{pending, PendingOperation};
use super::participant::{Participant, ParticipantIdentity};
use super::result::{ConversationTranscriptionResult, ResultReason};
use super::roster::Roster;
use super::state::SessionState;
use super::stats::{SessionStats, TranscriptSegment};
use super::validation::validate_conversation_id;
use crate::audio::{AudioConfig, AudioFormat, AudioSource};
use crate::connection::client::{expect_ack, unexpected_ack};
use crate::connection::{
    AudioFrameMessage, ClientMessage, Connection, ConnectionEvent, ErrorCode, EventSink, Handshake,
    RosterAction, RosterOutcome, ServiceMessage, Transport,
};
use crate::error::{Result, TranscriberError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const START: &str = "start transcribing";
const STOP: &str = "stop transcribing";
const ADD_PARTICIPANT: &str = "add participant";
const REMOVE_PARTICIPANT: &str = "remove participant";

/// Streams one conversation's audio to the recognition service and fans out
/// the results to registered listeners.
///
/// Network operations run on Tokio tasks, so the transcriber must be used
/// from within a Tokio runtime.
pub struct ConversationTranscriber {
    inner: Arc<Inner>,
}

/// Everything the background tasks of a transcriber share
struct Inner {
    config: SpeechConfig,
    transport: Arc<dyn Transport>,

    /// Format of the bound audio source, announced in the handshake
    format: AudioFormat,

    /// Audio source until streaming takes it
    audio: tokio::sync::Mutex<Option<Box<dyn AudioSource>>>,

    conversation_id: RwLock<String>,

    /// Set once a connection has been opened; the conversation id is fixed from then on
    connected: AtomicBool,

    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,

    /// Held across each roster request so mutations are applied in order
    roster: tokio::sync::Mutex<Roster>,

    /// Flipped once by `close`; every pending operation watches it
    closed: watch::Sender<bool>,

    pump: Mutex<Option<JoinHandle<Box<dyn AudioSource>>>>,
    pump_stop: Mutex<Option<watch::Sender<bool>>>,

    events: mpsc::UnboundedSender<SessionEvent>,
    delivery: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,

    shared: Arc<Shared>,
}

/// State also visible to the event delivery task
struct Shared {
    state: Mutex<SessionState>,
    session_id: Mutex<Option<String>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    frames_sent: AtomicU64,
    /// Set when the audio pump finishes
    audio_done: watch::Sender<bool>,
    transcript: Mutex<Vec<TranscriptSegment>>,
    signals: EventSignals,
}

/// Input of the event delivery task
#[derive(Debug)]
enum SessionEvent {
    Connection(ConnectionEvent),
    Started { session_id: String },
    Stopped { session_id: String },
    /// An operation failed with nobody waiting on its handle
    Failed { code: ErrorCode, details: String },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConversationTranscriber {
    /// Create a transcriber whose transport is chosen from the endpoint in `config`
    pub fn new(config: SpeechConfig, audio: AudioConfig) -> Result<Self> {
        let transport = config.transport()?;
        Self::with_transport(config, audio, transport)
    }

    /// Create a transcriber over an explicit transport
    pub fn with_transport(
        config: SpeechConfig,
        audio: AudioConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let source = audio.into_source(config.frame_duration_ms)?;
        let format = source.format();
        let conversation_id = Uuid::new_v4().to_string();

        info!(
            "Created conversation transcriber {} ({} transport, {} audio, {} Hz x {} channels)",
            conversation_id,
            transport.name(),
            source.name(),
            format.sample_rate,
            format.channels
        );

        let (events, delivery) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Idle),
            session_id: Mutex::new(None),
            started_at: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
            audio_done: watch::channel(false).0,
            transcript: Mutex::new(Vec::new()),
            signals: EventSignals::default(),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                format,
                audio: tokio::sync::Mutex::new(Some(source)),
                conversation_id: RwLock::new(conversation_id),
                connected: AtomicBool::new(false),
                connection: tokio::sync::Mutex::new(None),
                roster: tokio::sync::Mutex::new(Roster::new()),
                closed,
                pump: Mutex::new(None),
                pump_stop: Mutex::new(None),
                events,
                delivery: Mutex::new(Some(delivery)),
                shared,
            }),
        })
    }

    pub fn conversation_id(&self) -> String {
        self.inner.conversation_id()
    }

    /// Set the conversation id; only allowed before the first connection
    pub fn set_conversation_id(&self, id: impl Into<String>) -> Result<()> {
        const OPERATION: &str = "set conversation id";

        let state = self.state();
        if state == SessionState::Closed {
            return Err(TranscriberError::closed(OPERATION));
        }

        let id = id.into();
        validate_conversation_id(&id)?;

        if state != SessionState::Idle || self.inner.connected.load(Ordering::SeqCst) {
            return Err(TranscriberError::InvalidState {
                operation: OPERATION,
                state,
            });
        }

        match self.inner.conversation_id.write() {
            Ok(mut current) => *current = id,
            Err(poisoned) => *poisoned.into_inner() = id,
        }
        Ok(())
    }

    pub fn config(&self) -> &SpeechConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.state()
    }

    /// Service-assigned session id, once connected
    pub fn session_id(&self) -> Option<String> {
        lock(&self.inner.shared.session_id).clone()
    }

    /// Add a participant to the conversation and wait for the service to acknowledge it
    ///
    /// Adding an id that is already present replaces its language and voice signature.
    pub async fn add_participant(&self, identity: impl Into<ParticipantIdentity>) -> Result<()> {
        let identity = identity.into();
        identity.validate()?;
        self.inner
            .guarded(ADD_PARTICIPANT, self.inner.update_roster(RosterAction::Add, identity))
            .await
    }

    /// Remove a participant from the conversation
    ///
    /// Fails with `NotFound`, without contacting the service, when the
    /// participant is not in the roster.
    pub async fn remove_participant(&self, identity: impl Into<ParticipantIdentity>) -> Result<()> {
        let identity = identity.into();
        identity.validate()?;
        self.inner
            .guarded(
                REMOVE_PARTICIPANT,
                self.inner.update_roster(RosterAction::Remove, identity),
            )
            .await
    }

    /// Current roster, sorted by id
    pub async fn participants(&self) -> Vec<Participant> {
        self.inner.roster.lock().await.participants()
    }

    /// Begin streaming audio; the handle resolves once the service confirms the start
    ///
    /// A failure is raised as a `canceled` event only when the handle has
    /// been dropped by the time the operation resolves.
    pub fn start_transcribing_async(&self) -> PendingOperation<()> {
        if let Err(e) = self
            .inner
            .shared
            .transition(START, &[SessionState::Idle], SessionState::Starting)
        {
            return PendingOperation::resolved(START, Err(e));
        }

        info!("Starting transcription of conversation {}", self.conversation_id());

        let (completion, handle) = pending(START);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.guarded(START, inner.start()).await;
            match &result {
                Ok(()) => info!("Transcription started"),
                Err(e) => warn!("Failed to start transcription: {}", e),
            }
            let observed = completion.complete(result.clone());
            if let Err(e) = result {
                inner.report_unobserved(observed, &e);
            }
        });

        handle
    }

    /// Signal end of audio and wait for the service to finish the stream
    ///
    /// Failures surface through `canceled` under the same rule as
    /// `start_transcribing_async`.
    pub fn stop_transcribing_async(&self) -> PendingOperation<()> {
        if let Err(e) = self
            .inner
            .shared
            .transition(STOP, &[SessionState::Streaming], SessionState::Stopping)
        {
            return PendingOperation::resolved(STOP, Err(e));
        }

        info!("Stopping transcription of conversation {}", self.conversation_id());

        let (completion, handle) = pending(STOP);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.guarded(STOP, inner.stop()).await;
            match &result {
                Ok(()) => info!("Transcription stopped"),
                Err(e) => {
                    warn!("Failed to stop transcription: {}", e);
                    inner
                        .shared
                        .transition_from(SessionState::Stopping, SessionState::Canceled);
                }
            }
            let observed = completion.complete(result.clone());
            if let Err(e) = result {
                inner.report_unobserved(observed, &e);
            }
        });

        handle
    }

    /// Release the connection and audio source
    ///
    /// Idempotent and infallible. Every pending operation resolves with
    /// `InvalidState` once this returns.
    pub async fn close(&self) {
        if self.inner.shared.replace_state(SessionState::Closed) == SessionState::Closed {
            debug!("Transcriber already closed");
            return;
        }

        info!("Closing conversation transcriber {}", self.conversation_id());
        self.inner.closed.send_replace(true);

        lock(&self.inner.pump_stop).take();
        let pump = lock(&self.inner.pump).take();
        let mut source = match pump {
            Some(pump) => {
                pump.abort();
                pump.await.ok()
            }
            None => None,
        };

        let connection = self.inner.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.close().await;
        }

        if source.is_none() {
            source = self.inner.audio.lock().await.take();
        }
        if let Some(mut source) = source {
            source.close().await;
        }

        info!("Conversation transcriber closed");
    }

    /// Current session statistics
    pub async fn stats(&self) -> SessionStats {
        let started_at = *lock(&self.inner.shared.started_at);
        let duration_secs = started_at
            .map(|start| Utc::now().signed_duration_since(start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        let participants_count = self.inner.roster.lock().await.len();

        SessionStats {
            state: self.state(),
            conversation_id: self.conversation_id(),
            session_id: self.session_id(),
            started_at,
            duration_secs,
            audio_frames_sent: self.inner.shared.frames_sent.load(Ordering::SeqCst),
            participants_count,
            transcript_segments_count: lock(&self.inner.shared.transcript).len(),
        }
    }

    /// Resolves once the audio source has been streamed to its end, or the
    /// transcriber is closed
    ///
    /// Stopping after this point lets the service finish the last utterance.
    pub async fn audio_finished(&self) {
        let done = self.inner.shared.audio_done.subscribe();
        let closed = self.inner.closed.subscribe();
        tokio::select! {
            _ = wait_until_set(done) => {}
            _ = wait_until_set(closed) => {}
        }
    }

    /// Final transcript received so far
    pub fn transcript(&self) -> Vec<TranscriptSegment> {
        lock(&self.inner.shared.transcript).clone()
    }

    pub fn events(&self) -> &EventSignals {
        &self.inner.shared.signals
    }

    pub fn recognizing(&self) -> &EventSignal<TranscriptionEventArgs> {
        &self.inner.shared.signals.recognizing
    }

    pub fn recognized(&self) -> &EventSignal<TranscriptionEventArgs> {
        &self.inner.shared.signals.recognized
    }

    pub fn canceled(&self) -> &EventSignal<CanceledEventArgs> {
        &self.inner.shared.signals.canceled
    }

    pub fn session_started(&self) -> &EventSignal<SessionEventArgs> {
        &self.inner.shared.signals.session_started
    }

    pub fn session_stopped(&self) -> &EventSignal<SessionEventArgs> {
        &self.inner.shared.signals.session_stopped
    }
}

impl Drop for ConversationTranscriber {
    fn drop(&mut self) {
        if self.inner.shared.replace_state(SessionState::Closed) == SessionState::Closed {
            return;
        }

        debug!("Transcriber dropped without close");
        self.inner.closed.send_replace(true);
        lock(&self.inner.pump_stop).take();
        if let Some(pump) = lock(&self.inner.pump).take() {
            pump.abort();
        }
        if let Ok(mut connection) = self.inner.connection.try_lock() {
            if let Some(connection) = connection.take() {
                connection.abort();
            }
        }
    }
}

impl Inner {
    /// Run `operation` until it finishes or the transcriber is closed
    async fn guarded<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TranscriberError::closed(operation));
        }

        tokio::select! {
            biased;
            _ = wait_until_set(closed) => Err(TranscriberError::closed(operation)),
            result = future => result,
        }
    }

    fn conversation_id(&self) -> String {
        self.conversation_id
            .read()
            .map(|id| id.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Spawn the event delivery task on first use
    fn ensure_delivery(&self) {
        if let Some(events) = lock(&self.delivery).take() {
            tokio::spawn(deliver_events(Arc::clone(&self.shared), events));
        }
    }

    /// The open connection, opening one if needed
    async fn connection(&self) -> Result<Arc<Connection>> {
        self.ensure_delivery();

        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if !connection.is_closed() {
                return Ok(Arc::clone(connection));
            }
            debug!("Discarding closed connection");
        }

        let handshake = Handshake {
            conversation_id: self.conversation_id(),
            language: self.config.language.clone(),
            output_format: self.config.output_format,
            audio: self.format,
        };

        let events = self.events.clone();
        let sink: EventSink = Arc::new(move |event| {
            let _ = events.send(SessionEvent::Connection(event));
        });

        let connection = Arc::new(
            Connection::open(self.transport.as_ref(), handshake, self.config.timeouts(), sink).await?,
        );

        self.connected.store(true, Ordering::SeqCst);
        *lock(&self.shared.session_id) = Some(connection.session_id().to_string());
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    async fn drop_connection(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.close().await;
        }
    }

    async fn update_roster(&self, action: RosterAction, identity: ParticipantIdentity) -> Result<()> {
        let operation = match action {
            RosterAction::Add => ADD_PARTICIPANT,
            RosterAction::Remove => REMOVE_PARTICIPANT,
        };

        let mut roster = self.roster.lock().await;

        let state = self.shared.state();
        if !state.accepts_roster_changes() {
            return Err(TranscriberError::InvalidState { operation, state });
        }

        let id = identity.key().to_string();
        let participant = match action {
            RosterAction::Add => identity.into_participant(),
            RosterAction::Remove => match roster.get(&id) {
                Some(participant) => participant.clone(),
                None => return Err(TranscriberError::NotFound { id }),
            },
        };

        let connection = self.connection().await?;
        let ack = connection
            .request(operation, |request_id| ClientMessage::UpdateRoster {
                request_id,
                action,
                participant: participant.to_payload(),
            })
            .await?;

        let outcome = match ack {
            ServiceMessage::RosterUpdated { outcome, .. } => outcome,
            other => return Err(unexpected_ack(operation, &other)),
        };

        match outcome {
            RosterOutcome::Applied => {
                match action {
                    RosterAction::Add => {
                        if !roster.upsert(participant) {
                            debug!("Updated participant {}", id);
                        }
                    }
                    RosterAction::Remove => {
                        roster.remove(&id);
                    }
                }
                info!("Roster {:?} {} applied ({} participants)", action, id, roster.len());
                Ok(())
            }
            RosterOutcome::NotFound => {
                warn!("Service does not know participant {}", id);
                roster.remove(&id);
                Err(TranscriberError::NotFound { id })
            }
            RosterOutcome::Rejected { message } => {
                warn!("Service rejected roster {:?} for {}: {}", action, id, message);
                Err(TranscriberError::Service {
                    code: ErrorCode::BadRequest,
                    message,
                })
            }
        }
    }

    async fn start(&self) -> Result<()> {
        let result = self.start_streaming().await;
        if result.is_err() {
            self.shared
                .transition_from(SessionState::Starting, SessionState::Idle);
            self.drop_connection().await;
        }
        result
    }

    async fn start_streaming(&self) -> Result<()> {
        let connection = self.connection().await?;

        let ack = connection
            .request(START, |request_id| ClientMessage::StartTranscribing { request_id })
            .await?;
        expect_ack(START, ack, |m| {
            matches!(m, ServiceMessage::TranscribingStarted { .. })
        })?;

        let source = self
            .audio
            .lock()
            .await
            .take()
            .ok_or_else(|| TranscriberError::audio("audio source was already consumed"))?;

        // The pump is registered before the state turns Streaming, so a stop
        // issued as soon as Streaming is visible always finds it
        let outcome = {
            let mut state = lock(&self.shared.state);
            if *state == SessionState::Starting {
                *lock(&self.shared.started_at) = Some(Utc::now());
                let _ = self.events.send(SessionEvent::Started {
                    session_id: connection.session_id().to_string(),
                });

                let (stop_tx, stop_rx) = watch::channel(false);
                let shared = Arc::clone(&self.shared);
                let events = self.events.clone();
                let pump = tokio::spawn(async move {
                    let source =
                        pump_audio(source, connection, Arc::clone(&shared), stop_rx, events).await;
                    shared.audio_done.send_replace(true);
                    source
                });
                *lock(&self.pump_stop) = Some(stop_tx);
                *lock(&self.pump) = Some(pump);

                debug!("Session state {} -> {}", *state, SessionState::Streaming);
                *state = SessionState::Streaming;
                Ok(())
            } else {
                Err((
                    TranscriberError::InvalidState {
                        operation: START,
                        state: *state,
                    },
                    source,
                ))
            }
        };

        if let Err((e, source)) = outcome {
            *self.audio.lock().await = Some(source);
            return Err(e);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(stop) = lock(&self.pump_stop).take() {
            let _ = stop.send(true);
        }

        let pump = lock(&self.pump).take();
        if let Some(pump) = pump {
            match pump.await {
                Ok(mut source) => source.close().await,
                Err(e) => error!("Audio pump task failed: {}", e),
            }
        }

        let connection = self
            .connection
            .lock()
            .await
            .clone()
            .ok_or_else(|| TranscriberError::connection("no open connection"))?;

        let ack = connection
            .request(STOP, |request_id| ClientMessage::StopTranscribing { request_id })
            .await?;
        expect_ack(STOP, ack, |m| {
            matches!(m, ServiceMessage::TranscribingStopped { .. })
        })?;

        self.shared
            .transition(STOP, &[SessionState::Stopping], SessionState::Stopped)?;
        let _ = self.events.send(SessionEvent::Stopped {
            session_id: connection.session_id().to_string(),
        });
        Ok(())
    }

    /// Failures nobody waits for surface as a canceled event
    fn report_unobserved(&self, observed: bool, error: &TranscriberError) {
        if observed || self.shared.state() == SessionState::Closed {
            return;
        }
        self.ensure_delivery();
        let _ = self.events.send(SessionEvent::Failed {
            code: error.error_code(),
            details: error.to_string(),
        });
    }
}

/// Resolves once `flag` is set or its sender is gone
async fn wait_until_set(mut flag: watch::Receiver<bool>) {
    let _ = flag.wait_for(|set| *set).await;
}

impl Shared {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Move to `to` if the current state is one of `from`
    fn transition(
        &self,
        operation: &'static str,
        from: &[SessionState],
        to: SessionState,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        if !from.contains(&state) {
            return Err(TranscriberError::InvalidState {
                operation,
                state: *state,
            });
        }
        debug!("Session state {} -> {}", *state, to);
        *state = to;
        Ok(())
    }

    fn transition_from(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = lock(&self.state);
        if *state != from {
            return false;
        }
        debug!("Session state {} -> {}", from, to);
        *state = to;
        true
    }

    fn replace_state(&self, to: SessionState) -> SessionState {
        std::mem::replace(&mut *lock(&self.state), to)
    }

    fn session_id(&self) -> String {
        lock(&self.session_id).clone().unwrap_or_default()
    }
}

/// Read frames from `source` and stream them until it ends or a stop is requested
///
/// Always finishes with an end-of-stream frame so the service flushes the
/// last utterance. Returns the source so the caller can close it.
async fn pump_audio(
    mut source: Box<dyn AudioSource>,
    connection: Arc<Connection>,
    shared: Arc<Shared>,
    mut stop: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Box<dyn AudioSource> {
    info!("Audio pump started ({})", source.name());

    let format = source.format();
    let mut sequence = 0u64;
    let mut position_ms = 0u64;

    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.changed() => {
                debug!("Audio pump asked to stop");
                break;
            }
            frame = source.read_frame() => frame,
        };

        match frame {
            Ok(Some(frame)) => {
                position_ms = frame.timestamp_ms + format.duration_ms(frame.samples.len());
                let message = ClientMessage::Audio(AudioFrameMessage::from_frame(&frame, sequence));
                if let Err(e) = connection.send(message).await {
                    warn!("Audio pump stopped: {}", e);
                    return source;
                }
                sequence += 1;
                shared.frames_sent.fetch_add(1, Ordering::SeqCst);
            }
            Ok(None) => {
                debug!("Audio source exhausted after {} frames", sequence);
                break;
            }
            Err(e) => {
                error!("Failed to read audio: {}", e);
                let _ = events.send(SessionEvent::Failed {
                    code: ErrorCode::RuntimeError,
                    details: e.to_string(),
                });
                return source;
            }
        }
    }

    let marker = AudioFrameMessage::end_of_stream(format, sequence, position_ms);
    if let Err(e) = connection.send(ClientMessage::Audio(marker)).await {
        debug!("End of stream not sent: {}", e);
    }

    info!("Audio pump stopped after {} frames", sequence);
    source
}

/// Single consumer of session events; every listener runs here
async fn deliver_events(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    let mut delivery = Delivery {
        shared,
        open: HashMap::new(),
        finalized: HashSet::new(),
        canceled: false,
    };

    while let Some(event) = events.recv().await {
        delivery.handle(event);
    }

    debug!("Event delivery finished");
}

/// Per-utterance bookkeeping of the delivery task
struct Delivery {
    shared: Arc<Shared>,
    /// Utterances with intermediate results but no final one yet
    open: HashMap<String, ConversationTranscriptionResult>,
    finalized: HashSet<String>,
    canceled: bool,
}

impl Delivery {
    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Started { session_id } => {
                self.canceled = false;
                self.shared
                    .signals
                    .session_started
                    .emit(&SessionEventArgs { session_id });
            }
            SessionEvent::Stopped { session_id } => {
                self.shared
                    .signals
                    .session_stopped
                    .emit(&SessionEventArgs { session_id });
            }
            SessionEvent::Failed { code, details } => self.cancel(code, details),
            SessionEvent::Connection(event) => self.handle_connection(event),
        }
    }

    fn handle_connection(&mut self, event: ConnectionEvent) {
        let state = self.shared.state();
        if self.canceled || state == SessionState::Closed {
            debug!("Dropping {:?} after session end", event);
            return;
        }

        match event {
            ConnectionEvent::Recognizing(hypothesis) => {
                let result = ConversationTranscriptionResult::from_hypothesis(hypothesis);
                if self.finalized.contains(&result.result_id) {
                    debug!("Dropping late hypothesis for {}", result.result_id);
                    return;
                }
                if let Some(previous) = self.open.get(&result.result_id) {
                    if result.duration < previous.duration {
                        debug!("Dropping out-of-order hypothesis for {}", result.result_id);
                        return;
                    }
                }
                self.open.insert(result.result_id.clone(), result.clone());
                self.emit_result(&self.shared.signals.recognizing, result);
            }
            ConnectionEvent::Recognized(phrase) => {
                let result = ConversationTranscriptionResult::from_phrase(phrase);
                if !self.finalized.insert(result.result_id.clone()) {
                    debug!("Dropping duplicate final result for {}", result.result_id);
                    return;
                }
                self.open.remove(&result.result_id);
                if result.reason == ResultReason::RecognizedSpeech {
                    lock(&self.shared.transcript).push(TranscriptSegment::from(&result));
                }
                info!("Recognized {}: {:?} ({:?})", result.result_id, result.text, result.reason);
                self.emit_result(&self.shared.signals.recognized, result);
            }
            ConnectionEvent::Fault { code, message } => {
                if matches!(state, SessionState::Streaming | SessionState::Stopping) {
                    self.cancel(code, message);
                } else {
                    warn!("Service fault while {}: {}", state, message);
                }
            }
            ConnectionEvent::Disconnected { message } => {
                if matches!(state, SessionState::Streaming | SessionState::Stopping) {
                    self.cancel(ErrorCode::ConnectionFailure, message);
                } else {
                    info!("Connection lost while {}: {}", state, message);
                }
            }
        }
    }

    fn emit_result(&self, signal: &EventSignal<TranscriptionEventArgs>, result: ConversationTranscriptionResult) {
        signal.emit(&TranscriptionEventArgs {
            session_id: self.shared.session_id(),
            result,
        });
    }

    /// End the session abnormally; each open utterance gets a canceled final first
    fn cancel(&mut self, code: ErrorCode, details: String) {
        if self.canceled {
            debug!("Session already canceled, ignoring {}: {}", code, details);
            return;
        }
        self.canceled = true;

        for active in [SessionState::Starting, SessionState::Streaming, SessionState::Stopping] {
            if self.shared.transition_from(active, SessionState::Canceled) {
                break;
            }
        }

        let mut open: Vec<_> = self.open.drain().map(|(_, partial)| partial).collect();
        open.sort_by_key(|partial| partial.offset);
        for partial in open {
            self.finalized.insert(partial.result_id.clone());
            self.emit_result(
                &self.shared.signals.recognized,
                ConversationTranscriptionResult::canceled_from(&partial),
            );
        }

        error!("Session canceled ({}): {}", code, details);
        self.shared.signals.canceled.emit(&CanceledEventArgs {
            session_id: self.shared.session_id(),
            error_code: code,
            error_details: details,
        });
    }
}
