//! In-process emulation of the recognition service.
//!
//! `LoopbackTransport` answers the wire protocol without a network:
//! - handshake, start/stop and roster requests are acknowledged in order
//! - utterances are found with an RMS energy detector over the streamed
//!   audio and transcribed from a fixed script, one entry per utterance
//! - partial hypotheses grow one word per `hypothesis_interval_ms` of speech
//! - faults (authentication failure, fatal error, dropped link) can be
//!   injected to exercise cancellation paths

use super::messages::{
    AudioFrameMessage, ClientMessage, ErrorCode, HypothesisMessage, ParticipantPayload,
    PhraseMessage, PhraseStatus, RosterAction, RosterOutcome, ServiceMessage, WordMessage,
};
use super::transport::{Channel, Transport, OUTBOUND_CAPACITY};
use crate::audio::AudioFormat;
use crate::error::Result;
use crate::session::OutputFormat;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Speaker label used when no enrolled participant can be attributed
pub const UNIDENTIFIED_SPEAKER: &str = "Unidentified";

/// Utterance detection settings
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// RMS threshold for speech (0.0 to 1.0)
    pub speech_threshold: f32,
    /// Silence that ends an utterance (milliseconds)
    pub silence_ms: u64,
    /// Speech between two hypotheses (milliseconds)
    pub hypothesis_interval_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.02,
            silence_ms: 300,
            hypothesis_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Fatal service error after N audio frames
    ErrorAfterFrames(u64, ErrorCode),
    /// Link drops without a message after N audio frames
    DropAfterFrames(u64),
    /// Handshake rejected
    RejectHandshake(ErrorCode),
}

#[derive(Default)]
struct LoopbackState {
    rosters: Mutex<HashMap<String, Vec<ParticipantPayload>>>,
    audio_frames: AtomicU64,
    connections: AtomicUsize,
}

/// Transport backed by an emulated service running on a Tokio task
#[derive(Clone)]
pub struct LoopbackTransport {
    transcripts: Arc<Vec<String>>,
    segmenter: SegmenterConfig,
    fault: Option<Fault>,
    state: Arc<LoopbackState>,
}

impl LoopbackTransport {
    /// `transcripts[i]` is the text recognized for the i-th detected utterance
    pub fn new<I, S>(transcripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transcripts: Arc::new(transcripts.into_iter().map(Into::into).collect()),
            segmenter: SegmenterConfig::default(),
            fault: None,
            state: Arc::new(LoopbackState::default()),
        }
    }

    pub fn with_segmenter(mut self, segmenter: SegmenterConfig) -> Self {
        self.segmenter = segmenter;
        self
    }

    pub fn reject_handshake(mut self, code: ErrorCode) -> Self {
        self.fault = Some(Fault::RejectHandshake(code));
        self
    }

    pub fn fail_after_audio_frames(mut self, frames: u64, code: ErrorCode) -> Self {
        self.fault = Some(Fault::ErrorAfterFrames(frames, code));
        self
    }

    pub fn drop_after_audio_frames(mut self, frames: u64) -> Self {
        self.fault = Some(Fault::DropAfterFrames(frames));
        self
    }

    /// Participant ids the emulated service holds for a conversation
    pub fn roster(&self, conversation_id: &str) -> Vec<String> {
        self.state
            .rosters
            .lock()
            .map(|rosters| {
                rosters
                    .get(conversation_id)
                    .map(|entries| entries.iter().map(|p| p.id.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Audio frames received across all connections
    pub fn audio_frames_received(&self) -> u64 {
        self.state.audio_frames.load(Ordering::SeqCst)
    }

    /// Number of channels opened so far
    pub fn connections_opened(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self, conversation_id: &str) -> Result<Channel> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        self.state.connections.fetch_add(1, Ordering::SeqCst);
        info!("Loopback service accepted {}", conversation_id);

        let session = ServiceSession::new(self.clone(), conversation_id.to_string());
        tokio::spawn(session.run(outbound_rx, inbound_tx));

        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

/// What the service does after handling one client message
#[derive(Debug, Default)]
struct Step {
    replies: Vec<ServiceMessage>,
    hang_up: bool,
}

impl Step {
    fn reply(message: ServiceMessage) -> Self {
        Self {
            replies: vec![message],
            hang_up: false,
        }
    }
}

struct ServiceSession {
    transport: LoopbackTransport,
    conversation_id: String,
    connected: bool,
    streaming: bool,
    output_format: OutputFormat,
    segmenter: Segmenter,
    hypothesis_words: HashMap<usize, usize>,
    frames_seen: u64,
}

impl ServiceSession {
    fn new(transport: LoopbackTransport, conversation_id: String) -> Self {
        let segmenter = Segmenter::new(transport.segmenter);
        Self {
            transport,
            conversation_id,
            connected: false,
            streaming: false,
            output_format: OutputFormat::Simple,
            segmenter,
            hypothesis_words: HashMap::new(),
            frames_seen: 0,
        }
    }

    async fn run(
        mut self,
        mut client_rx: mpsc::Receiver<ClientMessage>,
        service_tx: mpsc::Sender<Result<ServiceMessage>>,
    ) {
        while let Some(message) = client_rx.recv().await {
            let step = self.handle(message);
            for reply in step.replies {
                if service_tx.send(Ok(reply)).await.is_err() {
                    return;
                }
            }
            if step.hang_up {
                break;
            }
        }
        debug!("Loopback service for {} stopped", self.conversation_id);
    }

    fn handle(&mut self, message: ClientMessage) -> Step {
        match message {
            ClientMessage::Connect {
                request_id,
                conversation_id,
                output_format,
                ..
            } => {
                if let Some(Fault::RejectHandshake(code)) = self.transport.fault {
                    return Step {
                        replies: vec![ServiceMessage::Error {
                            request_id: Some(request_id),
                            code,
                            message: "handshake rejected".to_string(),
                        }],
                        hang_up: true,
                    };
                }
                self.connected = true;
                self.conversation_id = conversation_id;
                self.output_format = output_format;
                Step::reply(ServiceMessage::Connected {
                    request_id,
                    session_id: Uuid::new_v4().simple().to_string(),
                })
            }
            ClientMessage::Ping => Step::reply(ServiceMessage::Pong),
            ClientMessage::Disconnect => Step {
                replies: Vec::new(),
                hang_up: true,
            },
            _ if !self.connected => Step::reply(ServiceMessage::Error {
                request_id: None,
                code: ErrorCode::BadRequest,
                message: "handshake required".to_string(),
            }),
            ClientMessage::StartTranscribing { request_id } => {
                self.streaming = true;
                Step::reply(ServiceMessage::TranscribingStarted { request_id })
            }
            ClientMessage::Audio(frame) => self.handle_audio(frame),
            ClientMessage::UpdateRoster {
                request_id,
                action,
                participant,
            } => Step::reply(ServiceMessage::RosterUpdated {
                request_id,
                outcome: self.update_roster(action, participant),
            }),
            ClientMessage::StopTranscribing { request_id } => {
                let mut replies = self.flush();
                self.streaming = false;
                replies.push(ServiceMessage::TranscribingStopped { request_id });
                Step {
                    replies,
                    hang_up: false,
                }
            }
        }
    }

    fn handle_audio(&mut self, frame: AudioFrameMessage) -> Step {
        if !self.streaming {
            return Step::reply(ServiceMessage::Error {
                request_id: None,
                code: ErrorCode::BadRequest,
                message: "audio received before start".to_string(),
            });
        }

        if frame.final_frame {
            return Step {
                replies: self.flush(),
                hang_up: false,
            };
        }

        self.frames_seen += 1;
        self.transport.state.audio_frames.fetch_add(1, Ordering::SeqCst);

        match self.transport.fault {
            Some(Fault::ErrorAfterFrames(limit, code)) if self.frames_seen > limit => {
                return Step {
                    replies: vec![ServiceMessage::Error {
                        request_id: None,
                        code,
                        message: format!("injected failure after {} frames", limit),
                    }],
                    hang_up: true,
                };
            }
            Some(Fault::DropAfterFrames(limit)) if self.frames_seen > limit => {
                warn!("Loopback service dropping link after {} frames", limit);
                return Step {
                    replies: Vec::new(),
                    hang_up: true,
                };
            }
            _ => {}
        }

        let samples = match frame.samples() {
            Ok(samples) => samples,
            Err(e) => {
                return Step::reply(ServiceMessage::Error {
                    request_id: None,
                    code: ErrorCode::BadRequest,
                    message: format!("undecodable audio payload: {}", e),
                })
            }
        };
        let format = AudioFormat::pcm16(frame.sample_rate, frame.channels);

        let events = self.segmenter.process(&samples, format);
        let replies = events.into_iter().filter_map(|e| self.render(e)).collect();
        Step {
            replies,
            hang_up: false,
        }
    }

    fn flush(&mut self) -> Vec<ServiceMessage> {
        self.segmenter
            .flush()
            .into_iter()
            .filter_map(|e| self.render(e))
            .collect()
    }

    fn render(&mut self, event: SegmentEvent) -> Option<ServiceMessage> {
        let script = self.transport.transcripts.get(event.index).cloned();
        let utterance_id = format!("{}-{}", self.conversation_id, event.index);

        match event.kind {
            SegmentKind::Progress => {
                let script = script?;
                let words: Vec<&str> = script.split_whitespace().collect();
                let shown = self.hypothesis_words.entry(event.index).or_insert(0);
                *shown = (*shown + 1).min(words.len());
                Some(ServiceMessage::Hypothesis(HypothesisMessage {
                    utterance_id,
                    text: words[..*shown].join(" "),
                    offset_ms: event.offset_ms,
                    duration_ms: event.duration_ms,
                }))
            }
            SegmentKind::Completed => {
                self.hypothesis_words.remove(&event.index);
                let detailed = self.output_format == OutputFormat::Detailed;
                let phrase = match script {
                    Some(text) => PhraseMessage {
                        utterance_id,
                        status: PhraseStatus::Success,
                        words: detailed.then(|| word_timings(&text, &event)),
                        confidence: detailed.then_some(0.92),
                        user_id: Some(self.attributed_speaker()),
                        text,
                        offset_ms: event.offset_ms,
                        duration_ms: event.duration_ms,
                    },
                    None => PhraseMessage {
                        utterance_id,
                        status: PhraseStatus::NoMatch,
                        text: String::new(),
                        offset_ms: event.offset_ms,
                        duration_ms: event.duration_ms,
                        user_id: None,
                        confidence: None,
                        words: None,
                    },
                };
                Some(ServiceMessage::Phrase(phrase))
            }
        }
    }

    fn update_roster(&mut self, action: RosterAction, participant: ParticipantPayload) -> RosterOutcome {
        let Ok(mut rosters) = self.transport.state.rosters.lock() else {
            return RosterOutcome::Rejected {
                message: "roster unavailable".to_string(),
            };
        };
        let roster = rosters.entry(self.conversation_id.clone()).or_default();

        match action {
            RosterAction::Add => {
                if let Some(signature) = &participant.voice_signature {
                    if !is_well_formed_signature(signature) {
                        return RosterOutcome::Rejected {
                            message: format!("malformed voice signature for {}", participant.id),
                        };
                    }
                }
                match roster.iter_mut().find(|p| p.id == participant.id) {
                    Some(existing) => *existing = participant,
                    None => roster.push(participant),
                }
                RosterOutcome::Applied
            }
            RosterAction::Remove => match roster.iter().position(|p| p.id == participant.id) {
                Some(index) => {
                    roster.remove(index);
                    RosterOutcome::Applied
                }
                None => RosterOutcome::NotFound,
            },
        }
    }

    fn attributed_speaker(&self) -> String {
        let Ok(rosters) = self.transport.state.rosters.lock() else {
            return UNIDENTIFIED_SPEAKER.to_string();
        };
        rosters
            .get(&self.conversation_id)
            .and_then(|roster| roster.iter().find(|p| p.voice_signature.is_some()))
            .map(|p| p.id.clone())
            .unwrap_or_else(|| UNIDENTIFIED_SPEAKER.to_string())
    }
}

/// Voice signatures are comma-separated numeric features
fn is_well_formed_signature(signature: &str) -> bool {
    signature
        .split(',')
        .all(|part| part.trim().parse::<f64>().is_ok())
}

fn word_timings(text: &str, event: &SegmentEvent) -> Vec<WordMessage> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let per_word = event.duration_ms / words.len() as u64;
    words
        .iter()
        .enumerate()
        .map(|(i, word)| WordMessage {
            word: word.to_string(),
            offset_ms: event.offset_ms + per_word * i as u64,
            duration_ms: per_word,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Progress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegmentEvent {
    kind: SegmentKind,
    index: usize,
    offset_ms: u64,
    duration_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct ActiveUtterance {
    index: usize,
    start_ms: u64,
    speech_end_ms: u64,
    last_hypothesis_ms: u64,
}

/// RMS energy utterance detector
struct Segmenter {
    config: SegmenterConfig,
    samples_seen: usize,
    format: Option<AudioFormat>,
    active: Option<ActiveUtterance>,
    next_index: usize,
}

impl Segmenter {
    fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            samples_seen: 0,
            format: None,
            active: None,
            next_index: 0,
        }
    }

    fn process(&mut self, samples: &[i16], format: AudioFormat) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        self.format = Some(format);

        let frame_start_ms = format.duration_ms(self.samples_seen);
        self.samples_seen += samples.len();
        let frame_end_ms = format.duration_ms(self.samples_seen);
        let is_speech = calculate_rms(samples) > self.config.speech_threshold;

        if is_speech {
            let active = self.active.get_or_insert_with(|| {
                let index = self.next_index;
                self.next_index += 1;
                ActiveUtterance {
                    index,
                    start_ms: frame_start_ms,
                    speech_end_ms: frame_start_ms,
                    last_hypothesis_ms: frame_start_ms,
                }
            });
            active.speech_end_ms = frame_end_ms;

            if active.speech_end_ms - active.last_hypothesis_ms >= self.config.hypothesis_interval_ms {
                active.last_hypothesis_ms = active.speech_end_ms;
                events.push(SegmentEvent {
                    kind: SegmentKind::Progress,
                    index: active.index,
                    offset_ms: active.start_ms,
                    duration_ms: active.speech_end_ms - active.start_ms,
                });
            }
        } else if let Some(active) = self.active {
            if frame_end_ms - active.speech_end_ms >= self.config.silence_ms {
                events.extend(self.complete());
            }
        }

        events
    }

    /// Complete the utterance in progress, if any
    fn flush(&mut self) -> Vec<SegmentEvent> {
        self.complete().into_iter().collect()
    }

    fn complete(&mut self) -> Option<SegmentEvent> {
        let active = self.active.take()?;
        Some(SegmentEvent {
            kind: SegmentKind::Completed,
            index: active.index,
            offset_ms: active.start_ms,
            duration_ms: active.speech_end_ms - active.start_ms,
        })
    }
}

/// Root-mean-square level of 16-bit samples, normalized to 0.0..=1.0
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}
