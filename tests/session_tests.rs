// Integration tests for conversation transcription sessions
//
// Every test runs a transcriber against the in-process loopback service, so
// the full path (audio source, connection, service, event delivery) is
// exercised without a network.

mod common;

use anyhow::{Context, Result};
use common::{conference_room_fixture, speech_config, transcriber, write_wav, Segment, UTTERANCE};
use conversation_transcriber::connection::{Channel, ClientMessage, ServiceMessage};
use conversation_transcriber::{
    AudioConfig, AudioFormat, ConversationTranscriber, ConversationTranscriptionResult, ErrorCode,
    LoopbackTransport, OutputFormat, Participant, PushAudioInputStream, ResultReason,
    SessionState, TranscriberError, Transport, User,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(30);

/// Everything a transcriber reported, in delivery order
#[derive(Debug, Clone, PartialEq)]
enum Observed {
    Started,
    Recognizing(ConversationTranscriptionResult),
    Recognized(ConversationTranscriptionResult),
    Canceled(ErrorCode),
    Stopped,
}

fn observe(transcriber: &ConversationTranscriber) -> (Arc<Mutex<Vec<Observed>>>, mpsc::UnboundedReceiver<Observed>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::unbounded_channel();

    let record = {
        let log = Arc::clone(&log);
        move |event: Observed| {
            log.lock().unwrap().push(event.clone());
            let _ = tx.send(event);
        }
    };

    let r = record.clone();
    transcriber.session_started().add_listener(move |_| r(Observed::Started));
    let r = record.clone();
    transcriber
        .recognizing()
        .add_listener(move |e| r(Observed::Recognizing(e.result.clone())));
    let r = record.clone();
    transcriber
        .recognized()
        .add_listener(move |e| r(Observed::Recognized(e.result.clone())));
    let r = record.clone();
    transcriber
        .canceled()
        .add_listener(move |e| r(Observed::Canceled(e.error_code)));
    let r = record;
    transcriber.session_stopped().add_listener(move |_| r(Observed::Stopped));

    (log, rx)
}

async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<Observed>,
    wanted: impl Fn(&Observed) -> bool,
) -> Result<Observed> {
    tokio::time::timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            if wanted(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .context("timed out waiting for event")?
    .context("event stream ended")
}

fn recognized(log: &[Observed]) -> Vec<ConversationTranscriptionResult> {
    log.iter()
        .filter_map(|e| match e {
            Observed::Recognized(result) => Some(result.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_conference_room_recording_yields_one_final_result() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;
    let (log, mut events) = observe(&transcriber);

    transcriber.start_transcribing_async().wait_timeout(WAIT).await?;
    assert_eq!(transcriber.state(), SessionState::Streaming);

    transcriber.add_participant("katie@example.com").await?;

    let Observed::Recognized(result) =
        next_matching(&mut events, |e| matches!(e, Observed::Recognized(_))).await?
    else {
        unreachable!()
    };
    assert_eq!(result.text, UTTERANCE);
    assert_eq!(result.reason, ResultReason::RecognizedSpeech);

    transcriber.stop_transcribing_async().wait_timeout(WAIT).await?;
    next_matching(&mut events, |e| *e == Observed::Stopped).await?;
    assert_eq!(transcriber.state(), SessionState::Stopped);

    let log = log.lock().unwrap().clone();
    assert_eq!(recognized(&log).len(), 1, "exactly one final result: {:?}", log);
    assert_eq!(log.first(), Some(&Observed::Started));
    assert_eq!(log.last(), Some(&Observed::Stopped));

    // Intermediate results grow toward the final text and precede it
    let final_at = log
        .iter()
        .position(|e| matches!(e, Observed::Recognized(_)))
        .unwrap();
    let partials: Vec<_> = log
        .iter()
        .filter_map(|e| match e {
            Observed::Recognizing(r) => Some(r.clone()),
            _ => None,
        })
        .collect();
    assert!(!partials.is_empty());
    assert!(log[final_at + 1..]
        .iter()
        .all(|e| !matches!(e, Observed::Recognizing(_))));
    for pair in partials.windows(2) {
        assert!(pair[0].duration <= pair[1].duration);
    }
    for partial in &partials {
        assert_eq!(partial.result_id, result.result_id);
        assert!(UTTERANCE.starts_with(&partial.text));
    }

    let stats = transcriber.stats().await;
    assert_eq!(stats.participants_count, 1);
    assert_eq!(stats.transcript_segments_count, 1);
    assert!(stats.audio_frames_sent >= 20, "two seconds in 100ms frames");
    assert_eq!(transcriber.transcript()[0].text, UTTERANCE);

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_stop_before_start_is_invalid_state() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;

    let err = transcriber
        .stop_transcribing_async()
        .wait()
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TranscriberError::InvalidState {
            operation: "stop transcribing",
            state: SessionState::Idle,
        }
    );
    assert!(err.is_local());
    assert_eq!(service.connections_opened(), 0);

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_start_twice_is_invalid_state() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;

    let mut first = transcriber.start_transcribing_async();
    let second = transcriber.start_transcribing_async().wait().await;
    assert!(matches!(second, Err(TranscriberError::InvalidState { .. })));

    first.wait_timeout(WAIT).await?;
    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_close_twice_and_use_after_close() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;

    transcriber.start_transcribing_async().wait_timeout(WAIT).await?;

    transcriber.close().await;
    transcriber.close().await;
    assert_eq!(transcriber.state(), SessionState::Closed);

    let closed = |operation| TranscriberError::InvalidState {
        operation,
        state: SessionState::Closed,
    };
    assert_eq!(
        transcriber.add_participant("late@example.com").await,
        Err(closed("add participant"))
    );
    assert_eq!(
        transcriber.start_transcribing_async().wait().await,
        Err(closed("start transcribing"))
    );
    assert_eq!(
        transcriber.stop_transcribing_async().wait().await,
        Err(closed("stop transcribing"))
    );
    assert_eq!(
        transcriber.set_conversation_id("another"),
        Err(closed("set conversation id"))
    );
    Ok(())
}

#[tokio::test]
async fn test_remove_absent_participant_is_not_found() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;

    transcriber.add_participant("present@example.com").await?;
    let before = transcriber.participants().await;

    let err = transcriber
        .remove_participant("absent@example.com")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TranscriberError::NotFound {
            id: "absent@example.com".to_string()
        }
    );
    assert_eq!(transcriber.participants().await, before);
    assert_eq!(
        service.roster(&transcriber.conversation_id()),
        vec!["present@example.com".to_string()]
    );

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_add_then_remove_in_every_identity_form() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;
    let conversation = transcriber.conversation_id();

    // Raw user id
    transcriber.add_participant("raw@example.com").await?;
    transcriber.remove_participant("raw@example.com").await?;
    assert!(transcriber.participants().await.is_empty());

    // User
    let user = User::from_user_id("user@example.com");
    transcriber.add_participant(&user).await?;
    assert_eq!(service.roster(&conversation), vec!["user@example.com".to_string()]);
    transcriber.remove_participant(&user).await?;
    assert!(transcriber.participants().await.is_empty());

    // Participant with language and voice signature
    let participant = Participant::from_details("guest@example.com", "fr-FR", "0.12,0.56,0.33")?;
    transcriber.add_participant(&participant).await?;
    assert_eq!(transcriber.participants().await, vec![participant.clone()]);
    transcriber.remove_participant(&participant).await?;

    assert!(transcriber.participants().await.is_empty());
    assert!(service.roster(&conversation).is_empty());

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_roster_mutations_are_all_applied() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;

    let ids: Vec<String> = (0..8).map(|i| format!("member{}@example.com", i)).collect();
    let results =
        futures::future::join_all(ids.iter().map(|id| transcriber.add_participant(id.as_str()))).await;
    assert!(results.iter().all(Result::is_ok));

    let local: Vec<String> = transcriber
        .participants()
        .await
        .iter()
        .map(|p| p.id().to_string())
        .collect();
    assert_eq!(local, ids);

    let mut remote = service.roster(&transcriber.conversation_id());
    remote.sort();
    assert_eq!(remote, ids);

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_malformed_voice_signature_rejected_by_service() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;

    // Non-blank, so locally acceptable; the service cannot parse it
    let participant = Participant::from_details("odd@example.com", "en-US", "{not a signature}")?;
    let err = transcriber.add_participant(participant).await.unwrap_err();

    assert!(matches!(
        err,
        TranscriberError::Service {
            code: ErrorCode::BadRequest,
            ..
        }
    ));
    assert!(err.reached_service());
    assert!(transcriber.participants().await.is_empty());

    // Blank identities never reach the service
    let err = transcriber.add_participant("  ").await.unwrap_err();
    assert!(matches!(err, TranscriberError::InvalidArgument { .. }));
    assert!(err.is_local());

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_voice_signature_attributes_speaker() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;
    let (_log, mut events) = observe(&transcriber);

    transcriber
        .add_participant(Participant::from_details("katie@example.com", "en-US", "0.5,0.25")?)
        .await?;
    transcriber.start_transcribing_async().wait_timeout(WAIT).await?;

    let Observed::Recognized(result) =
        next_matching(&mut events, |e| matches!(e, Observed::Recognized(_))).await?
    else {
        unreachable!()
    };
    assert_eq!(result.user_id.as_deref(), Some("katie@example.com"));
    assert_eq!(transcriber.transcript()[0].user_id.as_deref(), Some("katie@example.com"));

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_conversation_id_round_trip_and_validation() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;

    for id in ["weekly-sync", "Réunion d'équipe (salle 4)", "ÄÖÜ ß ¿qué?"] {
        transcriber.set_conversation_id(id)?;
        assert_eq!(transcriber.conversation_id(), id);
    }

    for bad in ["", "会议", "tab\tseparated"] {
        let err = transcriber.set_conversation_id(bad).unwrap_err();
        assert!(matches!(err, TranscriberError::InvalidArgument { .. }), "{:?}", bad);
    }
    assert_eq!(transcriber.conversation_id(), "ÄÖÜ ß ¿qué?");

    // Fixed once the service knows the conversation
    transcriber.add_participant("host@example.com").await?;
    assert!(matches!(
        transcriber.set_conversation_id("renamed"),
        Err(TranscriberError::InvalidState { .. })
    ));
    assert_eq!(
        service.roster("ÄÖÜ ß ¿qué?"),
        vec!["host@example.com".to_string()]
    );

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_stop_right_after_recognition_begins_still_delivers_final() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wav = dir.path().join("long.wav");
    // Speech runs into the end of the file, so only end of stream closes it
    write_wav(&wav, 1, &[Segment::Silence(100), Segment::Tone(3000)])?;

    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;
    let (log, mut events) = observe(&transcriber);

    transcriber.start_transcribing_async().wait_timeout(WAIT).await?;
    next_matching(&mut events, |e| matches!(e, Observed::Recognizing(_))).await?;
    transcriber.stop_transcribing_async().wait_timeout(WAIT).await?;
    next_matching(&mut events, |e| *e == Observed::Stopped).await?;

    let log = log.lock().unwrap().clone();
    let finals = recognized(&log);
    assert_eq!(finals.len(), 1, "{:?}", log);
    assert_eq!(finals[0].reason, ResultReason::RecognizedSpeech);
    assert_eq!(finals[0].text, UTTERANCE);

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_service_fault_cancels_open_utterance() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    // 2 silent frames, then 4 frames of speech before the failure
    let service = LoopbackTransport::new([UTTERANCE]).fail_after_audio_frames(6, ErrorCode::ServiceError);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;
    let (log, mut events) = observe(&transcriber);

    transcriber.start_transcribing_async().wait_timeout(WAIT).await?;
    let canceled = next_matching(&mut events, |e| matches!(e, Observed::Canceled(_))).await?;
    assert_eq!(canceled, Observed::Canceled(ErrorCode::ServiceError));
    assert_eq!(transcriber.state(), SessionState::Canceled);

    let log = log.lock().unwrap().clone();
    let finals = recognized(&log);
    assert_eq!(finals.len(), 1, "the open utterance gets a final result: {:?}", log);
    assert_eq!(finals[0].reason, ResultReason::Canceled);
    assert_eq!(log.last(), Some(&canceled));

    assert!(matches!(
        transcriber.stop_transcribing_async().wait().await,
        Err(TranscriberError::InvalidState {
            state: SessionState::Canceled,
            ..
        })
    ));
    assert!(matches!(
        transcriber.add_participant("late@example.com").await,
        Err(TranscriberError::InvalidState { .. })
    ));

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_dropped_link_cancels_with_connection_failure() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]).drop_after_audio_frames(2);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;
    let (_log, mut events) = observe(&transcriber);

    transcriber.start_transcribing_async().wait_timeout(WAIT).await?;
    let canceled = next_matching(&mut events, |e| matches!(e, Observed::Canceled(_))).await?;
    assert_eq!(canceled, Observed::Canceled(ErrorCode::ConnectionFailure));
    assert_eq!(transcriber.state(), SessionState::Canceled);

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_rejected_handshake_fails_start_and_allows_retry_state() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]).reject_handshake(ErrorCode::AuthenticationFailure);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;

    let err = transcriber
        .start_transcribing_async()
        .wait_timeout(WAIT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TranscriberError::Service {
            code: ErrorCode::AuthenticationFailure,
            ..
        }
    ));
    assert!(err.reached_service());
    assert_eq!(transcriber.state(), SessionState::Idle);

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_unobserved_start_failure_raises_canceled() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]).reject_handshake(ErrorCode::Forbidden);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;
    let (_log, mut events) = observe(&transcriber);

    drop(transcriber.start_transcribing_async());

    let canceled = next_matching(&mut events, |e| matches!(e, Observed::Canceled(_))).await?;
    assert_eq!(canceled, Observed::Canceled(ErrorCode::Forbidden));

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_detailed_output_carries_word_timing() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = ConversationTranscriber::with_transport(
        speech_config().with_output_format(OutputFormat::Detailed),
        AudioConfig::from_wav_file_input(&wav),
        Arc::new(service.clone()),
    )?;
    let (_log, mut events) = observe(&transcriber);

    transcriber.start_transcribing_async().wait_timeout(WAIT).await?;
    let Observed::Recognized(result) =
        next_matching(&mut events, |e| matches!(e, Observed::Recognized(_))).await?
    else {
        unreachable!()
    };

    assert!(result.confidence.is_some());
    assert_eq!(result.words.len(), UTTERANCE.split_whitespace().count());
    for pair in result.words.windows(2) {
        assert!(pair[0].offset < pair[1].offset);
    }

    transcriber.close().await;
    Ok(())
}

#[tokio::test]
async fn test_push_stream_transcription() -> Result<()> {
    let format = AudioFormat::pcm16(16000, 1);
    let (writer, stream) = PushAudioInputStream::create(format);

    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = transcriber(&service, AudioConfig::from_stream_input(stream))?;
    let (_log, mut events) = observe(&transcriber);

    transcriber.start_transcribing_async().wait_timeout(WAIT).await?;

    let tone: Vec<u8> = (0..16000)
        .flat_map(|i: i32| {
            let sample = if i % 2 == 0 { 9000i16 } else { -9000 };
            sample.to_le_bytes()
        })
        .collect();
    writer.write(&tone).await?;
    writer.write(&vec![0u8; 16000]).await?; // 500ms of silence
    writer.close();

    let Observed::Recognized(result) =
        next_matching(&mut events, |e| matches!(e, Observed::Recognized(_))).await?
    else {
        unreachable!()
    };
    assert_eq!(result.text, UTTERANCE);

    tokio::time::timeout(WAIT, transcriber.audio_finished()).await?;
    transcriber.stop_transcribing_async().wait_timeout(WAIT).await?;
    assert!(transcriber.stats().await.audio_frames_sent >= 15);

    transcriber.close().await;
    Ok(())
}

/// Transport whose service accepts the link but never answers
struct SilentTransport {
    held: Mutex<Vec<mpsc::Sender<conversation_transcriber::Result<ServiceMessage>>>>,
    sunk: Mutex<Vec<mpsc::Receiver<ClientMessage>>>,
}

#[async_trait::async_trait]
impl Transport for SilentTransport {
    async fn open(&self, _conversation_id: &str) -> conversation_transcriber::Result<Channel> {
        let (outbound, sunk) = mpsc::channel(16);
        let (held, inbound) = mpsc::channel(16);
        self.held.lock().unwrap().push(held);
        self.sunk.lock().unwrap().push(sunk);
        Ok(Channel { outbound, inbound })
    }

    fn name(&self) -> &str {
        "silent"
    }
}

#[tokio::test]
async fn test_close_unblocks_pending_operations() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let silent = Arc::new(SilentTransport {
        held: Mutex::new(Vec::new()),
        sunk: Mutex::new(Vec::new()),
    });
    let transcriber = Arc::new(ConversationTranscriber::with_transport(
        speech_config(),
        AudioConfig::from_wav_file_input(&wav),
        silent,
    )?);

    // Holds the roster lock while the handshake goes unanswered
    let adding = {
        let transcriber = Arc::clone(&transcriber);
        tokio::spawn(async move { transcriber.add_participant("waiting@example.com").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut start = transcriber.start_transcribing_async();
    let err = start.wait_timeout(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, TranscriberError::Timeout { .. }));
    assert!(!start.is_done(), "a timed-out wait leaves the operation running");

    transcriber.close().await;

    let closed = SessionState::Closed;
    assert!(matches!(
        start.wait_timeout(WAIT).await,
        Err(TranscriberError::InvalidState { state, .. }) if state == closed
    ));
    assert!(matches!(
        adding.await?,
        Err(TranscriberError::InvalidState { state, .. }) if state == closed
    ));
    Ok(())
}

#[tokio::test]
async fn test_roster_changes_rejected_while_starting() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let silent = Arc::new(SilentTransport {
        held: Mutex::new(Vec::new()),
        sunk: Mutex::new(Vec::new()),
    });
    let transcriber = ConversationTranscriber::with_transport(
        speech_config(),
        AudioConfig::from_wav_file_input(&wav),
        silent,
    )?;

    // The handshake is never answered, so the session stays Starting
    let _start = transcriber.start_transcribing_async();
    assert_eq!(transcriber.state(), SessionState::Starting);

    let err = transcriber.add_participant("katie@example.com").await.unwrap_err();
    assert_eq!(
        err,
        TranscriberError::InvalidState {
            operation: "add participant",
            state: SessionState::Starting,
        }
    );

    let err = transcriber.remove_participant("katie@example.com").await.unwrap_err();
    assert_eq!(
        err,
        TranscriberError::InvalidState {
            operation: "remove participant",
            state: SessionState::Starting,
        }
    );
    assert!(transcriber.participants().await.is_empty());

    transcriber.close().await;
    Ok(())
}

/// Loopback service whose stop acknowledgments never arrive
struct StopAckWithheld(LoopbackTransport);

#[async_trait::async_trait]
impl Transport for StopAckWithheld {
    async fn open(&self, conversation_id: &str) -> conversation_transcriber::Result<Channel> {
        let mut channel = self.0.open(conversation_id).await?;
        let (forward, inbound) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(message) = channel.inbound.recv().await {
                if matches!(message, Ok(ServiceMessage::TranscribingStopped { .. })) {
                    continue;
                }
                if forward.send(message).await.is_err() {
                    break;
                }
            }
        });
        Ok(Channel {
            outbound: channel.outbound,
            inbound,
        })
    }

    fn name(&self) -> &str {
        "stop-ack-withheld"
    }
}

#[tokio::test]
async fn test_roster_changes_rejected_while_stopping() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]);
    let transcriber = ConversationTranscriber::with_transport(
        speech_config(),
        AudioConfig::from_wav_file_input(&wav),
        Arc::new(StopAckWithheld(service.clone())),
    )?;

    transcriber.add_participant("katie@example.com").await?;
    transcriber.start_transcribing_async().wait_timeout(WAIT).await?;

    let _stop = transcriber.stop_transcribing_async();
    assert_eq!(transcriber.state(), SessionState::Stopping);

    let err = transcriber.add_participant("steve@example.com").await.unwrap_err();
    assert_eq!(
        err,
        TranscriberError::InvalidState {
            operation: "add participant",
            state: SessionState::Stopping,
        }
    );

    let err = transcriber.remove_participant("katie@example.com").await.unwrap_err();
    assert_eq!(
        err,
        TranscriberError::InvalidState {
            operation: "remove participant",
            state: SessionState::Stopping,
        }
    );

    let ids: Vec<String> = transcriber
        .participants()
        .await
        .iter()
        .map(|p| p.id().to_string())
        .collect();
    assert_eq!(ids, vec!["katie@example.com"]);
    assert_eq!(service.roster(&transcriber.conversation_id()), ids);

    transcriber.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_right_after_start_ends_the_audio_pump() -> Result<()> {
    for _ in 0..20 {
        // The writer stays open, so only a stop request ends the pump
        let (_writer, stream) = PushAudioInputStream::create(AudioFormat::pcm16(16000, 1));
        let service = LoopbackTransport::new([UTTERANCE]);
        let transcriber = transcriber(&service, AudioConfig::from_stream_input(stream))?;

        transcriber.start_transcribing_async().wait_timeout(WAIT).await?;
        transcriber.stop_transcribing_async().wait_timeout(WAIT).await?;

        tokio::time::timeout(Duration::from_secs(5), transcriber.audio_finished())
            .await
            .context("audio pump still running after stop")?;
        assert_eq!(transcriber.state(), SessionState::Stopped);

        transcriber.close().await;
    }
    Ok(())
}

#[tokio::test]
async fn test_held_start_handle_receives_failure_instead_of_canceled() -> Result<()> {
    let (_dir, wav) = conference_room_fixture()?;
    let service = LoopbackTransport::new([UTTERANCE]).reject_handshake(ErrorCode::Forbidden);
    let transcriber = transcriber(&service, AudioConfig::from_wav_file_input(&wav))?;
    let (log, _events) = observe(&transcriber);

    let start = transcriber.start_transcribing_async();
    tokio::time::timeout(WAIT, async {
        while !start.is_done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("start never resolved")?;

    assert!(matches!(
        start.try_result(),
        Some(Err(TranscriberError::Service {
            code: ErrorCode::Forbidden,
            ..
        }))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        !log.lock().unwrap().iter().any(|e| matches!(e, Observed::Canceled(_))),
        "a held handle already reports the failure"
    );

    transcriber.close().await;
    Ok(())
}
