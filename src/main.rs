use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use conversation_transcriber::{
    create_router, AppState, AudioConfig, Config, ConversationTranscriber, ResultReason,
    SessionState,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "conversation-transcriber", version, about = "Multi-participant conversation transcription")]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, default_value = "config/conversation-transcriber")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP control surface
    Serve,
    /// Transcribe one WAV file and print each final result
    Transcribe {
        #[arg(long)]
        wav: PathBuf,
        #[arg(long)]
        conversation_id: Option<String>,
        /// Participant user id; repeat for several participants
        #[arg(long = "participant")]
        participants: Vec<String>,
        /// Give up waiting for results after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Conversation Transcriber v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(&cfg).await,
        Command::Transcribe {
            wav,
            conversation_id,
            participants,
            timeout_secs,
        } => {
            transcribe(
                &cfg,
                wav,
                conversation_id,
                participants,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
    }
}

async fn serve(cfg: &Config) -> Result<()> {
    let state = AppState::new(cfg.speech_config()?);
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn transcribe(
    cfg: &Config,
    wav: PathBuf,
    conversation_id: Option<String>,
    participants: Vec<String>,
    timeout: Duration,
) -> Result<()> {
    if !wav.exists() {
        bail!("No audio file at {}", wav.display());
    }

    let transcriber = ConversationTranscriber::new(
        cfg.speech_config()?,
        AudioConfig::from_wav_file_input(&wav),
    )?;

    if let Some(id) = conversation_id {
        transcriber.set_conversation_id(id)?;
    }
    info!("Transcribing {} as conversation {}", wav.display(), transcriber.conversation_id());

    for participant in participants {
        transcriber
            .add_participant(participant.as_str())
            .await
            .with_context(|| format!("Failed to add participant {}", participant))?;
    }

    transcriber.recognized().add_listener(|event| {
        let result = &event.result;
        match result.reason {
            ResultReason::RecognizedSpeech => println!(
                "[{:>8.2}s] {}: {}",
                result.offset.as_secs_f64(),
                result.user_id.as_deref().unwrap_or("?"),
                result.text
            ),
            reason => println!("[{:>8.2}s] ({:?})", result.offset.as_secs_f64(), reason),
        }
    });
    transcriber.canceled().add_listener(|event| {
        warn!("Canceled ({}): {}", event.error_code, event.error_details);
    });

    transcriber
        .start_transcribing_async()
        .wait_timeout(timeout)
        .await
        .context("Failed to start transcription")?;

    if tokio::time::timeout(timeout, transcriber.audio_finished())
        .await
        .is_err()
    {
        warn!("Audio still streaming after {:?}, stopping", timeout);
    }

    if transcriber.state() == SessionState::Streaming {
        transcriber
            .stop_transcribing_async()
            .wait_timeout(timeout)
            .await
            .context("Failed to stop transcription")?;
    }

    let stats = transcriber.stats().await;
    transcriber.close().await;

    info!(
        "Done: {} segments from {} audio frames in {:.1}s",
        stats.transcript_segments_count, stats.audio_frames_sent, stats.duration_secs
    );
    Ok(())
}
