// Shared fixtures for integration tests
//
// WAV fixtures are generated with hound into temporary directories, and every
// transcriber talks to the in-process loopback service.

#![allow(dead_code)]

use anyhow::Result;
use conversation_transcriber::{
    AudioConfig, ConversationTranscriber, LoopbackTransport, SpeechConfig,
};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const SAMPLE_RATE: u32 = 16000;

/// Transcript the loopback service returns for the first utterance
pub const UTTERANCE: &str = "Good morning everyone, let's review the quarterly numbers";

/// One segment of a generated recording
#[derive(Debug, Clone, Copy)]
pub enum Segment {
    Tone(u32),
    Silence(u32),
}

/// Write a 16-bit PCM WAV made of `segments` on every channel
pub fn write_wav(path: &Path, channels: u16, segments: &[Segment]) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    let mut t = 0u64;

    for segment in segments {
        let (ms, loud) = match *segment {
            Segment::Tone(ms) => (ms, true),
            Segment::Silence(ms) => (ms, false),
        };
        for _ in 0..(SAMPLE_RATE as u64 * ms as u64 / 1000) {
            let sample = if loud {
                let phase = 2.0 * std::f64::consts::PI * 440.0 * t as f64 / SAMPLE_RATE as f64;
                (phase.sin() * 0.3 * i16::MAX as f64) as i16
            } else {
                0
            };
            for _ in 0..channels {
                writer.write_sample(sample)?;
            }
            t += 1;
        }
    }

    writer.finalize()?;
    Ok(())
}

/// An 8-channel array recording: one second of speech then one second of silence
pub fn conference_room_fixture() -> Result<(TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("conference-room-8ch.wav");
    write_wav(
        &path,
        8,
        &[Segment::Silence(200), Segment::Tone(1000), Segment::Silence(800)],
    )?;
    Ok((dir, path))
}

/// Configuration pointing at a placeholder endpoint; tests inject the loopback transport
pub fn speech_config() -> SpeechConfig {
    SpeechConfig::from_endpoint("ws://localhost:9/speech/recognition/multiaudio", "test-key")
        .expect("placeholder endpoint is valid")
        .with_connect_timeout(Duration::from_secs(5))
        .with_request_timeout(Duration::from_secs(5))
}

pub fn transcriber(
    service: &LoopbackTransport,
    audio: AudioConfig,
) -> Result<ConversationTranscriber> {
    Ok(ConversationTranscriber::with_transport(
        speech_config(),
        audio,
        Arc::new(service.clone()),
    )?)
}
