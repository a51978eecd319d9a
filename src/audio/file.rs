use super::source::{AudioFormat, AudioFrame, AudioSource};
use crate::error::{Result, TranscriberError};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::{debug, info};

/// A fully decoded 16-bit PCM WAV file
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).map_err(|e| {
            TranscriberError::audio(format!("failed to open {}: {}", path.display(), e))
        })?;

        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(TranscriberError::audio(format!(
                "{} is {}-bit {:?}, only 16-bit PCM is supported",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TranscriberError::audio(format!("failed to read samples: {}", e)))?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::pcm16(self.sample_rate, self.channels)
    }
}

/// Audio source that replays a WAV file in fixed-duration frames
pub struct WavFileSource {
    file: AudioFile,
    samples_per_frame: usize,
    position: usize,
    closed: bool,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>, frame_duration_ms: u32) -> Result<Self> {
        let file = AudioFile::open(path)?;
        Ok(Self::from_file(file, frame_duration_ms))
    }

    pub fn from_file(file: AudioFile, frame_duration_ms: u32) -> Self {
        let samples_per_frame = file.format().samples_per_duration(frame_duration_ms);
        Self {
            file,
            samples_per_frame,
            position: 0,
            closed: false,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.file.duration_seconds
    }
}

#[async_trait::async_trait]
impl AudioSource for WavFileSource {
    fn format(&self) -> AudioFormat {
        self.file.format()
    }

    async fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        if self.closed || self.position >= self.file.samples.len() {
            return Ok(None);
        }

        let end = (self.position + self.samples_per_frame).min(self.file.samples.len());
        let frame = AudioFrame {
            samples: self.file.samples[self.position..end].to_vec(),
            sample_rate: self.file.sample_rate,
            channels: self.file.channels,
            timestamp_ms: self.format().duration_ms(self.position),
        };
        self.position = end;

        Ok(Some(frame))
    }

    async fn close(&mut self) {
        if !self.closed {
            debug!("Closing WAV source {}", self.file.path);
            self.closed = true;
        }
    }

    fn name(&self) -> &str {
        &self.file.path
    }
}
