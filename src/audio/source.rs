use crate::error::Result;
use serde::{Deserialize, Serialize};

/// PCM layout of an audio source (16-bit little-endian, interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (8 for circular microphone arrays)
    pub channels: u16,
    /// Bits per sample, always 16 for now
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }

    /// Number of interleaved samples covering `duration_ms` of audio
    pub fn samples_per_duration(&self, duration_ms: u32) -> usize {
        let per_channel = (self.sample_rate as u64 * duration_ms as u64 / 1000).max(1);
        per_channel as usize * self.channels as usize
    }

    /// Duration in milliseconds of `sample_count` interleaved samples
    pub fn duration_ms(&self, sample_count: usize) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        sample_count as u64 * 1000 / (self.sample_rate as u64 * self.channels as u64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16(16000, 1)
    }
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the stream started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Little-endian PCM bytes for the wire
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Pull-based producer of audio frames
///
/// Implementations:
/// - `WavFileSource`: frames read from a WAV file
/// - `PushAudioInputStream`: frames written by the application
/// - `PullAudioInputStream`: frames read through an application callback
///
/// The session only reads from a source; it never mutates source data.
#[async_trait::async_trait]
pub trait AudioSource: Send {
    /// Layout of the frames this source produces
    fn format(&self) -> AudioFormat;

    /// Read the next frame, `None` at end of stream
    async fn read_frame(&mut self) -> Result<Option<AudioFrame>>;

    /// Release underlying resources
    async fn close(&mut self);

    /// Source name for logging
    fn name(&self) -> &str;
}
