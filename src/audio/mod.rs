pub mod file;
pub mod source;
pub mod stream;

pub use file::{AudioFile, WavFileSource};
pub use source::{AudioFormat, AudioFrame, AudioSource};
pub use stream::{PullAudioCallback, PullAudioInputStream, PushAudioInputStream, PushAudioWriter};

use crate::error::Result;
use std::path::PathBuf;

/// Where a transcriber reads its audio from
pub enum AudioConfig {
    /// 16-bit PCM WAV file, opened when the transcriber is created
    WavFile(PathBuf),
    /// Any application-provided source (push or pull stream)
    Stream(Box<dyn AudioSource>),
}

impl AudioConfig {
    pub fn from_wav_file_input(path: impl Into<PathBuf>) -> Self {
        Self::WavFile(path.into())
    }

    pub fn from_stream_input(source: impl AudioSource + 'static) -> Self {
        Self::Stream(Box::new(source))
    }

    pub(crate) fn into_source(self, frame_duration_ms: u32) -> Result<Box<dyn AudioSource>> {
        match self {
            Self::WavFile(path) => Ok(Box::new(WavFileSource::open(path, frame_duration_ms)?)),
            Self::Stream(source) => Ok(source),
        }
    }
}
