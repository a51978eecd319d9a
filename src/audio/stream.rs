//! Application-fed audio streams.
//!
//! - `PushAudioInputStream`: the application writes PCM bytes through a
//!   `PushAudioWriter`; the session drains them frame by frame.
//! - `PullAudioInputStream`: the session asks an application callback for
//!   bytes whenever it needs the next frame.

use super::source::{AudioFormat, AudioFrame, AudioSource};
use crate::error::{Result, TranscriberError};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Frame duration used when a stream is not configured otherwise
pub const DEFAULT_FRAME_DURATION_MS: u32 = 100;

const PUSH_CHANNEL_CAPACITY: usize = 64;

/// Writer half of a push stream
#[derive(Clone)]
pub struct PushAudioWriter {
    tx: mpsc::Sender<Vec<u8>>,
}

impl PushAudioWriter {
    /// Queue PCM bytes, waiting while the stream is backlogged
    pub async fn write(&self, pcm: &[u8]) -> Result<()> {
        self.tx
            .send(pcm.to_vec())
            .await
            .map_err(|_| TranscriberError::audio("push stream reader is gone"))
    }

    /// Blocking variant for producers outside the async runtime
    pub fn blocking_write(&self, pcm: &[u8]) -> Result<()> {
        self.tx
            .blocking_send(pcm.to_vec())
            .map_err(|_| TranscriberError::audio("push stream reader is gone"))
    }

    /// Signal end of stream (also happens when every writer is dropped)
    pub fn close(self) {}
}

/// Source half of a push stream
pub struct PushAudioInputStream {
    format: AudioFormat,
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    frame_bytes: usize,
    samples_emitted: usize,
    ended: bool,
}

impl PushAudioInputStream {
    pub fn create(format: AudioFormat) -> (PushAudioWriter, Self) {
        let (tx, rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        let stream = Self {
            format,
            rx,
            pending: Vec::new(),
            frame_bytes: format.samples_per_duration(DEFAULT_FRAME_DURATION_MS) * 2,
            samples_emitted: 0,
            ended: false,
        };
        (PushAudioWriter { tx }, stream)
    }

    pub fn with_frame_duration(mut self, frame_duration_ms: u32) -> Self {
        self.frame_bytes = self.format.samples_per_duration(frame_duration_ms) * 2;
        self
    }
}

#[async_trait::async_trait]
impl AudioSource for PushAudioInputStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    async fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        while !self.ended && self.pending.len() < self.frame_bytes {
            match self.rx.recv().await {
                Some(bytes) => self.pending.extend_from_slice(&bytes),
                None => self.ended = true,
            }
        }

        let take = self.pending.len().min(self.frame_bytes) & !1;
        if take == 0 {
            return Ok(None);
        }

        let bytes: Vec<u8> = self.pending.drain(..take).collect();
        Ok(Some(self.build_frame(&bytes)))
    }

    async fn close(&mut self) {
        debug!("Closing push audio stream");
        self.rx.close();
        self.ended = true;
        self.pending.clear();
    }

    fn name(&self) -> &str {
        "push-stream"
    }
}

impl PushAudioInputStream {
    fn build_frame(&mut self, bytes: &[u8]) -> AudioFrame {
        let frame = frame_from_bytes(bytes, self.format, self.samples_emitted);
        self.samples_emitted += frame.samples.len();
        frame
    }
}

/// Application callback feeding a pull stream
///
/// `read` blocks until bytes are available and returns 0 at end of stream.
pub trait PullAudioCallback: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&mut self) {}
}

/// Audio source that pulls PCM bytes from a `PullAudioCallback`
pub struct PullAudioInputStream {
    format: AudioFormat,
    callback: Arc<Mutex<Box<dyn PullAudioCallback>>>,
    frame_bytes: usize,
    samples_emitted: usize,
    ended: bool,
}

impl PullAudioInputStream {
    pub fn new(callback: impl PullAudioCallback + 'static, format: AudioFormat) -> Self {
        Self {
            format,
            callback: Arc::new(Mutex::new(Box::new(callback))),
            frame_bytes: format.samples_per_duration(DEFAULT_FRAME_DURATION_MS) * 2,
            samples_emitted: 0,
            ended: false,
        }
    }

    pub fn with_frame_duration(mut self, frame_duration_ms: u32) -> Self {
        self.frame_bytes = self.format.samples_per_duration(frame_duration_ms) * 2;
        self
    }
}

#[async_trait::async_trait]
impl AudioSource for PullAudioInputStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    async fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        if self.ended {
            return Ok(None);
        }

        let callback = Arc::clone(&self.callback);
        let frame_bytes = self.frame_bytes;

        // Callbacks may block on I/O
        let (bytes, ended) = tokio::task::spawn_blocking(move || -> io::Result<(Vec<u8>, bool)> {
            let mut callback = callback
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "pull callback poisoned"))?;
            let mut buf = vec![0u8; frame_bytes];
            let mut filled = 0;
            while filled < frame_bytes {
                let n = callback.read(&mut buf[filled..])?;
                if n == 0 {
                    buf.truncate(filled);
                    return Ok((buf, true));
                }
                filled += n;
            }
            Ok((buf, false))
        })
        .await
        .map_err(|e| TranscriberError::audio(format!("pull callback task failed: {}", e)))?
        .map_err(|e| TranscriberError::audio(format!("pull callback read failed: {}", e)))?;

        self.ended = ended;

        let usable = bytes.len() & !1;
        if usable == 0 {
            return Ok(None);
        }

        let frame = frame_from_bytes(&bytes[..usable], self.format, self.samples_emitted);
        self.samples_emitted += frame.samples.len();
        Ok(Some(frame))
    }

    async fn close(&mut self) {
        self.ended = true;
        if let Ok(mut callback) = self.callback.lock() {
            callback.close();
        }
    }

    fn name(&self) -> &str {
        "pull-stream"
    }
}

fn frame_from_bytes(bytes: &[u8], format: AudioFormat, samples_before: usize) -> AudioFrame {
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    AudioFrame {
        samples,
        sample_rate: format.sample_rate,
        channels: format.channels,
        timestamp_ms: format.duration_ms(samples_before),
    }
}
