use super::codec::{self, AudioChunk, CAPTURE_SAMPLE_RATE};
use crate::{Error, Result};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 4096 samples at 16 kHz, about 256 ms per chunk.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Raw float samples as delivered by a device, in arbitrary buffer sizes.
pub type RawSamples = mpsc::UnboundedReceiver<Vec<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// A microphone. Implementations deliver mono samples at `config.sample_rate`.
pub trait MicSource: Send {
    /// Acquire the device and start delivering samples.
    ///
    /// # Errors
    /// Returns `Error::DeviceUnavailable` on permission or hardware failure.
    #[allow(clippy::result_large_err)]
    fn open(&mut self, config: &CaptureConfig) -> Result<RawSamples>;

    /// Release the device. Must be idempotent.
    fn close(&mut self);
}

/// Re-blocks device buffers into exact fixed-size blocks.
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAssembler {
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples and return every block that became complete, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut blocks = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.block_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.block_size {
                blocks.push(std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.block_size),
                ));
            }
        }
        blocks
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Lazy, capture-ordered sequence of encoded chunks. Ends when capture stops.
pub struct ChunkStream {
    rx: mpsc::UnboundedReceiver<AudioChunk>,
}

impl ChunkStream {
    pub async fn next_chunk(&mut self) -> Option<AudioChunk> {
        self.rx.recv().await
    }
}

impl Stream for ChunkStream {
    type Item = AudioChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}

pub struct AudioCaptureEncoder {
    source: Box<dyn MicSource>,
    config: CaptureConfig,
    raw: Option<RawSamples>,
    task: Option<JoinHandle<()>>,
}

impl AudioCaptureEncoder {
    #[must_use]
    pub fn new(source: Box<dyn MicSource>, config: CaptureConfig) -> Self {
        Self {
            source,
            config,
            raw: None,
            task: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        self.raw.is_some() || self.task.is_some()
    }

    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.task.is_some()
    }

    /// Open the microphone without emitting chunks yet. Samples captured from
    /// here on are kept and encoded once streaming begins.
    ///
    /// # Errors
    /// Returns `Error::DeviceUnavailable` if the device cannot be opened.
    #[allow(clippy::result_large_err)]
    pub fn acquire(&mut self) -> Result<()> {
        if self.is_acquired() {
            return Ok(());
        }
        let raw = self.source.open(&self.config)?;
        tracing::debug!(
            sample_rate = self.config.sample_rate,
            block_size = self.config.block_size,
            "microphone acquired"
        );
        self.raw = Some(raw);
        Ok(())
    }

    /// Begin encoding acquired samples into chunks.
    ///
    /// # Errors
    /// Returns `Error::InvalidState` if the microphone was not acquired or is
    /// already streaming.
    #[allow(clippy::result_large_err)]
    pub fn start_streaming(&mut self) -> Result<ChunkStream> {
        let Some(mut raw) = self.raw.take() else {
            return Err(Error::InvalidState(if self.task.is_some() {
                "capture is already streaming".to_string()
            } else {
                "microphone has not been acquired".to_string()
            }));
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let sample_rate = self.config.sample_rate;
        let mut assembler = BlockAssembler::new(self.config.block_size);

        self.task = Some(tokio::spawn(async move {
            while let Some(samples) = raw.recv().await {
                for block in assembler.push(&samples) {
                    if tx.send(codec::encode(&block, sample_rate)).is_err() {
                        return;
                    }
                }
            }
            tracing::debug!("microphone sample stream ended");
        }));

        Ok(ChunkStream { rx })
    }

    /// Acquire and stream in one step.
    ///
    /// # Errors
    /// Returns `Error::DeviceUnavailable` if the device cannot be opened.
    #[allow(clippy::result_large_err)]
    pub fn start(&mut self) -> Result<ChunkStream> {
        self.acquire()?;
        self.start_streaming()
    }

    /// Release the device and end the chunk stream. Samples not yet forming a
    /// full block are discarded.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let was_acquired = self.raw.take().is_some();
        self.source.close();
        if was_acquired {
            tracing::debug!("microphone released before streaming began");
        }
    }
}

impl Drop for AudioCaptureEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Microphone fed from memory; used for tests and file playback into a session.
#[derive(Debug, Default)]
pub struct BufferedMicSource {
    buffers: Vec<Vec<f32>>,
    sender: Option<mpsc::UnboundedSender<Vec<f32>>>,
    unavailable: bool,
}

impl BufferedMicSource {
    #[must_use]
    pub const fn new(buffers: Vec<Vec<f32>>) -> Self {
        Self {
            buffers,
            sender: None,
            unavailable: false,
        }
    }

    /// A source whose `open` always fails, as a denied permission would.
    #[must_use]
    pub const fn unavailable() -> Self {
        Self {
            buffers: Vec::new(),
            sender: None,
            unavailable: true,
        }
    }

    /// Feed more samples into an open source. Returns `false` if it is closed.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|tx| tx.send(samples).is_ok())
    }
}

impl MicSource for BufferedMicSource {
    fn open(&mut self, _config: &CaptureConfig) -> Result<RawSamples> {
        if self.unavailable {
            return Err(Error::DeviceUnavailable("microphone permission denied".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for buffer in self.buffers.drain(..) {
            let _ = tx.send(buffer);
        }
        self.sender = Some(tx);
        Ok(rx)
    }

    fn close(&mut self) {
        self.sender = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn assembler_emits_exact_blocks_in_order() {
        let mut assembler = BlockAssembler::new(4);
        assert!(assembler.push(&[0.0, 0.1, 0.2]).is_empty());
        let blocks = assembler.push(&[0.3, 0.4, 0.5, 0.6, 0.7, 0.8]);
        assert_eq!(blocks, vec![vec![0.0, 0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6, 0.7]]);
        assert_eq!(assembler.pending_len(), 1);
        let blocks = assembler.push(&[0.9, 1.0, 1.0]);
        assert_eq!(blocks, vec![vec![0.8, 0.9, 1.0, 1.0]]);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn unavailable_device_fails_acquire() {
        let mut encoder =
            AudioCaptureEncoder::new(Box::new(BufferedMicSource::unavailable()), CaptureConfig::default());
        let err = encoder.start().err().expect("start fails");
        assert!(matches!(err, Error::DeviceUnavailable(_)));
        assert!(!encoder.is_acquired());
    }

    #[test]
    fn streaming_requires_acquire() {
        let mut encoder =
            AudioCaptureEncoder::new(Box::new(BufferedMicSource::default()), CaptureConfig::default());
        assert!(matches!(encoder.start_streaming(), Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn chunks_are_fixed_size_and_capture_ordered() {
        let source = BufferedMicSource::new(vec![vec![0.5; 3], vec![-0.5; 3], vec![0.25; 2]]);
        let config = CaptureConfig { sample_rate: 16_000, block_size: 4 };
        let mut encoder = AudioCaptureEncoder::new(Box::new(source), config);
        let mut chunks = encoder.start().unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), chunks.next_chunk())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), chunks.next_chunk())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(codec::decode(&first).unwrap().len(), 4);
        assert_eq!(first, codec::encode(&[0.5, 0.5, 0.5, -0.5], 16_000));
        assert_eq!(second, codec::encode(&[-0.5, -0.5, 0.25, 0.25], 16_000));
    }

    #[tokio::test]
    async fn stop_ends_the_stream() {
        let config = CaptureConfig { sample_rate: 16_000, block_size: 2 };
        let mut encoder = AudioCaptureEncoder::new(Box::new(BufferedMicSource::default()), config);
        let mut chunks = encoder.start().unwrap();
        encoder.stop();
        let next = tokio::time::timeout(Duration::from_secs(1), chunks.next_chunk())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(!encoder.is_acquired());
    }
}
