//! Microphone capture, PCM16 codec and output scheduling.

pub mod capture;
pub mod codec;
#[cfg(feature = "cpal-audio")]
pub mod device;
pub mod playback;

pub use capture::{AudioCaptureEncoder, BufferedMicSource, CaptureConfig, ChunkStream, MicSource};
pub use codec::{AudioChunk, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE, SegmentResampler};
#[cfg(feature = "cpal-audio")]
pub use device::{CpalMicSource, CpalPlaybackSink};
pub use playback::{NullSink, PlaybackHandle, PlaybackScheduler, PlaybackSink};
