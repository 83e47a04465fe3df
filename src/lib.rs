//! Real-time voice and video coaching sessions over a bidirectional
//! streaming model API.
//!
//! A [`Session`] captures the microphone, streams PCM16 audio and periodic
//! camera stills to the remote model, plays its spoken replies back without
//! gaps, assembles the live transcript, and records the structured feedback
//! the model reports through the `provideFeedback` function.

#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod audio;
pub mod clock;
pub mod error;
pub mod feedback;
pub mod protocol;
pub mod session;
pub mod transcript;
pub mod transport;
pub mod video;

pub use audio::{
    AudioCaptureEncoder, AudioChunk, BufferedMicSource, CaptureConfig, MicSource, NullSink,
    PlaybackHandle, PlaybackScheduler, PlaybackSink,
};
#[cfg(feature = "cpal-audio")]
pub use audio::{CpalMicSource, CpalPlaybackSink};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{DecodeError, Error, Result};
pub use feedback::{FeedbackEvent, Sentiment, ToolCall, ToolCallDispatcher};
pub use protocol::client_events::ClientMessage;
pub use protocol::inbound::InboundMessage;
pub use protocol::server_events::ServerMessage;
pub use session::{
    CoachSession, Session, SessionBuilder, SessionConfig, SessionEvent, SessionHandle, SessionPhase,
    SessionSnapshot, SessionSummary,
};
pub use transcript::{Role, TranscriptAggregator, TranscriptEntry};
pub use transport::ws::WsConnector;
pub use transport::{Channel, Connector};
pub use video::{IntervalFrameSource, VideoFrame, VideoSource};

pub(crate) const TRACE_LOG_MAX_BYTES: usize = 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}
