use super::models::MediaChunk;
use crate::feedback::ToolCall;

/// Kind-tagged inbound message, one per unit of work for the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Base64 PCM16 model speech, still encoded.
    AudioData(MediaChunk),
    /// The user barged in; queued model speech is void.
    Interrupted,
    InputTranscriptionDelta(String),
    OutputTranscriptionDelta(String),
    TurnComplete,
    ToolCall(ToolCall),
}

impl InboundMessage {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AudioData(_) => "audio_data",
            Self::Interrupted => "interrupted",
            Self::InputTranscriptionDelta(_) => "input_transcription_delta",
            Self::OutputTranscriptionDelta(_) => "output_transcription_delta",
            Self::TurnComplete => "turn_complete",
            Self::ToolCall(_) => "tool_call",
        }
    }
}
