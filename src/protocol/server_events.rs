use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::inbound::InboundMessage;
use super::models::{Content, FunctionCall};
use crate::feedback::ToolCall;

/// One server frame. Exactly one of the top-level fields is normally set;
/// unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub turn_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFrame {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<String>,
}

impl ServerMessage {
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten the frame into inbound messages, in processing order:
    /// interruption first (it voids queued audio), then transcription
    /// deltas and model audio, then the turn boundary so that a flush sees
    /// every fragment carried by the same frame, then tool calls.
    #[must_use]
    pub fn into_inbound(self) -> Vec<InboundMessage> {
        let mut out = Vec::new();

        if let Some(content) = self.server_content {
            if content.interrupted {
                out.push(InboundMessage::Interrupted);
            }
            if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
                out.push(InboundMessage::InputTranscriptionDelta(t.text));
            }
            if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
                out.push(InboundMessage::OutputTranscriptionDelta(t.text));
            }
            for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
                if let Some(media) = part.inline_data {
                    if media.mime_type.starts_with("audio/") {
                        out.push(InboundMessage::AudioData(media));
                    } else {
                        tracing::debug!(mime_type = %media.mime_type, "ignoring non-audio inline data");
                    }
                } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    out.push(InboundMessage::OutputTranscriptionDelta(text));
                }
            }
            if content.turn_complete {
                out.push(InboundMessage::TurnComplete);
            }
        }

        if let Some(frame) = self.tool_call {
            out.extend(frame.function_calls.into_iter().map(|call| {
                InboundMessage::ToolCall(ToolCall {
                    call_id: call.id,
                    name: call.name,
                    arguments: call.args,
                })
            }));
        }

        if let Some(cancel) = self.tool_call_cancellation {
            tracing::debug!(ids = ?cancel.ids, "tool calls cancelled by server");
        }
        if let Some(go_away) = self.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "server announced disconnect");
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_flattens_in_processing_order() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "serverContent": {
                "interrupted": true,
                "turnComplete": true,
                "inputTranscription": { "text": "so um" },
                "outputTranscription": { "text": "Try" },
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } }
                ]}
            }
        }))
        .unwrap();

        let kinds: Vec<&str> = msg.into_inbound().iter().map(InboundMessage::kind).collect();
        assert_eq!(
            kinds,
            vec!["interrupted", "input_transcription_delta", "output_transcription_delta", "audio_data", "turn_complete"]
        );
    }

    #[test]
    fn tool_call_frame_yields_one_message_per_call() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "toolCall": { "functionCalls": [
                { "id": "c1", "name": "provideFeedback", "args": { "category": "pace" } },
                { "id": "c2", "name": "provideFeedback" }
            ]}
        }))
        .unwrap();
        let inbound = msg.into_inbound();
        assert_eq!(inbound.len(), 2);
        match &inbound[1] {
            InboundMessage::ToolCall(call) => {
                assert_eq!(call.call_id, "c2");
                assert!(call.arguments.is_null());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn setup_complete_has_no_inbound_messages() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.into_inbound().is_empty());
    }
}
