use crate::protocol::models::{FunctionDeclaration, FunctionResponse};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const FEEDBACK_TOOL_NAME: &str = "provideFeedback";
pub const MAX_FEEDBACK_MESSAGE_CHARS: usize = 280;

const FEEDBACK_TOOL_DESCRIPTION: &str = "Report one short piece of live coaching feedback about the \
     user's delivery (pace, clarity, filler words, posture, eye contact, confidence).";
const REQUIRED_FIELDS: [&str; 3] = ["category", "message", "sentiment"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Improvement,
}

/// Arguments of a `provideFeedback` call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FeedbackArgs {
    /// Short label such as "pace" or "eye contact".
    pub category: String,
    /// One sentence addressed to the user.
    pub message: String,
    pub sentiment: Sentiment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackEvent {
    pub id: Uuid,
    pub category: String,
    pub message: String,
    pub sentiment: Sentiment,
    pub timestamp: DateTime<Utc>,
}

/// A named function invocation emitted by the remote model mid-turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Reply unblocking the remote turn, keyed by the originating call.
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledgment {
    pub call_id: String,
    pub name: String,
    pub response: Value,
}

impl From<Acknowledgment> for FunctionResponse {
    fn from(ack: Acknowledgment) -> Self {
        Self {
            id: ack.call_id,
            name: ack.name,
            response: ack.response,
        }
    }
}

/// Result of dispatching one tool call. The acknowledgment is always present.
#[derive(Debug)]
pub struct Dispatch {
    pub acknowledgment: Acknowledgment,
    pub feedback: Result<FeedbackEvent>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ToolCallDispatcher;

impl ToolCallDispatcher {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn dispatch(&self, call: &ToolCall) -> Dispatch {
        let acknowledgment = Acknowledgment {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            response: serde_json::json!({ "result": "ok" }),
        };
        let feedback = parse_feedback(call).inspect_err(|err| {
            tracing::warn!(call_id = %call.call_id, name = %call.name, error = %err, "tool call not recorded");
        });
        Dispatch { acknowledgment, feedback }
    }
}

#[allow(clippy::result_large_err)]
fn parse_feedback(call: &ToolCall) -> Result<FeedbackEvent> {
    if call.name != FEEDBACK_TOOL_NAME {
        return Err(Error::MalformedToolCall(format!("unknown tool: {}", call.name)));
    }
    let Value::Object(fields) = &call.arguments else {
        return Err(Error::MalformedToolCall("arguments must be an object".to_string()));
    };

    let missing: Vec<&str> = REQUIRED_FIELDS
        .into_iter()
        .filter(|field| fields.get(*field).is_none_or(Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(Error::MalformedToolCall(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )));
    }

    let args: FeedbackArgs = serde_json::from_value(call.arguments.clone())
        .map_err(|e| Error::MalformedToolCall(e.to_string()))?;

    Ok(FeedbackEvent {
        id: Uuid::new_v4(),
        category: args.category,
        message: truncate_chars(&args.message, MAX_FEEDBACK_MESSAGE_CHARS),
        sentiment: args.sentiment,
        timestamp: Utc::now(),
    })
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}

/// Declaration of the feedback function registered at connect time.
///
/// # Errors
/// Returns an error if schema serialization fails.
#[allow(clippy::result_large_err)]
pub fn feedback_declaration() -> Result<FunctionDeclaration> {
    let generator = SchemaSettings::openapi3()
        .with(|settings| {
            settings.inline_subschemas = true;
            settings.meta_schema = None;
        })
        .into_generator();
    let schema = generator.into_root_schema_for::<FeedbackArgs>();
    let mut parameters = serde_json::to_value(&schema)?;
    // Function parameters take a bare OpenAPI schema object.
    if let Value::Object(root) = &mut parameters {
        root.remove("title");
        root.remove("definitions");
    }
    Ok(FunctionDeclaration {
        name: FEEDBACK_TOOL_NAME.to_string(),
        description: Some(FEEDBACK_TOOL_DESCRIPTION.to_string()),
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(arguments: Value) -> ToolCall {
        ToolCall {
            call_id: "call_1".to_string(),
            name: FEEDBACK_TOOL_NAME.to_string(),
            arguments,
        }
    }

    #[test]
    fn valid_call_produces_event_and_ack() {
        let dispatch = ToolCallDispatcher::new().dispatch(&call(json!({
            "category": "pace",
            "message": "Slow down a little.",
            "sentiment": "improvement"
        })));
        let event = dispatch.feedback.expect("feedback recorded");
        assert_eq!(event.category, "pace");
        assert_eq!(event.sentiment, Sentiment::Improvement);
        assert_eq!(dispatch.acknowledgment.call_id, "call_1");
        assert_eq!(dispatch.acknowledgment.name, FEEDBACK_TOOL_NAME);
        assert_eq!(dispatch.acknowledgment.response, json!({ "result": "ok" }));
    }

    #[test]
    fn missing_sentiment_still_acknowledges() {
        let dispatch = ToolCallDispatcher::new().dispatch(&call(json!({
            "category": "clarity",
            "message": "Nice articulation."
        })));
        assert_eq!(dispatch.acknowledgment.call_id, "call_1");
        match dispatch.feedback {
            Err(Error::MalformedToolCall(msg)) => assert!(msg.contains("sentiment")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_sentiment_is_malformed() {
        let dispatch = ToolCallDispatcher::new().dispatch(&call(json!({
            "category": "clarity",
            "message": "Hmm.",
            "sentiment": "angry"
        })));
        assert!(matches!(dispatch.feedback, Err(Error::MalformedToolCall(_))));
    }

    #[test]
    fn unknown_tool_is_acknowledged_but_not_recorded() {
        let dispatch = ToolCallDispatcher::new().dispatch(&ToolCall {
            call_id: "call_9".into(),
            name: "lookupWeather".into(),
            arguments: json!({}),
        });
        assert_eq!(dispatch.acknowledgment.name, "lookupWeather");
        assert!(dispatch.feedback.is_err());
    }

    #[test]
    fn ids_are_unique_and_message_is_bounded() {
        let long = "é".repeat(MAX_FEEDBACK_MESSAGE_CHARS + 40);
        let args = json!({ "category": "pace", "message": long, "sentiment": "neutral" });
        let dispatcher = ToolCallDispatcher::new();
        let a = dispatcher.dispatch(&call(args.clone())).feedback.unwrap();
        let b = dispatcher.dispatch(&call(args)).feedback.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.message.chars().count(), MAX_FEEDBACK_MESSAGE_CHARS);
    }

    #[test]
    fn declaration_requires_all_fields() {
        let decl = feedback_declaration().unwrap();
        assert_eq!(decl.name, FEEDBACK_TOOL_NAME);
        let required = decl.parameters["required"].as_array().unwrap();
        for field in REQUIRED_FIELDS {
            assert!(required.iter().any(|v| v == field), "{field} not required");
        }
    }

    fn dollar_keys(value: &Value, found: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    if key.starts_with('$') {
                        found.push(key.clone());
                    }
                    dollar_keys(child, found);
                }
            }
            Value::Array(items) => items.iter().for_each(|item| dollar_keys(item, found)),
            _ => {}
        }
    }

    #[test]
    fn declaration_is_a_self_contained_openapi_object() {
        let params = feedback_declaration().unwrap().parameters;
        let mut refs = Vec::new();
        dollar_keys(&params, &mut refs);
        assert!(refs.is_empty(), "unexpected keys: {refs:?}");
        assert!(params.get("definitions").is_none());
        assert!(params.get("title").is_none());
        assert_eq!(params["type"], "object");
        assert_eq!(params["properties"]["category"]["type"], "string");
        assert_eq!(
            params["properties"]["sentiment"],
            json!({ "type": "string", "enum": ["positive", "neutral", "improvement"] })
        );
    }
}
