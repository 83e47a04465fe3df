pub mod content;
pub mod setup;
pub mod tools;

pub use content::{Content, MediaChunk, Part};
pub use setup::{
    GenerationConfig, Modality, PrebuiltVoiceConfig, Setup, SpeechConfig, TranscriptionConfig,
    VoiceConfig,
};
pub use tools::{FunctionCall, FunctionDeclaration, FunctionResponse, ToolDeclarations};

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Tool parameter schemas travel as raw JSON.
pub type JsonSchema = serde_json::Value;
