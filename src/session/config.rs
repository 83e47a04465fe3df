use crate::audio::capture::CaptureConfig;
use crate::audio::codec::PLAYBACK_SAMPLE_RATE;
use crate::feedback::feedback_declaration;
use crate::protocol::models::{
    Content, DEFAULT_MODEL, GenerationConfig, Modality, Setup, SpeechConfig, ToolDeclarations,
    TranscriptionConfig,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a warm, concise public-speaking coach. \
Listen to the user and watch their camera frames. Reply briefly by voice. Whenever you notice \
something worth pointing out about their pace, clarity, filler words, posture, eye contact or \
confidence, call provideFeedback with a category, a one-sentence message and a sentiment of \
positive, neutral or improvement.";

const DEFAULT_VIDEO_INTERVAL_MS: u64 = 2_000;
const DEFAULT_PLAYBACK_POLL_MS: u64 = 20;

/// Everything needed to open a session except the devices and the connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    pub system_prompt: String,
    pub voice: Option<String>,
    pub response_modality: Modality,
    pub capture: CaptureConfig,
    pub playback_sample_rate: u32,
    pub video_interval_ms: u64,
    pub playback_poll_ms: u64,
    pub transcribe_input: bool,
    pub transcribe_output: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            voice: None,
            response_modality: Modality::Audio,
            capture: CaptureConfig::default(),
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            video_interval_ms: DEFAULT_VIDEO_INTERVAL_MS,
            playback_poll_ms: DEFAULT_PLAYBACK_POLL_MS,
            transcribe_input: true,
            transcribe_output: true,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or a value is out of range.
    #[allow(clippy::result_large_err)]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Error::InvalidConfig` describing the first invalid value.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model must not be empty".to_string()));
        }
        if self.capture.sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(Error::InvalidConfig("sample rates must be positive".to_string()));
        }
        if self.capture.block_size == 0 {
            return Err(Error::InvalidConfig("capture block size must be positive".to_string()));
        }
        if self.video_interval_ms == 0 || self.playback_poll_ms == 0 {
            return Err(Error::InvalidConfig("intervals must be positive".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn video_interval(&self) -> Duration {
        Duration::from_millis(self.video_interval_ms)
    }

    #[must_use]
    pub const fn playback_poll(&self) -> Duration {
        Duration::from_millis(self.playback_poll_ms)
    }

    /// The setup frame: prompt, modality, voice, transcription and the
    /// feedback function declaration.
    ///
    /// # Errors
    /// Returns an error if the feedback schema cannot be serialized.
    #[allow(clippy::result_large_err)]
    pub fn to_setup(&self) -> Result<Setup> {
        Ok(Setup {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![self.response_modality],
                speech_config: self.voice.as_deref().map(SpeechConfig::prebuilt),
            },
            system_instruction: (!self.system_prompt.is_empty())
                .then(|| Content::from_text(self.system_prompt.clone())),
            tools: vec![ToolDeclarations {
                function_declarations: vec![feedback_declaration()?],
            }],
            input_audio_transcription: self.transcribe_input.then_some(TranscriptionConfig {}),
            output_audio_transcription: self.transcribe_output.then_some(TranscriptionConfig {}),
        })
    }
}
