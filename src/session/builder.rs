use super::config::SessionConfig;
use super::controller::{Session, SessionParts};
use crate::audio::capture::{AudioCaptureEncoder, MicSource};
use crate::audio::playback::{PlaybackScheduler, PlaybackSink};
use crate::clock::{Clock, MonotonicClock};
use crate::protocol::models::Modality;
use crate::transport::Connector;
use crate::transport::ws::WsConnector;
use crate::video::VideoSource;
use crate::{Error, Result};
use std::sync::Arc;

pub struct CoachSession;

impl CoachSession {
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }
}

/// Assembles a [`Session`] from a config and its collaborators. Anything
/// left unset falls back to the WebSocket connector, the cpal devices (with
/// the `cpal-audio` feature) and the monotonic clock.
pub struct SessionBuilder {
    config: SessionConfig,
    api_key: Option<String>,
    endpoint: Option<String>,
    connector: Option<Arc<dyn Connector>>,
    microphone: Option<Box<dyn MicSource>>,
    camera: Option<Box<dyn VideoSource>>,
    speaker: Option<Box<dyn PlaybackSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            api_key: None,
            endpoint: None,
            connector: None,
            microphone: None,
            camera: None,
            speaker: None,
            clock: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the WebSocket endpoint used with `api_key`.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = Some(voice.into());
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub const fn output_audio(mut self) -> Self {
        self.config.response_modality = Modality::Audio;
        self
    }

    #[must_use]
    pub const fn output_text(mut self) -> Self {
        self.config.response_modality = Modality::Text;
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    #[must_use]
    pub fn microphone(mut self, microphone: impl MicSource + 'static) -> Self {
        self.microphone = Some(Box::new(microphone));
        self
    }

    #[must_use]
    pub fn camera(mut self, camera: impl VideoSource + 'static) -> Self {
        self.camera = Some(Box::new(camera));
        self
    }

    #[must_use]
    pub fn speaker(mut self, speaker: impl PlaybackSink + 'static) -> Self {
        self.speaker = Some(Box::new(speaker));
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Validate the configuration and spawn the idle session. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` if the config is invalid, or if neither
    /// a connector nor an API key, or no microphone, is available.
    /// Returns `Error::DeviceUnavailable` if a default device cannot be opened.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;

        let connector: Arc<dyn Connector> = match (self.connector, self.api_key) {
            (Some(connector), _) => connector,
            (None, Some(api_key)) => {
                let mut ws = WsConnector::new(api_key);
                if let Some(endpoint) = self.endpoint {
                    ws = ws.with_endpoint(endpoint);
                }
                Arc::new(ws)
            }
            (None, None) => {
                return Err(Error::InvalidConfig("api_key or connector required".to_string()));
            }
        };

        let microphone = match self.microphone {
            Some(microphone) => microphone,
            None => default_microphone()?,
        };
        let speaker = match self.speaker {
            Some(speaker) => speaker,
            None => default_speaker()?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        tracing::debug!(model = %self.config.model, camera = self.camera.is_some(), "building session");
        Ok(Session::spawn(SessionParts {
            encoder: AudioCaptureEncoder::new(microphone, self.config.capture),
            config: self.config,
            connector,
            video: self.camera,
            playback: PlaybackScheduler::new(speaker),
            clock,
        }))
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cpal-audio")]
#[allow(clippy::unnecessary_wraps, clippy::result_large_err)]
fn default_microphone() -> Result<Box<dyn MicSource>> {
    Ok(Box::new(crate::audio::device::CpalMicSource::new()))
}

#[cfg(not(feature = "cpal-audio"))]
#[allow(clippy::result_large_err)]
fn default_microphone() -> Result<Box<dyn MicSource>> {
    Err(Error::InvalidConfig(
        "no microphone configured; enable the `cpal-audio` feature or call `microphone`".to_string(),
    ))
}

#[cfg(feature = "cpal-audio")]
#[allow(clippy::result_large_err)]
fn default_speaker() -> Result<Box<dyn PlaybackSink>> {
    Ok(Box::new(crate::audio::device::CpalPlaybackSink::new()?))
}

#[cfg(not(feature = "cpal-audio"))]
#[allow(clippy::unnecessary_wraps, clippy::result_large_err)]
fn default_speaker() -> Result<Box<dyn PlaybackSink>> {
    tracing::warn!("no speaker configured; model audio will be scheduled but not played");
    Ok(Box::new(crate::audio::playback::NullSink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::BufferedMicSource;
    use crate::audio::playback::NullSink;

    #[tokio::test]
    async fn build_requires_connector_or_key() {
        let err = CoachSession::builder()
            .microphone(BufferedMicSource::default())
            .speaker(NullSink)
            .build()
            .err()
            .expect("build fails");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let config = SessionConfig { model: " ".into(), ..SessionConfig::default() };
        let err = CoachSession::builder()
            .config(config)
            .api_key("key")
            .microphone(BufferedMicSource::default())
            .build()
            .err()
            .expect("build fails");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn built_session_starts_idle() {
        let session = CoachSession::builder()
            .api_key("key")
            .voice("Puck")
            .microphone(BufferedMicSource::default())
            .speaker(NullSink)
            .build()
            .unwrap();
        let snapshot = session.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, crate::session::SessionPhase::Idle);
        assert!(!snapshot.speaking);
    }
}
