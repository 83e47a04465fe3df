use crate::audio::playback::PlaybackScheduler;
use crate::feedback::FeedbackEvent;
use crate::transcript::{Role, TranscriptAggregator, TranscriptEntry};
use serde::{Deserialize, Serialize};

/// Lifecycle phase. `Errored` is terminal for a session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Active,
    Closing,
    Errored,
}

impl SessionPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Errored => "errored",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a session owns while it runs. Only the controller task
/// touches it, so no field needs synchronization.
pub(crate) struct SessionState {
    pub phase: SessionPhase,
    pub speaking: bool,
    pub playback: PlaybackScheduler,
    pub transcripts: TranscriptAggregator,
    pub transcript_log: Vec<TranscriptEntry>,
    pub feedback_history: Vec<FeedbackEvent>,
}

impl SessionState {
    pub fn new(playback: PlaybackScheduler) -> Self {
        Self {
            phase: SessionPhase::Idle,
            speaking: false,
            playback,
            transcripts: TranscriptAggregator::new(),
            transcript_log: Vec::new(),
            feedback_history: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            speaking: self.speaking,
            active_playback: self.playback.active_len(),
            next_start_time: self.playback.next_start_time(),
            pending_user: self.transcripts.pending(Role::User).to_string(),
            pending_model: self.transcripts.pending(Role::Model).to_string(),
            transcript: self.transcript_log.clone(),
            feedback: self.feedback_history.clone(),
        }
    }

    /// Release playback and in-progress turn buffers. Logs are kept.
    pub fn clear(&mut self) {
        self.playback.release();
        self.transcripts.reset();
        self.speaking = false;
    }

    pub fn take_summary(&mut self) -> SessionSummary {
        SessionSummary {
            transcript: std::mem::take(&mut self.transcript_log),
            feedback: std::mem::take(&mut self.feedback_history),
        }
    }
}

/// Point-in-time copy of the session state for a UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub speaking: bool,
    pub active_playback: usize,
    pub next_start_time: f64,
    pub pending_user: String,
    pub pending_model: String,
    pub transcript: Vec<TranscriptEntry>,
    pub feedback: Vec<FeedbackEvent>,
}

/// What a finished session leaves behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub transcript: Vec<TranscriptEntry>,
    pub feedback: Vec<FeedbackEvent>,
}
