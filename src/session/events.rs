use super::state::SessionPhase;
use crate::feedback::FeedbackEvent;
use crate::transcript::{Role, TranscriptEntry};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// UI-facing notifications, in the order the controller produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    SpeakingChanged(bool),
    /// Live text of the turn in progress for one role.
    PartialTranscript { role: Role, text: String },
    TranscriptEntry(TranscriptEntry),
    Feedback(FeedbackEvent),
    /// User-visible failure (device or transport).
    Error { message: String },
}

pub struct SessionEventStream<'a> {
    rx: &'a mut mpsc::Receiver<SessionEvent>,
}

impl<'a> SessionEventStream<'a> {
    #[must_use]
    pub const fn new(rx: &'a mut mpsc::Receiver<SessionEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for SessionEventStream<'_> {
    type Item = SessionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}
