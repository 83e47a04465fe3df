//! The session actor. One task owns the devices, the channel and all
//! session state; the public handles talk to it over a command channel.

use super::config::SessionConfig;
use super::events::{SessionEvent, SessionEventStream};
use super::state::{SessionPhase, SessionSnapshot, SessionState, SessionSummary};
use crate::audio::capture::{AudioCaptureEncoder, ChunkStream};
use crate::audio::codec::AudioChunk;
use crate::audio::playback::PlaybackScheduler;
use crate::clock::Clock;
use crate::feedback::ToolCallDispatcher;
use crate::protocol::inbound::InboundMessage;
use crate::protocol::models::MediaChunk;
use crate::protocol::server_events::ServerMessage;
use crate::transcript::Role;
use crate::transport::{self, BoxFuture, Channel, Connector};
use crate::video::{FrameReceiver, VideoFrame, VideoSource};
use crate::{Error, Result};
use chrono::Utc;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// Shown to the user when the channel fails mid-session.
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost. Restart the session to continue.";

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

type PendingConnect = BoxFuture<'static, Result<Box<dyn Channel>>>;

enum Command {
    Start {
        respond: oneshot::Sender<Result<()>>,
    },
    Stop {
        respond: oneshot::Sender<SessionSummary>,
    },
    SendFrame {
        frame: VideoFrame,
        respond: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        respond: oneshot::Sender<SessionSnapshot>,
    },
}

/// Cloneable control surface, e.g. for a camera thread or a UI callback.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Acquire devices, connect, and begin streaming. Resolves once the
    /// session is active.
    ///
    /// # Errors
    /// Returns `Error::DeviceUnavailable` if a device cannot be acquired (the
    /// session stays usable), a transport error if connecting fails (the
    /// session becomes errored), `Error::Cancelled` if `stop` was called
    /// while connecting, and `Error::InvalidState` if the session is not idle.
    pub async fn start(&self) -> Result<()> {
        self.request(|respond| Command::Start { respond }).await?
    }

    /// Tear the session down and return its transcript and feedback.
    ///
    /// # Errors
    /// Returns `Error::ConnectionClosed` if the controller task is gone.
    pub async fn stop(&self) -> Result<SessionSummary> {
        self.request(|respond| Command::Stop { respond }).await
    }

    /// Forward a camera still. Frames are dropped unless the session is active.
    ///
    /// # Errors
    /// Returns an error if the channel failed while sending.
    pub async fn send_frame(&self, frame: VideoFrame) -> Result<()> {
        self.request(|respond| Command::SendFrame { frame, respond }).await?
    }

    /// # Errors
    /// Returns `Error::ConnectionClosed` if the controller task is gone.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|respond| Command::Snapshot { respond }).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }
}

/// A coaching session. Created idle by [`crate::CoachSession::builder`].
pub struct Session {
    handle: SessionHandle,
    event_rx: mpsc::Receiver<SessionEvent>,
}

pub(crate) struct SessionParts {
    pub config: SessionConfig,
    pub connector: Arc<dyn Connector>,
    pub encoder: AudioCaptureEncoder,
    pub video: Option<Box<dyn VideoSource>>,
    pub playback: PlaybackScheduler,
    pub clock: Arc<dyn Clock>,
}

impl Session {
    /// Spawns the controller task; must be called inside a Tokio runtime.
    pub(crate) fn spawn(parts: SessionParts) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let actor = SessionActor {
            config: parts.config,
            connector: parts.connector,
            clock: parts.clock,
            encoder: parts.encoder,
            video: parts.video,
            dispatcher: ToolCallDispatcher::new(),
            state: SessionState::new(parts.playback),
            channel: None,
            chunks: None,
            frames: None,
            connecting: None,
            pending_start: None,
            events: event_tx,
        };
        tokio::spawn(actor.run(cmd_rx));

        Self {
            handle: SessionHandle { sender: cmd_tx },
            event_rx,
        }
    }

    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// See [`SessionHandle::start`].
    ///
    /// # Errors
    /// See [`SessionHandle::start`].
    pub async fn start(&self) -> Result<()> {
        self.handle.start().await
    }

    /// # Errors
    /// Returns `Error::ConnectionClosed` if the controller task is gone.
    pub async fn stop(&self) -> Result<SessionSummary> {
        self.handle.stop().await
    }

    /// # Errors
    /// Returns an error if the channel failed while sending.
    pub async fn send_frame(&self, frame: VideoFrame) -> Result<()> {
        self.handle.send_frame(frame).await
    }

    /// # Errors
    /// Returns `Error::ConnectionClosed` if the controller task is gone.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.handle.snapshot().await
    }

    /// Await the next UI event. `None` once the controller task has exited.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    #[must_use]
    pub fn events(&mut self) -> SessionEventStream<'_> {
        SessionEventStream::new(&mut self.event_rx)
    }
}

struct SessionActor {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    encoder: AudioCaptureEncoder,
    video: Option<Box<dyn VideoSource>>,
    dispatcher: ToolCallDispatcher,
    state: SessionState,
    channel: Option<Box<dyn Channel>>,
    chunks: Option<ChunkStream>,
    frames: Option<FrameReceiver>,
    connecting: Option<PendingConnect>,
    pending_start: Option<oneshot::Sender<Result<()>>>,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut reap = tokio::time::interval(self.config.playback_poll());
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                connected = poll_connect(&mut self.connecting) => self.on_connected(connected),
                message = next_message(&mut self.channel) => self.on_message(message).await,
                chunk = next_chunk(&mut self.chunks) => self.on_chunk(chunk).await,
                frame = next_frame(&mut self.frames), if self.state.phase == SessionPhase::Active => {
                    self.on_frame(frame).await;
                }
                _ = reap.tick() => self.on_reap(),
            }
        }

        self.teardown();
        tracing::debug!("session controller exited");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { respond } => self.start(respond),
            Command::Stop { respond } => {
                let _ = respond.send(self.stop());
            }
            Command::SendFrame { frame, respond } => {
                let result = self.send_frame(frame).await;
                let _ = respond.send(result);
            }
            Command::Snapshot { respond } => {
                let _ = respond.send(self.state.snapshot());
            }
        }
    }

    fn start(&mut self, respond: oneshot::Sender<Result<()>>) {
        match self.state.phase {
            SessionPhase::Idle => {}
            SessionPhase::Errored => {
                let _ = respond.send(Err(Error::InvalidState(
                    "session has failed; create a new session".to_string(),
                )));
                return;
            }
            phase => {
                let _ = respond.send(Err(Error::InvalidState(format!("cannot start while {phase}"))));
                return;
            }
        }

        // A fresh run starts with empty logs.
        drop(self.state.take_summary());
        self.set_phase(SessionPhase::Connecting);

        let setup = match self.acquire_devices().and_then(|()| self.config.to_setup()) {
            Ok(setup) => setup,
            Err(err) => {
                tracing::warn!(error = %err, "session start aborted");
                self.release_devices();
                self.set_phase(SessionPhase::Idle);
                if err.is_user_visible() {
                    self.emit(SessionEvent::Error { message: err.to_string() });
                }
                let _ = respond.send(Err(err));
                return;
            }
        };

        tracing::info!(model = %self.config.model, "connecting session");
        self.connecting = Some(self.connector.connect(setup));
        self.pending_start = Some(respond);
    }

    #[allow(clippy::result_large_err)]
    fn acquire_devices(&mut self) -> Result<()> {
        self.encoder.acquire()?;
        if let Some(video) = self.video.as_mut() {
            self.frames = Some(video.start(self.config.video_interval())?);
        }
        Ok(())
    }

    fn release_devices(&mut self) {
        self.encoder.stop();
        if let Some(video) = self.video.as_mut() {
            video.stop();
        }
        self.chunks = None;
        self.frames = None;
    }

    fn on_connected(&mut self, result: Result<Box<dyn Channel>>) {
        self.connecting = None;
        let channel = match result {
            Ok(channel) => channel,
            Err(err) => {
                let message = format!("Could not connect: {err}");
                self.fail(err, &message);
                return;
            }
        };

        self.channel = Some(channel);
        match self.encoder.start_streaming() {
            Ok(chunks) => {
                self.chunks = Some(chunks);
                self.set_phase(SessionPhase::Active);
                tracing::info!("session active");
                if let Some(respond) = self.pending_start.take() {
                    let _ = respond.send(Ok(()));
                }
            }
            Err(err) => self.fail(err, CONNECTION_LOST_MESSAGE),
        }
    }

    fn stop(&mut self) -> SessionSummary {
        match self.state.phase {
            SessionPhase::Idle | SessionPhase::Errored => return self.state.take_summary(),
            SessionPhase::Connecting => {
                tracing::info!("connect cancelled by stop");
                if let Some(respond) = self.pending_start.take() {
                    let _ = respond.send(Err(Error::Cancelled));
                }
            }
            SessionPhase::Active | SessionPhase::Closing => {}
        }

        self.set_phase(SessionPhase::Closing);
        self.teardown();
        self.set_phase(SessionPhase::Idle);
        tracing::info!("session stopped");
        self.state.take_summary()
    }

    /// Release everything held for the running session. The transcript and
    /// feedback logs survive until the next start or stop.
    fn teardown(&mut self) {
        self.connecting = None;
        self.release_devices();
        self.set_speaking(false);
        self.state.clear();
        if let Some(mut channel) = self.channel.take() {
            tokio::spawn(async move {
                if let Err(err) = channel.close().await {
                    tracing::debug!(error = %err, "channel close failed");
                }
            });
        }
    }

    fn fail(&mut self, err: Error, message: &str) {
        tracing::warn!(error = %err, phase = %self.state.phase, "session failed");
        self.teardown();
        self.set_phase(SessionPhase::Errored);
        self.emit(SessionEvent::Error {
            message: message.to_string(),
        });
        if let Some(respond) = self.pending_start.take() {
            let _ = respond.send(Err(err));
        }
    }

    async fn on_message(&mut self, message: Result<Option<ServerMessage>>) {
        match message {
            Ok(Some(message)) => {
                for inbound in message.into_inbound() {
                    if self.state.phase != SessionPhase::Active {
                        tracing::debug!(kind = inbound.kind(), "dropping inbound message");
                        continue;
                    }
                    self.handle_inbound(inbound).await;
                }
            }
            Ok(None) => {
                tracing::info!("remote closed the session");
                self.teardown();
                self.set_phase(SessionPhase::Idle);
            }
            Err(err) => self.fail(err, CONNECTION_LOST_MESSAGE),
        }
    }

    async fn handle_inbound(&mut self, message: InboundMessage) {
        tracing::trace!(kind = message.kind(), "inbound");
        match message {
            InboundMessage::AudioData(media) => self.play(&media),
            InboundMessage::Interrupted => {
                self.state.playback.interrupt();
                self.set_speaking(false);
            }
            InboundMessage::InputTranscriptionDelta(text) => self.append_transcript(Role::User, &text),
            InboundMessage::OutputTranscriptionDelta(text) => self.append_transcript(Role::Model, &text),
            InboundMessage::TurnComplete => {
                for entry in self.state.transcripts.flush_turn(Utc::now()) {
                    self.state.transcript_log.push(entry.clone());
                    self.emit(SessionEvent::TranscriptEntry(entry));
                }
            }
            InboundMessage::ToolCall(call) => {
                let dispatch = self.dispatcher.dispatch(&call);
                if let Ok(feedback) = dispatch.feedback {
                    tracing::debug!(category = %feedback.category, "feedback recorded");
                    self.state.feedback_history.push(feedback.clone());
                    self.emit(SessionEvent::Feedback(feedback));
                }
                let Some(channel) = self.channel.as_mut() else {
                    return;
                };
                let sent = transport::send_acknowledgment(channel.as_mut(), dispatch.acknowledgment).await;
                if let Err(err) = sent {
                    self.fail(err, CONNECTION_LOST_MESSAGE);
                }
            }
        }
    }

    fn play(&mut self, media: &MediaChunk) {
        // The indicator flips on arrival, before decoding.
        self.set_speaking(true);
        let scheduled = match AudioChunk::from_media(media) {
            Ok(chunk) => self.state.playback.enqueue(&chunk, self.clock.now()).is_ok(),
            Err(err) => {
                tracing::warn!(error = %err, mime_type = %media.mime_type, "dropping inbound audio");
                false
            }
        };
        if !scheduled && !self.state.playback.is_speaking() {
            self.set_speaking(false);
        }
    }

    fn append_transcript(&mut self, role: Role, fragment: &str) {
        self.state.transcripts.append(role, fragment);
        let text = self.state.transcripts.pending(role).to_string();
        self.emit(SessionEvent::PartialTranscript { role, text });
    }

    async fn on_chunk(&mut self, chunk: Option<AudioChunk>) {
        match chunk {
            Some(chunk) => {
                let _ = self.forward(chunk.to_media()).await;
            }
            None => {
                tracing::warn!("microphone stream ended");
                self.chunks = None;
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<VideoFrame>) {
        match frame {
            Some(frame) => {
                let _ = self.forward(frame.into_media()).await;
            }
            None => {
                tracing::debug!("camera stream ended");
                self.frames = None;
            }
        }
    }

    async fn send_frame(&mut self, frame: VideoFrame) -> Result<()> {
        if self.state.phase != SessionPhase::Active {
            tracing::trace!(phase = %self.state.phase, "dropping frame");
            return Ok(());
        }
        self.forward(frame.into_media()).await
    }

    async fn forward(&mut self, media: MediaChunk) -> Result<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };
        let sent = transport::send_media(channel.as_mut(), media).await;
        if let Err(err) = sent {
            self.fail(err, CONNECTION_LOST_MESSAGE);
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    fn on_reap(&mut self) {
        if self.state.phase == SessionPhase::Active && self.state.playback.reap(self.clock.now()) {
            self.set_speaking(false);
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.state.phase == phase {
            return;
        }
        tracing::debug!(from = %self.state.phase, to = %phase, "session phase changed");
        self.state.phase = phase;
        self.emit(SessionEvent::PhaseChanged(phase));
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.state.speaking == speaking {
            return;
        }
        self.state.speaking = speaking;
        self.emit(SessionEvent::SpeakingChanged(speaking));
    }

    /// Never blocks the control loop on a slow consumer.
    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(?event, "event buffer full, dropping event");
            }
        }
    }
}

async fn poll_connect(connecting: &mut Option<PendingConnect>) -> Result<Box<dyn Channel>> {
    match connecting {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_message(channel: &mut Option<Box<dyn Channel>>) -> Result<Option<ServerMessage>> {
    match channel {
        Some(channel) => channel.next_message().await,
        None => pending().await,
    }
}

async fn next_chunk(chunks: &mut Option<ChunkStream>) -> Option<AudioChunk> {
    match chunks {
        Some(chunks) => chunks.next_chunk().await,
        None => pending().await,
    }
}

async fn next_frame(frames: &mut Option<FrameReceiver>) -> Option<VideoFrame> {
    match frames {
        Some(frames) => frames.recv().await,
        None => pending().await,
    }
}
