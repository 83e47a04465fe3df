use coach_rt_rs::protocol::client_events::ClientMessage;
use coach_rt_rs::protocol::models::Setup;
use coach_rt_rs::protocol::server_events::ServerMessage;
use coach_rt_rs::transport::{BoxFuture, Channel, Connector};
use coach_rt_rs::{
    BufferedMicSource, CoachSession, Error, IntervalFrameSource, ManualClock, NullSink, Result, Role, Sentiment,
    Session, SessionEvent, SessionPhase,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type Inbound = mpsc::UnboundedSender<Result<Option<ServerMessage>>>;

struct ScriptedChannel {
    inbound: mpsc::UnboundedReceiver<Result<Option<ServerMessage>>>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
}

impl Channel for ScriptedChannel {
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>> {
        self.sent.lock().unwrap().push(message);
        Box::pin(async { Ok(()) })
    }

    fn next_message(&mut self) -> BoxFuture<'_, Result<Option<ServerMessage>>> {
        Box::pin(async move { self.inbound.recv().await.unwrap_or(Ok(None)) })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

struct ScriptedConnector {
    channel: Mutex<Option<ScriptedChannel>>,
}

impl Connector for ScriptedConnector {
    fn connect(&self, _setup: Setup) -> BoxFuture<'static, Result<Box<dyn Channel>>> {
        let channel = self.channel.lock().unwrap().take();
        Box::pin(async move {
            channel
                .map(|c| Box::new(c) as Box<dyn Channel>)
                .ok_or(Error::ConnectionClosed)
        })
    }
}

fn scripted() -> (ScriptedConnector, Inbound, Arc<Mutex<Vec<ClientMessage>>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let connector = ScriptedConnector {
        channel: Mutex::new(Some(ScriptedChannel {
            inbound: rx,
            sent: Arc::clone(&sent),
        })),
    };
    (connector, tx, sent)
}

fn frame(value: serde_json::Value) -> Result<Option<ServerMessage>> {
    Ok(Some(serde_json::from_value(value).unwrap()))
}

async fn wait_for(session: &mut Session, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = session.next_event().await.expect("session alive");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event arrives")
}

#[tokio::test]
async fn coaching_exchange_produces_transcript_and_feedback() {
    let (connector, remote, sent) = scripted();
    let mut session = CoachSession::builder()
        .connector(connector)
        .microphone(BufferedMicSource::new(vec![vec![0.1; 4096]]))
        .speaker(NullSink)
        .clock(ManualClock::new())
        .build()
        .unwrap();

    session.start().await.unwrap();
    assert_eq!(session.snapshot().await.unwrap().phase, SessionPhase::Active);

    remote
        .send(frame(json!({ "serverContent": { "inputTranscription": { "text": "I think um" } } })))
        .unwrap();
    remote
        .send(frame(json!({
            "serverContent": {
                "outputTranscription": { "text": "Try pausing instead." },
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAAAAAAAAA=" } }
                ] },
                "turnComplete": true
            }
        })))
        .unwrap();
    remote
        .send(frame(json!({ "toolCall": { "functionCalls": [{
            "id": "fb-1",
            "name": "provideFeedback",
            "args": { "category": "filler words", "message": "Swap \"um\" for a pause.", "sentiment": "improvement" }
        }] } })))
        .unwrap();

    let SessionEvent::Feedback(feedback) = wait_for(&mut session, |e| matches!(e, SessionEvent::Feedback(_))).await
    else {
        unreachable!()
    };
    assert_eq!(feedback.category, "filler words");
    assert_eq!(feedback.sentiment, Sentiment::Improvement);

    let summary = session.stop().await.unwrap();
    assert_eq!(summary.transcript.len(), 2);
    assert_eq!(summary.transcript[0].role, Role::User);
    assert_eq!(summary.transcript[0].text, "I think um");
    assert_eq!(summary.transcript[1].text, "Try pausing instead.");
    assert_eq!(summary.feedback, vec![feedback]);
    assert_eq!(session.snapshot().await.unwrap().phase, SessionPhase::Idle);

    let sent = sent.lock().unwrap();
    assert!(sent.iter().any(|m| matches!(m, ClientMessage::ToolResponse(r) if r.function_responses[0].id == "fb-1")));
}

#[tokio::test]
async fn camera_frames_flow_once_active() {
    let (connector, _remote, sent) = scripted();
    let mut n = 0;
    let camera = IntervalFrameSource::new(move || {
        n += 1;
        Some(format!("still-{n}"))
    });
    let config = coach_rt_rs::SessionConfig {
        video_interval_ms: 10,
        ..coach_rt_rs::SessionConfig::default()
    };
    let session = CoachSession::builder()
        .config(config)
        .connector(connector)
        .microphone(BufferedMicSource::default())
        .camera(camera)
        .speaker(NullSink)
        .build()
        .unwrap();

    session.start().await.unwrap();

    let mut forwarded = false;
    for _ in 0..200 {
        forwarded = sent.lock().unwrap().iter().any(|m| match m {
            ClientMessage::RealtimeInput(input) => input.media_chunks.iter().any(|c| c.mime_type == "image/jpeg"),
            _ => false,
        });
        if forwarded {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(forwarded, "no camera frame was forwarded");
    session.stop().await.unwrap();
}
