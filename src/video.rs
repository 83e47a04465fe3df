//! Camera collaborator: a periodic producer of base64 still frames.

use crate::protocol::models::MediaChunk;
use crate::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_FRAME_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub mime_type: String,
    /// Base64-encoded still image.
    pub data: String,
}

impl VideoFrame {
    #[must_use]
    pub fn jpeg(data: impl Into<String>) -> Self {
        Self {
            mime_type: DEFAULT_FRAME_MIME.to_string(),
            data: data.into(),
        }
    }

    #[must_use]
    pub fn into_media(self) -> MediaChunk {
        MediaChunk {
            mime_type: self.mime_type,
            data: self.data,
        }
    }
}

pub type FrameReceiver = mpsc::Receiver<VideoFrame>;

pub trait VideoSource: Send {
    /// Acquire the camera and start producing a frame every `interval`.
    ///
    /// # Errors
    /// Returns `Error::DeviceUnavailable` on permission or hardware failure.
    #[allow(clippy::result_large_err)]
    fn start(&mut self, interval: Duration) -> Result<FrameReceiver>;

    /// Release the camera. Must be idempotent.
    fn stop(&mut self);
}

/// Calls a grab function on a fixed interval. The grabber returns `None`
/// when no frame is ready; that tick is skipped.
pub struct IntervalFrameSource<F> {
    grab: Arc<Mutex<F>>,
    task: Option<JoinHandle<()>>,
}

impl<F> IntervalFrameSource<F>
where
    F: FnMut() -> Option<String> + Send + 'static,
{
    #[must_use]
    pub fn new(grab: F) -> Self {
        Self {
            grab: Arc::new(Mutex::new(grab)),
            task: None,
        }
    }
}

impl<F> VideoSource for IntervalFrameSource<F>
where
    F: FnMut() -> Option<String> + Send + 'static,
{
    fn start(&mut self, interval: Duration) -> Result<FrameReceiver> {
        self.stop();
        let grab = Arc::clone(&self.grab);
        let (tx, rx) = mpsc::channel(4);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let frame = match grab.lock() {
                    Ok(mut grab) => grab(),
                    Err(_) => break,
                };
                if let Some(data) = frame {
                    if tx.send(VideoFrame::jpeg(data)).await.is_err() {
                        break;
                    }
                }
            }
        }));
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<F> Drop for IntervalFrameSource<F> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interval_source_delivers_frames_until_stopped() {
        let mut n = 0;
        let mut source = IntervalFrameSource::new(move || {
            n += 1;
            (n % 2 == 1).then(|| format!("frame-{n}"))
        });
        let mut frames = source.start(Duration::from_millis(5)).unwrap();
        let first = frames.recv().await.unwrap();
        let second = frames.recv().await.unwrap();
        assert_eq!(first, VideoFrame::jpeg("frame-1"));
        assert_eq!(second.data, "frame-3");

        source.stop();
        while frames.recv().await.is_some() {}

        let mut restarted = source.start(Duration::from_millis(5)).unwrap();
        assert!(restarted.recv().await.unwrap().data.starts_with("frame-"));
    }
}
