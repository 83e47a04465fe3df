//! Microphone and speaker backends on top of cpal.
//!
//! cpal streams are not `Send`. Each stream is built, played and dropped on
//! one dedicated thread; the owning struct only holds a stop signal.

use super::capture::{CaptureConfig, MicSource, RawSamples};
use super::codec::{SegmentResampler, downmix_and_resample};
use super::playback::{HandleId, PlaybackHandle, PlaybackSink};
use crate::{Error, Result};
use ::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ::cpal::{Device, Host, SampleFormat, Stream, StreamConfig, StreamError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

const I16_SCALE: f32 = 32768.0;

fn unavailable(context: &str, err: impl std::fmt::Display) -> Error {
    Error::DeviceUnavailable(format!("{context}: {err}"))
}

/// Keeps one cpal stream alive on its own thread until stopped or dropped.
struct StreamThread {
    stop: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build and play a stream on a new thread. Returns once the stream is
    /// playing, or with the error that prevented it.
    #[allow(clippy::result_large_err)]
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let started = build().and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| unavailable("failed to start stream", e))?;
                    Ok(stream)
                });
                let stream = match started {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                // Blocks until stop() or until the owner is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| unavailable("failed to spawn audio thread", e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop: stop_tx,
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => Err(Error::DeviceUnavailable(
                "audio thread exited during setup".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn log_stream_error(err: StreamError) {
    tracing::warn!(error = %err, "audio stream error");
}

#[allow(clippy::result_large_err)]
fn find_device(host: &Host, name: Option<&str>, input: bool) -> Result<Device> {
    let Some(name) = name else {
        let device = if input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device.ok_or_else(|| {
            Error::DeviceUnavailable(format!(
                "no default {} device",
                if input { "input" } else { "output" }
            ))
        });
    };

    let matches = |device: &Device| device.name().is_ok_and(|n| n == name);
    let found = if input {
        host.input_devices()
            .map_err(|e| unavailable("failed to enumerate input devices", e))?
            .find(|device| matches(device))
    } else {
        host.output_devices()
            .map_err(|e| unavailable("failed to enumerate output devices", e))?
            .find(|device| matches(device))
    };
    found.ok_or_else(|| Error::DeviceUnavailable(format!("device not found: {name}")))
}

/// Default microphone, or a named one. Delivers mono samples at the
/// configured capture rate whatever the device's native format.
#[derive(Default)]
pub struct CpalMicSource {
    device_name: Option<String>,
    running: Option<StreamThread>,
}

impl CpalMicSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
            running: None,
        }
    }
}

impl MicSource for CpalMicSource {
    fn open(&mut self, config: &CaptureConfig) -> Result<RawSamples> {
        self.close();
        let (tx, rx) = mpsc::unbounded_channel();
        let device_name = self.device_name.clone();
        let target_rate = config.sample_rate;

        self.running = Some(StreamThread::spawn("coach-mic", move || {
            build_input_stream(device_name.as_deref(), target_rate, tx)
        })?);
        tracing::info!(target_rate, "microphone opened");
        Ok(rx)
    }

    fn close(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.stop();
            tracing::info!("microphone closed");
        }
    }
}

#[allow(clippy::result_large_err)]
fn build_input_stream(
    device_name: Option<&str>,
    target_rate: u32,
    tx: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<Stream> {
    let host = ::cpal::default_host();
    let device = find_device(&host, device_name, true)?;
    let supported = device
        .default_input_config()
        .map_err(|e| unavailable("failed to query input config", e))?;

    let channels = usize::from(supported.channels());
    let native_rate = supported.sample_rate().0;
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();
    tracing::debug!(channels, native_rate, ?format, "building input stream");

    let stream = match format {
        SampleFormat::F32 => {
            let mut resampler = SegmentResampler::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &::cpal::InputCallbackInfo| {
                    let mono = downmix_and_resample(data, channels, native_rate, native_rate);
                    let _ = tx.send(resampler.resample(&mono, native_rate, target_rate));
                },
                log_stream_error,
                None,
            )
        }
        SampleFormat::I16 => {
            let mut resampler = SegmentResampler::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &::cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data.iter().map(|&s| f32::from(s) / I16_SCALE).collect();
                    let mono = downmix_and_resample(&floats, channels, native_rate, native_rate);
                    let _ = tx.send(resampler.resample(&mono, native_rate, target_rate));
                },
                log_stream_error,
                None,
            )
        }
        other => {
            return Err(Error::DeviceUnavailable(format!(
                "unsupported input sample format: {other:?}"
            )));
        }
    };
    stream.map_err(|e| unavailable("failed to build input stream", e))
}

struct Segment {
    id: HandleId,
    samples: Vec<f32>,
    position: usize,
}

type SegmentQueue = Arc<Mutex<VecDeque<Segment>>>;

/// Default speaker. Handles play back to back in the order they were
/// handed over; halting drops a handle whether or not it has started.
pub struct CpalPlaybackSink {
    queue: SegmentQueue,
    device_rate: Arc<AtomicU32>,
    resampler: SegmentResampler,
    _running: StreamThread,
}

impl CpalPlaybackSink {
    /// Open the default output device.
    ///
    /// # Errors
    /// Returns `Error::DeviceUnavailable` if no usable output device exists.
    #[allow(clippy::result_large_err)]
    pub fn new() -> Result<Self> {
        Self::open(None)
    }

    /// # Errors
    /// Returns `Error::DeviceUnavailable` if the device is missing or unusable.
    #[allow(clippy::result_large_err)]
    pub fn with_device(name: &str) -> Result<Self> {
        Self::open(Some(name.to_string()))
    }

    #[allow(clippy::result_large_err)]
    fn open(device_name: Option<String>) -> Result<Self> {
        let queue: SegmentQueue = Arc::new(Mutex::new(VecDeque::new()));
        let device_rate = Arc::new(AtomicU32::new(0));
        let running = {
            let queue = Arc::clone(&queue);
            let device_rate = Arc::clone(&device_rate);
            StreamThread::spawn("coach-speaker", move || {
                build_output_stream(device_name.as_deref(), &queue, &device_rate)
            })?
        };
        tracing::info!(rate = device_rate.load(Ordering::SeqCst), "speaker opened");
        Ok(Self {
            queue,
            device_rate,
            resampler: SegmentResampler::new(),
            _running: running,
        })
    }

    fn with_queue(&self, f: impl FnOnce(&mut VecDeque<Segment>)) {
        match self.queue.lock() {
            Ok(mut queue) => f(&mut queue),
            Err(_) => tracing::warn!("speaker queue poisoned"),
        }
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn play(&mut self, handle: &PlaybackHandle) {
        let rate = self.device_rate.load(Ordering::SeqCst);
        let samples = self.resampler.resample(&handle.samples, handle.sample_rate, rate);
        self.with_queue(|queue| {
            queue.push_back(Segment {
                id: handle.id,
                samples,
                position: 0,
            });
        });
    }

    fn halt(&mut self, id: HandleId) {
        self.with_queue(|queue| queue.retain(|segment| segment.id != id));
    }

    fn halt_all(&mut self) {
        self.resampler.reset();
        self.with_queue(VecDeque::clear);
    }
}

#[allow(clippy::result_large_err)]
fn build_output_stream(
    device_name: Option<&str>,
    queue: &SegmentQueue,
    device_rate: &AtomicU32,
) -> Result<Stream> {
    let host = ::cpal::default_host();
    let device = find_device(&host, device_name, false)?;
    let supported = device
        .default_output_config()
        .map_err(|e| unavailable("failed to query output config", e))?;

    let channels = usize::from(supported.channels()).max(1);
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();
    device_rate.store(supported.sample_rate().0, Ordering::SeqCst);
    tracing::debug!(channels, rate = supported.sample_rate().0, ?format, "building output stream");

    let stream = match format {
        SampleFormat::F32 => {
            let queue = Arc::clone(queue);
            device.build_output_stream(
                &config,
                move |out: &mut [f32], _: &::cpal::OutputCallbackInfo| {
                    fill_frames(&queue, out, channels, |s| s);
                },
                log_stream_error,
                None,
            )
        }
        SampleFormat::I16 => {
            let queue = Arc::clone(queue);
            device.build_output_stream(
                &config,
                move |out: &mut [i16], _: &::cpal::OutputCallbackInfo| {
                    #[allow(clippy::cast_possible_truncation)]
                    fill_frames(&queue, out, channels, |s| (s * (I16_SCALE - 1.0)) as i16);
                },
                log_stream_error,
                None,
            )
        }
        other => {
            return Err(Error::DeviceUnavailable(format!(
                "unsupported output sample format: {other:?}"
            )));
        }
    };
    stream.map_err(|e| unavailable("failed to build output stream", e))
}

/// Write the next mono sample to every channel of each frame; silence once
/// the queue runs dry. Blocks while the control side holds the queue.
fn fill_frames<T: Copy>(queue: &SegmentQueue, out: &mut [T], channels: usize, convert: impl Fn(f32) -> T) {
    let Ok(mut queue) = queue.lock() else {
        out.fill(convert(0.0));
        return;
    };
    for frame in out.chunks_mut(channels) {
        let sample = next_sample(&mut queue);
        frame.fill(convert(sample));
    }
}

fn next_sample(queue: &mut VecDeque<Segment>) -> f32 {
    while let Some(front) = queue.front_mut() {
        if let Some(&sample) = front.samples.get(front.position) {
            front.position += 1;
            return sample.clamp(-1.0, 1.0);
        }
        queue.pop_front();
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_play_back_to_back_then_silence() {
        let queue: SegmentQueue = Arc::new(Mutex::new(VecDeque::from([
            Segment { id: 1, samples: vec![0.1, 0.2], position: 0 },
            Segment { id: 2, samples: vec![0.3], position: 0 },
        ])));
        let mut out = [9.0_f32; 8];
        fill_frames(&queue, &mut out, 2, |s| s);
        assert_eq!(out, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.0, 0.0]);
        assert!(queue.lock().unwrap().is_empty());
    }

    #[test]
    fn contended_queue_still_delivers_samples() {
        let queue: SegmentQueue = Arc::new(Mutex::new(VecDeque::from([Segment {
            id: 1,
            samples: vec![0.5; 4],
            position: 0,
        }])));
        let (held_tx, held_rx) = std_mpsc::channel();
        let holder = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let _guard = queue.lock().unwrap();
                held_tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(20));
            })
        };
        held_rx.recv().unwrap();

        let mut out = [0.0_f32; 4];
        fill_frames(&queue, &mut out, 1, |s| s);
        holder.join().unwrap();
        assert_eq!(out, [0.5; 4]);
    }
}
