//! Gapless, interruption-aware scheduling of inbound model speech.
//!
//! Times are seconds on the session clock (see [`crate::clock`]). Each
//! enqueued chunk starts exactly where the previous one ends, or immediately
//! when the output is idle. An interruption voids everything queued.

use super::codec::{self, AudioChunk};
use crate::error::DecodeError;
use std::collections::BTreeMap;

pub type HandleId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackHandle {
    pub id: HandleId,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub scheduled_start: f64,
    pub duration_seconds: f64,
}

impl PlaybackHandle {
    #[must_use]
    pub fn scheduled_end(&self) -> f64 {
        self.scheduled_start + self.duration_seconds
    }
}

/// Output device seam. The scheduler decides *when*; the sink makes it audible.
pub trait PlaybackSink: Send {
    fn play(&mut self, handle: &PlaybackHandle);
    fn halt(&mut self, id: HandleId);
    fn halt_all(&mut self);
}

/// Discards audio. Scheduling state still advances normally.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn play(&mut self, _handle: &PlaybackHandle) {}
    fn halt(&mut self, _id: HandleId) {}
    fn halt_all(&mut self) {}
}

/// Window of a handle, retained after the samples are handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: HandleId,
    pub scheduled_start: f64,
    pub duration_seconds: f64,
}

pub struct PlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    active: BTreeMap<HandleId, Scheduled>,
    next_start_time: f64,
    next_id: HandleId,
}

impl PlaybackScheduler {
    #[must_use]
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            sink,
            active: BTreeMap::new(),
            next_start_time: 0.0,
            next_id: 1,
        }
    }

    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Active handle windows ordered by creation.
    #[must_use]
    pub fn active(&self) -> Vec<Scheduled> {
        self.active.values().copied().collect()
    }

    /// Decode and schedule a chunk. On decode failure the chunk is dropped and
    /// no scheduling state changes.
    ///
    /// # Errors
    /// Returns the `DecodeError` of the dropped chunk.
    pub fn enqueue(&mut self, chunk: &AudioChunk, clock_now: f64) -> Result<Scheduled, DecodeError> {
        let samples = match codec::decode(chunk) {
            Ok(samples) => samples,
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable audio chunk");
                return Err(err);
            }
        };

        let start = self.next_start_time.max(clock_now);
        let handle = PlaybackHandle {
            id: self.next_id,
            samples,
            sample_rate: chunk.sample_rate(),
            scheduled_start: start,
            duration_seconds: chunk.duration_seconds(),
        };
        self.next_id += 1;
        self.next_start_time = handle.scheduled_end();

        let scheduled = Scheduled {
            id: handle.id,
            scheduled_start: handle.scheduled_start,
            duration_seconds: handle.duration_seconds,
        };
        self.active.insert(handle.id, scheduled);
        self.sink.play(&handle);
        tracing::trace!(
            id = handle.id,
            start = handle.scheduled_start,
            duration = handle.duration_seconds,
            "scheduled playback"
        );
        Ok(scheduled)
    }

    /// Natural end of one handle. Returns `true` if this silenced the output.
    pub fn complete(&mut self, id: HandleId) -> bool {
        self.active.remove(&id).is_some() && self.active.is_empty()
    }

    /// Complete every handle whose window has fully elapsed at `clock_now`.
    /// Returns `true` if the output fell silent.
    pub fn reap(&mut self, clock_now: f64) -> bool {
        let ended: Vec<HandleId> = self
            .active
            .values()
            .filter(|h| h.scheduled_start + h.duration_seconds <= clock_now)
            .map(|h| h.id)
            .collect();
        let mut silenced = false;
        for id in ended {
            silenced |= self.complete(id);
        }
        silenced
    }

    /// Barge-in: halt and forget everything queued or playing.
    ///
    /// `next_start_time` resets to 0 rather than to the current clock; the
    /// next enqueue still starts at `max(0, now)` = now.
    pub fn interrupt(&mut self) {
        for id in self.active.keys() {
            self.sink.halt(*id);
        }
        let dropped = self.active.len();
        self.active.clear();
        self.next_start_time = 0.0;
        tracing::debug!(dropped, "playback interrupted");
    }

    /// Session teardown: interrupt, then flush anything the sink still buffers.
    pub fn release(&mut self) {
        self.interrupt();
        self.sink.halt_all();
    }
}
