//! Gapless scheduling of streamed audio chunks.

use serde::Serialize;

use crate::services::audio::pcm16_duration_secs;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledChunk {
    /// Seconds on the session clock at which the chunk starts playing.
    pub start: f64,
    pub duration: f64,
}

/// Queues chunks back to back: each one starts at
/// `max(next_start_time, now)` and pushes `next_start_time` by its duration.
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    sample_rate: u32,
    next_start_time: f64,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_start_time: 0.0,
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn schedule(&mut self, now: f64, pcm_len: usize) -> ScheduledChunk {
        let duration = pcm16_duration_secs(pcm_len, self.sample_rate);
        let start = self.next_start_time.max(now);
        self.next_start_time = start + duration;
        ScheduledChunk { start, duration }
    }

    /// Drops everything queued, e.g. when the learner interrupts the model.
    pub fn reset(&mut self, now: f64) {
        self.next_start_time = now;
    }

    /// Seconds of audio still queued after `now`.
    pub fn buffered(&self, now: f64) -> f64 {
        (self.next_start_time - now).max(0.0)
    }
}
