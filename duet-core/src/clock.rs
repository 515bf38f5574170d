//! Playback clocks.
//!
//! Audio is the master clock. The audio-pull thread publishes where audio
//! playback is; the video stage tracks where decoding is; the scheduler
//! keeps its own frame timing and steers video toward audio.

use std::time::Instant;

use parking_lot::Mutex;

/// Bytes per second of interleaved signed 16-bit PCM.
pub fn s16_bytes_per_second(sample_rate: u32, channels: u16) -> f64 {
    2.0 * channels as f64 * sample_rate as f64
}

/// Time currently audible: the clock at the end of the last converted chunk
/// minus what has not yet been handed to the device.
pub fn audio_reference_clock(audio_clock: f64, unplayed_bytes: usize, bytes_per_second: f64) -> f64 {
    if bytes_per_second <= 0.0 {
        return audio_clock;
    }
    audio_clock - unplayed_bytes as f64 / bytes_per_second
}

// ============================================================================
// Audio Clock
// ============================================================================

/// One consistent view of the audio position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioSnapshot {
    /// Seconds of audio converted so far
    pub clock: f64,
    /// Converted bytes still waiting to be copied to the device
    pub unplayed_bytes: usize,
}

/// Audio clock written by the audio-pull thread, read by the scheduler.
///
/// Both fields are published together so the reader never pairs a new clock
/// with a stale byte count.
#[derive(Debug)]
pub struct AudioClock {
    snapshot: Mutex<AudioSnapshot>,
    bytes_per_second: f64,
}

impl AudioClock {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            snapshot: Mutex::new(AudioSnapshot::default()),
            bytes_per_second: s16_bytes_per_second(sample_rate, channels),
        }
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.bytes_per_second
    }

    pub fn publish(&self, snapshot: AudioSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn snapshot(&self) -> AudioSnapshot {
        *self.snapshot.lock()
    }

    /// The audio reference clock in seconds.
    pub fn reference(&self) -> f64 {
        let snap = self.snapshot();
        audio_reference_clock(snap.clock, snap.unplayed_bytes, self.bytes_per_second)
    }
}

// ============================================================================
// Video Clock
// ============================================================================

/// Predicted presentation time of the next decoded frame.
/// Owned by the video-decode stage.
#[derive(Debug, Clone)]
pub struct VideoClock {
    clock: f64,
    frame_duration: f64,
}

impl VideoClock {
    pub fn new(frame_duration: f64) -> Self {
        Self { clock: 0.0, frame_duration }
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Settle the timestamp of a frame and advance the clock past it.
    ///
    /// A non-zero `pts` is trusted and moves the clock; zero means unknown
    /// and the frame takes the current clock.
    pub fn synchronize(&mut self, pts: f64, repeat_count: u32) -> f64 {
        let pts = if pts != 0.0 {
            self.clock = pts;
            pts
        } else {
            self.clock
        };
        self.clock += self.frame_duration * (1.0 + 0.5 * repeat_count as f64);
        pts
    }
}

// ============================================================================
// Frame Timing (scheduler state)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    /// Accumulated ideal display time (wall-clock seconds)
    pub frame_timer: f64,
    pub frame_last_pts: f64,
    pub frame_last_delay: f64,
}

impl FrameTiming {
    pub fn new(now: f64, initial_delay: f64) -> Self {
        Self {
            frame_timer: now,
            frame_last_pts: 0.0,
            frame_last_delay: initial_delay,
        }
    }
}

/// Monotonic seconds since session start.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    pub fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}
