//! Session configuration.
//!
//! Defaults are the classic audio-master timing constants. Every field can be
//! overridden from a JSON file; missing fields keep their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlaybackError, PlaybackResult};

/// Audio queue byte watermark before the demuxer backs off.
pub const DEFAULT_AUDIO_WATERMARK: usize = 5 * 16 * 1024;
/// Video queue byte watermark before the demuxer backs off.
pub const DEFAULT_VIDEO_WATERMARK: usize = 5 * 256 * 1024;
/// Below this A/V difference no correction is applied (seconds).
pub const AV_SYNC_THRESHOLD: f64 = 0.01;
/// Beyond this A/V difference the clocks are considered diverged (seconds).
pub const AV_NOSYNC_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Audio packet queue watermark in bytes
    pub audio_watermark_bytes: usize,
    /// Video packet queue watermark in bytes
    pub video_watermark_bytes: usize,
    /// Decoded pictures buffered ahead of display
    pub picture_queue_capacity: usize,
    /// Minimum sync threshold (seconds)
    pub sync_threshold: f64,
    /// Drift beyond which no correction is attempted (seconds)
    pub nosync_threshold: f64,
    /// Floor for the scheduler's re-arm delay (seconds)
    pub min_refresh_delay: f64,
    /// Re-arm delay while no picture is ready (milliseconds)
    pub empty_poll_ms: u64,
    /// Delay before the first refresh (milliseconds)
    pub initial_refresh_ms: u64,
    /// Inter-frame delay assumed before the first frame (seconds)
    pub initial_frame_delay: f64,
    /// Demuxer sleep when a watermark is exceeded (milliseconds)
    pub demux_backoff_ms: u64,
    /// Requested audio device buffer, in sample frames
    pub audio_buffer_samples: u32,
    /// Longest the audio callback waits for a packet (milliseconds)
    pub audio_packet_wait_ms: u64,
    /// Silence emitted when audio decode yields nothing (bytes)
    pub silence_chunk_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio_watermark_bytes: DEFAULT_AUDIO_WATERMARK,
            video_watermark_bytes: DEFAULT_VIDEO_WATERMARK,
            picture_queue_capacity: 4,
            sync_threshold: AV_SYNC_THRESHOLD,
            nosync_threshold: AV_NOSYNC_THRESHOLD,
            min_refresh_delay: 0.010,
            empty_poll_ms: 1,
            initial_refresh_ms: 100,
            initial_frame_delay: 0.040,
            demux_backoff_ms: 10,
            audio_buffer_samples: 1024,
            audio_packet_wait_ms: 5,
            silence_chunk_bytes: 1024,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file and validate.
    pub fn from_json_file(path: &Path) -> PlaybackResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PlaybackError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> PlaybackResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| PlaybackError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PlaybackResult<()> {
        if self.picture_queue_capacity == 0 {
            return Err(PlaybackError::Config(
                "picture_queue_capacity must be at least 1".into(),
            ));
        }
        if self.sync_threshold <= 0.0 || self.nosync_threshold <= self.sync_threshold {
            return Err(PlaybackError::Config(format!(
                "need 0 < sync_threshold ({}) < nosync_threshold ({})",
                self.sync_threshold, self.nosync_threshold
            )));
        }
        if self.min_refresh_delay <= 0.0 {
            return Err(PlaybackError::Config("min_refresh_delay must be positive".into()));
        }
        if self.audio_buffer_samples == 0 || self.silence_chunk_bytes == 0 {
            return Err(PlaybackError::Config("audio buffer sizes must be non-zero".into()));
        }
        Ok(())
    }

    pub fn demux_backoff(&self) -> Duration {
        Duration::from_millis(self.demux_backoff_ms)
    }

    pub fn audio_packet_wait(&self) -> Duration {
        Duration::from_millis(self.audio_packet_wait_ms)
    }
}
