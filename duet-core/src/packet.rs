//! Compressed packets and stream descriptions.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Rational number, used for stream time bases and aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

/// A compressed unit belonging to one elementary stream.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub data: Bytes,
    /// Presentation timestamp in stream time-base ticks
    pub pts: Option<i64>,
    /// Decode timestamp in stream time-base ticks
    pub dts: Option<i64>,
    /// Duration in stream time-base ticks
    pub duration: Option<i64>,
    pub keyframe: bool,
}

impl Packet {
    pub fn new(stream_index: usize, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            data: data.into(),
            pts: None,
            dts: None,
            duration: None,
            keyframe: false,
        }
    }

    pub fn with_timestamps(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    /// Payload size, the unit of queue byte accounting.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamKind {
    Video {
        width: u32,
        height: u32,
        /// Nominal time per frame (seconds)
        frame_duration: f64,
        sample_aspect_ratio: Option<Rational>,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
    },
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub codec: String,
    pub time_base: Rational,
    pub kind: StreamKind,
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        matches!(self.kind, StreamKind::Video { .. })
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, StreamKind::Audio { .. })
    }

    /// Convert a timestamp in this stream's time base to seconds.
    pub fn ticks_to_secs(&self, ticks: i64) -> f64 {
        ticks as f64 * self.time_base.as_f64()
    }
}
