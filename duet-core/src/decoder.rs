//! # Decoder collaborator
//!
//! A [`MediaSource`] demultiplexes a container into packets and hands out
//! per-stream decoders. Decoders are opened before the demux thread starts,
//! then moved to the stage that owns them.

use std::path::Path;

use crate::error::{PlaybackError, PlaybackResult};
use crate::packet::{Packet, StreamInfo};

/// Result of one demuxer read.
#[derive(Debug)]
pub enum ReadOutcome {
    Packet(Packet),
    /// Transient stall, try again shortly
    Retry,
    EndOfStream,
}

pub trait MediaSource: Send {
    /// Every stream in the container, indexed by `StreamInfo::index`.
    fn streams(&self) -> &[StreamInfo];

    fn read_packet(&mut self) -> PlaybackResult<ReadOutcome>;

    /// Fails with `UnsupportedCodec` when no decoder handles the stream.
    fn open_video_decoder(&mut self, stream_index: usize) -> PlaybackResult<Box<dyn VideoDecoder>>;

    fn open_audio_decoder(&mut self, stream_index: usize) -> PlaybackResult<Box<dyn AudioDecoder>>;

    /// Short name for logs
    fn name(&self) -> &str;
}

// ============================================================================
// Video
// ============================================================================

/// A decoded picture in planar YUV 4:2:0 with decoder-reported timestamps.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub planes: [Vec<u8>; 3],
    pub strides: [usize; 3],
    pub width: u32,
    pub height: u32,
    /// Reordered presentation timestamp (stream ticks)
    pub pts: Option<i64>,
    /// Decode timestamp of the packet that produced the frame (stream ticks)
    pub dts: Option<i64>,
    /// Extra field repeats signalled by the bitstream
    pub repeat_count: u32,
}

impl VideoFrame {
    pub fn plane_refs(&self) -> [&[u8]; 3] {
        [&self.planes[0], &self.planes[1], &self.planes[2]]
    }
}

pub trait VideoDecoder: Send {
    /// Decode one packet. May yield zero or more frames.
    fn decode(&mut self, packet: &Packet) -> PlaybackResult<Vec<VideoFrame>>;

    /// Drain frames still buffered inside the decoder.
    fn flush(&mut self) -> PlaybackResult<Vec<VideoFrame>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str;
}

// ============================================================================
// Audio
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AudioSamples {
    F32(Vec<f32>),
    S16(Vec<i16>),
}

/// Interleaved decoded audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: AudioSamples,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        let total = match &self.samples {
            AudioSamples::F32(s) => s.len(),
            AudioSamples::S16(s) => s.len(),
        };
        if self.channels == 0 {
            0
        } else {
            total / self.channels as usize
        }
    }
}

pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> PlaybackResult<Vec<AudioFrame>>;

    fn name(&self) -> &str;
}

// ============================================================================
// Source selection
// ============================================================================

/// Prefix selecting the built-in test pattern, optionally `testsrc:<frames>`.
pub const TEST_SOURCE: &str = "testsrc";

/// Open a media source by name: the test pattern or a container file.
pub fn open_source(name: &str) -> PlaybackResult<Box<dyn MediaSource>> {
    if let Some(rest) = name.strip_prefix(TEST_SOURCE) {
        let frames = match rest.strip_prefix(':') {
            Some(count) => count
                .parse::<u32>()
                .map_err(|e| PlaybackError::open(name, format!("bad frame count: {}", e)))?,
            None if rest.is_empty() => crate::synthetic::DEFAULT_FRAMES,
            None => return Err(PlaybackError::open(name, "unknown test source")),
        };
        return Ok(Box::new(crate::synthetic::TestPatternSource::new(frames)));
    }

    let path = Path::new(name);
    if !path.exists() {
        return Err(PlaybackError::open(name, "no such file"));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        #[cfg(feature = "mkv")]
        "mkv" | "webm" | "mka" => Ok(Box::new(crate::mkv::MkvSource::open(path)?)),
        _ => Err(PlaybackError::open(
            name,
            format!("unsupported container '{}'", ext),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_test_pattern() {
        let source = open_source("testsrc:12").expect("source");
        assert_eq!(source.streams().len(), 2);
        assert!(open_source("testsrc").is_ok());
    }

    #[test]
    fn rejects_bad_sources() {
        assert!(matches!(open_source("testsrc:abc"), Err(PlaybackError::Open { .. })));
        assert!(matches!(open_source("testsrcx"), Err(PlaybackError::Open { .. })));
        assert!(matches!(
            open_source("/definitely/not/here.mkv"),
            Err(PlaybackError::Open { .. })
        ));
    }

    #[test]
    fn rejects_unknown_container() {
        let file = tempfile::Builder::new().suffix(".xyz").tempfile().expect("temp file");
        let name = file.path().to_string_lossy().into_owned();
        assert!(matches!(open_source(&name), Err(PlaybackError::Open { .. })));
    }

    #[test]
    fn audio_frame_counts_per_channel() {
        let frame = AudioFrame {
            samples: AudioSamples::S16(vec![0; 1024]),
            sample_rate: 44_100,
            channels: 2,
        };
        assert_eq!(frame.frames(), 512);
    }
}
