//! Built-in test pattern source.
//!
//! A deterministic clip: a bright bar sweeping across a luma gradient at
//! 25 fps, with a 440 Hz tone underneath. Packets are interleaved in
//! timestamp order like a real container would deliver them.

use bytes::Bytes;

use crate::decoder::{
    AudioDecoder, AudioFrame, AudioSamples, MediaSource, ReadOutcome, VideoDecoder, VideoFrame,
};
use crate::error::{PlaybackError, PlaybackResult};
use crate::packet::{Packet, Rational, StreamInfo, StreamKind};

/// Frames produced by a bare `testsrc`.
pub const DEFAULT_FRAMES: u32 = 250;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FPS: i64 = 25;
const SAMPLE_RATE: u32 = 44_100;
const CHANNELS: u16 = 2;
const SAMPLES_PER_PACKET: u32 = 1024;
const TONE_HZ: f64 = 440.0;

const VIDEO_INDEX: usize = 0;
const AUDIO_INDEX: usize = 1;

pub struct TestPatternSource {
    streams: Vec<StreamInfo>,
    frames: u32,
    next_frame: u32,
    total_samples: u64,
    next_sample: u64,
}

impl TestPatternSource {
    pub fn new(frames: u32) -> Self {
        let streams = vec![
            StreamInfo {
                index: VIDEO_INDEX,
                codec: "testsrc-video".into(),
                time_base: Rational::new(1, FPS),
                kind: StreamKind::Video {
                    width: WIDTH,
                    height: HEIGHT,
                    frame_duration: 1.0 / FPS as f64,
                    sample_aspect_ratio: Some(Rational::new(1, 1)),
                },
            },
            StreamInfo {
                index: AUDIO_INDEX,
                codec: "pcm_s16le".into(),
                time_base: Rational::new(1, SAMPLE_RATE as i64),
                kind: StreamKind::Audio { sample_rate: SAMPLE_RATE, channels: CHANNELS },
            },
        ];
        Self {
            streams,
            frames,
            next_frame: 0,
            total_samples: frames as u64 * SAMPLE_RATE as u64 / FPS as u64,
            next_sample: 0,
        }
    }

    fn video_packet(&mut self) -> Packet {
        let index = self.next_frame;
        self.next_frame += 1;
        let mut packet = Packet::new(VIDEO_INDEX, Bytes::copy_from_slice(&index.to_le_bytes()))
            .with_timestamps(Some(index as i64), Some(index as i64));
        packet.duration = Some(1);
        packet.keyframe = true;
        packet
    }

    fn audio_packet(&mut self) -> Packet {
        let start = self.next_sample;
        let count = (self.total_samples - start).min(SAMPLES_PER_PACKET as u64);
        self.next_sample += count;

        let mut pcm = Vec::with_capacity(count as usize * CHANNELS as usize * 2);
        for n in start..start + count {
            let t = n as f64 / SAMPLE_RATE as f64;
            let value = ((t * TONE_HZ * std::f64::consts::TAU).sin() * 0.25 * i16::MAX as f64) as i16;
            for _ in 0..CHANNELS {
                pcm.extend_from_slice(&value.to_le_bytes());
            }
        }
        let mut packet = Packet::new(AUDIO_INDEX, pcm)
            .with_timestamps(Some(start as i64), Some(start as i64));
        packet.duration = Some(count as i64);
        packet.keyframe = true;
        packet
    }
}

impl MediaSource for TestPatternSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> PlaybackResult<ReadOutcome> {
        let video_left = self.next_frame < self.frames;
        let audio_left = self.next_sample < self.total_samples;
        // Compare times as video_frame / FPS against sample / RATE.
        let video_first = (self.next_frame as u64) * SAMPLE_RATE as u64
            <= self.next_sample * FPS as u64;

        let packet = match (video_left, audio_left) {
            (false, false) => return Ok(ReadOutcome::EndOfStream),
            (true, false) => self.video_packet(),
            (false, true) => self.audio_packet(),
            (true, true) if video_first => self.video_packet(),
            (true, true) => self.audio_packet(),
        };
        Ok(ReadOutcome::Packet(packet))
    }

    fn open_video_decoder(&mut self, stream_index: usize) -> PlaybackResult<Box<dyn VideoDecoder>> {
        if stream_index != VIDEO_INDEX {
            return Err(PlaybackError::UnsupportedCodec {
                stream_index,
                codec: "testsrc-video".into(),
            });
        }
        Ok(Box::new(PatternDecoder))
    }

    fn open_audio_decoder(&mut self, stream_index: usize) -> PlaybackResult<Box<dyn AudioDecoder>> {
        if stream_index != AUDIO_INDEX {
            return Err(PlaybackError::UnsupportedCodec {
                stream_index,
                codec: "pcm_s16le".into(),
            });
        }
        Ok(Box::new(PcmDecoder { sample_rate: SAMPLE_RATE, channels: CHANNELS }))
    }

    fn name(&self) -> &str {
        "testsrc"
    }
}

/// Renders the frame whose index the packet carries.
struct PatternDecoder;

impl PatternDecoder {
    fn render(index: u32) -> [Vec<u8>; 3] {
        let (w, h) = (WIDTH as usize, HEIGHT as usize);
        let bar_x = (index as usize * 4) % w;
        let mut y = vec![0u8; w * h];
        for row in y.chunks_exact_mut(w) {
            for (x, px) in row.iter_mut().enumerate() {
                *px = if x.abs_diff(bar_x) < 8 {
                    235
                } else {
                    16 + (x * 200 / w) as u8
                };
            }
        }
        let tint = (index % 64) as u8 * 2;
        let chroma = (w / 2) * (h / 2);
        [y, vec![64 + tint; chroma], vec![192 - tint; chroma]]
    }
}

impl VideoDecoder for PatternDecoder {
    fn decode(&mut self, packet: &Packet) -> PlaybackResult<Vec<VideoFrame>> {
        let bytes: [u8; 4] = packet
            .data
            .as_ref()
            .try_into()
            .map_err(|_| PlaybackError::Decode(format!("bad pattern packet of {} bytes", packet.size())))?;
        Ok(vec![VideoFrame {
            planes: Self::render(u32::from_le_bytes(bytes)),
            strides: [WIDTH as usize, WIDTH as usize / 2, WIDTH as usize / 2],
            width: WIDTH,
            height: HEIGHT,
            pts: packet.pts,
            dts: packet.dts,
            repeat_count: 0,
        }])
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

/// Little-endian S16 PCM.
pub(crate) struct PcmDecoder {
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
}

impl AudioDecoder for PcmDecoder {
    fn decode(&mut self, packet: &Packet) -> PlaybackResult<Vec<AudioFrame>> {
        let samples = packet
            .data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(vec![AudioFrame {
            samples: AudioSamples::S16(samples),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }])
    }

    fn name(&self) -> &str {
        "pcm_s16le"
    }
}
