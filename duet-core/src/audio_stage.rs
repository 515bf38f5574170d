//! Audio pull stage, driven from the audio device's thread.
//!
//! Each device callback is served from a buffer of converted bytes. When the
//! buffer runs dry the stage decodes more, waiting at most a short timeout
//! for a packet so the device thread never stalls. Anything that cannot be
//! produced in time is replaced by silence.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{AudioClock, AudioSnapshot};
use crate::config::SessionConfig;
use crate::decoder::{AudioDecoder, AudioFrame};
use crate::packet::Rational;
use crate::packet_queue::PacketQueue;
use crate::resample::SampleConverter;
use crate::shutdown::ShutdownSignal;
use crate::stats::PlaybackCounters;

/// What refilling the chunk buffer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Audio,
    Silence,
}

pub struct AudioPullStage {
    decoder: Box<dyn AudioDecoder>,
    converter: SampleConverter,
    packets: Arc<PacketQueue>,
    clock: Arc<AudioClock>,
    shutdown: Arc<ShutdownSignal>,
    counters: Arc<PlaybackCounters>,
    time_base: Rational,
    /// Decoded frames not yet converted
    pending: VecDeque<AudioFrame>,
    /// Converted bytes and the read position within them
    chunk: Vec<u8>,
    chunk_pos: usize,
    /// `chunk` holds generated silence rather than decoded audio
    chunk_silent: bool,
    /// Seconds of audio up to the end of `chunk`
    audio_clock: f64,
    packet_wait: Duration,
    silence_bytes: usize,
}

impl AudioPullStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        decoder: Box<dyn AudioDecoder>,
        converter: SampleConverter,
        packets: Arc<PacketQueue>,
        clock: Arc<AudioClock>,
        shutdown: Arc<ShutdownSignal>,
        counters: Arc<PlaybackCounters>,
        time_base: Rational,
        config: &SessionConfig,
    ) -> Self {
        let silence_bytes = frame_aligned(config.silence_chunk_bytes, converter.channels());
        Self {
            decoder,
            converter,
            packets,
            clock,
            shutdown,
            counters,
            time_base,
            pending: VecDeque::new(),
            chunk: Vec::new(),
            chunk_pos: 0,
            chunk_silent: false,
            audio_clock: 0.0,
            packet_wait: config.audio_packet_wait(),
            silence_bytes,
        }
    }

    /// Fill a device buffer completely.
    pub fn fill(&mut self, out: &mut [u8]) {
        let mut written = 0;
        while written < out.len() {
            if self.shutdown.is_requested() {
                out[written..].fill(0);
                break;
            }
            if self.chunk_pos >= self.chunk.len() {
                self.chunk_silent = self.refill() == Chunk::Silence;
                if self.chunk_silent {
                    self.chunk.clear();
                    self.chunk.resize(self.silence_bytes, 0);
                }
                self.chunk_pos = 0;
            }

            let n = (self.chunk.len() - self.chunk_pos).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.chunk[self.chunk_pos..self.chunk_pos + n]);
            written += n;
            self.chunk_pos += n;
        }

        // Leftover silence carries no timestamps; only decoded bytes lag the clock.
        let unplayed_bytes = if self.chunk_silent {
            0
        } else {
            self.chunk.len() - self.chunk_pos
        };
        self.clock.publish(AudioSnapshot {
            clock: self.audio_clock,
            unplayed_bytes,
        });
    }

    /// Replace `chunk` with the next converted frame.
    fn refill(&mut self) -> Chunk {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                self.chunk.clear();
                match self.converter.convert(&frame, &mut self.chunk) {
                    Ok(0) => continue,
                    Ok(n) => {
                        self.audio_clock += n as f64 / self.clock.bytes_per_second();
                        return Chunk::Audio;
                    }
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!("Audio conversion failed, playing silence: {}", e);
                        PlaybackCounters::bump(&self.counters.silence_fills);
                        return Chunk::Silence;
                    }
                    Err(e) => {
                        tracing::error!("Audio conversion failed: {}", e);
                        self.shutdown.trigger();
                        return Chunk::Silence;
                    }
                }
            }

            let packet = match self.packets.get_timeout(self.packet_wait) {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    if !self.packets.is_finished() {
                        PlaybackCounters::bump(&self.counters.audio_underruns);
                        tracing::trace!("Audio underrun");
                    }
                    return Chunk::Silence;
                }
                Err(_) => return Chunk::Silence,
            };

            if let Some(pts) = packet.pts {
                self.audio_clock = pts as f64 * self.time_base.as_f64();
            }
            match self.decoder.decode(&packet) {
                Ok(frames) => self.pending.extend(frames),
                Err(e) => {
                    tracing::error!("Audio decode failed: {}", e);
                    self.shutdown.trigger();
                    return Chunk::Silence;
                }
            }
        }
    }
}

/// Round `bytes` down to whole S16 sample frames, keeping at least one.
fn frame_aligned(bytes: usize, channels: u16) -> usize {
    let frame = 2 * channels.max(1) as usize;
    (bytes / frame).max(1) * frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::AudioSamples;
    use crate::error::{PlaybackError, PlaybackResult};
    use crate::packet::Packet;

    /// Each payload byte `b` becomes one S16 sample frame whose channel `k`
    /// holds `b * (k + 1)`, scaled by 100 past stereo.
    struct RawDecoder {
        rate: u32,
        channels: u16,
    }

    impl AudioDecoder for RawDecoder {
        fn decode(&mut self, packet: &Packet) -> PlaybackResult<Vec<AudioFrame>> {
            if packet.data.first() == Some(&0xFF) {
                return Err(PlaybackError::Decode("bad frame".into()));
            }
            let channels = self.channels;
            let scale = if channels > 2 { 100 } else { 0 };
            let samples = packet
                .data
                .iter()
                .flat_map(|&b| {
                    (0..channels).map(move |k| {
                        if scale == 0 {
                            b as i16
                        } else {
                            b as i16 * scale * (k as i16 + 1)
                        }
                    })
                })
                .collect();
            Ok(vec![AudioFrame {
                samples: AudioSamples::S16(samples),
                sample_rate: self.rate,
                channels,
            }])
        }

        fn name(&self) -> &str {
            "raw"
        }
    }

    struct Harness {
        shutdown: Arc<ShutdownSignal>,
        packets: Arc<PacketQueue>,
        clock: Arc<AudioClock>,
        counters: Arc<PlaybackCounters>,
        channels: u16,
        silence_chunk_bytes: usize,
    }

    impl Harness {
        fn new() -> Self {
            // 1000 Hz stereo S16: 4000 bytes per second
            Self::with_layout(2, 16)
        }

        fn with_layout(channels: u16, silence_chunk_bytes: usize) -> Self {
            let shutdown = ShutdownSignal::new();
            Self {
                packets: PacketQueue::new("audio", &shutdown),
                clock: Arc::new(AudioClock::new(1000, channels)),
                counters: Arc::new(PlaybackCounters::default()),
                shutdown,
                channels,
                silence_chunk_bytes,
            }
        }

        fn stage(&self, decoder_rate: u32) -> AudioPullStage {
            let config = SessionConfig {
                audio_packet_wait_ms: 1,
                silence_chunk_bytes: self.silence_chunk_bytes,
                ..SessionConfig::default()
            };
            AudioPullStage::new(
                Box::new(RawDecoder { rate: decoder_rate, channels: self.channels }),
                SampleConverter::new(1000, self.channels),
                self.packets.clone(),
                self.clock.clone(),
                self.shutdown.clone(),
                self.counters.clone(),
                Rational::new(1, 1000),
                &config,
            )
        }

        fn put(&self, pts: Option<i64>, payload: &[u8]) {
            self.packets.put(Packet::new(1, payload.to_vec()).with_timestamps(pts, pts));
        }
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        bytes.chunks_exact(2).map(|b| i16::from_ne_bytes([b[0], b[1]])).collect()
    }

    #[test]
    fn keeps_remainder_across_callbacks() {
        let h = Harness::new();
        h.put(Some(2000), &[1, 2, 3, 4]);
        let mut stage = h.stage(1000);

        // 4 sample frames = 16 bytes; take them in two 8-byte pulls.
        let mut out = [0u8; 8];
        stage.fill(&mut out);
        assert_eq!(samples(&out), vec![1, 1, 2, 2]);
        let snap = h.clock.snapshot();
        assert!((snap.clock - 2.004).abs() < 1e-9);
        assert_eq!(snap.unplayed_bytes, 8);
        assert!((h.clock.reference() - 2.002).abs() < 1e-9);

        stage.fill(&mut out);
        assert_eq!(samples(&out), vec![3, 3, 4, 4]);
        assert_eq!(h.clock.snapshot().unplayed_bytes, 0);
        assert_eq!(h.packets.len(), 0);
    }

    #[test]
    fn clock_advances_without_timestamps() {
        let h = Harness::new();
        h.put(Some(1000), &[1, 1]);
        h.put(None, &[2, 2]);
        let mut stage = h.stage(1000);

        let mut out = [0u8; 16];
        stage.fill(&mut out);
        assert!((h.clock.snapshot().clock - 1.004).abs() < 1e-9);
    }

    #[test]
    fn underrun_yields_silence() {
        let h = Harness::new();
        let mut stage = h.stage(1000);
        let mut out = [7u8; 32];
        stage.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
        assert!(h.counters.audio_underruns.load(std::sync::atomic::Ordering::Relaxed) >= 1);
        assert!(!h.shutdown.is_requested());
    }

    #[test]
    fn conversion_failure_is_silence_not_shutdown() {
        let h = Harness::new();
        h.put(Some(0), &[9, 9]);
        h.put(None, &[5]);
        // Decoder claims 2000 Hz into a 1000 Hz device.
        let mut stage = h.stage(2000);
        let mut out = [1u8; 16];
        stage.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
        assert!(!h.shutdown.is_requested());
        assert!(h.counters.silence_fills.load(std::sync::atomic::Ordering::Relaxed) >= 1);
    }

    #[test]
    fn decode_error_is_fatal() {
        let h = Harness::new();
        h.put(Some(0), &[0xFF]);
        let mut stage = h.stage(1000);
        let mut out = [1u8; 64];
        stage.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
        assert!(h.shutdown.is_requested());
    }

    #[test]
    fn silence_is_not_counted_as_pending() {
        let h = Harness::new();
        h.put(Some(2000), &[1, 2]);
        let mut stage = h.stage(1000);

        let mut out = [0u8; 8];
        stage.fill(&mut out);
        assert!((h.clock.reference() - 2.002).abs() < 1e-9);

        // Queue is dry: 4 of the 16 silence bytes go out, 12 stay buffered.
        let mut out = [0u8; 4];
        stage.fill(&mut out);
        let snap = h.clock.snapshot();
        assert_eq!(snap.unplayed_bytes, 0);
        assert!((h.clock.reference() - snap.clock).abs() < 1e-9);
        assert!((h.clock.reference() - 2.002).abs() < 1e-9);
    }

    #[test]
    fn silence_keeps_three_channel_frames_aligned() {
        // 6-byte frames; the default 1024-byte silence chunk is not a multiple.
        let h = Harness::with_layout(3, SessionConfig::default().silence_chunk_bytes);
        let mut stage = h.stage(1000);

        let mut first = vec![0u8; 1026];
        stage.fill(&mut first);
        h.put(None, &[1]);
        let mut second = vec![0u8; 1026];
        stage.fill(&mut second);

        let stream: Vec<i16> = samples(&first).into_iter().chain(samples(&second)).collect();
        let start = stream
            .iter()
            .position(|&s| s != 0)
            .expect("decoded frame reaches the device");
        assert_eq!(start % 3, 0, "frame starts mid-frame at sample {}", start);
        assert_eq!(&stream[start..start + 3], &[100, 200, 300]);
    }

    #[test]
    fn silence_chunk_rounds_to_whole_frames() {
        assert_eq!(frame_aligned(1024, 3), 1020);
        assert_eq!(frame_aligned(1024, 6), 1020);
        assert_eq!(frame_aligned(1024, 2), 1024);
        assert_eq!(frame_aligned(4, 6), 12);
        assert_eq!(frame_aligned(16, 0), 16);
    }
}
