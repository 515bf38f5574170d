//! Demux stage: reads packets from the source and routes them to the
//! per-stream queues, backing off while either queue is over its watermark.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::decoder::{MediaSource, ReadOutcome};
use crate::packet_queue::PacketQueue;
use crate::shutdown::ShutdownSignal;
use crate::stats::PlaybackCounters;

pub struct DemuxStage {
    source: Box<dyn MediaSource>,
    video_stream: usize,
    audio_stream: usize,
    video_packets: Arc<PacketQueue>,
    audio_packets: Arc<PacketQueue>,
    shutdown: Arc<ShutdownSignal>,
    counters: Arc<PlaybackCounters>,
    video_watermark: usize,
    audio_watermark: usize,
    backoff: Duration,
}

/// How a demux run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxExit {
    EndOfStream,
    Shutdown,
    Failed,
}

impl DemuxStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Box<dyn MediaSource>,
        video_stream: usize,
        audio_stream: usize,
        video_packets: Arc<PacketQueue>,
        audio_packets: Arc<PacketQueue>,
        shutdown: Arc<ShutdownSignal>,
        counters: Arc<PlaybackCounters>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            source,
            video_stream,
            audio_stream,
            video_packets,
            audio_packets,
            shutdown,
            counters,
            video_watermark: config.video_watermark_bytes,
            audio_watermark: config.audio_watermark_bytes,
            backoff: config.demux_backoff(),
        }
    }

    fn over_watermark(&self) -> bool {
        self.audio_packets.total_bytes() > self.audio_watermark
            || self.video_packets.total_bytes() > self.video_watermark
    }

    pub fn run(mut self) -> DemuxExit {
        tracing::debug!("Demuxing {}", self.source.name());
        loop {
            if self.shutdown.is_requested() {
                return DemuxExit::Shutdown;
            }
            if self.over_watermark() {
                thread::sleep(self.backoff);
                continue;
            }

            let packet = match self.source.read_packet() {
                Ok(ReadOutcome::Packet(packet)) => packet,
                Ok(ReadOutcome::Retry) => {
                    thread::sleep(self.backoff);
                    continue;
                }
                Ok(ReadOutcome::EndOfStream) => {
                    tracing::info!("End of stream reached in {}", self.source.name());
                    self.video_packets.close();
                    self.audio_packets.close();
                    return DemuxExit::EndOfStream;
                }
                Err(e) => {
                    tracing::error!("Demux failed: {}", e);
                    self.shutdown.trigger();
                    return DemuxExit::Failed;
                }
            };

            if packet.stream_index == self.video_stream {
                self.video_packets.put(packet);
            } else if packet.stream_index == self.audio_stream {
                self.audio_packets.put(packet);
            } else {
                PlaybackCounters::bump(&self.counters.packets_dropped);
                continue;
            }
            PlaybackCounters::bump(&self.counters.packets_demuxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{AudioDecoder, VideoDecoder};
    use crate::error::{PlaybackError, PlaybackResult};
    use crate::packet::{Packet, Rational, StreamInfo, StreamKind};
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;

    /// Scripted source: replays outcomes, then reports end of stream.
    struct Script {
        streams: Vec<StreamInfo>,
        outcomes: VecDeque<PlaybackResult<ReadOutcome>>,
    }

    impl Script {
        fn new(outcomes: Vec<PlaybackResult<ReadOutcome>>) -> Self {
            let stream = |index, kind| StreamInfo {
                index,
                codec: "raw".into(),
                time_base: Rational::new(1, 1000),
                kind,
            };
            Self {
                streams: vec![
                    stream(0, StreamKind::Video {
                        width: 2,
                        height: 2,
                        frame_duration: 0.04,
                        sample_aspect_ratio: None,
                    }),
                    stream(1, StreamKind::Audio { sample_rate: 8000, channels: 1 }),
                    stream(2, StreamKind::Other),
                ],
                outcomes: outcomes.into(),
            }
        }
    }

    impl MediaSource for Script {
        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }

        fn read_packet(&mut self) -> PlaybackResult<ReadOutcome> {
            self.outcomes.pop_front().unwrap_or(Ok(ReadOutcome::EndOfStream))
        }

        fn open_video_decoder(&mut self, index: usize) -> PlaybackResult<Box<dyn VideoDecoder>> {
            Err(PlaybackError::UnsupportedCodec { stream_index: index, codec: "raw".into() })
        }

        fn open_audio_decoder(&mut self, index: usize) -> PlaybackResult<Box<dyn AudioDecoder>> {
            Err(PlaybackError::UnsupportedCodec { stream_index: index, codec: "raw".into() })
        }

        fn name(&self) -> &str {
            "script"
        }
    }

    struct Harness {
        shutdown: Arc<ShutdownSignal>,
        video: Arc<PacketQueue>,
        audio: Arc<PacketQueue>,
        counters: Arc<PlaybackCounters>,
    }

    impl Harness {
        fn new() -> Self {
            let shutdown = ShutdownSignal::new();
            Self {
                video: PacketQueue::new("video", &shutdown),
                audio: PacketQueue::new("audio", &shutdown),
                counters: Arc::new(PlaybackCounters::default()),
                shutdown,
            }
        }

        fn stage(&self, script: Script, config: &SessionConfig) -> DemuxStage {
            DemuxStage::new(
                Box::new(script),
                0,
                1,
                self.video.clone(),
                self.audio.clone(),
                self.shutdown.clone(),
                self.counters.clone(),
                config,
            )
        }
    }

    fn packet(stream: usize, size: usize) -> PlaybackResult<ReadOutcome> {
        Ok(ReadOutcome::Packet(Packet::new(stream, vec![0u8; size])))
    }

    #[test]
    fn routes_by_stream_and_closes_at_end() {
        let h = Harness::new();
        let script = Script::new(vec![
            packet(0, 10),
            packet(1, 4),
            packet(2, 99),
            Ok(ReadOutcome::Retry),
            packet(0, 6),
        ]);
        let exit = h.stage(script, &SessionConfig::default()).run();

        assert_eq!(exit, DemuxExit::EndOfStream);
        assert_eq!(h.video.len(), 2);
        assert_eq!(h.video.total_bytes(), 16);
        assert_eq!(h.audio.len(), 1);
        assert_eq!(h.counters.packets_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(h.counters.packets_demuxed.load(Ordering::Relaxed), 3);
        assert!(!h.shutdown.is_requested());

        h.video.get(false).expect("live");
        h.video.get(false).expect("live");
        assert!(h.video.is_finished());
    }

    #[test]
    fn read_error_requests_shutdown() {
        let h = Harness::new();
        let script = Script::new(vec![packet(0, 1), Err(PlaybackError::Read("truncated".into()))]);
        let exit = h.stage(script, &SessionConfig::default()).run();

        assert_eq!(exit, DemuxExit::Failed);
        assert!(h.shutdown.is_requested());
    }

    #[test]
    fn backs_off_while_over_watermark() {
        let h = Harness::new();
        let config = SessionConfig {
            video_watermark_bytes: 8,
            demux_backoff_ms: 1,
            ..SessionConfig::default()
        };
        let script = Script::new(vec![packet(0, 9), packet(0, 9)]);
        let stage = h.stage(script, &config);
        let runner = thread::spawn(move || stage.run());

        thread::sleep(Duration::from_millis(30));
        // Second packet is held back until the consumer drains the first.
        assert_eq!(h.video.len(), 1);
        h.video.get(false).expect("live");

        assert_eq!(runner.join().expect("join"), DemuxExit::EndOfStream);
        assert_eq!(h.video.len(), 1);
    }

    #[test]
    fn stops_on_shutdown_while_throttled() {
        let h = Harness::new();
        let config = SessionConfig {
            audio_watermark_bytes: 0,
            demux_backoff_ms: 1,
            ..SessionConfig::default()
        };
        let stage = h.stage(Script::new(vec![packet(1, 1), packet(1, 1)]), &config);
        let runner = thread::spawn(move || stage.run());

        thread::sleep(Duration::from_millis(20));
        h.shutdown.trigger();
        assert_eq!(runner.join().expect("join"), DemuxExit::Shutdown);
        assert_eq!(h.audio.len(), 1);
    }
}
