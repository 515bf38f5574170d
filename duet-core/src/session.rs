//! # Media Session - owns one playback from start to teardown
//!
//! ```text
//!                  ┌────────────┐   ┌─────────────┐
//!   MediaSource ──►│ duet-demux │──►│ video queue │──► duet-video ──► PictureQueue
//!                  └────────────┘   ├─────────────┤                       │
//!                                   │ audio queue │──► device callback    ▼
//!                                   └─────────────┘    (AudioPullStage)  SyncScheduler
//!                                                            │               ▲
//!                                                            └─ AudioClock ──┘
//! ```
//!
//! Any failure after threads exist signals shutdown and joins what was
//! started, so an aborted start never leaves a stage running.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio_output::{AudioOutput, AudioSpec};
use crate::audio_stage::AudioPullStage;
use crate::clock::{AudioClock, WallClock};
use crate::config::SessionConfig;
use crate::decoder::MediaSource;
use crate::demux::DemuxStage;
use crate::error::{PlaybackError, PlaybackResult};
use crate::packet::{Rational, StreamInfo, StreamKind};
use crate::packet_queue::PacketQueue;
use crate::picture_queue::PictureQueue;
use crate::presenter::Presenter;
use crate::resample::SampleConverter;
use crate::scheduler::{Refresh, SyncScheduler};
use crate::shutdown::ShutdownSignal;
use crate::stats::{PlaybackCounters, PlaybackStats};
use crate::video_stage::VideoStage;

/// Geometry of the selected video stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Option<Rational>,
}

pub struct MediaSession {
    source_name: String,
    shutdown: Arc<ShutdownSignal>,
    video_packets: Arc<PacketQueue>,
    audio_packets: Arc<PacketQueue>,
    pictures: Arc<PictureQueue>,
    audio_clock: Arc<AudioClock>,
    counters: Arc<PlaybackCounters>,
    scheduler: SyncScheduler,
    wall: WallClock,
    audio_output: Box<dyn AudioOutput>,
    audio_spec: AudioSpec,
    workers: Vec<JoinHandle<()>>,
    geometry: VideoGeometry,
    initial_refresh: Duration,
    closed: bool,
}

fn first_stream(streams: &[StreamInfo], video: bool) -> PlaybackResult<StreamInfo> {
    streams
        .iter()
        .find(|s| if video { s.is_video() } else { s.is_audio() })
        .cloned()
        .ok_or(PlaybackError::NoStream(if video { "video" } else { "audio" }))
}

fn spawn<F>(name: &'static str, body: F) -> PlaybackResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("duet-{}", name))
        .spawn(body)
        .map_err(|e| PlaybackError::Spawn { stage: name, reason: e.to_string() })
}

impl MediaSession {
    /// Open decoders and the audio device, then start every stage.
    pub fn start(
        mut source: Box<dyn MediaSource>,
        mut audio_output: Box<dyn AudioOutput>,
        config: SessionConfig,
    ) -> PlaybackResult<Self> {
        config.validate()?;
        let source_name = source.name().to_string();

        let video = first_stream(source.streams(), true)?;
        let audio = first_stream(source.streams(), false)?;
        let (
            StreamKind::Video { width, height, frame_duration, sample_aspect_ratio },
            StreamKind::Audio { sample_rate, channels },
        ) = (video.kind.clone(), audio.kind.clone())
        else {
            return Err(PlaybackError::NoStream("video"));
        };
        tracing::info!(
            "{}: video #{} {} {}x{}, audio #{} {} {} Hz x{}",
            source_name,
            video.index,
            video.codec,
            width,
            height,
            audio.index,
            audio.codec,
            sample_rate,
            channels
        );

        let video_decoder = source.open_video_decoder(video.index)?;
        let audio_decoder = source.open_audio_decoder(audio.index)?;

        let audio_spec = audio_output.open(AudioSpec {
            sample_rate,
            channels,
            buffer_samples: config.audio_buffer_samples,
        })?;

        let shutdown = ShutdownSignal::new();
        let video_packets = PacketQueue::new("video", &shutdown);
        let audio_packets = PacketQueue::new("audio", &shutdown);
        let pictures = PictureQueue::new(config.picture_queue_capacity, &shutdown);
        let audio_clock = Arc::new(AudioClock::new(audio_spec.sample_rate, audio_spec.channels));
        let counters = Arc::new(PlaybackCounters::default());
        let wall = WallClock::new();
        let scheduler = SyncScheduler::new(
            pictures.clone(),
            audio_clock.clone(),
            counters.clone(),
            &config,
            wall.now_secs(),
        )
        .with_sample_aspect_ratio(sample_aspect_ratio);

        // From here on, dropping the session tears down whatever has started.
        let mut session = Self {
            source_name,
            shutdown: shutdown.clone(),
            video_packets: video_packets.clone(),
            audio_packets: audio_packets.clone(),
            pictures: pictures.clone(),
            audio_clock: audio_clock.clone(),
            counters: counters.clone(),
            scheduler,
            wall,
            audio_output,
            audio_spec,
            workers: Vec::new(),
            geometry: VideoGeometry { width, height, sample_aspect_ratio },
            initial_refresh: Duration::from_millis(config.initial_refresh_ms),
            closed: false,
        };

        let demux = DemuxStage::new(
            source,
            video.index,
            audio.index,
            video_packets.clone(),
            audio_packets.clone(),
            shutdown.clone(),
            counters.clone(),
            &config,
        );
        session.workers.push(spawn("demux", move || {
            let exit = demux.run();
            tracing::debug!("Demux stage exited: {:?}", exit);
        })?);

        let video_stage = VideoStage::new(
            video_decoder,
            video_packets,
            pictures,
            shutdown.clone(),
            counters.clone(),
            video.time_base,
            frame_duration,
        );
        session.workers.push(spawn("video", move || {
            let exit = video_stage.run();
            tracing::debug!("Video stage exited: {:?}", exit);
        })?);

        let mut audio_stage = AudioPullStage::new(
            audio_decoder,
            SampleConverter::new(audio_spec.sample_rate, audio_spec.channels),
            audio_packets,
            audio_clock,
            shutdown,
            counters,
            audio.time_base,
            &config,
        );
        session
            .audio_output
            .start(Box::new(move |buf: &mut [u8]| audio_stage.fill(buf)))?;

        tracing::info!("Playback started");
        Ok(session)
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn geometry(&self) -> VideoGeometry {
        self.geometry
    }

    pub fn audio_spec(&self) -> AudioSpec {
        self.audio_spec
    }

    /// Delay before the first refresh should fire.
    pub fn initial_refresh(&self) -> Duration {
        self.initial_refresh
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Current audio reference clock (seconds).
    pub fn audio_position(&self) -> f64 {
        self.audio_clock.reference()
    }

    /// Run the scheduler for one timer firing.
    pub fn refresh(&mut self, presenter: &mut dyn Presenter) -> PlaybackResult<Refresh> {
        let now = self.wall.now_secs();
        self.scheduler.on_refresh(presenter, now)
    }

    /// Ask every stage to stop without waiting for them.
    pub fn request_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// The decoded picture ring shared with the video stage.
    pub fn pictures(&self) -> &PictureQueue {
        &self.pictures
    }

    pub fn stats(&self) -> PlaybackStats {
        self.counters.snapshot(self.pictures.reallocations())
    }

    /// Stop every stage and wait for the worker threads. Idempotent.
    pub fn shutdown(&mut self) -> PlaybackStats {
        if !self.closed {
            self.closed = true;
            self.shutdown.trigger();
            self.audio_output.close();
            for handle in self.workers.drain(..) {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                if handle.join().is_err() {
                    tracing::error!("{} thread panicked", name);
                }
            }
            self.video_packets.flush();
            self.audio_packets.flush();

            let stats = self.stats();
            tracing::info!(
                "Session closed: {} presented, {} decoded, {} catch-up, {} hold, {} underrun(s)",
                stats.frames_presented,
                stats.frames_decoded,
                stats.catch_ups,
                stats.holds,
                stats.audio_underruns
            );
        }
        self.stats()
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_output::PacedAudioOutput;
    use crate::decoder::{AudioDecoder, ReadOutcome, VideoDecoder};
    use crate::synthetic::TestPatternSource;

    /// Wraps the test pattern but hides one of its streams.
    struct Partial {
        inner: TestPatternSource,
        streams: Vec<StreamInfo>,
    }

    impl Partial {
        fn without(kind_is_video: bool) -> Self {
            let inner = TestPatternSource::new(5);
            let streams = inner
                .streams()
                .iter()
                .filter(|s| s.is_video() != kind_is_video)
                .cloned()
                .collect();
            Self { inner, streams }
        }
    }

    impl MediaSource for Partial {
        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }

        fn read_packet(&mut self) -> PlaybackResult<ReadOutcome> {
            self.inner.read_packet()
        }

        fn open_video_decoder(&mut self, index: usize) -> PlaybackResult<Box<dyn VideoDecoder>> {
            self.inner.open_video_decoder(index)
        }

        fn open_audio_decoder(&mut self, index: usize) -> PlaybackResult<Box<dyn AudioDecoder>> {
            self.inner.open_audio_decoder(index)
        }

        fn name(&self) -> &str {
            "partial"
        }
    }

    #[test]
    fn missing_streams_fail_start() {
        let result = MediaSession::start(
            Box::new(Partial::without(true)),
            Box::new(PacedAudioOutput::new()),
            SessionConfig::default(),
        );
        assert!(matches!(result, Err(PlaybackError::NoStream("video"))));

        let result = MediaSession::start(
            Box::new(Partial::without(false)),
            Box::new(PacedAudioOutput::new()),
            SessionConfig::default(),
        );
        assert!(matches!(result, Err(PlaybackError::NoStream("audio"))));
    }

    #[test]
    fn invalid_config_fails_start() {
        let config = SessionConfig { picture_queue_capacity: 0, ..SessionConfig::default() };
        let result = MediaSession::start(
            Box::new(TestPatternSource::new(5)),
            Box::new(PacedAudioOutput::new()),
            config,
        );
        assert!(matches!(result, Err(PlaybackError::Config(_))));
    }

    #[test]
    fn early_shutdown_joins_every_stage() {
        let mut session = MediaSession::start(
            Box::new(TestPatternSource::new(500)),
            Box::new(PacedAudioOutput::new()),
            SessionConfig::default(),
        )
        .expect("start");
        assert_eq!(session.geometry().width, 320);
        assert_eq!(session.audio_spec().sample_rate, 44_100);

        thread::sleep(Duration::from_millis(50));
        session.request_shutdown();
        assert!(session.is_shutdown_requested());
        let stats = session.shutdown();
        assert!(stats.packets_demuxed > 0);
        assert_eq!(stats.frames_presented, 0);
        // A second shutdown is a no-op.
        assert_eq!(session.shutdown(), stats);
    }
}
