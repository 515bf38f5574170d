//! Video decode stage: packets in, timestamped pictures out.

use std::sync::Arc;

use crate::clock::VideoClock;
use crate::decoder::{VideoDecoder, VideoFrame};
use crate::error::{PlaybackError, QueueError};
use crate::packet::Rational;
use crate::packet_queue::PacketQueue;
use crate::picture_queue::PictureQueue;
use crate::pts::PtsCorrector;
use crate::shutdown::ShutdownSignal;
use crate::stats::PlaybackCounters;

/// How a video stage run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoExit {
    /// Input closed and every frame delivered
    Finished,
    Shutdown,
    Failed,
}

pub struct VideoStage {
    decoder: Box<dyn VideoDecoder>,
    packets: Arc<PacketQueue>,
    pictures: Arc<PictureQueue>,
    shutdown: Arc<ShutdownSignal>,
    counters: Arc<PlaybackCounters>,
    time_base: Rational,
    corrector: PtsCorrector,
    clock: VideoClock,
}

impl VideoStage {
    pub fn new(
        decoder: Box<dyn VideoDecoder>,
        packets: Arc<PacketQueue>,
        pictures: Arc<PictureQueue>,
        shutdown: Arc<ShutdownSignal>,
        counters: Arc<PlaybackCounters>,
        time_base: Rational,
        frame_duration: f64,
    ) -> Self {
        Self {
            decoder,
            packets,
            pictures,
            shutdown,
            counters,
            time_base,
            corrector: PtsCorrector::new(),
            clock: VideoClock::new(frame_duration),
        }
    }

    pub fn run(mut self) -> VideoExit {
        tracing::debug!("Video stage running {}", self.decoder.name());
        loop {
            let packet = match self.packets.get(true) {
                Ok(Some(packet)) => packet,
                Ok(None) => return self.drain(),
                Err(QueueError::Shutdown) => return VideoExit::Shutdown,
            };

            let frames = match self.decoder.decode(&packet) {
                Ok(frames) => frames,
                Err(e) => return self.fail(e),
            };
            if self.deliver(frames).is_err() {
                return VideoExit::Shutdown;
            }
        }
    }

    /// End of input: flush the decoder and tell the scheduler no more is coming.
    fn drain(&mut self) -> VideoExit {
        let frames = match self.decoder.flush() {
            Ok(frames) => frames,
            Err(e) => return self.fail(e),
        };
        if self.deliver(frames).is_err() {
            return VideoExit::Shutdown;
        }
        self.pictures.finish();
        tracing::debug!("Video stage finished");
        VideoExit::Finished
    }

    fn fail(&self, error: PlaybackError) -> VideoExit {
        tracing::error!("Video decode failed: {}", error);
        self.shutdown.trigger();
        VideoExit::Failed
    }

    fn deliver(&mut self, frames: Vec<VideoFrame>) -> Result<(), QueueError> {
        for frame in frames {
            PlaybackCounters::bump(&self.counters.frames_decoded);
            let ticks = self.corrector.resolve(frame.pts, frame.dts);
            let pts = ticks.map_or(0.0, |t| t as f64 * self.time_base.as_f64());
            let pts = self.clock.synchronize(pts, frame.repeat_count);

            let mut slot = self.pictures.acquire_slot_for_write()?;
            slot.prepare(frame.width, frame.height);
            slot.copy_planes(frame.plane_refs(), frame.strides);
            slot.pts = pts;
            slot.commit();
            tracing::trace!(pts, "Queued picture");
        }
        Ok(())
    }
}
