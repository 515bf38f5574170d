//! # Sync Scheduler - audio-mastered frame presentation
//!
//! Runs on the presentation thread once per timer firing:
//!
//! ```text
//! queue empty ──► re-arm after a short poll        (WAITING_FOR_PICTURE)
//! picture     ──► nominal delay from pts deltas
//!             ──► compare pts with the audio clock
//!             ──► shrink / double / keep the delay
//!             ──► accumulate frame_timer, re-arm, present, consume
//! ```
//!
//! Only video timing is adjusted; audio runs untouched.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{AudioClock, FrameTiming};
use crate::config::SessionConfig;
use crate::error::PlaybackResult;
use crate::packet::Rational;
use crate::picture_queue::PictureQueue;
use crate::presenter::{fit_rect, PlaneView, Presenter};
use crate::stats::PlaybackCounters;

/// What the presentation loop should do after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Fire the next refresh after this long
    Rearm(Duration),
    /// No picture will ever arrive again
    EndOfStream,
}

/// How a frame's delay was adjusted against the audio clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftAction {
    /// Within threshold, or too far apart to correct
    Keep,
    /// Video behind audio: show the next frame right away
    CatchUp,
    /// Video ahead of audio: hold this frame twice as long
    Hold,
}

/// Apply drift correction to a nominal inter-frame delay.
///
/// `av_delay` is the frame's pts minus the audio reference clock.
pub fn correct_delay(
    pts_delay: f64,
    av_delay: f64,
    min_sync_threshold: f64,
    nosync_threshold: f64,
) -> (f64, DriftAction) {
    let sync_threshold = pts_delay.max(min_sync_threshold);
    if av_delay.abs() >= nosync_threshold {
        return (pts_delay, DriftAction::Keep);
    }
    if av_delay <= -sync_threshold {
        (0.0, DriftAction::CatchUp)
    } else if av_delay >= sync_threshold {
        (2.0 * pts_delay, DriftAction::Hold)
    } else {
        (pts_delay, DriftAction::Keep)
    }
}

/// Milliseconds until the next refresh, rounded to nearest.
fn rearm_after(real_delay: f64) -> Duration {
    Duration::from_millis((real_delay * 1000.0 + 0.5) as u64)
}

pub struct SyncScheduler {
    pictures: Arc<PictureQueue>,
    audio_clock: Arc<AudioClock>,
    counters: Arc<PlaybackCounters>,
    timing: FrameTiming,
    sample_aspect_ratio: Option<Rational>,
    sync_threshold: f64,
    nosync_threshold: f64,
    min_refresh_delay: f64,
    empty_poll: Duration,
}

impl SyncScheduler {
    pub fn new(
        pictures: Arc<PictureQueue>,
        audio_clock: Arc<AudioClock>,
        counters: Arc<PlaybackCounters>,
        config: &SessionConfig,
        now: f64,
    ) -> Self {
        Self {
            pictures,
            audio_clock,
            counters,
            timing: FrameTiming::new(now, config.initial_frame_delay),
            sample_aspect_ratio: None,
            sync_threshold: config.sync_threshold,
            nosync_threshold: config.nosync_threshold,
            min_refresh_delay: config.min_refresh_delay,
            empty_poll: Duration::from_millis(config.empty_poll_ms),
        }
    }

    pub fn with_sample_aspect_ratio(mut self, sar: Option<Rational>) -> Self {
        self.sample_aspect_ratio = sar;
        self
    }

    pub fn timing(&self) -> FrameTiming {
        self.timing
    }

    /// Handle one timer firing. `now` is wall-clock seconds on the same
    /// scale the scheduler was created with.
    pub fn on_refresh(&mut self, presenter: &mut dyn Presenter, now: f64) -> PlaybackResult<Refresh> {
        let Some(slot) = self.pictures.peek() else {
            if self.pictures.is_exhausted() {
                tracing::debug!("Picture queue drained after end of stream");
                return Ok(Refresh::EndOfStream);
            }
            return Ok(Refresh::Rearm(self.empty_poll));
        };
        let pts = slot.pts;

        let mut pts_delay = pts - self.timing.frame_last_pts;
        if pts_delay <= 0.0 || pts_delay >= 1.0 {
            pts_delay = self.timing.frame_last_delay;
        }
        self.timing.frame_last_delay = pts_delay;
        self.timing.frame_last_pts = pts;

        let audio_ref = self.audio_clock.reference();
        let av_delay = pts - audio_ref;
        let (delay, action) =
            correct_delay(pts_delay, av_delay, self.sync_threshold, self.nosync_threshold);
        match action {
            DriftAction::CatchUp => PlaybackCounters::bump(&self.counters.catch_ups),
            DriftAction::Hold => PlaybackCounters::bump(&self.counters.holds),
            DriftAction::Keep => {}
        }

        self.timing.frame_timer += delay;
        let real_delay = (self.timing.frame_timer - now).max(self.min_refresh_delay);
        let next = rearm_after(real_delay);

        tracing::trace!(
            pts,
            pts_delay,
            audio_ref,
            av_delay,
            ?action,
            real_delay,
            "Scheduling frame"
        );

        presenter.ensure_surface(slot.width(), slot.height())?;
        let dest = fit_rect(
            presenter.surface_size(),
            (slot.width(), slot.height()),
            self.sample_aspect_ratio,
        );
        presenter.blit(&PlaneView::of(&slot), dest)?;
        presenter.present()?;
        slot.consume();
        PlaybackCounters::bump(&self.counters.frames_presented);

        Ok(Refresh::Rearm(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::AudioSnapshot;
    use crate::presenter::NullPresenter;
    use crate::shutdown::ShutdownSignal;
    use std::sync::atomic::Ordering;

    const EPS: f64 = 1e-9;

    #[test]
    fn video_behind_audio_catches_up() {
        let (delay, action) = correct_delay(0.04, -0.1, 0.01, 1.0);
        assert_eq!(delay, 0.0);
        assert_eq!(action, DriftAction::CatchUp);
    }

    #[test]
    fn video_ahead_of_audio_holds() {
        let (delay, action) = correct_delay(0.04, 0.1, 0.01, 1.0);
        assert!((delay - 0.08).abs() < EPS);
        assert_eq!(action, DriftAction::Hold);
    }

    #[test]
    fn small_drift_is_left_alone() {
        let (delay, action) = correct_delay(0.04, 0.01, 0.01, 1.0);
        assert!((delay - 0.04).abs() < EPS);
        assert_eq!(action, DriftAction::Keep);
    }

    #[test]
    fn diverged_clocks_are_not_corrected() {
        assert_eq!(correct_delay(0.04, 2.5, 0.01, 1.0), (0.04, DriftAction::Keep));
        assert_eq!(correct_delay(0.04, -1.0, 0.01, 1.0), (0.04, DriftAction::Keep));
    }

    #[test]
    fn threshold_never_drops_below_minimum() {
        // pts_delay 0.005 would give a 5 ms threshold; 8 ms drift must still be kept.
        assert_eq!(correct_delay(0.005, 0.008, 0.01, 1.0).1, DriftAction::Keep);
        assert_eq!(correct_delay(0.005, 0.01, 0.01, 1.0).1, DriftAction::Hold);
    }

    #[test]
    fn rearm_rounds_to_nearest_millisecond() {
        assert_eq!(rearm_after(0.0104), Duration::from_millis(10));
        assert_eq!(rearm_after(0.0336), Duration::from_millis(34));
    }

    struct Fixture {
        pictures: Arc<PictureQueue>,
        audio: Arc<AudioClock>,
        counters: Arc<PlaybackCounters>,
        scheduler: SyncScheduler,
        _shutdown: Arc<ShutdownSignal>,
    }

    fn fixture(capacity: usize) -> Fixture {
        let shutdown = ShutdownSignal::new();
        let pictures = PictureQueue::new(capacity, &shutdown);
        let audio = Arc::new(AudioClock::new(44_100, 2));
        let counters = Arc::new(PlaybackCounters::default());
        let scheduler = SyncScheduler::new(
            pictures.clone(),
            audio.clone(),
            counters.clone(),
            &SessionConfig::default(),
            0.0,
        );
        Fixture { pictures, audio, counters, scheduler, _shutdown: shutdown }
    }

    fn push(queue: &PictureQueue, pts: f64) {
        let mut slot = queue.acquire_slot_for_write().expect("slot");
        slot.prepare(16, 16);
        slot.pts = pts;
        slot.commit();
    }

    #[test]
    fn empty_queue_polls_again() {
        let mut fx = fixture(2);
        let mut presenter = NullPresenter::new();
        let refresh = fx.scheduler.on_refresh(&mut presenter, 0.0).expect("refresh");
        assert_eq!(refresh, Refresh::Rearm(Duration::from_millis(1)));
        assert_eq!(presenter.presents, 0);
    }

    #[test]
    fn finished_and_drained_reports_end_of_stream() {
        let mut fx = fixture(2);
        fx.pictures.finish();
        let mut presenter = NullPresenter::new();
        let refresh = fx.scheduler.on_refresh(&mut presenter, 0.0).expect("refresh");
        assert_eq!(refresh, Refresh::EndOfStream);
    }

    #[test]
    fn in_sync_frame_is_presented_and_consumed() {
        let mut fx = fixture(2);
        push(&fx.pictures, 0.04);
        fx.audio.publish(AudioSnapshot { clock: 0.04, unplayed_bytes: 0 });

        let mut presenter = NullPresenter::new();
        // frame_timer 0.0 + 0.04 lands before now=0.1, so the floor applies.
        let refresh = fx.scheduler.on_refresh(&mut presenter, 0.1).expect("refresh");
        assert_eq!(refresh, Refresh::Rearm(Duration::from_millis(10)));
        assert_eq!(presenter.presents, 1);
        assert_eq!(fx.pictures.read_index(), 1);
        assert_eq!(fx.pictures.size(), 0);

        let timing = fx.scheduler.timing();
        assert!((timing.frame_timer - 0.04).abs() < EPS);
        assert!((timing.frame_last_pts - 0.04).abs() < EPS);
        assert_eq!(fx.counters.frames_presented.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn anomalous_pts_delta_reuses_last_delay() {
        let mut fx = fixture(2);
        let mut presenter = NullPresenter::new();
        push(&fx.pictures, 5.0);
        fx.audio.publish(AudioSnapshot { clock: 5.0, unplayed_bytes: 0 });

        // 5.0 - 0.0 is a jump of >= 1 s: the initial 40 ms delay is used.
        let refresh = fx.scheduler.on_refresh(&mut presenter, 0.0).expect("refresh");
        assert_eq!(refresh, Refresh::Rearm(Duration::from_millis(40)));
        assert!((fx.scheduler.timing().frame_last_delay - 0.04).abs() < EPS);
    }

    #[test]
    fn leading_video_doubles_wait() {
        let mut fx = fixture(2);
        let mut presenter = NullPresenter::new();
        push(&fx.pictures, 0.04);
        // Audio is 100 ms behind the frame.
        fx.audio.publish(AudioSnapshot { clock: -0.06, unplayed_bytes: 0 });

        let refresh = fx.scheduler.on_refresh(&mut presenter, 0.0).expect("refresh");
        assert_eq!(refresh, Refresh::Rearm(Duration::from_millis(80)));
        assert_eq!(fx.counters.holds.load(Ordering::Relaxed), 1);
    }
}
