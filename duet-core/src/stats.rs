//! Playback counters shared across stages.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, bumped from whichever thread does the work.
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    pub packets_demuxed: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub frames_presented: AtomicU64,
    pub catch_ups: AtomicU64,
    pub holds: AtomicU64,
    pub audio_underruns: AtomicU64,
    pub silence_fills: AtomicU64,
}

impl PlaybackCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, picture_reallocations: u64) -> PlaybackStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PlaybackStats {
            packets_demuxed: load(&self.packets_demuxed),
            packets_dropped: load(&self.packets_dropped),
            frames_decoded: load(&self.frames_decoded),
            frames_presented: load(&self.frames_presented),
            catch_ups: load(&self.catch_ups),
            holds: load(&self.holds),
            audio_underruns: load(&self.audio_underruns),
            silence_fills: load(&self.silence_fills),
            picture_reallocations,
        }
    }
}

/// Point-in-time copy of [`PlaybackCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub packets_demuxed: u64,
    /// Packets of streams nobody consumes
    pub packets_dropped: u64,
    pub frames_decoded: u64,
    pub frames_presented: u64,
    /// Frames shown immediately because video lagged audio
    pub catch_ups: u64,
    /// Frames held twice as long because video led audio
    pub holds: u64,
    /// Audio callbacks that found no packet in time
    pub audio_underruns: u64,
    /// Audio chunks replaced by silence after a conversion failure
    pub silence_fills: u64,
    pub picture_reallocations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_copies_counters() {
        let counters = PlaybackCounters::default();
        PlaybackCounters::bump(&counters.frames_presented);
        PlaybackCounters::bump(&counters.frames_presented);
        PlaybackCounters::bump(&counters.holds);

        let stats = counters.snapshot(3);
        assert_eq!(stats.frames_presented, 2);
        assert_eq!(stats.holds, 1);
        assert_eq!(stats.picture_reallocations, 3);
        assert_eq!(stats.catch_ups, 0);
    }
}
