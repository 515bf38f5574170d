//! Timestamp resolution for decoded frames.
//!
//! Decoders report a reordered pts and a dts, either of which may be missing
//! or non-monotonic depending on the container. The corrector counts how
//! often each goes backwards and trusts the one that misbehaves less.

#[derive(Debug, Clone)]
pub struct PtsCorrector {
    faulty_pts: u64,
    faulty_dts: u64,
    last_pts: i64,
    last_dts: i64,
}

impl Default for PtsCorrector {
    fn default() -> Self {
        Self {
            faulty_pts: 0,
            faulty_dts: 0,
            last_pts: i64::MIN,
            last_dts: i64::MIN,
        }
    }
}

impl PtsCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the timestamp for a frame. `None` when neither is usable.
    pub fn resolve(&mut self, reported_pts: Option<i64>, reported_dts: Option<i64>) -> Option<i64> {
        match (reported_dts, reported_pts) {
            (Some(dts), _) => {
                if dts <= self.last_dts {
                    self.faulty_dts += 1;
                }
                self.last_dts = dts;
            }
            (None, Some(pts)) => self.last_dts = pts,
            (None, None) => {}
        }

        match (reported_pts, reported_dts) {
            (Some(pts), _) => {
                if pts <= self.last_pts {
                    self.faulty_pts += 1;
                }
                self.last_pts = pts;
            }
            (None, Some(dts)) => self.last_pts = dts,
            (None, None) => {}
        }

        match reported_pts {
            Some(pts) if self.faulty_pts <= self.faulty_dts || reported_dts.is_none() => Some(pts),
            _ => reported_dts,
        }
    }

    pub fn faults(&self) -> (u64, u64) {
        (self.faulty_pts, self.faulty_dts)
    }
}
