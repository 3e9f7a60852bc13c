//! Clock interpolator (C2, §4.2).
//!
//! Tracks drift between the nominal sample clock and observed
//! `(tstamp, hw_ptr)` pairs so the scheduler can space out device `status`
//! calls ("interpolate status") instead of reading the back-end every
//! cycle.

#[derive(Debug, Clone, Copy)]
pub struct ClockInterpolator {
    sample_time_ns: f64,
    max_drift_ns_per_frame: f64,
    drift_ns_per_frame: f64,
    last_tstamp_ns: Option<u64>,
    last_hw_ptr: Option<u32>,
}

impl ClockInterpolator {
    /// `max_diff` is the maximum allowed drift as a fraction of
    /// `sample_time` (e.g. `1e-4` permits ±100 ppm).
    pub fn new(rate: u32, max_diff: f64) -> Self {
        let sample_time_ns = 1e9 / rate.max(1) as f64;
        Self {
            sample_time_ns,
            max_drift_ns_per_frame: sample_time_ns * max_diff,
            drift_ns_per_frame: 0.0,
            last_tstamp_ns: None,
            last_hw_ptr: None,
        }
    }

    pub fn reset(&mut self) {
        self.drift_ns_per_frame = 0.0;
        self.last_tstamp_ns = None;
        self.last_hw_ptr = None;
    }

    /// Folds a new `(tstamp, hw_ptr)` sample into the running drift
    /// estimate.
    pub fn observe(&mut self, tstamp_ns: u64, hw_ptr: u32) {
        if let (Some(last_t), Some(last_hw)) = (self.last_tstamp_ns, self.last_hw_ptr) {
            let dt = tstamp_ns.saturating_sub(last_t) as f64;
            let dframes = hw_ptr.wrapping_sub(last_hw) as f64;
            if dframes > 0.0 {
                let expected = dframes * self.sample_time_ns;
                let observed = (dt - expected) / dframes;
                self.drift_ns_per_frame =
                    observed.clamp(-self.max_drift_ns_per_frame, self.max_drift_ns_per_frame);
            }
        }
        self.last_tstamp_ns = Some(tstamp_ns);
        self.last_hw_ptr = Some(hw_ptr);
    }

    /// `frames(dt)`: how many frames elapse in `dt_ns`, per the current
    /// drift-adjusted sample period.
    pub fn frames(&self, dt_ns: u64) -> u32 {
        let per_frame = self.sample_time_ns + self.drift_ns_per_frame;
        if per_frame <= 0.0 {
            return 0;
        }
        (dt_ns as f64 / per_frame).floor().max(0.0) as u32
    }

    /// `time(frames)`: the drift-adjusted duration of `frames` frames.
    pub fn time(&self, frames: u32) -> u64 {
        (frames as f64 * (self.sample_time_ns + self.drift_ns_per_frame)).max(0.0) as u64
    }

    pub fn drift_ns_per_frame(&self) -> f64 {
        self.drift_ns_per_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_drift() {
        let mut c = ClockInterpolator::new(48_000, 1e-3);
        c.observe(0, 0);
        c.observe(1_000_000_000, 48_000);
        c.reset();
        assert_eq!(c.drift_ns_per_frame(), 0.0);
    }

    #[test]
    fn frames_and_time_are_consistent_at_zero_drift() {
        let c = ClockInterpolator::new(48_000, 1e-3);
        let frames = c.frames(1_000_000_000);
        assert_eq!(frames, 48_000);
        let ns = c.time(48_000);
        assert_eq!(ns, 1_000_000_000);
    }

    #[test]
    fn drift_is_clamped() {
        let mut c = ClockInterpolator::new(48_000, 1e-6);
        c.observe(0, 0);
        // Hardware running at double nominal speed — drift should clamp
        // rather than track the full discrepancy.
        c.observe(1_000_000_000, 96_000);
        assert!(c.drift_ns_per_frame().abs() <= c.max_drift_ns_per_frame.abs());
    }
}
