//! Device I/O scheduler (C7, §4.6).
//!
//! Drives one `Device` through playback/capture cycles and decides how
//! long to sleep between them, per the "fill-to-sleep" curve: close to
//! empty, wake aggressively (a third of the buffer out); comfortably
//! full, sleep longer (two thirds) since there's slack to spare.

use std::time::Duration;

use dspd_backend::Errno;

use crate::client::Direction;
use crate::device::Device;

const ONE_MS_FRAMES: u32 = 48;
const HUNDRED_MS_FRAMES: u32 = 4_800;
const MAX_SLEEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Sleeping,
    Waking,
    Draining,
}

pub struct Scheduler {
    device: Device,
    state: SchedulerState,
    early_wake_requested: bool,
}

impl Scheduler {
    pub fn new(device: Device) -> Self {
        Self { device, state: SchedulerState::Sleeping, early_wake_requested: false }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Any thread (e.g. one that just woke a client up) can request the
    /// scheduler skip its sleep on the next cycle.
    pub fn request_early_wake(&mut self) {
        self.early_wake_requested = true;
    }

    /// Runs one full cycle: playback, then capture, then blocks until the
    /// next wake source. Returns the total frames committed this cycle.
    pub fn run_once(&mut self) -> Result<u32, Errno> {
        self.state = SchedulerState::Waking;

        if let Some(e) = self.device.error() {
            self.state = SchedulerState::Draining;
            return Err(e);
        }

        let playback = self.device.run_playback_cycle().unwrap_or(0);
        let capture = self.device.run_capture_cycle().unwrap_or(0);
        let total = playback + capture;

        let fill = self.device.fill_frames(Direction::Playback).unwrap_or(0);
        let sleep = Self::fill_to_sleep(fill);

        self.state = SchedulerState::Sleeping;
        let timeout = if std::mem::take(&mut self.early_wake_requested) {
            Duration::ZERO
        } else {
            sleep
        };
        self.device.wait_ready_any(timeout)?;

        Ok(total)
    }

    pub fn abort(&mut self, errno: Errno) {
        self.device.abort(errno);
        self.state = SchedulerState::Draining;
    }

    /// §4.6 fill-to-sleep curve: a third of the buffer when nearly empty
    /// (≤1ms of fill), two thirds when comfortably full (≥100ms),
    /// linearly interpolated in between, capped at 500ms.
    fn fill_to_sleep(fill_frames: u32) -> Duration {
        let frac = if fill_frames <= ONE_MS_FRAMES {
            1.0 / 3.0
        } else if fill_frames >= HUNDRED_MS_FRAMES {
            2.0 / 3.0
        } else {
            let t = (fill_frames - ONE_MS_FRAMES) as f64 / (HUNDRED_MS_FRAMES - ONE_MS_FRAMES) as f64;
            1.0 / 3.0 + t * (1.0 / 3.0)
        };
        let ns = fill_frames as f64 * frac * (1e9 / 48_000.0);
        Duration::from_secs_f64(ns / 1e9).min(MAX_SLEEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_curve_is_monotonic_and_capped() {
        let low = Scheduler::fill_to_sleep(0);
        let mid = Scheduler::fill_to_sleep(2_000);
        let high = Scheduler::fill_to_sleep(HUNDRED_MS_FRAMES);
        let huge = Scheduler::fill_to_sleep(u32::MAX);
        assert!(low <= mid);
        assert!(mid <= high);
        assert!(huge <= MAX_SLEEP);
    }
}
