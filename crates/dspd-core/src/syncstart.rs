//! Synchronized start mailbox (C6, §4.8/§9).
//!
//! Reuses the triple-buffer primitive from `ring.rs` to publish the
//! timestamps a sync group should fire playback/capture at.

use crate::ring::{triple_buffer, TripleReader, TripleWriter};

pub const STREAM_PLAYBACK: u8 = 0b01;
pub const STREAM_CAPTURE: u8 = 0b10;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncStartSnapshot {
    pub playback_tstamp_ns: u64,
    pub capture_tstamp_ns: u64,
    pub active_streams: u8,
}

pub fn sync_start_channel() -> (TripleWriter<SyncStartSnapshot>, TripleReader<SyncStartSnapshot>) {
    triple_buffer(SyncStartSnapshot::default())
}

pub fn should_fire_playback(snapshot: SyncStartSnapshot) -> bool {
    snapshot.active_streams & STREAM_PLAYBACK != 0
}

/// §9 design note (i): the original firing condition for capture streams
/// checks whether *playback* is active rather than whether capture itself
/// is armed. Preserved verbatim — clients that rely on capture starting
/// in lockstep with a group's playback stream depend on this, and the
/// group's capture bit is always set alongside playback's in practice.
pub fn should_fire_capture(_snapshot: SyncStartSnapshot, playback_active: bool) -> bool {
    playback_active
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_fires_only_when_bit_set() {
        let mut snap = SyncStartSnapshot::default();
        assert!(!should_fire_playback(snap));
        snap.active_streams = STREAM_PLAYBACK;
        assert!(should_fire_playback(snap));
    }

    #[test]
    fn capture_follows_playback_active_flag() {
        let snap = SyncStartSnapshot { active_streams: STREAM_CAPTURE, ..Default::default() };
        assert!(!should_fire_capture(snap, false));
        assert!(should_fire_capture(snap, true));
    }
}
