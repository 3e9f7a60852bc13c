//! Per-device audio I/O engine.
//!
//! Owns the ring-buffer transport (`ring`), the generational client
//! attachment table (`slot`), per-stream clock tracking (`clock`), the
//! client/device protocol (`client`, `device`), the device's I/O
//! scheduler (`scheduler`), and the three ancillary sub-protocols: sync
//! start (`syncstart`), sync groups (`syncgroup`), and exclusive-lock
//! notification (`lock`), plus the flat virtual-control list (`vctrl`)
//! and the request-dispatch contract (`dispatch`).

mod client;
mod clock;
mod config;
mod device;
mod dispatch;
mod error;
mod lock;
mod ring;
mod scheduler;
mod slot;
mod syncgroup;
mod syncstart;
mod vctrl;

pub use client::{Client, ClientStream, Direction, StreamHandle};
pub use clock::ClockInterpolator;
pub use config::{DeviceConfig, GlitchPolicy, ResampleQualityConfig, StreamParams};
pub use device::{ConfigRegister, Device};
pub use dispatch::{dispatch_unknown, flags, HandlerSpec, RequestContext};
pub use error::{EngineError, EngineResult};
pub use lock::{NotifyChannel, NotifyMessage};
pub use ring::{
    ring_channel, triple_buffer, RingReader, RingWriter, StatusSnapshot, TripleReader, TripleWriter,
};
pub use scheduler::{Scheduler, SchedulerState};
pub use slot::{SlotId, SlotMap};
pub use syncgroup::{GroupId, SyncGroupRegistry};
pub use syncstart::{
    should_fire_capture, should_fire_playback, sync_start_channel, SyncStartSnapshot,
    STREAM_CAPTURE, STREAM_PLAYBACK,
};
pub use vctrl::{ControlEvent, ControlKind, ControlOwner, VirtualControl, VirtualControlList, VCTRL_MAX};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _cfg = DeviceConfig::default();
        let _slots: SlotMap<u32> = SlotMap::new();
    }
}
