//! PCM back-end driver interface (§6) and a synthetic test back-end.
//!
//! Hardware-specific drivers (ALSA, PipeWire, WASAPI, CoreAudio) are out of
//! scope for this workspace; this crate only defines the contract the
//! engine in `dspd-core` calls into (`PcmBackend`) and ships one concrete,
//! deterministic implementation (`NullBackend`) used by tests and the demo
//! binary.

mod errno;
mod null;
mod traits;
mod util;

pub use errno::{BResult, Errno};
pub use null::{NullBackend, StreamState};
pub use traits::{
    ChannelMap, ChannelPosition, DeviceParams, DeviceStatus, Direction, MmapRegion, PcmBackend,
    SampleFormat,
};
pub use util::{pow2_exponent, round_up_pow2_clamped};
