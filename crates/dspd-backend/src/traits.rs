//! The PCM back-end driver interface (§6, "consumed").
//!
//! This is a Rust trait standing in for the function-pointer table the
//! engine calls into. Concrete hardware back-ends (ALSA, PipeWire, WASAPI,
//! CoreAudio) are out of scope for this crate — the engine only ever talks
//! to `dyn PcmBackend`. `NullBackend` (see `null.rs`) is the one concrete
//! implementation this crate ships, used by tests and `dspd-demo`.

use serde::{Deserialize, Serialize};

use crate::errno::{BResult, Errno};

/// Sample encoding. The engine's mixer always works in `f32`/`f64`
/// internally (§4.4); this describes what the back-end natively stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
    S16Le,
    S24Le,
    S32Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Playback,
    Capture,
}

/// Immutable parameters for one direction of a device, per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceParams {
    pub format: SampleFormat,
    pub channels: u16,
    pub rate: u32,
    pub bufsize_frames: u32,
    pub fragsize_frames: u32,
    pub direction: Direction,
    pub min_latency: u32,
    pub max_latency: u32,
    pub min_dma: u32,
    pub name: String,
    pub description: String,
    pub bus: String,
    pub address: String,
}

impl DeviceParams {
    /// `fragsize ≤ bufsize`, rate in range, per §3 invariants.
    pub fn validate(&self) -> BResult<()> {
        if self.fragsize_frames == 0 || self.fragsize_frames > self.bufsize_frames {
            return Err(Errno::EINVAL);
        }
        if !(1000..=384_000).contains(&self.rate) {
            return Err(Errno::EINVAL);
        }
        if self.min_latency > self.max_latency || self.max_latency > self.bufsize_frames {
            return Err(Errno::EINVAL);
        }
        if self.channels == 0 {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }
}

/// Snapshot returned by `status()`, per §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceStatus {
    pub appl_ptr: u32,
    pub hw_ptr: u32,
    pub fill: u32,
    pub space: u32,
    pub tstamp_ns: u64,
    pub delay_frames: u32,
    pub error: Option<Errno>,
}

/// One channel map entry; `Unknown` carries through positions the back-end
/// reports that this crate doesn't assign semantics to (aux channels etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPosition {
    Mono,
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    RearLeft,
    RearRight,
    Unknown(u32),
}

#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    pub positions: Vec<ChannelPosition>,
}

/// Writable view onto the back-end's native buffer for one mmap'd segment.
/// Frame `i` of the segment is at `[i * channels .. (i + 1) * channels)`
/// within the slice returned by `PcmBackend::buffer`/`buffer_mut`, starting
/// at `offset_frames`.
#[derive(Debug, Clone, Copy)]
pub struct MmapRegion {
    pub offset_frames: u32,
    pub frames: u32,
}

/// The PCM back-end driver interface, §6.
///
/// Two deviations from a literal transcription of §6, both load-bearing for
/// memory safety and both documented in DESIGN.md:
///
/// - `poll_descriptors`/`poll_revents`/`io_pending` (raw fd polling) are
///   replaced by `wait_ready`, since this crate has no real OS file
///   descriptors to poll — only `NullBackend`'s synthetic timeline exists.
///   The sleep/wake *contract* in §4.6 is unchanged: the scheduler still
///   computes a deadline and still blocks until the earliest of several
///   wake sources, it just does so by calling into this method instead of
///   `poll(2)`.
/// - `mmap_begin`/`mmap_commit` return a `MmapRegion` (offset + length) into
///   a buffer obtained separately via `buffer`/`buffer_mut`, rather than a
///   raw pointer, since Rust has no safe raw-pointer-through-FFI story here.
pub trait PcmBackend: Send + std::any::Any {
    fn params(&self) -> &DeviceParams;
    fn chmap(&self) -> Option<&ChannelMap>;

    /// Lets test/demo code downcast a `dyn PcmBackend` back to its concrete
    /// type (e.g. to drive `NullBackend`'s synthetic clock hooks), without
    /// widening the rest of the trait's surface.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    fn prepare(&mut self) -> BResult<()>;
    fn start(&mut self) -> BResult<()>;
    fn drop_stream(&mut self) -> BResult<()>;
    fn recover(&mut self) -> BResult<()>;

    fn status(&mut self, hwsync: bool) -> BResult<DeviceStatus>;

    fn mmap_begin(&mut self, max_frames: u32) -> BResult<MmapRegion>;
    /// Returns frames actually committed (may be less than requested).
    fn mmap_commit(&mut self, region: MmapRegion) -> BResult<u32>;

    /// The interleaved float buffer underlying `mmap_begin`/`mmap_commit`,
    /// `bufsize_frames * channels` samples long.
    fn buffer(&self) -> &[f32];
    fn buffer_mut(&mut self) -> &mut [f32];

    fn rewind(&mut self, frames: u32) -> BResult<u32>;
    fn forward(&mut self, frames: u32) -> BResult<u32>;
    fn rewindable(&self) -> BResult<u32>;

    fn adjust_pointer(&mut self, signed_frames: i32) -> BResult<()>;

    fn set_volume(&mut self, volume: f32) -> BResult<()>;
    /// Requests `buffer` frames of latency with `hint` as a rounding
    /// preference; returns the latency the back-end actually configured.
    fn set_latency(&mut self, buffer: u32, hint: u32) -> BResult<u32>;

    /// Block the calling (I/O) thread until a wake source fires or
    /// `timeout` elapses. Returns `Ok(true)` if a source fired, `Ok(false)`
    /// on timeout. Substitutes for §6's `poll_descriptors`/`poll_revents`.
    fn wait_ready(&mut self, timeout: std::time::Duration) -> BResult<bool>;

    /// Pass-through for back-end-specific requests not covered by this
    /// trait, per §4.11 ("unknown requests ... forwarded to the back-end's
    /// own ioctl dispatcher"). Default: not implemented.
    fn ioctl(&mut self, _req: u32, _input: &[u8], _output: &mut [u8]) -> BResult<i32> {
        Err(Errno::ENOSYS)
    }
}
