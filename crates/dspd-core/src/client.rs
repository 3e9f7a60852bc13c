//! Client streams (C5, §4.5) and the client handle that owns them (§3
//! "Client").
//!
//! `ClientStream` is the engine-facing half (touched only by the device
//! thread, under the device's `srv_lock`); `StreamHandle` is the
//! application-facing half an app thread reads/writes/queries through.
//! They share a ring (§4.1) and a triple-buffered status mailbox, plus an
//! atomically bit-cast software volume, directly grounding the teacher's
//! `stream.rs` `SharedState` pattern for cross-thread volume control.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dspd_backend::Errno;
use dspd_resample::{ChannelMixer, Resampler};

use crate::config::StreamParams;
use crate::error::EngineError;
use crate::ring::{ring_channel, triple_buffer, RingReader, RingWriter, StatusSnapshot, TripleReader, TripleWriter};
use crate::slot::SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Playback,
    Capture,
}

/// The application-facing end of a stream's ring: a writer for playback
/// (the app produces audio), a reader for capture (the app consumes it).
enum AppRingEnd {
    Writer(RingWriter),
    Reader(RingReader),
}

/// The engine-facing end, always the opposite variant of `AppRingEnd`.
enum EngineRingEnd {
    Reader(RingReader),
    Writer(RingWriter),
}

impl EngineRingEnd {
    fn mark_error(&self, e: Errno) {
        match self {
            EngineRingEnd::Reader(r) => r.set_error(e),
            EngineRingEnd::Writer(w) => w.set_error(e),
        }
    }
}

/// Application-side handle returned by `ClientStream::new`.
pub struct StreamHandle {
    ring: AppRingEnd,
    status: TripleReader<StatusSnapshot>,
    volume_bits: Arc<AtomicU32>,
}

impl StreamHandle {
    pub fn write(&mut self, data: &[f32]) -> Result<usize, Errno> {
        match &mut self.ring {
            AppRingEnd::Writer(w) => w.write(data),
            AppRingEnd::Reader(_) => Err(Errno::EINVAL),
        }
    }

    pub fn read(&mut self, out: &mut [f32]) -> Result<usize, Errno> {
        match &mut self.ring {
            AppRingEnd::Reader(r) => r.read(out),
            AppRingEnd::Writer(_) => Err(Errno::EINVAL),
        }
    }

    pub fn status(&mut self) -> StatusSnapshot {
        self.status.read()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Acquire))
    }
}

/// Engine-side half of a client stream. Only ever touched by the device
/// thread that owns the attaching device.
pub struct ClientStream {
    pub params: StreamParams,
    pub direction: Direction,
    ring: EngineRingEnd,
    status: TripleWriter<StatusSnapshot>,
    volume_bits: Arc<AtomicU32>,
    resampler: Option<Box<dyn Resampler>>,
    mixer: Option<ChannelMixer>,
    pub avail_min: u32,
    pub start_count: u32,
    scratch_client: Vec<f32>,
    scratch_device: Vec<f32>,
    /// §4.7(c): set whenever this stream has committed-but-unplayed device
    /// audio it hasn't been mixed into yet (freshly attached, or just
    /// un-paused) — cleared once the engine performs the catch-up rewind.
    catchup_pending: bool,
}

/// Result of `get_playback_status`: how many frames the client can
/// contribute this cycle, plus how many already-committed device frames
/// (behind the device's appl_ptr) it would like rewound and remixed so it
/// isn't missing audio it joined too late to have heard mixed in.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackStatus {
    pub frames: u32,
    pub rewind_request: u32,
}

impl ClientStream {
    pub fn new(params: StreamParams, direction: Direction) -> (ClientStream, StreamHandle) {
        let (writer, reader) = ring_channel(params.bufsize_frames as usize, params.channels);
        let (status_w, status_r) = triple_buffer(StatusSnapshot::default());
        let volume_bits = Arc::new(AtomicU32::new(1.0f32.to_bits()));

        let (engine_ring, app_ring) = match direction {
            Direction::Playback => (EngineRingEnd::Reader(reader), AppRingEnd::Writer(writer)),
            Direction::Capture => (EngineRingEnd::Writer(writer), AppRingEnd::Reader(reader)),
        };

        let stream = ClientStream {
            params,
            direction,
            ring: engine_ring,
            status: status_w,
            volume_bits: volume_bits.clone(),
            resampler: None,
            mixer: None,
            avail_min: params.fragsize_frames,
            start_count: 0,
            scratch_client: Vec::new(),
            scratch_device: Vec::new(),
            catchup_pending: true,
        };
        let handle = StreamHandle { ring: app_ring, status: status_r, volume_bits };
        (stream, handle)
    }

    pub fn install_resampler(&mut self, resampler: Box<dyn Resampler>) {
        self.resampler = Some(resampler);
    }

    pub fn install_mixer(&mut self, mixer: ChannelMixer) {
        self.mixer = Some(mixer);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Acquire))
    }

    /// §4.5 `get_playback_status`: how many frames this client can
    /// contribute this cycle, or `EAGAIN` if it has less than `avail_min`
    /// buffered (relative to `cycle_len`). `committed_gap` is how many
    /// device frames are currently committed but not yet played; while
    /// `catchup_pending`, up to that many are requested back as a rewind
    /// (§4.7(c) "may request a rewind of up to min(rewindable, client_gap)").
    pub fn get_playback_status(&self, cycle_len: u32, committed_gap: u32) -> Result<PlaybackStatus, Errno> {
        let reader = match &self.ring {
            EngineRingEnd::Reader(r) => r,
            EngineRingEnd::Writer(_) => return Err(Errno::EINVAL),
        };
        if let Some(e) = reader.error() {
            return Err(e);
        }
        let fill = reader.fill_frames();
        let threshold = self.avail_min.min(cycle_len);
        if fill < threshold {
            return Err(Errno::EAGAIN);
        }
        let rewind_request = if self.catchup_pending { committed_gap } else { 0 };
        Ok(PlaybackStatus { frames: fill.min(cycle_len), rewind_request })
    }

    /// Marks this stream caught up after the engine performs (or gives up
    /// on) the rewind/remix pass, so it isn't requested again every cycle.
    pub fn clear_catchup(&mut self) {
        self.catchup_pending = false;
    }

    /// Marks this stream as needing another catch-up rewind, e.g. after a
    /// route change restarts it onto a new device.
    pub fn request_catchup(&mut self) {
        self.catchup_pending = true;
    }

    /// §4.5 `xfer` (playback direction): read up to `frames` client frames,
    /// resample/mix them into `dst` (device-channel interleaved, `frames`
    /// long), and publish a status snapshot. Returns frames mixed.
    pub fn playback_xfer(
        &mut self,
        dst: &mut [f32],
        frames: u32,
        device_channels: u16,
        dev_tstamp_ns: u64,
    ) -> Result<u32, Errno> {
        let client_ch = self.params.channels as usize;
        let volume = self.volume();
        let want_client_frames = frames as usize;
        self.scratch_client.resize(want_client_frames * client_ch, 0.0);

        let (read_samples, fill_after, error_after) = {
            let reader = match &mut self.ring {
                EngineRingEnd::Reader(r) => r,
                EngineRingEnd::Writer(_) => return Err(Errno::EINVAL),
            };
            let n = reader.read(&mut self.scratch_client)?;
            (n, reader.fill_frames(), reader.error())
        };
        let client_frames = read_samples / client_ch;
        self.scratch_client.truncate(client_frames * client_ch);

        let device_frames_out = if let Some(resampler) = self.resampler.as_mut() {
            let max_out = frames as usize * resampler.channels().max(client_ch as u16) as usize;
            self.scratch_device.resize(max_out, 0.0);
            let (_, produced) = resampler
                .process(false, &self.scratch_client, &mut self.scratch_device)
                .map_err(|_| Errno::EIO)?;
            self.scratch_device.truncate(produced * client_ch);
            produced
        } else {
            self.scratch_device.clear();
            self.scratch_device.extend_from_slice(&self.scratch_client);
            client_frames
        };

        if let Some(mixer) = &self.mixer {
            mixer.mix_playback(&self.scratch_device, dst, volume);
        } else {
            let ch = device_channels as usize;
            let n = device_frames_out.min(dst.len() / ch.max(1));
            for i in 0..n * ch.min(client_ch) {
                dst[i] += self.scratch_device[i] * volume;
            }
        }

        self.status.write(StatusSnapshot {
            hw_ptr: 0,
            appl_ptr: fill_after,
            fill: fill_after,
            space: self.params.bufsize_frames.saturating_sub(fill_after),
            tstamp_ns: dev_tstamp_ns,
            delay_frames: fill_after,
            cycle_length: frames,
            error: error_after,
        });

        Ok(device_frames_out as u32)
    }

    /// §4.5 `get_capture_status`: symmetric to playback, measured against
    /// the client's free space instead of fill.
    pub fn get_capture_status(&self, cycle_len: u32) -> Result<u32, Errno> {
        let writer = match &self.ring {
            EngineRingEnd::Writer(w) => w,
            EngineRingEnd::Reader(_) => return Err(Errno::EINVAL),
        };
        if let Some(e) = writer.error() {
            return Err(e);
        }
        let space = writer.space_frames();
        if space < self.avail_min.min(cycle_len) {
            return Err(Errno::EAGAIN);
        }
        Ok(space.min(cycle_len))
    }

    /// §4.5 `xfer` (capture direction): demix `frames` of device-format
    /// audio into this client's private buffer and write it to its ring.
    pub fn capture_xfer(
        &mut self,
        src: &[f32],
        frames: u32,
        device_channels: u16,
        dev_tstamp_ns: u64,
    ) -> Result<u32, Errno> {
        let client_ch = self.params.channels as usize;
        let device_ch = device_channels as usize;
        let volume = self.volume();

        // `src` is the device's whole capture fragment; clamp to `frames`
        // (already min'd against this client's free ring space) before
        // demixing, or a starved client's `scratch_client` would be
        // shorter than the source `mix_capture` expects to fill.
        let src_frames = if device_ch > 0 { src.len() / device_ch } else { 0 };
        let take_frames = (frames as usize).min(src_frames);
        self.scratch_device.clear();
        self.scratch_device.extend_from_slice(&src[..take_frames * device_ch]);

        self.scratch_client.resize(take_frames * client_ch, 0.0);
        if let Some(mixer) = &self.mixer {
            mixer.mix_capture(&self.scratch_device, &mut self.scratch_client, volume);
        } else {
            let n = take_frames.min(self.scratch_device.len() / device_ch.max(1));
            for i in 0..n * device_ch.min(client_ch) {
                self.scratch_client[i] = self.scratch_device[i] * volume;
            }
        }

        let post_resample_len = self.scratch_client.len();
        let mut out_buf = vec![0.0f32; post_resample_len.max(1)];
        let produced_frames = if let Some(resampler) = self.resampler.as_mut() {
            let (_, produced) = resampler
                .process(false, &self.scratch_client, &mut out_buf)
                .map_err(|_| Errno::EIO)?;
            out_buf.truncate(produced * client_ch);
            produced
        } else {
            out_buf = std::mem::take(&mut self.scratch_client);
            out_buf.len() / client_ch
        };

        let (written, fill_after, error_after) = {
            let writer = match &mut self.ring {
                EngineRingEnd::Writer(w) => w,
                EngineRingEnd::Reader(_) => return Err(Errno::EINVAL),
            };
            let n = writer.write(&out_buf)?;
            (n, writer.fill_frames(), writer.error())
        };

        self.status.write(StatusSnapshot {
            hw_ptr: 0,
            appl_ptr: fill_after,
            fill: fill_after,
            space: self.params.bufsize_frames.saturating_sub(fill_after),
            tstamp_ns: dev_tstamp_ns,
            delay_frames: fill_after,
            cycle_length: frames,
            error: error_after,
        });

        Ok((written / client_ch.max(1)).min(produced_frames) as u32)
    }

    /// §4.5 `error` callback: stamp the sticky ring error so the
    /// application side observes it on its next `read`/`write`.
    pub fn mark_error(&mut self, errno: Errno) {
        self.ring.mark_error(errno);
    }
}

/// A connected application, §3 "Client". Holds at most one playback and one
/// capture stream; `device` is a `SlotId`, never a strong reference, so
/// device↔client never forms an ownership cycle (§9).
pub struct Client {
    pub name: String,
    pub playback: Option<ClientStream>,
    pub capture: Option<ClientStream>,
    pub device: Option<SlotId>,
    pub trigger_playback: bool,
    pub trigger_capture: bool,
    pub sync_group: Option<SlotId>,
    pub lock_cookie: Option<u64>,
    pub reserved: bool,
    pub min_latency: u32,
    pub trigger_tstamp_ns: Option<u64>,
    error_callback: Option<Box<dyn Fn(Errno) + Send + Sync>>,
    route_change_callback: Option<Box<dyn Fn(Option<SlotId>) + Send + Sync>>,
}

impl Client {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            playback: None,
            capture: None,
            device: None,
            trigger_playback: false,
            trigger_capture: false,
            sync_group: None,
            lock_cookie: None,
            reserved: false,
            min_latency: 0,
            trigger_tstamp_ns: None,
            error_callback: None,
            route_change_callback: None,
        }
    }

    /// Resolves Open Question (ii): when both directions are present, the
    /// client's effective `min_latency` is the smaller of the two.
    pub fn connect(
        &mut self,
        device: SlotId,
        playback_min: Option<u32>,
        capture_min: Option<u32>,
    ) -> Result<(), EngineError> {
        self.device = Some(device);
        self.min_latency = match (playback_min, capture_min) {
            (Some(p), Some(c)) => p.min(c),
            (Some(p), None) => p,
            (None, Some(c)) => c,
            (None, None) => 0,
        };
        Ok(())
    }

    pub fn disconnect(&mut self) -> Option<SlotId> {
        self.device.take()
    }

    /// §4.5 route change: move to `new_device`, optionally restarting both
    /// streams (bumping `start_count`) so the device engine re-primes them.
    pub fn change_route(
        &mut self,
        new_device: Option<SlotId>,
        restart: bool,
    ) -> Result<Option<SlotId>, EngineError> {
        let old = self.device.take();
        self.device = new_device;
        if restart {
            if let Some(p) = &mut self.playback {
                p.start_count = p.start_count.wrapping_add(1);
                p.request_catchup();
            }
            if let Some(c) = &mut self.capture {
                c.start_count = c.start_count.wrapping_add(1);
            }
        }
        self.notify_route_change(new_device);
        Ok(old)
    }

    /// Supplement #1: a client may reserve a device slot without attaching,
    /// so a later `attach_reserved` is guaranteed not to race another
    /// client for the same slot.
    pub fn reserve(&mut self) {
        self.reserved = true;
    }

    pub fn set_error_callback(&mut self, f: impl Fn(Errno) + Send + Sync + 'static) {
        self.error_callback = Some(Box::new(f));
    }

    pub fn set_route_change_callback(&mut self, f: impl Fn(Option<SlotId>) + Send + Sync + 'static) {
        self.route_change_callback = Some(Box::new(f));
    }

    pub fn notify_error(&self, errno: Errno) {
        if let Some(cb) = &self.error_callback {
            cb(errno);
        }
    }

    pub fn notify_route_change(&self, device: Option<SlotId>) {
        if let Some(cb) = &self.route_change_callback {
            cb(device);
        }
    }

    pub fn settrigger(&mut self, tstamp_ns: u64) {
        self.trigger_tstamp_ns = Some(tstamp_ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dspd_resample::ChannelMixer;

    fn stream_params(bufsize: u32) -> StreamParams {
        StreamParams {
            channels: 2,
            rate: 48_000,
            bufsize_frames: bufsize,
            fragsize_frames: 256,
            min_latency: 64,
            max_latency: bufsize,
            requested_latency: 256,
        }
    }

    /// A starved capture client (small `frames`/`avail`) must not panic when
    /// the device hands over a larger fragment than the client has room for.
    #[test]
    fn capture_xfer_clamps_to_client_avail_without_panicking() {
        let (mut stream, _handle) = ClientStream::new(stream_params(8192), Direction::Capture);
        stream.install_mixer(ChannelMixer::simple(2));

        // Device fragment is 64 frames; client only has room for 16.
        let device_fragment = vec![0.3f32; 64 * 2];
        let produced = stream.capture_xfer(&device_fragment, 16, 2, 1_000).unwrap();
        assert!(produced <= 16);
    }
}
