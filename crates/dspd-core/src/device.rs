//! Device engine (C8, §4.7): owns the back-ends for one device, the
//! clients attached to it, glitch correction, and latency negotiation.
//! Runs entirely on the device's I/O thread — everything here executes
//! under the implicit `srv_lock` the scheduler holds for the duration of
//! a cycle (§5).

use tracing::{debug, warn};

use dspd_backend::{DeviceStatus, Errno, PcmBackend};

use crate::client::{Client, Direction, PlaybackStatus};
use crate::clock::ClockInterpolator;
use crate::config::{DeviceConfig, GlitchPolicy};
use crate::lock::{NotifyChannel, NotifyMessage};
use crate::slot::{SlotId, SlotMap};

use crossbeam_channel::Sender;

/// Stand-in for the spec's packed 32-bit device configuration register.
/// Kept as a plain struct since the device already serializes access to
/// it through `&mut self`; there's no concurrent reader to race.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigRegister {
    pub latency_exponent: u8,
    pub playback_high_water: u32,
    pub capture_high_water: u32,
}

pub struct Device {
    pub name: String,
    playback_backend: Option<Box<dyn PcmBackend>>,
    capture_backend: Option<Box<dyn PcmBackend>>,
    pub clients: SlotMap<Client>,
    reg: ConfigRegister,
    pub config: DeviceConfig,
    error: Option<Errno>,
    irq_count: u64,
    ack_count: u64,
    glitch_active: bool,
    exclusive_holder: Option<SlotId>,
    current_latency: Option<u32>,
    notify: Option<NotifyChannel>,
    playback_clock: ClockInterpolator,
    capture_clock: ClockInterpolator,
    mix_accum: Vec<f32>,
    capture_scratch: Vec<f32>,
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        playback_backend: Option<Box<dyn PcmBackend>>,
        capture_backend: Option<Box<dyn PcmBackend>>,
        config: DeviceConfig,
    ) -> Self {
        let playback_rate = playback_backend.as_ref().map(|b| b.params().rate).unwrap_or(48_000);
        let capture_rate = capture_backend.as_ref().map(|b| b.params().rate).unwrap_or(48_000);
        Self {
            name: name.into(),
            playback_backend,
            capture_backend,
            clients: SlotMap::new(),
            reg: ConfigRegister::default(),
            config,
            error: None,
            irq_count: 0,
            ack_count: 0,
            glitch_active: false,
            exclusive_holder: None,
            current_latency: None,
            notify: None,
            playback_clock: ClockInterpolator::new(playback_rate, 1e-4),
            capture_clock: ClockInterpolator::new(capture_rate, 1e-4),
            mix_accum: Vec::new(),
            capture_scratch: Vec::new(),
        }
    }

    pub fn attach(&mut self, client: Client) -> Result<SlotId, Errno> {
        if self.exclusive_holder.is_some() {
            return Err(Errno::EBUSY);
        }
        let id = self.clients.insert(client);
        self.update_high_water();
        Ok(id)
    }

    pub fn detach(&mut self, id: SlotId) -> Option<Client> {
        let removed = self.clients.remove(id);
        if self.exclusive_holder == Some(id) {
            self.exclusive_holder = None;
            self.notify = None;
        }
        if self.clients.iter().next().is_none() && self.config.glitch_policy == GlitchPolicy::Auto {
            self.glitch_active = false;
        }
        self.update_high_water();
        removed
    }

    /// Supplement #1: reserve a slot up front, attach later without
    /// racing another client for the same index.
    pub fn reserve_slot(&mut self, client: Client) -> SlotId {
        self.clients.insert(client)
    }

    pub fn attach_reserved(&mut self, id: SlotId) -> Result<(), Errno> {
        match self.clients.get_mut(id) {
            Some(c) => {
                c.reserved = false;
                Ok(())
            }
            None => Err(Errno::ENOENT),
        }
    }

    fn update_high_water(&mut self) {
        self.reg.playback_high_water = self.clients.high_water();
        self.reg.capture_high_water = self.clients.high_water();
    }

    pub fn set_exclusive(&mut self, id: SlotId, cookie: u64) -> Result<(), Errno> {
        if self.clients.get(id).is_none() {
            return Err(Errno::ENOENT);
        }
        if self.exclusive_holder.is_some() && self.exclusive_holder != Some(id) {
            return Err(Errno::EBUSY);
        }
        self.exclusive_holder = Some(id);
        self.notify = Some(NotifyChannel::new(cookie));
        Ok(())
    }

    pub fn release_exclusive(&mut self, id: SlotId) {
        if self.exclusive_holder == Some(id) {
            self.exclusive_holder = None;
            self.notify = None;
        }
    }

    pub fn notify_sender(&self) -> Option<Sender<NotifyMessage>> {
        self.notify.as_ref().map(|n| n.sender())
    }

    /// Substitutes for the original SIGBUS protocol (§5, Open Question
    /// iii): rather than signal-and-longjmp, the faulting client's
    /// callback fires, its streams are marked with a sticky error, and it
    /// is detached — the same externally observable outcome (client loses
    /// its connection, sees an error) without unsafe signal handling.
    pub fn fault_client(&mut self, id: SlotId, errno: Errno) {
        if let Some(client) = self.clients.get_mut(id) {
            client.notify_error(errno);
            if let Some(p) = &mut client.playback {
                p.mark_error(errno);
            }
            if let Some(c) = &mut client.capture {
                c.mark_error(errno);
            }
        }
        warn!(device = %self.name, ?id, %errno, "faulting client out of device");
        self.detach(id);
    }

    /// §4.7 latency negotiation: smallest requested latency across
    /// attached clients for `direction`, clamped to the glitch threshold
    /// while glitch correction is active, rounded by the back-end to a
    /// power of two.
    pub fn negotiate_latency(&mut self, direction: Direction) -> Result<u32, Errno> {
        let mut requested = u32::MAX;
        for (_, client) in self.clients.iter() {
            let stream = match direction {
                Direction::Playback => &client.playback,
                Direction::Capture => &client.capture,
            };
            if let Some(s) = stream {
                requested = requested.min(s.params.requested_latency);
            }
        }
        if requested == u32::MAX {
            requested = self.config.glitch_threshold_frames;
        }
        if self.glitch_active {
            requested = requested.max(self.config.glitch_threshold_frames);
        }
        let backend = match direction {
            Direction::Playback => self.playback_backend.as_deref_mut(),
            Direction::Capture => self.capture_backend.as_deref_mut(),
        };
        let backend = backend.ok_or(Errno::ENODEV)?;
        let actual = backend.set_latency(requested, requested)?;
        self.reg.latency_exponent = dspd_backend::pow2_exponent(actual.max(1).next_power_of_two());
        self.current_latency = Some(actual);
        Ok(actual)
    }

    /// §4.7 "Exclusivity may also lock the latency": a per-client request
    /// to tighten a stream's own latency below what's currently negotiated.
    /// While another client holds the device exclusively, a request below
    /// the current latency is refused with `ETIME` rather than silently
    /// renegotiating the shared buffer the holder is relying on; the
    /// holder itself, and requests that don't tighten anything, pass
    /// straight through to `negotiate_latency`.
    pub fn request_latency(
        &mut self,
        client: SlotId,
        direction: Direction,
        requested: u32,
    ) -> Result<u32, Errno> {
        if let Some(holder) = self.exclusive_holder {
            if holder != client {
                if let Some(current) = self.current_latency {
                    if requested < current {
                        return Err(Errno::ETIME);
                    }
                }
            }
        }
        let stream = match direction {
            Direction::Playback => self.clients.get_mut(client).and_then(|c| c.playback.as_mut()),
            Direction::Capture => self.clients.get_mut(client).and_then(|c| c.capture.as_mut()),
        };
        match stream {
            Some(s) => s.params.requested_latency = requested,
            None => return Err(Errno::ENOENT),
        }
        self.negotiate_latency(direction)
    }

    /// §7 stream-error recovery: `ENODEV` aborts the device outright;
    /// anything else is recovered and the back-end re-primed, latching
    /// glitch correction on if the policy calls for it.
    fn handle_stream_error(&mut self, direction: Direction, errno: Errno) -> Result<(), Errno> {
        if errno == Errno::ENODEV {
            tracing::error!(device = %self.name, ?direction, "device disconnected");
            self.abort(errno);
            return Err(errno);
        }
        warn!(device = %self.name, ?direction, %errno, "recovering stream");
        let backend = match direction {
            Direction::Playback => self.playback_backend.as_deref_mut(),
            Direction::Capture => self.capture_backend.as_deref_mut(),
        };
        if let Some(backend) = backend {
            backend.recover()?;
            backend.prepare()?;
        }
        if errno == Errno::EPIPE
            && matches!(self.config.glitch_policy, GlitchPolicy::Latch | GlitchPolicy::Auto)
        {
            self.glitch_active = true;
        }
        for (_, client) in self.clients.iter_mut() {
            let stream = match direction {
                Direction::Playback => &mut client.playback,
                Direction::Capture => &mut client.capture,
            };
            if let Some(s) = stream {
                s.start_count = s.start_count.wrapping_add(1);
            }
        }
        Ok(())
    }

    /// §4.6 cancellation: propagate `errno` to every attached client and
    /// mark the device itself dead.
    pub fn abort(&mut self, errno: Errno) {
        self.error = Some(errno);
        for (_, client) in self.clients.iter_mut() {
            client.notify_error(errno);
            if let Some(p) = &mut client.playback {
                p.mark_error(errno);
            }
            if let Some(c) = &mut client.capture {
                c.mark_error(errno);
            }
        }
    }

    /// §4.7(c): a client that just joined (or was restarted onto this
    /// device) may have missed audio already committed but not yet played.
    /// Rewind the back-end by up to `min(rewindable, rewind_request)`
    /// frames — only if doing so still leaves at least a 10ms safety
    /// margin ahead of hw_ptr — remix this client's contribution into the
    /// freed region (other clients' previously mixed audio is preserved,
    /// since `playback_xfer` accumulates rather than overwrites), and
    /// commit forward again to restore the prior application pointer.
    fn try_rewind_remix(
        &mut self,
        id: SlotId,
        rewind_request: u32,
        gap_frames: u32,
        device_channels: u16,
        dev_tstamp_ns: u64,
    ) {
        const REWIND_MARGIN_MS: u32 = 10;

        let backend = match self.playback_backend.as_deref_mut() {
            Some(b) => b,
            None => return,
        };
        let rewindable = backend.rewindable().unwrap_or(0);
        let margin = (backend.params().rate / 1000 * REWIND_MARGIN_MS).max(1);
        let requested = rewindable.min(rewind_request);
        if requested == 0 || gap_frames.saturating_sub(requested) < margin {
            return;
        }

        let actual = match backend.rewind(requested) {
            Ok(a) if a > 0 => a,
            _ => return,
        };
        let region = match backend.mmap_begin(actual) {
            Ok(r) => r,
            Err(_) => {
                let _ = backend.forward(actual);
                return;
            }
        };

        let channels = device_channels as usize;
        let offset = region.offset_frames as usize * channels;
        let n = (region.frames as usize * channels).min(backend.buffer().len().saturating_sub(offset));
        let mut remix_buf = backend.buffer()[offset..offset + n].to_vec();

        let xfer_result = self
            .clients
            .get_mut(id)
            .and_then(|c| c.playback.as_mut())
            .map(|stream| stream.playback_xfer(&mut remix_buf, region.frames, device_channels, dev_tstamp_ns));

        let backend = self.playback_backend.as_deref_mut().unwrap();
        if matches!(xfer_result, Some(Ok(_))) {
            backend.buffer_mut()[offset..offset + n].copy_from_slice(&remix_buf[..n]);
        }
        let _ = backend.mmap_commit(region);

        if let Some(stream) = self.clients.get_mut(id).and_then(|c| c.playback.as_mut()) {
            stream.clear_catchup();
        }
        debug!(device = %self.name, ?id, actual, "rewound and remixed catch-up client");
    }

    /// §4.7 "per cycle (playback)".
    pub fn run_playback_cycle(&mut self) -> Result<u32, Errno> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let backend = match self.playback_backend.as_deref_mut() {
            Some(b) => b,
            None => return Ok(0),
        };

        let status: DeviceStatus = match backend.status(false) {
            Ok(s) => s,
            Err(e) => {
                self.handle_stream_error(Direction::Playback, e)?;
                return Ok(0);
            }
        };
        if let Some(e) = status.error {
            self.handle_stream_error(Direction::Playback, e)?;
            return Ok(0);
        }
        self.playback_clock.observe(status.tstamp_ns, status.hw_ptr);

        let cycle_len = status.space.min(backend.params().fragsize_frames);
        if cycle_len == 0 {
            return Ok(0);
        }
        let region = backend.mmap_begin(cycle_len)?;
        let device_channels = backend.params().channels;
        let frame_samples = region.frames as usize * device_channels as usize;
        self.mix_accum.clear();
        self.mix_accum.resize(frame_samples, 0.0);

        let playback_ids: Vec<SlotId> =
            self.clients.iter().filter(|(_, c)| c.trigger_playback).map(|(id, _)| id).collect();

        let mut any_mixed = false;
        for id in playback_ids {
            let status_result = match self.clients.get_mut(id).and_then(|c| c.playback.as_mut()) {
                Some(stream) => stream.get_playback_status(region.frames, status.fill),
                None => continue,
            };
            let playback_status: PlaybackStatus = match status_result {
                Ok(s) => s,
                Err(Errno::EAGAIN) => continue,
                Err(e) => {
                    if let Some(c) = self.clients.get(id) {
                        c.notify_error(e);
                    }
                    continue;
                }
            };

            if playback_status.rewind_request > 0 {
                self.try_rewind_remix(
                    id,
                    playback_status.rewind_request,
                    status.fill,
                    device_channels,
                    status.tstamp_ns,
                );
            }

            if playback_status.frames == 0 {
                continue;
            }
            let xfer_result = match self.clients.get_mut(id).and_then(|c| c.playback.as_mut()) {
                Some(stream) => {
                    stream.playback_xfer(&mut self.mix_accum, playback_status.frames, device_channels, status.tstamp_ns)
                }
                None => continue,
            };
            match xfer_result {
                Ok(mixed) if mixed > 0 => any_mixed = true,
                Ok(_) => {}
                Err(e) => {
                    if let Some(c) = self.clients.get(id) {
                        c.notify_error(e);
                    }
                }
            }
        }

        let backend = self.playback_backend.as_deref_mut().unwrap();
        let dst = backend.buffer_mut();
        let offset = region.offset_frames as usize * device_channels as usize;
        let n = frame_samples.min(dst.len().saturating_sub(offset));
        dst[offset..offset + n].copy_from_slice(&self.mix_accum[..n]);
        let committed = backend.mmap_commit(region)?;

        if any_mixed {
            self.irq_count += 1;
        }
        self.ack_count += 1;
        debug!(device = %self.name, committed, "playback cycle committed");
        Ok(committed)
    }

    /// §4.7 "per cycle (capture)", symmetric to playback.
    pub fn run_capture_cycle(&mut self) -> Result<u32, Errno> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let backend = match self.capture_backend.as_deref_mut() {
            Some(b) => b,
            None => return Ok(0),
        };

        let status = match backend.status(false) {
            Ok(s) => s,
            Err(e) => {
                self.handle_stream_error(Direction::Capture, e)?;
                return Ok(0);
            }
        };
        if let Some(e) = status.error {
            self.handle_stream_error(Direction::Capture, e)?;
            return Ok(0);
        }
        self.capture_clock.observe(status.tstamp_ns, status.hw_ptr);

        let cycle_len = status.fill.min(backend.params().fragsize_frames);
        if cycle_len == 0 {
            return Ok(0);
        }
        let region = backend.mmap_begin(cycle_len)?;
        let device_channels = backend.params().channels;
        let frame_samples = region.frames as usize * device_channels as usize;

        let src = backend.buffer();
        let offset = region.offset_frames as usize * device_channels as usize;
        let n = frame_samples.min(src.len().saturating_sub(offset));
        self.capture_scratch.clear();
        self.capture_scratch.extend_from_slice(&src[offset..offset + n]);

        for (_, client) in self.clients.iter_mut() {
            if !client.trigger_capture {
                continue;
            }
            let status_result = match client.capture.as_mut() {
                Some(stream) => stream.get_capture_status(region.frames),
                None => continue,
            };
            let avail = match status_result {
                Ok(avail) if avail > 0 => avail,
                Ok(_) => continue,
                Err(Errno::EAGAIN) => continue,
                Err(e) => {
                    client.notify_error(e);
                    continue;
                }
            };
            let xfer_result = match client.capture.as_mut() {
                Some(stream) => stream.capture_xfer(
                    &self.capture_scratch,
                    avail.min(region.frames),
                    device_channels,
                    status.tstamp_ns,
                ),
                None => continue,
            };
            if let Err(e) = xfer_result {
                client.notify_error(e);
            }
        }

        let backend = self.capture_backend.as_deref_mut().unwrap();
        let committed = backend.mmap_commit(region)?;
        self.ack_count += 1;
        Ok(committed)
    }

    /// §4.6: total frames the scheduler should expect to drain before its
    /// next sleep decision.
    pub fn fill_frames(&mut self, direction: Direction) -> Result<u32, Errno> {
        let backend = match direction {
            Direction::Playback => self.playback_backend.as_deref_mut(),
            Direction::Capture => self.capture_backend.as_deref_mut(),
        };
        match backend {
            Some(b) => Ok(b.status(false)?.fill),
            None => Ok(0),
        }
    }

    pub fn wait_ready_any(&mut self, timeout: std::time::Duration) -> Result<bool, Errno> {
        if let Some(b) = self.playback_backend.as_deref_mut() {
            return b.wait_ready(timeout);
        }
        if let Some(b) = self.capture_backend.as_deref_mut() {
            return b.wait_ready(timeout);
        }
        Ok(false)
    }

    pub fn irq_count(&self) -> u64 {
        self.irq_count
    }

    pub fn ack_count(&self) -> u64 {
        self.ack_count
    }

    pub fn error(&self) -> Option<Errno> {
        self.error
    }

    pub fn reg(&self) -> ConfigRegister {
        self.reg
    }

    pub fn playback_backend_mut(&mut self) -> Option<&mut (dyn PcmBackend + 'static)> {
        self.playback_backend.as_deref_mut()
    }

    pub fn capture_backend_mut(&mut self) -> Option<&mut (dyn PcmBackend + 'static)> {
        self.capture_backend.as_deref_mut()
    }

    /// Diagnostic: current drift estimate per §4.2, exposed so a
    /// supervisor can decide whether a device's clock is misbehaving.
    pub fn clock_drift_ns_per_frame(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Playback => self.playback_clock.drift_ns_per_frame(),
            Direction::Capture => self.capture_clock.drift_ns_per_frame(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientStream;
    use dspd_backend::{ChannelMap, ChannelPosition, DeviceParams, NullBackend, SampleFormat};
    use dspd_backend::Direction as BackendDirection;

    fn backend() -> NullBackend {
        NullBackend::new(DeviceParams {
            format: SampleFormat::F32,
            channels: 2,
            rate: 48_000,
            bufsize_frames: 4096,
            fragsize_frames: 1024,
            direction: BackendDirection::Playback,
            min_latency: 64,
            max_latency: 4096,
            min_dma: 32,
            name: "t".into(),
            description: "test".into(),
            bus: "virtual".into(),
            address: "null:0".into(),
        })
        .unwrap()
        .with_chmap(ChannelMap { positions: vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight] })
    }

    fn stream(requested_latency: u32) -> ClientStream {
        let params = crate::config::StreamParams {
            channels: 2,
            rate: 48_000,
            bufsize_frames: 8192,
            fragsize_frames: 1024,
            min_latency: 64,
            max_latency: 8192,
            requested_latency,
        };
        ClientStream::new(params, Direction::Playback).0
    }

    #[test]
    fn non_holder_request_below_current_latency_is_refused() {
        let mut device = Device::new("t", Some(Box::new(backend())), None, DeviceConfig::default());
        device.negotiate_latency(Direction::Playback).unwrap();

        let mut holder_client = Client::new("holder");
        holder_client.playback = Some(stream(1024));
        let holder = device.attach(holder_client).unwrap();

        let mut other_client = Client::new("other");
        other_client.playback = Some(stream(1024));
        let other = device.attach(other_client).unwrap();

        device.set_exclusive(holder, 1).unwrap();
        let current = device.negotiate_latency(Direction::Playback).unwrap();

        let err = device.request_latency(other, Direction::Playback, current / 2).unwrap_err();
        assert_eq!(err, Errno::ETIME);
    }

    #[test]
    fn holder_can_still_tighten_its_own_latency() {
        let mut device = Device::new("t", Some(Box::new(backend())), None, DeviceConfig::default());
        device.negotiate_latency(Direction::Playback).unwrap();

        let mut holder_client = Client::new("holder");
        holder_client.playback = Some(stream(1024));
        let holder = device.attach(holder_client).unwrap();
        device.set_exclusive(holder, 1).unwrap();
        let current = device.negotiate_latency(Direction::Playback).unwrap();

        assert!(device.request_latency(holder, Direction::Playback, current / 2).is_ok());
    }

    #[test]
    fn request_without_exclusive_lock_negotiates_freely() {
        let mut device = Device::new("t", Some(Box::new(backend())), None, DeviceConfig::default());
        device.negotiate_latency(Direction::Playback).unwrap();

        let mut client = Client::new("c");
        client.playback = Some(stream(1024));
        let id = device.attach(client).unwrap();

        assert!(device.request_latency(id, Direction::Playback, 128).is_ok());
    }
}
