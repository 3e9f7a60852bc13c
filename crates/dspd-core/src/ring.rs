//! Ring buffer & status mailbox (C1, C6 share this primitive, §4.1).
//!
//! The ring wraps `rtrb`'s SPSC queue (grounded in the teacher's
//! `stream.rs`, which builds its cpal callback directly over
//! `rtrb::RingBuffer`) with two additions the specified transport needs
//! that `rtrb` alone doesn't expose: monotonic frame cursors and a sticky
//! error flag shared between both ends.
//!
//! The triple-buffer mailbox is a textbook wait-free "back/middle/front"
//! swap, implemented with a single `AtomicU8` rather than a CAS loop (the
//! swap already establishes the same single-writer-visible-to-reader
//! ordering the spec's CAS description calls for, with one atomic op
//! instead of a retry loop).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use rtrb::RingBuffer;

use dspd_backend::Errno;

struct Shared {
    in_ptr: AtomicU32,
    out_ptr: AtomicU32,
    error: AtomicI32,
}

impl Shared {
    fn error(&self) -> Option<Errno> {
        let v = self.error.load(Ordering::Acquire);
        if v == 0 {
            None
        } else {
            Some(Errno(v))
        }
    }

    fn set_error(&self, e: Errno) {
        self.error.store(e.0, Ordering::Release);
    }
}

pub struct RingWriter {
    producer: rtrb::Producer<f32>,
    shared: Arc<Shared>,
    channels: u16,
}

pub struct RingReader {
    consumer: rtrb::Consumer<f32>,
    shared: Arc<Shared>,
    channels: u16,
}

/// `bufsize_frames` sized ring, `channels` wide. Returns the producer
/// (written by whichever side originates data — the application for
/// playback, the device engine for capture) and the consumer.
pub fn ring_channel(bufsize_frames: usize, channels: u16) -> (RingWriter, RingReader) {
    let capacity = bufsize_frames * channels.max(1) as usize;
    let (producer, consumer) = RingBuffer::<f32>::new(capacity.max(1)).split();
    let shared = Arc::new(Shared {
        in_ptr: AtomicU32::new(0),
        out_ptr: AtomicU32::new(0),
        error: AtomicI32::new(0),
    });
    (
        RingWriter { producer, shared: shared.clone(), channels },
        RingReader { consumer, shared, channels },
    )
}

impl RingWriter {
    /// Writes as many whole frames from `data` (interleaved) as fit.
    /// Returns the number of samples written; `0` if the ring is full or a
    /// sticky error is set.
    pub fn write(&mut self, data: &[f32]) -> Result<usize, Errno> {
        if let Some(e) = self.shared.error() {
            return Err(e);
        }
        let avail = self.producer.slots().min(data.len());
        if avail == 0 {
            return Ok(0);
        }
        let mut chunk = match self.producer.write_chunk(avail) {
            Ok(c) => c,
            Err(_) => return Ok(0),
        };
        let (a, b) = chunk.as_mut_slices();
        a.copy_from_slice(&data[..a.len()]);
        b.copy_from_slice(&data[a.len()..a.len() + b.len()]);
        chunk.commit_all();
        self.shared.in_ptr.fetch_add((avail / self.channels.max(1) as usize) as u32, Ordering::Release);
        Ok(avail)
    }

    pub fn fill_frames(&self) -> u32 {
        self.shared.in_ptr.load(Ordering::Acquire).wrapping_sub(self.shared.out_ptr.load(Ordering::Acquire))
    }

    pub fn space_frames(&self) -> u32 {
        (self.producer.slots() / self.channels.max(1) as usize) as u32
    }

    pub fn error(&self) -> Option<Errno> {
        self.shared.error()
    }

    pub fn set_error(&self, e: Errno) {
        self.shared.set_error(e);
    }

    pub fn appl_ptr(&self) -> u32 {
        self.shared.in_ptr.load(Ordering::Acquire)
    }
}

impl RingReader {
    /// Reads as many whole frames as fit into `out` (interleaved). Returns
    /// the number of samples read.
    pub fn read(&mut self, out: &mut [f32]) -> Result<usize, Errno> {
        if let Some(e) = self.shared.error() {
            return Err(e);
        }
        let avail = self.consumer.slots().min(out.len());
        if avail == 0 {
            return Ok(0);
        }
        let chunk = match self.consumer.read_chunk(avail) {
            Ok(c) => c,
            Err(_) => return Ok(0),
        };
        let (a, b) = chunk.as_slices();
        out[..a.len()].copy_from_slice(a);
        out[a.len()..a.len() + b.len()].copy_from_slice(b);
        chunk.commit_all();
        self.shared.out_ptr.fetch_add((avail / self.channels.max(1) as usize) as u32, Ordering::Release);
        Ok(avail)
    }

    pub fn fill_frames(&self) -> u32 {
        self.shared.in_ptr.load(Ordering::Acquire).wrapping_sub(self.shared.out_ptr.load(Ordering::Acquire))
    }

    pub fn space_frames(&self) -> u32 {
        let capacity = self.consumer.buffer().capacity();
        let free_samples = capacity.saturating_sub(self.consumer.slots());
        (free_samples / self.channels.max(1) as usize) as u32
    }

    pub fn error(&self) -> Option<Errno> {
        self.shared.error()
    }

    pub fn set_error(&self, e: Errno) {
        self.shared.set_error(e);
    }

    pub fn out_ptr(&self) -> u32 {
        self.shared.out_ptr.load(Ordering::Acquire)
    }
}

/// Snapshot published by the device thread and read by a client (§3
/// "Status mailbox").
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusSnapshot {
    pub hw_ptr: u32,
    pub appl_ptr: u32,
    pub fill: u32,
    pub space: u32,
    pub tstamp_ns: u64,
    pub delay_frames: u32,
    pub cycle_length: u32,
    pub error: Option<Errno>,
}

const DIRTY: u8 = 0b100;
const INDEX_MASK: u8 = 0b011;

struct TripleInner<T> {
    buffers: [UnsafeCell<T>; 3],
    state: AtomicU8,
}

// SAFETY: only one of `TripleWriter`/`TripleReader` ever touches a given
// slot at a time; the swap on `state` is the synchronization point that
// hands a slot off between them.
unsafe impl<T: Send> Sync for TripleInner<T> {}

pub struct TripleWriter<T> {
    inner: Arc<TripleInner<T>>,
    write_idx: u8,
}

pub struct TripleReader<T> {
    inner: Arc<TripleInner<T>>,
    read_idx: u8,
}

/// Lock-free three-slot mailbox (§4.1): writer publishes by swapping its
/// private slot for the last-published one; reader swaps its private slot
/// for the last-published one only when the dirty bit says there's
/// something new. At most three concurrent slot identities ever exist.
pub fn triple_buffer<T: Copy>(initial: T) -> (TripleWriter<T>, TripleReader<T>) {
    let inner = Arc::new(TripleInner {
        buffers: [UnsafeCell::new(initial), UnsafeCell::new(initial), UnsafeCell::new(initial)],
        state: AtomicU8::new(2), // slot 2 is the initial "last published" (not dirty)
    });
    (
        TripleWriter { inner: inner.clone(), write_idx: 1 },
        TripleReader { inner, read_idx: 0 },
    )
}

impl<T: Copy> TripleWriter<T> {
    pub fn write(&mut self, value: T) {
        // SAFETY: `write_idx` is never the currently-published or
        // currently-read slot (the invariant the swap below maintains).
        unsafe {
            *self.inner.buffers[self.write_idx as usize].get() = value;
        }
        let published = self.write_idx | DIRTY;
        let previous = self.inner.state.swap(published, Ordering::AcqRel);
        self.write_idx = previous & INDEX_MASK;
    }
}

impl<T: Copy> TripleReader<T> {
    pub fn read(&mut self) -> T {
        let state = self.inner.state.load(Ordering::Acquire);
        if state & DIRTY != 0 {
            let previous = self.inner.state.swap(self.read_idx, Ordering::AcqRel);
            self.read_idx = previous & INDEX_MASK;
        }
        // SAFETY: `read_idx` always refers to a slot no writer can touch
        // until it is swapped out again.
        unsafe { *self.inner.buffers[self.read_idx as usize].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_write_then_read_roundtrip() {
        let (mut w, mut r) = ring_channel(16, 2);
        let data = [0.1f32, 0.2, 0.3, 0.4];
        assert_eq!(w.write(&data).unwrap(), 4);
        assert_eq!(w.fill_frames(), 2);
        let mut out = [0.0f32; 4];
        assert_eq!(r.read(&mut out).unwrap(), 4);
        assert_eq!(out, data);
    }

    #[test]
    fn sticky_error_blocks_both_sides() {
        let (mut w, mut r) = ring_channel(16, 1);
        w.set_error(Errno::EPIPE);
        assert_eq!(w.write(&[1.0]).unwrap_err(), Errno::EPIPE);
        assert_eq!(r.read(&mut [0.0]).unwrap_err(), Errno::EPIPE);
    }

    #[test]
    fn triple_buffer_reader_sees_latest_write() {
        let (mut w, mut r) = triple_buffer(0u32);
        assert_eq!(r.read(), 0);
        w.write(1);
        w.write(2);
        w.write(3);
        assert_eq!(r.read(), 3);
        assert_eq!(r.read(), 3);
    }
}
