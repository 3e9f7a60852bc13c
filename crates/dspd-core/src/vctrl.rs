//! Virtual control list (C11, §4.10).
//!
//! A flat, index-dense table of software volume/mute-style controls that
//! clients and devices can register and subscribe to changes on, built on
//! an unbounded crossbeam channel the way the teacher fans out UI events.

use crossbeam_channel::{Receiver, Sender};

use crate::slot::SlotId;

pub const VCTRL_MAX: u32 = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOwner {
    Client(SlotId),
    Device(SlotId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Playback,
    Capture,
    PlaybackAndCapture,
}

#[derive(Debug, Clone)]
pub struct VirtualControl {
    pub owner: ControlOwner,
    pub kind: ControlKind,
    pub name: String,
    pub playback_value: Option<u32>,
    pub capture_value: Option<u32>,
    pub tstamp_ns: u64,
    pub update_count: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum ControlEvent {
    Added(usize),
    Removed(usize),
    Changed(usize),
}

pub struct VirtualControlList {
    controls: Vec<VirtualControl>,
    notify_tx: Sender<ControlEvent>,
    notify_rx: Receiver<ControlEvent>,
}

impl VirtualControlList {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
        Self { controls: Vec::new(), notify_tx, notify_rx }
    }

    pub fn subscribe(&self) -> Receiver<ControlEvent> {
        self.notify_rx.clone()
    }

    pub fn register(&mut self, owner: ControlOwner, kind: ControlKind, name: impl Into<String>) -> usize {
        let index = self.controls.len();
        self.controls.push(VirtualControl {
            owner,
            kind,
            name: name.into(),
            playback_value: None,
            capture_value: None,
            tstamp_ns: 0,
            update_count: 0,
        });
        let _ = self.notify_tx.send(ControlEvent::Added(index));
        index
    }

    pub fn unregister(&mut self, index: usize) -> Option<VirtualControl> {
        if index >= self.controls.len() {
            return None;
        }
        let removed = self.controls.remove(index);
        let _ = self.notify_tx.send(ControlEvent::Removed(index));
        Some(removed)
    }

    pub fn set_value(
        &mut self,
        index: usize,
        playback: bool,
        capture: bool,
        value: u32,
        tstamp_ns: u64,
    ) -> Option<()> {
        let value = value.min(VCTRL_MAX);
        let ctrl = self.controls.get_mut(index)?;
        if playback {
            ctrl.playback_value = Some(value);
        }
        if capture {
            ctrl.capture_value = Some(value);
        }
        ctrl.tstamp_ns = tstamp_ns;
        ctrl.update_count += 1;
        let _ = self.notify_tx.send(ControlEvent::Changed(index));
        Some(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &VirtualControl> {
        self.controls.iter()
    }

    pub fn get(&self, index: usize) -> Option<&VirtualControl> {
        self.controls.get(index)
    }

    pub fn percent_to_value(pct: f32) -> u32 {
        ((pct.clamp(0.0, 100.0) / 100.0) * VCTRL_MAX as f32) as u32
    }
}

impl Default for VirtualControlList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_set_and_unregister_round_trip() {
        let mut list = VirtualControlList::new();
        let rx = list.subscribe();
        let idx = list.register(ControlOwner::Device(SlotId { index: 0, generation: 0 }), ControlKind::Playback, "master");
        list.set_value(idx, true, false, VirtualControlList::percent_to_value(50.0), 10);
        assert_eq!(list.get(idx).unwrap().playback_value, Some(VCTRL_MAX / 2));
        list.unregister(idx);
        assert!(list.get(idx).is_none());

        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn percent_to_value_clamps() {
        assert_eq!(VirtualControlList::percent_to_value(150.0), VCTRL_MAX);
        assert_eq!(VirtualControlList::percent_to_value(-5.0), 0);
    }
}
