//! Sync-group registry (C9, §4.8).
//!
//! A fixed 256-slot table — groups are identified by a packed
//! `(counter, slot)` id so a stale `GroupId` from a removed group can't
//! alias a newly created one in the same slot.

use crate::slot::SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupId(u32);

impl GroupId {
    fn new(counter: u32, slot: u8) -> Self {
        GroupId((counter << 8) | slot as u32)
    }

    fn slot(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    fn counter(self) -> u32 {
        self.0 >> 8
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

struct Group {
    counter: u32,
    stream_bits: u8,
    members: Vec<SlotId>,
}

pub struct SyncGroupRegistry {
    slots: [Option<Group>; 256],
    counter: u32,
}

impl SyncGroupRegistry {
    pub fn new() -> Self {
        Self { slots: std::array::from_fn(|_| None), counter: 0 }
    }

    pub fn create(&mut self) -> Option<GroupId> {
        let index = self.slots.iter().position(|g| g.is_none())?;
        self.counter = self.counter.wrapping_add(1);
        self.slots[index] = Some(Group { counter: self.counter, stream_bits: 0, members: Vec::new() });
        Some(GroupId::new(self.counter, index as u8))
    }

    pub fn remove(&mut self, id: GroupId) {
        if let Some(slot) = self.slots.get_mut(id.slot() as usize) {
            if slot.as_ref().is_some_and(|g| g.counter == id.counter()) {
                *slot = None;
            }
        }
    }

    /// Slot lookup that also rejects a stale id whose counter doesn't
    /// match the slot's current occupant (mirrors `SlotMap::get_mut`).
    fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.slots.get_mut(id.slot() as usize)?.as_mut().filter(|g| g.counter == id.counter())
    }

    fn group(&self, id: GroupId) -> Option<&Group> {
        self.slots.get(id.slot() as usize)?.as_ref().filter(|g| g.counter == id.counter())
    }

    pub fn add_member(&mut self, id: GroupId, client: SlotId) -> bool {
        match self.group_mut(id) {
            Some(group) => {
                group.members.push(client);
                true
            }
            None => false,
        }
    }

    pub fn remove_member(&mut self, id: GroupId, client: SlotId) {
        if let Some(group) = self.group_mut(id) {
            group.members.retain(|m| *m != client);
        }
    }

    pub fn members(&self, id: GroupId) -> &[SlotId] {
        self.group(id).map(|g| g.members.as_slice()).unwrap_or(&[])
    }

    /// §4.8 `start`: arms `streams` on the group and returns the
    /// `(member, streams, tstamp_ns)` tuples the caller should deliver to
    /// each member's sync-start mailbox.
    pub fn start(&mut self, id: GroupId, streams: u8, tstamp_ns: u64) -> Vec<(SlotId, u8, u64)> {
        match self.group_mut(id) {
            Some(group) => {
                group.stream_bits |= streams;
                group.members.iter().map(|m| (*m, streams, tstamp_ns)).collect()
            }
            None => Vec::new(),
        }
    }
}

impl Default for SyncGroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_add_and_start_round_trip() {
        let mut reg = SyncGroupRegistry::new();
        let id = reg.create().unwrap();
        let client = SlotId { index: 0, generation: 0 };
        assert!(reg.add_member(id, client));
        let fired = reg.start(id, 0b01, 1000);
        assert_eq!(fired, vec![(client, 0b01, 1000)]);
    }

    #[test]
    fn removed_group_slot_is_reusable_with_new_identity() {
        let mut reg = SyncGroupRegistry::new();
        let id1 = reg.create().unwrap();
        reg.remove(id1);
        let id2 = reg.create().unwrap();
        assert_eq!(id1.slot(), id2.slot());
        assert_ne!(id1.raw(), id2.raw());
    }

    #[test]
    fn stale_id_does_not_alias_reused_slot() {
        let mut reg = SyncGroupRegistry::new();
        let id1 = reg.create().unwrap();
        reg.remove(id1);
        let id2 = reg.create().unwrap();
        let client = SlotId { index: 0, generation: 0 };

        assert!(!reg.add_member(id1, client));
        assert!(reg.members(id1).is_empty());
        assert!(reg.start(id1, 0b01, 1).is_empty());

        assert!(reg.add_member(id2, client));
        assert_eq!(reg.members(id2), &[client]);

        // Removing via the stale id must not touch the live group.
        reg.remove(id1);
        assert_eq!(reg.members(id2), &[client]);
    }
}
