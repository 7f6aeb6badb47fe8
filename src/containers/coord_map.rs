//! Open-addressed map from chunk coordinates to chunk pool slots.
//!
//! Linear probing with tombstones; capacity is fixed at the chunk pool's
//! size, so the table can never grow past the pool it indexes.

use glam::IVec2;

pub const INVALID_SLOT: u32 = u32::MAX;

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Empty,
    Occupied,
    Tombstone,
}

#[derive(Clone, Copy)]
struct Entry {
    coords: IVec2,
    slot: u32,
    state: EntryState,
}

pub struct CoordMap {
    entries: Box<[Entry]>,
    len: usize,
}

fn hash_coords(coords: IVec2) -> u64 {
    let x = (coords.x as i64).wrapping_mul(92_837_111);
    let z = (coords.y as i64).wrapping_mul(689_287_499);
    (x ^ z).unsigned_abs()
}

impl CoordMap {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        let entries = vec![
            Entry {
                coords: IVec2::ZERO,
                slot: INVALID_SLOT,
                state: EntryState::Empty,
            };
            capacity
        ]
        .into_boxed_slice();
        Self { entries, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn start_index(&self, coords: IVec2) -> usize {
        (hash_coords(coords) % self.entries.len() as u64) as usize
    }

    pub fn insert(&mut self, coords: IVec2, slot: u32) {
        assert!(self.len < self.entries.len(), "coord map full");
        let mut index = self.start_index(coords);
        for _ in 0..self.entries.len() {
            let entry = &mut self.entries[index];
            match entry.state {
                EntryState::Empty | EntryState::Tombstone => {
                    *entry = Entry {
                        coords,
                        slot,
                        state: EntryState::Occupied,
                    };
                    self.len += 1;
                    return;
                }
                EntryState::Occupied if entry.coords == coords => {
                    entry.slot = slot;
                    return;
                }
                EntryState::Occupied => {}
            }
            index = (index + 1) % self.entries.len();
        }
        unreachable!("probed every slot of a non-full coord map");
    }

    pub fn get(&self, coords: IVec2) -> Option<u32> {
        let mut index = self.start_index(coords);
        for _ in 0..self.entries.len() {
            let entry = &self.entries[index];
            match entry.state {
                EntryState::Empty => return None,
                EntryState::Occupied if entry.coords == coords => return Some(entry.slot),
                _ => {}
            }
            index = (index + 1) % self.entries.len();
        }
        None
    }

    pub fn remove(&mut self, coords: IVec2) -> Option<u32> {
        let mut index = self.start_index(coords);
        for _ in 0..self.entries.len() {
            let entry = &mut self.entries[index];
            match entry.state {
                EntryState::Empty => return None,
                EntryState::Occupied if entry.coords == coords => {
                    entry.state = EntryState::Tombstone;
                    self.len -= 1;
                    return Some(entry.slot);
                }
                _ => {}
            }
            index = (index + 1) % self.entries.len();
        }
        None
    }

    /// Iterates occupied entries.
    pub fn iter(&self) -> impl Iterator<Item = (IVec2, u32)> + '_ {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Occupied)
            .map(|e| (e.coords, e.slot))
    }
}
