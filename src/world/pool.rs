//! Fixed-capacity chunk pool.
//!
//! Every chunk the world will ever hold is allocated up front; residency is
//! a matter of handing out slot indices. Slot indices are the identity other
//! systems hold on to (neighbour links, job payloads), so a recycled slot is
//! detected through the chunk's state rather than a dangling pointer.

use crate::world::chunk::Chunk;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct ChunkPool {
    slots: Box<[Arc<Chunk>]>,
    free: Mutex<Vec<u32>>,
}

impl ChunkPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity < u32::MAX as usize);
        Self {
            slots: (0..capacity).map(|_| Arc::new(Chunk::new())).collect(),
            free: Mutex::new((0..capacity as u32).rev().collect()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Takes a slot, or None when the pool is momentarily exhausted (e.g.
    /// right after a long teleport, before evictions drain).
    pub fn alloc(&self) -> Option<u32> {
        self.free.lock().pop()
    }

    pub fn free(&self, slot: u32) {
        let mut free = self.free.lock();
        debug_assert!(!free.contains(&slot), "double free of chunk slot {slot}");
        free.push(slot);
    }

    pub fn get(&self, slot: u32) -> &Arc<Chunk> {
        &self.slots[slot as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::chunk::ChunkState;
    use glam::IVec2;

    #[test]
    fn slots_recycle_through_free_list() {
        let pool = ChunkPool::new(4);
        assert_eq!(pool.free_count(), 4);

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.free_count(), 2);

        pool.get(a).reset(IVec2::new(5, 6));
        assert_eq!(pool.get(a).chunk_state(), ChunkState::Initialized);

        pool.free(a);
        assert_eq!(pool.alloc(), Some(a));
    }

    #[test]
    fn exhaustion_returns_none() {
        let pool = ChunkPool::new(2);
        assert!(pool.alloc().is_some());
        assert!(pool.alloc().is_some());
        assert_eq!(pool.alloc(), None);
    }
}
