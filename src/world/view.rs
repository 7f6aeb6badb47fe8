//! Read view over a chunk and its resident Moore neighbours.
//!
//! Lighting and meshing both walk cells across chunk borders. The view
//! resolves a chunk's neighbour links once, takes read locks on every
//! resident neighbour's block volume, and then answers cross-chunk cell
//! queries without further locking. Light reads go straight to the atomic
//! light maps and need no lock at all.

use crate::world::block::Block;
use crate::world::chunk::{cell_step, BlockNeighbour, BlockVolume, CellStep, Chunk, ChunkState};
use crate::world::pool::ChunkPool;
use glam::IVec3;
use parking_lot::RwLockReadGuard;

pub struct ViewEntry<'a> {
    pub slot: u32,
    pub chunk: &'a Chunk,
    pub volume: RwLockReadGuard<'a, BlockVolume>,
}

pub struct NeighbourView<'a> {
    entries: Vec<ViewEntry<'a>>,
}

impl<'a> NeighbourView<'a> {
    /// Locks `center` and every resident Moore neighbour for reading. The
    /// center entry is always index 0.
    pub fn gather(pool: &'a ChunkPool, center: u32) -> Self {
        let center_chunk = pool.get(center).as_ref();
        let mut entries = Vec::with_capacity(9);
        entries.push(ViewEntry {
            slot: center,
            chunk: center_chunk,
            volume: center_chunk.blocks.read(),
        });
        for neighbour in &center_chunk.neighbours {
            let slot = neighbour.load(std::sync::atomic::Ordering::Acquire);
            if slot == crate::world::chunk::NO_CHUNK {
                continue;
            }
            let chunk = pool.get(slot).as_ref();
            // Chunks still generating are owned by their load job; reading
            // them would also let two overlapping views and two pending
            // writers wait on each other.
            let state = chunk.chunk_state();
            if state < ChunkState::Loaded || state == ChunkState::Freed {
                continue;
            }
            entries.push(ViewEntry {
                slot,
                chunk,
                volume: chunk.blocks.read(),
            });
        }
        Self { entries }
    }

    pub fn center(&self) -> &ViewEntry<'a> {
        &self.entries[0]
    }

    fn entry(&self, slot: u32) -> Option<&ViewEntry<'a>> {
        self.entries.iter().find(|e| e.slot == slot)
    }

    /// Steps one cell from `(slot, coords)` in `dir`. None above/below the
    /// world or when the destination chunk is not in the view.
    pub fn step(&self, slot: u32, coords: IVec3, dir: BlockNeighbour) -> Option<(u32, IVec3)> {
        match cell_step(coords, dir) {
            CellStep::Same(next) => Some((slot, next)),
            CellStep::OutOfWorld => None,
            CellStep::Cross(neighbour, next) => {
                let entry = self.entry(slot)?;
                let next_slot = entry.chunk.neighbour_slot(neighbour)?;
                self.entry(next_slot)?;
                Some((next_slot, next))
            }
        }
    }

    pub fn block(&self, slot: u32, coords: IVec3) -> Option<Block> {
        Some(self.entry(slot)?.volume.block(coords))
    }

    /// `(sky, source)` light of a cell.
    pub fn light(&self, slot: u32, coords: IVec3) -> Option<(u8, u8)> {
        let entry = self.entry(slot)?;
        Some((entry.chunk.light.sky(coords), entry.chunk.light.source(coords)))
    }

    pub fn chunk(&self, slot: u32) -> Option<&'a Chunk> {
        Some(self.entry(slot)?.chunk)
    }
}
