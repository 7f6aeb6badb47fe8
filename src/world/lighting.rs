//! Sky and emissive light computation.
//!
//! Stage 1 (`propagate`) seeds a single chunk: a vertical ray per column
//! gives full sky light above the first opaque block, and emissive blocks
//! seed the flood-fill queue. Stage 2 (`calculate` + `drain`) runs the
//! cross-chunk BFS: the frontier of fully-lit cells bordering darker
//! transparent cells is enqueued, and every queue entry spreads to its six
//! neighbours by the "light minus two" rule. All of this runs on the
//! dedicated light thread, which is the only writer of light data.

use crate::containers::SpscRing;
use crate::world::chunk::{
    BlockNeighbour, ChunkState, TessState, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH, SKIRTS,
};
use crate::world::core::RegionBounds;
use crate::world::pool::ChunkPool;
use crate::world::view::NeighbourView;
use glam::IVec3;
use std::sync::atomic::Ordering;

pub const LIGHT_QUEUE_CAP: usize = 256 * 1024;

pub const MAX_LIGHT: u8 = 15;
pub const MIN_LIGHT: u8 = 1;

/// One cell awaiting flood-fill processing.
#[derive(Debug, Clone, Copy)]
pub struct LightNode {
    pub slot: u32,
    pub coords: IVec3,
}

/// A remesh request for one sub-chunk, emitted when flood fill updates a
/// cell of an already-tessellated chunk.
pub type RemeshRequest = (u32, u32);

pub struct LightWorker {
    bfs: SpscRing<LightNode>,
}

impl LightWorker {
    pub fn new() -> Self {
        Self {
            bfs: SpscRing::new(LIGHT_QUEUE_CAP),
        }
    }

    /// Stage 1: per-column sky seeding and emissive seeding for one chunk.
    /// Touches only this chunk's light map and skirts.
    pub fn propagate(&self, pool: &ChunkPool, slot: u32) {
        let chunk = pool.get(slot);
        let volume = chunk.blocks.read();
        let light = &chunk.light;

        for z in 0..CHUNK_DEPTH {
            for x in 0..CHUNK_WIDTH {
                let mut sky_open = true;
                for y in (0..CHUNK_HEIGHT).rev() {
                    let coords = IVec3::new(x, y, z);
                    let info = volume.block(coords).info();

                    if info.is_light_source() {
                        light.set_source(coords, MAX_LIGHT);
                        self.bfs.push(LightNode { slot, coords });
                    } else {
                        light.set_source(coords, MIN_LIGHT);
                    }

                    if !info.is_transparent() {
                        sky_open = false;
                    }
                    light.set_sky(coords, if sky_open { MAX_LIGHT } else { MIN_LIGHT });
                }
            }
        }

        // The skirts get the same vertical-ray treatment so edge faces have
        // plausible light before the neighbour chunk is resident.
        for skirt in SKIRTS {
            for i in 0..CHUNK_WIDTH {
                let mut sky_open = true;
                for y in (0..CHUNK_HEIGHT).rev() {
                    let info = volume.skirt_block(skirt, y, i).info();
                    if !info.is_transparent() {
                        sky_open = false;
                    }
                    let sky = if sky_open { MAX_LIGHT } else { MIN_LIGHT };
                    let source = if info.is_light_source() {
                        MAX_LIGHT
                    } else {
                        MIN_LIGHT
                    };
                    light.set_skirt(skirt, y, i, sky, source);
                }
            }
        }
    }

    /// Stage 2 seeding: enqueues the sky-light frontier, the fully-lit
    /// transparent cells with a darker transparent horizontal neighbour.
    /// Scans rows from the top and stops at the first row with no sky light.
    pub fn calculate(&self, pool: &ChunkPool, slot: u32) {
        let view = NeighbourView::gather(pool, slot);
        let center = view.center();

        for y in (0..CHUNK_HEIGHT).rev() {
            let mut any_sky = false;
            for z in 0..CHUNK_DEPTH {
                for x in 0..CHUNK_WIDTH {
                    let coords = IVec3::new(x, y, z);
                    if !center.volume.block(coords).info().is_transparent() {
                        continue;
                    }
                    if center.chunk.light.sky(coords) != MAX_LIGHT {
                        continue;
                    }
                    any_sky = true;

                    for dir in [
                        BlockNeighbour::Left,
                        BlockNeighbour::Right,
                        BlockNeighbour::Front,
                        BlockNeighbour::Back,
                    ] {
                        let Some((n_slot, n_coords)) = view.step(slot, coords, dir) else {
                            continue;
                        };
                        let Some(block) = view.block(n_slot, n_coords) else {
                            continue;
                        };
                        let Some((n_sky, _)) = view.light(n_slot, n_coords) else {
                            continue;
                        };
                        if block.info().is_transparent() && n_sky != MAX_LIGHT {
                            self.bfs.push(LightNode { slot, coords });
                            break;
                        }
                    }
                }
            }
            if !any_sky {
                break;
            }
        }

        self.import_border_light(&view, slot);
    }

    /// Re-seeds the flood fill with neighbour border cells that are brighter
    /// than this chunk's edge. Chunks light in no particular order, so
    /// whichever side finishes last pulls the other's light across.
    fn import_border_light(&self, view: &NeighbourView<'_>, slot: u32) {
        let center = view.center();
        for dir in [
            BlockNeighbour::Left,
            BlockNeighbour::Right,
            BlockNeighbour::Front,
            BlockNeighbour::Back,
        ] {
            for i in 0..CHUNK_WIDTH {
                for y in 0..CHUNK_HEIGHT {
                    let coords = match dir {
                        BlockNeighbour::Left => IVec3::new(0, y, i),
                        BlockNeighbour::Right => IVec3::new(CHUNK_WIDTH - 1, y, i),
                        BlockNeighbour::Front => IVec3::new(i, y, 0),
                        _ => IVec3::new(i, y, CHUNK_DEPTH - 1),
                    };
                    if !center.volume.block(coords).info().is_transparent() {
                        continue;
                    }
                    let Some((n_slot, n_coords)) = view.step(slot, coords, dir) else {
                        continue;
                    };
                    let Some((n_sky, n_source)) = view.light(n_slot, n_coords) else {
                        continue;
                    };
                    let sky = center.chunk.light.sky(coords);
                    let source = center.chunk.light.source(coords);
                    if i32::from(n_sky) >= i32::from(sky) + 2
                        || i32::from(n_source) >= i32::from(source) + 2
                    {
                        self.bfs.push(LightNode {
                            slot: n_slot,
                            coords: n_coords,
                        });
                    }
                }
            }
        }
    }

    /// Stage 2: spreads queued light until the queue is empty. Cells of
    /// chunks outside the active region are left alone. Updates to a chunk
    /// whose sub-chunk is already tessellated emit a remesh request.
    pub fn drain(
        &self,
        pool: &ChunkPool,
        region: RegionBounds,
        remesh: &SpscRing<RemeshRequest>,
    ) {
        // The wavefront mostly stays inside one chunk, so the neighbour
        // view is reused until the queue hands over a different chunk.
        let mut cached: Option<(u32, NeighbourView<'_>)> = None;
        while let Some(node) = self.bfs.pop() {
            let chunk = pool.get(node.slot);
            if chunk.chunk_state() == ChunkState::Freed {
                continue;
            }
            let sky = chunk.light.sky(node.coords);
            let source = chunk.light.source(node.coords);

            if !matches!(&cached, Some((slot, _)) if *slot == node.slot) {
                cached = Some((node.slot, NeighbourView::gather(pool, node.slot)));
            }
            let view = &cached.as_ref().unwrap().1;
            for dir in crate::world::chunk::BLOCK_NEIGHBOURS {
                let Some((n_slot, n_coords)) = view.step(node.slot, node.coords, dir) else {
                    continue;
                };
                let Some(n_chunk) = view.chunk(n_slot) else {
                    continue;
                };
                if !region.contains(n_chunk.coords()) {
                    continue;
                }
                // A chunk that has not run stage 1 yet would overwrite
                // anything written here; its own calculate pass pulls the
                // light across instead.
                if n_chunk.chunk_state() < ChunkState::LightPropagated {
                    continue;
                }
                let Some(block) = view.block(n_slot, n_coords) else {
                    continue;
                };
                if !block.info().is_transparent() {
                    continue;
                }

                let mut updated = false;
                if i32::from(n_chunk.light.sky(n_coords)) <= i32::from(sky) - 2 {
                    n_chunk.light.set_sky(n_coords, sky - 1);
                    updated = true;
                }
                if i32::from(n_chunk.light.source(n_coords)) <= i32::from(source) - 2 {
                    n_chunk.light.set_source(n_coords, source - 1);
                    updated = true;
                }
                if updated {
                    self.bfs.push(LightNode {
                        slot: n_slot,
                        coords: n_coords,
                    });
                    invalidate_sub_chunk(n_chunk, n_slot, n_coords.y, remesh);
                }
            }
        }
    }

    pub fn queue_is_empty(&self) -> bool {
        self.bfs.is_empty()
    }
}

impl Default for LightWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// Flags a tessellated sub-chunk stale after a late light update.
fn invalidate_sub_chunk(
    chunk: &crate::world::chunk::Chunk,
    slot: u32,
    block_y: i32,
    remesh: &SpscRing<RemeshRequest>,
) {
    let sub_index = crate::world::chunk::sub_chunk_index(block_y);
    let sub = &chunk.sub_chunks[sub_index];
    if sub
        .state
        .compare_exchange(
            TessState::Done as u8,
            TessState::None as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        )
        .is_ok()
        && !remesh.is_full()
    {
        remesh.push((slot, sub_index as u32));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block::{Block, BlockId};
    use crate::world::chunk::{ChunkNeighbour, SKIRTS};
    use glam::IVec2;

    /// Two linked air chunks at (0,0) and (1,0), both NeighboursLoaded.
    fn linked_pair() -> (ChunkPool, u32, u32) {
        let pool = ChunkPool::new(4);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.get(a).reset(IVec2::new(0, 0));
        pool.get(b).reset(IVec2::new(1, 0));
        pool.get(a).neighbours[ChunkNeighbour::Right as usize]
            .store(b, Ordering::Release);
        pool.get(b).neighbours[ChunkNeighbour::Left as usize]
            .store(a, Ordering::Release);
        pool.get(a).set_chunk_state(ChunkState::NeighboursLoaded);
        pool.get(b).set_chunk_state(ChunkState::NeighboursLoaded);
        (pool, a, b)
    }

    fn region() -> RegionBounds {
        RegionBounds::around(IVec2::ZERO, 4)
    }

    fn remesh_ring() -> SpscRing<RemeshRequest> {
        SpscRing::new(1024)
    }

    #[test]
    fn sky_column_splits_at_first_opaque_block() {
        let (pool, a, _) = linked_pair();
        let chunk = pool.get(a);
        chunk
            .blocks
            .write()
            .set_block(IVec3::new(4, 200, 4), Block::new(BlockId::Stone));

        let worker = LightWorker::new();
        worker.propagate(&pool, a);

        assert_eq!(chunk.light.sky(IVec3::new(4, 201, 4)), MAX_LIGHT);
        assert_eq!(chunk.light.sky(IVec3::new(4, 200, 4)), MIN_LIGHT);
        assert_eq!(chunk.light.sky(IVec3::new(4, 199, 4)), MIN_LIGHT);
        assert_eq!(chunk.light.sky(IVec3::new(4, 0, 4)), MIN_LIGHT);
        // Open columns are fully lit.
        assert_eq!(chunk.light.sky(IVec3::new(5, 0, 4)), MAX_LIGHT);
    }

    #[test]
    fn skirt_light_gets_the_same_vertical_ray() {
        let (pool, a, _) = linked_pair();
        let chunk = pool.get(a);
        for skirt in SKIRTS {
            chunk
                .blocks
                .write()
                .set_skirt_block(skirt, 100, 3, Block::new(BlockId::Stone));
        }

        let worker = LightWorker::new();
        worker.propagate(&pool, a);

        for skirt in SKIRTS {
            assert_eq!(chunk.light.skirt_sky(skirt, 101, 3), MAX_LIGHT);
            assert_eq!(chunk.light.skirt_sky(skirt, 99, 3), MIN_LIGHT);
        }
    }

    #[test]
    fn emissive_light_crosses_the_chunk_border() {
        let (pool, a, b) = linked_pair();
        pool.get(a)
            .blocks
            .write()
            .set_block(IVec3::new(15, 252, 8), Block::new(BlockId::Glowstone));

        let worker = LightWorker::new();
        let remesh = remesh_ring();

        worker.propagate(&pool, a);
        pool.get(a).set_chunk_state(ChunkState::LightPropagated);
        worker.propagate(&pool, b);
        pool.get(b).set_chunk_state(ChunkState::LightPropagated);

        worker.calculate(&pool, a);
        worker.drain(&pool, region(), &remesh);
        pool.get(a).set_chunk_state(ChunkState::LightCalculated);

        let a_light = &pool.get(a).light;
        let b_light = &pool.get(b).light;
        assert_eq!(a_light.source(IVec3::new(15, 252, 8)), 15);
        assert_eq!(a_light.source(IVec3::new(14, 252, 8)), 14);
        assert_eq!(b_light.source(IVec3::new(0, 252, 8)), 14);
        assert_eq!(b_light.source(IVec3::new(1, 252, 8)), 13);
    }

    #[test]
    fn late_neighbour_pulls_light_across_in_its_own_pass() {
        // The glowstone chunk finishes lighting before its neighbour has
        // even propagated; the neighbour's calculate pass must import it.
        let (pool, a, b) = linked_pair();
        pool.get(a)
            .blocks
            .write()
            .set_block(IVec3::new(15, 252, 8), Block::new(BlockId::Glowstone));

        let worker = LightWorker::new();
        let remesh = remesh_ring();

        worker.propagate(&pool, a);
        pool.get(a).set_chunk_state(ChunkState::LightPropagated);
        worker.calculate(&pool, a);
        worker.drain(&pool, region(), &remesh);
        pool.get(a).set_chunk_state(ChunkState::LightCalculated);

        // Neighbour had not propagated, so nothing leaked into it.
        assert_eq!(pool.get(b).light.source(IVec3::new(0, 252, 8)), 0);

        worker.propagate(&pool, b);
        pool.get(b).set_chunk_state(ChunkState::LightPropagated);
        worker.calculate(&pool, b);
        worker.drain(&pool, region(), &remesh);

        assert_eq!(pool.get(b).light.source(IVec3::new(0, 252, 8)), 14);
        assert_eq!(pool.get(b).light.source(IVec3::new(1, 252, 8)), 13);
    }

    #[test]
    fn flood_fill_never_lowers_light() {
        let (pool, a, b) = linked_pair();
        pool.get(a)
            .blocks
            .write()
            .set_block(IVec3::new(8, 128, 8), Block::new(BlockId::Glowstone));

        let worker = LightWorker::new();
        let remesh = remesh_ring();
        for slot in [a, b] {
            worker.propagate(&pool, slot);
            pool.get(slot).set_chunk_state(ChunkState::LightPropagated);
        }
        for slot in [a, b] {
            worker.calculate(&pool, slot);
            worker.drain(&pool, region(), &remesh);
            pool.get(slot).set_chunk_state(ChunkState::LightCalculated);
        }

        let pool_ref = &pool;
        let snapshot: Vec<(IVec3, u8, u8)> = (120..136)
            .flat_map(|y| {
                (0..CHUNK_WIDTH).map(move |x| {
                    let coords = IVec3::new(x, y, 8);
                    let light = &pool_ref.get(a).light;
                    (coords, light.sky(coords), light.source(coords))
                })
            })
            .collect();

        // A second full pass must only ever keep or raise levels.
        for slot in [a, b] {
            worker.calculate(&pool, slot);
            worker.drain(&pool, region(), &remesh);
        }
        for (coords, sky, source) in snapshot {
            let light = &pool.get(a).light;
            assert!(light.sky(coords) >= sky);
            assert!(light.source(coords) >= source);
        }
    }

    #[test]
    fn flood_fill_invalidates_tessellated_sub_chunks() {
        let (pool, a, b) = linked_pair();
        pool.get(a)
            .blocks
            .write()
            .set_block(IVec3::new(15, 252, 8), Block::new(BlockId::Glowstone));

        // Pretend the neighbour was already meshed.
        let sub_index = crate::world::chunk::sub_chunk_index(252);
        pool.get(b).sub_chunks[sub_index]
            .state
            .store(TessState::Done as u8, Ordering::Release);

        let worker = LightWorker::new();
        let remesh = remesh_ring();
        for slot in [a, b] {
            worker.propagate(&pool, slot);
            pool.get(slot).set_chunk_state(ChunkState::LightPropagated);
        }
        worker.calculate(&pool, a);
        worker.drain(&pool, region(), &remesh);

        let request = remesh.pop().expect("neighbour sub-chunk invalidated");
        assert_eq!(request, (b, sub_index as u32));
        assert_eq!(
            pool.get(b).sub_chunks[sub_index].tess_state(),
            TessState::None
        );
    }
}
