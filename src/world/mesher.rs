//! Sub-chunk tessellation.
//!
//! For every non-air block of a 16x8x16 slab the mesher consults the six
//! face neighbours (skirts at chunk edges), emits the visible faces, and
//! packs per-vertex light and ambient occlusion from the up-to-four cells
//! meeting at each face corner. Vertices go straight into the next
//! generation's mapped buckets; the generation flip is the last store, so
//! the renderer only ever observes complete meshes.

use crate::render::frustum::Aabb;
use crate::render::slab::{BucketWriter, GpuSlab};
use crate::render::vertex::{pack_word0, pack_word1, PackedVertex};
use crate::world::block::{Block, BlockFace, BlockInfo, BLOCK_FACES};
use crate::world::chunk::{
    sub_chunk_index, BlockNeighbour, BucketRef, Chunk, ChunkState, Skirt, TessState, CHUNK_DEPTH,
    CHUNK_WIDTH, SUB_CHUNK_HEIGHT,
};
use crate::world::pool::ChunkPool;
use crate::world::view::NeighbourView;
use glam::{IVec3, Vec3};
use std::sync::atomic::Ordering;

/// Corner numbering of a unit cube, top ring 0..=3, bottom ring 4..=7.
/// Each entry is the sign of the corner along (x, y, z).
const CORNER_SIGNS: [IVec3; 8] = [
    IVec3::new(1, 1, 1),
    IVec3::new(-1, 1, 1),
    IVec3::new(-1, 1, -1),
    IVec3::new(1, 1, -1),
    IVec3::new(1, -1, 1),
    IVec3::new(-1, -1, 1),
    IVec3::new(-1, -1, -1),
    IVec3::new(1, -1, -1),
];

/// Cube corners of each face in `FaceCorner` order
/// (BottomRight, BottomLeft, TopLeft, TopRight).
const FACE_CORNERS: [[u32; 4]; 6] = [
    [0, 1, 2, 3], // Top
    [5, 4, 7, 6], // Bottom
    [5, 6, 2, 1], // Left
    [7, 4, 0, 3], // Right
    [6, 7, 3, 2], // Front
    [4, 5, 1, 0], // Back
];

fn face_dir(face: BlockFace) -> BlockNeighbour {
    match face {
        BlockFace::Top => BlockNeighbour::Up,
        BlockFace::Bottom => BlockNeighbour::Down,
        BlockFace::Left => BlockNeighbour::Left,
        BlockFace::Right => BlockNeighbour::Right,
        BlockFace::Front => BlockNeighbour::Front,
        BlockFace::Back => BlockNeighbour::Back,
    }
}

fn face_skirt(face: BlockFace) -> Option<Skirt> {
    match face {
        BlockFace::Left => Some(Skirt::Left),
        BlockFace::Right => Some(Skirt::Right),
        BlockFace::Front => Some(Skirt::Front),
        BlockFace::Back => Some(Skirt::Back),
        _ => None,
    }
}

fn face_texture(face: BlockFace, info: &BlockInfo) -> u16 {
    match face {
        BlockFace::Top => info.top_texture_id,
        BlockFace::Bottom => info.bottom_texture_id,
        _ => info.side_texture_id,
    }
}

/// The two in-plane step directions for a face vertex: across the face's
/// first tangent axis and its second, signed by the corner.
fn vertex_side_dirs(face: BlockFace, signs: IVec3) -> [BlockNeighbour; 2] {
    let x_dir = if signs.x > 0 {
        BlockNeighbour::Right
    } else {
        BlockNeighbour::Left
    };
    let y_dir = if signs.y > 0 {
        BlockNeighbour::Up
    } else {
        BlockNeighbour::Down
    };
    let z_dir = if signs.z > 0 {
        BlockNeighbour::Back
    } else {
        BlockNeighbour::Front
    };
    match face {
        BlockFace::Top | BlockFace::Bottom => [z_dir, x_dir],
        BlockFace::Left | BlockFace::Right => [z_dir, y_dir],
        BlockFace::Front | BlockFace::Back => [x_dir, y_dir],
    }
}

/// Incremental writer into up to two buckets of one transparency kind.
struct KindBuilder<'a> {
    slab: &'a GpuSlab,
    buckets: [Option<BucketRef>; 2],
    writer: Option<(usize, BucketWriter<'a>)>,
}

impl<'a> KindBuilder<'a> {
    fn new(slab: &'a GpuSlab) -> Self {
        Self {
            slab,
            buckets: [None, None],
            writer: None,
        }
    }

    fn push_face(&mut self, face: [PackedVertex; 4]) {
        loop {
            if self.writer.is_none() {
                let index = self
                    .buckets
                    .iter()
                    .position(Option::is_none)
                    .expect("sub-chunk exceeded two vertex buckets");
                let id = self.slab.alloc_bucket();
                self.buckets[index] = Some(BucketRef { id, face_count: 0 });
                // Safety: the id was just popped from the free list, so this
                // writer is its sole owner until finish() publishes it.
                self.writer = Some((index, unsafe { self.slab.bucket_writer(id) }));
            }
            let (index, writer) = self.writer.as_mut().unwrap();
            if writer.push_face(face) {
                return;
            }
            // Bucket full: seal it and continue into the next one.
            let faces = writer.face_count();
            self.buckets[*index].as_mut().unwrap().face_count = faces;
            self.writer = None;
        }
    }

    /// Seals the open bucket and drops empty ones back into the slab.
    fn finish(mut self) -> [Option<BucketRef>; 2] {
        if let Some((index, writer)) = self.writer.take() {
            self.buckets[index].as_mut().unwrap().face_count = writer.face_count();
        }
        for slot in &mut self.buckets {
            if let Some(bucket) = slot {
                if bucket.face_count == 0 {
                    self.slab.free_bucket(bucket.id);
                    *slot = None;
                }
            }
        }
        self.buckets
    }
}

/// Per-vertex light and occlusion result.
struct VertexShade {
    sky: u32,
    source: u32,
    ao: u32,
}

fn shade_vertex(
    view: &NeighbourView<'_>,
    slot: u32,
    coords: IVec3,
    dir: BlockNeighbour,
    face: BlockFace,
    corner_id: u32,
) -> VertexShade {
    let signs = CORNER_SIGNS[corner_id as usize];
    let [side_u_dir, side_v_dir] = vertex_side_dirs(face, signs);

    let outside = view.step(slot, coords, dir);
    let side_u = outside.and_then(|(s, c)| view.step(s, c, side_u_dir));
    let side_v = outside.and_then(|(s, c)| view.step(s, c, side_v_dir));
    let corner = side_u.and_then(|(s, c)| view.step(s, c, side_v_dir));

    let cell_block = |cell: Option<(u32, IVec3)>| cell.and_then(|(s, c)| view.block(s, c));
    let cell_light = |cell: Option<(u32, IVec3)>| cell.and_then(|(s, c)| view.light(s, c));

    let mut sky_sum = 0u32;
    let mut source_sum = 0u32;
    let mut count = 0u32;

    // The outside cell participates in the average; when its chunk is not
    // resident the chunk's own light skirt stands in, and the open sky
    // above the world counts as fully lit.
    let outside_sample = match (cell_block(outside), cell_light(outside)) {
        (Some(block), Some(light)) => Some((block, light)),
        _ if dir == BlockNeighbour::Up => Some((Block::AIR, (15, 1))),
        _ => skirt_sample(view, coords, face),
    };
    if let Some((block, (sky, source))) = outside_sample {
        if block.info().is_transparent() {
            sky_sum += u32::from(sky);
            source_sum += u32::from(source);
            count += 1;
        }
    }
    for cell in [side_u, side_v] {
        if let (Some(block), Some((sky, source))) = (cell_block(cell), cell_light(cell)) {
            if block.info().is_transparent() {
                sky_sum += u32::from(sky);
                source_sum += u32::from(source);
                count += 1;
            }
        }
    }

    let side_u_block = cell_block(side_u);
    let side_v_block = cell_block(side_v);
    let corner_block = cell_block(corner);

    let side_u_solid = side_u_block.is_some_and(|b| !b.info().is_transparent());
    let side_v_solid = side_v_block.is_some_and(|b| !b.info().is_transparent());
    let corner_solid = corner_block.is_some_and(|b| !b.info().is_transparent());

    if let Some(block) = corner_block {
        if block.info().is_transparent() && (!side_u_solid || !side_v_solid) {
            if let Some((sky, source)) = cell_light(corner) {
                sky_sum += u32::from(sky);
                source_sum += u32::from(source);
                count += 1;
            }
        }
    }

    let (sky, source) = if count > 0 {
        (sky_sum / count, source_sum / count)
    } else {
        (0, 0)
    };

    // A fully enclosed corner stays at occlusion 0; light sources never
    // occlude.
    let ao = if !side_u_solid || !side_v_solid {
        let occludes = |block: Option<Block>, solid: bool| {
            u32::from(solid && !block.unwrap().info().is_light_source())
        };
        3 - (occludes(side_u_block, side_u_solid)
            + occludes(side_v_block, side_v_solid)
            + occludes(corner_block, corner_solid))
    } else {
        0
    };

    VertexShade { sky, source, ao }
}

/// Light-skirt fallback for the face's outside cell when the neighbouring
/// chunk is not resident. Reads through the view's existing center guard.
fn skirt_sample(
    view: &NeighbourView<'_>,
    coords: IVec3,
    face: BlockFace,
) -> Option<(Block, (u8, u8))> {
    let skirt = face_skirt(face)?;
    let index = match skirt {
        Skirt::Left if coords.x == 0 => coords.z,
        Skirt::Right if coords.x == CHUNK_WIDTH - 1 => coords.z,
        Skirt::Front if coords.z == 0 => coords.x,
        Skirt::Back if coords.z == CHUNK_DEPTH - 1 => coords.x,
        _ => return None,
    };
    let center = view.center();
    let block = center.volume.skirt_block(skirt, coords.y, index);
    let light = (
        center.chunk.light.skirt_sky(skirt, coords.y, index),
        center.chunk.light.skirt_source(skirt, coords.y, index),
    );
    Some((block, light))
}

/// Whether `block`'s face against `neighbour` is visible.
fn face_visible(block: Block, neighbour: Block) -> bool {
    let info = block.info();
    let neighbour_info = neighbour.info();
    (info.is_solid() && neighbour_info.is_transparent())
        || (info.is_transparent() && neighbour.is_air())
}

/// Tessellates one sub-chunk into its next bucket generation and publishes
/// it. Returns the face count, or None when the chunk was not ready.
pub fn mesh_sub_chunk(
    pool: &ChunkPool,
    slab: &GpuSlab,
    slot: u32,
    sub_index: usize,
) -> Option<u32> {
    let chunk = pool.get(slot).as_ref();
    let state = chunk.chunk_state();
    let sub = &chunk.sub_chunks[sub_index];
    if state == ChunkState::Freed || state < ChunkState::LightCalculated {
        // Not ready; clear the pending flag so the scheduler can retry.
        sub.state.store(TessState::None as u8, Ordering::Release);
        finish_mesh_job(chunk);
        return None;
    }

    let view = NeighbourView::gather(pool, slot);
    let center = view.center();

    let mut opaque = KindBuilder::new(slab);
    let mut transparent = KindBuilder::new(slab);
    let mut aabb = Aabb::default();

    let y_start = sub_index as i32 * SUB_CHUNK_HEIGHT;
    for y in y_start..y_start + SUB_CHUNK_HEIGHT {
        for z in 0..CHUNK_DEPTH {
            for x in 0..CHUNK_WIDTH {
                let coords = IVec3::new(x, y, z);
                let block = center.volume.block(coords);
                if block.is_air() {
                    continue;
                }
                let info = block.info();
                let flags = info.flags.bits();
                let mut emitted = false;

                for face in BLOCK_FACES {
                    let dir = face_dir(face);
                    let neighbour = center.volume.neighbour_block(coords, dir);
                    if !face_visible(block, neighbour) {
                        continue;
                    }

                    let corners = FACE_CORNERS[face as usize];
                    let mut verts = [PackedVertex::default(); 4];
                    for (corner_index, &corner_id) in corners.iter().enumerate() {
                        let shade = shade_vertex(&view, slot, coords, dir, face, corner_id);
                        let uv_id =
                            u32::from(face_texture(face, info)) * 8 + corner_index as u32 * 2;
                        verts[corner_index] = PackedVertex {
                            data0: pack_word0(
                                coords,
                                corner_id,
                                face as u32,
                                corner_index as u32,
                                flags,
                            ),
                            data1: pack_word1(uv_id, shade.sky, shade.source, shade.ao),
                        };
                    }

                    if info.is_transparent() {
                        transparent.push_face(verts);
                    } else {
                        opaque.push_face(verts);
                    }
                    emitted = true;
                }

                if emitted {
                    let center_pos = chunk.block_position(coords);
                    aabb.union_box(Aabb::new(
                        center_pos - Vec3::splat(0.5),
                        center_pos + Vec3::splat(0.5),
                    ));
                }
            }
        }
    }

    let opaque_refs = opaque.finish();
    let transparent_refs = transparent.finish();
    let face_count: u32 = opaque_refs
        .iter()
        .chain(&transparent_refs)
        .flatten()
        .map(|b| b.face_count)
        .sum();

    if face_count > 0 && sub.instance_slot.load(Ordering::Acquire) < 0 {
        let instance = slab.alloc_instance();
        // Safety: freshly allocated, owned by this sub-chunk from here on.
        unsafe { slab.write_instance(instance, chunk.coords()) };
        sub.instance_slot.store(instance as i32, Ordering::Release);
    }

    let next = sub.next_gen();
    {
        let mut gen = sub.gens[next].write();
        gen.opaque = opaque_refs;
        gen.transparent = transparent_refs;
        gen.aabb = aabb;
    }
    slab.note_vertex_bytes(i64::from(face_count) * 4 * 8);

    // Publish, then retire the previous generation's buckets.
    sub.bucket_index.store(next as u32, Ordering::Release);
    let mut freed_faces = 0u32;
    {
        let mut prev = sub.gens[1 - next].write();
        for bucket in prev.take_buckets() {
            freed_faces += bucket.face_count;
            slab.free_bucket(bucket.id);
        }
    }
    slab.note_vertex_bytes(-i64::from(freed_faces) * 4 * 8);

    sub.state.store(TessState::Done as u8, Ordering::Release);
    finish_mesh_job(chunk);
    Some(face_count)
}

/// Decrements the chunk's outstanding mesh-job counter and marks the whole
/// chunk tessellated when it reaches zero.
fn finish_mesh_job(chunk: &Chunk) {
    let previous = chunk
        .pending_mesh_jobs
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
    if previous == Ok(1) {
        chunk
            .tessellation
            .store(TessState::Done as u8, Ordering::Release);
    }
}

/// Schedules bookkeeping for one sub-chunk mesh: marks it pending and bumps
/// the chunk counter. Returns false when the sub-chunk is already pending.
pub fn mark_mesh_pending(chunk: &Chunk, sub_index: usize) -> bool {
    let sub = &chunk.sub_chunks[sub_index];
    let was = sub.state.swap(TessState::Pending as u8, Ordering::AcqRel);
    if was == TessState::Pending as u8 {
        return false;
    }
    chunk.pending_mesh_jobs.fetch_add(1, Ordering::AcqRel);
    chunk
        .tessellation
        .store(TessState::Pending as u8, Ordering::Release);
    true
}
