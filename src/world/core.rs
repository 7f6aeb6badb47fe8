//! World region management and the engine's public surface.
//!
//! The main-thread tick owns the chunk state machine: it decides which
//! chunks must be resident for the player position, schedules load, light,
//! mesh and save work, retires chunks that leave the pending-free band, and
//! assembles the frame's indirect draw commands.

use crate::config::{EngineConfig, PENDING_FREE_BAND};
use crate::containers::{CoordMap, SpscRing};
use crate::error::Result;
use crate::jobs::{default_worker_count, Job, JobExecutor, JobSystem, Priority};
use crate::memory::{Arena, TempArena};
use crate::render::driver::{FrameCommands, FrameStats, RenderDriver};
use crate::render::frustum::Frustum;
use crate::render::slab::GpuSlab;
use crate::world::block::{Block, BlockFace};
use crate::world::chunk::{
    world_to_chunk_coords, Chunk, ChunkNeighbour, ChunkState, TessState, CHUNK_DEPTH,
    CHUNK_HEIGHT, CHUNK_WIDTH, NEIGHBOUR_OFFSETS, NO_CHUNK, SUB_CHUNK_COUNT, SUB_CHUNK_HEIGHT,
};
use crate::world::generator::TerrainGenerator;
use crate::world::lighting::{LightWorker, RemeshRequest};
use crate::world::mesher;
use crate::world::pool::ChunkPool;
use crate::world::storage::ChunkStore;
use glam::{IVec2, IVec3, Vec3};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

const LIGHT_RING_CAP: usize = 8 * 1024;
const REMESH_RING_CAP: usize = 64 * 1024;
const RAY_STEP: f32 = 0.1;
const FACE_EPSILON: f32 = 1e-4;
const ASPECT_RATIO: f32 = 16.0 / 9.0;

/// Inclusive chunk-grid rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBounds {
    pub min: IVec2,
    pub max: IVec2,
}

impl RegionBounds {
    pub fn around(center: IVec2, radius: i32) -> Self {
        Self {
            min: center - IVec2::splat(radius),
            max: center + IVec2::splat(radius),
        }
    }

    pub fn expanded(self, by: i32) -> Self {
        Self {
            min: self.min - IVec2::splat(by),
            max: self.max + IVec2::splat(by),
        }
    }

    pub fn contains(&self, coords: IVec2) -> bool {
        coords.x >= self.min.x
            && coords.x <= self.max.x
            && coords.y >= self.min.y
            && coords.y <= self.max.y
    }

    pub fn iter(&self) -> impl Iterator<Item = IVec2> + '_ {
        let (min, max) = (self.min, self.max);
        (min.y..=max.y).flat_map(move |z| (min.x..=max.x).map(move |x| IVec2::new(x, z)))
    }
}

/// A resolved block lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockQuery {
    pub chunk_coords: IVec2,
    pub slot: u32,
    pub local_coords: IVec3,
    pub block: Block,
}

/// Result of a view-ray block selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedBlock {
    pub query: BlockQuery,
    /// Entry face; None when the ray starts inside the block.
    pub face: Option<BlockFace>,
    pub hit_point: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub resident_chunks: usize,
    pub faces_drawn: u64,
    pub sub_chunks_drawn: u32,
    pub buckets_used: usize,
    pub buckets_free: usize,
    pub instance_slots_free: usize,
    pub vertex_bytes_used: i64,
    pub chunk_slots_free: usize,
}

/// Everything shared between the main thread, the workers and the light
/// thread.
pub(crate) struct WorldState {
    config: EngineConfig,
    generator: TerrainGenerator,
    store: ChunkStore,
    pub(crate) pool: ChunkPool,
    table: Mutex<CoordMap>,
    pub(crate) slab: GpuSlab,
    region: RwLock<RegionBounds>,
    /// Main thread -> light thread: chunks awaiting stage 1.
    propagation_queue: SpscRing<u32>,
    /// Main thread -> light thread: chunks awaiting stage 2 seeding.
    lighting_queue: SpscRing<u32>,
    /// Light thread -> main thread: sub-chunks invalidated by late light.
    remesh_queue: SpscRing<RemeshRequest>,
    sky_light_level: AtomicU8,
    running: AtomicBool,
}

impl WorldState {
    fn chunk_slot(&self, coords: IVec2) -> Option<u32> {
        self.table.lock().get(coords)
    }

    fn run_load(&self, slot: u32) {
        let chunk = self.pool.get(slot);
        if chunk.chunk_state() != ChunkState::Initialized {
            return;
        }
        let coords = chunk.coords();
        {
            let mut volume = chunk.blocks.write();
            self.generator.generate(coords, &mut volume);
            if let Err(e) = self.store.load_chunk(coords, &mut volume) {
                warn!("chunk {coords}: {e}; using generated blocks");
            }
        }
        chunk.set_chunk_state(ChunkState::Loaded);
    }

    fn run_save(&self, slot: u32, temp: &TempArena<'_>) {
        let chunk = self.pool.get(slot);
        if chunk.chunk_state() == ChunkState::Freed {
            return;
        }
        let coords = chunk.coords();
        let saved = {
            let volume = chunk.blocks.read();
            self.store.save_chunk(coords, &volume, &self.generator, temp)
        };
        match saved {
            Ok(_) => {
                chunk.dirty.store(false, Ordering::Release);
                if chunk.chunk_state() == ChunkState::PendingForSave {
                    chunk.set_chunk_state(ChunkState::Saved);
                }
            }
            Err(e) => {
                warn!("chunk {coords}: {e}; will retry save");
                if chunk.chunk_state() == ChunkState::PendingForSave {
                    chunk.set_chunk_state(ChunkState::LightCalculated);
                }
            }
        }
    }
}

impl JobExecutor for WorldState {
    fn execute(&self, job: Job, temp: &TempArena<'_>) {
        match job {
            Job::Load { slot } => self.run_load(slot),
            Job::MeshSubChunk { slot, sub_index } => {
                let _ = mesher::mesh_sub_chunk(&self.pool, &self.slab, slot, sub_index);
            }
            Job::Save { slot } => self.run_save(slot, temp),
        }
    }
}

fn light_thread_main(state: Arc<WorldState>) {
    let worker = LightWorker::new();
    while state.running.load(Ordering::Acquire) {
        let mut progressed = false;

        while let Some(slot) = state.propagation_queue.pop() {
            let chunk = state.pool.get(slot);
            if chunk.chunk_state() == ChunkState::PendingForLightPropagation {
                worker.propagate(&state.pool, slot);
                chunk.set_chunk_state(ChunkState::LightPropagated);
            }
            progressed = true;
        }

        while let Some(slot) = state.lighting_queue.pop() {
            let chunk = state.pool.get(slot);
            if chunk.chunk_state() == ChunkState::PendingForLightCalculation {
                worker.calculate(&state.pool, slot);
                // The chunk only becomes LightCalculated once its flood
                // fill has fully drained.
                let region = *state.region.read();
                worker.drain(&state.pool, region, &state.remesh_queue);
                chunk.set_chunk_state(ChunkState::LightCalculated);
            }
            progressed = true;
        }

        if !worker.queue_is_empty() {
            let region = *state.region.read();
            worker.drain(&state.pool, region, &state.remesh_queue);
            progressed = true;
        }

        if !progressed {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }
    debug!("light thread stopped");
}

/// The engine. One instance owns the chunk pipeline end to end.
pub struct World {
    state: Arc<WorldState>,
    jobs: Option<JobSystem>,
    light_thread: Option<JoinHandle<()>>,
    driver: RenderDriver,
    last_stats: FrameStats,
    /// Main-thread scratch for synchronous saves.
    arena: Arena,
}

impl World {
    /// Brings up the pipeline: pool, slab, worker threads and the light
    /// thread. An existing world directory's seed wins over `seed`.
    pub fn init(config: EngineConfig, seed: i32, world_path: &Path) -> Result<World> {
        config.validate()?;
        let store = ChunkStore::new(world_path)?;
        let seed = match store.read_seed()? {
            Some(existing) => {
                if existing != seed {
                    info!("world {} has seed {existing}; ignoring requested {seed}",
                        world_path.display());
                }
                existing
            }
            None => {
                store.write_seed(seed)?;
                seed
            }
        };

        let state = Arc::new(WorldState {
            generator: TerrainGenerator::new(seed),
            store,
            pool: ChunkPool::new(config.chunk_capacity()),
            table: Mutex::new(CoordMap::new(config.chunk_capacity())),
            slab: GpuSlab::headless(config.bucket_capacity()),
            region: RwLock::new(RegionBounds::around(IVec2::ZERO, config.chunk_radius)),
            propagation_queue: SpscRing::new(LIGHT_RING_CAP),
            lighting_queue: SpscRing::new(LIGHT_RING_CAP),
            remesh_queue: SpscRing::new(REMESH_RING_CAP),
            sky_light_level: AtomicU8::new(15),
            running: AtomicBool::new(true),
            config,
        });

        let jobs = JobSystem::start(state.clone(), default_worker_count());
        let light_state = state.clone();
        let light_thread = std::thread::Builder::new()
            .name("light".into())
            .spawn(move || light_thread_main(light_state))
            .expect("failed to spawn light thread");

        info!(
            "world up: seed {seed}, radius {}, {} chunk slots, {} buckets",
            state.config.chunk_radius,
            state.pool.capacity(),
            state.slab.capacity()
        );

        Ok(World {
            state,
            jobs: Some(jobs),
            light_thread: Some(light_thread),
            driver: RenderDriver::new(),
            last_stats: FrameStats::default(),
            arena: Arena::new(4 * 1024 * 1024),
        })
    }

    fn jobs(&self) -> &JobSystem {
        self.jobs.as_ref().expect("job system alive")
    }

    /// Advances the chunk state machine one frame and rebuilds the draw
    /// command lists for the given camera.
    pub fn tick(&mut self, player_position: Vec3, view_direction: Vec3) -> &FrameCommands {
        let player_chunk = world_to_chunk_coords(player_position);
        let active = RegionBounds::around(player_chunk, self.state.config.chunk_radius);
        let retain = active.expanded(PENDING_FREE_BAND);
        *self.state.region.write() = active;

        self.admit_missing_chunks(active);

        let entries: Vec<(IVec2, u32)> = self.state.table.lock().iter().collect();
        self.advance_states(&entries, active);
        self.drain_remesh_requests(retain);
        self.retire_chunks(&entries, active, retain);

        self.build_frame(player_position, view_direction, active)
    }

    /// Step 2 of the tick: make every active-region coordinate resident.
    fn admit_missing_chunks(&self, active: RegionBounds) {
        for coords in active.iter() {
            let mut table = self.state.table.lock();
            if table.get(coords).is_some() {
                continue;
            }
            let Some(slot) = self.state.pool.alloc() else {
                // Pool temporarily dry (e.g. right after a teleport); the
                // eviction pass will refill it within a few frames.
                debug!("chunk pool dry at {coords}");
                return;
            };
            self.state.pool.get(slot).reset(coords);
            table.insert(coords, slot);
            drop(table);
            self.jobs().dispatch(Job::Load { slot }, Priority::Low);
        }
    }

    /// Steps 3-5: neighbour linking, light scheduling, mesh scheduling.
    fn advance_states(&self, entries: &[(IVec2, u32)], active: RegionBounds) {
        for &(coords, slot) in entries {
            let chunk = self.state.pool.get(slot).as_ref();
            match chunk.chunk_state() {
                ChunkState::Loaded => {
                    if self.cardinals_loaded(coords) {
                        self.link_neighbours(chunk, coords, slot);
                        chunk.set_chunk_state(ChunkState::NeighboursLoaded);
                        if !self.state.propagation_queue.is_full() {
                            chunk.set_chunk_state(ChunkState::PendingForLightPropagation);
                            self.state.propagation_queue.push(slot);
                        }
                    }
                }
                ChunkState::NeighboursLoaded => {
                    if !self.state.propagation_queue.is_full() {
                        chunk.set_chunk_state(ChunkState::PendingForLightPropagation);
                        self.state.propagation_queue.push(slot);
                    }
                }
                ChunkState::LightPropagated => {
                    if !self.state.lighting_queue.is_full() {
                        chunk.set_chunk_state(ChunkState::PendingForLightCalculation);
                        self.state.lighting_queue.push(slot);
                    }
                }
                ChunkState::LightCalculated => {
                    if active.contains(coords)
                        && TessState::from_u8(chunk.tessellation.load(Ordering::Acquire))
                            == TessState::None
                    {
                        for sub_index in 0..SUB_CHUNK_COUNT {
                            if mesher::mark_mesh_pending(chunk, sub_index) {
                                self.jobs().dispatch(
                                    Job::MeshSubChunk { slot, sub_index },
                                    Priority::High,
                                );
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn cardinals_loaded(&self, coords: IVec2) -> bool {
        let table = self.state.table.lock();
        NEIGHBOUR_OFFSETS[..4].iter().all(|&offset| {
            table
                .get(coords + offset)
                .map(|slot| self.state.pool.get(slot).chunk_state() >= ChunkState::Loaded)
                .unwrap_or(false)
        })
    }

    /// Resolves this chunk's eight neighbour links and the reverse links.
    fn link_neighbours(&self, chunk: &Chunk, coords: IVec2, slot: u32) {
        let table = self.state.table.lock();
        for (index, &offset) in NEIGHBOUR_OFFSETS.iter().enumerate() {
            let neighbour_slot = table.get(coords + offset).unwrap_or(NO_CHUNK);
            chunk.neighbours[index].store(neighbour_slot, Ordering::Release);
            if neighbour_slot != NO_CHUNK {
                let neighbour = self.state.pool.get(neighbour_slot);
                neighbour.neighbours[opposite_neighbour(index)].store(slot, Ordering::Release);
            }
        }
    }

    /// Step 5a: mesh jobs for sub-chunks invalidated by late light updates.
    fn drain_remesh_requests(&self, retain: RegionBounds) {
        while let Some((slot, sub_index)) = self.state.remesh_queue.pop() {
            let chunk = self.state.pool.get(slot).as_ref();
            if chunk.chunk_state() < ChunkState::LightCalculated
                || chunk.chunk_state() == ChunkState::Freed
                || !retain.contains(chunk.coords())
            {
                continue;
            }
            if mesher::mark_mesh_pending(chunk, sub_index as usize) {
                self.jobs().dispatch(
                    Job::MeshSubChunk {
                        slot,
                        sub_index: sub_index as usize,
                    },
                    Priority::High,
                );
            }
        }
    }

    /// Step 7: saves in the pending-free band, frees outside it.
    fn retire_chunks(&self, entries: &[(IVec2, u32)], active: RegionBounds, retain: RegionBounds) {
        for &(coords, slot) in entries {
            if active.contains(coords) {
                continue;
            }
            let chunk = self.state.pool.get(slot).as_ref();
            let state = chunk.chunk_state();
            let idle = chunk.pending_mesh_jobs.load(Ordering::Acquire) == 0;
            let dirty = chunk.dirty.load(Ordering::Acquire);

            // Any settled state can serialize; the Pending* states are owned
            // by the light thread or a worker and must drain first.
            let savable = matches!(
                state,
                ChunkState::Loaded
                    | ChunkState::NeighboursLoaded
                    | ChunkState::LightPropagated
                    | ChunkState::LightCalculated
                    | ChunkState::Saved
            ) && idle
                && dirty;

            if retain.contains(coords) {
                if savable {
                    chunk.set_chunk_state(ChunkState::PendingForSave);
                    self.jobs().dispatch(Job::Save { slot }, Priority::Low);
                }
                continue;
            }

            // Outside the pending-free band.
            if savable {
                chunk.set_chunk_state(ChunkState::PendingForSave);
                self.jobs().dispatch(Job::Save { slot }, Priority::Low);
                continue;
            }
            let freeable = !dirty
                && idle
                && matches!(
                    state,
                    ChunkState::Loaded
                        | ChunkState::NeighboursLoaded
                        | ChunkState::LightPropagated
                        | ChunkState::LightCalculated
                        | ChunkState::Saved
                );
            if freeable {
                self.free_chunk(coords, slot);
            }
        }
    }

    fn free_chunk(&self, coords: IVec2, slot: u32) {
        let chunk = self.state.pool.get(slot).as_ref();
        let mut freed_faces = 0u32;
        for sub in &chunk.sub_chunks {
            for gen in &sub.gens {
                for bucket in gen.write().take_buckets() {
                    freed_faces += bucket.face_count;
                    self.state.slab.free_bucket(bucket.id);
                }
            }
            let instance = sub.instance_slot.swap(-1, Ordering::AcqRel);
            if instance >= 0 {
                self.state.slab.free_instance(instance as u32);
            }
            sub.state.store(TessState::None as u8, Ordering::Release);
        }
        self.state
            .slab
            .note_vertex_bytes(-i64::from(freed_faces) * 4 * 8);

        let mut table = self.state.table.lock();
        for (index, &offset) in NEIGHBOUR_OFFSETS.iter().enumerate() {
            if let Some(neighbour_slot) = table.get(coords + offset) {
                self.state.pool.get(neighbour_slot).neighbours[opposite_neighbour(index)]
                    .store(NO_CHUNK, Ordering::Release);
            }
        }
        table.remove(coords);
        drop(table);

        chunk.set_chunk_state(ChunkState::Freed);
        self.state.pool.free(slot);
    }

    /// Step 8: frustum-cull and pack the indirect command lists.
    fn build_frame(
        &mut self,
        player_position: Vec3,
        view_direction: Vec3,
        active: RegionBounds,
    ) -> &FrameCommands {
        let far =
            ((self.state.config.chunk_radius + 1) * CHUNK_WIDTH) as f32 * std::f32::consts::SQRT_2;
        let view_proj = RenderDriver::view_projection(
            player_position,
            view_direction,
            self.state.config.fov_degrees,
            ASPECT_RATIO,
            far.max(CHUNK_HEIGHT as f32),
        );
        let frustum = Frustum::from_view_projection(&view_proj);

        self.driver.begin_frame();
        let table = self.state.table.lock();
        for coords in active.iter() {
            let Some(slot) = table.get(coords) else {
                continue;
            };
            let chunk = self.state.pool.get(slot);
            if chunk.chunk_state() < ChunkState::LightCalculated {
                continue;
            }
            for sub in &chunk.sub_chunks {
                self.driver.submit_sub_chunk(sub, &frustum);
            }
        }
        drop(table);

        self.last_stats = self.driver.stats();
        self.driver.commands()
    }

    /// Writes a block, mirrors edge edits into neighbour skirts, and
    /// schedules remeshing of every affected sub-chunk.
    pub fn set_block(&self, chunk_coords: IVec2, local_coords: IVec3, block_id: u16) -> bool {
        let Some(slot) = self.state.chunk_slot(chunk_coords) else {
            return false;
        };
        let chunk = self.state.pool.get(slot).as_ref();
        let state = chunk.chunk_state();
        if state < ChunkState::Loaded || state == ChunkState::Freed {
            return false;
        }
        let block = Block { id: block_id };
        chunk.blocks.write().set_block(local_coords, block);
        chunk.dirty.store(true, Ordering::Release);

        let sub_index = crate::world::chunk::sub_chunk_index(local_coords.y);
        self.schedule_sub_mesh(slot, sub_index);

        // Sub-chunk boundary edits touch the slab above or below too.
        let local_y = local_coords.y % SUB_CHUNK_HEIGHT;
        if local_y == SUB_CHUNK_HEIGHT - 1 && local_coords.y != CHUNK_HEIGHT - 1 {
            self.schedule_sub_mesh(slot, sub_index + 1);
        } else if local_y == 0 && local_coords.y != 0 {
            self.schedule_sub_mesh(slot, sub_index - 1);
        }

        self.mirror_edge_edit(chunk_coords, local_coords, block, sub_index);
        true
    }

    /// Removes a block; a watery neighbourhood floods the hole instead of
    /// leaving air.
    pub fn remove_block(&self, chunk_coords: IVec2, local_coords: IVec3) -> bool {
        let Some(slot) = self.state.chunk_slot(chunk_coords) else {
            return false;
        };
        let water = crate::world::block::BlockId::Water as u16;
        let floods = {
            let chunk = self.state.pool.get(slot);
            let volume = chunk.blocks.read();
            crate::world::chunk::BLOCK_NEIGHBOURS
                .iter()
                .any(|&dir| volume.neighbour_block(local_coords, dir).id == water)
        };
        let id = if floods {
            water
        } else {
            crate::world::block::BlockId::Air as u16
        };
        self.set_block(chunk_coords, local_coords, id)
    }

    fn schedule_sub_mesh(&self, slot: u32, sub_index: usize) {
        let chunk = self.state.pool.get(slot).as_ref();
        if chunk.chunk_state() < ChunkState::LightCalculated {
            return;
        }
        if mesher::mark_mesh_pending(chunk, sub_index) {
            self.jobs()
                .dispatch(Job::MeshSubChunk { slot, sub_index }, Priority::High);
        }
    }

    /// Copies an edge edit into the adjacent chunk's facing skirt and
    /// remeshes its touching sub-chunk.
    fn mirror_edge_edit(
        &self,
        chunk_coords: IVec2,
        local: IVec3,
        block: Block,
        sub_index: usize,
    ) {
        use crate::world::chunk::Skirt;
        let mut mirrors: Vec<(IVec2, Skirt, i32)> = Vec::new();
        if local.x == 0 {
            mirrors.push((chunk_coords + IVec2::new(-1, 0), Skirt::Right, local.z));
        } else if local.x == CHUNK_WIDTH - 1 {
            mirrors.push((chunk_coords + IVec2::new(1, 0), Skirt::Left, local.z));
        }
        if local.z == 0 {
            mirrors.push((chunk_coords + IVec2::new(0, -1), Skirt::Back, local.x));
        } else if local.z == CHUNK_DEPTH - 1 {
            mirrors.push((chunk_coords + IVec2::new(0, 1), Skirt::Front, local.x));
        }

        for (neighbour_coords, skirt, index) in mirrors {
            let Some(neighbour_slot) = self.state.chunk_slot(neighbour_coords) else {
                continue;
            };
            let neighbour = self.state.pool.get(neighbour_slot).as_ref();
            let neighbour_state = neighbour.chunk_state();
            if neighbour_state < ChunkState::Loaded || neighbour_state == ChunkState::Freed {
                continue;
            }
            neighbour
                .blocks
                .write()
                .set_skirt_block(skirt, local.y, index, block);
            neighbour.dirty.store(true, Ordering::Release);
            self.schedule_sub_mesh(neighbour_slot, sub_index);
        }
    }

    /// Resolves the block containing a world-space position.
    pub fn query_block(&self, position: Vec3) -> Option<BlockQuery> {
        if position.y < 0.0 || position.y >= CHUNK_HEIGHT as f32 {
            return None;
        }
        let chunk_coords = world_to_chunk_coords(position);
        let slot = self.state.chunk_slot(chunk_coords)?;
        let chunk = self.state.pool.get(slot);
        if chunk.chunk_state() < ChunkState::Loaded {
            return None;
        }
        let origin = chunk.position();
        let local_coords = IVec3::new(
            (position.x - origin.x).floor() as i32,
            position.y.floor() as i32,
            (position.z - origin.z).floor() as i32,
        );
        let block = chunk.blocks.read().block(local_coords);
        Some(BlockQuery {
            chunk_coords,
            slot,
            local_coords,
            block,
        })
    }

    /// `(sky, source)` light of the block containing a world position.
    pub fn query_light(&self, position: Vec3) -> Option<(u8, u8)> {
        let query = self.query_block(position)?;
        let chunk = self.state.pool.get(query.slot);
        Some((
            chunk.light.sky(query.local_coords),
            chunk.light.source(query.local_coords),
        ))
    }

    /// Walks the view ray in tenth-of-a-block steps and returns the first
    /// non-air block, its entry face and the exact hit point.
    pub fn select_block(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Option<SelectedBlock> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }
        let steps = (max_distance / RAY_STEP).ceil() as usize;
        let mut point = origin;
        for _ in 0..=steps {
            if let Some(query) = self.query_block(point) {
                if !query.block.is_air() {
                    return Some(self.resolve_hit(query, origin, direction));
                }
            }
            point += direction * RAY_STEP;
        }
        None
    }

    fn resolve_hit(&self, query: BlockQuery, origin: Vec3, direction: Vec3) -> SelectedBlock {
        let chunk = self.state.pool.get(query.slot);
        let center = chunk.block_position(query.local_coords);
        let min = center - Vec3::splat(0.5);
        let max = center + Vec3::splat(0.5);

        let inside = origin.cmpge(min).all() && origin.cmplt(max).all();
        if inside {
            return SelectedBlock {
                query,
                face: None,
                hit_point: origin,
            };
        }

        match ray_aabb(origin, direction, min, max) {
            Some(t) => {
                let hit_point = origin + direction * t;
                SelectedBlock {
                    query,
                    face: entry_face(hit_point, min, max),
                    hit_point,
                }
            }
            None => SelectedBlock {
                query,
                face: None,
                hit_point: origin,
            },
        }
    }

    /// Synchronously saves every dirty resident chunk.
    pub fn save_all(&mut self) {
        let entries: Vec<(IVec2, u32)> = self.state.table.lock().iter().collect();
        let mut saved = 0usize;
        for (coords, slot) in entries {
            let chunk = self.state.pool.get(slot);
            if !chunk.dirty.load(Ordering::Acquire) {
                continue;
            }
            let result = self.arena.with_temp(|temp| {
                let volume = chunk.blocks.read();
                self.state
                    .store
                    .save_chunk(coords, &volume, &self.state.generator, temp)
            });
            match result {
                Ok(_) => {
                    chunk.dirty.store(false, Ordering::Release);
                    saved += 1;
                }
                Err(e) => warn!("chunk {coords}: {e}"),
            }
        }
        info!("saved {saved} dirty chunks");
    }

    pub fn stats(&self) -> WorldStats {
        let slab = &self.state.slab;
        WorldStats {
            resident_chunks: self.state.table.lock().len(),
            faces_drawn: self.last_stats.face_count,
            sub_chunks_drawn: self.last_stats.sub_chunks_drawn,
            buckets_used: slab.capacity() - slab.free_bucket_count(),
            buckets_free: slab.free_bucket_count(),
            instance_slots_free: slab.free_instance_count(),
            vertex_bytes_used: slab.used_vertex_bytes(),
            chunk_slots_free: self.state.pool.free_count(),
        }
    }

    /// Day/night factor consumed by the embedder's sky shading, 0..=15.
    pub fn set_sky_light_level(&self, level: u8) {
        self.state.sky_light_level.store(level.min(15), Ordering::Release);
    }

    pub fn sky_light_level(&self) -> u8 {
        self.state.sky_light_level.load(Ordering::Acquire)
    }

    pub fn seed(&self) -> i32 {
        self.state.generator.seed()
    }

    /// True when no queued or in-flight work remains and every active-region
    /// chunk is fully lit and tessellated.
    pub fn is_idle(&self) -> bool {
        if !self.jobs().is_idle()
            || !self.state.propagation_queue.is_empty()
            || !self.state.lighting_queue.is_empty()
            || !self.state.remesh_queue.is_empty()
        {
            return false;
        }
        let active = *self.state.region.read();
        // The outermost ring can never see all four cardinal neighbours, so
        // it legitimately rests at Loaded; only the interior must be lit and
        // tessellated.
        let interior = active.expanded(-1);
        let table = self.state.table.lock();
        for coords in active.iter() {
            let Some(slot) = table.get(coords) else {
                return false;
            };
            let chunk = self.state.pool.get(slot);
            let state = chunk.chunk_state();
            if state < ChunkState::Loaded || state == ChunkState::Freed {
                return false;
            }
            if interior.contains(coords) {
                if state < ChunkState::LightCalculated {
                    return false;
                }
                if chunk.pending_mesh_jobs.load(Ordering::Acquire) != 0 {
                    return false;
                }
            }
        }
        true
    }

    /// Ticks until the pipeline settles (or the tick budget runs out).
    /// Mostly a test and tooling helper.
    pub fn tick_until_idle(
        &mut self,
        player_position: Vec3,
        view_direction: Vec3,
        max_ticks: usize,
    ) -> bool {
        let mut settled = 0;
        for _ in 0..max_ticks {
            self.tick(player_position, view_direction);
            if self.is_idle() {
                settled += 1;
                // A few extra ticks let stragglers from the light thread's
                // flood fill surface through the remesh queue.
                if settled >= 3 {
                    return true;
                }
            } else {
                settled = 0;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        false
    }

    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(jobs) = self.jobs.take() {
            self.state.running.store(false, Ordering::Release);
            jobs.shutdown();
        }
        if let Some(light) = self.light_thread.take() {
            let _ = light.join();
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn opposite_neighbour(index: usize) -> usize {
    match index {
        0 => ChunkNeighbour::Back as usize,
        1 => ChunkNeighbour::Front as usize,
        2 => ChunkNeighbour::Right as usize,
        3 => ChunkNeighbour::Left as usize,
        4 => ChunkNeighbour::BackLeft as usize,
        5 => ChunkNeighbour::BackRight as usize,
        6 => ChunkNeighbour::FrontLeft as usize,
        _ => ChunkNeighbour::FrontRight as usize,
    }
}

/// Slab-method ray/box intersection; returns the entry distance.
fn ray_aabb(origin: Vec3, direction: Vec3, min: Vec3, max: Vec3) -> Option<f32> {
    let mut t_min = f32::NEG_INFINITY;
    let mut t_max = f32::INFINITY;
    for axis in 0..3 {
        let t1 = (min[axis] - origin[axis]) / direction[axis];
        let t2 = (max[axis] - origin[axis]) / direction[axis];
        t_min = t_min.max(t1.min(t2));
        t_max = t_max.min(t1.max(t2));
    }
    (t_max >= t_min && t_max > 0.0).then_some(t_min.max(0.0))
}

fn entry_face(hit: Vec3, min: Vec3, max: Vec3) -> Option<BlockFace> {
    if (hit.y - max.y).abs() < FACE_EPSILON {
        Some(BlockFace::Top)
    } else if (hit.y - min.y).abs() < FACE_EPSILON {
        Some(BlockFace::Bottom)
    } else if (hit.x - max.x).abs() < FACE_EPSILON {
        Some(BlockFace::Right)
    } else if (hit.x - min.x).abs() < FACE_EPSILON {
        Some(BlockFace::Left)
    } else if (hit.z - min.z).abs() < FACE_EPSILON {
        Some(BlockFace::Front)
    } else if (hit.z - max.z).abs() < FACE_EPSILON {
        Some(BlockFace::Back)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_bounds_iterate_inclusively() {
        let region = RegionBounds::around(IVec2::new(2, -1), 1);
        let coords: Vec<IVec2> = region.iter().collect();
        assert_eq!(coords.len(), 9);
        assert!(region.contains(IVec2::new(1, -2)));
        assert!(region.contains(IVec2::new(3, 0)));
        assert!(!region.contains(IVec2::new(4, 0)));
        assert!(region.expanded(2).contains(IVec2::new(5, 0)));
    }

    #[test]
    fn opposite_neighbours_are_symmetric() {
        for index in 0..8 {
            let opposite = opposite_neighbour(index);
            assert_eq!(
                NEIGHBOUR_OFFSETS[index] + NEIGHBOUR_OFFSETS[opposite],
                IVec2::ZERO
            );
            assert_eq!(opposite_neighbour(opposite), index);
        }
    }

    #[test]
    fn ray_hits_box_from_outside() {
        let t = ray_aabb(
            Vec3::new(0.5, 0.5, 5.0),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::ZERO,
            Vec3::ONE,
        )
        .unwrap();
        assert!((t - 4.0).abs() < 1e-5);
        let hit = Vec3::new(0.5, 0.5, 5.0) + Vec3::new(0.0, 0.0, -1.0) * t;
        assert_eq!(entry_face(hit, Vec3::ZERO, Vec3::ONE), Some(BlockFace::Back));
    }

    #[test]
    fn ray_misses_box_behind() {
        assert!(ray_aabb(
            Vec3::new(0.5, 0.5, 5.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::ZERO,
            Vec3::ONE,
        )
        .is_none());
    }

    #[test]
    fn entry_face_picks_boundary_plane() {
        let min = Vec3::ZERO;
        let max = Vec3::ONE;
        assert_eq!(
            entry_face(Vec3::new(0.5, 1.0, 0.5), min, max),
            Some(BlockFace::Top)
        );
        assert_eq!(
            entry_face(Vec3::new(0.0, 0.5, 0.5), min, max),
            Some(BlockFace::Left)
        );
        assert_eq!(entry_face(Vec3::new(0.5, 0.5, 0.5), min, max), None);
    }
}
