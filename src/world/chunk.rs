//! Chunk storage: block volume, neighbour skirts, light map, and per
//! sub-chunk render slots.
//!
//! A chunk is 16x256x16 blocks, split into 32 sub-chunks of height 8 for
//! meshing. Along each horizontal edge it carries a skirt holding the
//! neighbouring chunk's edge column, so a chunk can be meshed before its
//! neighbours are resident.

use crate::render::frustum::Aabb;
use crate::world::block::Block;
use glam::{IVec2, IVec3, Vec3};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU8, Ordering};

pub const CHUNK_WIDTH: i32 = 16;
pub const CHUNK_HEIGHT: i32 = 256;
pub const CHUNK_DEPTH: i32 = 16;
pub const CHUNK_VOLUME: usize = (CHUNK_WIDTH * CHUNK_HEIGHT * CHUNK_DEPTH) as usize;

pub const SUB_CHUNK_HEIGHT: i32 = 8;
pub const SUB_CHUNK_COUNT: usize = (CHUNK_HEIGHT / SUB_CHUNK_HEIGHT) as usize;

/// Cells in one skirt: a full vertical slab along one edge.
pub const SKIRT_AREA: usize = (CHUNK_HEIGHT * CHUNK_WIDTH) as usize;

/// A chunk slot index that refers to no chunk.
pub const NO_CHUNK: u32 = u32::MAX;

/// Lifecycle of a chunk. Advances monotonically except for the terminal
/// `Freed` transition back into the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChunkState {
    Initialized = 0,
    Loaded = 1,
    NeighboursLoaded = 2,
    PendingForLightPropagation = 3,
    LightPropagated = 4,
    PendingForLightCalculation = 5,
    LightCalculated = 6,
    PendingForSave = 7,
    Saved = 8,
    Freed = 9,
}

impl ChunkState {
    pub fn from_u8(value: u8) -> ChunkState {
        match value {
            0 => ChunkState::Initialized,
            1 => ChunkState::Loaded,
            2 => ChunkState::NeighboursLoaded,
            3 => ChunkState::PendingForLightPropagation,
            4 => ChunkState::LightPropagated,
            5 => ChunkState::PendingForLightCalculation,
            6 => ChunkState::LightCalculated,
            7 => ChunkState::PendingForSave,
            8 => ChunkState::Saved,
            _ => ChunkState::Freed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TessState {
    None = 0,
    Pending = 1,
    Done = 2,
}

impl TessState {
    pub fn from_u8(value: u8) -> TessState {
        match value {
            0 => TessState::None,
            1 => TessState::Pending,
            _ => TessState::Done,
        }
    }
}

/// Moore-neighbourhood slots around a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ChunkNeighbour {
    Front = 0,
    Back = 1,
    Left = 2,
    Right = 3,
    FrontRight = 4,
    FrontLeft = 5,
    BackRight = 6,
    BackLeft = 7,
}

pub const NEIGHBOUR_COUNT: usize = 8;

pub const NEIGHBOUR_OFFSETS: [IVec2; NEIGHBOUR_COUNT] = [
    IVec2::new(0, -1),
    IVec2::new(0, 1),
    IVec2::new(-1, 0),
    IVec2::new(1, 0),
    IVec2::new(1, -1),
    IVec2::new(-1, -1),
    IVec2::new(1, 1),
    IVec2::new(-1, 1),
];

/// The four skirted edges, index-compatible with the first four
/// [`ChunkNeighbour`] slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Skirt {
    Front = 0,
    Back = 1,
    Left = 2,
    Right = 3,
}

pub const SKIRTS: [Skirt; 4] = [Skirt::Front, Skirt::Back, Skirt::Left, Skirt::Right];

impl Skirt {
    /// Chunk-grid offset of the neighbour this skirt mirrors.
    pub fn neighbour_offset(self) -> IVec2 {
        NEIGHBOUR_OFFSETS[self as usize]
    }

    /// The column of the *neighbour* chunk this skirt holds: for the front
    /// skirt that is the neighbour's z = 15 strip, and so on.
    pub fn neighbour_edge_coords(self, y: i32, i: i32) -> IVec3 {
        match self {
            Skirt::Front => IVec3::new(i, y, CHUNK_DEPTH - 1),
            Skirt::Back => IVec3::new(i, y, 0),
            Skirt::Left => IVec3::new(CHUNK_WIDTH - 1, y, i),
            Skirt::Right => IVec3::new(0, y, i),
        }
    }
}

/// Six block-level neighbour directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum BlockNeighbour {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
    Front = 4,
    Back = 5,
}

pub const BLOCK_NEIGHBOURS: [BlockNeighbour; 6] = [
    BlockNeighbour::Up,
    BlockNeighbour::Down,
    BlockNeighbour::Left,
    BlockNeighbour::Right,
    BlockNeighbour::Front,
    BlockNeighbour::Back,
];

#[inline]
pub fn block_index(coords: IVec3) -> usize {
    debug_assert!(
        coords.x >= 0
            && coords.x < CHUNK_WIDTH
            && coords.y >= 0
            && coords.y < CHUNK_HEIGHT
            && coords.z >= 0
            && coords.z < CHUNK_DEPTH,
        "block coords out of range: {coords}"
    );
    (coords.y * CHUNK_WIDTH * CHUNK_DEPTH + coords.z * CHUNK_WIDTH + coords.x) as usize
}

#[inline]
pub fn skirt_index(y: i32, i: i32) -> usize {
    debug_assert!((0..CHUNK_HEIGHT).contains(&y) && (0..CHUNK_WIDTH).contains(&i));
    (y * CHUNK_WIDTH + i) as usize
}

#[inline]
pub fn sub_chunk_index(block_y: i32) -> usize {
    (block_y / SUB_CHUNK_HEIGHT) as usize
}

/// Block contents of one chunk plus its four skirts.
pub struct BlockVolume {
    pub blocks: Box<[Block]>,
    pub skirts: [Box<[Block]>; 4],
}

impl BlockVolume {
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::AIR; CHUNK_VOLUME].into_boxed_slice(),
            skirts: std::array::from_fn(|_| vec![Block::AIR; SKIRT_AREA].into_boxed_slice()),
        }
    }

    #[inline]
    pub fn block(&self, coords: IVec3) -> Block {
        self.blocks[block_index(coords)]
    }

    #[inline]
    pub fn set_block(&mut self, coords: IVec3, block: Block) {
        self.blocks[block_index(coords)] = block;
    }

    #[inline]
    pub fn skirt_block(&self, skirt: Skirt, y: i32, i: i32) -> Block {
        self.skirts[skirt as usize][skirt_index(y, i)]
    }

    #[inline]
    pub fn set_skirt_block(&mut self, skirt: Skirt, y: i32, i: i32, block: Block) {
        self.skirts[skirt as usize][skirt_index(y, i)] = block;
    }

    /// Neighbour of `coords` in the given direction, resolved inside this
    /// chunk only: edges read the skirt, vertical out-of-range is air.
    pub fn neighbour_block(&self, coords: IVec3, dir: BlockNeighbour) -> Block {
        match dir {
            BlockNeighbour::Up => {
                if coords.y == CHUNK_HEIGHT - 1 {
                    Block::AIR
                } else {
                    self.block(coords + IVec3::Y)
                }
            }
            BlockNeighbour::Down => {
                if coords.y == 0 {
                    Block::AIR
                } else {
                    self.block(coords - IVec3::Y)
                }
            }
            BlockNeighbour::Left => {
                if coords.x == 0 {
                    self.skirt_block(Skirt::Left, coords.y, coords.z)
                } else {
                    self.block(coords - IVec3::X)
                }
            }
            BlockNeighbour::Right => {
                if coords.x == CHUNK_WIDTH - 1 {
                    self.skirt_block(Skirt::Right, coords.y, coords.z)
                } else {
                    self.block(coords + IVec3::X)
                }
            }
            BlockNeighbour::Front => {
                if coords.z == 0 {
                    self.skirt_block(Skirt::Front, coords.y, coords.x)
                } else {
                    self.block(coords - IVec3::Z)
                }
            }
            BlockNeighbour::Back => {
                if coords.z == CHUNK_DEPTH - 1 {
                    self.skirt_block(Skirt::Back, coords.y, coords.x)
                } else {
                    self.block(coords + IVec3::Z)
                }
            }
        }
    }
}

impl Default for BlockVolume {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-cell light, two nibbles per byte: sky in the low nibble, source in
/// the high one. The light thread is the only writer; meshers read
/// concurrently, which atomics make well-defined.
pub struct LightMap {
    cells: Box<[AtomicU8]>,
    skirts: [Box<[AtomicU8]>; 4],
}

fn light_cells(count: usize) -> Box<[AtomicU8]> {
    (0..count).map(|_| AtomicU8::new(0)).collect()
}

impl LightMap {
    pub fn new() -> Self {
        Self {
            cells: light_cells(CHUNK_VOLUME),
            skirts: std::array::from_fn(|_| light_cells(SKIRT_AREA)),
        }
    }

    pub fn clear(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
        for skirt in &self.skirts {
            for cell in skirt.iter() {
                cell.store(0, Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub fn sky(&self, coords: IVec3) -> u8 {
        self.cells[block_index(coords)].load(Ordering::Relaxed) & 0xf
    }

    #[inline]
    pub fn source(&self, coords: IVec3) -> u8 {
        self.cells[block_index(coords)].load(Ordering::Relaxed) >> 4
    }

    #[inline]
    pub fn set_sky(&self, coords: IVec3, level: u8) {
        debug_assert!(level <= 15);
        let cell = &self.cells[block_index(coords)];
        let old = cell.load(Ordering::Relaxed);
        cell.store((old & 0xf0) | level, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_source(&self, coords: IVec3, level: u8) {
        debug_assert!(level <= 15);
        let cell = &self.cells[block_index(coords)];
        let old = cell.load(Ordering::Relaxed);
        cell.store((old & 0x0f) | (level << 4), Ordering::Relaxed);
    }

    #[inline]
    pub fn skirt_sky(&self, skirt: Skirt, y: i32, i: i32) -> u8 {
        self.skirts[skirt as usize][skirt_index(y, i)].load(Ordering::Relaxed) & 0xf
    }

    #[inline]
    pub fn skirt_source(&self, skirt: Skirt, y: i32, i: i32) -> u8 {
        self.skirts[skirt as usize][skirt_index(y, i)].load(Ordering::Relaxed) >> 4
    }

    #[inline]
    pub fn set_skirt(&self, skirt: Skirt, y: i32, i: i32, sky: u8, source: u8) {
        debug_assert!(sky <= 15 && source <= 15);
        self.skirts[skirt as usize][skirt_index(y, i)].store(sky | (source << 4), Ordering::Relaxed);
    }
}

impl Default for LightMap {
    fn default() -> Self {
        Self::new()
    }
}

/// One vertex bucket held by a sub-chunk generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRef {
    pub id: u32,
    pub face_count: u32,
}

/// Everything the renderer needs from one tessellation generation of a
/// sub-chunk. The mesher fills the generation not currently displayed, then
/// flips `bucket_index`.
#[derive(Default)]
pub struct SubChunkGen {
    pub opaque: [Option<BucketRef>; 2],
    pub transparent: [Option<BucketRef>; 2],
    pub aabb: Aabb,
}

impl SubChunkGen {
    pub fn face_count(&self) -> u32 {
        let opaque: u32 = self.opaque.iter().flatten().map(|b| b.face_count).sum();
        let transparent: u32 = self.transparent.iter().flatten().map(|b| b.face_count).sum();
        opaque + transparent
    }

    pub fn take_buckets(&mut self) -> impl Iterator<Item = BucketRef> {
        let opaque = std::mem::take(&mut self.opaque);
        let transparent = std::mem::take(&mut self.transparent);
        self.aabb = Aabb::default();
        opaque.into_iter().flatten().chain(transparent.into_iter().flatten())
    }
}

pub struct SubChunkRenderData {
    pub gens: [RwLock<SubChunkGen>; 2],
    /// Which generation the renderer reads. Stored with Release after the
    /// next generation is fully written; loaded with Acquire per frame.
    pub bucket_index: AtomicU32,
    pub state: AtomicU8,
    pub instance_slot: AtomicI32,
}

impl SubChunkRenderData {
    pub fn new() -> Self {
        Self {
            gens: [RwLock::new(SubChunkGen::default()), RwLock::new(SubChunkGen::default())],
            bucket_index: AtomicU32::new(0),
            state: AtomicU8::new(TessState::None as u8),
            instance_slot: AtomicI32::new(-1),
        }
    }

    pub fn current_gen(&self) -> usize {
        self.bucket_index.load(Ordering::Acquire) as usize
    }

    pub fn next_gen(&self) -> usize {
        1 - self.current_gen()
    }

    pub fn tess_state(&self) -> TessState {
        TessState::from_u8(self.state.load(Ordering::Acquire))
    }
}

fn pack_coords(coords: IVec2) -> i64 {
    ((coords.y as i64) << 32) | (coords.x as u32 as i64)
}

fn unpack_coords(packed: i64) -> IVec2 {
    IVec2::new(packed as i32, (packed >> 32) as i32)
}

/// A pooled chunk slot. All fields are reinitialized by [`Chunk::reset`]
/// when the slot is recycled for a new coordinate.
pub struct Chunk {
    coords: AtomicI64,
    pub state: AtomicU8,
    pub tessellation: AtomicU8,
    /// Set on every edit; cleared by a successful save.
    pub dirty: AtomicBool,
    /// Mesh jobs scheduled but not yet finished for this chunk.
    pub pending_mesh_jobs: AtomicU32,
    pub neighbours: [AtomicU32; NEIGHBOUR_COUNT],
    pub blocks: RwLock<BlockVolume>,
    pub light: LightMap,
    pub sub_chunks: [SubChunkRenderData; SUB_CHUNK_COUNT],
}

impl Chunk {
    pub fn new() -> Self {
        Self {
            coords: AtomicI64::new(0),
            state: AtomicU8::new(ChunkState::Freed as u8),
            tessellation: AtomicU8::new(TessState::None as u8),
            dirty: AtomicBool::new(false),
            pending_mesh_jobs: AtomicU32::new(0),
            neighbours: std::array::from_fn(|_| AtomicU32::new(NO_CHUNK)),
            blocks: RwLock::new(BlockVolume::new()),
            light: LightMap::new(),
            sub_chunks: std::array::from_fn(|_| SubChunkRenderData::new()),
        }
    }

    /// Reinitializes a recycled slot for `coords`. The caller must already
    /// have returned the previous tenant's buckets and instance slots.
    pub fn reset(&self, coords: IVec2) {
        self.coords.store(pack_coords(coords), Ordering::Relaxed);
        self.dirty.store(false, Ordering::Relaxed);
        self.pending_mesh_jobs.store(0, Ordering::Relaxed);
        for neighbour in &self.neighbours {
            neighbour.store(NO_CHUNK, Ordering::Relaxed);
        }
        self.light.clear();
        for sub in &self.sub_chunks {
            debug_assert!(sub.gens[0].read().face_count() == 0);
            debug_assert!(sub.gens[1].read().face_count() == 0);
            sub.bucket_index.store(0, Ordering::Relaxed);
            sub.state.store(TessState::None as u8, Ordering::Relaxed);
            sub.instance_slot.store(-1, Ordering::Relaxed);
        }
        self.tessellation.store(TessState::None as u8, Ordering::Relaxed);
        self.state.store(ChunkState::Initialized as u8, Ordering::Release);
    }

    pub fn coords(&self) -> IVec2 {
        unpack_coords(self.coords.load(Ordering::Relaxed))
    }

    /// World-space origin of the chunk.
    pub fn position(&self) -> Vec3 {
        let coords = self.coords();
        Vec3::new(
            (coords.x * CHUNK_WIDTH) as f32,
            0.0,
            (coords.y * CHUNK_DEPTH) as f32,
        )
    }

    pub fn chunk_state(&self) -> ChunkState {
        ChunkState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_chunk_state(&self, state: ChunkState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Center of a block in world space.
    pub fn block_position(&self, coords: IVec3) -> Vec3 {
        self.position() + coords.as_vec3() + Vec3::splat(0.5)
    }

    pub fn neighbour_slot(&self, neighbour: ChunkNeighbour) -> Option<u32> {
        let slot = self.neighbours[neighbour as usize].load(Ordering::Acquire);
        (slot != NO_CHUNK).then_some(slot)
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of stepping one cell in a direction: the destination is either in
/// the same chunk, across a chunk border, or above/below the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStep {
    Same(IVec3),
    Cross(ChunkNeighbour, IVec3),
    OutOfWorld,
}

pub fn cell_step(coords: IVec3, dir: BlockNeighbour) -> CellStep {
    match dir {
        BlockNeighbour::Up => {
            if coords.y == CHUNK_HEIGHT - 1 {
                CellStep::OutOfWorld
            } else {
                CellStep::Same(coords + IVec3::Y)
            }
        }
        BlockNeighbour::Down => {
            if coords.y == 0 {
                CellStep::OutOfWorld
            } else {
                CellStep::Same(coords - IVec3::Y)
            }
        }
        BlockNeighbour::Left => {
            if coords.x == 0 {
                CellStep::Cross(
                    ChunkNeighbour::Left,
                    IVec3::new(CHUNK_WIDTH - 1, coords.y, coords.z),
                )
            } else {
                CellStep::Same(coords - IVec3::X)
            }
        }
        BlockNeighbour::Right => {
            if coords.x == CHUNK_WIDTH - 1 {
                CellStep::Cross(ChunkNeighbour::Right, IVec3::new(0, coords.y, coords.z))
            } else {
                CellStep::Same(coords + IVec3::X)
            }
        }
        BlockNeighbour::Front => {
            if coords.z == 0 {
                CellStep::Cross(
                    ChunkNeighbour::Front,
                    IVec3::new(coords.x, coords.y, CHUNK_DEPTH - 1),
                )
            } else {
                CellStep::Same(coords - IVec3::Z)
            }
        }
        BlockNeighbour::Back => {
            if coords.z == CHUNK_DEPTH - 1 {
                CellStep::Cross(ChunkNeighbour::Back, IVec3::new(coords.x, coords.y, 0))
            } else {
                CellStep::Same(coords + IVec3::Z)
            }
        }
    }
}

/// Chunk-grid coordinates of the chunk containing a world position.
pub fn world_to_chunk_coords(position: Vec3) -> IVec2 {
    IVec2::new(
        (position.x / CHUNK_WIDTH as f32).floor() as i32,
        (position.z / CHUNK_DEPTH as f32).floor() as i32,
    )
}
