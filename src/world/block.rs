//! Block identities and the static per-id behavior table.

use bitflags::bitflags;

/// The only per-block state the world stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub struct Block {
    pub id: u16,
}

impl Block {
    pub const AIR: Block = Block {
        id: BlockId::Air as u16,
    };

    pub fn new(id: BlockId) -> Self {
        Self { id: id as u16 }
    }

    pub fn info(self) -> &'static BlockInfo {
        &BLOCK_INFOS[self.id as usize]
    }

    pub fn is_air(self) -> bool {
        self.id == BlockId::Air as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BlockId {
    Air = 0,
    Grass = 1,
    Sand = 2,
    Dirt = 3,
    Stone = 4,
    Bedrock = 5,
    OakLog = 6,
    OakLeaves = 7,
    OakPlanks = 8,
    Glowstone = 9,
    Cobblestone = 10,
    Glass = 11,
    SeaLantern = 12,
    Water = 13,
}

pub const BLOCK_ID_COUNT: usize = 14;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        const SOLID = 1 << 0;
        const TRANSPARENT = 1 << 1;
        const TINT_TOP = 1 << 2;
        const TINT_SIDE = 1 << 3;
        const TINT_BOTTOM = 1 << 4;
        const LIGHT_SOURCE = 1 << 5;
    }
}

/// Static behavior of a block id. Texture ids index the embedder's atlas;
/// the pipeline only forwards them into packed vertices.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub name: &'static str,
    pub top_texture_id: u16,
    pub bottom_texture_id: u16,
    pub side_texture_id: u16,
    pub flags: BlockFlags,
}

impl BlockInfo {
    pub fn is_solid(&self) -> bool {
        self.flags.contains(BlockFlags::SOLID)
    }

    pub fn is_transparent(&self) -> bool {
        self.flags.contains(BlockFlags::TRANSPARENT)
    }

    pub fn is_light_source(&self) -> bool {
        self.flags.contains(BlockFlags::LIGHT_SOURCE)
    }
}

// Atlas slot assignments; stable, but only meaningful to the embedder.
const TEX_GRASS_TOP: u16 = 0;
const TEX_GRASS_SIDE: u16 = 1;
const TEX_DIRT: u16 = 2;
const TEX_SAND: u16 = 3;
const TEX_STONE: u16 = 4;
const TEX_BEDROCK: u16 = 5;
const TEX_OAK_LOG: u16 = 6;
const TEX_OAK_LOG_TOP: u16 = 7;
const TEX_OAK_LEAVES: u16 = 8;
const TEX_OAK_PLANKS: u16 = 9;
const TEX_GLOWSTONE: u16 = 10;
const TEX_COBBLESTONE: u16 = 11;
const TEX_GLASS: u16 = 12;
const TEX_SEA_LANTERN: u16 = 13;
const TEX_WATER: u16 = 14;

pub static BLOCK_INFOS: [BlockInfo; BLOCK_ID_COUNT] = [
    BlockInfo {
        name: "air",
        top_texture_id: 0,
        bottom_texture_id: 0,
        side_texture_id: 0,
        flags: BlockFlags::TRANSPARENT,
    },
    BlockInfo {
        name: "grass",
        top_texture_id: TEX_GRASS_TOP,
        bottom_texture_id: TEX_DIRT,
        side_texture_id: TEX_GRASS_SIDE,
        flags: BlockFlags::SOLID.union(BlockFlags::TINT_TOP),
    },
    BlockInfo {
        name: "sand",
        top_texture_id: TEX_SAND,
        bottom_texture_id: TEX_SAND,
        side_texture_id: TEX_SAND,
        flags: BlockFlags::SOLID,
    },
    BlockInfo {
        name: "dirt",
        top_texture_id: TEX_DIRT,
        bottom_texture_id: TEX_DIRT,
        side_texture_id: TEX_DIRT,
        flags: BlockFlags::SOLID,
    },
    BlockInfo {
        name: "stone",
        top_texture_id: TEX_STONE,
        bottom_texture_id: TEX_STONE,
        side_texture_id: TEX_STONE,
        flags: BlockFlags::SOLID,
    },
    BlockInfo {
        name: "bedrock",
        top_texture_id: TEX_BEDROCK,
        bottom_texture_id: TEX_BEDROCK,
        side_texture_id: TEX_BEDROCK,
        flags: BlockFlags::SOLID,
    },
    BlockInfo {
        name: "oak_log",
        top_texture_id: TEX_OAK_LOG_TOP,
        bottom_texture_id: TEX_OAK_LOG_TOP,
        side_texture_id: TEX_OAK_LOG,
        flags: BlockFlags::SOLID,
    },
    BlockInfo {
        name: "oak_leaves",
        top_texture_id: TEX_OAK_LEAVES,
        bottom_texture_id: TEX_OAK_LEAVES,
        side_texture_id: TEX_OAK_LEAVES,
        flags: BlockFlags::SOLID
            .union(BlockFlags::TRANSPARENT)
            .union(BlockFlags::TINT_TOP)
            .union(BlockFlags::TINT_SIDE)
            .union(BlockFlags::TINT_BOTTOM),
    },
    BlockInfo {
        name: "oak_planks",
        top_texture_id: TEX_OAK_PLANKS,
        bottom_texture_id: TEX_OAK_PLANKS,
        side_texture_id: TEX_OAK_PLANKS,
        flags: BlockFlags::SOLID,
    },
    BlockInfo {
        name: "glowstone",
        top_texture_id: TEX_GLOWSTONE,
        bottom_texture_id: TEX_GLOWSTONE,
        side_texture_id: TEX_GLOWSTONE,
        flags: BlockFlags::SOLID.union(BlockFlags::LIGHT_SOURCE),
    },
    BlockInfo {
        name: "cobblestone",
        top_texture_id: TEX_COBBLESTONE,
        bottom_texture_id: TEX_COBBLESTONE,
        side_texture_id: TEX_COBBLESTONE,
        flags: BlockFlags::SOLID,
    },
    BlockInfo {
        name: "glass",
        top_texture_id: TEX_GLASS,
        bottom_texture_id: TEX_GLASS,
        side_texture_id: TEX_GLASS,
        flags: BlockFlags::SOLID.union(BlockFlags::TRANSPARENT),
    },
    BlockInfo {
        name: "sea_lantern",
        top_texture_id: TEX_SEA_LANTERN,
        bottom_texture_id: TEX_SEA_LANTERN,
        side_texture_id: TEX_SEA_LANTERN,
        flags: BlockFlags::SOLID.union(BlockFlags::LIGHT_SOURCE),
    },
    BlockInfo {
        name: "water",
        top_texture_id: TEX_WATER,
        bottom_texture_id: TEX_WATER,
        side_texture_id: TEX_WATER,
        flags: BlockFlags::TRANSPARENT,
    },
];

/// Axis-aligned block faces, also the `face_id` field of packed vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlockFace {
    Top = 0,
    Bottom = 1,
    Left = 2,
    Right = 3,
    Front = 4,
    Back = 5,
}

pub const BLOCK_FACES: [BlockFace; 6] = [
    BlockFace::Top,
    BlockFace::Bottom,
    BlockFace::Left,
    BlockFace::Right,
    BlockFace::Front,
    BlockFace::Back,
];

/// Corner of a face, in UV-rect slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FaceCorner {
    BottomRight = 0,
    BottomLeft = 1,
    TopLeft = 2,
    TopRight = 3,
}
