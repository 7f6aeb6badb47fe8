//! Bit-packed block-face vertex.
//!
//! Two 32-bit words per vertex:
//!
//! ```text
//! word0: block_x:4 | block_y:8 | block_z:4 | local_corner_id:3 | face_id:3
//!        | face_corner_id:2 | flags:8
//! word1: sky_light:4 | source_light:4 | ao:2 | texture_uv_id:22
//! ```
//!
//! `texture_uv_id` indexes the embedder's uniform texel buffer of UV rects:
//! each rect occupies eight texels (four corners, two floats each), so the id
//! is `rect_id * 8 + corner * 2`.

use bytemuck::{Pod, Zeroable};
use glam::IVec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PackedVertex {
    pub data0: u32,
    pub data1: u32,
}

pub const BLOCK_X_BITS: u32 = 4;
pub const BLOCK_Y_BITS: u32 = 8;
pub const BLOCK_Z_BITS: u32 = 4;

const LOCAL_CORNER_SHIFT: u32 = 16;
const FACE_SHIFT: u32 = 19;
const FACE_CORNER_SHIFT: u32 = 22;
const FLAGS_SHIFT: u32 = 24;

const SOURCE_LIGHT_SHIFT: u32 = 4;
const AO_SHIFT: u32 = 8;
const UV_ID_SHIFT: u32 = 10;

pub fn pack_word0(
    block_coords: IVec3,
    local_corner_id: u32,
    face_id: u32,
    face_corner_id: u32,
    flags: u32,
) -> u32 {
    debug_assert!(block_coords.x < 16 && block_coords.y < 256 && block_coords.z < 16);
    block_coords.x as u32
        | ((block_coords.y as u32) << BLOCK_X_BITS)
        | ((block_coords.z as u32) << (BLOCK_X_BITS + BLOCK_Y_BITS))
        | (local_corner_id << LOCAL_CORNER_SHIFT)
        | (face_id << FACE_SHIFT)
        | (face_corner_id << FACE_CORNER_SHIFT)
        | ((flags & 0xff) << FLAGS_SHIFT)
}

pub fn pack_word1(texture_uv_id: u32, sky_light: u32, source_light: u32, ao: u32) -> u32 {
    debug_assert!(sky_light <= 15 && source_light <= 15 && ao <= 3);
    sky_light
        | (source_light << SOURCE_LIGHT_SHIFT)
        | (ao << AO_SHIFT)
        | (texture_uv_id << UV_ID_SHIFT)
}

/// Decoded form of a packed vertex, used in tests and debug tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackedVertex {
    pub block_coords: IVec3,
    pub local_corner_id: u32,
    pub face_id: u32,
    pub face_corner_id: u32,
    pub flags: u32,
    pub texture_uv_id: u32,
    pub sky_light: u32,
    pub source_light: u32,
    pub ao: u32,
}

pub fn unpack(vertex: PackedVertex) -> UnpackedVertex {
    let w0 = vertex.data0;
    let w1 = vertex.data1;
    UnpackedVertex {
        block_coords: IVec3::new(
            (w0 & 0xf) as i32,
            ((w0 >> BLOCK_X_BITS) & 0xff) as i32,
            ((w0 >> (BLOCK_X_BITS + BLOCK_Y_BITS)) & 0xf) as i32,
        ),
        local_corner_id: (w0 >> LOCAL_CORNER_SHIFT) & 0x7,
        face_id: (w0 >> FACE_SHIFT) & 0x7,
        face_corner_id: (w0 >> FACE_CORNER_SHIFT) & 0x3,
        flags: w0 >> FLAGS_SHIFT,
        sky_light: w1 & 0xf,
        source_light: (w1 >> SOURCE_LIGHT_SHIFT) & 0xf,
        ao: (w1 >> AO_SHIFT) & 0x3,
        texture_uv_id: w1 >> UV_ID_SHIFT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_is_lossless() {
        let vertex = PackedVertex {
            data0: pack_word0(IVec3::new(15, 255, 7), 5, 3, 2, 0b0010_0110),
            data1: pack_word1(1234 * 8 + 2 * 2, 13, 4, 2),
        };
        let unpacked = unpack(vertex);
        assert_eq!(unpacked.block_coords, IVec3::new(15, 255, 7));
        assert_eq!(unpacked.local_corner_id, 5);
        assert_eq!(unpacked.face_id, 3);
        assert_eq!(unpacked.face_corner_id, 2);
        assert_eq!(unpacked.flags, 0b0010_0110);
        assert_eq!(unpacked.sky_light, 13);
        assert_eq!(unpacked.source_light, 4);
        assert_eq!(unpacked.ao, 2);
        assert_eq!(unpacked.texture_uv_id, 1234 * 8 + 4);
    }

    #[test]
    fn vertex_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<PackedVertex>(), 8);
    }
}
