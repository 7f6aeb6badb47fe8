//! Per-frame indirect draw command assembly.
//!
//! The driver walks visible sub-chunks, reads the generation the mesher last
//! published, and packs one `DrawElementsIndirectCommand` per live bucket
//! into the opaque and transparent lists. The embedder uploads the lists to
//! its indirect command buffers and issues one multi-draw per list; the
//! transparent list feeds its weighted-blended OIT pass before the final
//! MSAA blit.

use crate::render::frustum::Frustum;
use crate::render::slab::BUCKET_VERTICES;
use crate::world::chunk::SubChunkRenderData;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::sync::atomic::Ordering;

/// Matches the GL `DrawElementsIndirectCommand` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DrawElementsIndirectCommand {
    pub count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: u32,
    pub base_instance: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub face_count: u64,
    pub sub_chunks_drawn: u32,
}

#[derive(Default)]
pub struct FrameCommands {
    pub opaque: Vec<DrawElementsIndirectCommand>,
    pub transparent: Vec<DrawElementsIndirectCommand>,
}

pub struct RenderDriver {
    commands: FrameCommands,
    stats: FrameStats,
}

impl RenderDriver {
    pub fn new() -> Self {
        Self {
            commands: FrameCommands::default(),
            stats: FrameStats::default(),
        }
    }

    /// View-projection matrix for a first-person camera at `position`
    /// looking along `direction`.
    pub fn view_projection(
        position: Vec3,
        direction: Vec3,
        fov_degrees: f32,
        aspect: f32,
        far: f32,
    ) -> Mat4 {
        let projection = Mat4::perspective_rh_gl(fov_degrees.to_radians(), aspect, 0.1, far);
        let view = Mat4::look_to_rh(position, direction.normalize_or_zero(), Vec3::Y);
        projection * view
    }

    pub fn begin_frame(&mut self) {
        self.commands.opaque.clear();
        self.commands.transparent.clear();
        self.stats = FrameStats::default();
    }

    /// Appends draw commands for one sub-chunk if it has faces and its AABB
    /// is inside the frustum. Reads `bucket_index` once, then only data of
    /// that generation.
    pub fn submit_sub_chunk(&mut self, sub: &SubChunkRenderData, frustum: &Frustum) {
        let instance_slot = sub.instance_slot.load(Ordering::Acquire);
        if instance_slot < 0 {
            return;
        }

        let gen = sub.gens[sub.current_gen()].read();
        let face_count = gen.face_count();
        if face_count == 0 || !frustum.is_aabb_visible(&gen.aabb) {
            return;
        }

        for bucket in gen.opaque.iter().flatten() {
            self.commands.opaque.push(DrawElementsIndirectCommand {
                count: bucket.face_count * 6,
                instance_count: 1,
                first_index: 0,
                base_vertex: bucket.id * BUCKET_VERTICES as u32,
                base_instance: instance_slot as u32,
            });
        }
        for bucket in gen.transparent.iter().flatten() {
            self.commands.transparent.push(DrawElementsIndirectCommand {
                count: bucket.face_count * 6,
                instance_count: 1,
                first_index: 0,
                base_vertex: bucket.id * BUCKET_VERTICES as u32,
                base_instance: instance_slot as u32,
            });
        }

        self.stats.face_count += face_count as u64;
        self.stats.sub_chunks_drawn += 1;
    }

    pub fn commands(&self) -> &FrameCommands {
        &self.commands
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }
}

impl Default for RenderDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frustum::Aabb;
    use crate::world::chunk::{BucketRef, SubChunkRenderData, TessState};

    fn wide_open_frustum() -> Frustum {
        let view_proj = RenderDriver::view_projection(
            Vec3::new(8.0, 128.0, 40.0),
            Vec3::new(0.0, 0.0, -1.0),
            70.0,
            16.0 / 9.0,
            10_000.0,
        );
        Frustum::from_view_projection(&view_proj)
    }

    fn sub_chunk_with_buckets() -> SubChunkRenderData {
        let sub = SubChunkRenderData::new();
        {
            let mut gen = sub.gens[0].write();
            gen.opaque[0] = Some(BucketRef {
                id: 5,
                face_count: 100,
            });
            gen.transparent[0] = Some(BucketRef {
                id: 9,
                face_count: 30,
            });
            gen.aabb = Aabb::new(Vec3::new(0.0, 120.0, 0.0), Vec3::new(16.0, 128.0, 16.0));
        }
        sub.instance_slot.store(3, Ordering::Release);
        sub.state
            .store(TessState::Done as u8, Ordering::Release);
        sub
    }

    #[test]
    fn commands_reference_bucket_ranges() {
        let sub = sub_chunk_with_buckets();
        let mut driver = RenderDriver::new();
        driver.begin_frame();
        driver.submit_sub_chunk(&sub, &wide_open_frustum());

        let commands = driver.commands();
        assert_eq!(commands.opaque.len(), 1);
        assert_eq!(commands.transparent.len(), 1);

        let opaque = commands.opaque[0];
        assert_eq!(opaque.count, 600);
        assert_eq!(opaque.base_vertex, 5 * BUCKET_VERTICES as u32);
        assert_eq!(opaque.base_instance, 3);
        assert_eq!(opaque.instance_count, 1);
        assert_eq!(opaque.first_index, 0);

        assert_eq!(driver.stats().face_count, 130);
        assert_eq!(driver.stats().sub_chunks_drawn, 1);
    }

    #[test]
    fn sub_chunk_without_instance_is_skipped() {
        let sub = sub_chunk_with_buckets();
        sub.instance_slot.store(-1, Ordering::Release);
        let mut driver = RenderDriver::new();
        driver.begin_frame();
        driver.submit_sub_chunk(&sub, &wide_open_frustum());
        assert!(driver.commands().opaque.is_empty());
    }

    #[test]
    fn command_struct_is_gl_sized() {
        assert_eq!(std::mem::size_of::<DrawElementsIndirectCommand>(), 20);
    }
}
