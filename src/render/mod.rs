pub mod driver;
pub mod frustum;
pub mod slab;
pub mod vertex;

pub use driver::{DrawElementsIndirectCommand, FrameCommands, RenderDriver};
pub use frustum::{Aabb, Frustum};
pub use slab::{GpuSlab, MappedBuffer, BUCKET_FACES, BUCKET_VERTICES};
pub use vertex::PackedVertex;
