//! Fixed pools of GPU vertex buckets and instance slots.
//!
//! The vertex pool is one persistently-mapped buffer carved into
//! equally-sized buckets of 1024 faces; the instance pool is one element per
//! sub-chunk draw. The slab owns both mappings and hands out integer ids;
//! everything else holds ids only. The mapping is coherent, so writers never
//! flush; the embedder's end-of-frame fence is the reuse barrier.

use crate::render::vertex::PackedVertex;
use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, Ordering};

pub const BUCKET_FACES: usize = 1024;
pub const BUCKET_VERTICES: usize = BUCKET_FACES * 4;
pub const BUCKET_BYTES: usize = BUCKET_VERTICES * std::mem::size_of::<PackedVertex>();

/// One element of the instance buffer: the chunk coordinates the vertex
/// shader offsets packed block positions with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ChunkInstance {
    pub chunk_coords: [i32; 2],
}

/// A persistently-mapped, coherent GPU buffer, or plain memory when running
/// headless. The pointer is stable for the buffer's lifetime.
pub struct MappedBuffer<T> {
    ptr: NonNull<T>,
    len: usize,
    // Keeps headless backing storage alive; None when the host owns the map.
    _owned: Option<Box<[T]>>,
}

// Safety: the buffer is a raw memory region; all access goes through
// `slice_mut`, whose caller contract guarantees exclusive ranges.
unsafe impl<T: Send> Send for MappedBuffer<T> {}
unsafe impl<T: Send> Sync for MappedBuffer<T> {}

impl<T: Pod> MappedBuffer<T> {
    /// Heap-backed buffer for headless use and tests.
    pub fn owned(len: usize) -> Self {
        let mut backing = vec![T::zeroed(); len].into_boxed_slice();
        let ptr = NonNull::new(backing.as_mut_ptr()).expect("non-empty buffer");
        Self {
            ptr,
            len,
            _owned: Some(backing),
        }
    }

    /// Wraps a pointer obtained from the host GPU context's persistent map.
    ///
    /// # Safety
    /// `ptr` must stay valid for `len` elements for the buffer's lifetime,
    /// and nothing outside this crate may alias writes into it.
    pub unsafe fn from_host_map(ptr: *mut T, len: usize) -> Self {
        Self {
            ptr: NonNull::new(ptr).expect("host map pointer is null"),
            len,
            _owned: None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// The caller must hold exclusive ownership of `start..start + count`
    /// for the lifetime of the returned slice.
    unsafe fn slice_mut(&self, start: usize, count: usize) -> &mut [T] {
        assert!(start + count <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(start), count)
    }
}

pub struct GpuSlab {
    vertices: MappedBuffer<PackedVertex>,
    instances: MappedBuffer<ChunkInstance>,
    free_buckets: Mutex<Vec<u32>>,
    free_instances: Mutex<Vec<u32>>,
    capacity: usize,
    /// Bytes of vertex data currently referenced by live buckets, for stats.
    used_vertex_bytes: AtomicI64,
}

impl GpuSlab {
    /// Slab over heap memory; the embedder swaps in host mappings with
    /// [`GpuSlab::with_buffers`] when a GPU context exists.
    pub fn headless(capacity: usize) -> Self {
        Self::with_buffers(
            MappedBuffer::owned(capacity * BUCKET_VERTICES),
            MappedBuffer::owned(capacity),
        )
    }

    pub fn with_buffers(
        vertices: MappedBuffer<PackedVertex>,
        instances: MappedBuffer<ChunkInstance>,
    ) -> Self {
        assert_eq!(vertices.len() % BUCKET_VERTICES, 0);
        let capacity = vertices.len() / BUCKET_VERTICES;
        assert_eq!(instances.len(), capacity);
        Self {
            vertices,
            instances,
            free_buckets: Mutex::new((0..capacity as u32).rev().collect()),
            free_instances: Mutex::new((0..capacity as u32).rev().collect()),
            capacity,
            used_vertex_bytes: AtomicI64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_bucket_count(&self) -> usize {
        self.free_buckets.lock().len()
    }

    pub fn free_instance_count(&self) -> usize {
        self.free_instances.lock().len()
    }

    pub fn used_vertex_bytes(&self) -> i64 {
        self.used_vertex_bytes.load(Ordering::Relaxed)
    }

    pub fn note_vertex_bytes(&self, delta: i64) {
        self.used_vertex_bytes.fetch_add(delta, Ordering::Relaxed);
    }

    /// Pops a free bucket id. Running out is a capacity sizing bug.
    pub fn alloc_bucket(&self) -> u32 {
        self.free_buckets
            .lock()
            .pop()
            .expect("vertex bucket pool exhausted")
    }

    pub fn free_bucket(&self, id: u32) {
        debug_assert!((id as usize) < self.capacity);
        self.free_buckets.lock().push(id);
    }

    pub fn alloc_instance(&self) -> u32 {
        self.free_instances
            .lock()
            .pop()
            .expect("instance slot pool exhausted")
    }

    pub fn free_instance(&self, id: u32) {
        debug_assert!((id as usize) < self.capacity);
        self.free_instances.lock().push(id);
    }

    /// Writer over a bucket's vertex range.
    ///
    /// # Safety
    /// `id` must be owned by the caller (allocated and not shared), so the
    /// range cannot alias another writer or an in-flight read.
    pub unsafe fn bucket_writer(&self, id: u32) -> BucketWriter<'_> {
        let verts = self.vertices.slice_mut(id as usize * BUCKET_VERTICES, BUCKET_VERTICES);
        BucketWriter { verts, cursor: 0 }
    }

    /// Reads a bucket's first `count` faces, for the embedder and tests.
    ///
    /// # Safety
    /// No writer may currently own `id`.
    pub unsafe fn bucket_faces(&self, id: u32, count: usize) -> &[PackedVertex] {
        assert!(count <= BUCKET_FACES);
        &*self.vertices.slice_mut(id as usize * BUCKET_VERTICES, count * 4)
    }

    /// Stores chunk coordinates into an owned instance slot.
    ///
    /// # Safety
    /// `id` must be owned by the caller.
    pub unsafe fn write_instance(&self, id: u32, coords: glam::IVec2) {
        let slot = self.instances.slice_mut(id as usize, 1);
        slot[0] = ChunkInstance {
            chunk_coords: [coords.x, coords.y],
        };
    }
}

/// Sequential face writer into one bucket.
pub struct BucketWriter<'a> {
    verts: &'a mut [PackedVertex],
    cursor: usize,
}

impl BucketWriter<'_> {
    /// Appends four vertices; returns false when the bucket is full.
    pub fn push_face(&mut self, face: [PackedVertex; 4]) -> bool {
        if self.cursor + 4 > self.verts.len() {
            return false;
        }
        self.verts[self.cursor..self.cursor + 4].copy_from_slice(&face);
        self.cursor += 4;
        true
    }

    pub fn face_count(&self) -> u32 {
        (self.cursor / 4) as u32
    }

    pub fn is_full(&self) -> bool {
        self.cursor == self.verts.len()
    }
}
