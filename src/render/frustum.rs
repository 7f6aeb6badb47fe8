//! View frustum extraction and AABB visibility.

use glam::{Mat4, Vec3, Vec4};

/// Axis-aligned box. The default is the empty box (inverted bounds), so
/// unioning points into it always works.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn union_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union_box(&mut self, other: Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// One clip plane in constant-normal form: a point `p` is on the inside
/// half-space when `normal.dot(p) + distance >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    /// Builds a normalized plane from raw `(a, b, c, d)` coefficients.
    fn from_coefficients(v: Vec4) -> Self {
        let length = v.truncate().length();
        if length > 0.0 {
            Self {
                normal: v.truncate() / length,
                distance: v.w / length,
            }
        } else {
            Self {
                normal: Vec3::ZERO,
                distance: v.w,
            }
        }
    }

    /// Signed distance from the plane to the box vertex that lies farthest
    /// along the plane normal.
    fn distance_to_farthest_vertex(&self, center: Vec3, half_extents: Vec3) -> f32 {
        self.normal.dot(center) + self.normal.abs().dot(half_extents) + self.distance
    }
}

#[derive(Debug, Clone)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the six clip planes from a view-projection matrix: each is
    /// the matrix's w row plus or minus one of the x/y/z rows, giving
    /// left/right, bottom/top and near/far in that order.
    pub fn from_view_projection(view_proj: &Mat4) -> Self {
        let x = view_proj.row(0);
        let y = view_proj.row(1);
        let z = view_proj.row(2);
        let w = view_proj.row(3);

        Self {
            planes: [
                Plane::from_coefficients(w + x),
                Plane::from_coefficients(w - x),
                Plane::from_coefficients(w + y),
                Plane::from_coefficients(w - y),
                Plane::from_coefficients(w + z),
                Plane::from_coefficients(w - z),
            ],
        }
    }

    /// A box is culled once every vertex is behind any single plane, i.e.
    /// when even the vertex farthest along that plane's normal has negative
    /// signed distance.
    pub fn is_aabb_visible(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        let center = aabb.center();
        let half_extents = aabb.half_extents();
        self.planes
            .iter()
            .all(|plane| plane.distance_to_farthest_vertex(center, half_extents) >= 0.0)
    }
}
