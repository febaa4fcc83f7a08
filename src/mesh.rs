//! CPU-side mesh geometry and object transforms.
//!
//! Capture passes re-emit geometry through a
//! [`VertexSink`](crate::vertex::VertexSink) every frame, so meshes live on the
//! CPU as plain vertex/index lists rather than in GPU buffers:
//!
//! - [`Vertex3d`]: position, normal and uv of one mesh vertex
//! - [`MeshData`]: an indexed triangle list, with a few built-in primitives
//! - [`Transform`]: position, rotation and scale of a placed object
//!
//! All built-in primitives use counter-clockwise winding for front faces, which
//! is what the back-face culling of block batches expects.
//!
//! ```
//! use segcap::{MeshData, Transform};
//! use glam::Vec3;
//!
//! let cube = MeshData::cube();
//! assert_eq!(cube.triangle_count(), 12);
//!
//! let placed = Transform::from_position(Vec3::new(0.0, 2.0, -5.0)).uniform_scale(2.0);
//! let (lo, hi) = cube.bounds(placed.matrix()).unwrap();
//! assert_eq!(lo, Vec3::new(-1.0, 1.0, -6.0));
//! assert_eq!(hi, Vec3::new(1.0, 3.0, -4.0));
//! ```

use glam::{Mat4, Quat, Vec3};

use crate::vertex::VertexSink;

/// One mesh vertex in model space.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    /// Unit surface normal.
    pub normal: [f32; 3],
    /// Texture coordinate, origin at the top-left of the texture.
    pub uv: [f32; 2],
}

impl Vertex3d {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Indexed triangle list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex3d>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Emits every triangle into `sink` with a single vertex color.
    pub fn emit(&self, sink: &mut dyn VertexSink, rgba: [u8; 4]) {
        sink.emit_indexed(&self.vertices, &self.indices, rgba);
    }

    /// World-space axis-aligned bounds under `model`.
    pub fn bounds(&self, model: Mat4) -> Option<(Vec3, Vec3)> {
        self.vertices.iter().fold(None, |acc, v| {
            let p = model.transform_point3(Vec3::from(v.position));
            match acc {
                None => Some((p, p)),
                Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
            }
        })
    }

    /// Unit cube spanning `[-0.5, 0.5]` on every axis, 24 vertices so each
    /// face keeps its own normal and full `[0, 1]` uv range.
    pub fn cube() -> Self {
        #[rustfmt::skip]
        let vertices = vec![
            // +Z
            Vertex3d::new([-0.5, -0.5,  0.5], [ 0.0,  0.0,  1.0], [0.0, 1.0]),
            Vertex3d::new([ 0.5, -0.5,  0.5], [ 0.0,  0.0,  1.0], [1.0, 1.0]),
            Vertex3d::new([ 0.5,  0.5,  0.5], [ 0.0,  0.0,  1.0], [1.0, 0.0]),
            Vertex3d::new([-0.5,  0.5,  0.5], [ 0.0,  0.0,  1.0], [0.0, 0.0]),
            // -Z
            Vertex3d::new([ 0.5, -0.5, -0.5], [ 0.0,  0.0, -1.0], [0.0, 1.0]),
            Vertex3d::new([-0.5, -0.5, -0.5], [ 0.0,  0.0, -1.0], [1.0, 1.0]),
            Vertex3d::new([-0.5,  0.5, -0.5], [ 0.0,  0.0, -1.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5, -0.5], [ 0.0,  0.0, -1.0], [0.0, 0.0]),
            // +Y
            Vertex3d::new([-0.5,  0.5,  0.5], [ 0.0,  1.0,  0.0], [0.0, 1.0]),
            Vertex3d::new([ 0.5,  0.5,  0.5], [ 0.0,  1.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([ 0.5,  0.5, -0.5], [ 0.0,  1.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([-0.5,  0.5, -0.5], [ 0.0,  1.0,  0.0], [0.0, 0.0]),
            // -Y
            Vertex3d::new([-0.5, -0.5, -0.5], [ 0.0, -1.0,  0.0], [0.0, 1.0]),
            Vertex3d::new([ 0.5, -0.5, -0.5], [ 0.0, -1.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([ 0.5, -0.5,  0.5], [ 0.0, -1.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([-0.5, -0.5,  0.5], [ 0.0, -1.0,  0.0], [0.0, 0.0]),
            // +X
            Vertex3d::new([ 0.5, -0.5,  0.5], [ 1.0,  0.0,  0.0], [0.0, 1.0]),
            Vertex3d::new([ 0.5, -0.5, -0.5], [ 1.0,  0.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([ 0.5,  0.5, -0.5], [ 1.0,  0.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5,  0.5], [ 1.0,  0.0,  0.0], [0.0, 0.0]),
            // -X
            Vertex3d::new([-0.5, -0.5, -0.5], [-1.0,  0.0,  0.0], [0.0, 1.0]),
            Vertex3d::new([-0.5, -0.5,  0.5], [-1.0,  0.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([-0.5,  0.5,  0.5], [-1.0,  0.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([-0.5,  0.5, -0.5], [-1.0,  0.0,  0.0], [0.0, 0.0]),
        ];

        let indices = (0..6u32)
            .flat_map(|face| {
                let b = face * 4;
                [b, b + 1, b + 2, b + 2, b + 3, b]
            })
            .collect();

        Self::new(vertices, indices)
    }

    /// Upward-facing square of side `size` on the XZ plane.
    pub fn plane(size: f32) -> Self {
        let half = size * 0.5;
        let up = [0.0, 1.0, 0.0];
        let vertices = vec![
            Vertex3d::new([-half, 0.0, half], up, [0.0, 1.0]),
            Vertex3d::new([half, 0.0, half], up, [1.0, 1.0]),
            Vertex3d::new([half, 0.0, -half], up, [1.0, 0.0]),
            Vertex3d::new([-half, 0.0, -half], up, [0.0, 0.0]),
        ];
        Self::new(vertices, vec![0, 1, 2, 2, 3, 0])
    }

    /// Two crossed vertical quads, the shape used for plants and item
    /// sprites. Each quad is emitted with both windings so it survives
    /// back-face culling from either side.
    pub fn cross_sprite() -> Self {
        let mut vertices = Vec::with_capacity(16);
        let mut indices = Vec::with_capacity(24);
        for (dx, dz) in [(0.5f32, 0.5f32), (0.5, -0.5)] {
            let n = Vec3::new(-dz, 0.0, dx).normalize();
            for (normal, order) in [(n, [0, 1, 2, 2, 3, 0]), (-n, [0, 3, 2, 2, 1, 0])] {
                let base = vertices.len() as u32;
                let normal = normal.to_array();
                vertices.push(Vertex3d::new([-dx, -0.5, -dz], normal, [0.0, 1.0]));
                vertices.push(Vertex3d::new([dx, -0.5, dz], normal, [1.0, 1.0]));
                vertices.push(Vertex3d::new([dx, 0.5, dz], normal, [1.0, 0.0]));
                vertices.push(Vertex3d::new([-dx, 0.5, -dz], normal, [0.0, 0.0]));
                indices.extend(order.iter().map(|i| base + i));
            }
        }
        Self::new(vertices, indices)
    }
}

/// Position, rotation and scale of a placed object.
///
/// Converts to a matrix in scale, rotate, translate order.
///
/// ```
/// use segcap::Transform;
/// use glam::{Quat, Vec3};
///
/// let t = Transform::new()
///     .position(Vec3::new(0.0, 5.0, -10.0))
///     .rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_4))
///     .uniform_scale(2.0);
/// assert_eq!(t.matrix().transform_point3(Vec3::ZERO), Vec3::new(0.0, 5.0, -10.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_wind_outward() {
        let cube = MeshData::cube();
        for tri in cube.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(cube.vertices[tri[i] as usize].position));
            let n = Vec3::from(cube.vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(n) > 0.0, "triangle {tri:?} winds inward");
        }
    }

    #[test]
    fn plane_faces_up() {
        let plane = MeshData::plane(2.0);
        let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(plane.vertices[i].position));
        assert!((b - a).cross(c - a).y > 0.0);
    }

    #[test]
    fn empty_mesh_has_no_bounds() {
        assert_eq!(MeshData::default().bounds(Mat4::IDENTITY), None);
    }
}
