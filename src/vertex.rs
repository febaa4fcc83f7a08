//! Per-vertex emission: the seam where the override pipeline intercepts
//! host geometry.
//!
//! Hosts emit geometry one attribute at a time into a [`VertexSink`], the same
//! way an immediate-mode vertex consumer works: `vertex`, then any of `color`,
//! `uv`, `overlay`, `light`, `normal`, then `end_vertex`. Every three finished
//! vertices form a triangle.
//!
//! [`BatchBuilder`] is the terminal sink: it bakes the current model matrix
//! into positions and collects [`FlatVertex`] values for a backend draw.

use glam::{Mat4, Vec2, Vec3};

use crate::mesh::Vertex3d;

/// Receives vertex attributes from host draw code.
pub trait VertexSink {
    /// Starts a vertex at `position` (object-local space).
    fn vertex(&mut self, position: Vec3);
    /// RGBA color of the current vertex.
    fn color(&mut self, rgba: [u8; 4]);
    /// Texture coordinate of the current vertex.
    fn uv(&mut self, uv: Vec2);
    /// Overlay (damage/hurt tint) coordinates.
    fn overlay(&mut self, u: i32, v: i32);
    /// Packed block/sky light levels.
    fn light(&mut self, block: i32, sky: i32);
    /// Surface normal of the current vertex.
    fn normal(&mut self, normal: Vec3);
    /// Finishes the current vertex.
    fn end_vertex(&mut self);

    /// Emits a whole mesh vertex with a color.
    fn emit(&mut self, v: &Vertex3d, rgba: [u8; 4]) {
        self.vertex(Vec3::from(v.position));
        self.color(rgba);
        self.uv(Vec2::from(v.uv));
        self.normal(Vec3::from(v.normal));
        self.end_vertex();
    }

    /// Emits an indexed triangle list.
    fn emit_indexed(&mut self, vertices: &[Vertex3d], indices: &[u32], rgba: [u8; 4]) {
        for &i in indices {
            if let Some(v) = vertices.get(i as usize) {
                self.emit(v, rgba);
            }
        }
    }
}

impl<S: VertexSink + ?Sized> VertexSink for &mut S {
    fn vertex(&mut self, position: Vec3) {
        (**self).vertex(position)
    }
    fn color(&mut self, rgba: [u8; 4]) {
        (**self).color(rgba)
    }
    fn uv(&mut self, uv: Vec2) {
        (**self).uv(uv)
    }
    fn overlay(&mut self, u: i32, v: i32) {
        (**self).overlay(u, v)
    }
    fn light(&mut self, block: i32, sky: i32) {
        (**self).light(block, sky)
    }
    fn normal(&mut self, normal: Vec3) {
        (**self).normal(normal)
    }
    fn end_vertex(&mut self) {
        (**self).end_vertex()
    }
}

/// Vertex format consumed by the flat-fill programs (24 bytes).
///
/// | Attribute | Format    | Offset | Location |
/// |-----------|-----------|--------|----------|
/// | position  | Float32x3 | 0      | 0        |
/// | color     | Unorm8x4  | 12     | 1        |
/// | uv        | Float32x2 | 16     | 2        |
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FlatVertex {
    pub position: [f32; 3],
    pub color: [u8; 4],
    pub uv: [f32; 2],
}

impl FlatVertex {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<FlatVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Unorm8x4,
            },
            wgpu::VertexAttribute {
                offset: 16,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };
}

const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Terminal sink collecting world-space [`FlatVertex`] values.
#[derive(Debug)]
pub struct BatchBuilder {
    model: Mat4,
    current: FlatVertex,
    started: bool,
    vertices: Vec<FlatVertex>,
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self {
            model: Mat4::IDENTITY,
            current: FlatVertex {
                color: WHITE,
                ..Default::default()
            },
            started: false,
            vertices: Vec::new(),
        }
    }

    /// Matrix applied to every following `vertex` position.
    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Takes the complete triangles collected so far; a trailing partial
    /// triangle is discarded.
    pub fn take(&mut self) -> Vec<FlatVertex> {
        let complete = self.vertices.len() - self.vertices.len() % 3;
        self.vertices.truncate(complete);
        std::mem::take(&mut self.vertices)
    }
}

impl VertexSink for BatchBuilder {
    fn vertex(&mut self, position: Vec3) {
        if self.started {
            self.end_vertex();
        }
        self.current.position = self.model.transform_point3(position).to_array();
        self.started = true;
    }

    fn color(&mut self, rgba: [u8; 4]) {
        self.current.color = rgba;
    }

    fn uv(&mut self, uv: Vec2) {
        self.current.uv = uv.to_array();
    }

    fn overlay(&mut self, _u: i32, _v: i32) {}

    fn light(&mut self, _block: i32, _sky: i32) {}

    fn normal(&mut self, _normal: Vec3) {}

    fn end_vertex(&mut self) {
        if !self.started {
            return;
        }
        self.vertices.push(self.current);
        self.current = FlatVertex {
            color: WHITE,
            ..Default::default()
        };
        self.started = false;
    }
}

/// Sink that discards everything (suppressed batches).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl VertexSink for NullSink {
    fn vertex(&mut self, _position: Vec3) {}
    fn color(&mut self, _rgba: [u8; 4]) {}
    fn uv(&mut self, _uv: Vec2) {}
    fn overlay(&mut self, _u: i32, _v: i32) {}
    fn light(&mut self, _block: i32, _sky: i32) {}
    fn normal(&mut self, _normal: Vec3) {}
    fn end_vertex(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_vertex_is_24_bytes() {
        assert_eq!(std::mem::size_of::<FlatVertex>(), 24);
    }

    #[test]
    fn builder_applies_model_and_drops_partial_triangles() {
        let mut builder = BatchBuilder::new();
        builder.set_model(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        for i in 0..4 {
            builder.vertex(Vec3::new(i as f32, 0.0, 0.0));
            builder.color([10, 20, 30, 255]);
            builder.end_vertex();
        }
        let tris = builder.take();
        assert_eq!(tris.len(), 3);
        assert_eq!(tris[1].position, [2.0, 2.0, 3.0]);
        assert_eq!(tris[0].color, [10, 20, 30, 255]);
        assert!(builder.is_empty());
    }

    #[test]
    fn vertex_without_end_is_closed_by_next_vertex() {
        let mut builder = BatchBuilder::new();
        builder.vertex(Vec3::ZERO);
        builder.vertex(Vec3::X);
        builder.vertex(Vec3::Y);
        builder.end_vertex();
        assert_eq!(builder.len(), 3);
        assert_eq!(builder.take()[0].color, WHITE);
    }
}
