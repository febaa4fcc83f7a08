//! Deterministic CPU rasterizer.
//!
//! Rows are stored bottom-up, like a GL framebuffer, so readback exercises
//! the vertical flip in the framebuffer manager. Triangles are clipped
//! against the near plane, sampled at pixel centers, depth tested with
//! `Less`, and filled with the interpolated vertex color rounded to 8 bits.

use std::collections::HashMap;

use glam::{Mat4, Vec2, Vec4};

use super::{
    ALPHA_CUTOFF, DrawBatch, FlatProgram, RenderBackend, RenderDestination, RowOrder, TargetId,
    TextureId,
};
use crate::color::Rgb;
use crate::error::BackendError;
use crate::vertex::FlatVertex;

#[derive(Clone, Debug)]
struct Surface {
    width: u32,
    height: u32,
    color: Vec<[u8; 3]>,
    depth: Vec<f32>,
}

impl Surface {
    fn new(width: u32, height: u32) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![[0, 0, 0]; n],
            depth: vec![1.0; n],
        }
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[derive(Clone, Debug)]
struct SoftTexture {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl SoftTexture {
    /// Nearest-neighbour alpha with repeat addressing.
    fn alpha(&self, uv: Vec2) -> f32 {
        let u = uv.x - uv.x.floor();
        let v = uv.y - uv.y.floor();
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        let i = (y * self.width + x) as usize * 4 + 3;
        self.rgba[i] as f32 / 255.0
    }
}

#[derive(Clone, Copy, Debug)]
struct ClipVertex {
    pos: Vec4,
    color: Vec4,
    uv: Vec2,
}

impl ClipVertex {
    fn lerp(&self, other: &ClipVertex, t: f32) -> ClipVertex {
        ClipVertex {
            pos: self.pos.lerp(other.pos, t),
            color: self.color.lerp(other.color, t),
            uv: self.uv.lerp(other.uv, t),
        }
    }
}

/// CPU implementation of [`RenderBackend`].
#[derive(Debug)]
pub struct SoftwareBackend {
    main: Surface,
    targets: HashMap<TargetId, Surface>,
    textures: HashMap<TextureId, SoftTexture>,
    next_target: u32,
    next_texture: u32,
    bound: RenderDestination,
    transforms: Vec<Mat4>,
    triangles_drawn: u64,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            main: Surface::new(width, height),
            targets: HashMap::new(),
            textures: HashMap::new(),
            next_target: 1,
            next_texture: 1,
            bound: RenderDestination::Main,
            transforms: Vec::new(),
            triangles_drawn: 0,
        }
    }

    /// Resizes the main target, clearing it.
    pub fn resize_main(&mut self, width: u32, height: u32) {
        self.main = Surface::new(width, height);
    }

    /// Live offscreen targets.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Depth of the transform stack.
    pub fn transform_depth(&self) -> usize {
        self.transforms.len()
    }

    pub fn triangles_drawn(&self) -> u64 {
        self.triangles_drawn
    }

    fn surface(&self, destination: RenderDestination) -> Result<&Surface, BackendError> {
        match destination {
            RenderDestination::Main => Ok(&self.main),
            RenderDestination::Offscreen(id) => {
                self.targets.get(&id).ok_or(BackendError::UnknownTarget(id))
            }
        }
    }

    fn bound_surface_mut(&mut self) -> Result<&mut Surface, BackendError> {
        match self.bound {
            RenderDestination::Main => Ok(&mut self.main),
            RenderDestination::Offscreen(id) => self
                .targets
                .get_mut(&id)
                .ok_or(BackendError::UnknownTarget(id)),
        }
    }
}

impl RenderBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn main_size(&self) -> (u32, u32) {
        self.main.size()
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::BottomUp
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        let id = TargetId(self.next_target);
        self.next_target += 1;
        self.targets.insert(id, Surface::new(width, height));
        Ok(id)
    }

    fn destroy_target(&mut self, target: TargetId) {
        self.targets.remove(&target);
        if self.bound == RenderDestination::Offscreen(target) {
            self.bound = RenderDestination::Main;
        }
    }

    fn target_size(&self, target: TargetId) -> Option<(u32, u32)> {
        self.targets.get(&target).map(Surface::size)
    }

    fn bind(&mut self, destination: RenderDestination) -> Result<(), BackendError> {
        self.surface(destination)?;
        self.bound = destination;
        Ok(())
    }

    fn bound(&self) -> RenderDestination {
        self.bound
    }

    fn clear(&mut self, color: Rgb) -> Result<(), BackendError> {
        let surface = self.bound_surface_mut()?;
        surface.color.fill(color.to_array());
        surface.depth.fill(1.0);
        Ok(())
    }

    fn copy_main_depth(&mut self, target: TargetId) -> Result<(), BackendError> {
        let surface = self
            .targets
            .get_mut(&target)
            .ok_or(BackendError::UnknownTarget(target))?;
        if surface.size() != self.main.size() {
            return Err(BackendError::SizeMismatch {
                expected: self.main.size(),
                found: surface.size(),
            });
        }
        surface.depth.copy_from_slice(&self.main.depth);
        Ok(())
    }

    fn push_transform(&mut self, view_projection: Mat4) {
        self.transforms.push(view_projection);
    }

    fn pop_transform(&mut self) -> Result<(), BackendError> {
        self.transforms
            .pop()
            .map(|_| ())
            .ok_or(BackendError::TransformUnderflow)
    }

    fn draw(&mut self, batch: &DrawBatch) -> Result<(), BackendError> {
        let Self {
            main,
            targets,
            textures,
            bound,
            transforms,
            triangles_drawn,
            ..
        } = self;

        let view_projection = transforms.last().copied().unwrap_or(Mat4::IDENTITY);
        let texture = match (batch.program, batch.texture) {
            (FlatProgram::TexturedAlphaTest, Some(id)) => {
                Some(textures.get(&id).ok_or(BackendError::UnknownTexture(id))?)
            }
            _ => None,
        };
        let surface = match *bound {
            RenderDestination::Main => main,
            RenderDestination::Offscreen(id) => {
                targets.get_mut(&id).ok_or(BackendError::UnknownTarget(id))?
            }
        };

        for tri in batch.vertices.chunks_exact(3) {
            let clip = [tri[0], tri[1], tri[2]].map(|v| to_clip(&v, view_projection));
            let polygon = clip_near(&clip);
            for i in 1..polygon.len().saturating_sub(1) {
                let sub = [polygon[0], polygon[i], polygon[i + 1]];
                if raster_triangle(surface, &sub, batch.cull_back_faces, texture) {
                    *triangles_drawn += 1;
                }
            }
        }
        Ok(())
    }

    fn read_color(&mut self, source: RenderDestination) -> Result<Vec<u8>, BackendError> {
        let surface = self.surface(source)?;
        Ok(surface.color.iter().flatten().copied().collect())
    }

    fn read_depth(&mut self, source: RenderDestination) -> Result<Vec<f32>, BackendError> {
        Ok(self.surface(source)?.depth.clone())
    }

    fn upload_texture(
        &mut self,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<TextureId, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(BackendError::Device(format!(
                "texture data is {} bytes, expected {expected}",
                rgba.len()
            )));
        }
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(
            id,
            SoftTexture {
                width,
                height,
                rgba: rgba.to_vec(),
            },
        );
        Ok(id)
    }
}

fn to_clip(v: &FlatVertex, view_projection: Mat4) -> ClipVertex {
    let [x, y, z] = v.position;
    let [r, g, b, a] = v.color;
    ClipVertex {
        pos: view_projection * Vec4::new(x, y, z, 1.0),
        color: Vec4::new(r as f32, g as f32, b as f32, a as f32),
        uv: Vec2::from(v.uv),
    }
}

/// Sutherland-Hodgman against `z >= 0` (the `[0, 1]` depth near plane).
fn clip_near(tri: &[ClipVertex; 3]) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let a = &tri[i];
        let b = &tri[(i + 1) % 3];
        let (da, db) = (a.pos.z, b.pos.z);
        if da >= 0.0 {
            out.push(*a);
        }
        if (da >= 0.0) != (db >= 0.0) {
            out.push(a.lerp(b, da / (da - db)));
        }
    }
    out
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Rasterizes one clipped triangle. Returns false when culled or degenerate.
fn raster_triangle(
    surface: &mut Surface,
    tri: &[ClipVertex; 3],
    cull_back_faces: bool,
    texture: Option<&SoftTexture>,
) -> bool {
    let (w, h) = (surface.width as f32, surface.height as f32);

    let mut screen = [Vec2::ZERO; 3];
    let mut depth = [0.0f32; 3];
    let mut inv_w = [0.0f32; 3];
    for (i, v) in tri.iter().enumerate() {
        if v.pos.w <= 0.0 {
            return false;
        }
        let ndc = v.pos.truncate() / v.pos.w;
        // y-up: row 0 is the bottom of the surface
        screen[i] = Vec2::new((ndc.x * 0.5 + 0.5) * w, (ndc.y * 0.5 + 0.5) * h);
        depth[i] = ndc.z;
        inv_w[i] = 1.0 / v.pos.w;
    }

    let mut area = edge(screen[0], screen[1], screen[2]);
    if area == 0.0 || !area.is_finite() {
        return false;
    }
    if cull_back_faces && area < 0.0 {
        return false;
    }
    let sign = area.signum();
    area *= sign;

    let lo = screen[0].min(screen[1]).min(screen[2]);
    let hi = screen[0].max(screen[1]).max(screen[2]);
    let x0 = lo.x.floor().max(0.0) as u32;
    let y0 = lo.y.floor().max(0.0) as u32;
    let x1 = (hi.x.ceil().min(w) as u32).min(surface.width);
    let y1 = (hi.y.ceil().min(h) as u32).min(surface.height);

    for py in y0..y1 {
        for px in x0..x1 {
            let p = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
            let b0 = edge(screen[1], screen[2], p) * sign;
            let b1 = edge(screen[2], screen[0], p) * sign;
            let b2 = edge(screen[0], screen[1], p) * sign;
            if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                continue;
            }
            let (b0, b1, b2) = (b0 / area, b1 / area, b2 / area);

            let z = b0 * depth[0] + b1 * depth[1] + b2 * depth[2];
            if !(0.0..=1.0).contains(&z) {
                continue;
            }
            let idx = (py * surface.width + px) as usize;
            if z >= surface.depth[idx] {
                continue;
            }

            if let Some(texture) = texture {
                let iw = b0 * inv_w[0] + b1 * inv_w[1] + b2 * inv_w[2];
                let uv = (tri[0].uv * (b0 * inv_w[0])
                    + tri[1].uv * (b1 * inv_w[1])
                    + tri[2].uv * (b2 * inv_w[2]))
                    / iw;
                if texture.alpha(uv) < ALPHA_CUTOFF {
                    continue;
                }
            }

            let c = tri[0].color * b0 + tri[1].color * b1 + tri[2].color * b2;
            surface.color[idx] = [c.x, c.y, c.z].map(|v| v.round().clamp(0.0, 255.0) as u8);
            surface.depth[idx] = z;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32, y: f32, z: f32, color: [u8; 4]) -> FlatVertex {
        FlatVertex {
            position: [x, y, z],
            color,
            uv: [0.0, 0.0],
        }
    }

    fn quad(z: f32, color: [u8; 4]) -> Vec<FlatVertex> {
        vec![
            vertex(-1.0, -1.0, z, color),
            vertex(1.0, -1.0, z, color),
            vertex(1.0, 1.0, z, color),
            vertex(1.0, 1.0, z, color),
            vertex(-1.0, 1.0, z, color),
            vertex(-1.0, -1.0, z, color),
        ]
    }

    #[test]
    fn fullscreen_quad_covers_every_pixel() {
        let mut backend = SoftwareBackend::new(8, 8);
        backend.clear(Rgb::BACKGROUND).unwrap();
        backend.draw(&DrawBatch::solid(quad(0.5, [200, 100, 50, 255]))).unwrap();
        let pixels = backend.read_color(RenderDestination::Main).unwrap();
        assert!(pixels.chunks(3).all(|p| p == [200, 100, 50]));
        let depth = backend.read_depth(RenderDestination::Main).unwrap();
        assert!(depth.iter().all(|&d| (d - 0.5).abs() < 1e-6));
    }

    #[test]
    fn nearer_geometry_wins_regardless_of_order() {
        let mut backend = SoftwareBackend::new(4, 4);
        backend.clear(Rgb::BACKGROUND).unwrap();
        backend.draw(&DrawBatch::solid(quad(0.2, [255, 0, 0, 255]))).unwrap();
        backend.draw(&DrawBatch::solid(quad(0.8, [0, 255, 0, 255]))).unwrap();
        let pixels = backend.read_color(RenderDestination::Main).unwrap();
        assert_eq!(&pixels[..3], &[255, 0, 0]);
    }

    #[test]
    fn back_faces_are_culled_on_request() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut cw = quad(0.5, [255, 255, 255, 255]);
        cw.reverse();
        let mut batch = DrawBatch::solid(cw);
        batch.cull_back_faces = true;
        backend.draw(&batch).unwrap();
        assert_eq!(backend.triangles_drawn(), 0);
        batch.cull_back_faces = false;
        backend.draw(&batch).unwrap();
        assert_eq!(backend.triangles_drawn(), 2);
    }

    #[test]
    fn transparent_texels_are_discarded() {
        let mut backend = SoftwareBackend::new(4, 4);
        let texture = backend.upload_texture(&[255, 255, 255, 0], 1, 1).unwrap();
        backend.clear(Rgb::new(1, 2, 3)).unwrap();
        let batch = DrawBatch {
            program: FlatProgram::TexturedAlphaTest,
            cull_back_faces: false,
            texture: Some(texture),
            vertices: quad(0.5, [255, 0, 0, 255]),
        };
        backend.draw(&batch).unwrap();
        let pixels = backend.read_color(RenderDestination::Main).unwrap();
        assert!(pixels.chunks(3).all(|p| p == [1, 2, 3]));
    }

    #[test]
    fn geometry_behind_the_camera_is_clipped() {
        let mut backend = SoftwareBackend::new(4, 4);
        backend.push_transform(Mat4::perspective_rh(1.0, 1.0, 0.1, 10.0));
        backend.draw(&DrawBatch::solid(quad(5.0, [255, 255, 255, 255]))).unwrap();
        let pixels = backend.read_color(RenderDestination::Main).unwrap();
        assert!(pixels.iter().all(|&v| v == 0));
        backend.pop_transform().unwrap();
        assert!(matches!(
            backend.pop_transform(),
            Err(BackendError::TransformUnderflow)
        ));
    }

    #[test]
    fn targets_are_independent_of_main() {
        let mut backend = SoftwareBackend::new(4, 4);
        let target = backend.create_target(4, 4).unwrap();
        backend.bind(RenderDestination::Offscreen(target)).unwrap();
        backend.clear(Rgb::new(9, 9, 9)).unwrap();
        let main = backend.read_color(RenderDestination::Main).unwrap();
        assert!(main.iter().all(|&v| v == 0));

        backend.destroy_target(target);
        assert_eq!(backend.bound(), RenderDestination::Main);
        assert!(backend.bind(RenderDestination::Offscreen(target)).is_err());
        assert!(backend.create_target(0, 4).is_err());
    }
}
