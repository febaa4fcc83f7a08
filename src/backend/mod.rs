//! Render backends the capture pipeline draws through.
//!
//! The pipeline only needs a small slice of a renderer: offscreen targets,
//! a view-projection stack, flat-colored triangle batches and readback. That
//! slice is the [`RenderBackend`] trait. Two implementations ship with the
//! crate:
//!
//! - [`SoftwareBackend`]: a deterministic CPU rasterizer, used headless and
//!   by the test suite
//! - [`WgpuBackend`]: an offscreen wgpu device running the flat-fill WGSL
//!   programs

mod software;
mod wgpu_backend;

pub use software::SoftwareBackend;
pub use wgpu_backend::WgpuBackend;

use glam::Mat4;

use crate::color::Rgb;
use crate::error::BackendError;
use crate::layer::FillMode;
use crate::vertex::FlatVertex;

/// Handle of an offscreen color+depth target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

/// Handle of an uploaded RGBA texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Where draws land.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderDestination {
    /// The host's on-screen target.
    #[default]
    Main,
    Offscreen(TargetId),
}

/// Vertical order of rows returned by readback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowOrder {
    /// First row is the bottom of the image (GL convention).
    BottomUp,
    /// First row is the top of the image.
    TopDown,
}

/// Shader program a batch is drawn with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlatProgram {
    /// Vertex color out, fragments discarded where texture alpha < 0.1.
    TexturedAlphaTest,
    /// Vertex color out, no texture input.
    Solid,
}

impl FlatProgram {
    /// Program for a fill mode; `None` for suppressed batches.
    pub fn for_fill(mode: FillMode) -> Option<Self> {
        match mode {
            FillMode::Suppressed => None,
            FillMode::TexturedFlatFill { .. } => Some(FlatProgram::TexturedAlphaTest),
            FillMode::SolidFlatFill => Some(FlatProgram::Solid),
        }
    }
}

/// Fragments with texture alpha below this are discarded.
pub const ALPHA_CUTOFF: f32 = 0.1;

/// One flat-colored triangle list ready for a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawBatch {
    pub program: FlatProgram,
    pub cull_back_faces: bool,
    /// Sampled for alpha only, by [`FlatProgram::TexturedAlphaTest`].
    pub texture: Option<TextureId>,
    pub vertices: Vec<FlatVertex>,
}

impl DrawBatch {
    pub fn solid(vertices: Vec<FlatVertex>) -> Self {
        Self {
            program: FlatProgram::Solid,
            cull_back_faces: false,
            texture: None,
            vertices,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }
}

/// The part of a renderer the capture pipeline drives.
///
/// All draws go to the currently bound destination, with depth test `Less`,
/// depth writes on, and no blending. Positions in [`DrawBatch`]es are world
/// space (or whatever space the top of the transform stack expects).
pub trait RenderBackend {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Size of the host's main target in pixels.
    fn main_size(&self) -> (u32, u32);

    /// Row order of [`read_color`](Self::read_color) and
    /// [`read_depth`](Self::read_depth).
    fn row_order(&self) -> RowOrder;

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, BackendError>;

    /// Releases a target. Unknown handles are ignored.
    fn destroy_target(&mut self, target: TargetId);

    fn target_size(&self, target: TargetId) -> Option<(u32, u32)>;

    fn bind(&mut self, destination: RenderDestination) -> Result<(), BackendError>;

    fn bound(&self) -> RenderDestination;

    /// Clears color to `color` and depth to 1.0 on the bound destination.
    fn clear(&mut self, color: Rgb) -> Result<(), BackendError>;

    /// Copies the main target's depth into `target`. Sizes must match.
    fn copy_main_depth(&mut self, target: TargetId) -> Result<(), BackendError>;

    /// Pushes a world-to-clip matrix used by following draws.
    fn push_transform(&mut self, view_projection: Mat4);

    fn pop_transform(&mut self) -> Result<(), BackendError>;

    fn draw(&mut self, batch: &DrawBatch) -> Result<(), BackendError>;

    /// RGB8 pixels of `source`, rows in [`row_order`](Self::row_order).
    fn read_color(&mut self, source: RenderDestination) -> Result<Vec<u8>, BackendError>;

    /// Raw window depth of `source`, rows in [`row_order`](Self::row_order).
    fn read_depth(&mut self, source: RenderDestination) -> Result<Vec<f32>, BackendError>;

    /// Uploads an RGBA8 texture, rows top-down.
    fn upload_texture(&mut self, rgba: &[u8], width: u32, height: u32)
    -> Result<TextureId, BackendError>;

    fn destination_size(&self, destination: RenderDestination) -> Option<(u32, u32)> {
        match destination {
            RenderDestination::Main => Some(self.main_size()),
            RenderDestination::Offscreen(id) => self.target_size(id),
        }
    }
}

/// Reverses the order of `height` rows of `row_len` elements in place.
pub fn flip_rows<T>(data: &mut [T], row_len: usize, height: usize) {
    if row_len == 0 {
        return;
    }
    for y in 0..height / 2 {
        let (top, bottom) = data.split_at_mut((height - 1 - y) * row_len);
        top[y * row_len..(y + 1) * row_len].swap_with_slice(&mut bottom[..row_len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_three_rows() {
        let mut data = vec![1, 1, 2, 2, 3, 3];
        flip_rows(&mut data, 2, 3);
        assert_eq!(data, vec![3, 3, 2, 2, 1, 1]);
    }

    #[test]
    fn flip_even_rows() {
        let mut data = vec![1, 2, 3, 4];
        flip_rows(&mut data, 1, 4);
        assert_eq!(data, vec![4, 3, 2, 1]);
    }

    #[test]
    fn suppressed_has_no_program() {
        assert_eq!(FlatProgram::for_fill(FillMode::Suppressed), None);
        assert_eq!(
            FlatProgram::for_fill(FillMode::SolidFlatFill),
            Some(FlatProgram::Solid)
        );
    }
}
