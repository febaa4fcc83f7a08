//! The offscreen capture target.
//!
//! [`OffscreenFramebuffer`] owns one color+depth target on a backend, sized
//! to the main view. It is allocated lazily, reallocated whole when the size
//! changes, and released explicitly with [`cleanup`](OffscreenFramebuffer::cleanup).
//!
//! Writing happens inside a [`WriteScope`]: opening it binds and clears the
//! target, dropping it rebinds whatever was bound before, so the host's main
//! target comes back even when a pass bails out early.

use serde::{Deserialize, Serialize};

use crate::backend::{RenderBackend, RenderDestination, RowOrder, TargetId, flip_rows};
use crate::color::Rgb;
use crate::error::BackendError;

/// Whether a capture target starts from the main view's depth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthCopyPolicy {
    /// Fresh depth; every pass resolves its own occlusion.
    #[default]
    Independent,
    /// Seed depth from the main target before drawing.
    CopyFromMain,
}

/// Offscreen color+depth target, sized on demand.
#[derive(Debug, Default)]
pub struct OffscreenFramebuffer {
    target: Option<(TargetId, u32, u32)>,
    depth_policy: DepthCopyPolicy,
}

impl OffscreenFramebuffer {
    pub fn new(depth_policy: DepthCopyPolicy) -> Self {
        Self {
            target: None,
            depth_policy,
        }
    }

    pub fn depth_policy(&self) -> DepthCopyPolicy {
        self.depth_policy
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.target.map(|(_, w, h)| (w, h))
    }

    pub fn target(&self) -> Option<TargetId> {
        self.target.map(|(id, _, _)| id)
    }

    /// Makes sure a `width`×`height` target exists. A target of another size
    /// is destroyed and replaced.
    pub fn ensure(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<TargetId, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        if let Some((id, w, h)) = self.target {
            if (w, h) == (width, height) && backend.target_size(id) == Some((w, h)) {
                return Ok(id);
            }
            tracing::debug!(from = ?(w, h), to = ?(width, height), "reallocating capture target");
            backend.destroy_target(id);
            self.target = None;
        }
        let id = backend.create_target(width, height)?;
        self.target = Some((id, width, height));
        Ok(id)
    }

    /// Binds and clears the target to `clear`, then seeds depth per policy.
    ///
    /// The previously bound destination is restored when the scope drops.
    pub fn begin_write<'a>(
        &self,
        backend: &'a mut dyn RenderBackend,
        clear: Rgb,
    ) -> Result<WriteScope<'a>, BackendError> {
        let (id, _, _) = self.target.ok_or(BackendError::InvalidSize {
            width: 0,
            height: 0,
        })?;
        let previous = backend.bound();
        backend.bind(RenderDestination::Offscreen(id))?;
        let scope = WriteScope { backend, previous };
        scope.backend.clear(clear)?;
        if self.depth_policy == DepthCopyPolicy::CopyFromMain {
            scope.backend.copy_main_depth(id)?;
        }
        Ok(scope)
    }

    /// Row-major RGB8 of the target, first row at the top of the image.
    pub fn read_pixels(&self, backend: &mut dyn RenderBackend) -> Result<Vec<u8>, BackendError> {
        let (id, width, height) = self.target.ok_or(BackendError::InvalidSize {
            width: 0,
            height: 0,
        })?;
        read_top_down_rgb(backend, RenderDestination::Offscreen(id), width, height)
    }

    /// Raw window depth of the target, first row at the top.
    pub fn read_depth(&self, backend: &mut dyn RenderBackend) -> Result<Vec<f32>, BackendError> {
        let (id, width, height) = self.target.ok_or(BackendError::InvalidSize {
            width: 0,
            height: 0,
        })?;
        read_top_down_depth(backend, RenderDestination::Offscreen(id), width, height)
    }

    /// Releases the target. Safe to call any number of times.
    pub fn cleanup(&mut self, backend: &mut dyn RenderBackend) {
        if let Some((id, _, _)) = self.target.take() {
            backend.destroy_target(id);
            tracing::debug!(target_id = id.0, "capture target released");
        }
    }
}

/// Reads RGB8 from any destination in top-down row order.
pub fn read_top_down_rgb(
    backend: &mut dyn RenderBackend,
    source: RenderDestination,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, BackendError> {
    let mut pixels = backend.read_color(source)?;
    check_len(pixels.len(), width, height, 3)?;
    if backend.row_order() == RowOrder::BottomUp {
        flip_rows(&mut pixels, width as usize * 3, height as usize);
    }
    Ok(pixels)
}

/// Reads raw depth from any destination in top-down row order.
pub fn read_top_down_depth(
    backend: &mut dyn RenderBackend,
    source: RenderDestination,
    width: u32,
    height: u32,
) -> Result<Vec<f32>, BackendError> {
    let mut depth = backend.read_depth(source)?;
    check_len(depth.len(), width, height, 1)?;
    if backend.row_order() == RowOrder::BottomUp {
        flip_rows(&mut depth, width as usize, height as usize);
    }
    Ok(depth)
}

fn check_len(len: usize, width: u32, height: u32, per_pixel: usize) -> Result<(), BackendError> {
    let expected = width as usize * height as usize * per_pixel;
    if len != expected {
        return Err(BackendError::Readback(format!(
            "expected {expected} values for {width}x{height}, got {len}"
        )));
    }
    Ok(())
}

/// Active write to the capture target; rebinds the previous destination on
/// drop.
pub struct WriteScope<'a> {
    backend: &'a mut dyn RenderBackend,
    previous: RenderDestination,
}

impl WriteScope<'_> {
    pub fn backend(&mut self) -> &mut dyn RenderBackend {
        &mut *self.backend
    }
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.backend.bind(self.previous) {
            tracing::warn!(error = %err, "previous target gone, falling back to main");
            let _ = self.backend.bind(RenderDestination::Main);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DrawBatch, SoftwareBackend};
    use crate::vertex::FlatVertex;

    fn top_half_quad() -> DrawBatch {
        let v = |x: f32, y: f32| FlatVertex {
            position: [x, y, 0.5],
            color: [255, 0, 0, 255],
            uv: [0.0, 0.0],
        };
        DrawBatch::solid(vec![
            v(-1.0, 0.0),
            v(1.0, 0.0),
            v(1.0, 1.0),
            v(1.0, 1.0),
            v(-1.0, 1.0),
            v(-1.0, 0.0),
        ])
    }

    #[test]
    fn ensure_reuses_and_reallocates() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut fb = OffscreenFramebuffer::default();
        let a = fb.ensure(&mut backend, 8, 8).unwrap();
        assert_eq!(fb.ensure(&mut backend, 8, 8).unwrap(), a);
        let b = fb.ensure(&mut backend, 4, 4).unwrap();
        assert_ne!(a, b);
        assert_eq!(backend.target_count(), 1);
        assert!(fb.ensure(&mut backend, 0, 4).is_err());
    }

    #[test]
    fn write_scope_restores_previous_binding() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut fb = OffscreenFramebuffer::default();
        let id = fb.ensure(&mut backend, 8, 8).unwrap();
        {
            let mut scope = fb.begin_write(&mut backend, Rgb::BACKGROUND).unwrap();
            assert_eq!(scope.backend().bound(), RenderDestination::Offscreen(id));
        }
        assert_eq!(backend.bound(), RenderDestination::Main);
    }

    #[test]
    fn readback_is_top_down() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut fb = OffscreenFramebuffer::default();
        fb.ensure(&mut backend, 4, 4).unwrap();
        {
            let mut scope = fb.begin_write(&mut backend, Rgb::BACKGROUND).unwrap();
            scope.backend().draw(&top_half_quad()).unwrap();
        }
        let pixels = fb.read_pixels(&mut backend).unwrap();
        // first row is the top of the image
        assert_eq!(&pixels[..3], &[255, 0, 0]);
        assert_eq!(&pixels[pixels.len() - 3..], &[0, 0, 0]);

        let depth = fb.read_depth(&mut backend).unwrap();
        assert!((depth[0] - 0.5).abs() < 1e-6);
        assert_eq!(depth[depth.len() - 1], 1.0);
    }

    #[test]
    fn depth_copy_policy_seeds_depth() {
        let mut backend = SoftwareBackend::new(4, 4);
        backend.draw(&top_half_quad()).unwrap();

        let mut fb = OffscreenFramebuffer::new(DepthCopyPolicy::CopyFromMain);
        fb.ensure(&mut backend, 4, 4).unwrap();
        drop(fb.begin_write(&mut backend, Rgb::BACKGROUND).unwrap());
        let depth = fb.read_depth(&mut backend).unwrap();
        assert!((depth[0] - 0.5).abs() < 1e-6);

        let mut independent = OffscreenFramebuffer::default();
        independent.ensure(&mut backend, 4, 4).unwrap();
        drop(independent.begin_write(&mut backend, Rgb::BACKGROUND).unwrap());
        assert!(independent.read_depth(&mut backend).unwrap().iter().all(|&d| d == 1.0));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut fb = OffscreenFramebuffer::default();
        fb.ensure(&mut backend, 4, 4).unwrap();
        fb.cleanup(&mut backend);
        fb.cleanup(&mut backend);
        assert_eq!(backend.target_count(), 0);
        assert!(fb.read_pixels(&mut backend).is_err());
    }
}
