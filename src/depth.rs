//! Depth post-processing: raw device depth to normalized linear depth.
//!
//! Depth buffers store window-space depth `d` in `[0, 1]` with most of the
//! precision packed near the camera. For a perspective projection with near
//! plane `n` and far plane `f` the eye distance is
//!
//! ```text
//! z = n * f / (f - d * (f - n))
//! ```
//!
//! which is the same inversion whether the API's clip space is `[-1, 1]`
//! (OpenGL) or `[0, 1]` (wgpu, D3D, Metal) because both map to the same
//! window-space value. The result is normalized to `(z - n) / (f - n)` so
//! `0.0` is the near plane and `1.0` the far plane (or sky).

use serde::{Deserialize, Serialize};

use crate::error::DepthRangeError;

/// Raw samples within this distance of 0 or 1 snap to exactly 0.0 or 1.0.
pub const DEPTH_EPSILON: f32 = 1e-4;

/// Camera near/far clip planes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthRange {
    near: f32,
    far: f32,
}

impl DepthRange {
    pub fn new(near: f32, far: f32) -> Result<Self, DepthRangeError> {
        if !(near > 0.0) {
            return Err(DepthRangeError::NonPositiveNear(near));
        }
        if !(far > near) {
            return Err(DepthRangeError::FarNotBeyondNear { near, far });
        }
        Ok(Self { near, far })
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }
}

/// Converts one raw depth sample to normalized linear depth.
#[inline]
pub fn linearize_sample(raw: f32, range: DepthRange) -> f32 {
    if raw >= 1.0 - DEPTH_EPSILON {
        return 1.0;
    }
    if raw <= DEPTH_EPSILON {
        return 0.0;
    }

    let (n, f) = (range.near, range.far);
    let eye = (n * f) / (f - raw * (f - n));
    ((eye - n) / (f - n)).clamp(0.0, 1.0)
}

/// Converts a whole raw depth buffer to normalized linear depth.
pub fn linearize(raw: &[f32], range: DepthRange) -> Vec<f32> {
    raw.iter().map(|&d| linearize_sample(d, range)).collect()
}

/// Maps `[0, 1]` depth to 8-bit gray, replicated over R, G and B.
///
/// Near is black, far is white. Values outside `[0, 1]` are clamped.
pub fn to_grayscale(linear: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(linear.len() * 3);
    for &d in linear {
        let v = (d * 255.0).clamp(0.0, 255.0) as u8;
        out.extend_from_slice(&[v, v, v]);
    }
    out
}

/// Power-curve remap for visualization.
///
/// `gamma < 1` spreads out near-field detail, `gamma > 1` far-field detail.
/// Not applied to the canonical depth output.
pub fn enhance_contrast(depth: &[f32], gamma: f32) -> Vec<f32> {
    depth.iter().map(|&d| d.max(0.0).powf(gamma)).collect()
}

/// Min and max of a depth buffer, for diagnostics.
pub fn depth_bounds(depth: &[f32]) -> Option<(f32, f32)> {
    depth.iter().fold(None, |acc, &d| match acc {
        None => Some((d, d)),
        Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
    })
}
