//! Error types shared across the capture pipeline.
//!
//! Each concern gets its own enum so callers can match on what went wrong
//! without string inspection. [`CaptureError`] is the umbrella used by the
//! orchestrator; it converts from every other error with `?`.

use thiserror::Error;

/// Failures reported by a [`RenderBackend`](crate::backend::RenderBackend).
#[derive(Debug, Error)]
pub enum BackendError {
    /// Target creation was asked for a zero-sized surface.
    #[error("invalid target size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    /// The requested target handle does not exist (already destroyed).
    #[error("unknown render target {0:?}")]
    UnknownTarget(crate::backend::TargetId),
    /// The requested texture handle does not exist.
    #[error("unknown texture {0:?}")]
    UnknownTexture(crate::backend::TextureId),
    /// The main and capture targets disagree on size where they must match.
    #[error("size mismatch: expected {expected:?}, found {found:?}")]
    SizeMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },
    /// Pop without a matching push on the transform stack.
    #[error("transform stack underflow")]
    TransformUnderflow,
    /// The GPU device rejected an operation.
    #[error("gpu device error: {0}")]
    Device(String),
    /// Mapping a readback buffer failed.
    #[error("readback failed: {0}")]
    Readback(String),
}

/// Misuse of the override pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OverrideError {
    /// `begin_override` was called while override mode was already active.
    #[error("override mode is already active; nesting is not supported")]
    AlreadyActive,
}

/// Failures raised by the host-side scene collaborators.
#[derive(Debug, Error)]
pub enum SceneError {
    /// Visible-set data (the host's culling result) is not available.
    #[error("visible set unavailable: {0}")]
    VisibleSetUnavailable(String),
    /// The visible-set provider speaks an interface version we do not know.
    #[error("unsupported visible set version {found} (expected {expected})")]
    UnsupportedVersion { expected: u32, found: u32 },
    /// A single object's geometry could not be emitted.
    #[error("malformed geometry: {0}")]
    MalformedGeometry(String),
    /// Any other host failure.
    #[error("{0}")]
    Host(String),
}

/// Invalid near/far planes.
#[derive(Debug, Error, PartialEq)]
pub enum DepthRangeError {
    #[error("near plane must be positive, got {0}")]
    NonPositiveNear(f32),
    #[error("far plane ({far}) must be greater than near plane ({near})")]
    FarNotBeyondNear { near: f32, far: f32 },
}

/// Failures writing capture outputs.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// Everything that can abort a single capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Override(#[from] OverrideError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    DepthRange(#[from] DepthRangeError),
    /// A collaborator panicked while the pass was running.
    #[error("pass panicked: {0}")]
    Panicked(String),
}

/// Configuration could not be parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid capture config: {0}")]
    Parse(#[from] ron::error::SpannedError),
}
