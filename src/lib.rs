//! # segcap
//!
//! **Pixel-aligned training data from a live 3D scene.**
//!
//! Each capture re-renders what the camera already sees into offscreen
//! targets, with every surface replaced by a flat color, and returns a
//! color photo, linear depth, a semantic mask, an instance mask and
//! optionally optical flow. All outputs share the camera and resolution of
//! the main view.
//!
//! ## Quick Start
//!
//! ```
//! use segcap::world::{RenderMesh, World};
//! use segcap::*;
//!
//! let mut world = World::new(16);
//! world.camera = CameraState::new().at(Vec3::new(0.0, 1.0, 6.0)).with_viewport(64, 64);
//! world.set_block(IVec3::new(0, 0, 0), "minecraft:stone", [128, 128, 128, 255]);
//! world.spawn_object(
//!     ObjectIdentity::new("minecraft:pig", 7),
//!     Transform::from_position(Vec3::new(0.0, 1.5, 0.5)),
//!     RenderMesh::new(MeshData::cube(), [240, 170, 170, 255]),
//! );
//!
//! let mut capture = CaptureOrchestrator::new(SoftwareBackend::new(64, 64), CaptureConfig::new());
//! capture.render_main(&world, Rgb::new(120, 170, 255)).unwrap();
//! let frame = capture.capture(&world, CaptureOutputs::all()).unwrap();
//!
//! assert_eq!(frame.semantic.as_ref().unwrap().dimensions(), (64, 64));
//! println!("{}", frame.notice());
//! ```
//!
//! ## Pieces
//!
//! - [`ColorAssigner`] maps class and instance keys to stable colors.
//! - [`classify`] decides how each draw batch is filled during a mask pass.
//! - [`RenderPassState`] and [`OverrideSink`] swap vertex colors while a pass
//!   is active.
//! - [`OffscreenFramebuffer`] owns the capture target.
//! - [`CaptureOrchestrator`] sequences the passes.
//! - [`SceneEnumerator`] and [`VisibleSetProvider`] are what a host
//!   implements; [`world::World`] is a ready-made one.
//! - [`SoftwareBackend`] rasterizes on the CPU; [`WgpuBackend`] on the GPU.

pub mod backend;
pub mod camera;
pub mod capture;
pub mod color;
pub mod config;
pub mod depth;
pub mod error;
pub mod framebuffer;
mod gpu;
pub mod layer;
pub mod mesh;
pub mod motion;
pub mod output;
pub mod override_pipeline;
pub mod scene;
pub mod schedule;
pub mod vertex;
pub mod world;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Once;

    /// Routes `tracing` output through the test harness. `RUST_LOG`
    /// overrides the default filter.
    pub fn init_tracing() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

            let _ = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "segcap=debug".into()),
                )
                .with(tracing_subscriber::fmt::layer().with_test_writer())
                .try_init();
        });
    }
}

pub use backend::{
    DrawBatch, FlatProgram, RenderBackend, RenderDestination, RowOrder, SoftwareBackend, TargetId,
    TextureId, WgpuBackend,
};
pub use camera::{CameraState, Frustum};
pub use capture::{
    CaptureFailure, CaptureOrchestrator, CaptureOutputs, CaptureResult, CaptureStage, DepthOutput,
    PassStats, Traversal,
};
pub use color::{
    ClassKey, ColorAssigner, INSTANCE_SALT, InstanceKey, MIN_BRIGHTNESS, ObjectIdentity, ObjectKey,
    Rgb, TagSpace,
};
pub use config::CaptureConfig;
pub use depth::{DepthRange, enhance_contrast, linearize, to_grayscale};
pub use error::{
    BackendError, CaptureError, ConfigError, DepthRangeError, OverrideError, SceneError, SinkError,
};
pub use framebuffer::{DepthCopyPolicy, OffscreenFramebuffer};
pub use gpu::GpuContext;
pub use layer::{BatchDescriptor, FillMode, SurfaceKind, classify};
pub use mesh::{MeshData, Transform, Vertex3d};
pub use motion::{
    FLOW_BACKGROUND, FLOW_NO_HISTORY, FLOW_VALID, MotionFrameState, MotionHistory, compute_flow, encode_flow,
};
pub use output::{CaptureSink, FrameStem, PngDirectorySink};
pub use override_pipeline::{Keying, OverrideScope, OverrideSink, PassCounters, RenderPassState};
pub use scene::{ChunkId, DrawContext, SceneEnumerator, VisibleSetProvider};
pub use schedule::CaptureScheduler;
pub use vertex::{BatchBuilder, FlatVertex, VertexSink};

// Re-export glam math types for convenience
pub use glam::{IVec3, Mat4, Quat, Vec2, Vec3};
