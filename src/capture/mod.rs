//! Multi-pass frame capture.
//!
//! One call to [`CaptureOrchestrator::capture`] turns the host's current
//! frame into up to five pixel-aligned images:
//!
//! 1. the main view's color, copied straight from the main target;
//! 2. linear depth, from the main target's depth;
//! 3. a semantic mask, re-rendering the scene with class colors;
//! 4. an instance mask, the same with per-instance colors;
//! 5. optical flow, the same with per-vertex motion colors.
//!
//! Override passes draw into an offscreen target sized to the main view,
//! with the host's camera, so every mask lines up with the color image. The
//! main target is bound again when the capture ends, however it ends.

pub mod traversal;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use image::RgbImage;
use thiserror::Error;

use crate::backend::{RenderBackend, RenderDestination};
use crate::camera::CameraState;
use crate::color::{ColorAssigner, Rgb};
use crate::config::CaptureConfig;
use crate::depth::{self, DepthRange};
use crate::error::{BackendError, CaptureError};
use crate::framebuffer::{OffscreenFramebuffer, read_top_down_depth, read_top_down_rgb};
use crate::motion::{FLOW_BACKGROUND, FLOW_NO_HISTORY, FlowFrame, MotionFrameState, MotionHistory};
use crate::output::{FrameStem, downsample, downsampled_size, rgb_image};
use crate::override_pipeline::{Keying, OverrideScope, PassCounters, RenderPassState};
use crate::scene::{DrawContext, SceneEnumerator, panic_message};

pub use traversal::Traversal;

/// Which outputs a capture produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureOutputs {
    pub rgb: bool,
    pub depth: bool,
    pub semantic: bool,
    pub instance: bool,
    pub flow: bool,
}

impl CaptureOutputs {
    pub fn all() -> Self {
        Self {
            rgb: true,
            depth: true,
            semantic: true,
            instance: true,
            flow: true,
        }
    }

    pub fn none() -> Self {
        Self {
            rgb: false,
            depth: false,
            semantic: false,
            instance: false,
            flow: false,
        }
    }

    /// Color plus whatever `config` enables.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            rgb: true,
            depth: config.depth,
            semantic: config.semantic,
            instance: config.instance,
            flow: config.flow,
        }
    }
}

/// Step of a capture, reported with failures and pass statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureStage {
    ReadMain,
    ReadDepth,
    Semantic,
    Instance,
    Flow,
}

impl fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureStage::ReadMain => "main readback",
            CaptureStage::ReadDepth => "depth readback",
            CaptureStage::Semantic => "semantic pass",
            CaptureStage::Instance => "instance pass",
            CaptureStage::Flow => "flow pass",
        })
    }
}

/// Depth outputs of one capture.
#[derive(Clone, Debug)]
pub struct DepthOutput {
    /// Linear depth, 0 at the near plane and 1 at the far plane.
    pub linear: Vec<f32>,
    /// Window depth as read from the main target.
    pub raw: Vec<f32>,
    /// Grayscale rendition of `linear` (after the optional contrast curve).
    pub image: RgbImage,
    pub range: DepthRange,
}

/// Timing and counters of one stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassStats {
    pub stage: CaptureStage,
    pub counters: PassCounters,
    pub traversal: Option<Traversal>,
    pub elapsed: Duration,
}

/// Everything one successful capture produced.
#[derive(Clone, Debug)]
pub struct CaptureResult {
    pub frame_index: u64,
    pub stem: FrameStem,
    /// Size of every image, after downsampling.
    pub width: u32,
    pub height: u32,
    pub rgb: Option<RgbImage>,
    pub depth: Option<DepthOutput>,
    pub semantic: Option<RgbImage>,
    pub instance: Option<RgbImage>,
    pub flow: Option<RgbImage>,
    pub passes: Vec<PassStats>,
}

impl CaptureResult {
    /// One-line message for the user.
    pub fn notice(&self) -> String {
        format!("Captured frame {} -> {}", self.frame_index, self.stem)
    }

    pub fn pass(&self, stage: CaptureStage) -> Option<&PassStats> {
        self.passes.iter().find(|p| p.stage == stage)
    }
}

/// A capture that was aborted.
#[derive(Debug, Error)]
#[error("frame {frame_index}: {stage} failed: {error}")]
pub struct CaptureFailure {
    pub frame_index: u64,
    pub stage: CaptureStage,
    #[source]
    pub error: CaptureError,
}

impl CaptureFailure {
    /// One-line message for the user.
    pub fn notice(&self) -> String {
        format!("Error capturing frame: {}", self.error)
    }
}

type StageResult<T> = Result<T, (CaptureStage, CaptureError)>;

/// Runs `f`, tagging its error with `stage` and turning a panic into
/// [`CaptureError::Panicked`].
fn staged<T>(stage: CaptureStage, f: impl FnOnce() -> Result<T, CaptureError>) -> StageResult<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(|e| (stage, e)),
        Err(panic) => Err((stage, CaptureError::Panicked(panic_message(&*panic)))),
    }
}

/// Drives the capture passes against one backend.
pub struct CaptureOrchestrator<B: RenderBackend> {
    backend: B,
    config: CaptureConfig,
    colors: ColorAssigner,
    framebuffer: OffscreenFramebuffer,
    history: MotionHistory,
    frames: u64,
}

impl<B: RenderBackend> CaptureOrchestrator<B> {
    pub fn new(backend: B, config: CaptureConfig) -> Self {
        Self::with_services(backend, ColorAssigner::new(), config)
    }

    /// Uses a caller-provided color assigner, e.g. one with curated class
    /// colors.
    pub fn with_services(backend: B, colors: ColorAssigner, config: CaptureConfig) -> Self {
        let framebuffer = OffscreenFramebuffer::new(config.depth_copy);
        Self {
            backend,
            config,
            colors,
            framebuffer,
            history: MotionHistory::new(),
            frames: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn colors(&self) -> &ColorAssigner {
        &self.colors
    }

    pub fn colors_mut(&mut self) -> &mut ColorAssigner {
        &mut self.colors
    }

    pub fn history(&self) -> &MotionHistory {
        &self.history
    }

    /// Number of successful captures so far.
    pub fn frames_captured(&self) -> u64 {
        self.frames
    }

    /// Forgets every assigned color.
    pub fn reset_identities(&mut self) {
        self.colors.reset_cache();
    }

    /// Forgets the previous camera, so the next flow image is the
    /// no-history sentinel.
    pub fn reset_motion(&mut self) {
        self.history.reset();
    }

    /// Releases the capture target and motion history. The orchestrator
    /// stays usable; the next capture reallocates.
    pub fn dispose(&mut self) {
        self.framebuffer.cleanup(&mut self.backend);
        self.history.reset();
        tracing::debug!(backend = self.backend.name(), "capture resources disposed");
    }

    /// Draws the scene with its own colors into the main target.
    ///
    /// For hosts without a renderer of their own, such as headless worlds.
    pub fn render_main(
        &mut self,
        scene: &dyn SceneEnumerator,
        clear: Rgb,
    ) -> Result<Traversal, CaptureError> {
        let camera = scene.camera();
        let previous = self.backend.bound();
        self.backend.bind(RenderDestination::Main)?;
        self.backend.clear(clear)?;

        let mut state = RenderPassState::new();
        let drawn = {
            let mut ctx = DrawContext::new(&mut self.backend, &mut state, &mut self.colors);
            traversal::draw_scene(scene, &mut ctx, &camera, &self.config)
        };
        self.backend.bind(previous)?;
        drawn
    }

    /// Captures one frame.
    /// Captures the outputs enabled in this orchestrator's config.
    pub fn capture_configured(
        &mut self,
        scene: &dyn SceneEnumerator,
    ) -> Result<CaptureResult, CaptureFailure> {
        let outputs = CaptureOutputs::from_config(&self.config);
        self.capture(scene, outputs)
    }

    pub fn capture(
        &mut self,
        scene: &dyn SceneEnumerator,
        outputs: CaptureOutputs,
    ) -> Result<CaptureResult, CaptureFailure> {
        let started = Instant::now();
        let frame_index = self.frames;
        let previous = self.backend.bound();

        let outcome = self.run(scene, outputs, frame_index);

        if self.backend.bound() != previous
            && let Err(err) = self.backend.bind(previous)
        {
            tracing::warn!(error = %err, "could not rebind previous target, binding main");
            let _ = self.backend.bind(RenderDestination::Main);
        }

        match outcome {
            Ok(result) => {
                self.frames += 1;
                tracing::info!(
                    frame = frame_index,
                    stem = %result.stem,
                    width = result.width,
                    height = result.height,
                    passes = result.passes.len(),
                    elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "frame captured"
                );
                Ok(result)
            }
            Err((stage, error)) => {
                tracing::error!(frame = frame_index, stage = %stage, error = %error, "capture failed");
                Err(CaptureFailure {
                    frame_index,
                    stage,
                    error,
                })
            }
        }
    }

    fn run(
        &mut self,
        scene: &dyn SceneEnumerator,
        outputs: CaptureOutputs,
        frame_index: u64,
    ) -> StageResult<CaptureResult> {
        let camera = staged(CaptureStage::ReadMain, || Ok(scene.camera()))?;
        let (width, height) = self.backend.main_size();
        let rate = self.config.sample_rate();
        let (out_w, out_h) = downsampled_size(width, height, rate);

        let mut result = CaptureResult {
            frame_index,
            stem: FrameStem::now(frame_index),
            width: out_w,
            height: out_h,
            rgb: None,
            depth: None,
            semantic: None,
            instance: None,
            flow: None,
            passes: Vec::new(),
        };

        if outputs.rgb {
            let pixels = staged(CaptureStage::ReadMain, || {
                Ok(read_top_down_rgb(&mut self.backend, RenderDestination::Main, width, height)?)
            })?;
            result.rgb = Some(self.image(CaptureStage::ReadMain, pixels, width, height)?);
        }

        if outputs.depth {
            let started = Instant::now();
            let depth = staged(CaptureStage::ReadDepth, || self.read_depth(&camera, width, height))?;
            result.depth = Some(depth);
            result.passes.push(PassStats {
                stage: CaptureStage::ReadDepth,
                counters: PassCounters::default(),
                traversal: None,
                elapsed: started.elapsed(),
            });
        }

        let mask_passes = [
            (outputs.semantic, CaptureStage::Semantic, Keying::Class),
            (outputs.instance, CaptureStage::Instance, Keying::Instance),
        ];
        for (enabled, stage, keying) in mask_passes {
            if !enabled {
                continue;
            }
            let background = self.config.background;
            let (pixels, stats) = staged(stage, || {
                self.override_pass(scene, &camera, stage, keying, background, None)
            })?;
            let image = self.image(stage, pixels, width, height)?;
            match stage {
                CaptureStage::Semantic => result.semantic = Some(image),
                _ => result.instance = Some(image),
            }
            result.passes.push(stats);
        }

        if outputs.flow {
            let (pixels, stats) = match self.history.previous().copied() {
                Some(previous) => {
                    let flow = FlowFrame {
                        previous,
                        current: MotionFrameState {
                            view: camera.view(),
                            projection: camera.projection(),
                        },
                        viewport: (width, height),
                        gain: self.config.flow_gain,
                    };
                    staged(CaptureStage::Flow, || {
                        self.override_pass(
                            scene,
                            &camera,
                            CaptureStage::Flow,
                            Keying::Motion,
                            FLOW_BACKGROUND,
                            Some(flow),
                        )
                    })?
                }
                None => {
                    tracing::debug!("no previous frame, flow is the no-history sentinel");
                    let pixels = FLOW_NO_HISTORY
                        .to_array()
                        .repeat(width as usize * height as usize);
                    let stats = PassStats {
                        stage: CaptureStage::Flow,
                        counters: PassCounters::default(),
                        traversal: None,
                        elapsed: Duration::ZERO,
                    };
                    (pixels, stats)
                }
            };
            result.flow = Some(self.image(CaptureStage::Flow, pixels, width, height)?);
            result.passes.push(stats);
        }

        self.history.update(camera.view(), camera.projection());
        Ok(result)
    }

    fn image(
        &self,
        stage: CaptureStage,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
    ) -> StageResult<RgbImage> {
        let rate = self.config.sample_rate();
        let (w, h) = downsampled_size(width, height, rate);
        let pixels = downsample(&pixels, width, height, 3, rate);
        rgb_image(w, h, pixels).ok_or_else(|| {
            let err = BackendError::Readback(format!("pixel buffer does not fit {w}x{h}"));
            (stage, err.into())
        })
    }

    fn read_depth(
        &mut self,
        camera: &CameraState,
        width: u32,
        height: u32,
    ) -> Result<DepthOutput, CaptureError> {
        let range = camera.depth_range()?;
        let raw = read_top_down_depth(&mut self.backend, RenderDestination::Main, width, height)?;
        let linear = depth::linearize(&raw, range);
        if let Some((nearest, farthest)) = depth::depth_bounds(&linear) {
            tracing::debug!(nearest, farthest, "linear depth read");
        }
        let shown = match self.config.contrast_gamma {
            Some(gamma) => depth::enhance_contrast(&linear, gamma),
            None => linear.clone(),
        };
        let gray = depth::to_grayscale(&shown);

        let rate = self.config.sample_rate();
        let (w, h) = downsampled_size(width, height, rate);
        let image = rgb_image(w, h, downsample(&gray, width, height, 3, rate)).ok_or_else(|| {
            BackendError::Readback(format!("depth buffer does not fit {w}x{h}"))
        })?;
        Ok(DepthOutput {
            linear: downsample(&linear, width, height, 1, rate),
            raw: downsample(&raw, width, height, 1, rate),
            image,
            range,
        })
    }

    /// One override pass into the capture target; returns top-down RGB8.
    fn override_pass(
        &mut self,
        scene: &dyn SceneEnumerator,
        camera: &CameraState,
        stage: CaptureStage,
        keying: Keying,
        clear: Rgb,
        flow: Option<FlowFrame>,
    ) -> Result<(Vec<u8>, PassStats), CaptureError> {
        let started = Instant::now();
        let (width, height) = self.backend.main_size();
        self.framebuffer.ensure(&mut self.backend, width, height)?;

        let mut state = RenderPassState::new();
        let traversal = {
            let mut target = self.framebuffer.begin_write(&mut self.backend, clear)?;
            let mut overriding = OverrideScope::begin(&mut state, keying)?;
            let mut ctx = DrawContext::new(target.backend(), &mut overriding, &mut self.colors);
            if let Some(flow) = flow {
                ctx = ctx.with_flow(flow);
            }
            traversal::draw_scene(scene, &mut ctx, camera, &self.config)?
        };
        let pixels = self.framebuffer.read_pixels(&mut self.backend)?;

        let stats = PassStats {
            stage,
            counters: state.counters(),
            traversal: Some(traversal),
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            pass = %keying,
            traversal = %traversal,
            objects = stats.counters.objects_drawn,
            skipped = stats.counters.objects_skipped,
            reclassified = stats.counters.batches_reclassified,
            suppressed = stats.counters.batches_suppressed,
            flushes = stats.counters.units_flushed,
            elapsed_ms = stats.elapsed.as_secs_f64() * 1000.0,
            "override pass done"
        );
        Ok((pixels, stats))
    }
}
