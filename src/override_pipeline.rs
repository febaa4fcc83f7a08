//! The render override: identity colors in place of materials.
//!
//! While override mode is active, every vertex a host emits has its color
//! replaced by the color of the object currently bound, so a regular draw of
//! the scene paints each object as one flat identity color. In the flow pass
//! the replacement is a per-vertex motion color instead.
//!
//! State lives in a [`RenderPassState`] created per sub-pass and passed by
//! reference; there is no global "override on" flag. [`OverrideScope`] pairs
//! [`begin_override`](RenderPassState::begin_override) with
//! [`end_override`](RenderPassState::end_override) on every exit path,
//! including unwinding.

use std::fmt;
use std::ops::{Deref, DerefMut};

use glam::{Vec2, Vec3};

use crate::color::{ColorAssigner, ObjectIdentity, Rgb, TagSpace};
use crate::error::OverrideError;
use crate::layer::{BatchDescriptor, FillMode, classify};
use crate::motion::FlowProjector;
use crate::vertex::VertexSink;

/// What the override pass paints objects with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Keying {
    /// Semantic class colors.
    Class,
    /// Per-instance colors.
    Instance,
    /// Per-vertex motion colors.
    Motion,
}

impl Keying {
    /// Tag space for identity keyings; `None` for motion.
    pub fn tag_space(self) -> Option<TagSpace> {
        match self {
            Keying::Class => Some(TagSpace::Class),
            Keying::Instance => Some(TagSpace::Instance),
            Keying::Motion => None,
        }
    }
}

impl fmt::Display for Keying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Keying::Class => f.write_str("semantic"),
            Keying::Instance => f.write_str("instance"),
            Keying::Motion => f.write_str("flow"),
        }
    }
}

/// Per-pass statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassCounters {
    /// Objects drawn to completion while override was active.
    pub objects_drawn: u64,
    /// Batches routed through the classifier while override was active.
    pub batches_reclassified: u64,
    /// Batches whose geometry was dropped entirely.
    pub batches_suppressed: u64,
    /// Objects whose draw failed or panicked.
    pub objects_skipped: u64,
    /// Flushes that submitted queued geometry to the backend.
    pub units_flushed: u64,
}

/// Override state of one sub-pass.
#[derive(Debug, Default)]
pub struct RenderPassState {
    active: Option<Keying>,
    current: Option<ObjectIdentity>,
    current_color: Rgb,
    fill: Option<FillMode>,
    counters: PassCounters,
}

impl RenderPassState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters override mode. Nesting is a usage error.
    pub fn begin_override(&mut self, keying: Keying) -> Result<(), OverrideError> {
        if self.active.is_some() {
            return Err(OverrideError::AlreadyActive);
        }
        self.active = Some(keying);
        tracing::trace!(%keying, "override begin");
        Ok(())
    }

    /// Leaves override mode. Calling it while inactive does nothing.
    pub fn end_override(&mut self) {
        if let Some(keying) = self.active.take() {
            tracing::trace!(%keying, "override end");
        }
        self.current = None;
        self.current_color = Rgb::BACKGROUND;
        self.fill = None;
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn keying(&self) -> Option<Keying> {
        self.active
    }

    /// Binds the object whose geometry follows, or clears the binding.
    ///
    /// Called right before and right after each object is drawn. The color
    /// is resolved immediately so every vertex of the object gets the same
    /// value.
    pub fn bind_current_object(
        &mut self,
        identity: Option<&ObjectIdentity>,
        colors: &mut ColorAssigner,
    ) {
        match identity {
            Some(identity) => {
                self.current_color = self
                    .active
                    .and_then(Keying::tag_space)
                    .map(|space| colors.color_for(&identity.key_for(space)))
                    .unwrap_or(Rgb::BACKGROUND);
                self.current = Some(identity.clone());
            }
            None => {
                self.current = None;
                self.current_color = Rgb::BACKGROUND;
                self.fill = None;
            }
        }
    }

    pub fn current_object(&self) -> Option<&ObjectIdentity> {
        self.current.as_ref()
    }

    /// Identity color of the bound object; background when nothing is bound.
    pub fn current_color(&self) -> Rgb {
        self.current_color
    }

    /// Classifies a batch and records it as the bound fill mode.
    pub fn bind_batch(&mut self, batch: &BatchDescriptor) -> FillMode {
        let mode = classify(batch);
        tracing::trace!(hint = %batch.hint, ?mode, "batch bound");
        if self.active.is_some() {
            self.counters.batches_reclassified += 1;
            if mode == FillMode::Suppressed {
                self.counters.batches_suppressed += 1;
            }
        }
        self.fill = Some(mode);
        mode
    }

    pub fn bound_fill(&self) -> Option<FillMode> {
        self.fill
    }

    /// Counts the bound object as drawn. Only override passes count.
    pub fn record_drawn(&mut self) {
        if self.active.is_some() {
            self.counters.objects_drawn += 1;
        }
    }

    /// Rolls the counters back to `snapshot` and tallies one skipped object.
    /// Batches bound by the failed draw do not count.
    pub fn record_skipped(&mut self, snapshot: PassCounters) {
        self.counters = PassCounters {
            objects_skipped: self.counters.objects_skipped + 1,
            units_flushed: self.counters.units_flushed,
            ..snapshot
        };
    }

    pub fn record_flush(&mut self) {
        self.counters.units_flushed += 1;
    }

    pub fn counters(&self) -> PassCounters {
        self.counters
    }
}

/// Guard that ends override mode when dropped.
pub struct OverrideScope<'a> {
    state: &'a mut RenderPassState,
}

impl<'a> OverrideScope<'a> {
    pub fn begin(state: &'a mut RenderPassState, keying: Keying) -> Result<Self, OverrideError> {
        state.begin_override(keying)?;
        Ok(Self { state })
    }
}

impl Deref for OverrideScope<'_> {
    type Target = RenderPassState;

    fn deref(&self) -> &RenderPassState {
        self.state
    }
}

impl DerefMut for OverrideScope<'_> {
    fn deref_mut(&mut self) -> &mut RenderPassState {
        self.state
    }
}

impl Drop for OverrideScope<'_> {
    fn drop(&mut self) {
        self.state.end_override();
    }
}

/// Where override colors come from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColorSource {
    /// One flat color for every vertex.
    Identity(Rgb),
    /// Motion color computed from each vertex position.
    Flow(FlowProjector),
}

impl ColorSource {
    fn color_at(&self, position: Vec3) -> [u8; 4] {
        match self {
            ColorSource::Identity(rgb) => rgb.to_rgba(),
            ColorSource::Flow(projector) => projector.color(position).to_rgba(),
        }
    }
}

/// Sink adapter that substitutes override colors.
///
/// The replacement color is written right after each `vertex` call and host
/// `color` calls are dropped, so the host's own color never reaches the
/// target. With [`FillMode::SolidFlatFill`] the uv, overlay, light and normal
/// writes are dropped as well.
pub struct OverrideSink<'a> {
    inner: &'a mut dyn VertexSink,
    source: ColorSource,
    keep_attributes: bool,
}

impl<'a> OverrideSink<'a> {
    pub fn new(inner: &'a mut dyn VertexSink, mode: FillMode, source: ColorSource) -> Self {
        Self {
            inner,
            source,
            keep_attributes: mode.keeps_texture_attributes(),
        }
    }
}

impl VertexSink for OverrideSink<'_> {
    fn vertex(&mut self, position: Vec3) {
        self.inner.vertex(position);
        self.inner.color(self.source.color_at(position));
    }

    fn color(&mut self, _rgba: [u8; 4]) {}

    fn uv(&mut self, uv: Vec2) {
        if self.keep_attributes {
            self.inner.uv(uv);
        }
    }

    fn overlay(&mut self, u: i32, v: i32) {
        if self.keep_attributes {
            self.inner.overlay(u, v);
        }
    }

    fn light(&mut self, block: i32, sky: i32) {
        if self.keep_attributes {
            self.inner.light(block, sky);
        }
    }

    fn normal(&mut self, normal: Vec3) {
        if self.keep_attributes {
            self.inner.normal(normal);
        }
    }

    fn end_vertex(&mut self) {
        self.inner.end_vertex();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::BatchBuilder;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl VertexSink for Recorder {
        fn vertex(&mut self, p: Vec3) {
            self.calls.push(format!("vertex {} {} {}", p.x, p.y, p.z));
        }
        fn color(&mut self, c: [u8; 4]) {
            self.calls.push(format!("color {:?}", c));
        }
        fn uv(&mut self, _uv: Vec2) {
            self.calls.push("uv".into());
        }
        fn overlay(&mut self, _u: i32, _v: i32) {
            self.calls.push("overlay".into());
        }
        fn light(&mut self, _b: i32, _s: i32) {
            self.calls.push("light".into());
        }
        fn normal(&mut self, _n: Vec3) {
            self.calls.push("normal".into());
        }
        fn end_vertex(&mut self) {
            self.calls.push("end".into());
        }
    }

    fn emit_one(sink: &mut dyn VertexSink) {
        sink.vertex(Vec3::new(1.0, 2.0, 3.0));
        sink.color([1, 2, 3, 4]);
        sink.uv(Vec2::ZERO);
        sink.overlay(0, 10);
        sink.light(15, 15);
        sink.normal(Vec3::Y);
        sink.end_vertex();
    }

    #[test]
    fn nested_begin_is_rejected_and_end_is_idempotent() {
        let mut state = RenderPassState::new();
        state.begin_override(Keying::Class).unwrap();
        assert_eq!(
            state.begin_override(Keying::Instance),
            Err(OverrideError::AlreadyActive)
        );
        state.end_override();
        state.end_override();
        assert!(!state.is_active());
        assert!(state.begin_override(Keying::Instance).is_ok());
    }

    #[test]
    fn scope_ends_override_on_drop() {
        let mut state = RenderPassState::new();
        {
            let scope = OverrideScope::begin(&mut state, Keying::Class).unwrap();
            assert!(scope.is_active());
        }
        assert!(!state.is_active());
    }

    #[test]
    fn scope_ends_override_on_unwind() {
        let mut state = RenderPassState::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = OverrideScope::begin(&mut state, Keying::Class).unwrap();
            panic!("draw blew up");
        }));
        assert!(result.is_err());
        assert!(!state.is_active());
    }

    #[test]
    fn binding_colors_only_while_active() {
        let mut colors = ColorAssigner::new();
        let mut state = RenderPassState::new();
        let cow = ObjectIdentity::new("minecraft:cow", 7);

        state.bind_current_object(Some(&cow), &mut colors);
        state.record_drawn();
        assert_eq!(state.counters().objects_drawn, 0);
        assert_eq!(state.current_color(), Rgb::BACKGROUND);

        state.begin_override(Keying::Instance).unwrap();
        state.bind_current_object(Some(&cow), &mut colors);
        assert_eq!(state.counters().objects_drawn, 0);
        state.record_drawn();
        assert_eq!(state.counters().objects_drawn, 1);
        assert_eq!(
            state.current_color(),
            colors.color_for(&cow.key_for(TagSpace::Instance))
        );
        state.bind_current_object(None, &mut colors);
        assert_eq!(state.current_color(), Rgb::BACKGROUND);
        assert!(state.current_object().is_none());
    }

    #[test]
    fn batch_counters() {
        let mut state = RenderPassState::new();
        state.begin_override(Keying::Class).unwrap();
        state.bind_batch(&BatchDescriptor::from_layer_name("shadow"));
        state.bind_batch(&BatchDescriptor::from_layer_name("solid"));
        let counters = state.counters();
        assert_eq!(counters.batches_reclassified, 2);
        assert_eq!(counters.batches_suppressed, 1);
        assert_eq!(state.bound_fill(), Some(FillMode::TexturedFlatFill { cull_back_faces: true }));
    }

    #[test]
    fn override_color_follows_vertex_and_host_color_is_dropped() {
        let mut recorder = Recorder::default();
        let source = ColorSource::Identity(Rgb::new(40, 50, 60));
        let mode = FillMode::TexturedFlatFill {
            cull_back_faces: true,
        };
        emit_one(&mut OverrideSink::new(&mut recorder, mode, source));
        assert_eq!(
            recorder.calls,
            [
                "vertex 1 2 3",
                "color [40, 50, 60, 255]",
                "uv",
                "overlay",
                "light",
                "normal",
                "end"
            ]
        );
    }

    #[test]
    fn solid_fill_drops_texture_attributes() {
        let mut recorder = Recorder::default();
        let source = ColorSource::Identity(Rgb::new(40, 50, 60));
        emit_one(&mut OverrideSink::new(
            &mut recorder,
            FillMode::SolidFlatFill,
            source,
        ));
        assert_eq!(
            recorder.calls,
            ["vertex 1 2 3", "color [40, 50, 60, 255]", "end"]
        );
    }

    #[test]
    fn builder_behind_override_gets_flat_color() {
        let mut builder = BatchBuilder::new();
        {
            let mut sink = OverrideSink::new(
                &mut builder,
                FillMode::SolidFlatFill,
                ColorSource::Identity(Rgb::new(90, 91, 92)),
            );
            for _ in 0..3 {
                emit_one(&mut sink);
            }
        }
        let vertices = builder.take();
        assert_eq!(vertices.len(), 3);
        assert!(vertices.iter().all(|v| v.color == [90, 91, 92, 255]));
        assert!(vertices.iter().all(|v| v.uv == [0.0, 0.0]));
    }
}
