//! Host-side collaborators and the per-object draw context.
//!
//! A host exposes its scene through [`SceneEnumerator`] (camera, static cells,
//! dynamic objects) and optionally a [`VisibleSetProvider`] carrying its own
//! culling result. Both draw through a [`DrawContext`], which owns the
//! interception: each object is bound before its geometry is emitted and
//! unbound after, and each batch it opens is classified and wrapped.
//!
//! ```ignore
//! ctx.draw_object(&identity, model, |draw| {
//!     let mut sink = draw.buffer(&BatchDescriptor::opaque());
//!     mesh.emit(&mut sink, [255, 255, 255, 255]);
//!     Ok(())
//! });
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};

use glam::{IVec3, Mat4, Vec2, Vec3};

use crate::backend::{DrawBatch, FlatProgram, RenderBackend, TextureId};
use crate::camera::CameraState;
use crate::color::{ColorAssigner, ObjectIdentity};
use crate::error::{BackendError, SceneError};
use crate::layer::{BatchDescriptor, FillMode};
use crate::motion::{self, FlowFrame};
use crate::override_pipeline::{ColorSource, Keying, OverrideSink, RenderPassState};
use crate::vertex::{BatchBuilder, FlatVertex, NullSink, VertexSink};

/// Interface version of [`VisibleSetProvider`] this crate speaks.
pub const VISIBLE_SET_VERSION: u32 = 1;

/// Identifies one static-geometry chunk in the host's visible set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

/// The host's main-pass culling result.
pub trait VisibleSetProvider {
    /// Interface version; must equal [`VISIBLE_SET_VERSION`].
    fn version(&self) -> u32;

    /// Chunks the main pass drew this frame.
    fn visible_chunks(&self) -> Result<Vec<ChunkId>, SceneError>;

    /// Emits one chunk. Vertex positions are relative to the camera
    /// position; the context re-adds the offset.
    fn draw_chunk(&self, chunk: ChunkId, ctx: &mut DrawContext<'_>) -> Result<(), SceneError>;
}

/// The host scene as the capture passes see it.
pub trait SceneEnumerator {
    fn camera(&self) -> CameraState;

    /// Visible-set fast path, when the host has one.
    fn visible_set(&self) -> Option<&dyn VisibleSetProvider> {
        None
    }

    /// Side length of a static-geometry cell, for the fallback scan.
    fn cell_size(&self) -> f32 {
        16.0
    }

    /// Emits the static geometry of one cell, in world space.
    fn draw_cell(&self, cell: IVec3, ctx: &mut DrawContext<'_>) -> Result<(), SceneError>;

    /// Emits every dynamic object that is currently visible, in world space.
    fn for_each_visible_object(&self, ctx: &mut DrawContext<'_>) -> Result<(), SceneError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BatchKey {
    program: FlatProgram,
    cull_back_faces: bool,
    texture: Option<TextureId>,
}

/// Draw-time state shared by every object in a pass.
pub struct DrawContext<'a> {
    backend: &'a mut dyn RenderBackend,
    state: &'a mut RenderPassState,
    colors: &'a mut ColorAssigner,
    flow: Option<FlowFrame>,
    world_offset: Mat4,
    queue: Vec<DrawBatch>,
    pushed: usize,
}

impl<'a> DrawContext<'a> {
    pub fn new(
        backend: &'a mut dyn RenderBackend,
        state: &'a mut RenderPassState,
        colors: &'a mut ColorAssigner,
    ) -> Self {
        Self {
            backend,
            state,
            colors,
            flow: None,
            world_offset: Mat4::IDENTITY,
            queue: Vec::new(),
            pushed: 0,
        }
    }

    /// Parameters for motion colors; required for [`Keying::Motion`].
    pub fn with_flow(mut self, flow: FlowFrame) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn state(&self) -> &RenderPassState {
        self.state
    }

    pub fn backend(&mut self) -> &mut dyn RenderBackend {
        &mut *self.backend
    }

    /// Flushes, then makes following geometry draw under `view_projection`,
    /// with `world_offset` mapping emitted positions to world space.
    pub fn push_transform(
        &mut self,
        view_projection: Mat4,
        world_offset: Mat4,
    ) -> Result<(), BackendError> {
        self.flush()?;
        self.backend.push_transform(view_projection);
        self.world_offset = world_offset;
        self.pushed += 1;
        Ok(())
    }

    pub fn pop_transform(&mut self) -> Result<(), BackendError> {
        self.flush()?;
        self.backend.pop_transform()?;
        self.pushed = self.pushed.saturating_sub(1);
        self.world_offset = Mat4::IDENTITY;
        Ok(())
    }

    /// Submits all queued geometry to the backend.
    pub fn flush(&mut self) -> Result<(), BackendError> {
        if self.queue.is_empty() {
            return Ok(());
        }
        for batch in self.queue.drain(..) {
            self.backend.draw(&batch)?;
        }
        self.state.record_flush();
        Ok(())
    }

    /// Queued batches not yet flushed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Draws one object.
    ///
    /// The object is bound before `f` runs and unbound afterwards. If `f`
    /// returns an error or panics, the object's geometry is discarded and
    /// only the skip tally moves; the pass carries on.
    pub fn draw_object<F>(&mut self, identity: &ObjectIdentity, model: Mat4, f: F)
    where
        F: FnOnce(&mut ObjectDraw<'_>) -> Result<(), SceneError>,
    {
        let snapshot = self.state.counters();
        self.state.bind_current_object(Some(identity), self.colors);

        let source = match self.state.keying() {
            Some(Keying::Motion) => self
                .flow
                .map(|flow| ColorSource::Flow(flow.projector(self.world_offset * model))),
            Some(_) => Some(ColorSource::Identity(self.state.current_color())),
            None => None,
        };
        let flow_pass = matches!(source, Some(ColorSource::Flow(_)));

        let mut draw = ObjectDraw {
            state: &mut *self.state,
            model,
            source,
            batches: Vec::new(),
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| f(&mut draw)));
        let batches = std::mem::take(&mut draw.batches);

        match outcome {
            Ok(Ok(())) => {
                for (key, mut builder) in batches {
                    let mut vertices = builder.take();
                    if flow_pass {
                        vertices = motion::retain_projected(vertices);
                    }
                    if !vertices.is_empty() {
                        self.enqueue(key, vertices);
                    }
                }
                self.state.record_drawn();
            }
            Ok(Err(err)) => {
                tracing::warn!(object = %identity.class, instance = identity.instance.0, error = %err, "object skipped");
                self.state.record_skipped(snapshot);
            }
            Err(panic) => {
                tracing::warn!(
                    object = %identity.class,
                    instance = identity.instance.0,
                    panic = %panic_message(&*panic),
                    "object draw panicked, skipped"
                );
                self.state.record_skipped(snapshot);
            }
        }

        self.state.bind_current_object(None, self.colors);
    }

    fn enqueue(&mut self, key: BatchKey, mut vertices: Vec<FlatVertex>) {
        if let Some(last) = self.queue.last_mut()
            && last.program == key.program
            && last.cull_back_faces == key.cull_back_faces
            && last.texture == key.texture
        {
            last.vertices.append(&mut vertices);
            return;
        }
        self.queue.push(DrawBatch {
            program: key.program,
            cull_back_faces: key.cull_back_faces,
            texture: key.texture,
            vertices,
        });
    }
}

impl Drop for DrawContext<'_> {
    fn drop(&mut self) {
        // unbalanced pushes from an aborted traversal
        for _ in 0..self.pushed {
            let _ = self.backend.pop_transform();
        }
    }
}

/// Geometry collection for one object inside [`DrawContext::draw_object`].
pub struct ObjectDraw<'a> {
    state: &'a mut RenderPassState,
    model: Mat4,
    source: Option<ColorSource>,
    batches: Vec<(BatchKey, BatchBuilder)>,
}

impl ObjectDraw<'_> {
    pub fn model(&self) -> Mat4 {
        self.model
    }

    /// Opens a batch of `descriptor`'s kind and returns the sink to emit into.
    ///
    /// During override passes the batch is classified: suppressed batches
    /// swallow everything, the others get override colors. Outside override
    /// the host's own colors pass through.
    pub fn buffer(&mut self, descriptor: &BatchDescriptor) -> BatchSink<'_> {
        let mode = self.state.bind_batch(descriptor);
        let overriding = self.state.is_active();

        if overriding && mode == FillMode::Suppressed {
            return BatchSink::Suppressed(NullSink);
        }

        let key = match (FlatProgram::for_fill(mode), mode) {
            (Some(program), FillMode::TexturedFlatFill { cull_back_faces }) => BatchKey {
                program,
                cull_back_faces,
                texture: descriptor.texture,
            },
            (Some(program), _) => BatchKey {
                program,
                cull_back_faces: false,
                texture: None,
            },
            // main view: shadows are regular geometry
            (None, _) => BatchKey {
                program: FlatProgram::Solid,
                cull_back_faces: false,
                texture: None,
            },
        };

        let index = match self.batches.iter().position(|(k, _)| *k == key) {
            Some(index) => index,
            None => {
                let mut builder = BatchBuilder::new();
                builder.set_model(self.model);
                self.batches.push((key, builder));
                self.batches.len() - 1
            }
        };
        let builder = &mut self.batches[index].1;

        match (overriding, self.source) {
            (true, Some(source)) => {
                BatchSink::Override(OverrideSink::new(builder, mode, source))
            }
            // motion keying without a previous frame never reaches here
            (true, None) => BatchSink::Suppressed(NullSink),
            (false, _) => BatchSink::Passthrough(builder),
        }
    }
}

/// Sink handed to host draw code for one batch.
pub enum BatchSink<'a> {
    Override(OverrideSink<'a>),
    Suppressed(NullSink),
    Passthrough(&'a mut BatchBuilder),
}

impl VertexSink for BatchSink<'_> {
    fn vertex(&mut self, position: Vec3) {
        match self {
            BatchSink::Override(s) => s.vertex(position),
            BatchSink::Suppressed(s) => s.vertex(position),
            BatchSink::Passthrough(s) => s.vertex(position),
        }
    }

    fn color(&mut self, rgba: [u8; 4]) {
        match self {
            BatchSink::Override(s) => s.color(rgba),
            BatchSink::Suppressed(s) => s.color(rgba),
            BatchSink::Passthrough(s) => s.color(rgba),
        }
    }

    fn uv(&mut self, uv: Vec2) {
        match self {
            BatchSink::Override(s) => s.uv(uv),
            BatchSink::Suppressed(s) => s.uv(uv),
            BatchSink::Passthrough(s) => s.uv(uv),
        }
    }

    fn overlay(&mut self, u: i32, v: i32) {
        match self {
            BatchSink::Override(s) => s.overlay(u, v),
            BatchSink::Suppressed(s) => s.overlay(u, v),
            BatchSink::Passthrough(s) => s.overlay(u, v),
        }
    }

    fn light(&mut self, block: i32, sky: i32) {
        match self {
            BatchSink::Override(s) => s.light(block, sky),
            BatchSink::Suppressed(s) => s.light(block, sky),
            BatchSink::Passthrough(s) => s.light(block, sky),
        }
    }

    fn normal(&mut self, normal: Vec3) {
        match self {
            BatchSink::Override(s) => s.normal(normal),
            BatchSink::Suppressed(s) => s.normal(normal),
            BatchSink::Passthrough(s) => s.normal(normal),
        }
    }

    fn end_vertex(&mut self) {
        match self {
            BatchSink::Override(s) => s.end_vertex(),
            BatchSink::Suppressed(s) => s.end_vertex(),
            BatchSink::Passthrough(s) => s.end_vertex(),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RenderDestination, SoftwareBackend};
    use crate::color::{Rgb, TagSpace};
    use crate::mesh::MeshData;

    fn quad(sink: &mut dyn VertexSink) {
        let mesh = MeshData::new(
            vec![
                crate::mesh::Vertex3d::new([-1.0, -1.0, 0.5], [0.0, 0.0, 1.0], [0.0, 0.0]),
                crate::mesh::Vertex3d::new([1.0, -1.0, 0.5], [0.0, 0.0, 1.0], [1.0, 0.0]),
                crate::mesh::Vertex3d::new([1.0, 1.0, 0.5], [0.0, 0.0, 1.0], [1.0, 1.0]),
                crate::mesh::Vertex3d::new([-1.0, 1.0, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ],
            vec![0, 1, 2, 2, 3, 0],
        );
        mesh.emit(sink, [10, 20, 30, 255]);
    }

    #[test]
    fn override_paints_identity_color() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut state = RenderPassState::new();
        let mut colors = ColorAssigner::new();
        let pig = ObjectIdentity::new("minecraft:pig", 3);
        let expected = colors.color_for(&pig.key_for(TagSpace::Class));

        state.begin_override(Keying::Class).unwrap();
        {
            let mut ctx = DrawContext::new(&mut backend, &mut state, &mut colors);
            ctx.draw_object(&pig, Mat4::IDENTITY, |draw| {
                quad(&mut draw.buffer(&BatchDescriptor::entity()));
                Ok(())
            });
            assert_eq!(ctx.pending(), 1);
            ctx.flush().unwrap();
        }
        state.end_override();

        let pixels = backend.read_color(RenderDestination::Main).unwrap();
        assert!(pixels.chunks(3).all(|p| Rgb::new(p[0], p[1], p[2]) == expected));
        assert_eq!(state.counters().objects_drawn, 1);
        assert_eq!(state.counters().units_flushed, 1);
    }

    #[test]
    fn shadows_are_suppressed_only_under_override() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut state = RenderPassState::new();
        let mut colors = ColorAssigner::new();
        let id = ObjectIdentity::new("minecraft:zombie", 1);

        state.begin_override(Keying::Instance).unwrap();
        {
            let mut ctx = DrawContext::new(&mut backend, &mut state, &mut colors);
            ctx.draw_object(&id, Mat4::IDENTITY, |draw| {
                quad(&mut draw.buffer(&BatchDescriptor::from_layer_name("entity_shadow")));
                Ok(())
            });
            assert_eq!(ctx.pending(), 0);
        }
        state.end_override();
        assert_eq!(state.counters().batches_suppressed, 1);

        let mut ctx = DrawContext::new(&mut backend, &mut state, &mut colors);
        ctx.draw_object(&id, Mat4::IDENTITY, |draw| {
            quad(&mut draw.buffer(&BatchDescriptor::from_layer_name("entity_shadow")));
            Ok(())
        });
        assert_eq!(ctx.pending(), 1);
    }

    #[test]
    fn failing_and_panicking_objects_are_skipped() {
        crate::test_support::init_tracing();
        let mut backend = SoftwareBackend::new(4, 4);
        let mut state = RenderPassState::new();
        let mut colors = ColorAssigner::new();
        let id = ObjectIdentity::new("minecraft:creeper", 9);

        state.begin_override(Keying::Class).unwrap();
        {
            let mut ctx = DrawContext::new(&mut backend, &mut state, &mut colors);
            ctx.draw_object(&id, Mat4::IDENTITY, |draw| {
                quad(&mut draw.buffer(&BatchDescriptor::entity()));
                Err(SceneError::MalformedGeometry("bad model".into()))
            });
            ctx.draw_object(&id, Mat4::IDENTITY, |draw| {
                quad(&mut draw.buffer(&BatchDescriptor::entity()));
                panic!("renderer crashed");
            });
            assert_eq!(ctx.pending(), 0);
            assert!(ctx.state().current_object().is_none());

            ctx.draw_object(&id, Mat4::IDENTITY, |draw| {
                quad(&mut draw.buffer(&BatchDescriptor::entity()));
                Ok(())
            });
        }
        let counters = state.counters();
        assert_eq!(counters.objects_skipped, 2);
        assert_eq!(counters.objects_drawn, 1);
        assert_eq!(counters.batches_reclassified, 1);
    }

    #[test]
    fn context_drop_balances_transform_stack() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut state = RenderPassState::new();
        let mut colors = ColorAssigner::new();
        {
            let mut ctx = DrawContext::new(&mut backend, &mut state, &mut colors);
            ctx.push_transform(Mat4::IDENTITY, Mat4::IDENTITY).unwrap();
            ctx.push_transform(Mat4::IDENTITY, Mat4::IDENTITY).unwrap();
        }
        assert_eq!(backend.transform_depth(), 0);
    }

    #[test]
    fn same_kind_batches_merge() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut state = RenderPassState::new();
        let mut colors = ColorAssigner::new();
        state.begin_override(Keying::Class).unwrap();
        let mut ctx = DrawContext::new(&mut backend, &mut state, &mut colors);
        for i in 0..3 {
            ctx.draw_object(&ObjectIdentity::new("minecraft:sheep", i), Mat4::IDENTITY, |draw| {
                quad(&mut draw.buffer(&BatchDescriptor::entity()));
                Ok(())
            });
        }
        assert_eq!(ctx.pending(), 1);
    }

    #[test]
    fn flow_drops_triangles_reaching_behind_the_camera() {
        use crate::camera::CameraState;
        use crate::motion::{FLOW_VALID, MotionFrameState};

        let camera = CameraState::new().with_viewport(16, 16);
        let frame = MotionFrameState {
            view: camera.view(),
            projection: camera.projection(),
        };
        let mesh = MeshData::new(
            vec![
                crate::mesh::Vertex3d::new([-1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
                crate::mesh::Vertex3d::new([1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
                crate::mesh::Vertex3d::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.5, 1.0]),
                // past the camera at z = 5
                crate::mesh::Vertex3d::new([0.0, 0.0, 8.0], [0.0, 0.0, 1.0], [0.5, 0.5]),
            ],
            vec![0, 1, 2, 0, 1, 3],
        );

        let mut backend = SoftwareBackend::new(16, 16);
        let mut state = RenderPassState::new();
        let mut colors = ColorAssigner::new();
        state.begin_override(Keying::Motion).unwrap();
        {
            let mut ctx = DrawContext::new(&mut backend, &mut state, &mut colors).with_flow(
                FlowFrame {
                    previous: frame,
                    current: frame,
                    viewport: (16, 16),
                    gain: 1.0,
                },
            );
            ctx.push_transform(camera.view_projection(), Mat4::IDENTITY).unwrap();
            ctx.draw_object(&ObjectIdentity::new("minecraft:pig", 1), Mat4::IDENTITY, |draw| {
                mesh.emit(&mut draw.buffer(&BatchDescriptor::entity()), [255; 4]);
                Ok(())
            });
            ctx.pop_transform().unwrap();
        }
        state.end_override();

        let pixels = backend.read_color(RenderDestination::Main).unwrap();
        let blues: Vec<u8> = pixels.chunks(3).map(|p| p[2]).collect();
        assert!(blues.contains(&FLOW_VALID));
        assert!(blues.iter().all(|&b| b == 0 || b == FLOW_VALID));
    }
}
