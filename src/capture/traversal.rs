//! How a pass walks the static scene.
//!
//! The fast path replays the host's own culling result chunk by chunk. When
//! the host has no visible set, or it cannot be used this frame, the pass
//! scans the cells around the camera instead and frustum-tests each one.

use std::fmt;

use glam::{IVec3, Mat4, Vec3};

use crate::camera::CameraState;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, SceneError};
use crate::scene::{DrawContext, SceneEnumerator, VISIBLE_SET_VERSION, VisibleSetProvider};

/// Which strategy drew the static geometry of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Traversal {
    VisibleSet { chunks: usize },
    CellScan { cells: usize, culled: usize },
}

impl fmt::Display for Traversal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Traversal::VisibleSet { chunks } => write!(f, "visible set ({chunks} chunks)"),
            Traversal::CellScan { cells, culled } => {
                write!(f, "cell scan ({cells} cells, {culled} culled)")
            }
        }
    }
}

/// Draws the whole scene (static, then dynamic) into `ctx` under `camera`.
pub fn draw_scene(
    scene: &dyn SceneEnumerator,
    ctx: &mut DrawContext<'_>,
    camera: &CameraState,
    config: &CaptureConfig,
) -> Result<Traversal, CaptureError> {
    ctx.push_transform(camera.view_projection(), Mat4::IDENTITY)?;
    let traversal = draw_static(scene, ctx, camera, config)?;
    scene.for_each_visible_object(ctx)?;
    ctx.flush()?;
    ctx.pop_transform()?;
    Ok(traversal)
}

/// Draws static geometry, preferring the visible set.
pub fn draw_static(
    scene: &dyn SceneEnumerator,
    ctx: &mut DrawContext<'_>,
    camera: &CameraState,
    config: &CaptureConfig,
) -> Result<Traversal, CaptureError> {
    if let Some(provider) = scene.visible_set() {
        match visible_set_pass(provider, ctx, camera, config.flush_interval.max(1)) {
            Ok(chunks) => return Ok(Traversal::VisibleSet { chunks }),
            Err(CaptureError::Scene(err)) => {
                tracing::warn!(error = %err, "visible set unusable, scanning cells");
            }
            Err(other) => return Err(other),
        }
    }
    cell_scan(scene, ctx, camera, config)
}

fn visible_set_pass(
    provider: &dyn VisibleSetProvider,
    ctx: &mut DrawContext<'_>,
    camera: &CameraState,
    flush_interval: usize,
) -> Result<usize, CaptureError> {
    let found = provider.version();
    if found != VISIBLE_SET_VERSION {
        return Err(SceneError::UnsupportedVersion {
            expected: VISIBLE_SET_VERSION,
            found,
        }
        .into());
    }
    let chunks = provider.visible_chunks()?;

    // chunk vertices are camera-relative
    let offset = Mat4::from_translation(camera.position);
    ctx.push_transform(camera.view_projection() * offset, offset)?;
    let drawn = draw_chunks(provider, ctx, &chunks, flush_interval);
    ctx.pop_transform()?;
    drawn
}

fn draw_chunks(
    provider: &dyn VisibleSetProvider,
    ctx: &mut DrawContext<'_>,
    chunks: &[crate::scene::ChunkId],
    flush_interval: usize,
) -> Result<usize, CaptureError> {
    for (i, &chunk) in chunks.iter().enumerate() {
        provider.draw_chunk(chunk, ctx)?;
        if (i + 1) % flush_interval == 0 {
            ctx.flush()?;
        }
    }
    ctx.flush()?;
    Ok(chunks.len())
}

fn cell_scan(
    scene: &dyn SceneEnumerator,
    ctx: &mut DrawContext<'_>,
    camera: &CameraState,
    config: &CaptureConfig,
) -> Result<Traversal, CaptureError> {
    let size = scene.cell_size().max(f32::EPSILON);
    let radius = config.effective_scan_radius();
    let flush_interval = config.flush_interval.max(1);
    let frustum = camera.frustum();
    let center = (camera.position / size).floor().as_ivec3();

    let mut cells = 0;
    let mut culled = 0;
    for x in -radius..=radius {
        for y in -radius..=radius {
            for z in -radius..=radius {
                let cell = center + IVec3::new(x, y, z);
                let min = cell.as_vec3() * size;
                if !frustum.intersects_aabb(min, min + Vec3::splat(size)) {
                    culled += 1;
                    continue;
                }
                scene.draw_cell(cell, ctx)?;
                cells += 1;
                if cells % flush_interval == 0 {
                    ctx.flush()?;
                }
            }
        }
    }
    ctx.flush()?;
    Ok(Traversal::CellScan { cells, culled })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::color::{ColorAssigner, ObjectIdentity};
    use crate::layer::BatchDescriptor;
    use crate::mesh::MeshData;
    use crate::override_pipeline::{Keying, PassCounters, RenderPassState};
    use crate::scene::ChunkId;
    use crate::test_support::init_tracing;

    /// Host whose visible set can be made stale or broken.
    struct Host {
        version: u32,
        list_fails: bool,
        chunks: u64,
        chunks_drawn: Cell<usize>,
        cells_drawn: Cell<usize>,
    }

    impl Host {
        fn new(chunks: u64) -> Self {
            Self {
                version: VISIBLE_SET_VERSION,
                list_fails: false,
                chunks,
                chunks_drawn: Cell::new(0),
                cells_drawn: Cell::new(0),
            }
        }
    }

    impl VisibleSetProvider for Host {
        fn version(&self) -> u32 {
            self.version
        }

        fn visible_chunks(&self) -> Result<Vec<ChunkId>, SceneError> {
            if self.list_fails {
                return Err(SceneError::VisibleSetUnavailable("chunk list not built yet".into()));
            }
            Ok((0..self.chunks).map(ChunkId).collect())
        }

        fn draw_chunk(&self, chunk: ChunkId, ctx: &mut DrawContext<'_>) -> Result<(), SceneError> {
            self.chunks_drawn.set(self.chunks_drawn.get() + 1);
            let model = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
            ctx.draw_object(&ObjectIdentity::new("minecraft:stone", chunk.0), model, |draw| {
                MeshData::cube().emit(&mut draw.buffer(&BatchDescriptor::opaque()), [255; 4]);
                Ok(())
            });
            Ok(())
        }
    }

    impl SceneEnumerator for Host {
        fn camera(&self) -> CameraState {
            CameraState::new()
        }

        fn visible_set(&self) -> Option<&dyn VisibleSetProvider> {
            Some(self)
        }

        fn draw_cell(&self, _cell: IVec3, _ctx: &mut DrawContext<'_>) -> Result<(), SceneError> {
            self.cells_drawn.set(self.cells_drawn.get() + 1);
            Ok(())
        }

        fn for_each_visible_object(&self, _ctx: &mut DrawContext<'_>) -> Result<(), SceneError> {
            Ok(())
        }
    }

    fn run(host: &Host, config: &CaptureConfig) -> (Traversal, PassCounters) {
        init_tracing();
        let mut backend = SoftwareBackend::new(16, 16);
        let mut state = RenderPassState::new();
        let mut colors = ColorAssigner::new();
        state.begin_override(Keying::Class).unwrap();
        let traversal = {
            let mut ctx = DrawContext::new(&mut backend, &mut state, &mut colors);
            draw_scene(host, &mut ctx, &host.camera(), config).unwrap()
        };
        assert_eq!(backend.transform_depth(), 0);
        (traversal, state.counters())
    }

    #[test]
    fn visible_set_flushes_every_interval() {
        let host = Host::new(5);
        let config = CaptureConfig::new().flush_interval(2);
        let (traversal, counters) = run(&host, &config);

        assert_eq!(traversal, Traversal::VisibleSet { chunks: 5 });
        assert_eq!(host.chunks_drawn.get(), 5);
        assert_eq!(host.cells_drawn.get(), 0);
        // after chunks 2 and 4, then the tail
        assert_eq!(counters.units_flushed, 3);
        assert_eq!(counters.objects_drawn, 5);
    }

    #[test]
    fn failing_chunk_list_falls_back_to_cell_scan() {
        let host = Host {
            list_fails: true,
            ..Host::new(5)
        };
        let config = CaptureConfig::new().scan_radius(1, 16);
        let (traversal, _) = run(&host, &config);

        let Traversal::CellScan { cells, culled } = traversal else {
            panic!("expected a cell scan, got {traversal}");
        };
        assert_eq!(cells + culled, 27);
        assert!(cells > 0);
        assert_eq!(host.cells_drawn.get(), cells);
        assert_eq!(host.chunks_drawn.get(), 0);
    }

    #[test]
    fn version_mismatch_falls_back_to_cell_scan() {
        let host = Host {
            version: VISIBLE_SET_VERSION + 1,
            ..Host::new(5)
        };
        let config = CaptureConfig::new().scan_radius(1, 16);
        let (traversal, _) = run(&host, &config);

        assert!(matches!(traversal, Traversal::CellScan { .. }));
        assert_eq!(host.chunks_drawn.get(), 0);
        assert!(host.cells_drawn.get() > 0);
    }
}
