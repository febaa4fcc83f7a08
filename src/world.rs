//! Reference in-memory scene built on `hecs`.
//!
//! [`World`] holds voxel blocks grouped into cubic chunks plus free-standing
//! entities, and implements both [`SceneEnumerator`] and
//! [`VisibleSetProvider`], so it can drive every capture pass headless.
//!
//! # Example
//!
//! ```
//! use segcap::world::{RenderMesh, World};
//! use segcap::{MeshData, ObjectIdentity, Transform};
//! use glam::{IVec3, Vec3};
//!
//! let mut world = World::new(16);
//! world.set_block(IVec3::new(0, 0, 0), "minecraft:stone", [120, 120, 120, 255]);
//! world.spawn_object(
//!     ObjectIdentity::new("minecraft:pig", 1),
//!     Transform::from_position(Vec3::new(0.0, 1.5, 0.0)),
//!     RenderMesh::new(MeshData::cube(), [240, 170, 170, 255]),
//! );
//! assert_eq!(world.block_count(), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use glam::{IVec3, Mat4, Vec3};
use hecs::Entity;

use crate::camera::CameraState;
use crate::color::ObjectIdentity;
use crate::error::SceneError;
use crate::layer::BatchDescriptor;
use crate::mesh::{MeshData, Transform};
use crate::scene::{ChunkId, DrawContext, SceneEnumerator, VISIBLE_SET_VERSION, VisibleSetProvider};

/// Geometry of one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockShape {
    /// Full cube, drawn as opaque terrain.
    Cube,
    /// Crossed quads, drawn as cutout foliage.
    Cross,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub position: IVec3,
    pub identity: ObjectIdentity,
    pub color: [u8; 4],
    pub shape: BlockShape,
}

/// Component holding the blocks of one chunk.
#[derive(Clone, Debug, Default)]
pub struct Chunk {
    pub cell: IVec3,
    pub blocks: Vec<Block>,
}

/// Component that makes an entity drawable.
#[derive(Clone, Debug)]
pub struct RenderMesh {
    pub mesh: Arc<MeshData>,
    /// Host color, seen only by the main view.
    pub color: [u8; 4],
    pub descriptor: BatchDescriptor,
}

impl RenderMesh {
    pub fn new(mesh: MeshData, color: [u8; 4]) -> Self {
        Self {
            mesh: Arc::new(mesh),
            color,
            descriptor: BatchDescriptor::entity(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: BatchDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }
}

/// Instance id of the block at `position`: 21 bits per axis, top bit set so
/// it never meets a small entity id.
pub fn block_instance(position: IVec3) -> u64 {
    const MASK: u64 = (1 << 21) - 1;
    (1 << 63)
        | ((position.x as u64 & MASK) << 42)
        | ((position.y as u64 & MASK) << 21)
        | (position.z as u64 & MASK)
}

pub struct World {
    pub ecs: hecs::World,
    pub camera: CameraState,
    chunk_size: i32,
    chunks: HashMap<IVec3, Entity>,
    use_visible_set: bool,
    cube: Arc<MeshData>,
    cross: Arc<MeshData>,
}

impl World {
    pub fn new(chunk_size: i32) -> Self {
        Self {
            ecs: hecs::World::new(),
            camera: CameraState::default(),
            chunk_size: chunk_size.max(1),
            chunks: HashMap::new(),
            use_visible_set: true,
            cube: Arc::new(MeshData::cube()),
            cross: Arc::new(MeshData::cross_sprite()),
        }
    }

    /// Whether captures may use the chunk fast path.
    pub fn with_visible_set(mut self, enabled: bool) -> Self {
        self.use_visible_set = enabled;
        self
    }

    pub fn chunk_size(&self) -> i32 {
        self.chunk_size
    }

    pub fn cell_of(&self, position: IVec3) -> IVec3 {
        position.div_euclid(IVec3::splat(self.chunk_size))
    }

    pub fn set_block(&mut self, position: IVec3, class: &str, color: [u8; 4]) {
        self.place(position, class, color, BlockShape::Cube);
    }

    pub fn set_plant(&mut self, position: IVec3, class: &str, color: [u8; 4]) {
        self.place(position, class, color, BlockShape::Cross);
    }

    fn place(&mut self, position: IVec3, class: &str, color: [u8; 4], shape: BlockShape) {
        let block = Block {
            position,
            identity: ObjectIdentity::new(class, block_instance(position)),
            color,
            shape,
        };
        let cell = self.cell_of(position);
        let entity = *self.chunks.entry(cell).or_insert_with(|| {
            self.ecs.spawn((Chunk {
                cell,
                blocks: Vec::new(),
            },))
        });
        if let Ok(mut chunk) = self.ecs.get::<&mut Chunk>(entity) {
            chunk.blocks.retain(|b| b.position != position);
            chunk.blocks.push(block);
        }
    }

    pub fn remove_block(&mut self, position: IVec3) {
        let cell = self.cell_of(position);
        if let Some(&entity) = self.chunks.get(&cell)
            && let Ok(mut chunk) = self.ecs.get::<&mut Chunk>(entity)
        {
            chunk.blocks.retain(|b| b.position != position);
        }
    }

    pub fn block_count(&self) -> usize {
        self.ecs
            .query::<&Chunk>()
            .iter()
            .map(|(_, chunk)| chunk.blocks.len())
            .sum()
    }

    pub fn spawn_object(
        &mut self,
        identity: ObjectIdentity,
        transform: Transform,
        mesh: RenderMesh,
    ) -> Entity {
        self.ecs.spawn((identity, transform, mesh))
    }

    fn chunk_bounds(&self, cell: IVec3) -> (Vec3, Vec3) {
        let min = (cell * self.chunk_size).as_vec3();
        (min, min + Vec3::splat(self.chunk_size as f32))
    }

    fn draw_blocks(
        &self,
        chunk: &Chunk,
        origin: Vec3,
        ctx: &mut DrawContext<'_>,
    ) {
        for block in &chunk.blocks {
            let (mesh, descriptor) = match block.shape {
                BlockShape::Cube => (&self.cube, BatchDescriptor::opaque()),
                BlockShape::Cross => (&self.cross, BatchDescriptor::from_layer_name("cutout")),
            };
            let center = block.position.as_vec3() + Vec3::splat(0.5) - origin;
            ctx.draw_object(&block.identity, Mat4::from_translation(center), |draw| {
                mesh.emit(&mut draw.buffer(&descriptor), block.color);
                Ok(())
            });
        }
    }
}

impl SceneEnumerator for World {
    fn camera(&self) -> CameraState {
        self.camera
    }

    fn visible_set(&self) -> Option<&dyn VisibleSetProvider> {
        self.use_visible_set.then_some(self as &dyn VisibleSetProvider)
    }

    fn cell_size(&self) -> f32 {
        self.chunk_size as f32
    }

    fn draw_cell(&self, cell: IVec3, ctx: &mut DrawContext<'_>) -> Result<(), SceneError> {
        let Some(&entity) = self.chunks.get(&cell) else {
            return Ok(());
        };
        let chunk = self
            .ecs
            .get::<&Chunk>(entity)
            .map_err(|e| SceneError::Host(format!("chunk {cell}: {e}")))?;
        self.draw_blocks(&chunk, Vec3::ZERO, ctx);
        Ok(())
    }

    fn for_each_visible_object(&self, ctx: &mut DrawContext<'_>) -> Result<(), SceneError> {
        let frustum = self.camera.frustum();
        let mut query = self.ecs.query::<(&ObjectIdentity, &Transform, &RenderMesh)>();
        for (_, (identity, transform, render)) in query.iter() {
            let model = transform.matrix();
            let Some((min, max)) = render.mesh.bounds(model) else {
                continue;
            };
            if !frustum.intersects_aabb(min, max) {
                continue;
            }
            ctx.draw_object(identity, model, |draw| {
                render.mesh.emit(&mut draw.buffer(&render.descriptor), render.color);
                Ok(())
            });
        }
        Ok(())
    }
}

impl VisibleSetProvider for World {
    fn version(&self) -> u32 {
        VISIBLE_SET_VERSION
    }

    fn visible_chunks(&self) -> Result<Vec<ChunkId>, SceneError> {
        let frustum = self.camera.frustum();
        let mut visible: Vec<ChunkId> = self
            .chunks
            .iter()
            .filter(|&(&cell, _)| {
                let (min, max) = self.chunk_bounds(cell);
                frustum.intersects_aabb(min, max)
            })
            .map(|(_, entity)| ChunkId(entity.to_bits().get()))
            .collect();
        visible.sort();
        Ok(visible)
    }

    fn draw_chunk(&self, chunk: ChunkId, ctx: &mut DrawContext<'_>) -> Result<(), SceneError> {
        let entity = Entity::from_bits(chunk.0)
            .ok_or_else(|| SceneError::VisibleSetUnavailable(format!("bad chunk id {}", chunk.0)))?;
        let data = self
            .ecs
            .get::<&Chunk>(entity)
            .map_err(|e| SceneError::VisibleSetUnavailable(format!("chunk {}: {e}", chunk.0)))?;
        self.draw_blocks(&data, self.camera.position, ctx);
        Ok(())
    }
}
