//! Classification of draw batches into override fill modes.
//!
//! Hosts group draws into batches ("layers") that differ in how they are
//! shaded: opaque terrain, alpha-cutout foliage, translucent water, textured
//! characters, item sprites cut out of an atlas, and projected shadows. The
//! override passes must treat each group differently:
//!
//! - shadows are not part of any object and must not appear in masks;
//! - item sprites need their texture alpha so the silhouette is respected;
//! - characters and creatures are filled solid, never sampling a texture, so
//!   partially transparent texels cannot erode the silhouette;
//! - block-like surfaces keep the texture for alpha testing and cull back
//!   faces, since neighbouring cells would otherwise z-fight at shared seams.

use std::fmt;
use std::sync::Arc;

use crate::backend::TextureId;

/// Coarse kind of a draw batch, built once at the host boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    Shadow,
    ItemSprite,
    Entity,
    Opaque,
    Cutout,
    Translucent,
    Other,
}

impl SurfaceKind {
    /// Derives the kind from a host layer or texture name.
    ///
    /// Matching is ordered: shadow, item, entity, solid, cutout, translucent.
    /// Entity layers routinely carry "cutout" or "solid" in their name
    /// (`entity_cutout`), so the entity check has to come first.
    pub fn from_layer_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("shadow") {
            SurfaceKind::Shadow
        } else if name.contains("item") {
            SurfaceKind::ItemSprite
        } else if name.contains("entity") {
            SurfaceKind::Entity
        } else if name.contains("solid") {
            SurfaceKind::Opaque
        } else if name.contains("cutout") {
            SurfaceKind::Cutout
        } else if name.contains("translucent") {
            SurfaceKind::Translucent
        } else {
            SurfaceKind::Other
        }
    }
}

/// Describes one batch of draws handed to the override pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BatchDescriptor {
    pub kind: SurfaceKind,
    /// Originating layer name, kept for diagnostics.
    pub hint: Arc<str>,
    /// Texture sampled for alpha testing, if the batch has one.
    pub texture: Option<TextureId>,
}

impl BatchDescriptor {
    pub fn new(kind: SurfaceKind, hint: impl AsRef<str>) -> Self {
        Self {
            kind,
            hint: Arc::from(hint.as_ref()),
            texture: None,
        }
    }

    /// Builds a descriptor from a host layer name.
    pub fn from_layer_name(name: &str) -> Self {
        Self::new(SurfaceKind::from_layer_name(name), name)
    }

    pub fn with_texture(mut self, texture: TextureId) -> Self {
        self.texture = Some(texture);
        self
    }

    pub fn opaque() -> Self {
        Self::new(SurfaceKind::Opaque, "solid")
    }

    pub fn entity() -> Self {
        Self::new(SurfaceKind::Entity, "entity")
    }
}

/// How the override pass draws a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FillMode {
    /// Nothing from the batch reaches the target.
    Suppressed,
    /// Flat color, texture sampled only for its alpha.
    TexturedFlatFill { cull_back_faces: bool },
    /// Flat color with no texture input at all.
    SolidFlatFill,
}

impl FillMode {
    /// Whether texture, overlay, lighting and normal writes are kept.
    pub fn keeps_texture_attributes(&self) -> bool {
        matches!(self, FillMode::TexturedFlatFill { .. })
    }
}

impl fmt::Display for FillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillMode::Suppressed => f.write_str("suppressed"),
            FillMode::TexturedFlatFill { cull_back_faces: true } => f.write_str("textured+cull"),
            FillMode::TexturedFlatFill { cull_back_faces: false } => f.write_str("textured"),
            FillMode::SolidFlatFill => f.write_str("solid"),
        }
    }
}

/// Selects the fill mode for a batch. Total: every kind maps to one mode.
pub fn classify(batch: &BatchDescriptor) -> FillMode {
    match batch.kind {
        SurfaceKind::Shadow => FillMode::Suppressed,
        SurfaceKind::ItemSprite => FillMode::TexturedFlatFill {
            cull_back_faces: false,
        },
        SurfaceKind::Entity => FillMode::SolidFlatFill,
        SurfaceKind::Opaque | SurfaceKind::Cutout | SurfaceKind::Translucent => {
            FillMode::TexturedFlatFill {
                cull_back_faces: true,
            }
        }
        SurfaceKind::Other => FillMode::SolidFlatFill,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CULLED: FillMode = FillMode::TexturedFlatFill {
        cull_back_faces: true,
    };
    const SPRITE: FillMode = FillMode::TexturedFlatFill {
        cull_back_faces: false,
    };

    #[test]
    fn fixture_table() {
        let table = [
            ("shadow", SurfaceKind::Shadow, FillMode::Suppressed),
            ("entity_shadow", SurfaceKind::Shadow, FillMode::Suppressed),
            ("item_entity_translucent", SurfaceKind::ItemSprite, SPRITE),
            ("entity_cutout", SurfaceKind::Entity, FillMode::SolidFlatFill),
            ("textures/entity/zombie", SurfaceKind::Entity, FillMode::SolidFlatFill),
            ("solid", SurfaceKind::Opaque, CULLED),
            ("cutout_mipped", SurfaceKind::Cutout, CULLED),
            ("translucent", SurfaceKind::Translucent, CULLED),
            ("unknown_xyz", SurfaceKind::Other, FillMode::SolidFlatFill),
        ];

        for (name, kind, mode) in table {
            let batch = BatchDescriptor::from_layer_name(name);
            assert_eq!(batch.kind, kind, "{name}");
            assert_eq!(classify(&batch), mode, "{name}");
            // deterministic
            assert_eq!(classify(&batch), classify(&BatchDescriptor::from_layer_name(name)));
        }
    }

    #[test]
    fn entity_is_not_shadowed_by_cutout() {
        assert_eq!(SurfaceKind::from_layer_name("ENTITY_CUTOUT_NO_CULL"), SurfaceKind::Entity);
        assert_eq!(SurfaceKind::from_layer_name("entity_solid"), SurfaceKind::Entity);
    }

    #[test]
    fn only_textured_fill_keeps_attributes() {
        assert!(CULLED.keeps_texture_attributes());
        assert!(!FillMode::SolidFlatFill.keeps_texture_attributes());
        assert!(!FillMode::Suppressed.keeps_texture_attributes());
    }
}
