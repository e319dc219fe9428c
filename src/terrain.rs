//! The terrain facade: one heightfield plus the quadtree tessellated over it.
//!
//! Everything the renderer, editor and picking subsystems need goes through
//! [Terrain]; the split into [HeightField] and [QuadTree] is an internal
//! detail of this module.

use glam::{Vec2, Vec3};
use thiserror::Error;
use tracing::info;

use crate::{
    height_field::{HeightField, HeightFieldError, TerrainVertex},
    math::{BoundingBox, Frustum, Ray},
    patch::{DetailLevel, QuadPatch},
    perlin::{self, PerlinSettings},
    quad_tree::{Direction, Pick, QuadKey, QuadTree, QuadTreeError, Quadrant},
    terrain_mapping::TerrainMapping,
};

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error(transparent)]
    HeightField(#[from] HeightFieldError),
    #[error(transparent)]
    QuadTree(#[from] QuadTreeError),
}

pub struct Terrain {
    height_field: HeightField,
    quad_tree: QuadTree,
}

impl Terrain {
    /// Builds the terrain from a parsed `terrain_mapping.txt` and raw
    /// altitude levels in `[0, 255]`.
    pub fn new(
        mapping: &TerrainMapping,
        raw_heights: &[f32],
        leaf_size: u32,
    ) -> Result<Self, TerrainError> {
        let height_field = HeightField::from_mapping(mapping, raw_heights)?;
        Self::from_height_field(height_field, leaf_size)
    }

    pub fn from_height_field(
        height_field: HeightField,
        leaf_size: u32,
    ) -> Result<Self, TerrainError> {
        let quad_tree = QuadTree::new(&height_field, leaf_size)?;

        info!(
            size = height_field.size(),
            edge_size = height_field.edge_size(),
            leaf_size,
            "terrain created"
        );

        Ok(Self {
            height_field,
            quad_tree,
        })
    }

    /// Builds the terrain from generated noise instead of a loaded altitude
    /// map. The grid dimensions and scales still come from the mapping.
    pub fn generated(
        mapping: &TerrainMapping,
        settings: &PerlinSettings,
        leaf_size: u32,
    ) -> Result<Self, TerrainError> {
        let raw_heights = perlin::generate(settings, mapping.map_dx + 1);
        Self::new(mapping, &raw_heights, leaf_size)
    }

    pub fn height_field(&self) -> &HeightField {
        &self.height_field
    }

    pub fn quad_tree(&self) -> &QuadTree {
        &self.quad_tree
    }

    pub fn sample_height(&self, x: f32, y: f32) -> f32 {
        self.height_field.sample_height(x, y)
    }

    pub fn sample_normal(&self, x: f32, y: f32) -> Vec3 {
        self.height_field.sample_normal(x, y)
    }

    pub fn is_on_height_field(&self, position: Vec3) -> bool {
        self.height_field.is_on_height_field(position)
    }

    /// The global vertex buffer the patch index buffers refer into.
    pub fn vertices(&self) -> Vec<TerrainVertex> {
        self.height_field.vertices()
    }

    /// Rebuilds the per-vertex normals from the triangles of the current
    /// tessellation, so shading follows the rendered mesh rather than the
    /// full-resolution grid.
    pub fn rebuild_normals(&mut self) {
        let mut indices = Vec::new();
        self.quad_tree
            .with_patches(|_, patch| indices.extend_from_slice(patch.indices()));
        self.height_field.rebuild_normals(&indices);
    }

    pub fn tessellate(&mut self, key: QuadKey, target: DetailLevel) -> bool {
        self.quad_tree.tessellate(&self.height_field, key, target)
    }

    pub fn crack_fix(
        &mut self,
        key: QuadKey,
        direction: Direction,
        quadrant: Quadrant,
        neighbor_level: DetailLevel,
    ) -> bool {
        self.quad_tree.crack_fix(key, direction, quadrant, neighbor_level)
    }

    pub fn adjacent_quad_key(&self, key: QuadKey, direction: Direction) -> Option<QuadKey> {
        self.quad_tree.adjacent_quad_key(key, direction)
    }

    pub fn quad_key_for_position(&self, position: Vec2) -> Option<QuadKey> {
        self.quad_tree.quad_key_for_position(position)
    }

    pub fn detail_level(&self, key: QuadKey) -> Option<DetailLevel> {
        self.quad_tree.detail_level(key)
    }

    pub fn bounding_box(&self, key: QuadKey) -> Option<BoundingBox> {
        self.quad_tree.bounding_box(key)
    }

    pub fn with_visible_patches<F>(&self, frustum: &Frustum, f: F)
    where
        F: FnMut(QuadKey, &QuadPatch),
    {
        self.quad_tree.with_visible_patches(frustum, f);
    }

    pub fn with_patches<F>(&self, f: F)
    where
        F: FnMut(QuadKey, &QuadPatch),
    {
        self.quad_tree.with_patches(f);
    }

    pub fn with_changed_patches<F>(&self, f: F)
    where
        F: FnMut(QuadKey, &QuadPatch),
    {
        self.quad_tree.with_changed_patches(f);
    }

    pub fn pick(&self, ray: &Ray) -> Pick {
        self.quad_tree.pick(ray)
    }

    pub fn node_relationships(&self) -> Vec<(QuadKey, QuadKey)> {
        self.quad_tree.node_relationships()
    }

    pub fn tessellated_keys(&self) -> &[QuadKey] {
        self.quad_tree.tessellated_keys()
    }
}
