//! Terrain subsystem for a real-time strategy engine.
//!
//! The heightfield ([height_field::HeightField]) owns the elevation and normal
//! grids. A [quad_tree::QuadTree] subdivides the map into square leaf patches
//! whose index buffers are produced by the patch generator ([patch::QuadPatch])
//! at one of three detail levels. When neighboring patches end up at different
//! detail levels, the crack fixer splices the coarser patch's index buffer so
//! no T-junction seams remain along the shared edge.
//!
//! Rendering, asset IO and persistence are external collaborators: they consume
//! patch index buffers through the `with_*_patches` callbacks, heights and
//! normals through the sampling accessors, and the flat node relationship
//! lists through [quad_tree::QuadTree::node_relationships].

mod crack;

pub mod height_field;
pub mod math;
pub mod patch;
pub mod perlin;
pub mod quad_tree;
pub mod storage;
pub mod terrain;
pub mod terrain_mapping;

pub use height_field::{HeightField, HeightFieldError, TerrainVertex};
pub use math::{BoundingBox, Frustum, Plane, Ray};
pub use patch::{DetailLevel, QuadPatch};
pub use perlin::PerlinSettings;
pub use quad_tree::{Direction, PatchHit, Pick, QuadKey, QuadTree, QuadTreeError, Quadrant};
pub use terrain::{Terrain, TerrainError};
pub use terrain_mapping::TerrainMapping;
