use glam::{IVec2, UVec2, Vec3};

use crate::{patch::QuadPatch, terrain_mapping::TerrainMapping};

#[derive(Debug, thiserror::Error)]
pub enum HeightFieldError {
    #[error("heightfield size must be a power of two plus one, got {0}")]
    InvalidSize(u32),
    #[error("height data length {len} does not match a {size}x{size} grid")]
    DataSizeMismatch { len: usize, size: u32 },
    #[error("nominal edge size must be positive, got {0}")]
    InvalidEdgeSize(f32),
    #[error("terrain mapping must describe a square power-of-two map, got {dx}x{dy}")]
    InvalidMapping { dx: u32, dy: u32 },
}

/// Vertex data for the global terrain vertex buffer, in the layout the
/// external renderer uploads directly.
#[derive(Clone, Copy, Debug, bytemuck::NoUninit)]
#[repr(C)]
pub struct TerrainVertex {
    pub position: Vec3,
    pub normal: Vec3,
}

/// A square grid of evenly spaced elevation samples with a co-located grid of
/// per-vertex normals.
///
/// Nodes are the vertices of the grid; cells are the square areas between
/// adjacent nodes. World X/Y spans `(size - 1) * edge_size`, elevation is Z.
pub struct HeightField {
    /// Samples per side (always a power of two plus one).
    size: u32,
    /// World size of one cell edge.
    edge_size: f32,
    /// World-space elevation of each node.
    heights: Vec<f32>,
    /// Per-node normals, rebuilt from triangle data.
    normals: Vec<Vec3>,
}

impl Default for HeightField {
    /// An unpopulated heightfield. All samples degrade to 0 / up.
    fn default() -> Self {
        Self {
            size: 0,
            edge_size: 1.0,
            heights: Vec::new(),
            normals: Vec::new(),
        }
    }
}

impl HeightField {
    pub fn new(size: u32, edge_size: f32, heights: Vec<f32>) -> Result<Self, HeightFieldError> {
        if size < 2 || !(size - 1).is_power_of_two() {
            return Err(HeightFieldError::InvalidSize(size));
        }
        if heights.len() != (size * size) as usize {
            return Err(HeightFieldError::DataSizeMismatch {
                len: heights.len(),
                size,
            });
        }
        if !(edge_size > 0.0) {
            return Err(HeightFieldError::InvalidEdgeSize(edge_size));
        }

        let mut result = Self {
            size,
            edge_size,
            heights,
            normals: vec![Vec3::Z; (size * size) as usize],
        };

        // Seed the normal grid from the full-resolution triangulation.
        let full = QuadPatch::generate(UVec2::ZERO, size - 1, 1, size);
        result.rebuild_normals(full.indices());

        Ok(result)
    }

    /// Builds the heightfield from a `terrain_mapping.txt`-style config and
    /// raw altitude indices in `[0, 255]`, scaled by the mapping's altitude
    /// base.
    pub fn from_mapping(
        mapping: &TerrainMapping,
        raw_heights: &[f32],
    ) -> Result<Self, HeightFieldError> {
        if mapping.map_dx != mapping.map_dy || !mapping.map_dx.is_power_of_two() {
            return Err(HeightFieldError::InvalidMapping {
                dx: mapping.map_dx,
                dy: mapping.map_dy,
            });
        }

        let size = mapping.map_dx + 1;
        let heights = raw_heights
            .iter()
            .map(|h| h * mapping.altitude_map_height_base)
            .collect();

        Self::new(size, mapping.nominal_edge_size, heights)
    }

    /// Samples per side.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn edge_size(&self) -> f32 {
        self.edge_size
    }

    /// World extent along X and Y.
    pub fn extent(&self) -> f32 {
        self.size.saturating_sub(1) as f32 * self.edge_size
    }

    /// Index of a node in the global vertex buffer.
    #[inline]
    pub fn vertex_index(&self, x: u32, y: u32) -> u32 {
        x + y * self.size
    }

    /// Elevation of the node, clamping coordinates onto the grid.
    pub fn height_at(&self, node: IVec2) -> f32 {
        if self.heights.is_empty() {
            return 0.0;
        }

        let x = node.x.clamp(0, self.size as i32 - 1);
        let y = node.y.clamp(0, self.size as i32 - 1);
        self.heights[(x + y * self.size as i32) as usize]
    }

    pub fn normal_at(&self, node: IVec2) -> Vec3 {
        if self.normals.is_empty() {
            return Vec3::Z;
        }

        let x = node.x.clamp(0, self.size as i32 - 1);
        let y = node.y.clamp(0, self.size as i32 - 1);
        self.normals[(x + y * self.size as i32) as usize]
    }

    /// World position of a node.
    pub fn position_at(&self, node: IVec2) -> Vec3 {
        Vec3::new(
            node.x as f32 * self.edge_size,
            node.y as f32 * self.edge_size,
            self.height_at(node),
        )
    }

    /// Locates the cell containing the (clamped) world position and returns
    /// `(cell, fractional position within the cell)`.
    fn locate(&self, x: f32, y: f32) -> (IVec2, f32, f32) {
        let max = (self.size - 1) as f32;
        let fx = (x / self.edge_size).clamp(0.0, max);
        let fy = (y / self.edge_size).clamp(0.0, max);

        let cx = (fx.floor() as i32).min(self.size as i32 - 2);
        let cy = (fy.floor() as i32).min(self.size as i32 - 2);

        (IVec2::new(cx, cy), fx - cx as f32, fy - cy as f32)
    }

    /// Interpolated elevation at a world position. Out-of-range input is
    /// clamped onto the grid; an unpopulated heightfield samples as 0.
    ///
    /// The cell is split along its bottom-left to top-right diagonal and the
    /// sample interpolates over the containing triangle, matching the
    /// triangulation the patch generator emits.
    pub fn sample_height(&self, x: f32, y: f32) -> f32 {
        if self.heights.is_empty() || self.size < 2 {
            return 0.0;
        }

        let (cell, sqx, sqy) = self.locate(x, y);
        let h00 = self.height_at(cell);
        let h10 = self.height_at(cell + IVec2::X);
        let h01 = self.height_at(cell + IVec2::Y);
        let h11 = self.height_at(cell + IVec2::ONE);

        if sqx + sqy < 1.0 {
            h00 + (h10 - h00) * sqx + (h01 - h00) * sqy
        } else {
            h11 + (h01 - h11) * (1.0 - sqx) + (h10 - h11) * (1.0 - sqy)
        }
    }

    /// Interpolated, sanitized surface normal at a world position.
    ///
    /// Never returns NaN components or a zero vector: a zero normal would
    /// collapse a dependent orientation transform to a singular scale and make
    /// objects standing on the terrain vanish, so degenerate results are
    /// substituted with straight up.
    pub fn sample_normal(&self, x: f32, y: f32) -> Vec3 {
        if self.normals.is_empty() || self.size < 2 {
            return Vec3::Z;
        }

        let (cell, sqx, sqy) = self.locate(x, y);
        let n00 = self.normal_at(cell);
        let n10 = self.normal_at(cell + IVec2::X);
        let n01 = self.normal_at(cell + IVec2::Y);
        let n11 = self.normal_at(cell + IVec2::ONE);

        let n = if sqx + sqy < 1.0 {
            n00 + (n10 - n00) * sqx + (n01 - n00) * sqy
        } else {
            n11 + (n01 - n11) * (1.0 - sqx) + (n10 - n11) * (1.0 - sqy)
        };

        let n = Vec3::new(
            if n.x.is_nan() { 0.0 } else { n.x },
            if n.y.is_nan() { 0.0 } else { n.y },
            if n.z.is_nan() { 1.0 } else { n.z },
        );

        if n.length_squared() < 1e-12 {
            Vec3::Z
        } else {
            n.normalize()
        }
    }

    /// Whether the world position lies on the heightfield. The lower bound
    /// excludes negative coordinates.
    pub fn is_on_height_field(&self, position: Vec3) -> bool {
        let extent = self.extent();
        position.x >= 0.0 && position.x < extent && position.y >= 0.0 && position.y < extent
    }

    /// Minimum and maximum elevation over a square region of cells.
    pub fn min_max_over(&self, offset: UVec2, size: u32) -> (f32, f32) {
        let mut min_z = f32::INFINITY;
        let mut max_z = f32::NEG_INFINITY;

        for y in offset.y..=offset.y + size {
            for x in offset.x..=offset.x + size {
                let z = self.height_at(IVec2::new(x as i32, y as i32));
                min_z = min_z.min(z);
                max_z = max_z.max(z);
            }
        }

        (min_z, max_z)
    }

    /// The global vertex buffer in upload order.
    pub fn vertices(&self) -> Vec<TerrainVertex> {
        let mut vertices = Vec::with_capacity((self.size * self.size) as usize);
        for y in 0..self.size {
            for x in 0..self.size {
                let node = IVec2::new(x as i32, y as i32);
                vertices.push(TerrainVertex {
                    position: self.position_at(node),
                    normal: self.normal_at(node),
                });
            }
        }
        vertices
    }

    /// Recomputes per-vertex normals from the triangles of an index buffer:
    /// face normals are accumulated at each referenced vertex, renormalized
    /// and written back into the normal grid through the reverse index
    /// mapping. Vertices the buffer does not reference keep their normals.
    pub fn rebuild_normals(&mut self, indices: &[u32]) {
        if self.heights.is_empty() {
            return;
        }

        let node_of = |index: u32| {
            IVec2::new((index % self.size) as i32, (index / self.size) as i32)
        };

        let mut accum = vec![Vec3::ZERO; (self.size * self.size) as usize];

        for tri in indices.chunks_exact(3) {
            let a = self.position_at(node_of(tri[0]));
            let b = self.position_at(node_of(tri[1]));
            let c = self.position_at(node_of(tri[2]));

            let face = (b - a).cross(c - a);
            for &i in tri {
                if (i as usize) < accum.len() {
                    accum[i as usize] += face;
                }
            }
        }

        for (i, sum) in accum.iter().enumerate() {
            if *sum != Vec3::ZERO {
                self.normals[i] = sum.normalize_or(Vec3::Z);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(size: u32) -> HeightField {
        HeightField::new(size, 1.0, vec![0.0; (size * size) as usize]).unwrap()
    }

    fn bumpy(size: u32) -> HeightField {
        let heights = (0..size * size)
            .map(|i| ((i * 7919) % 13) as f32)
            .collect();
        HeightField::new(size, 1.0, heights).unwrap()
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(HeightField::new(8, 1.0, vec![0.0; 64]).is_err());
        assert!(HeightField::new(9, 1.0, vec![0.0; 10]).is_err());
        assert!(HeightField::new(9, 0.0, vec![0.0; 81]).is_err());
        assert!(HeightField::new(9, 1.0, vec![0.0; 81]).is_ok());
    }

    #[test]
    fn sample_height_stays_within_cell_corner_bounds() {
        let hf = bumpy(9);

        for yi in 0..16 {
            for xi in 0..16 {
                let x = xi as f32 * 0.51;
                let y = yi as f32 * 0.47;
                let h = hf.sample_height(x, y);

                let cx = (x.floor() as i32).min(7);
                let cy = (y.floor() as i32).min(7);
                let corners = [
                    hf.height_at(IVec2::new(cx, cy)),
                    hf.height_at(IVec2::new(cx + 1, cy)),
                    hf.height_at(IVec2::new(cx, cy + 1)),
                    hf.height_at(IVec2::new(cx + 1, cy + 1)),
                ];
                let min = corners.iter().cloned().fold(f32::INFINITY, f32::min);
                let max = corners.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                assert!(h >= min - 1e-4 && h <= max + 1e-4, "{h} not in [{min}, {max}]");
            }
        }
    }

    #[test]
    fn sample_height_hits_nodes_exactly() {
        let hf = bumpy(9);
        for y in 0..9 {
            for x in 0..9 {
                let expected = hf.height_at(IVec2::new(x, y));
                let got = hf.sample_height(x as f32, y as f32);
                assert!((got - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn out_of_range_samples_clamp_instead_of_failing() {
        let hf = bumpy(9);
        assert_eq!(hf.sample_height(-100.0, -100.0), hf.height_at(IVec2::ZERO));
        assert_eq!(
            hf.sample_height(100.0, 100.0),
            hf.height_at(IVec2::new(8, 8))
        );
    }

    #[test]
    fn unpopulated_field_samples_as_defaults() {
        let hf = HeightField::default();
        assert_eq!(hf.sample_height(3.0, 4.0), 0.0);
        assert_eq!(hf.sample_normal(3.0, 4.0), Vec3::Z);
        assert!(!hf.is_on_height_field(Vec3::new(1.0, 1.0, 0.0)));
    }

    #[test]
    fn sample_normal_is_sanitized() {
        let mut hf = flat(9);

        hf.normals[0] = Vec3::new(f32::NAN, f32::NAN, f32::NAN);
        let n = hf.sample_normal(0.0, 0.0);
        assert!(!n.x.is_nan() && !n.y.is_nan() && !n.z.is_nan());
        assert!(n.length() > 0.9);

        hf.normals[0] = Vec3::ZERO;
        hf.normals[1] = Vec3::ZERO;
        hf.normals[9] = Vec3::ZERO;
        hf.normals[10] = Vec3::ZERO;
        assert_eq!(hf.sample_normal(0.2, 0.2), Vec3::Z);
    }

    #[test]
    fn flat_field_normals_point_up() {
        let hf = flat(9);
        for y in 0..9 {
            for x in 0..9 {
                let n = hf.normal_at(IVec2::new(x, y));
                assert!((n - Vec3::Z).length() < 1e-4);
            }
        }
    }

    #[test]
    fn sloped_field_normals_tilt_against_the_slope() {
        // Heights rise along +X, so normals lean towards -X.
        let size = 9_u32;
        let heights = (0..size * size).map(|i| (i % size) as f32).collect();
        let hf = HeightField::new(size, 1.0, heights).unwrap();

        let n = hf.sample_normal(4.0, 4.0);
        assert!(n.x < -0.1);
        assert!(n.z > 0.5);
        assert!((n.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn is_on_height_field_bounds() {
        let hf = flat(9);
        assert!(hf.is_on_height_field(Vec3::new(0.0, 0.0, 0.0)));
        assert!(hf.is_on_height_field(Vec3::new(7.9, 7.9, 0.0)));
        assert!(!hf.is_on_height_field(Vec3::new(-0.1, 4.0, 0.0)));
        assert!(!hf.is_on_height_field(Vec3::new(4.0, 8.0, 0.0)));
    }

    #[test]
    fn min_max_over_region() {
        let mut heights = vec![0.0; 81];
        heights[3 + 3 * 9] = 5.0;
        heights[1 + 1 * 9] = -2.0;
        let hf = HeightField::new(9, 1.0, heights).unwrap();

        let (min, max) = hf.min_max_over(UVec2::ZERO, 4);
        assert_eq!(min, -2.0);
        assert_eq!(max, 5.0);

        let (min, max) = hf.min_max_over(UVec2::new(4, 4), 4);
        assert_eq!(min, 0.0);
        assert_eq!(max, 0.0);
    }

    #[test]
    fn vertices_cover_the_grid_in_index_order() {
        let hf = bumpy(9);
        let vertices = hf.vertices();
        assert_eq!(vertices.len(), 81);

        let idx = hf.vertex_index(3, 2) as usize;
        assert_eq!(vertices[idx].position.x, 3.0);
        assert_eq!(vertices[idx].position.y, 2.0);
        assert_eq!(vertices[idx].position.z, hf.height_at(IVec2::new(3, 2)));
    }
}
