use std::cell::Cell;

use glam::UVec2;

/// The three discrete coarseness levels a leaf patch can be tessellated at.
/// Transitions only ever happen one step at a time, in either direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DetailLevel {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl DetailLevel {
    pub fn finer(self) -> Option<Self> {
        match self {
            Self::Low => Some(Self::Medium),
            Self::Medium => Some(Self::High),
            Self::High => None,
        }
    }

    /// Vertex stride in heightfield grid units, relative to the coarsest leaf
    /// size. A [DetailLevel::Low] leaf of 16 cells samples every 8th vertex,
    /// its [DetailLevel::Medium] children every 4th, [DetailLevel::High]
    /// every 2nd.
    pub fn stride(self, leaf_size: u32) -> u32 {
        leaf_size >> (self as u32 + 1)
    }
}

/// The renderable content of a quadtree leaf: a triangle-list index buffer
/// over the global terrain vertex grid, covering the leaf's square region.
///
/// Emission order is part of the contract (the crack fixer relies on it):
/// cells are walked row-major from the bottom row up, and each cell emits
/// `[i0, i1, i2]` then `[i2, i3, i0]`, where `i0..i3` are the cell's
/// bottom-left, bottom-right, top-right and top-left corners. The shared
/// diagonal runs from the bottom-left to the top-right corner, so the first
/// triangle owns the cell's bottom and right boundary edges and the second
/// owns its top and left.
#[derive(Debug)]
pub struct QuadPatch {
    /// Region origin in grid units.
    offset: UVec2,
    /// Cells per side at this detail level.
    cells: u32,
    /// Vertex stride in grid units.
    stride: u32,
    indices: Vec<u32>,
    triangle_count: u32,
    changed: Cell<bool>,
}

impl QuadPatch {
    /// `grid_stride` is the global vertex row stride (heightfield samples per
    /// side), so every index refers into the shared terrain vertex buffer.
    pub fn generate(offset: UVec2, cells: u32, stride: u32, grid_stride: u32) -> Self {
        debug_assert!(cells > 0 && stride > 0);

        let mut indices = Vec::with_capacity(cells as usize * cells as usize * 6);

        for cy in 0..cells {
            for cx in 0..cells {
                let x0 = offset.x + cx * stride;
                let y0 = offset.y + cy * stride;
                let x1 = x0 + stride;
                let y1 = y0 + stride;

                let i0 = x0 + y0 * grid_stride;
                let i1 = x1 + y0 * grid_stride;
                let i2 = x1 + y1 * grid_stride;
                let i3 = x0 + y1 * grid_stride;

                indices.extend_from_slice(&[i0, i1, i2, i2, i3, i0]);
            }
        }

        let triangle_count = indices.len() as u32 / 3;

        Self {
            offset,
            cells,
            stride,
            indices,
            triangle_count,
            changed: Cell::new(true),
        }
    }

    pub fn offset(&self) -> UVec2 {
        self.offset
    }

    pub fn cells(&self) -> u32 {
        self.cells
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Region width in grid units.
    pub fn extent(&self) -> u32 {
        self.cells * self.stride
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    /// True if the index buffer changed since the last
    /// `QuadTree::with_changed_patches` visit. The external GPU uploader is
    /// expected to re-upload such patches; on a transient upload failure it
    /// simply leaves the flag for the next frame.
    pub fn is_changed(&self) -> bool {
        self.changed.get()
    }

    pub(crate) fn clear_changed(&self) {
        self.changed.set(false);
    }

    pub(crate) fn splice(&mut self, slot: usize, replacement: [u32; 3], appended: &[u32]) {
        self.indices[slot..slot + 3].copy_from_slice(&replacement);
        self.indices.extend_from_slice(appended);
        self.triangle_count = self.indices.len() as u32 / 3;
        self.changed.set(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_patch_is_two_by_two() {
        let patch = QuadPatch::generate(UVec2::ZERO, 2, 2, 9);
        assert_eq!(patch.triangle_count(), 8);
        assert_eq!(patch.indices().len(), 24);
        assert_eq!(patch.triangle_count() * 3, patch.indices().len() as u32);
    }

    #[test]
    fn high_patch_is_four_by_four() {
        let patch = QuadPatch::generate(UVec2::ZERO, 4, 1, 9);
        assert_eq!(patch.triangle_count(), 32);
    }

    #[test]
    fn generation_is_deterministic() {
        let a = QuadPatch::generate(UVec2::new(4, 4), 2, 2, 17);
        let b = QuadPatch::generate(UVec2::new(4, 4), 2, 2, 17);
        assert_eq!(a.indices(), b.indices());
    }

    #[test]
    fn first_cell_indices_follow_documented_layout() {
        // 8x8 grid (9 samples per side), one 2-unit cell at the origin.
        let patch = QuadPatch::generate(UVec2::ZERO, 1, 2, 9);
        // i0=(0,0) i1=(2,0) i2=(2,2) i3=(0,2)
        assert_eq!(patch.indices(), &[0, 2, 20, 20, 18, 0]);
    }

    #[test]
    fn offsets_shift_into_global_vertex_buffer() {
        let patch = QuadPatch::generate(UVec2::new(4, 4), 2, 2, 9);
        let first = patch.indices()[0];
        assert_eq!(first, 4 + 4 * 9);
        let max = *patch.indices().iter().max().unwrap();
        assert!(max < 9 * 9);
    }

    #[test]
    fn boundary_triangle_slots_match_emission_order() {
        // For a 2x2 patch: bottom-edge triangles at slots 0 and 6, top at 15
        // and 21, left at 3 and 15, right at 6 and 18.
        let patch = QuadPatch::generate(UVec2::ZERO, 2, 2, 9);
        let idx = |x: u32, y: u32| x + y * 9;
        let has = |slot: usize, a: u32, b: u32| {
            let tri = &patch.indices()[slot..slot + 3];
            tri.contains(&a) && tri.contains(&b)
        };

        // Bottom edge: segments (0,0)-(2,0) and (2,0)-(4,0).
        assert!(has(0, idx(0, 0), idx(2, 0)));
        assert!(has(6, idx(2, 0), idx(4, 0)));
        // Top edge.
        assert!(has(15, idx(2, 4), idx(0, 4)));
        assert!(has(21, idx(4, 4), idx(2, 4)));
        // Left edge.
        assert!(has(3, idx(0, 2), idx(0, 0)));
        assert!(has(15, idx(0, 4), idx(0, 2)));
        // Right edge.
        assert!(has(6, idx(4, 0), idx(4, 2)));
        assert!(has(18, idx(4, 2), idx(4, 4)));
    }

    #[test]
    fn detail_level_strides_halve() {
        assert_eq!(DetailLevel::Low.stride(16), 8);
        assert_eq!(DetailLevel::Medium.stride(16), 4);
        assert_eq!(DetailLevel::High.stride(16), 2);
    }

    #[test]
    fn changed_flag_set_on_generate_and_splice() {
        let mut patch = QuadPatch::generate(UVec2::ZERO, 2, 2, 9);
        assert!(patch.is_changed());
        patch.clear_changed();
        assert!(!patch.is_changed());
        let tri = [0, 1, 9];
        patch.splice(0, tri, &[1, 2, 9]);
        assert!(patch.is_changed());
        assert_eq!(patch.triangle_count() * 3, patch.indices().len() as u32);
    }
}
