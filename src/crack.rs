//! Crack elimination between neighboring patches of different detail levels.
//!
//! When a fine patch borders a coarse one, the coarse side rasterizes each
//! boundary segment as one straight edge while the fine side has real height
//! samples in between, which shows up as a seam. The fix splices the coarser
//! patch: the triangle owning a coarse boundary segment is removed and
//! replaced by a fan of smaller triangles whose apex is the removed
//! triangle's interior vertex and whose base steps along the boundary at the
//! finer neighbor's stride. Both sides then draw the identical fine-density
//! polyline and no T-junction remains.
//!
//! All splice positions are derived from the patch generator's documented
//! emission order; the triangle carrying a given boundary segment is located
//! by searching the index list for the segment's two endpoint indices, which
//! also stays correct when a corner cell was already spliced along its other
//! boundary edge.

use glam::{IVec2, UVec2};
use tracing::{debug, warn};

use crate::{patch::QuadPatch, quad_tree::Direction};

/// Splices `patch`'s boundary along `direction` wherever the finer neighbor
/// overlaps it. `span` is the overlapped interval in absolute grid units
/// along the edge axis (X for top/bottom edges, Y for left/right);
/// `neighbor_stride` is the neighbor's vertex stride. Only cells fully
/// covered by the span are touched. Returns the number of triangles added.
pub(crate) fn splice_edge(
    patch: &mut QuadPatch,
    direction: Direction,
    span: (u32, u32),
    neighbor_stride: u32,
    grid_stride: u32,
) -> u32 {
    let stride = patch.stride();

    if neighbor_stride == 0 || neighbor_stride >= stride || stride % neighbor_stride != 0 {
        warn!(
            stride,
            neighbor_stride, "crack fix skipped: neighbor stride is not a finer divisor"
        );
        return 0;
    }

    let offset = patch.offset();
    let extent = patch.extent();
    let axis_origin = match direction {
        Direction::Top | Direction::Bottom => offset.x,
        Direction::Left | Direction::Right => offset.y,
    };

    let mut added = 0;

    for cell in 0..patch.cells() {
        let a = axis_origin + cell * stride;
        let b = a + stride;
        if a < span.0 || b > span.1 {
            continue;
        }

        let (pa, pb) = match direction {
            Direction::Bottom => (UVec2::new(a, offset.y), UVec2::new(b, offset.y)),
            Direction::Top => (
                UVec2::new(a, offset.y + extent),
                UVec2::new(b, offset.y + extent),
            ),
            Direction::Left => (UVec2::new(offset.x, a), UVec2::new(offset.x, b)),
            Direction::Right => (
                UVec2::new(offset.x + extent, a),
                UVec2::new(offset.x + extent, b),
            ),
        };

        added += fix_cell(patch, pa, pb, neighbor_stride, grid_stride);
    }

    added
}

/// Replaces the triangle owning the boundary segment `pa..pb` with a fan at
/// the finer stride. Returns the net number of triangles added.
fn fix_cell(patch: &mut QuadPatch, pa: UVec2, pb: UVec2, neighbor_stride: u32, grid_stride: u32) -> u32 {
    let index_of = |p: IVec2| p.x as u32 + p.y as u32 * grid_stride;

    let ia = index_of(pa.as_ivec2());
    let ib = index_of(pb.as_ivec2());

    let Some((tri_index, tri)) = patch
        .indices()
        .chunks_exact(3)
        .enumerate()
        .find(|(_, tri)| tri.contains(&ia) && tri.contains(&ib))
    else {
        // Map edge data mismatch or an already-refined segment. A leftover
        // seam is preferable to corrupting the buffer.
        warn!(ia, ib, "crack fix skipped: no triangle owns the boundary segment");
        return 0;
    };

    let slot = tri_index * 3;
    let tri = [tri[0], tri[1], tri[2]];

    // Rotate so the boundary segment is the leading pair; the third vertex is
    // the fan apex. Rotation preserves winding.
    let pair = |u: u32, v: u32| (u == ia && v == ib) || (u == ib && v == ia);
    let (u, v, apex) = if pair(tri[0], tri[1]) {
        (tri[0], tri[1], tri[2])
    } else if pair(tri[1], tri[2]) {
        (tri[1], tri[2], tri[0])
    } else {
        (tri[2], tri[0], tri[1])
    };

    let pu = if u == ia { pa } else { pb };
    let pv = if v == ib { pb } else { pa };

    let fan = patch.stride() / neighbor_stride;
    let step = (pv.as_ivec2() - pu.as_ivec2()) / fan as i32;

    let mut replacement = [0_u32; 3];
    let mut appended = Vec::with_capacity((fan as usize - 1) * 3);

    for j in 0..fan {
        let q0 = pu.as_ivec2() + step * j as i32;
        let q1 = q0 + step;
        let triangle = [index_of(q0), index_of(q1), apex];
        if j == 0 {
            replacement = triangle;
        } else {
            appended.extend_from_slice(&triangle);
        }
    }

    patch.splice(slot, replacement, &appended);

    debug!(slot, fan, "spliced boundary segment into triangle fan");

    fan - 1
}

#[cfg(test)]
pub(crate) fn boundary_segments(
    patch: &QuadPatch,
    direction: Direction,
    grid_stride: u32,
) -> Vec<(u32, u32)> {
    let offset = patch.offset();
    let extent = patch.extent();

    let on_edge = |p: UVec2| match direction {
        Direction::Bottom => p.y == offset.y,
        Direction::Top => p.y == offset.y + extent,
        Direction::Left => p.x == offset.x,
        Direction::Right => p.x == offset.x + extent,
    };
    let axis = |p: UVec2| match direction {
        Direction::Top | Direction::Bottom => p.x,
        Direction::Left | Direction::Right => p.y,
    };
    let coords = |i: u32| UVec2::new(i % grid_stride, i / grid_stride);

    let mut segments = Vec::new();
    for tri in patch.indices().chunks_exact(3) {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            let (pa, pb) = (coords(a), coords(b));
            if on_edge(pa) && on_edge(pb) {
                segments.push((axis(pa).min(axis(pb)), axis(pa).max(axis(pb))));
            }
        }
    }
    segments.sort_unstable();
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    const GRID: u32 = 17; // 16x16 heightfield

    fn expected_segments(
        patch_offset: u32,
        extent: u32,
        stride: u32,
        span: (u32, u32),
        fine: u32,
    ) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        let mut a = patch_offset;
        while a < patch_offset + extent {
            let step = if a >= span.0 && a + stride <= span.1 {
                fine
            } else {
                stride
            };
            let end = (a + stride).min(patch_offset + extent);
            let mut s = a;
            while s < end {
                out.push((s, s + step));
                s += step;
            }
            a = end;
        }
        out
    }

    #[test]
    fn single_level_half_edge_fix() {
        // A Low patch (2 cells of 4) fixed against a Medium neighbor covering
        // the first half of its bottom edge.
        for direction in Direction::iter() {
            for half in 0..2_u32 {
                let mut patch = QuadPatch::generate(UVec2::new(8, 8), 2, 4, GRID);
                // The edge axis origin is 8 on both axes for this patch.
                let span = (8 + half * 4, 8 + half * 4 + 4);

                let added = splice_edge(&mut patch, direction, span, 2, GRID);
                assert_eq!(added, 1, "{direction:?} half {half}");
                assert_eq!(patch.triangle_count(), 9);
                assert_eq!(patch.triangle_count() * 3, patch.indices().len() as u32);

                let segments = boundary_segments(&patch, direction, GRID);
                assert_eq!(segments, expected_segments(8, 8, 4, span, 2));

                assert!(patch.indices().iter().all(|&i| i < GRID * GRID));
            }
        }
    }

    #[test]
    fn two_level_gap_uses_longer_fan() {
        // Low patch (cells of 8) against a High neighbor (stride 1): 8 fine
        // segments replace one boundary triangle.
        let mut patch = QuadPatch::generate(UVec2::ZERO, 2, 8, GRID);
        let added = splice_edge(&mut patch, Direction::Bottom, (0, 8), 1, GRID);
        assert_eq!(added, 7);
        assert_eq!(patch.triangle_count(), 15);

        let segments = boundary_segments(&patch, Direction::Bottom, GRID);
        assert_eq!(segments, expected_segments(0, 16, 8, (0, 8), 1));
    }

    #[test]
    fn full_edge_fix_touches_both_cells() {
        let mut patch = QuadPatch::generate(UVec2::ZERO, 2, 4, GRID);
        let added = splice_edge(&mut patch, Direction::Top, (0, 8), 2, GRID);
        assert_eq!(added, 2);

        let segments = boundary_segments(&patch, Direction::Top, GRID);
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|(a, b)| b - a == 2));
    }

    #[test]
    fn corner_cell_survives_fixes_on_both_edges() {
        // The corner cell's first triangle owns both its bottom and right
        // boundary edges. After the bottom fix, the right edge segment lives
        // in one of the fan triangles and must still be found.
        let mut patch = QuadPatch::generate(UVec2::ZERO, 2, 4, GRID);
        splice_edge(&mut patch, Direction::Bottom, (0, 8), 2, GRID);
        let added = splice_edge(&mut patch, Direction::Right, (0, 8), 2, GRID);
        assert_eq!(added, 2);

        let bottom = boundary_segments(&patch, Direction::Bottom, GRID);
        let right = boundary_segments(&patch, Direction::Right, GRID);
        assert!(bottom.iter().all(|(a, b)| b - a == 2));
        assert!(right.iter().all(|(a, b)| b - a == 2));
        assert_eq!(patch.triangle_count() * 3, patch.indices().len() as u32);
    }

    #[test]
    fn no_op_when_neighbor_is_not_finer() {
        let mut patch = QuadPatch::generate(UVec2::ZERO, 2, 4, GRID);
        assert_eq!(splice_edge(&mut patch, Direction::Top, (0, 8), 4, GRID), 0);
        assert_eq!(splice_edge(&mut patch, Direction::Top, (0, 8), 8, GRID), 0);
        assert_eq!(patch.triangle_count(), 8);
    }

    #[test]
    fn partial_span_leaves_uncovered_cells_alone() {
        // Span covering only half a cell fixes nothing.
        let mut patch = QuadPatch::generate(UVec2::ZERO, 2, 4, GRID);
        assert_eq!(splice_edge(&mut patch, Direction::Top, (0, 2), 2, GRID), 0);
        assert_eq!(patch.triangle_count(), 8);
    }

    #[test]
    fn winding_is_preserved_by_the_fan() {
        // All triangles keep counter-clockwise orientation in grid space.
        let signed_area = |tri: &[u32]| {
            let p = |i: u32| IVec2::new((i % GRID) as i32, (i / GRID) as i32);
            let (a, b, c) = (p(tri[0]), p(tri[1]), p(tri[2]));
            (b - a).perp_dot(c - a)
        };

        let mut patch = QuadPatch::generate(UVec2::ZERO, 2, 4, GRID);
        let before: Vec<i32> = patch.indices().chunks_exact(3).map(signed_area).collect();
        assert!(before.iter().all(|&a| a > 0));

        for direction in Direction::iter() {
            splice_edge(&mut patch, direction, (0, 8), 2, GRID);
        }

        let after: Vec<i32> = patch.indices().chunks_exact(3).map(signed_area).collect();
        assert!(after.iter().all(|&a| a > 0));
    }
}
