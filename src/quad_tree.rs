//! Quadtree over the heightfield.
//!
//! The tree subdivides the height grid down to square leaves of `leaf_size`
//! cells, each holding a [QuadPatch] index buffer. Leaves start at
//! [DetailLevel::Low] and move one detail step at a time, in either
//! direction: a low leaf splits into four medium children (the "level-2"
//! quads, registered by parent key and quadrant), a medium child regenerates
//! in place at high detail, and the reverse steps regenerate at medium or
//! collapse the split back into the parent leaf. Every edit re-resolves
//! crack fixes on the shared edges it touched, so the mesh stays free of
//! T-junctions no matter the order of edits.
//!
//! All mutation goes through `&mut self`, so exclusive access during an edit
//! is enforced by the borrow checker rather than by convention. Read-side
//! traversal (frustum culling, picking, change collection) is `&self`.

use ahash::HashMap;
use glam::{IVec2, UVec2, Vec2, Vec3};
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    crack,
    height_field::HeightField,
    math::{BoundingBox, Frustum, Ray},
    patch::{DetailLevel, QuadPatch},
    storage::{Handle, Storage},
};

/// Flat, monotonically assigned node identifier. The root is always key `1`;
/// keys are never reused, so a persisted list of `(key, parent)` pairs plus
/// the tessellated-parents list reconstructs the exact tree shape.
pub type QuadKey = u32;

const ROOT_KEY: QuadKey = 1;

#[derive(Debug, Error)]
pub enum QuadTreeError {
    #[error("height field is not populated")]
    UnpopulatedHeightField,
    #[error("invalid leaf size {leaf_size}; must be a power of two of at least 4")]
    InvalidLeafSize { leaf_size: u32 },
    #[error("leaf size {leaf_size} does not divide the height field extent {extent}")]
    LeafSizeDoesNotDivide { leaf_size: u32, extent: u32 },
}

/// Child position inside a parent quad. Grid Y grows towards [Direction::Top].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum Quadrant {
    TopLeft = 0,
    TopRight = 1,
    BottomLeft = 2,
    BottomRight = 3,
}

impl Quadrant {
    /// Grid offset of this quadrant inside a parent whose children are
    /// `half` units wide.
    fn offset(self, half: u32) -> UVec2 {
        match self {
            Self::TopLeft => UVec2::new(0, half),
            Self::TopRight => UVec2::new(half, half),
            Self::BottomLeft => UVec2::ZERO,
            Self::BottomRight => UVec2::new(half, 0),
        }
    }

    /// The sibling reached by stepping `direction` without leaving the
    /// parent, if any.
    fn sibling(self, direction: Direction) -> Option<Quadrant> {
        match (self, direction) {
            (Self::TopLeft, Direction::Right) => Some(Self::TopRight),
            (Self::TopLeft, Direction::Bottom) => Some(Self::BottomLeft),
            (Self::TopRight, Direction::Left) => Some(Self::TopLeft),
            (Self::TopRight, Direction::Bottom) => Some(Self::BottomRight),
            (Self::BottomLeft, Direction::Top) => Some(Self::TopLeft),
            (Self::BottomLeft, Direction::Right) => Some(Self::BottomRight),
            (Self::BottomRight, Direction::Top) => Some(Self::TopRight),
            (Self::BottomRight, Direction::Left) => Some(Self::BottomLeft),
            _ => None,
        }
    }

    /// The quadrant occupied after crossing the parent's edge along
    /// `direction` into the neighboring parent.
    fn mirrored(self, direction: Direction) -> Quadrant {
        match direction {
            Direction::Top | Direction::Bottom => match self {
                Self::TopLeft => Self::BottomLeft,
                Self::TopRight => Self::BottomRight,
                Self::BottomLeft => Self::TopLeft,
                Self::BottomRight => Self::TopRight,
            },
            Direction::Left | Direction::Right => match self {
                Self::TopLeft => Self::TopRight,
                Self::TopRight => Self::TopLeft,
                Self::BottomLeft => Self::BottomRight,
                Self::BottomRight => Self::BottomLeft,
            },
        }
    }
}

/// Edge of a quad, named in grid space: [Direction::Top] is `+Y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum Direction {
    Top,
    Bottom,
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Top => Self::Bottom,
            Self::Bottom => Self::Top,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    fn step(self) -> IVec2 {
        match self {
            Self::Top => IVec2::new(0, 1),
            Self::Bottom => IVec2::new(0, -1),
            Self::Left => IVec2::new(-1, 0),
            Self::Right => IVec2::new(1, 0),
        }
    }

    /// The two quadrants of a parent touching its edge in this direction,
    /// the one nearest the edge-axis origin first.
    fn edge_quadrants(self) -> [Quadrant; 2] {
        match self {
            Self::Top => [Quadrant::TopLeft, Quadrant::TopRight],
            Self::Bottom => [Quadrant::BottomLeft, Quadrant::BottomRight],
            Self::Left => [Quadrant::BottomLeft, Quadrant::TopLeft],
            Self::Right => [Quadrant::BottomRight, Quadrant::TopRight],
        }
    }
}

struct Node {
    key: QuadKey,
    parent: Option<Handle<Node>>,
    quadrant: Option<Quadrant>,
    /// Region origin in grid units.
    offset: UVec2,
    /// Region width in grid units.
    size: u32,
    min_z: f32,
    max_z: f32,
    level: u32,
    children: [Option<Handle<Node>>; 4],
    /// `Some` for renderable leaves, `None` for branches.
    patch: Option<QuadPatch>,
    detail: DetailLevel,
}

impl Node {
    fn bounding_box(&self, edge_size: f32) -> BoundingBox {
        let min = self.offset.as_vec2() * edge_size;
        let max = (self.offset + UVec2::splat(self.size)).as_vec2() * edge_size;
        BoundingBox {
            min: Vec3::new(min.x, min.y, self.min_z),
            max: Vec3::new(max.x, max.y, self.max_z),
        }
    }

    /// Span of the given edge along its axis (X for top/bottom, Y for
    /// left/right), in grid units.
    fn edge_span(&self, direction: Direction) -> (u32, u32) {
        match direction {
            Direction::Top | Direction::Bottom => (self.offset.x, self.offset.x + self.size),
            Direction::Left | Direction::Right => (self.offset.y, self.offset.y + self.size),
        }
    }
}

/// A leaf hit by [QuadTree::pick].
#[derive(Clone, Copy, Debug)]
pub struct PatchHit {
    pub key: QuadKey,
    pub distance: f32,
    pub position: Vec3,
}

/// The nearest and second-nearest leaf hits of a ray query. Picking logic
/// downstream uses the second hit to disambiguate near shared edges.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pick {
    pub nearest: Option<PatchHit>,
    pub second: Option<PatchHit>,
}

impl Pick {
    fn insert(&mut self, hit: PatchHit) {
        match self.nearest {
            Some(nearest) if nearest.distance <= hit.distance => {
                match self.second {
                    Some(second) if second.distance <= hit.distance => {}
                    _ => self.second = Some(hit),
                }
            }
            _ => {
                self.second = self.nearest.replace(hit);
            }
        }
    }
}

pub struct QuadTree {
    nodes: Storage<Node>,
    by_key: HashMap<QuadKey, Handle<Node>>,
    /// Level-2 registry: which child key occupies each quadrant of a
    /// tessellated parent.
    children_of: HashMap<(QuadKey, Quadrant), QuadKey>,
    root: Handle<Node>,
    next_key: QuadKey,
    leaf_size: u32,
    /// Depth at which the uniform subdivision bottoms out.
    leaf_level: u32,
    /// Vertex row stride of the backing height grid.
    grid_stride: u32,
    /// Grid cells per side of the whole terrain.
    extent: u32,
    edge_size: f32,
    /// Parents that were split into level-2 children, in edit order.
    tessellated: Vec<QuadKey>,
}

impl QuadTree {
    pub fn new(height_field: &HeightField, leaf_size: u32) -> Result<Self, QuadTreeError> {
        let grid_stride = height_field.size();
        if grid_stride < 2 {
            return Err(QuadTreeError::UnpopulatedHeightField);
        }
        let extent = grid_stride - 1;

        if leaf_size < 4 || !leaf_size.is_power_of_two() {
            return Err(QuadTreeError::InvalidLeafSize { leaf_size });
        }
        if leaf_size > extent || extent % leaf_size != 0 {
            return Err(QuadTreeError::LeafSizeDoesNotDivide { leaf_size, extent });
        }

        let mut tree = Self {
            nodes: Storage::default(),
            by_key: HashMap::default(),
            children_of: HashMap::default(),
            root: Handle::default(),
            next_key: ROOT_KEY,
            leaf_size,
            leaf_level: (extent / leaf_size).trailing_zeros(),
            grid_stride,
            extent,
            edge_size: height_field.edge_size(),
            tessellated: Vec::new(),
        };

        tree.root = tree.build_node(height_field, UVec2::ZERO, extent, 0, None, None);

        debug!(
            nodes = tree.nodes.len(),
            leaf_size, "built terrain quad tree"
        );

        Ok(tree)
    }

    fn build_node(
        &mut self,
        height_field: &HeightField,
        offset: UVec2,
        size: u32,
        level: u32,
        parent: Option<Handle<Node>>,
        quadrant: Option<Quadrant>,
    ) -> Handle<Node> {
        let key = self.allocate_key();
        let (min_z, max_z) = height_field.min_max_over(offset, size);

        let patch = (size == self.leaf_size).then(|| {
            let stride = DetailLevel::Low.stride(self.leaf_size);
            QuadPatch::generate(offset, size / stride, stride, self.grid_stride)
        });
        let is_leaf = patch.is_some();

        let handle = self.nodes.insert(Node {
            key,
            parent,
            quadrant,
            offset,
            size,
            min_z,
            max_z,
            level,
            children: [None; 4],
            patch,
            detail: DetailLevel::Low,
        });
        self.by_key.insert(key, handle);

        if !is_leaf {
            let half = size / 2;
            let mut children = [None; 4];
            for quadrant in Quadrant::iter() {
                children[quadrant as usize] = Some(self.build_node(
                    height_field,
                    offset + quadrant.offset(half),
                    half,
                    level + 1,
                    Some(handle),
                    Some(quadrant),
                ));
            }
            if let Some(node) = self.nodes.get_mut(handle) {
                node.children = children;
            }
        }

        handle
    }

    fn allocate_key(&mut self) -> QuadKey {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    pub fn leaf_size(&self) -> u32 {
        self.leaf_size
    }

    /// Moves a quad one detail step in either direction: a low leaf splits
    /// into four medium children, a medium child regenerates at high detail
    /// or back at medium, and medium collapses into the parent low leaf
    /// (addressed by either the split parent's key or a child's). Any other
    /// key/level combination is a no-op returning `false`; the caller may be
    /// walking keys speculatively. Affected shared edges are re-resolved
    /// before returning.
    pub fn tessellate(
        &mut self,
        height_field: &HeightField,
        key: QuadKey,
        target: DetailLevel,
    ) -> bool {
        let Some(&handle) = self.by_key.get(&key) else {
            warn!(key, "tessellate: unknown quad key");
            return false;
        };
        let (current, parent, level) = match self.nodes.get(handle) {
            Some(node) => (
                node.patch.is_some().then_some(node.detail),
                node.parent,
                node.level,
            ),
            None => return false,
        };

        match (current, target) {
            (Some(DetailLevel::Low), DetailLevel::Medium) => {
                self.split_to_medium(height_field, handle)
            }
            (Some(DetailLevel::Medium), DetailLevel::High) => {
                self.regenerate_at(handle, DetailLevel::High)
            }
            (Some(DetailLevel::High), DetailLevel::Medium) => {
                self.regenerate_at(handle, DetailLevel::Medium)
            }
            // A medium child coarsens by collapsing its parent's split.
            (Some(DetailLevel::Medium), DetailLevel::Low) => match parent {
                Some(parent) => self.merge_to_low(parent),
                None => false,
            },
            // The split parent can be addressed directly.
            (None, DetailLevel::Low) if level == self.leaf_level => self.merge_to_low(handle),
            _ => {
                debug!(key, ?current, ?target, "tessellate: not a single detail step");
                false
            }
        }
    }

    fn split_to_medium(&mut self, height_field: &HeightField, handle: Handle<Node>) -> bool {
        let (key, offset, size, level) = match self.nodes.get(handle) {
            Some(node) => (node.key, node.offset, node.size, node.level),
            None => return false,
        };

        let half = size / 2;
        let stride = DetailLevel::Medium.stride(self.leaf_size);
        let mut children = [None; 4];
        let mut child_keys = Vec::with_capacity(4);

        for quadrant in Quadrant::iter() {
            let child_offset = offset + quadrant.offset(half);
            let (min_z, max_z) = height_field.min_max_over(child_offset, half);
            let child_key = self.allocate_key();

            let child_handle = self.nodes.insert(Node {
                key: child_key,
                parent: Some(handle),
                quadrant: Some(quadrant),
                offset: child_offset,
                size: half,
                min_z,
                max_z,
                level: level + 1,
                children: [None; 4],
                patch: Some(QuadPatch::generate(
                    child_offset,
                    half / stride,
                    stride,
                    self.grid_stride,
                )),
                detail: DetailLevel::Medium,
            });
            self.by_key.insert(child_key, child_handle);
            self.children_of.insert((key, quadrant), child_key);
            children[quadrant as usize] = Some(child_handle);
            child_keys.push(child_key);
        }

        if let Some(node) = self.nodes.get_mut(handle) {
            node.patch = None;
            node.children = children;
        }
        self.tessellated.push(key);

        let mut affected = child_keys.clone();
        for &child in &child_keys {
            for direction in Direction::iter() {
                affected.extend(self.adjacent_patch_keys(child, direction));
            }
        }
        affected.sort_unstable();
        affected.dedup();
        for repair_key in affected {
            self.repair(repair_key);
        }

        debug!(key, "split leaf into four medium children");
        true
    }

    /// Regenerates a leaf in place at `detail` and re-resolves the cracks
    /// around it.
    fn regenerate_at(&mut self, handle: Handle<Node>, detail: DetailLevel) -> bool {
        if detail.stride(self.leaf_size) == 0 {
            warn!(
                leaf_size = self.leaf_size,
                ?detail,
                "detail level needs a leaf size of at least 8"
            );
            return false;
        }

        let key = match self.nodes.get_mut(handle) {
            Some(node) => {
                node.detail = detail;
                node.key
            }
            None => return false,
        };

        let mut affected = vec![key];
        for direction in Direction::iter() {
            affected.extend(self.adjacent_patch_keys(key, direction));
        }
        affected.sort_unstable();
        affected.dedup();
        for repair_key in affected {
            self.repair(repair_key);
        }

        debug!(key, ?detail, "regenerated leaf in place");
        true
    }

    /// Collapses a split parent's four level-2 children back into one low
    /// leaf, retiring the child keys. Children must all be back at medium
    /// first; a high child blocks the merge until it coarsens one step.
    fn merge_to_low(&mut self, handle: Handle<Node>) -> bool {
        let (key, offset, size, children) = match self.nodes.get(handle) {
            Some(node) if node.patch.is_none() && node.level == self.leaf_level => {
                (node.key, node.offset, node.size, node.children)
            }
            _ => return false,
        };

        let mut child_keys = Vec::with_capacity(4);
        for child in children.into_iter().flatten() {
            match self.nodes.get(child) {
                Some(node) if node.patch.is_some() && node.detail == DetailLevel::Medium => {
                    child_keys.push((child, node.key))
                }
                _ => {
                    debug!(key, "merge: children are not all at medium detail");
                    return false;
                }
            }
        }
        if child_keys.len() != 4 {
            return false;
        }

        // Collect the repair set while the children still resolve.
        let mut affected = vec![key];
        for &(_, child_key) in &child_keys {
            for direction in Direction::iter() {
                affected.extend(self.adjacent_patch_keys(child_key, direction));
            }
        }

        for (child_handle, child_key) in child_keys {
            self.by_key.remove(&child_key);
            self.nodes.remove(child_handle);
        }
        for quadrant in Quadrant::iter() {
            self.children_of.remove(&(key, quadrant));
        }
        self.tessellated.retain(|&k| k != key);

        let stride = DetailLevel::Low.stride(self.leaf_size);
        let grid_stride = self.grid_stride;
        if let Some(node) = self.nodes.get_mut(handle) {
            node.children = [None; 4];
            node.detail = DetailLevel::Low;
            node.patch = Some(QuadPatch::generate(offset, size / stride, stride, grid_stride));
        }

        // Retired child keys in the set fall out in repair's key lookup.
        affected.sort_unstable();
        affected.dedup();
        for repair_key in affected {
            self.repair(repair_key);
        }

        debug!(key, "merged level-2 children back into a low leaf");
        true
    }

    /// Regenerates a leaf's patch and re-splices it against every finer
    /// adjacent leaf. Idempotent; unknown or non-leaf keys are ignored.
    fn repair(&mut self, key: QuadKey) {
        let Some(&handle) = self.by_key.get(&key) else {
            return;
        };
        let (offset, size, detail) = match self.nodes.get(handle) {
            Some(node) if node.patch.is_some() => (node.offset, node.size, node.detail),
            _ => return,
        };

        let stride = detail.stride(self.leaf_size);
        let my_span = |direction| match direction {
            Direction::Top | Direction::Bottom => (offset.x, offset.x + size),
            Direction::Left | Direction::Right => (offset.y, offset.y + size),
        };

        let mut splices = Vec::new();
        for direction in Direction::iter() {
            let (a0, a1) = my_span(direction);
            for neighbor_key in self.adjacent_patch_keys(key, direction) {
                let Some(&neighbor_handle) = self.by_key.get(&neighbor_key) else {
                    continue;
                };
                let Some(neighbor) = self.nodes.get(neighbor_handle) else {
                    continue;
                };
                let neighbor_stride = neighbor.detail.stride(self.leaf_size);
                if neighbor_stride >= stride {
                    continue;
                }
                let (b0, b1) = neighbor.edge_span(direction);
                let span = (a0.max(b0), a1.min(b1));
                if span.0 < span.1 {
                    splices.push((direction, span, neighbor_stride));
                }
            }
        }

        let grid_stride = self.grid_stride;
        if let Some(node) = self.nodes.get_mut(handle) {
            node.patch = Some(QuadPatch::generate(offset, size / stride, stride, grid_stride));
            if let Some(patch) = node.patch.as_mut() {
                for (direction, span, neighbor_stride) in splices {
                    crack::splice_edge(patch, direction, span, neighbor_stride, grid_stride);
                }
            }
        }
    }

    /// Single-edge crack fix, the editor-facing counterpart of the automatic
    /// repair done by [QuadTree::tessellate]: splices `key`'s edge in
    /// `direction` over the half covered by the neighbor child in `quadrant`,
    /// at `neighbor_level`'s vertex density. No-op unless the neighbor is
    /// strictly finer.
    pub fn crack_fix(
        &mut self,
        key: QuadKey,
        direction: Direction,
        quadrant: Quadrant,
        neighbor_level: DetailLevel,
    ) -> bool {
        let Some(&handle) = self.by_key.get(&key) else {
            warn!(key, "crack fix: unknown quad key");
            return false;
        };
        let (offset, size, detail) = match self.nodes.get(handle) {
            Some(node) if node.patch.is_some() => (node.offset, node.size, node.detail),
            _ => {
                debug!(key, "crack fix: node is not a leaf");
                return false;
            }
        };

        let neighbor_stride = neighbor_level.stride(self.leaf_size);
        if neighbor_stride == 0 || neighbor_stride >= detail.stride(self.leaf_size) {
            debug!(key, ?neighbor_level, "crack fix: neighbor is not finer");
            return false;
        }

        let half = size / 2;
        let first_half = match direction {
            Direction::Top | Direction::Bottom => {
                matches!(quadrant, Quadrant::TopLeft | Quadrant::BottomLeft)
            }
            Direction::Left | Direction::Right => {
                matches!(quadrant, Quadrant::BottomLeft | Quadrant::BottomRight)
            }
        };
        let origin = match direction {
            Direction::Top | Direction::Bottom => offset.x,
            Direction::Left | Direction::Right => offset.y,
        };
        let start = if first_half { origin } else { origin + half };
        let span = (start, start + half);

        let grid_stride = self.grid_stride;
        match self
            .nodes
            .get_mut(handle)
            .and_then(|node| node.patch.as_mut())
        {
            Some(patch) => crack::splice_edge(patch, direction, span, neighbor_stride, grid_stride) > 0,
            None => false,
        }
    }

    /// The key of the neighbor in `direction`, always resolving to a leaf
    /// where one exists: level-2 children step through the sibling and
    /// mirror relationships, and a base-grid step that lands on a split
    /// parent descends to the level-2 child facing the shared edge. At the
    /// map edge there is no neighbor. When the neighboring parent was never
    /// split, its own key is returned, since its leaf covers the region.
    pub fn adjacent_quad_key(&self, key: QuadKey, direction: Direction) -> Option<QuadKey> {
        let &handle = self.by_key.get(&key)?;
        let node = self.nodes.get(handle)?;

        if node.level <= self.leaf_level {
            let target = node.offset.as_ivec2() + direction.step() * node.size as i32;
            if target.x < 0
                || target.y < 0
                || target.x >= self.extent as i32
                || target.y >= self.extent as i32
            {
                return None;
            }
            let neighbor = self.handle_at(target.as_uvec2(), node.size)?;
            let neighbor_node = self.nodes.get(neighbor)?;

            if neighbor_node.patch.is_none() && neighbor_node.level == self.leaf_level {
                // Split leaf: descend to the child on its facing edge.
                for quadrant in direction.opposite().edge_quadrants() {
                    if let Some(&child) = self.children_of.get(&(neighbor_node.key, quadrant)) {
                        return Some(child);
                    }
                }
            }
            return Some(neighbor_node.key);
        }

        // Level-2 child: stay inside the parent when possible, otherwise
        // cross into the adjacent parent's mirrored quadrant.
        let quadrant = node.quadrant?;
        let parent_key = self.nodes.get(node.parent?)?.key;

        if let Some(sibling) = quadrant.sibling(direction) {
            return self.children_of.get(&(parent_key, sibling)).copied();
        }

        let neighbor_parent = self.adjacent_quad_key(parent_key, direction)?;
        let mirrored = quadrant.mirrored(direction);
        match self.children_of.get(&(neighbor_parent, mirrored)) {
            Some(&child) => Some(child),
            None => Some(neighbor_parent),
        }
    }

    /// Descends to the node of exactly `size` at `target`, or the leaf
    /// covering it if subdivision stopped earlier.
    fn handle_at(&self, target: UVec2, size: u32) -> Option<Handle<Node>> {
        let mut handle = self.root;
        loop {
            let node = self.nodes.get(handle)?;
            if target.x < node.offset.x
                || target.y < node.offset.y
                || target.x >= node.offset.x + node.size
                || target.y >= node.offset.y + node.size
            {
                return None;
            }
            if node.size == size {
                return (node.offset == target).then_some(handle);
            }
            if node.size < size {
                return None;
            }

            let half = node.size / 2;
            let local = target - node.offset;
            let quadrant = match (local.x < half, local.y < half) {
                (true, true) => Quadrant::BottomLeft,
                (false, true) => Quadrant::BottomRight,
                (true, false) => Quadrant::TopLeft,
                (false, false) => Quadrant::TopRight,
            };
            match node.children[quadrant as usize] {
                Some(child) => handle = child,
                None => return Some(handle),
            }
        }
    }

    /// Keys of every leaf patch sharing a positive-length edge segment with
    /// `key` across `direction`, regardless of size.
    fn adjacent_patch_keys(&self, key: QuadKey, direction: Direction) -> Vec<QuadKey> {
        let Some(&handle) = self.by_key.get(&key) else {
            return Vec::new();
        };
        let Some(node) = self.nodes.get(handle) else {
            return Vec::new();
        };
        let (a0, a1) = node.edge_span(direction);

        self.nodes
            .iter()
            .filter(|&(_, other)| other.patch.is_some() && other.key != node.key)
            .filter(|&(_, other)| {
                let touching = match direction {
                    Direction::Right => other.offset.x == node.offset.x + node.size,
                    Direction::Left => other.offset.x + other.size == node.offset.x,
                    Direction::Top => other.offset.y == node.offset.y + node.size,
                    Direction::Bottom => other.offset.y + other.size == node.offset.y,
                };
                let (b0, b1) = other.edge_span(direction);
                touching && a0.max(b0) < a1.min(b1)
            })
            .map(|(_, other)| other.key)
            .collect()
    }

    /// The leaf patch containing the world-space position, descending into
    /// level-2 children where present.
    pub fn quad_key_for_position(&self, position: Vec2) -> Option<QuadKey> {
        let grid = position / self.edge_size;
        if grid.x < 0.0 || grid.y < 0.0 || grid.x >= self.extent as f32 || grid.y >= self.extent as f32
        {
            return None;
        }

        let mut handle = self.root;
        loop {
            let node = self.nodes.get(handle)?;
            if node.patch.is_some() {
                return Some(node.key);
            }
            let half = node.size as f32 / 2.0;
            let local = grid - node.offset.as_vec2();
            let quadrant = match (local.x < half, local.y < half) {
                (true, true) => Quadrant::BottomLeft,
                (false, true) => Quadrant::BottomRight,
                (true, false) => Quadrant::TopLeft,
                (false, false) => Quadrant::TopRight,
            };
            handle = node.children[quadrant as usize]?;
        }
    }

    /// The detail level of a leaf, or `None` for branches and unknown keys.
    /// A parent split into level-2 children is no longer a leaf.
    pub fn detail_level(&self, key: QuadKey) -> Option<DetailLevel> {
        let &handle = self.by_key.get(&key)?;
        let node = self.nodes.get(handle)?;
        node.patch.is_some().then_some(node.detail)
    }

    pub fn bounding_box(&self, key: QuadKey) -> Option<BoundingBox> {
        let &handle = self.by_key.get(&key)?;
        Some(self.nodes.get(handle)?.bounding_box(self.edge_size))
    }

    /// Visits every leaf patch whose bounding box intersects the frustum.
    pub fn with_visible_patches<F>(&self, frustum: &Frustum, mut f: F)
    where
        F: FnMut(QuadKey, &QuadPatch),
    {
        self.visit_visible(self.root, frustum, &mut f);
    }

    fn visit_visible<F>(&self, handle: Handle<Node>, frustum: &Frustum, f: &mut F)
    where
        F: FnMut(QuadKey, &QuadPatch),
    {
        let Some(node) = self.nodes.get(handle) else {
            return;
        };
        if !frustum.intersects_bounding_box(&node.bounding_box(self.edge_size)) {
            return;
        }
        if let Some(patch) = &node.patch {
            f(node.key, patch);
            return;
        }
        for child in node.children.into_iter().flatten() {
            self.visit_visible(child, frustum, f);
        }
    }

    /// Visits every leaf patch unconditionally.
    pub fn with_patches<F>(&self, mut f: F)
    where
        F: FnMut(QuadKey, &QuadPatch),
    {
        for (_, node) in self.nodes.iter() {
            if let Some(patch) = &node.patch {
                f(node.key, patch);
            }
        }
    }

    /// Visits every leaf patch whose index buffer changed since the last
    /// visit and marks it clean. The caller re-uploads those buffers.
    pub fn with_changed_patches<F>(&self, mut f: F)
    where
        F: FnMut(QuadKey, &QuadPatch),
    {
        for (_, node) in self.nodes.iter() {
            if let Some(patch) = &node.patch {
                if patch.is_changed() {
                    f(node.key, patch);
                    patch.clear_changed();
                }
            }
        }
    }

    /// Ray query over the leaf bounding boxes, keeping the two closest hits.
    pub fn pick(&self, ray: &Ray) -> Pick {
        let mut pick = Pick::default();
        self.pick_node(self.root, ray, &mut pick);
        pick
    }

    fn pick_node(&self, handle: Handle<Node>, ray: &Ray, pick: &mut Pick) {
        let Some(node) = self.nodes.get(handle) else {
            return;
        };
        let Some(distance) = node.bounding_box(self.edge_size).intersect_ray(ray) else {
            return;
        };
        if node.patch.is_some() {
            pick.insert(PatchHit {
                key: node.key,
                distance,
                position: ray.origin + ray.direction * distance,
            });
            return;
        }
        for child in node.children.into_iter().flatten() {
            self.pick_node(child, ray, pick);
        }
    }

    /// Flat `(key, parent key)` pairs for every non-root node, sorted by key.
    /// Together with [QuadTree::tessellated_keys] this is the whole persisted
    /// shape of the tree.
    pub fn node_relationships(&self) -> Vec<(QuadKey, QuadKey)> {
        let mut relationships: Vec<_> = self
            .nodes
            .iter()
            .filter_map(|(_, node)| {
                let parent = self.nodes.get(node.parent?)?;
                Some((node.key, parent.key))
            })
            .collect();
        relationships.sort_unstable();
        relationships
    }

    /// Keys of parents that were split into level-2 children, in edit order.
    pub fn tessellated_keys(&self) -> &[QuadKey] {
        &self.tessellated
    }
}
