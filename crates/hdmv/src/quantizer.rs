//! Hexatree color quantizer.
//!
//! A branching-factor-16 tree of depth 8: each level consumes one bit of
//! every RGBA channel, concatenated into a 4-bit branch index. Leaves
//! accumulate channel sums and pixel counts; when the live leaf count
//! exceeds the target, the shallowest reducible branch is fused into a
//! single averaged leaf. Nodes live in an arena with an index free-list.

use crate::{HdmvError, Result};

/// Maximum tree depth (one level per channel bit).
const MAX_DEPTH: usize = 8;

/// Reduction tie-break policy between equally deep branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReductionPolicy {
    /// Fuse the branch representing the fewest pixels (preserves details).
    #[default]
    PreserveDetails,
    /// Fuse the branch representing the most pixels (smaller global error).
    MinimizeError,
}

/// Accumulated color data of a node.
#[derive(Debug, Clone, Copy, Default)]
struct RgbaData {
    r: u64,
    g: u64,
    b: u64,
    a: u64,
    /// Represented pixel count.
    rep: u64,
    /// Exact color for untouched leaves.
    rgba: u32,
}

impl RgbaData {
    fn from_rgba(rgba: u32, count: u64) -> Self {
        RgbaData {
            r: (((rgba >> 24) & 0xFF) as u64) * count,
            g: (((rgba >> 16) & 0xFF) as u64) * count,
            b: (((rgba >> 8) & 0xFF) as u64) * count,
            a: ((rgba & 0xFF) as u64) * count,
            rep: count,
            rgba,
        }
    }

    fn add(&mut self, other: RgbaData) {
        self.r += other.r;
        self.g += other.g;
        self.b += other.b;
        self.a += other.a;
        self.rep += other.rep;
    }

    /// Component-wise average, packed `R<<24 | G<<16 | B<<8 | A`.
    fn average(&self) -> u32 {
        if self.rep == 0 {
            return self.rgba;
        }
        (((self.r / self.rep) as u32) << 24)
            | (((self.g / self.rep) as u32) << 16)
            | (((self.b / self.rep) as u32) << 8)
            | ((self.a / self.rep) as u32)
    }
}

#[derive(Debug, Clone)]
struct Node {
    /// Maximum depth from this node to any leaf (0 for leaves).
    leaf_dist: i32,
    data: RgbaData,
    children: [Option<usize>; 16],
    /// Free-list link when the node is recycled.
    next_unused: Option<usize>,
}

impl Node {
    fn leaf(rgba: u32, count: u64) -> Self {
        Node {
            leaf_dist: 0,
            data: RgbaData::from_rgba(rgba, count),
            children: [None; 16],
            next_unused: None,
        }
    }
}

/// 4-bit branch index at `depth`: one bit of each channel.
fn branch_index(depth: usize, rgba: u32) -> usize {
    let idx = 7 - depth;
    (((rgba >> (21 + idx)) & 0x8)
        | ((rgba >> (14 + idx)) & 0x4)
        | ((rgba >> (7 + idx)) & 0x2)
        | ((rgba >> idx) & 0x1)) as usize
}

/// The quantizer: node arena, free-list head, root and live leaf count.
#[derive(Debug, Default)]
pub struct HexTreeQuantizer {
    nodes: Vec<Node>,
    unused_head: Option<usize>,
    root: Option<usize>,
    nb_leaves: usize,
    policy: ReductionPolicy,
}

impl HexTreeQuantizer {
    /// Creates an empty quantizer with the given reduction policy.
    pub fn new(policy: ReductionPolicy) -> Self {
        HexTreeQuantizer {
            policy,
            ..HexTreeQuantizer::default()
        }
    }

    /// Current number of live leaves (palette colors before reduction).
    pub fn nb_colors(&self) -> usize {
        self.nb_leaves
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.unused_head {
            Some(idx) => {
                self.unused_head = self.nodes[idx].next_unused;
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn free(&mut self, idx: usize) {
        self.nodes[idx].next_unused = self.unused_head;
        self.unused_head = Some(idx);
    }

    /// Feeds every pixel of an RGBA image, reducing on the fly to stay at
    /// or below `target_colors`.
    pub fn quantize(&mut self, pixels: &[u32], target_colors: usize) -> Result<()> {
        if !(2..=256).contains(&target_colors) {
            return Err(HdmvError::InvalidPaletteTarget(target_colors));
        }
        for &rgba in pixels {
            self.insert(rgba);
            while self.nb_leaves > target_colors {
                self.reduce()?;
            }
        }
        Ok(())
    }

    /// Inserts one pixel.
    pub fn insert(&mut self, rgba: u32) {
        self.root = Some(self.insert_at(self.root, rgba, 0));
    }

    fn insert_at(&mut self, node_idx: Option<usize>, rgba: u32, depth: usize) -> usize {
        let Some(idx) = node_idx else {
            self.nb_leaves += 1;
            return self.alloc(Node::leaf(rgba, 1));
        };

        if self.nodes[idx].leaf_dist == 0 {
            // Identical color or maximum depth: accumulate in place.
            if self.nodes[idx].data.rgba == rgba || depth >= MAX_DEPTH {
                self.nodes[idx].data.add(RgbaData::from_rgba(rgba, 1));
                return idx;
            }
            // Split: the leaf moves into a fresh arena slot and `idx`
            // becomes an internal node, keeping its index in the parent.
            let leaf = self.nodes[idx].clone();
            let leaf_idx = self.alloc(leaf.clone());
            self.nodes[idx] = Node {
                leaf_dist: 1,
                data: RgbaData {
                    rep: leaf.data.rep,
                    ..RgbaData::default()
                },
                children: [None; 16],
                next_unused: None,
            };
            self.nodes[idx].children[branch_index(depth, leaf.data.rgba)] = Some(leaf_idx);
        }

        let branch = branch_index(depth, rgba);
        let child = self.insert_at(self.nodes[idx].children[branch], rgba, depth + 1);
        self.nodes[idx].children[branch] = Some(child);
        let child_dist = self.nodes[child].leaf_dist;
        self.nodes[idx].leaf_dist = self.nodes[idx].leaf_dist.max(child_dist + 1);
        self.nodes[idx].data.rep += 1;
        idx
    }

    /// Picks the reducible child of `idx`: deepest leaf distance first,
    /// pixel count per policy on ties.
    fn reducible_child(&self, idx: usize) -> Option<usize> {
        let mut selected: Option<(usize, i32, u64)> = None;
        for child in self.nodes[idx].children.iter().flatten() {
            let node = &self.nodes[*child];
            if node.leaf_dist == 0 {
                continue;
            }
            let update = match selected {
                None => true,
                Some((_, dist, rep)) => {
                    if node.leaf_dist != dist {
                        node.leaf_dist > dist
                    } else {
                        match self.policy {
                            ReductionPolicy::PreserveDetails => node.data.rep <= rep,
                            ReductionPolicy::MinimizeError => node.data.rep > rep,
                        }
                    }
                }
            };
            if update {
                selected = Some((*child, node.leaf_dist, node.data.rep));
            }
        }
        selected.map(|(child, _, _)| child)
    }

    /// Fuses the shallowest reducible branch into one leaf.
    pub fn reduce(&mut self) -> Result<()> {
        let root = self
            .root
            .filter(|&idx| self.nodes[idx].leaf_dist > 0)
            .ok_or(HdmvError::InvalidPaletteTarget(self.nb_leaves))?;
        self.reduce_at(root);
        Ok(())
    }

    fn reduce_at(&mut self, idx: usize) {
        if self.nodes[idx].leaf_dist == 1 {
            // Fuse every leaf child into this node.
            let mut merged = RgbaData::default();
            let mut fused = 0usize;
            for branch in 0..16 {
                if let Some(child) = self.nodes[idx].children[branch] {
                    merged.add(self.nodes[child].data);
                    self.free(child);
                    self.nodes[idx].children[branch] = None;
                    fused += 1;
                }
            }
            merged.rgba = merged.average();
            self.nodes[idx].leaf_dist = 0;
            self.nodes[idx].data = merged;
            self.nb_leaves -= fused - 1;
            return;
        }

        let Some(child) = self.reducible_child(idx) else {
            return;
        };
        self.reduce_at(child);

        // Refresh leaf distance and collapse single-child chains.
        let mut nb_children = 0;
        let mut only_child = None;
        let mut max_dist = 0;
        for branch in 0..16 {
            if let Some(sub) = self.nodes[idx].children[branch] {
                nb_children += 1;
                only_child = Some((branch, sub));
                max_dist = max_dist.max(self.nodes[sub].leaf_dist);
            }
        }
        self.nodes[idx].leaf_dist = max_dist + 1;

        if nb_children == 1 {
            // The node only relays a single subtree: replace it in place
            // (the copied children still point at valid arena slots).
            let (_, sub) = only_child.expect("counted one child");
            let replacement = self.nodes[sub].clone();
            self.nodes[idx] = replacement;
            self.free(sub);
        }
    }

    /// Emits the palette: the averaged color of every live leaf.
    pub fn palette(&self) -> Vec<u32> {
        let mut colors = Vec::with_capacity(self.nb_leaves);
        if let Some(root) = self.root {
            self.collect(root, &mut colors);
        }
        colors
    }

    fn collect(&self, idx: usize, colors: &mut Vec<u32>) {
        let node = &self.nodes[idx];
        if node.leaf_dist == 0 {
            colors.push(node.data.average());
            return;
        }
        for child in node.children.iter().flatten() {
            self.collect(*child, colors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
        ((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | a as u32
    }

    #[test]
    fn test_distinct_colors_kept_below_target() {
        let mut quantizer = HexTreeQuantizer::new(ReductionPolicy::PreserveDetails);
        let pixels = [
            rgba(255, 0, 0, 255),
            rgba(0, 255, 0, 255),
            rgba(0, 0, 255, 255),
            rgba(255, 255, 255, 255),
        ];
        quantizer.quantize(&pixels, 16).unwrap();
        assert_eq!(quantizer.nb_colors(), 4);
        let palette = quantizer.palette();
        assert_eq!(palette.len(), 4);
        for pixel in pixels {
            assert!(palette.contains(&pixel));
        }
    }

    #[test]
    fn test_duplicate_pixels_accumulate() {
        let mut quantizer = HexTreeQuantizer::new(ReductionPolicy::PreserveDetails);
        let pixels = vec![rgba(10, 20, 30, 255); 1000];
        quantizer.quantize(&pixels, 16).unwrap();
        assert_eq!(quantizer.nb_colors(), 1);
        assert_eq!(quantizer.palette(), vec![rgba(10, 20, 30, 255)]);
    }

    #[test]
    fn test_reduction_enforces_target() {
        let mut quantizer = HexTreeQuantizer::new(ReductionPolicy::MinimizeError);
        // 64 gray levels, target 8 colors.
        let pixels: Vec<u32> = (0..64u32)
            .map(|level| rgba((level * 4) as u8, (level * 4) as u8, (level * 4) as u8, 255))
            .collect();
        quantizer.quantize(&pixels, 8).unwrap();
        assert!(quantizer.nb_colors() <= 8);
        assert!(quantizer.nb_colors() >= 2);
        let palette = quantizer.palette();
        assert_eq!(palette.len(), quantizer.nb_colors());
    }

    #[test]
    fn test_reduced_palette_is_stable() {
        // Palette idempotence: re-quantizing an already-reduced palette at
        // the same target leaves the colors unchanged.
        let mut quantizer = HexTreeQuantizer::new(ReductionPolicy::PreserveDetails);
        let pixels: Vec<u32> = (0..256u32)
            .map(|idx| rgba((idx % 16 * 16) as u8, (idx / 16 * 16) as u8, 128, 255))
            .collect();
        quantizer.quantize(&pixels, 32).unwrap();
        let palette = quantizer.palette();
        assert!(palette.len() <= 32);

        let mut second = HexTreeQuantizer::new(ReductionPolicy::PreserveDetails);
        second.quantize(&palette, palette.len().max(2)).unwrap();
        let mut again = second.palette();
        let mut first = palette.clone();
        first.sort_unstable();
        again.sort_unstable();
        assert_eq!(first, again);
    }

    #[test]
    fn test_invalid_target() {
        let mut quantizer = HexTreeQuantizer::new(ReductionPolicy::PreserveDetails);
        assert!(matches!(
            quantizer.quantize(&[0], 1),
            Err(HdmvError::InvalidPaletteTarget(1))
        ));
        assert!(matches!(
            quantizer.quantize(&[0], 300),
            Err(HdmvError::InvalidPaletteTarget(300))
        ));
    }
}
