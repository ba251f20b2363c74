//! Tag tree coding (Annex B.10), used by Tier-2 packet headers to signal
//! per-code-block inclusion and the count of leading all-zero bit-planes.
//!
//! A tag tree is a quad-pyramid over a 2-D grid of leaves: each internal
//! node's value is the minimum of its (up to four) children, down to a
//! single root. Encoding/decoding a leaf against a threshold walks the
//! path from root to leaf, emitting or consuming one bit per node until
//! either the node's value is pinned down or the threshold is reached,
//! skipping nodes already resolved by an earlier, lower threshold.

use crate::bitio::{BitReader, BitWriter};
use crate::error::Result;

const UNKNOWN: u32 = u32::MAX;

struct Level {
    width: usize,
    height: usize,
    value: Vec<u32>,
    low: Vec<u32>,
}

impl Level {
    fn new(width: usize, height: usize, fill: u32) -> Self {
        Self {
            width,
            height,
            value: vec![fill; width * height],
            low: vec![0; width * height],
        }
    }
}

pub struct TagTree {
    levels: Vec<Level>,
}

impl TagTree {
    /// Builds a tree with `width`x`height` leaves, ready for decoding: every
    /// node's value starts unresolved.
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_fill(width, height, UNKNOWN)
    }

    /// Builds a tree whose leaves already hold known values (the encoder
    /// side), propagating minimums up to the root.
    pub fn from_leaf_values(width: usize, height: usize, leaves: &[u32]) -> Self {
        assert_eq!(leaves.len(), width * height);
        let mut tree = Self::with_fill(width, height, UNKNOWN);
        tree.levels[0].value.copy_from_slice(leaves);
        for lvl in 1..tree.levels.len() {
            let (lw, lh) = (tree.levels[lvl - 1].width, tree.levels[lvl - 1].height);
            let (cw, ch) = (tree.levels[lvl].width, tree.levels[lvl].height);
            for cy in 0..ch {
                for cx in 0..cw {
                    let mut min = UNKNOWN;
                    for dy in 0..2 {
                        for dx in 0..2 {
                            let (x, y) = (cx * 2 + dx, cy * 2 + dy);
                            if x < lw && y < lh {
                                min = min.min(tree.levels[lvl - 1].value[y * lw + x]);
                            }
                        }
                    }
                    tree.levels[lvl].value[cy * cw + cx] = min;
                }
            }
        }
        tree
    }

    fn with_fill(width: usize, height: usize, fill: u32) -> Self {
        let mut levels = Vec::new();
        let (mut w, mut h) = (width.max(1), height.max(1));
        loop {
            levels.push(Level::new(w, h, fill));
            if w == 1 && h == 1 {
                break;
            }
            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }
        Self { levels }
    }

    /// Resets the incremental `low` state so the next encode/decode call
    /// for every leaf starts a fresh pass (used between independent
    /// packets, each of which re-derives inclusion from scratch).
    pub fn reset(&mut self) {
        for level in &mut self.levels {
            level.low.iter_mut().for_each(|v| *v = 0);
        }
    }

    /// Path of (level, flat index) pairs from the leaf at (x, y) up to the
    /// root, leaf first.
    fn path(&self, x: usize, y: usize) -> Vec<(usize, usize)> {
        let mut path = Vec::with_capacity(self.levels.len());
        let (mut cx, mut cy) = (x, y);
        for (lvl, level) in self.levels.iter().enumerate() {
            path.push((lvl, cy * level.width + cx));
            cx /= 2;
            cy /= 2;
        }
        path
    }

    /// Encodes whether the leaf's known value is below `threshold`,
    /// writing only the bits not already implied by a prior, lower
    /// threshold call for the same leaf.
    pub fn encode(&mut self, writer: &mut BitWriter, x: usize, y: usize, threshold: u32) {
        let mut path = self.path(x, y);
        path.reverse();
        let mut low = 0u32;
        for (lvl, idx) in path {
            let level = &mut self.levels[lvl];
            if low < level.low[idx] {
                low = level.low[idx];
            }
            while low < threshold {
                if low >= level.value[idx] {
                    writer.write_bit(1);
                    break;
                } else {
                    writer.write_bit(0);
                    low += 1;
                }
            }
            level.low[idx] = low;
        }
    }

    /// Decodes whether the leaf's (a priori unknown) value is below
    /// `threshold`, reading exactly the bits [`encode`] would have written
    /// for the same sequence of thresholds.
    pub fn decode(
        &mut self,
        reader: &mut BitReader<'_>,
        x: usize,
        y: usize,
        threshold: u32,
    ) -> Result<bool> {
        let mut path = self.path(x, y);
        path.reverse();
        let mut low = 0u32;
        let mut last = (0usize, 0usize);
        for (lvl, idx) in path {
            let level = &mut self.levels[lvl];
            if low < level.low[idx] {
                low = level.low[idx];
            }
            while low < threshold && low < level.value[idx] {
                if reader.read_bit()? == 1 {
                    level.value[idx] = low;
                } else {
                    low += 1;
                }
            }
            level.low[idx] = low;
            last = (lvl, idx);
        }
        let level = &self.levels[last.0];
        Ok(level.low[last.1] >= level.value[last.1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips_single_leaf() {
        let leaves = [3u32];
        let mut enc = TagTree::from_leaf_values(1, 1, &leaves);
        let mut writer = BitWriter::new();
        for threshold in 0..=5 {
            enc.encode(&mut writer, 0, 0, threshold);
        }
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        let mut dec = TagTree::new(1, 1);
        for threshold in 0..=5 {
            let included = dec.decode(&mut reader, 0, 0, threshold).unwrap();
            assert_eq!(included, 3 < threshold);
        }
    }

    #[test]
    fn encode_decode_round_trips_grid_of_leaves() {
        let width = 3usize;
        let height = 2usize;
        let leaves: Vec<u32> = vec![2, 0, 5, 1, 3, 4];
        let mut enc = TagTree::from_leaf_values(width, height, &leaves);
        let mut writer = BitWriter::new();
        for y in 0..height {
            for x in 0..width {
                for threshold in 0..=6 {
                    enc.encode(&mut writer, x, y, threshold);
                }
            }
        }
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        let mut dec = TagTree::new(width, height);
        for y in 0..height {
            for x in 0..width {
                for threshold in 0..=6 {
                    let included = dec.decode(&mut reader, x, y, threshold).unwrap();
                    assert_eq!(included, leaves[y * width + x] < threshold);
                }
            }
        }
    }

    #[test]
    fn from_leaf_values_propagates_minimum_to_root() {
        let leaves = [7u32, 2, 9, 4];
        let tree = TagTree::from_leaf_values(2, 2, &leaves);
        let root = tree.levels.last().unwrap();
        assert_eq!(root.value[0], 2);
    }
}
