//! Random-forest regressor evaluated directly over a memory-mapped artifact.
//!
//! Layout (little-endian):
//!
//! ```text
//! header : "HVRF" | version u32 | n_features u32 | n_trees u32 | total_nodes u64
//! trees  : n_trees     x { first_node u32 | node_count u32 }
//! nodes  : total_nodes x { feature i32 | left u32 | right u32 | reserved u32 | value f64 }
//! ```
//!
//! A node with `feature == -1` is a leaf and `value` is its prediction.
//! Otherwise `value` is the split threshold: go `left` when
//! `x[feature] <= value`, else `right`. Children are tree-relative and always
//! greater than their parent's index, so every walk terminates.

use super::{ArtifactDecoder, Regressor};
use crate::error::{LoadError, ModelError};
use crate::features::FEATURE_COUNT;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

pub const MAGIC: [u8; 4] = *b"HVRF";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 24;
const TREE_ENTRY_LEN: usize = 8;
const NODE_LEN: usize = 24;
const LEAF: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreeNode {
    Split { feature: u32, threshold: f64, left: u32, right: u32 },
    Leaf(f64),
}

impl TreeNode {
    pub fn split(feature: usize, threshold: f64, left: u32, right: u32) -> Self {
        TreeNode::Split { feature: feature as u32, threshold, left, right }
    }
}

#[derive(Clone, Copy)]
struct RawNode { feature: i32, left: u32, right: u32, value: f64 }

/// Holds only the mapping; node reads go straight to the mapped pages.
pub struct ForestModel {
    map: Mmap,
    n_features: usize,
    n_trees: usize,
    nodes_at: usize,
}

fn corrupt(msg: impl Into<String>) -> LoadError { LoadError::Corrupt(msg.into()) }

fn read_u32(b: &[u8], at: usize) -> u32 { let mut a = [0u8; 4]; a.copy_from_slice(&b[at..at + 4]); u32::from_le_bytes(a) }
fn read_i32(b: &[u8], at: usize) -> i32 { let mut a = [0u8; 4]; a.copy_from_slice(&b[at..at + 4]); i32::from_le_bytes(a) }
fn read_u64(b: &[u8], at: usize) -> u64 { let mut a = [0u8; 8]; a.copy_from_slice(&b[at..at + 8]); u64::from_le_bytes(a) }
fn read_f64(b: &[u8], at: usize) -> f64 { let mut a = [0u8; 8]; a.copy_from_slice(&b[at..at + 8]); f64::from_le_bytes(a) }

impl ForestModel {
    pub fn open(path: &Path, expected_features: usize) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(LoadError::from_io)?;
        let len = file.metadata().map_err(LoadError::from_io)?.len();
        if len < HEADER_LEN as u64 {
            return Err(corrupt(format!("artifact is {len} bytes, shorter than the {HEADER_LEN} byte header")));
        }
        // The artifact is replaced only by rename, never rewritten in place.
        let map = unsafe { Mmap::map(&file) }.map_err(LoadError::from_io)?;
        #[cfg(unix)]
        if let Err(e) = map.advise(memmap2::Advice::Random) { debug!(error=?e, "madvise ignored"); }
        Self::from_map(map, expected_features)
    }

    fn from_map(map: Mmap, expected_features: usize) -> Result<Self, LoadError> {
        let b = &map[..];
        if b[0..4] != MAGIC { return Err(corrupt("bad magic")); }
        let version = read_u32(b, 4);
        if version != FORMAT_VERSION { return Err(corrupt(format!("unsupported format version {version}"))); }
        let n_features = read_u32(b, 8) as usize;
        if n_features != expected_features {
            return Err(corrupt(format!("artifact expects {n_features} features, service provides {expected_features}")));
        }
        let n_trees = read_u32(b, 12) as usize;
        if n_trees == 0 { return Err(corrupt("forest has no trees")); }
        let total_nodes = read_u64(b, 16);
        let nodes_at = HEADER_LEN + n_trees * TREE_ENTRY_LEN;
        let expected_len = total_nodes
            .checked_mul(NODE_LEN as u64)
            .and_then(|n| n.checked_add(nodes_at as u64))
            .ok_or_else(|| corrupt("node count overflows"))?;
        if expected_len != b.len() as u64 {
            return Err(corrupt(format!("artifact is {} bytes, layout requires {expected_len}", b.len())));
        }
        let model = Self { map, n_features, n_trees, nodes_at };
        for t in 0..n_trees { model.validate_tree(t, total_nodes)?; }
        debug!(n_trees, total_nodes, "forest validated");
        Ok(model)
    }

    fn tree(&self, t: usize) -> (usize, usize) {
        let at = HEADER_LEN + t * TREE_ENTRY_LEN;
        (read_u32(&self.map, at) as usize, read_u32(&self.map, at + 4) as usize)
    }

    fn node(&self, index: usize) -> RawNode {
        let at = self.nodes_at + index * NODE_LEN;
        let b = &self.map[at..at + NODE_LEN];
        RawNode { feature: read_i32(b, 0), left: read_u32(b, 4), right: read_u32(b, 8), value: read_f64(b, 16) }
    }

    fn validate_tree(&self, t: usize, total_nodes: u64) -> Result<(), LoadError> {
        let (first, count) = self.tree(t);
        if count == 0 { return Err(corrupt(format!("tree {t} is empty"))); }
        if first as u64 + count as u64 > total_nodes {
            return Err(corrupt(format!("tree {t} spans past the node table")));
        }
        for i in 0..count {
            let n = self.node(first + i);
            if n.feature == LEAF {
                if !n.value.is_finite() { return Err(corrupt(format!("tree {t} leaf {i} is not finite"))); }
                continue;
            }
            if n.feature < 0 || n.feature as usize >= self.n_features {
                return Err(corrupt(format!("tree {t} node {i} splits on feature {}", n.feature)));
            }
            if n.value.is_nan() { return Err(corrupt(format!("tree {t} node {i} has a NaN threshold"))); }
            for child in [n.left as usize, n.right as usize] {
                if child <= i || child >= count {
                    return Err(corrupt(format!("tree {t} node {i} points to child {child}")));
                }
            }
        }
        Ok(())
    }

    fn eval_tree(&self, t: usize, x: &[f64]) -> f64 {
        let (first, _) = self.tree(t);
        let mut i = 0usize;
        loop {
            let n = self.node(first + i);
            if n.feature == LEAF { return n.value; }
            i = if x[n.feature as usize] <= n.value { n.left as usize } else { n.right as usize };
        }
    }

    pub fn n_trees(&self) -> usize { self.n_trees }
    pub fn mapped_bytes(&self) -> usize { self.map.len() }
}

impl Regressor for ForestModel {
    fn n_features(&self) -> usize { self.n_features }

    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        if features.len() != self.n_features {
            return Err(ModelError::Shape { expected: self.n_features, actual: features.len() });
        }
        if let Some(index) = features.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteInput { index });
        }
        let sum: f64 = (0..self.n_trees).map(|t| self.eval_tree(t, features)).sum();
        let y = sum / self.n_trees as f64;
        if !y.is_finite() { return Err(ModelError::NonFiniteOutput); }
        Ok(y)
    }
}

#[derive(Debug, Clone)]
pub struct ForestDecoder { expected_features: usize }

impl ForestDecoder {
    pub fn new(expected_features: usize) -> Self { Self { expected_features } }
}

impl Default for ForestDecoder {
    fn default() -> Self { Self::new(FEATURE_COUNT) }
}

impl ArtifactDecoder for ForestDecoder {
    fn decode(&self, path: &Path) -> Result<Box<dyn Regressor>, LoadError> {
        let model = ForestModel::open(path, self.expected_features)?;
        debug!(path=%path.display(), trees=model.n_trees(), bytes=model.mapped_bytes(), "forest mapped");
        Ok(Box::new(model))
    }
}

/// Serialises trees into the mapped layout. Performs no validation so that
/// malformed artifacts can be produced on purpose.
#[derive(Debug, Clone, Default)]
pub struct ForestWriter {
    n_features: u32,
    trees: Vec<Vec<TreeNode>>,
}

impl ForestWriter {
    pub fn new(n_features: usize) -> Self { Self { n_features: n_features as u32, trees: Vec::new() } }

    pub fn tree(mut self, nodes: Vec<TreeNode>) -> Self {
        self.trees.push(nodes);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let total: usize = self.trees.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(HEADER_LEN + self.trees.len() * TREE_ENTRY_LEN + total * NODE_LEN);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.n_features.to_le_bytes());
        out.extend_from_slice(&(self.trees.len() as u32).to_le_bytes());
        out.extend_from_slice(&(total as u64).to_le_bytes());
        let mut first = 0u32;
        for t in &self.trees {
            out.extend_from_slice(&first.to_le_bytes());
            out.extend_from_slice(&(t.len() as u32).to_le_bytes());
            first += t.len() as u32;
        }
        for node in self.trees.iter().flatten() {
            let (feature, left, right, value) = match *node {
                TreeNode::Split { feature, threshold, left, right } => (feature as i32, left, right, threshold),
                TreeNode::Leaf(v) => (LEAF, 0, 0, v),
            };
            out.extend_from_slice(&feature.to_le_bytes());
            out.extend_from_slice(&left.to_le_bytes());
            out.extend_from_slice(&right.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> { std::fs::write(path, self.to_bytes()) }
}
