//! Robust Random Cut Forest (RRCF) keyed by stream index
//!
//! Each tree holds points under caller-assigned integer indices and supports
//! the three operations the streaming pipeline needs:
//! - `insert_point(point, index)`
//! - `forget_point(index)`
//! - `codisp(index)`: collusive displacement, the anomaly score
//!
//! Insertion follows the streaming construction of the paper: a random cut is
//! drawn over the bounding box merged with the incoming point, and if it
//! separates the point from the subtree a new branch is spliced in above it.
//! Exact duplicates share a single leaf with a multiplicity count.
//!
//! Reference: "Robust Random Cut Forest Based Anomaly Detection On Streams"
//! (Guha et al., ICML 2016)

use crate::error::OracleError;
use crate::oracle::ScoreOracle;
use crate::shingle::Window;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

type NodeId = usize;

/// A node in the RRCF tree
#[derive(Clone, Debug)]
enum RcNode {
    /// Internal node with cut dimension and value
    Branch {
        cut_dim: usize,
        cut_value: f64,
        left: NodeId,
        right: NodeId,
        /// Bounding box for this subtree
        bbox_min: Vec<f64>,
        bbox_max: Vec<f64>,
    },
    /// Leaf node holding one distinct point
    Leaf { point: Vec<f64> },
}

#[derive(Clone, Debug)]
struct Slot {
    node: RcNode,
    parent: Option<NodeId>,
    /// Points in this subtree, counting duplicates
    num_points: usize,
}

/// A single random cut tree, arena allocated
#[derive(Clone, Debug)]
pub struct RcTree {
    nodes: Vec<Slot>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    /// index -> leaf holding that index's point
    leaves: HashMap<u64, NodeId>,
    dimensions: Option<usize>,
    rng: StdRng,
}

impl RcTree {
    pub fn new(rng: StdRng) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            leaves: HashMap::new(),
            dimensions: None,
            rng,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Number of indices held
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn contains(&self, index: u64) -> bool {
        self.leaves.contains_key(&index)
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    /// Check an insert would succeed without touching the tree
    fn admit(&self, point: &[f64], index: u64) -> Result<(), OracleError> {
        if self.leaves.contains_key(&index) {
            return Err(OracleError::DuplicateIndex(index));
        }
        if point.is_empty() {
            return Err(OracleError::Other("cannot insert an empty point".to_string()));
        }
        if point.iter().any(|x| !x.is_finite()) {
            return Err(OracleError::Other("cannot insert a non-finite point".to_string()));
        }
        match self.dimensions {
            Some(expected) if expected != point.len() => Err(OracleError::DimensionMismatch {
                expected,
                found: point.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Insert a point under a previously unused index
    pub fn insert_point(&mut self, point: &[f64], index: u64) -> Result<(), OracleError> {
        self.admit(point, index)?;
        self.dimensions = Some(point.len());

        let Some(root) = self.root else {
            let leaf = self.alloc(RcNode::Leaf { point: point.to_vec() }, None, 1);
            self.root = Some(leaf);
            self.leaves.insert(index, leaf);
            return Ok(());
        };

        if let Some(dup) = self.find_leaf(point) {
            let mut cursor = Some(dup);
            while let Some(id) = cursor {
                self.nodes[id].num_points += 1;
                cursor = self.nodes[id].parent;
            }
            self.leaves.insert(index, dup);
            return Ok(());
        }

        let mut node = root;
        loop {
            let (lo, hi) = self.bbox(node);
            let merged_min: Vec<f64> = lo.iter().zip(point).map(|(a, b)| a.min(*b)).collect();
            let merged_max: Vec<f64> = hi.iter().zip(point).map(|(a, b)| a.max(*b)).collect();
            let (dim, cut) = random_cut(&mut self.rng, &merged_min, &merged_max);

            let (lo, hi) = self.bbox(node);
            let goes_left = point[dim] <= cut && cut < lo[dim];
            let goes_right = point[dim] > cut && cut >= hi[dim];

            if goes_left || goes_right {
                let parent = self.nodes[node].parent;
                let count = self.nodes[node].num_points;

                let leaf = self.alloc(RcNode::Leaf { point: point.to_vec() }, None, 1);
                let (left, right) = if goes_left { (leaf, node) } else { (node, leaf) };
                let branch = self.alloc(
                    RcNode::Branch {
                        cut_dim: dim,
                        cut_value: cut,
                        left,
                        right,
                        bbox_min: merged_min,
                        bbox_max: merged_max,
                    },
                    parent,
                    count + 1,
                );
                self.nodes[leaf].parent = Some(branch);
                self.nodes[node].parent = Some(branch);

                match parent {
                    None => self.root = Some(branch),
                    Some(pid) => self.replace_child(pid, node, branch),
                }

                let mut cursor = parent;
                while let Some(id) = cursor {
                    let slot = &mut self.nodes[id];
                    slot.num_points += 1;
                    if let RcNode::Branch {
                        bbox_min, bbox_max, ..
                    } = &mut slot.node
                    {
                        for (d, &x) in point.iter().enumerate() {
                            bbox_min[d] = bbox_min[d].min(x);
                            bbox_max[d] = bbox_max[d].max(x);
                        }
                    }
                    cursor = slot.parent;
                }

                self.leaves.insert(index, leaf);
                return Ok(());
            }

            // The cut fell inside the node's box: follow the existing cut.
            // A leaf always separates a distinct point, so a leaf here only
            // means the draw landed on a rounding edge; draw again.
            if let RcNode::Branch {
                cut_dim,
                cut_value,
                left,
                right,
                ..
            } = &self.nodes[node].node
            {
                node = if point[*cut_dim] <= *cut_value { *left } else { *right };
            }
        }
    }

    /// Remove the point held under `index`. No-op (returns false) if absent.
    pub fn forget_point(&mut self, index: u64) -> bool {
        let Some(leaf) = self.leaves.remove(&index) else {
            return false;
        };

        if self.nodes[leaf].num_points > 1 {
            let mut cursor = Some(leaf);
            while let Some(id) = cursor {
                self.nodes[id].num_points -= 1;
                cursor = self.nodes[id].parent;
            }
            return true;
        }

        let Some(parent) = self.nodes[leaf].parent else {
            self.root = None;
            self.release(leaf);
            return true;
        };

        let sibling = self.sibling_of(parent, leaf);
        let grandparent = self.nodes[parent].parent;
        self.nodes[sibling].parent = grandparent;
        match grandparent {
            None => self.root = Some(sibling),
            Some(g) => self.replace_child(g, parent, sibling),
        }
        self.release(leaf);
        self.release(parent);

        let mut cursor = grandparent;
        while let Some(id) = cursor {
            self.nodes[id].num_points -= 1;
            self.tighten_bbox(id);
            cursor = self.nodes[id].parent;
        }
        true
    }

    /// Collusive displacement of the point held under `index`
    pub fn codisp(&self, index: u64) -> Option<f64> {
        let mut node = *self.leaves.get(&index)?;
        let mut best = 0.0_f64;

        while let Some(parent) = self.nodes[node].parent {
            let sibling = self.sibling_of(parent, node);
            let displaced = self.nodes[sibling].num_points as f64;
            let removed = self.nodes[node].num_points as f64;
            best = best.max(displaced / removed);
            node = parent;
        }
        Some(best)
    }

    /// Points under the root, counting duplicates
    pub fn total_points(&self) -> usize {
        self.root.map_or(0, |r| self.nodes[r].num_points)
    }

    fn find_leaf(&self, point: &[f64]) -> Option<NodeId> {
        let mut node = self.root?;
        loop {
            match &self.nodes[node].node {
                RcNode::Leaf { point: held } => return (held.as_slice() == point).then_some(node),
                RcNode::Branch {
                    cut_dim,
                    cut_value,
                    left,
                    right,
                    ..
                } => {
                    node = if point[*cut_dim] <= *cut_value { *left } else { *right };
                }
            }
        }
    }

    fn bbox(&self, id: NodeId) -> (&[f64], &[f64]) {
        match &self.nodes[id].node {
            RcNode::Leaf { point } => (point, point),
            RcNode::Branch {
                bbox_min, bbox_max, ..
            } => (bbox_min, bbox_max),
        }
    }

    fn tighten_bbox(&mut self, id: NodeId) {
        let (left, right) = match &self.nodes[id].node {
            RcNode::Branch { left, right, .. } => (*left, *right),
            RcNode::Leaf { .. } => return,
        };
        let (l_min, l_max) = self.bbox(left);
        let (r_min, r_max) = self.bbox(right);
        let new_min: Vec<f64> = l_min.iter().zip(r_min).map(|(a, b)| a.min(*b)).collect();
        let new_max: Vec<f64> = l_max.iter().zip(r_max).map(|(a, b)| a.max(*b)).collect();

        if let RcNode::Branch {
            bbox_min, bbox_max, ..
        } = &mut self.nodes[id].node
        {
            *bbox_min = new_min;
            *bbox_max = new_max;
        }
    }

    fn sibling_of(&self, parent: NodeId, child: NodeId) -> NodeId {
        match &self.nodes[parent].node {
            RcNode::Branch { left, right, .. } => {
                if *left == child {
                    *right
                } else {
                    *left
                }
            }
            // Parents are always branches
            RcNode::Leaf { .. } => child,
        }
    }

    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        if let RcNode::Branch { left, right, .. } = &mut self.nodes[parent].node {
            if *left == old {
                *left = new;
            } else if *right == old {
                *right = new;
            }
        }
    }

    fn alloc(&mut self, node: RcNode, parent: Option<NodeId>, num_points: usize) -> NodeId {
        let slot = Slot {
            node,
            parent,
            num_points,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = slot;
                id
            }
            None => {
                self.nodes.push(slot);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id].parent = None;
        self.nodes[id].num_points = 0;
        self.free.push(id);
    }
}

/// Draw a cut over the box, choosing the dimension proportionally to its span.
fn random_cut(rng: &mut StdRng, lo: &[f64], hi: &[f64]) -> (usize, f64) {
    let spans: Vec<f64> = hi.iter().zip(lo).map(|(h, l)| h - l).collect();
    let total: f64 = spans.iter().sum();
    if !(total > 0.0) {
        return (0, lo[0]);
    }
    if !total.is_finite() {
        return lower_edge_cut(&spans, lo);
    }

    let r = rng.random_range(0.0..total);
    let mut acc = 0.0;
    for (dim, &span) in spans.iter().enumerate() {
        if span > 0.0 && r < acc + span {
            return (dim, lo[dim] + (r - acc));
        }
        acc += span;
    }

    // Float accumulation overshoot
    lower_edge_cut(&spans, lo)
}

/// Cut at the lower edge of the widest dimension. Always separates a point
/// lying below the box, and a distinct point from a leaf.
fn lower_edge_cut(spans: &[f64], lo: &[f64]) -> (usize, f64) {
    let dim = spans
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(d, _)| d);
    (dim, lo[dim])
}

/// Ensemble of independent [`RcTree`]s; the pipeline's default oracle.
#[derive(Clone, Debug)]
pub struct RandomCutForest {
    trees: Vec<RcTree>,
    seed: Option<u64>,
    /// Bumped on every rebuild so seeded forests do not replay the same cuts
    generation: u64,
}

impl RandomCutForest {
    /// Create a forest of `num_trees` trees seeded from the OS
    pub fn new(num_trees: usize) -> Result<Self, OracleError> {
        Self::build(num_trees, None, 0)
    }

    /// Create a reproducible forest
    pub fn with_seed(num_trees: usize, seed: Option<u64>) -> Result<Self, OracleError> {
        Self::build(num_trees, seed, 0)
    }

    fn build(num_trees: usize, seed: Option<u64>, generation: u64) -> Result<Self, OracleError> {
        if num_trees == 0 {
            return Err(OracleError::EmptyEnsemble);
        }
        let trees = (0..num_trees)
            .map(|member| RcTree::new(member_rng(seed, generation, member)))
            .collect();
        Ok(Self {
            trees,
            seed,
            generation,
        })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn trees(&self) -> &[RcTree] {
        &self.trees
    }
}

fn member_rng(seed: Option<u64>, generation: u64, member: usize) -> StdRng {
    match seed {
        Some(base) => StdRng::seed_from_u64(
            base.wrapping_add(generation.wrapping_mul(0x9E37_79B9_7F4A_7C15))
                .wrapping_add(member as u64),
        ),
        None => StdRng::from_os_rng(),
    }
}

impl ScoreOracle for RandomCutForest {
    fn insert(&mut self, window: &Window, index: u64) -> Result<(), OracleError> {
        // All members hold the same indices, so validating one keeps the
        // ensemble consistent on failure.
        if let Some(first) = self.trees.first() {
            first.admit(window.as_slice(), index)?;
        }
        for tree in &mut self.trees {
            tree.insert_point(window.as_slice(), index)?;
        }
        Ok(())
    }

    fn member_scores(&self, index: u64) -> Result<Vec<f64>, OracleError> {
        self.trees
            .iter()
            .map(|tree| tree.codisp(index).ok_or(OracleError::UnknownIndex(index)))
            .collect()
    }

    fn forget(&mut self, index: u64) -> bool {
        self.trees
            .iter_mut()
            .fold(false, |removed, tree| tree.forget_point(index) | removed)
    }

    fn contains(&self, index: u64) -> bool {
        self.trees.first().is_some_and(|tree| tree.contains(index))
    }

    fn live_count(&self) -> usize {
        self.trees.first().map_or(0, RcTree::len)
    }

    fn rebuild(&self) -> Result<Self, OracleError> {
        Self::build(self.trees.len(), self.seed, self.generation + 1)
    }
}
