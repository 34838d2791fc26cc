//! Binary merge trees over contigs and the queries the partitioners need.
//!
//! Nodes live in a flat arena: ids `0..n` are leaves and id `n + r` is the
//! cluster formed by merge record `r`. Children always have smaller ids than
//! their parent, so one forward pass over the merges visits every node after
//! its descendants.

use log::debug;

use crate::condensed::condensed_index;
use crate::distance::ReachabilityTrace;
use crate::error::{BinError, Result};
use crate::union_find::UnionFind;

/// One internal node: the union of `left` and `right` at `height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkageTree {
    n: usize,
    merges: Vec<Merge>,
}

impl LinkageTree {
    /// Checks that the merges form a single binary tree over `n` leaves.
    pub fn new(n: usize, merges: Vec<Merge>) -> Result<Self> {
        if n == 0 {
            return Err(BinError::InvalidTree("a tree needs at least one leaf".into()));
        }
        if merges.len() != n - 1 {
            return Err(BinError::InvalidTree(format!(
                "{} leaves need {} merges, found {}",
                n,
                n - 1,
                merges.len()
            )));
        }
        let mut size = vec![1usize; 2 * n - 1];
        let mut has_parent = vec![false; 2 * n - 1];
        for (r, m) in merges.iter().enumerate() {
            let id = n + r;
            for child in [m.left, m.right] {
                if child >= id {
                    return Err(BinError::InvalidTree(format!(
                        "node {} merges node {} which is not created before it",
                        id, child
                    )));
                }
                if has_parent[child] {
                    return Err(BinError::InvalidTree(format!("node {} has two parents", child)));
                }
                has_parent[child] = true;
            }
            if m.left == m.right {
                return Err(BinError::InvalidTree(format!("node {} merges node {} with itself", id, m.left)));
            }
            size[id] = size[m.left] + size[m.right];
            if m.size != size[id] {
                return Err(BinError::InvalidTree(format!(
                    "node {} claims {} leaves but covers {}",
                    id, m.size, size[id]
                )));
            }
        }
        Ok(LinkageTree { n, merges })
    }

    /// Single-linkage tree whose cophenetic heights reproduce the trace.
    ///
    /// Position `k` of the trace joins the segment ending at `k - 1` to the
    /// segment starting at `k` at height `dist[k]`. Boundaries are merged in
    /// ascending `(dist, position)` order.
    pub fn from_reachability(trace: &ReachabilityTrace) -> Result<Self> {
        let n = trace.len();
        if n == 0 {
            return Err(BinError::InvalidTree("empty reachability trace".into()));
        }
        let mut boundaries: Vec<usize> = (1..n).collect();
        boundaries.sort_by(|&a, &b| trace.dist[a].total_cmp(&trace.dist[b]).then(a.cmp(&b)));

        let mut segments = UnionFind::new(n);
        let mut node_of: Vec<usize> = trace.order.clone();
        let mut size_of = vec![1usize; n];
        let mut merges = Vec::with_capacity(n - 1);
        for (step, &k) in boundaries.iter().enumerate() {
            let a = segments.find(k - 1);
            let b = segments.find(k);
            let size = size_of[a] + size_of[b];
            merges.push(Merge {
                left: node_of[a],
                right: node_of[b],
                height: trace.dist[k],
                size,
            });
            if let Some(root) = segments.union(a, b) {
                node_of[root] = n + step;
                size_of[root] = size;
            }
        }
        debug!("Built linkage tree with {} merges", merges.len());
        LinkageTree::new(n, merges)
    }

    pub fn num_leaves(&self) -> usize {
        self.n
    }

    pub fn num_nodes(&self) -> usize {
        2 * self.n - 1
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    pub fn root(&self) -> usize {
        2 * self.n - 2
    }

    pub fn children(&self, node: usize) -> Option<(usize, usize)> {
        node.checked_sub(self.n)
            .and_then(|r| self.merges.get(r))
            .map(|m| (m.left, m.right))
    }

    /// Merge height of a node; zero for leaves.
    pub fn height(&self, node: usize) -> f64 {
        node.checked_sub(self.n)
            .and_then(|r| self.merges.get(r))
            .map_or(0.0, |m| m.height)
    }

    /// Leaves below `node`, left to right.
    pub fn leaves_under(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(i) = stack.pop() {
            match self.children(i) {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => out.push(i),
            }
        }
        out
    }

    /// Condensed matrix of lowest common ancestor node ids for every pair of
    /// leaves.
    pub fn lca_matrix(&self) -> Vec<usize> {
        let n = self.n;
        let mut out = vec![0usize; n * (n - 1) / 2];
        for (r, m) in self.merges.iter().enumerate() {
            let left = self.leaves_under(m.left);
            let right = self.leaves_under(m.right);
            for &a in &left {
                for &b in &right {
                    if let Some(k) = condensed_index(n, a, b) {
                        out[k] = n + r;
                    }
                }
            }
        }
        out
    }

    fn node_mask(&self, indices: &[usize]) -> Result<Vec<bool>> {
        let mut mask = vec![false; self.num_nodes()];
        for &i in indices {
            if i >= mask.len() {
                return Err(BinError::InvalidParameter(format!(
                    "node {} is outside a tree of {} nodes",
                    i,
                    mask.len()
                )));
            }
            mask[i] = true;
        }
        Ok(mask)
    }

    /// Largest coefficient at or below each node, in one bottom-up pass.
    /// `coeffs` holds one value per node (`2n - 1`).
    pub fn max_coeffs(&self, coeffs: &[i64]) -> Result<Vec<i64>> {
        if coeffs.len() != self.num_nodes() {
            return Err(BinError::shape("node coefficients", self.num_nodes(), coeffs.len()));
        }
        let mut out = coeffs.to_vec();
        for (r, m) in self.merges.iter().enumerate() {
            let id = self.n + r;
            out[id] = out[id].max(out[m.left]).max(out[m.right]);
        }
        Ok(out)
    }

    /// Sorted union of the ancestors of `indices`, optionally with the nodes
    /// themselves.
    pub fn ancestors(&self, indices: &[usize], inclusive: bool) -> Result<Vec<usize>> {
        let mut is_index = self.node_mask(indices)?;
        let mut is_ancestor = vec![false; self.num_nodes()];
        for (r, m) in self.merges.iter().enumerate() {
            let id = self.n + r;
            is_ancestor[id] = is_index[m.left] || is_index[m.right];
            is_index[id] |= is_ancestor[id];
        }
        let keep = if inclusive { &is_index } else { &is_ancestor };
        Ok((0..keep.len()).filter(|&i| keep[i]).collect())
    }

    /// Internal nodes of `indices` not below any other member, found by
    /// descending from the root and stopping at members. Leaves are never
    /// returned.
    pub fn filter_descendants(&self, indices: &[usize]) -> Result<Vec<usize>> {
        let is_member = self.node_mask(indices)?;
        let mut out = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(i) = stack.pop() {
            let Some((left, right)) = self.children(i) else {
                continue;
            };
            if is_member[i] {
                out.push(i);
            } else {
                stack.push(left);
                stack.push(right);
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Topmost nodes whose coefficient equals the maximum at or below them,
    /// and the ancestors that separate them.
    pub fn nondescendants_of_max_coeff(&self, coeffs: &[i64]) -> Result<Vec<usize>> {
        let max = self.max_coeffs(coeffs)?;
        let maxinds: Vec<usize> = (0..max.len()).filter(|&i| max[i] == coeffs[i]).collect();
        let tops = self.filter_descendants(&maxinds)?;
        self.ancestors(&tops, false)
    }

    /// Flat cluster labels after deleting the internal nodes in `remove`.
    ///
    /// Each leaf is labelled by the highest node above it with no removed
    /// node at or below it. Labels run from 1 in left-to-right order of the
    /// tree. Removing a leaf has no effect.
    pub fn cluster_remove(&self, remove: &[usize]) -> Result<Vec<usize>> {
        let removed = self.node_mask(remove)?;
        let mut cut = vec![false; self.num_nodes()];
        for (r, m) in self.merges.iter().enumerate() {
            let id = self.n + r;
            cut[id] = removed[id] || cut[m.left] || cut[m.right];
        }

        let mut labels = vec![0usize; self.n];
        let mut next = 0;
        let mut stack = vec![self.root()];
        while let Some(i) = stack.pop() {
            if cut[i] {
                if let Some((left, right)) = self.children(i) {
                    stack.push(right);
                    stack.push(left);
                }
            } else {
                next += 1;
                for leaf in self.leaves_under(i) {
                    labels[leaf] = next;
                }
            }
        }
        Ok(labels)
    }
}
