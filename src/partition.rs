//! Taxonomic coherence partitioning of a linkage tree.
//!
//! Every tree node whose marker hits can be compared gets a connectivity
//! coefficient: the size of a greedily found clique of mutually compatible
//! hits below it, minus the hits below it that conflict with that clique.
//! Bins are the subtrees left after removing every ancestor of the topmost
//! nodes that hold the largest coefficient on their root path.

use std::collections::BTreeMap;

use log::{debug, info};
use rayon::prelude::*;

use crate::condensed::condensed_index;
use crate::error::{BinError, Result};
use crate::hierarchy::LinkageTree;
use crate::profile::MarkerMapping;
use crate::taxonomy::ClassificationTable;

/// Clique among `members` found by repeatedly dropping the member with the
/// fewest connections to the others still kept (lowest position first on
/// ties) until every kept pair is connected. Returns positions into
/// `members`, ascending. Every member counts as connected to itself.
///
/// Callers pass `members` in ascending order so that ties fall to the
/// lowest hit index.
fn clique_by_elimination<F>(members: &[usize], connected: F) -> Vec<usize>
where
    F: Fn(usize, usize) -> bool,
{
    let q = members.len();
    let mut counts: Vec<usize> = (0..q)
        .map(|a| (0..q).filter(|&b| a == b || connected(members[a], members[b])).count())
        .collect();
    let mut keep = vec![true; q];
    let mut remaining = q;
    while remaining > 0 {
        let mut weakest: Option<usize> = None;
        for a in (0..q).filter(|&a| keep[a]) {
            match weakest {
                Some(w) if counts[a] >= counts[w] => {}
                _ => weakest = Some(a),
            }
        }
        let Some(w) = weakest else { break };
        if counts[w] == remaining {
            break;
        }
        keep[w] = false;
        remaining -= 1;
        for a in (0..q).filter(|&a| keep[a]) {
            if connected(members[a], members[w]) {
                counts[a] -= 1;
            }
        }
    }
    (0..q).filter(|&a| keep[a]).collect()
}

/// Greedy clique of a square connectivity matrix.
pub fn greedy_clique_by_elimination(c: &[Vec<bool>]) -> Result<Vec<usize>> {
    let n = c.len();
    if let Some(row) = c.iter().find(|row| row.len() != n) {
        return Err(BinError::shape("connectivity matrix row", n, row.len()));
    }
    let members: Vec<usize> = (0..n).collect();
    Ok(clique_by_elimination(&members, |a, b| c[a][b]))
}

/// Connectivity coefficient of every node with comparable marker evidence:
/// leaves carrying hits and internal nodes with hits under both children.
///
/// `hit_rows[h]` is the leaf holding hit `h`; `connected(a, b)` compares
/// two hits. Clique ties are broken by hit index, not by leaf order.
pub fn connectivity_coeffs<F>(
    tree: &LinkageTree,
    hit_rows: &[usize],
    connected: F,
) -> Result<BTreeMap<usize, i64>>
where
    F: Fn(usize, usize) -> bool + Sync,
{
    let n = tree.num_leaves();
    if let Some(&row) = hit_rows.iter().find(|&&r| r >= n) {
        return Err(BinError::InvalidParameter(format!(
            "marker hit on row {} but the tree has {} leaves",
            row, n
        )));
    }

    // Leaves of every node form a contiguous run of the left-to-right order.
    let mut position = vec![0usize; n];
    for (p, leaf) in tree.leaves_under(tree.root()).into_iter().enumerate() {
        position[leaf] = p;
    }
    let mut span = vec![(0usize, 0usize); tree.num_nodes()];
    for leaf in 0..n {
        span[leaf] = (position[leaf], position[leaf] + 1);
    }
    for (r, m) in tree.merges().iter().enumerate() {
        span[n + r] = (span[m.left].0, span[m.right].1);
    }

    let mut hits: Vec<usize> = (0..hit_rows.len()).collect();
    hits.sort_by_key(|&h| (position[hit_rows[h]], h));
    let hit_positions: Vec<usize> = hits.iter().map(|&h| position[hit_rows[h]]).collect();
    let under = |node: usize| {
        let (start, end) = span[node];
        let lo = hit_positions.partition_point(|&p| p < start);
        let hi = hit_positions.partition_point(|&p| p < end);
        lo..hi
    };

    let mut nodes: Vec<usize> = Vec::new();
    for leaf in 0..n {
        if !under(leaf).is_empty() {
            nodes.push(leaf);
        }
    }
    for (r, m) in tree.merges().iter().enumerate() {
        if !under(m.left).is_empty() && !under(m.right).is_empty() {
            nodes.push(n + r);
        }
    }

    let coeffs = nodes
        .par_iter()
        .map(|&node| {
            let mut members = hits[under(node)].to_vec();
            members.sort_unstable();
            let clique: Vec<usize> = clique_by_elimination(&members, &connected)
                .into_iter()
                .map(|a| members[a])
                .collect();
            let conflicting = members
                .iter()
                .filter(|&&h| !clique.iter().all(|&c| connected(h, c)))
                .count();
            (node, clique.len() as i64 - conflicting as i64)
        })
        .collect();
    Ok(coeffs)
}

/// Partitions a linkage tree into bins using marker hit taxonomy.
#[derive(Debug, Clone)]
pub struct CoherencePartitioner {
    hit_rows: Vec<usize>,
    table: ClassificationTable,
}

impl CoherencePartitioner {
    pub fn new(mapping: &MarkerMapping) -> Self {
        CoherencePartitioner {
            hit_rows: mapping.rows(),
            table: ClassificationTable::from_taxstrings(mapping.taxstrings()),
        }
    }

    pub fn num_hits(&self) -> usize {
        self.hit_rows.len()
    }

    /// Coefficients of the evidence-bearing nodes, with taxonomic
    /// distances above `t` counted as disconnected.
    pub fn coefficients(&self, tree: &LinkageTree, t: u8) -> Result<BTreeMap<usize, i64>> {
        let m = self.hit_rows.len();
        let disconnected = self.table.disconnectivity(t);
        let connected = |a: usize, b: usize| match condensed_index(m, a, b) {
            Some(k) => !disconnected[k],
            None => a == b,
        };
        connectivity_coeffs(tree, &self.hit_rows, connected)
    }

    /// Internal nodes to remove so that the remaining forest gives the bins.
    pub fn cut_points(&self, tree: &LinkageTree, t: u8, greedy: bool) -> Result<Vec<usize>> {
        let coeffs = self.coefficients(tree, t)?;
        debug!("{} tree nodes carry marker evidence", coeffs.len());

        let mut node_coeffs = vec![0i64; tree.num_nodes()];
        for (&node, &c) in &coeffs {
            node_coeffs[node] = c.max(0);
        }
        let mut cuts = tree.nondescendants_of_max_coeff(&node_coeffs)?;
        if greedy {
            let roots: Vec<usize> = cuts.iter().copied().filter(|c| coeffs.contains_key(c)).collect();
            cuts = tree.ancestors(&roots, true)?;
        }
        Ok(cuts)
    }

    /// Flat bin label per leaf, numbered from 1.
    pub fn partition(&self, tree: &LinkageTree, t: u8, greedy: bool) -> Result<Vec<usize>> {
        let cuts = self.cut_points(tree, t, greedy)?;
        let labels = tree.cluster_remove(&cuts)?;
        info!(
            "Partitioned {} contigs into {} clusters at taxonomic threshold {}",
            labels.len(),
            labels.iter().max().copied().unwrap_or(0),
            t
        );
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::ReachabilityTrace;
    use crate::hierarchy::Merge;
    use crate::profile::MarkerHit;

    fn matrix(rows: &[&[u8]]) -> Vec<Vec<bool>> {
        rows.iter().map(|r| r.iter().map(|&v| v == 1).collect()).collect()
    }

    #[test]
    fn clique_of_two_with_isolated_node() {
        let c = matrix(&[&[1, 1, 0], &[1, 1, 0], &[0, 0, 1]]);
        assert_eq!(greedy_clique_by_elimination(&c).unwrap(), vec![0, 1]);
        // same graph, relabelled
        let c = matrix(&[&[1, 0, 0], &[0, 1, 1], &[0, 1, 1]]);
        assert_eq!(greedy_clique_by_elimination(&c).unwrap(), vec![1, 2]);
    }

    #[test]
    fn clique_between_two_linked_triangles() {
        let c = matrix(&[
            &[1, 1, 1, 0, 1, 1],
            &[1, 1, 1, 1, 0, 1],
            &[1, 1, 1, 1, 1, 0],
            &[0, 1, 1, 1, 1, 1],
            &[1, 0, 1, 1, 1, 1],
            &[1, 1, 0, 1, 1, 1],
        ]);
        assert_eq!(greedy_clique_by_elimination(&c).unwrap().len(), 3);
    }

    #[test]
    fn larger_of_overlapping_cliques() {
        let c = matrix(&[
            &[1, 1, 1, 1, 0, 0],
            &[1, 1, 1, 1, 0, 0],
            &[1, 1, 1, 1, 0, 0],
            &[1, 1, 1, 1, 1, 1],
            &[0, 0, 0, 1, 1, 1],
            &[0, 0, 0, 1, 1, 1],
        ]);
        assert_eq!(greedy_clique_by_elimination(&c).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn clique_needs_square_input() {
        assert!(greedy_clique_by_elimination(&matrix(&[&[1, 1], &[1]])).is_err());
        assert!(greedy_clique_by_elimination(&[]).unwrap().is_empty());
    }

    #[test]
    fn coefficients_for_pair_and_singleton() {
        // 0---+
        // 1   |-4
        // |-3-+
        // 2
        let merges = vec![
            Merge {
                left: 1,
                right: 2,
                height: 1.0,
                size: 2,
            },
            Merge {
                left: 0,
                right: 3,
                height: 2.0,
                size: 3,
            },
        ];
        let tree = LinkageTree::new(3, merges).unwrap();
        let connected = |a: usize, b: usize| a == b || (a > 0 && b > 0);
        let coeffs = connectivity_coeffs(&tree, &[0, 1, 2], connected).unwrap();
        let got: Vec<(usize, i64)> = coeffs.into_iter().collect();
        assert_eq!(got, vec![(0, 1), (1, 1), (2, 1), (3, 2), (4, 1)]);
    }

    #[test]
    fn clique_ties_follow_hit_index_not_leaf_order() {
        // leaves run 4 3 2 1 0 from left to right
        let merges = vec![
            Merge {
                left: 4,
                right: 3,
                height: 1.0,
                size: 2,
            },
            Merge {
                left: 5,
                right: 2,
                height: 2.0,
                size: 3,
            },
            Merge {
                left: 6,
                right: 1,
                height: 3.0,
                size: 4,
            },
            Merge {
                left: 7,
                right: 0,
                height: 4.0,
                size: 5,
            },
        ];
        let tree = LinkageTree::new(5, merges).unwrap();
        assert_eq!(tree.leaves_under(tree.root()), vec![4, 3, 2, 1, 0]);

        let pairs = [(0, 1), (0, 4), (1, 3), (1, 4), (2, 3), (2, 4)];
        let connected = |a: usize, b: usize| {
            a == b || pairs.iter().any(|&(x, y)| (x, y) == (a, b) || (y, x) == (a, b))
        };
        // eliminating 0, 1, then 3 leaves the clique {2, 4}; 0, 1 and 3 conflict
        let coeffs = connectivity_coeffs(&tree, &[0, 1, 2, 3, 4], connected).unwrap();
        assert_eq!(coeffs.get(&8), Some(&-1));
    }

    #[test]
    fn hits_outside_the_tree_are_rejected() {
        let tree = LinkageTree::new(1, vec![]).unwrap();
        assert!(connectivity_coeffs(&tree, &[1], |_, _| true).is_err());
    }

    fn two_pair_tree() -> LinkageTree {
        let trace = ReachabilityTrace::new(vec![0, 1, 2, 3, 4], vec![0.0, 1.0, 10.0, 1.0, 10.0]).unwrap();
        LinkageTree::from_reachability(&trace).unwrap()
    }

    fn hit(row: usize, taxstring: &str) -> MarkerHit {
        MarkerHit {
            row,
            marker: format!("m{}", row),
            taxstring: taxstring.to_string(),
        }
    }

    #[test]
    fn incompatible_pairs_become_separate_bins() {
        let tree = two_pair_tree();
        let mapping = MarkerMapping::new(
            vec![
                hit(0, "d__Bacteria; p__Firmicutes"),
                hit(1, "d__Bacteria; p__Firmicutes"),
                hit(2, "d__Archaea; p__Euryarchaeota"),
                hit(3, "d__Archaea; p__Euryarchaeota"),
            ],
            5,
        )
        .unwrap();
        let partitioner = CoherencePartitioner::new(&mapping);

        let coeffs = partitioner.coefficients(&tree, 0).unwrap();
        assert_eq!(coeffs.get(&5), Some(&2));
        assert_eq!(coeffs.get(&6), Some(&2));
        assert_eq!(coeffs.get(&7), Some(&0));
        assert_eq!(coeffs.get(&8), None);

        assert_eq!(partitioner.cut_points(&tree, 0, false).unwrap(), vec![7, 8]);
        assert_eq!(partitioner.partition(&tree, 0, false).unwrap(), vec![1, 1, 2, 2, 3]);
    }

    #[test]
    fn compatible_taxonomy_keeps_one_bin() {
        let tree = two_pair_tree();
        let mapping = MarkerMapping::new(
            (0..4).map(|r| hit(r, "d__Bacteria; p__Firmicutes")).collect(),
            5,
        )
        .unwrap();
        let partitioner = CoherencePartitioner::new(&mapping);
        // node 7 holds all four hits in one clique
        assert_eq!(partitioner.coefficients(&tree, 0).unwrap().get(&7), Some(&4));
        assert_eq!(partitioner.partition(&tree, 0, false).unwrap(), vec![1, 1, 1, 1, 2]);
    }

    #[test]
    fn greedy_mode_only_cuts_at_evidence_nodes() {
        let tree = two_pair_tree();
        let mapping = MarkerMapping::new(
            (0..4).map(|r| hit(r, "d__Bacteria; p__Firmicutes")).collect(),
            5,
        )
        .unwrap();
        let partitioner = CoherencePartitioner::new(&mapping);
        // node 8 has no evidence, so nothing is cut and contig 4 joins the bin
        assert_eq!(partitioner.cut_points(&tree, 0, false).unwrap(), vec![8]);
        assert!(partitioner.cut_points(&tree, 0, true).unwrap().is_empty());
        assert_eq!(partitioner.partition(&tree, 0, true).unwrap(), vec![1; 5]);
    }

    #[test]
    fn greedy_mode_keeps_evidence_cuts_and_drops_the_rest() {
        // 0
        // |-5---+
        // 1     |-7---+
        // 2-----+     |-8
        // 3           |
        // |-6---------+
        // 4
        let merges = vec![
            Merge {
                left: 0,
                right: 1,
                height: 1.0,
                size: 2,
            },
            Merge {
                left: 3,
                right: 4,
                height: 1.0,
                size: 2,
            },
            Merge {
                left: 5,
                right: 2,
                height: 2.0,
                size: 3,
            },
            Merge {
                left: 7,
                right: 6,
                height: 3.0,
                size: 5,
            },
        ];
        let tree = LinkageTree::new(5, merges).unwrap();
        let mapping = MarkerMapping::new(
            vec![
                hit(0, "d__Bacteria; p__Firmicutes"),
                hit(1, "d__Bacteria; p__Firmicutes"),
                hit(3, "d__Archaea; p__Euryarchaeota"),
                hit(4, "d__Archaea; p__Euryarchaeota"),
            ],
            5,
        )
        .unwrap();
        let partitioner = CoherencePartitioner::new(&mapping);

        let coeffs = partitioner.coefficients(&tree, 0).unwrap();
        assert_eq!(coeffs.get(&8), Some(&0));
        // contig 2 carries no hit, so node 7 has no evidence
        assert_eq!(coeffs.get(&7), None);

        assert_eq!(partitioner.cut_points(&tree, 0, false).unwrap(), vec![7, 8]);
        assert_eq!(partitioner.cut_points(&tree, 0, true).unwrap(), vec![8]);
        assert_eq!(partitioner.partition(&tree, 0, false).unwrap(), vec![1, 1, 2, 3, 3]);
        assert_eq!(partitioner.partition(&tree, 0, true).unwrap(), vec![1, 1, 1, 2, 2]);
    }
}
