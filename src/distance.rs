//! Pairwise feature distances, rank-combined distances, core distances and
//! the reachability traversal.

use log::debug;
use rayon::prelude::*;

use crate::condensed::{condensed_coords, CondensedMatrix};
use crate::config::{RankBackend, Weighting};
use crate::error::{BinError, Result};
use crate::matrix::Matrix;
use crate::profile::FeatureMatrix;
use crate::rank::{fractional_rank_by, sort_order};
use crate::stream::rank_pairwise_external;

pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Condensed Euclidean distances between the rows of `features`.
pub fn pdist(features: &Matrix) -> CondensedMatrix {
    CondensedMatrix::from_fn(features.nrows(), |i, j| {
        euclidean(features.row(i), features.row(j))
    })
}

/// Fractional ranks of the condensed distances `metric(i, j)` over `n`
/// points. With `lengths`, pair `{i, j}` weighs `lengths[i] * lengths[j]`.
pub fn rank_pairwise<F>(
    n: usize,
    metric: F,
    lengths: Option<&[u64]>,
    backend: &RankBackend,
) -> Result<CondensedMatrix>
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    if let Some(lengths) = lengths {
        if lengths.len() != n {
            return Err(BinError::shape("pair weights", n, lengths.len()));
        }
    }
    let weight = |k: usize| match lengths {
        Some(l) => condensed_coords(n, k).map_or(1.0, |(i, j)| l[i] as f64 * l[j] as f64),
        None => 1.0,
    };
    let ranks = match backend {
        RankBackend::InMemory => {
            let values = CondensedMatrix::from_fn(n, metric);
            fractional_rank_by(values.as_slice(), weight)
        }
        RankBackend::External {
            work_dir,
            chunk_size,
        } => rank_pairwise_external(n, metric, weight, work_dir.as_deref(), *chunk_size)?,
    };
    CondensedMatrix::new(n, ranks)
}

/// Coverage and k-mer distances, each ranked, combined per pair as
/// `sqrt(r_cov^2 + r_kmer^2)`.
pub fn combined_rank_distance(
    features: &FeatureMatrix,
    weighting: Weighting,
    backend: &RankBackend,
) -> Result<CondensedMatrix> {
    let n = features.len();
    let lengths = match weighting {
        Weighting::Uniform => None,
        Weighting::LengthProduct => Some(features.lengths()),
    };
    let cov = features.coverage();
    let kmers = features.kmers();

    debug!("Ranking coverage distances for {} contigs", n);
    let cov_ranks = rank_pairwise(n, |i, j| euclidean(cov.row(i), cov.row(j)), lengths, backend)?;
    debug!("Ranking k-mer distances for {} contigs", n);
    let kmer_ranks = rank_pairwise(n, |i, j| euclidean(kmers.row(i), kmers.row(j)), lengths, backend)?;

    let combined = cov_ranks
        .as_slice()
        .par_iter()
        .zip(kmer_ranks.as_slice().par_iter())
        .map(|(rc, rk)| (rc * rc + rk * rk).sqrt())
        .collect();
    CondensedMatrix::new(n, combined)
}

/// Observation minimising the summed distance to all others. Ties go to the
/// lowest index; `None` for an empty matrix.
pub fn mediod(y: &CondensedMatrix) -> Option<usize> {
    let n = y.num_obs();
    let sums: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| y.row(i).iter().sum())
        .collect();
    let mut best: Option<(usize, f64)> = None;
    for (i, s) in sums.into_iter().enumerate() {
        match best {
            Some((_, b)) if s >= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}

/// A parameter given once for every point or separately per point.
#[derive(Debug, Clone, PartialEq)]
pub enum PerPoint<T> {
    All(T),
    Each(Vec<T>),
}

impl<T: Copy> PerPoint<T> {
    fn at(&self, i: usize) -> T {
        match self {
            PerPoint::All(v) => *v,
            PerPoint::Each(v) => v[i],
        }
    }

    fn check(&self, n: usize, context: &str) -> Result<()> {
        match self {
            PerPoint::Each(v) if v.len() != n => Err(BinError::shape(context, n, v.len())),
            _ => Ok(()),
        }
    }
}

/// Pair weight callback used by [`core_distance`].
pub type PairWeight<'a> = &'a (dyn Fn(usize, usize) -> f64 + Sync);

/// Per-point density distance.
///
/// Each point's distances (itself included at distance zero) are sorted by
/// `(distance, index)`. Without weights the core distance is the entry at
/// position `min(n - 1, min_pts)`. With `weight` and `min_wt`, the position is
/// the number of entries whose cumulative weight stays below `min_wt`,
/// capped by `min_pts` and `n - 1`. The point itself carries no weight.
pub fn core_distance(
    y: &CondensedMatrix,
    weight: Option<PairWeight<'_>>,
    min_wt: Option<&PerPoint<f64>>,
    min_pts: Option<&PerPoint<usize>>,
) -> Result<Vec<f64>> {
    let n = y.num_obs();
    if let Some(w) = min_wt {
        w.check(n, "core distance weights")?;
    }
    if let Some(p) = min_pts {
        p.check(n, "core distance neighbour counts")?;
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let core = (0..n)
        .into_par_iter()
        .map(|i| {
            let row = y.row(i);
            let order = sort_order(&row);
            let cap = min_pts.map_or(n - 1, |p| p.at(i)).min(n - 1);
            let pos = match (weight, min_wt) {
                (Some(weight), Some(min_wt)) => {
                    let target = min_wt.at(i);
                    let mut cumulative = 0.0;
                    let mut below = 0usize;
                    for &j in &order {
                        if j != i {
                            cumulative += weight(i, j);
                        }
                        if cumulative < target {
                            below += 1;
                        } else {
                            break;
                        }
                    }
                    below.min(cap)
                }
                _ => cap,
            };
            row[order[pos]]
        })
        .collect();
    Ok(core)
}

/// Visitation order and reachability distance of a density traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct ReachabilityTrace {
    pub order: Vec<usize>,
    pub dist: Vec<f64>,
}

impl ReachabilityTrace {
    /// `order` must be a permutation of `0..n` and `dist` the same length.
    pub fn new(order: Vec<usize>, dist: Vec<f64>) -> Result<Self> {
        let n = order.len();
        if dist.len() != n {
            return Err(BinError::shape("reachability distances", n, dist.len()));
        }
        let mut seen = vec![false; n];
        for &i in &order {
            if i >= n || seen[i] {
                return Err(BinError::InvalidParameter(format!(
                    "reachability order is not a permutation of 0..{}",
                    n
                )));
            }
            seen[i] = true;
        }
        Ok(ReachabilityTrace { order, dist })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Greedy nearest-unvisited traversal starting at point 0.
///
/// Distances from a visited point `v` are floored at `core[v]`. Among equally
/// reachable candidates the lowest index is visited first.
pub fn reachability_order(y: &CondensedMatrix, core: Option<&[f64]>) -> Result<ReachabilityTrace> {
    let n = y.num_obs();
    if let Some(core) = core {
        if core.len() != n {
            return Err(BinError::shape("core distances", n, core.len()));
        }
    }
    if n == 0 {
        return Ok(ReachabilityTrace {
            order: Vec::new(),
            dist: Vec::new(),
        });
    }

    let mut best = vec![f64::INFINITY; n];
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut dist = Vec::with_capacity(n);
    let mut row = vec![0.0; n];

    let mut current = 0;
    order.push(current);
    dist.push(0.0);
    visited[current] = true;

    for _ in 1..n {
        y.row_into(current, &mut row);
        let floor = core.map_or(f64::NEG_INFINITY, |c| c[current]);
        let mut next: Option<usize> = None;
        for j in 0..n {
            if visited[j] {
                continue;
            }
            let d = row[j].max(floor);
            if d < best[j] {
                best[j] = d;
            }
            match next {
                Some(k) if best[j] >= best[k] => {}
                _ => next = Some(j),
            }
        }
        let Some(k) = next else { break };
        visited[k] = true;
        order.push(k);
        dist.push(best[k]);
        current = k;
    }
    debug!("Reachability traversal visited {} points", order.len());
    Ok(ReachabilityTrace { order, dist })
}
