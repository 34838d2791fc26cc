//! Fractional ranks with tie averaging.
//!
//! A value's rank is the midpoint of the (0-based) positions its tie group
//! occupies in ascending order. With weights, positions are cumulative
//! weights: a group spanning cumulative weight `(before, after]` is ranked
//! `(before + after - 1) / 2`.

use std::cmp::Ordering;

use crate::error::{BinError, Result};
use crate::matrix::Matrix;

/// Which slices of a matrix are ranked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankAxis {
    /// Each column is ranked on its own.
    Columns,
    /// Each row is ranked on its own.
    Rows,
    /// The matrix is flattened and ranked as a whole.
    Flat,
}

/// Ascending order of `values`, ties kept in index order.
pub fn sort_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
    order
}

/// Accumulates sorted `(value, index, weight)` triples and assigns averaged
/// ranks as each tie group closes.
pub(crate) struct TieRanker {
    before: f64,
    cumulative: f64,
    current: Option<f64>,
    group: Vec<usize>,
}

impl TieRanker {
    pub(crate) fn new() -> Self {
        TieRanker {
            before: 0.0,
            cumulative: 0.0,
            current: None,
            group: Vec::new(),
        }
    }

    pub(crate) fn push<S: FnMut(usize, f64)>(&mut self, value: f64, index: usize, weight: f64, sink: &mut S) {
        if let Some(current) = self.current {
            if current != value {
                self.close(sink);
            }
        }
        self.current = Some(value);
        self.cumulative += weight;
        self.group.push(index);
    }

    fn close<S: FnMut(usize, f64)>(&mut self, sink: &mut S) {
        let rank = (self.before + self.cumulative - 1.0) * 0.5;
        for &i in &self.group {
            sink(i, rank);
        }
        self.group.clear();
        self.before = self.cumulative;
        self.current = None;
    }

    /// Flush the open group; returns the total weight seen.
    pub(crate) fn finish<S: FnMut(usize, f64)>(mut self, sink: &mut S) -> f64 {
        if !self.group.is_empty() {
            self.close(sink);
        }
        self.cumulative
    }
}

/// Fractional ranks where element `i` carries weight `weight(i)`.
pub fn fractional_rank_by<W>(values: &[f64], weight: W) -> Vec<f64>
where
    W: Fn(usize) -> f64,
{
    let order = sort_order(values);
    let mut out = vec![0.0; values.len()];
    let mut ranker = TieRanker::new();
    let mut sink = |i: usize, r: f64| out[i] = r;
    for &i in &order {
        ranker.push(values[i], i, weight(i), &mut sink);
    }
    ranker.finish(&mut sink);
    out
}

/// Unweighted fractional ranks.
pub fn fractional_rank(values: &[f64]) -> Vec<f64> {
    fractional_rank_by(values, |_| 1.0)
}

/// Fractional ranks with per-element weights of the same length.
pub fn weighted_fractional_rank(values: &[f64], weights: &[f64]) -> Result<Vec<f64>> {
    if weights.len() != values.len() {
        return Err(BinError::shape("rank weights", values.len(), weights.len()));
    }
    Ok(fractional_rank_by(values, |i| weights[i]))
}

/// Rank a matrix along `axis`, optionally weighted by a matrix of the same shape.
pub fn argrank(values: &Matrix, axis: RankAxis, weights: Option<&Matrix>) -> Result<Matrix> {
    if let Some(w) = weights {
        if w.shape() != values.shape() {
            let (r, c) = values.shape();
            let (wr, wc) = w.shape();
            return Err(BinError::shape("rank weights", r * c, wr * wc));
        }
    }
    let (nrows, ncols) = values.shape();
    match axis {
        RankAxis::Flat => {
            let ranks = match weights {
                Some(w) => weighted_fractional_rank(values.as_slice(), w.as_slice())?,
                None => fractional_rank(values.as_slice()),
            };
            Matrix::new(nrows, ncols, ranks)
        }
        RankAxis::Rows => {
            let mut out = Matrix::zeros(nrows, ncols);
            for i in 0..nrows {
                let ranks = match weights {
                    Some(w) => weighted_fractional_rank(values.row(i), w.row(i))?,
                    None => fractional_rank(values.row(i)),
                };
                out.row_mut(i).copy_from_slice(&ranks);
            }
            Ok(out)
        }
        RankAxis::Columns => {
            let mut out = Matrix::zeros(nrows, ncols);
            for j in 0..ncols {
                let column = values.column(j);
                let ranks = match weights {
                    Some(w) => weighted_fractional_rank(&column, &w.column(j))?,
                    None => fractional_rank(&column),
                };
                for (i, r) in ranks.into_iter().enumerate() {
                    out.set(i, j, r);
                }
            }
            Ok(out)
        }
    }
}

/// Total order used wherever distances are compared for ties.
pub(crate) fn cmp_value_then_index(a: (f64, usize), b: (f64, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}
