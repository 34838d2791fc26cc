//! Condensed (upper-triangular, diagonal-free) storage for symmetric
//! pairwise matrices.
//!
//! Pair `{i, j}` of an `n x n` matrix lives at offset
//! `n*i - i*(i+1)/2 + (j - i - 1)` for `i < j`.

use rayon::prelude::*;

use crate::error::{BinError, Result};

/// Offset of the first entry of row `i`.
#[inline]
fn row_start(n: usize, i: usize) -> usize {
    n * i - i * (i + 1) / 2
}

/// Offset of the unordered pair `{i, j}`; `None` when `i == j` or either
/// index is out of range.
pub fn condensed_index(n: usize, i: usize, j: usize) -> Option<usize> {
    if i == j || i >= n || j >= n {
        return None;
    }
    let (a, b) = if i < j { (i, j) } else { (j, i) };
    Some(row_start(n, a) + (b - a - 1))
}

/// Offsets of `{i, j}` for every `j` in `others`.
pub fn condensed_indices(n: usize, i: usize, others: &[usize]) -> Result<Vec<usize>> {
    others
        .iter()
        .map(|&j| {
            condensed_index(n, i, j).ok_or_else(|| {
                BinError::InvalidParameter(format!("no condensed offset for pair ({}, {}) with n = {}", i, j, n))
            })
        })
        .collect()
}

/// Inverse of [`condensed_index`]: the pair `(i, j)`, `i < j`, stored at offset `k`.
pub fn condensed_coords(n: usize, k: usize) -> Option<(usize, usize)> {
    if n < 2 || k >= n * (n - 1) / 2 {
        return None;
    }
    // Float estimate of the row, then exact correction.
    let m = (2 * n - 1) as f64;
    let est = 0.5 * (m - (m * m - 8.0 * k as f64).max(0.0).sqrt());
    let mut i = (est.floor().max(0.0) as usize).min(n - 2);
    while i > 0 && row_start(n, i) > k {
        i -= 1;
    }
    while i + 1 < n - 1 && row_start(n, i + 1) <= k {
        i += 1;
    }
    let j = k - row_start(n, i) + i + 1;
    Some((i, j))
}

/// Number of observations described by a condensed array of `len` entries.
pub fn num_obs(len: usize) -> Result<usize> {
    let d = ((2.0 * len as f64).sqrt()).ceil() as usize;
    if d * d.saturating_sub(1) / 2 != len {
        return Err(BinError::InvalidParameter(format!(
            "{} is not a valid condensed matrix length",
            len
        )));
    }
    Ok(d)
}

/// Symmetric pairwise matrix stored in condensed form.
#[derive(Debug, Clone, PartialEq)]
pub struct CondensedMatrix {
    n: usize,
    values: Vec<f64>,
}

impl CondensedMatrix {
    pub fn new(n: usize, values: Vec<f64>) -> Result<Self> {
        let expected = n * n.saturating_sub(1) / 2;
        if values.len() != expected {
            return Err(BinError::shape("condensed matrix", expected, values.len()));
        }
        Ok(CondensedMatrix { n, values })
    }

    /// Evaluate `f(i, j)` for every pair `i < j`, rows in parallel.
    pub fn from_fn<F>(n: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> f64 + Sync,
    {
        let f = &f;
        let values: Vec<f64> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| (i + 1..n).map(move |j| f(i, j)))
            .collect();
        CondensedMatrix { n, values }
    }

    pub fn num_obs(&self) -> usize {
        self.n
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Distance between `i` and `j`; zero on the diagonal.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match condensed_index(self.n, i, j) {
            Some(k) => self.values[k],
            None => 0.0,
        }
    }

    /// Full row `i` of the square form, including the zero diagonal.
    pub fn row(&self, i: usize) -> Vec<f64> {
        let mut out = vec![0.0; self.n];
        self.row_into(i, &mut out);
        out
    }

    pub fn row_into(&self, i: usize, out: &mut [f64]) {
        let n = self.n;
        for (j, slot) in out.iter_mut().enumerate().take(n) {
            *slot = if j < i {
                self.values[row_start(n, j) + (i - j - 1)]
            } else if j > i {
                self.values[row_start(n, i) + (j - i - 1)]
            } else {
                0.0
            };
        }
    }

    /// Restriction to the given observations, in the given order.
    pub fn submatrix(&self, indices: &[usize]) -> CondensedMatrix {
        let m = indices.len();
        let mut values = Vec::with_capacity(m * m.saturating_sub(1) / 2);
        for a in 0..m {
            for b in a + 1..m {
                values.push(self.get(indices[a], indices[b]));
            }
        }
        CondensedMatrix { n: m, values }
    }
}
