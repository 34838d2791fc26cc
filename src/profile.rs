//! Per-contig feature data consumed by the clustering core.

use log::warn;

use crate::error::{BinError, Result};
use crate::matrix::Matrix;

/// GC fraction substituted when a contig has no usable GC estimate.
pub const NEUTRAL_GC: f64 = 0.5;

/// Immutable per-run feature table. Row `i` describes contig `i`.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    names: Vec<String>,
    coverage: Matrix,
    kmers: Matrix,
    lengths: Vec<u64>,
    gc: Vec<f64>,
}

impl FeatureMatrix {
    /// Validate shapes and normalise k-mer rows.
    ///
    /// K-mer rows are rescaled to sum to one. Rows summing to zero stay zero
    /// and are reported, as are contigs with all-zero coverage.
    pub fn new(
        names: Vec<String>,
        coverage: Matrix,
        mut kmers: Matrix,
        lengths: Vec<u64>,
        gc: Vec<f64>,
    ) -> Result<Self> {
        let n = names.len();
        if coverage.nrows() != n {
            return Err(BinError::shape("coverage rows", n, coverage.nrows()));
        }
        if kmers.nrows() != n {
            return Err(BinError::shape("k-mer rows", n, kmers.nrows()));
        }
        if lengths.len() != n {
            return Err(BinError::shape("contig lengths", n, lengths.len()));
        }
        if gc.len() != n {
            return Err(BinError::shape("GC fractions", n, gc.len()));
        }
        if let Some(i) = lengths.iter().position(|&l| l == 0) {
            return Err(BinError::InvalidParameter(format!(
                "contig '{}' has zero length",
                names[i]
            )));
        }
        if let Some(bad) = coverage.as_slice().iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(BinError::InvalidParameter(format!(
                "coverage values must be finite and non-negative, found {}",
                bad
            )));
        }

        for i in 0..n {
            if coverage.row(i).iter().all(|&v| v == 0.0) {
                warn!("Contig '{}' has zero coverage in every sample", names[i]);
            }
            let row = kmers.row_mut(i);
            let total: f64 = row.iter().sum();
            if total > 0.0 && total.is_finite() {
                for v in row.iter_mut() {
                    *v /= total;
                }
            } else {
                warn!("Contig '{}' has an empty k-mer signature; using zeros", names[i]);
                row.iter_mut().for_each(|v| *v = 0.0);
            }
        }

        let gc = gc
            .into_iter()
            .enumerate()
            .map(|(i, g)| {
                if (0.0..=1.0).contains(&g) {
                    g
                } else {
                    warn!("Using {} as GC fraction of contig '{}'", NEUTRAL_GC, names[i]);
                    NEUTRAL_GC
                }
            })
            .collect();

        Ok(FeatureMatrix {
            names,
            coverage,
            kmers,
            lengths,
            gc,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn coverage(&self) -> &Matrix {
        &self.coverage
    }

    pub fn kmers(&self) -> &Matrix {
        &self.kmers
    }

    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    pub fn gc(&self) -> &[f64] {
        &self.gc
    }

    pub fn num_samples(&self) -> usize {
        self.coverage.ncols()
    }

    /// Rows of contigs at least `min_length` bases long, ascending.
    pub fn rows_at_least(&self, min_length: u64) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.lengths[i] >= min_length).collect()
    }

    /// Table holding only `rows`, in the order given.
    pub fn select(&self, rows: &[usize]) -> Result<FeatureMatrix> {
        if let Some(&row) = rows.iter().find(|&&r| r >= self.len()) {
            return Err(BinError::InvalidParameter(format!(
                "row {} is outside a table of {} contigs",
                row,
                self.len()
            )));
        }
        Ok(FeatureMatrix {
            names: rows.iter().map(|&i| self.names[i].clone()).collect(),
            coverage: self.coverage.select_rows(rows),
            kmers: self.kmers.select_rows(rows),
            lengths: rows.iter().map(|&i| self.lengths[i]).collect(),
            gc: rows.iter().map(|&i| self.gc[i]).collect(),
        })
    }
}

/// One marker gene hit on a contig.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerHit {
    pub row: usize,
    pub marker: String,
    pub taxstring: String,
}

/// Marker-to-contig-to-taxon mapping for one run.
#[derive(Debug, Clone, Default)]
pub struct MarkerMapping {
    hits: Vec<MarkerHit>,
}

impl MarkerMapping {
    /// Hits must refer to rows below `num_contigs`.
    pub fn new(hits: Vec<MarkerHit>, num_contigs: usize) -> Result<Self> {
        if let Some(hit) = hits.iter().find(|h| h.row >= num_contigs) {
            return Err(BinError::InvalidParameter(format!(
                "marker '{}' maps to row {} but only {} contigs are loaded",
                hit.marker, hit.row, num_contigs
            )));
        }
        Ok(MarkerMapping { hits })
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Contig row of each hit, in hit order.
    pub fn rows(&self) -> Vec<usize> {
        self.hits.iter().map(|h| h.row).collect()
    }

    pub fn taxstrings(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.taxstring.as_str()).collect()
    }

    /// Hits on the ascending `rows`, renumbered to positions in `rows`.
    /// Hits on other contigs are dropped.
    pub fn restrict(&self, rows: &[usize]) -> MarkerMapping {
        let hits = self
            .hits
            .iter()
            .filter_map(|h| {
                rows.binary_search(&h.row).ok().map(|row| MarkerHit {
                    row,
                    ..h.clone()
                })
            })
            .collect();
        MarkerMapping { hits }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("contig_{}", i)).collect()
    }

    #[test]
    fn kmer_rows_are_normalised() {
        let cov = Matrix::from_rows(&[vec![1.0], vec![0.0]]).unwrap();
        let kmers = Matrix::from_rows(&[vec![1.0, 3.0], vec![0.0, 0.0]]).unwrap();
        let fm = FeatureMatrix::new(names(2), cov, kmers, vec![10, 20], vec![0.4, f64::NAN]).unwrap();
        assert_eq!(fm.kmers().row(0), &[0.25, 0.75]);
        assert_eq!(fm.kmers().row(1), &[0.0, 0.0]);
        assert_eq!(fm.gc(), &[0.4, NEUTRAL_GC]);
    }

    #[test]
    fn shapes_are_checked() {
        let cov = Matrix::zeros(2, 1);
        let kmers = Matrix::zeros(3, 4);
        let err = FeatureMatrix::new(names(2), cov, kmers, vec![1, 1], vec![0.5, 0.5]).unwrap_err();
        assert!(matches!(err, BinError::InputShape { expected: 2, actual: 3, .. }));
    }

    #[test]
    fn negative_coverage_is_rejected() {
        let cov = Matrix::from_rows(&[vec![-1.0]]).unwrap();
        let kmers = Matrix::zeros(1, 1);
        assert!(FeatureMatrix::new(names(1), cov, kmers, vec![5], vec![0.5]).is_err());
    }

    #[test]
    fn marker_rows_must_exist() {
        let hit = MarkerHit {
            row: 4,
            marker: "rpoB".into(),
            taxstring: String::new(),
        };
        assert!(MarkerMapping::new(vec![hit.clone()], 4).is_err());
        let mapping = MarkerMapping::new(vec![hit], 5).unwrap();
        assert_eq!(mapping.rows(), vec![4]);
    }

    #[test]
    fn short_contigs_are_left_out_of_a_selection() {
        let cov = Matrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let kmers = Matrix::from_rows(&[vec![1.0], vec![1.0], vec![1.0]]).unwrap();
        let fm = FeatureMatrix::new(names(3), cov, kmers, vec![2000, 300, 1500], vec![0.5; 3]).unwrap();

        let rows = fm.rows_at_least(1000);
        assert_eq!(rows, vec![0, 2]);
        let kept = fm.select(&rows).unwrap();
        assert_eq!(kept.names(), &["contig_0", "contig_2"]);
        assert_eq!(kept.lengths(), &[2000, 1500]);
        assert_eq!(kept.coverage().column(0), vec![1.0, 3.0]);
        assert!(fm.select(&[3]).is_err());

        let hits = (0..3)
            .map(|row| MarkerHit {
                row,
                marker: format!("m{}", row),
                taxstring: String::new(),
            })
            .collect();
        let mapping = MarkerMapping::new(hits, 3).unwrap().restrict(&rows);
        assert_eq!(mapping.rows(), vec![0, 1]);
        assert_eq!(mapping.len(), 2);
    }
}
