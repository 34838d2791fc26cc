//! Run configuration for the reachability and mediod-growth workflows.

use std::path::PathBuf;

use crate::error::{BinError, Result};

/// Pairs above which the condensed rank transform moves to disk when the
/// backend is chosen automatically.
pub const DEFAULT_IN_MEMORY_PAIRS: usize = 50_000_000;

/// Values held in memory per sorted run by the external backend.
pub const DEFAULT_CHUNK_SIZE: usize = 4_000_000;

/// Where pairwise distances live while they are ranked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RankBackend {
    #[default]
    InMemory,
    External {
        /// Scratch directory; the system temp dir when `None`.
        work_dir: Option<PathBuf>,
        chunk_size: usize,
    },
}

impl RankBackend {
    /// In-memory up to `limit` condensed entries, external above it.
    pub fn auto(len: usize, limit: usize, chunk_size: usize) -> Self {
        if len <= limit {
            RankBackend::InMemory
        } else {
            RankBackend::External {
                work_dir: None,
                chunk_size,
            }
        }
    }
}

/// Weight each pair carries when pairwise distances are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Weighting {
    /// Every pair counts once.
    #[default]
    Uniform,
    /// A pair counts as the product of its two contig lengths.
    LengthProduct,
}

/// What the growth engine does when a bin's mediod never settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonConvergencePolicy {
    /// Abort with [`BinError::NonConvergence`].
    #[default]
    Fail,
    /// Keep the last membership, log a warning and move on.
    ForceTerminate,
}

#[derive(Debug, Clone)]
pub struct ReachConfig {
    /// Neighbour count cap for core distances.
    pub min_pts: usize,
    /// Target cumulative neighbour length (bp) for core distances.
    pub min_size_bp: Option<u64>,
    pub weighting: Weighting,
    /// Taxonomic distance above which two marker hits are disconnected.
    pub taxonomic_threshold: u8,
    /// Extend cut points towards weaker coefficient nodes.
    pub greedy: bool,
    pub backend: RankBackend,
    /// Contigs shorter than this (bp) are left unbinned and out of the
    /// ordering.
    pub min_length: u64,
    pub min_bin_size: usize,
    pub min_bin_bp: u64,
}

impl Default for ReachConfig {
    fn default() -> Self {
        ReachConfig {
            min_pts: 20,
            min_size_bp: None,
            weighting: Weighting::Uniform,
            taxonomic_threshold: 2,
            greedy: false,
            backend: RankBackend::InMemory,
            min_length: 0,
            min_bin_size: 5,
            min_bin_bp: 50_000,
        }
    }
}

impl ReachConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_pts == 0 {
            return Err(BinError::InvalidParameter("min_pts must be at least 1".into()));
        }
        if self.taxonomic_threshold > 7 {
            return Err(BinError::InvalidParameter(format!(
                "taxonomic threshold {} exceeds the 7 taxonomic ranks",
                self.taxonomic_threshold
            )));
        }
        validate_backend(&self.backend)
    }
}

#[derive(Debug, Clone)]
pub struct GrowthConfig {
    /// Score above which a point counts as an extremum.
    pub threshold: f64,
    /// Growth rounds allowed per bin before the mediod must have settled.
    pub max_rounds: usize,
    pub on_nonconvergence: NonConvergencePolicy,
    pub weighting: Weighting,
    /// Contigs shorter than this (bp) are neither seeded nor recruited.
    pub min_length: u64,
    pub min_bin_size: usize,
    pub min_bin_bp: u64,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        GrowthConfig {
            threshold: 0.05,
            max_rounds: 10,
            on_nonconvergence: NonConvergencePolicy::Fail,
            weighting: Weighting::Uniform,
            min_length: 0,
            min_bin_size: 5,
            min_bin_bp: 50_000,
        }
    }
}

impl GrowthConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(BinError::InvalidParameter(format!(
                "threshold must lie in (0, 1], got {}",
                self.threshold
            )));
        }
        if self.max_rounds == 0 {
            return Err(BinError::InvalidParameter("max_rounds must be at least 1".into()));
        }
        Ok(())
    }
}

fn validate_backend(backend: &RankBackend) -> Result<()> {
    match backend {
        RankBackend::External { chunk_size: 0, .. } => Err(BinError::InvalidParameter(
            "external backend chunk size must be positive".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_backend_switches_on_size() {
        assert_eq!(RankBackend::auto(10, 10, 4), RankBackend::InMemory);
        assert_eq!(
            RankBackend::auto(11, 10, 4),
            RankBackend::External {
                work_dir: None,
                chunk_size: 4
            }
        );
    }

    #[test]
    fn defaults_are_valid() {
        assert!(ReachConfig::default().validate().is_ok());
        assert!(GrowthConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_values_are_rejected() {
        let reach = ReachConfig {
            taxonomic_threshold: 8,
            ..Default::default()
        };
        assert!(reach.validate().is_err());

        let reach = ReachConfig {
            backend: RankBackend::External {
                work_dir: None,
                chunk_size: 0,
            },
            ..Default::default()
        };
        assert!(reach.validate().is_err());

        let growth = GrowthConfig {
            threshold: 0.0,
            ..Default::default()
        };
        assert!(growth.validate().is_err());
    }
}
