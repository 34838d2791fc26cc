//! Bin growth around a moving mediod.
//!
//! The engine repeatedly seeds a bin with the longest unbinned contig,
//! recruits around its mediod and recomputes the mediod until it stops
//! moving, then seeds the next bin. Bins that end up too small are released
//! at the end. Contigs below the length cutoff never enter rank space and
//! finish in bin 0.

use std::borrow::Cow;

use log::{debug, info, warn};

use crate::bins::BinManager;
use crate::condensed::CondensedMatrix;
use crate::config::{GrowthConfig, NonConvergencePolicy, RankBackend};
use crate::distance::{combined_rank_distance, mediod};
use crate::error::{BinError, Result};
use crate::extrema::{mergers, IndependenceNull, RankPoints, RankScorer};
use crate::profile::FeatureMatrix;

#[derive(Debug, Clone, Copy, PartialEq)]
enum GrowthState {
    SelectSeed,
    GrowBin {
        bid: usize,
        mediod: usize,
        round: usize,
    },
    CheckConvergence {
        bid: usize,
        previous: usize,
        current: usize,
        round: usize,
    },
    Terminal,
}

/// Outcome of one [`ClusterEngine::make_bins`] run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrowthSummary {
    pub bins_made: usize,
    /// Bins whose mediod had not settled when the round budget ran out.
    pub forced: Vec<usize>,
    pub low_quality: usize,
}

pub struct ClusterEngine<'a, S: RankScorer = IndependenceNull> {
    /// Feature rows of the contigs taking part, ascending.
    contigs: Vec<usize>,
    num_contigs: usize,
    features: Cow<'a, FeatureMatrix>,
    distances: CondensedMatrix,
    seed_order: Vec<usize>,
    scorer: S,
    config: GrowthConfig,
}

impl<'a> ClusterEngine<'a, IndependenceNull> {
    pub fn new(features: &'a FeatureMatrix, config: GrowthConfig, backend: &RankBackend) -> Result<Self> {
        Self::with_scorer(features, config, backend, IndependenceNull)
    }
}

impl<'a, S: RankScorer> ClusterEngine<'a, S> {
    pub fn with_scorer(
        features: &'a FeatureMatrix,
        config: GrowthConfig,
        backend: &RankBackend,
        scorer: S,
    ) -> Result<Self> {
        config.validate()?;
        let num_contigs = features.len();
        let contigs = features.rows_at_least(config.min_length);
        if contigs.is_empty() {
            return Err(BinError::InvalidParameter(format!(
                "no contigs of at least {} bp to bin",
                config.min_length
            )));
        }
        let features = if contigs.len() == num_contigs {
            Cow::Borrowed(features)
        } else {
            info!(
                "Leaving {} contigs shorter than {} bp unbinned",
                num_contigs - contigs.len(),
                config.min_length
            );
            Cow::Owned(features.select(&contigs)?)
        };

        info!("Computing rank distances for {} contigs", features.len());
        let distances = combined_rank_distance(&features, config.weighting, backend)?;
        let lengths = features.lengths();
        let mut seed_order: Vec<usize> = (0..features.len()).collect();
        seed_order.sort_by(|&a, &b| lengths[b].cmp(&lengths[a]).then(a.cmp(&b)));
        Ok(ClusterEngine {
            contigs,
            num_contigs,
            features,
            distances,
            seed_order,
            scorer,
            config,
        })
    }

    /// Feature rows of the contigs long enough to take part. Indices used
    /// by [`ClusterEngine::update_bin`] are positions in this list.
    pub fn contigs(&self) -> &[usize] {
        &self.contigs
    }

    /// Grow bins until every contig has been tried as a member, then unbin
    /// low quality bins. Contigs below the length cutoff end in bin 0.
    pub fn make_bins(&self, bins: &mut BinManager) -> Result<GrowthSummary> {
        if bins.len() != self.num_contigs {
            return Err(BinError::shape("bin assignments", self.num_contigs, bins.len()));
        }
        let start = self.contigs.iter().map(|&row| bins.bin_of(row)).collect();
        let mut growing = BinManager::from_assignments(start, self.features.lengths().to_vec())?;

        let mut summary = GrowthSummary::default();
        let mut state = GrowthState::SelectSeed;
        while state != GrowthState::Terminal {
            state = self.step(state, &mut growing, &mut summary)?;
        }
        info!("{} bins made", summary.bins_made);

        let short: Vec<usize> = (0..self.num_contigs)
            .filter(|row| self.contigs.binary_search(row).is_err())
            .collect();
        bins.assign(&short, 0);
        for (&row, &bid) in self.contigs.iter().zip(growing.assignments()) {
            bins.assign(&[row], bid);
        }
        summary.low_quality = bins.unbin_low_quality(self.config.min_bin_size, self.config.min_bin_bp);
        Ok(summary)
    }

    fn step(&self, state: GrowthState, bins: &mut BinManager, summary: &mut GrowthSummary) -> Result<GrowthState> {
        Ok(match state {
            GrowthState::SelectSeed => {
                let seed = self
                    .seed_order
                    .iter()
                    .copied()
                    .find(|&i| bins.bin_of(i) == 0);
                match seed {
                    Some(seed) => {
                        let bid = bins.new_bin(&[seed]);
                        summary.bins_made += 1;
                        GrowthState::GrowBin {
                            bid,
                            mediod: seed,
                            round: 1,
                        }
                    }
                    None => GrowthState::Terminal,
                }
            }
            GrowthState::GrowBin { bid, mediod, round } => {
                debug!(
                    "Recruiting bin {}, round {}; {} contigs unbinned",
                    bid,
                    round,
                    bins.unbinned().len()
                );
                let before = bins.members(bid).len();
                let current = self.update_bin(mediod, bid, bins)?;
                debug!("Recruited {} members", bins.members(bid).len() - before);
                GrowthState::CheckConvergence {
                    bid,
                    previous: mediod,
                    current,
                    round,
                }
            }
            GrowthState::CheckConvergence {
                bid,
                previous,
                current,
                ..
            } => {
                let next = self.converge(state)?;
                if previous != current && next == GrowthState::SelectSeed {
                    summary.forced.push(bid);
                }
                next
            }
            GrowthState::Terminal => GrowthState::Terminal,
        })
    }

    /// Next state after comparing mediods: keep growing while the mediod
    /// moves and rounds remain.
    fn converge(&self, state: GrowthState) -> Result<GrowthState> {
        let GrowthState::CheckConvergence {
            bid,
            previous,
            current,
            round,
        } = state
        else {
            return Ok(state);
        };
        if previous == current {
            debug!("Mediod of bin {} is stable after {} rounds", bid, round);
            return Ok(GrowthState::SelectSeed);
        }
        if round < self.config.max_rounds {
            return Ok(GrowthState::GrowBin {
                bid,
                mediod: current,
                round: round + 1,
            });
        }
        match self.config.on_nonconvergence {
            NonConvergencePolicy::Fail => Err(BinError::NonConvergence { bin: bid, rounds: round }),
            NonConvergencePolicy::ForceTerminate => {
                warn!(
                    "Mediod of bin {} still moving after {} rounds; keeping current members",
                    bid, round
                );
                Ok(GrowthState::SelectSeed)
            }
        }
    }

    /// Recruit around `mediod` into bin `bid` and return the new mediod.
    ///
    /// `bins` covers only the engine's [`contigs`](ClusterEngine::contigs),
    /// and contig indices are positions in that list.
    pub fn update_bin(&self, mediod_index: usize, bid: usize, bins: &mut BinManager) -> Result<usize> {
        let unmerged: Vec<bool> = bins
            .assignments()
            .iter()
            .map(|&b| b == 0 || b == bid)
            .collect();
        let points = RankPoints::around(&self.features, mediod_index, self.config.weighting)?;
        let recruited = mergers(&points, &self.scorer, self.config.threshold, Some(&unmerged))?;
        bins.assign(&recruited, bid);

        let members = bins.members(bid);
        if members.len() == 1 {
            debug!("Bin {} has a single member; treating it as converged", bid);
            return Ok(members[0]);
        }
        let sub = self.distances.submatrix(&members);
        Ok(mediod(&sub).map_or(mediod_index, |m| members[m]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;

    fn two_groups() -> FeatureMatrix {
        let names = (0..4).map(|i| format!("c{}", i)).collect();
        let coverage = Matrix::from_rows(&[vec![1.0], vec![1.1], vec![10.0], vec![10.1]]).unwrap();
        let kmers = Matrix::from_rows(&[
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
        ])
        .unwrap();
        FeatureMatrix::new(names, coverage, kmers, vec![1000; 4], vec![0.5; 4]).unwrap()
    }

    fn config() -> GrowthConfig {
        GrowthConfig {
            threshold: 0.5,
            min_bin_size: 1,
            min_bin_bp: 0,
            ..Default::default()
        }
    }

    #[test]
    fn grows_one_bin_per_group() {
        let features = two_groups();
        let engine = ClusterEngine::new(&features, config(), &RankBackend::InMemory).unwrap();
        let mut bins = BinManager::new(features.lengths().to_vec());
        let summary = engine.make_bins(&mut bins).unwrap();
        assert_eq!(bins.assignments(), &[1, 1, 2, 2]);
        assert_eq!(summary.bins_made, 2);
        assert!(summary.forced.is_empty());
    }

    #[test]
    fn small_bins_are_released() {
        let features = two_groups();
        let cfg = GrowthConfig {
            min_bin_size: 3,
            ..config()
        };
        let engine = ClusterEngine::new(&features, cfg, &RankBackend::InMemory).unwrap();
        let mut bins = BinManager::new(features.lengths().to_vec());
        let summary = engine.make_bins(&mut bins).unwrap();
        assert_eq!(summary.low_quality, 2);
        assert_eq!(bins.assignments(), &[0, 0, 0, 0]);
    }

    #[test]
    fn moving_mediod_respects_round_budget() {
        let features = two_groups();
        let unsettled = GrowthState::CheckConvergence {
            bid: 3,
            previous: 0,
            current: 1,
            round: 2,
        };

        let cfg = GrowthConfig {
            max_rounds: 2,
            ..config()
        };
        let engine = ClusterEngine::new(&features, cfg.clone(), &RankBackend::InMemory).unwrap();
        assert!(matches!(
            engine.converge(unsettled),
            Err(BinError::NonConvergence { bin: 3, rounds: 2 })
        ));

        let forcing = GrowthConfig {
            on_nonconvergence: NonConvergencePolicy::ForceTerminate,
            ..cfg.clone()
        };
        let engine = ClusterEngine::new(&features, forcing, &RankBackend::InMemory).unwrap();
        assert_eq!(engine.converge(unsettled).unwrap(), GrowthState::SelectSeed);

        let roomy = GrowthConfig { max_rounds: 5, ..cfg };
        let engine = ClusterEngine::new(&features, roomy, &RankBackend::InMemory).unwrap();
        assert_eq!(
            engine.converge(unsettled).unwrap(),
            GrowthState::GrowBin {
                bid: 3,
                mediod: 1,
                round: 3
            }
        );
    }

    #[test]
    fn short_contigs_are_never_grown() {
        let names = (0..5).map(|i| format!("c{}", i)).collect();
        let coverage = Matrix::from_rows(&[vec![1.0], vec![1.1], vec![1.05], vec![10.0], vec![10.1]]).unwrap();
        let kmers = Matrix::from_rows(&[
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
        ])
        .unwrap();
        let lengths = vec![1000, 1000, 200, 1000, 1000];
        let features = FeatureMatrix::new(names, coverage, kmers, lengths, vec![0.5; 5]).unwrap();
        let cfg = GrowthConfig {
            min_length: 500,
            ..config()
        };
        let engine = ClusterEngine::new(&features, cfg, &RankBackend::InMemory).unwrap();
        assert_eq!(engine.contigs(), &[0, 1, 3, 4]);

        // a stale assignment on the short contig is cleared
        let mut bins = BinManager::from_assignments(vec![0, 0, 7, 0, 0], features.lengths().to_vec()).unwrap();
        engine.make_bins(&mut bins).unwrap();
        assert_eq!(bins.assignments(), &[1, 1, 0, 2, 2]);
    }

    #[test]
    fn assignment_length_is_checked() {
        let features = two_groups();
        let engine = ClusterEngine::new(&features, config(), &RankBackend::InMemory).unwrap();
        let mut bins = BinManager::new(vec![1; 3]);
        assert!(engine.make_bins(&mut bins).is_err());
    }
}
