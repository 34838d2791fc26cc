//! Reachability binning workflow.

use std::borrow::Cow;
use std::path::Path;

use log::info;

use crate::bins::BinManager;
use crate::cache;
use crate::config::ReachConfig;
use crate::distance::{
    combined_rank_distance, core_distance, reachability_order, PairWeight, PerPoint,
    ReachabilityTrace,
};
use crate::error::{BinError, Result};
use crate::hierarchy::LinkageTree;
use crate::partition::CoherencePartitioner;
use crate::profile::{FeatureMatrix, MarkerMapping};

/// Everything the reachability workflow produces for one run.
#[derive(Debug, Clone)]
pub struct ReachOutput {
    /// Feature row of each trace point and tree leaf; contigs shorter than
    /// the length cutoff are absent.
    pub contigs: Vec<usize>,
    pub trace: ReachabilityTrace,
    pub tree: LinkageTree,
    /// Bin per contig after the quality filter; 0 is unbinned.
    pub assignments: Vec<usize>,
    pub low_quality: usize,
}

/// Density traversal of the contigs, reused from `cache_dir` when a trace
/// for the same data and parameters was stored there.
pub fn reachability_trace(
    features: &FeatureMatrix,
    config: &ReachConfig,
    cache_dir: Option<&Path>,
) -> Result<ReachabilityTrace> {
    let key = cache_dir.map(|_| cache::fingerprint(features, config));
    if let (Some(dir), Some(key)) = (cache_dir, key.as_deref()) {
        if let Some(trace) = cache::load_trace(dir, key, features.len())? {
            return Ok(trace);
        }
    }

    info!("Computing rank distances for {} contigs", features.len());
    let distances = combined_rank_distance(features, config.weighting, &config.backend)?;

    info!("Computing core distances (min_pts = {})", config.min_pts);
    let lengths = features.lengths();
    let neighbour_length = |_: usize, j: usize| lengths[j] as f64;
    let weight: PairWeight = &neighbour_length;
    let min_pts = PerPoint::All(config.min_pts);
    let core = match config.min_size_bp {
        Some(bp) => core_distance(
            &distances,
            Some(weight),
            Some(&PerPoint::All(bp as f64)),
            Some(&min_pts),
        )?,
        None => core_distance(&distances, None, None, Some(&min_pts))?,
    };

    info!("Ordering contigs by reachability");
    let trace = reachability_order(&distances, Some(&core))?;

    if let (Some(dir), Some(key)) = (cache_dir, key.as_deref()) {
        cache::save_trace(dir, key, &trace)?;
    }
    Ok(trace)
}

/// Order contigs, build the linkage tree, cut it where marker taxonomy
/// conflicts and drop bins that fail the quality filter.
///
/// Contigs shorter than `config.min_length` take no part and stay in bin 0.
pub fn run_reachability(
    features: &FeatureMatrix,
    markers: &MarkerMapping,
    config: &ReachConfig,
    cache_dir: Option<&Path>,
) -> Result<ReachOutput> {
    config.validate()?;
    let contigs = features.rows_at_least(config.min_length);
    if contigs.is_empty() {
        return Err(BinError::InvalidParameter(format!(
            "no contigs of at least {} bp to bin",
            config.min_length
        )));
    }
    let (kept, markers) = if contigs.len() == features.len() {
        (Cow::Borrowed(features), Cow::Borrowed(markers))
    } else {
        info!(
            "Leaving {} contigs shorter than {} bp unbinned",
            features.len() - contigs.len(),
            config.min_length
        );
        (
            Cow::Owned(features.select(&contigs)?),
            Cow::Owned(markers.restrict(&contigs)),
        )
    };

    let trace = reachability_trace(&kept, config, cache_dir)?;

    info!("Building linkage tree");
    let tree = LinkageTree::from_reachability(&trace)?;

    let partitioner = CoherencePartitioner::new(&markers);
    info!("Partitioning tree using {} marker hits", partitioner.num_hits());
    let labels = partitioner.partition(&tree, config.taxonomic_threshold, config.greedy)?;

    let mut assignments = vec![0; features.len()];
    for (&row, label) in contigs.iter().zip(labels) {
        assignments[row] = label;
    }
    let mut bins = BinManager::from_assignments(assignments, features.lengths().to_vec())?;
    let low_quality = bins.unbin_low_quality(config.min_bin_size, config.min_bin_bp);

    Ok(ReachOutput {
        contigs,
        trace,
        tree,
        assignments: bins.into_assignments(),
        low_quality,
    })
}
