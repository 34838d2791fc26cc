//! Recruitment around a mediod by extrema masking in rank space.
//!
//! Points are placed by their rank of distance from an origin point on
//! several channels (coverage and k-mer). Points that look like the edge of
//! a density mode are masked, the rest are flood-filled into partitions, and
//! the partition holding the origin is recruited.

use rayon::prelude::*;

use crate::config::Weighting;
use crate::distance::euclidean;
use crate::error::{BinError, Result};
use crate::profile::FeatureMatrix;
use crate::rank::fractional_rank_by;
use crate::union_find::UnionFind;

/// Points in rank space around an origin point.
#[derive(Debug, Clone, PartialEq)]
pub struct RankPoints {
    /// `channels[d][i]` is the rank of point `i` on channel `d`.
    channels: Vec<Vec<f64>>,
    origin: usize,
}

impl RankPoints {
    pub fn new(channels: Vec<Vec<f64>>, origin: usize) -> Result<Self> {
        let n = channels.first().map_or(0, |c| c.len());
        if channels.is_empty() {
            return Err(BinError::InvalidParameter("rank space needs at least one channel".into()));
        }
        if let Some(c) = channels.iter().find(|c| c.len() != n) {
            return Err(BinError::shape("rank channel", n, c.len()));
        }
        if origin >= n {
            return Err(BinError::InvalidParameter(format!(
                "origin {} is outside {} points",
                origin, n
            )));
        }
        Ok(RankPoints { channels, origin })
    }

    /// Coverage and k-mer distance ranks of every contig relative to
    /// `origin`. With length weighting each contig weighs its length.
    pub fn around(features: &FeatureMatrix, origin: usize, weighting: Weighting) -> Result<Self> {
        if origin >= features.len() {
            return Err(BinError::InvalidParameter(format!(
                "origin {} is outside {} contigs",
                origin,
                features.len()
            )));
        }
        let lengths = features.lengths();
        let weight = |j: usize| match weighting {
            Weighting::Uniform => 1.0,
            Weighting::LengthProduct => lengths[j] as f64,
        };
        let channels = [features.coverage(), features.kmers()]
            .into_iter()
            .map(|m| {
                let from_origin: Vec<f64> = (0..m.nrows())
                    .into_par_iter()
                    .map(|j| euclidean(m.row(origin), m.row(j)))
                    .collect();
                fractional_rank_by(&from_origin, &weight)
            })
            .collect();
        RankPoints::new(channels, origin)
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn origin(&self) -> usize {
        self.origin
    }

    pub fn channel(&self, d: usize) -> &[f64] {
        &self.channels[d]
    }

    fn coords(&self, i: usize) -> Vec<f64> {
        self.channels.iter().map(|c| c[i]).collect()
    }

    /// Every coordinate of `j` is at most the matching one of `corner`.
    fn within(&self, j: usize, corner: &[f64]) -> bool {
        self.channels.iter().zip(corner).all(|(c, &limit)| c[j] <= limit)
    }

    /// Some coordinate of `j` is at least the matching one of `i`.
    fn beyond_any(&self, j: usize, i: usize) -> bool {
        self.channels.iter().any(|c| c[j] >= c[i])
    }

    fn distance(&self, i: usize, j: usize) -> f64 {
        self.channels
            .iter()
            .map(|c| (c[i] - c[j]) * (c[i] - c[j]))
            .sum::<f64>()
            .sqrt()
    }
}

/// Probability-like scores over rank space. Lower scores mean a point is
/// more plausibly part of the origin's mode.
pub trait RankScorer {
    /// Score of each point against the box it spans with the origin.
    fn inside_scores(&self, points: &RankPoints) -> Vec<f64>;

    /// Score of each point relative to the reference point `cutoff`.
    fn outside_scores(&self, points: &RankPoints, cutoff: usize) -> Vec<f64>;
}

/// Scores under independent, uniformly distributed ranks: the chance that a
/// random point falls in the box between the origin and a given point.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndependenceNull;

impl IndependenceNull {
    fn box_probability(points: &RankPoints) -> Vec<f64> {
        let mut p = vec![1.0; points.len()];
        for d in 0..points.num_channels() {
            let channel = points.channel(d);
            let top = channel.iter().cloned().fold(0.0, f64::max) + 1.0;
            for (pi, &r) in p.iter_mut().zip(channel) {
                *pi *= ((r + 1.0) / top).clamp(0.0, 1.0);
            }
        }
        p
    }
}

impl RankScorer for IndependenceNull {
    fn inside_scores(&self, points: &RankPoints) -> Vec<f64> {
        Self::box_probability(points)
    }

    fn outside_scores(&self, points: &RankPoints, cutoff: usize) -> Vec<f64> {
        let p = Self::box_probability(points);
        let base = p[cutoff];
        p.into_iter().map(|x| (x - base).max(0.0)).collect()
    }
}

fn check_len(points: &RankPoints, len: usize, context: &str) -> Result<()> {
    if len != points.len() {
        return Err(BinError::shape(context, points.len(), len));
    }
    Ok(())
}

/// Flags points whose score exceeds the lowest score found strictly between
/// them and the origin box, or `threshold` if that is lower. The origin is
/// never flagged.
pub fn is_extrema_mask(points: &RankPoints, scores: &[f64], threshold: f64) -> Result<Vec<bool>> {
    check_len(points, scores.len(), "scores")?;
    let origin = points.origin();
    let inner = points.coords(origin);
    let in_origin_box: Vec<bool> = (0..points.len()).map(|j| points.within(j, &inner)).collect();

    let mask = (0..points.len())
        .into_par_iter()
        .map(|i| {
            if i == origin {
                return false;
            }
            let corner: Vec<f64> = points
                .coords(i)
                .into_iter()
                .zip(&inner)
                .map(|(a, &b)| a.max(b))
                .collect();
            let cutoff = (0..points.len())
                .filter(|&j| j != i && !in_origin_box[j] && points.within(j, &corner))
                .map(|j| scores[j])
                .fold(threshold, f64::min);
            scores[i] > cutoff
        })
        .collect();
    Ok(mask)
}

/// Groups unmasked points with every point beyond them (on some channel)
/// that is closer than the nearest masked point beyond them. With no
/// masked point beyond, the cutoff is infinite and every point beyond
/// joins; the point's own distance from the origin is not used as a
/// fallback cutoff. Masked points left out of every group get id 0; groups
/// are numbered from 1 in order of their first point.
pub fn flood_partition_with_mask(points: &RankPoints, mask: &[bool]) -> Result<Vec<usize>> {
    check_len(points, mask.len(), "mask")?;
    let n = points.len();

    let links: Vec<Vec<usize>> = (0..n)
        .into_par_iter()
        .map(|i| {
            if mask[i] {
                return Vec::new();
            }
            let beyond: Vec<(usize, f64)> = (0..n)
                .filter(|&j| points.beyond_any(j, i))
                .map(|j| (j, points.distance(i, j)))
                .collect();
            let cutoff = beyond
                .iter()
                .filter(|(j, _)| mask[*j])
                .map(|&(_, d)| d)
                .fold(f64::INFINITY, f64::min);
            beyond
                .into_iter()
                .filter(|&(j, d)| j != i && d < cutoff)
                .map(|(j, _)| j)
                .collect()
        })
        .collect();

    let mut groups = UnionFind::new(n);
    let mut grouped = vec![false; n];
    for (i, members) in links.iter().enumerate() {
        if mask[i] {
            continue;
        }
        grouped[i] = true;
        for &j in members {
            groups.union(i, j);
            grouped[j] = true;
        }
    }

    let labels = groups.labels();
    let mut renumber = vec![0usize; n];
    let mut next = 0;
    let mut ids = vec![0usize; n];
    for i in (0..n).filter(|&i| grouped[i]) {
        let label = labels[i];
        if renumber[label] == 0 {
            next += 1;
            renumber[label] = next;
        }
        ids[i] = renumber[label];
    }
    Ok(ids)
}

/// Extrema mask, with points outside `unmerged` masked too, then flooded.
pub fn partition_by_extrema(
    points: &RankPoints,
    scores: &[f64],
    threshold: f64,
    unmerged: Option<&[bool]>,
) -> Result<Vec<usize>> {
    let mut mask = is_extrema_mask(points, scores, threshold)?;
    if let Some(unmerged) = unmerged {
        check_len(points, unmerged.len(), "unmerged flags")?;
        for (m, &u) in mask.iter_mut().zip(unmerged) {
            *m |= !u;
        }
    }
    flood_partition_with_mask(points, &mask)
}

/// Members of the partition holding the origin, ascending.
pub fn origin_partition(points: &RankPoints, partitions: &[usize]) -> Vec<usize> {
    let origin = points.origin();
    match partitions.get(origin) {
        Some(&id) if id != 0 => (0..partitions.len()).filter(|&i| partitions[i] == id).collect(),
        _ => vec![origin],
    }
}

/// Outside scores relative to the lowest-scoring member of the origin
/// partition.
pub fn near_scores(
    points: &RankPoints,
    scorer: &dyn RankScorer,
    threshold: f64,
    unmerged: Option<&[bool]>,
) -> Result<Vec<f64>> {
    let scores = scorer.inside_scores(points);
    check_len(points, scores.len(), "inside scores")?;
    let inside = origin_partition(points, &partition_by_extrema(points, &scores, threshold, unmerged)?);
    let mut cutoff = points.origin();
    for &i in &inside {
        if scores[i] < scores[cutoff] {
            cutoff = i;
        }
    }
    let near = scorer.outside_scores(points, cutoff);
    check_len(points, near.len(), "outside scores")?;
    Ok(near)
}

/// Points recruited to the origin's bin: everything within the box of some
/// member of the near partition, restricted to `unmerged`.
pub fn mergers(
    points: &RankPoints,
    scorer: &dyn RankScorer,
    threshold: f64,
    unmerged: Option<&[bool]>,
) -> Result<Vec<usize>> {
    let scores = near_scores(points, scorer, threshold, unmerged)?;
    let near = origin_partition(points, &partition_by_extrema(points, &scores, threshold, unmerged)?);
    let corners: Vec<Vec<f64>> = near.iter().map(|&i| points.coords(i)).collect();
    let recruited = (0..points.len())
        .into_par_iter()
        .filter(|&j| unmerged.map_or(true, |u| u[j]))
        .filter(|&j| corners.iter().any(|c| points.within(j, c)))
        .collect();
    Ok(recruited)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Origin 0 at (0,0); a tight run along the diagonal and one far point.
    fn diagonal() -> RankPoints {
        RankPoints::new(
            vec![vec![0.0, 1.0, 2.0, 3.0, 9.0], vec![0.0, 1.0, 2.0, 3.0, 9.0]],
            0,
        )
        .unwrap()
    }

    #[test]
    fn rank_points_validate_shape() {
        assert!(RankPoints::new(vec![vec![0.0, 1.0], vec![0.0]], 0).is_err());
        assert!(RankPoints::new(vec![vec![0.0, 1.0]], 2).is_err());
        assert!(RankPoints::new(vec![], 0).is_err());
    }

    #[test]
    fn mask_flags_points_above_inner_minimum() {
        let points = diagonal();
        let scores = [0.0, 0.1, 0.05, 0.9, 0.3];
        let mask = is_extrema_mask(&points, &scores, 1.0).unwrap();
        // 3 and 4 score above point 2, which lies inside their boxes
        assert_eq!(mask, vec![false, false, false, true, true]);
        // a low threshold masks everything but the origin
        let mask = is_extrema_mask(&points, &scores, 0.01).unwrap();
        assert_eq!(mask, vec![false, true, true, true, true]);
        assert!(is_extrema_mask(&points, &scores[..4], 1.0).is_err());
    }

    #[test]
    fn flood_stops_at_masked_points() {
        let points = diagonal();
        let mask = [false, false, false, true, false];
        let ids = flood_partition_with_mask(&points, &mask).unwrap();
        // 0, 1 and 2 are closer to each other than the mask at 3; 4 links
        // to nothing beyond itself.
        assert_eq!(ids, vec![1, 1, 1, 0, 2]);
        assert_eq!(origin_partition(&points, &ids), vec![0, 1, 2]);
    }

    #[test]
    fn flood_without_masks_joins_everything() {
        let points = diagonal();
        let ids = flood_partition_with_mask(&points, &[false; 5]).unwrap();
        assert_eq!(ids, vec![1; 5]);
    }

    #[test]
    fn unmasked_flood_reaches_past_the_origin_distance() {
        // 3 is 3√2 from the origin and 4 is 6√2 beyond 3. No masked point
        // lies beyond 3, so it still reaches 4.
        let points = diagonal();
        let ids = flood_partition_with_mask(&points, &[true, true, true, false, false]).unwrap();
        assert_eq!(ids, vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn independence_null_scores() {
        let points = RankPoints::new(vec![vec![0.0, 1.0, 3.0], vec![3.0, 1.0, 0.0]], 0).unwrap();
        let scorer = IndependenceNull;
        let inside = scorer.inside_scores(&points);
        assert_eq!(inside, vec![0.25 * 1.0, 0.5 * 0.5, 1.0 * 0.25]);
        let outside = scorer.outside_scores(&points, 1);
        assert_eq!(outside, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn mergers_respect_unmerged_pool() {
        let points = diagonal();
        let scorer = IndependenceNull;
        let all = mergers(&points, &scorer, 1.0, None).unwrap();
        assert!(all.contains(&0) && all.contains(&1));
        let pool = [true, true, false, true, true];
        let some = mergers(&points, &scorer, 1.0, Some(&pool)).unwrap();
        assert!(!some.contains(&2));
        assert!(some.iter().all(|&j| pool[j]));
    }
}
