//! Contig to bin bookkeeping. Bin 0 means unbinned.

use log::info;
use rustc_hash::FxHashMap;

use crate::error::{BinError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct BinManager {
    assignments: Vec<usize>,
    lengths: Vec<u64>,
}

impl BinManager {
    /// Every contig starts unbinned.
    pub fn new(lengths: Vec<u64>) -> Self {
        BinManager {
            assignments: vec![0; lengths.len()],
            lengths,
        }
    }

    pub fn from_assignments(assignments: Vec<usize>, lengths: Vec<u64>) -> Result<Self> {
        if assignments.len() != lengths.len() {
            return Err(BinError::shape("bin assignments", lengths.len(), assignments.len()));
        }
        Ok(BinManager { assignments, lengths })
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    pub fn into_assignments(self) -> Vec<usize> {
        self.assignments
    }

    pub fn bin_of(&self, contig: usize) -> usize {
        self.assignments[contig]
    }

    pub fn unbinned(&self) -> Vec<usize> {
        self.members(0)
    }

    pub fn members(&self, bid: usize) -> Vec<usize> {
        (0..self.assignments.len())
            .filter(|&i| self.assignments[i] == bid)
            .collect()
    }

    /// Distinct non-zero bin ids, ascending.
    pub fn bin_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.assignments.iter().copied().filter(|&b| b != 0).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn assign(&mut self, contigs: &[usize], bid: usize) {
        for &i in contigs {
            self.assignments[i] = bid;
        }
    }

    /// Put `contigs` in a fresh bin and return its id.
    pub fn new_bin(&mut self, contigs: &[usize]) -> usize {
        let bid = self.assignments.iter().copied().max().unwrap_or(0) + 1;
        self.assign(contigs, bid);
        bid
    }

    /// Unbin bins with fewer than `min_size` contigs or fewer than `min_bp`
    /// bases, then renumber the survivors 1.. in order of their first
    /// contig. Returns the number of bins removed.
    pub fn unbin_low_quality(&mut self, min_size: usize, min_bp: u64) -> usize {
        let mut sizes: FxHashMap<usize, (usize, u64)> = FxHashMap::default();
        for (&bid, &len) in self.assignments.iter().zip(&self.lengths) {
            if bid != 0 {
                let entry = sizes.entry(bid).or_insert((0, 0));
                entry.0 += 1;
                entry.1 += len;
            }
        }

        let mut removed = 0;
        let mut kept = 0;
        let mut renumber: FxHashMap<usize, usize> = FxHashMap::default();
        for bid in self.assignments.iter_mut() {
            if *bid == 0 {
                continue;
            }
            let old = *bid;
            let (count, bp) = sizes[&old];
            *bid = *renumber.entry(old).or_insert_with(|| {
                if count < min_size || bp < min_bp {
                    removed += 1;
                    0
                } else {
                    kept += 1;
                    kept
                }
            });
        }
        info!("Unbinned {} low quality bins; {} bins remain", removed, kept);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bins_take_the_next_id() {
        let mut bm = BinManager::new(vec![10; 5]);
        assert_eq!(bm.unbinned(), vec![0, 1, 2, 3, 4]);
        assert_eq!(bm.new_bin(&[3]), 1);
        assert_eq!(bm.new_bin(&[0, 4]), 2);
        bm.assign(&[1], 1);
        assert_eq!(bm.members(1), vec![1, 3]);
        assert_eq!(bm.bin_ids(), vec![1, 2]);
        assert_eq!(bm.unbinned(), vec![2]);
    }

    #[test]
    fn low_quality_bins_are_unbinned_and_renumbered() {
        let lengths = vec![100, 100, 5, 100, 100, 100, 1000];
        let assignments = vec![3, 3, 1, 5, 5, 5, 7];
        let mut bm = BinManager::from_assignments(assignments, lengths).unwrap();
        // bin 1 is too small in bp, bin 7 has a single member
        let removed = bm.unbin_low_quality(2, 50);
        assert_eq!(removed, 2);
        assert_eq!(bm.assignments(), &[1, 1, 0, 2, 2, 2, 0]);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        assert!(BinManager::from_assignments(vec![0, 1], vec![5]).is_err());
    }
}
