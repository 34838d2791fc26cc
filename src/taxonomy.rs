//! Marker taxonomy strings, their per-rank codes and the taxonomic
//! disconnectivity between marker hits.

use log::warn;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

/// Rank prefixes from Domain to Species.
pub const TAGS: [&str; 7] = ["d__", "p__", "c__", "o__", "f__", "g__", "s__"];

pub const NUM_RANKS: usize = TAGS.len();

/// Rank not assigned; compatible with anything.
pub const UNASSIGNED: u32 = 0;
/// Rank assigned but empty; compatible with nothing.
pub const EMPTY: u32 = 1;

pub type Classification = [u32; NUM_RANKS];

/// Ranks read from one taxonomy string, with any grammar problems found.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedTaxstring {
    pub ranks: Vec<String>,
    pub problems: Vec<String>,
}

/// Split a `;`-separated taxonomy string into rank names.
///
/// A leading `Root` field is dropped and parsing stops at the first empty
/// field. A field carrying the prefix of a different rank ends parsing. A
/// field with no known prefix is taken as the rank at its position.
pub fn parse_taxstring(taxstring: &str) -> ParsedTaxstring {
    let mut fields: Vec<&str> = taxstring.split(';').map(str::trim).collect();
    if fields.first() == Some(&"Root") {
        fields.remove(0);
    }
    let mut parsed = ParsedTaxstring::default();
    let mut missing = Vec::new();
    for (field, prefix) in fields.iter().zip(TAGS) {
        if field.is_empty() {
            break;
        }
        if let Some(name) = field.strip_prefix(prefix) {
            parsed.ranks.push(name.to_string());
            continue;
        }
        if let Some(other) = TAGS.iter().find(|t| field.starts_with(*t)) {
            parsed.problems.push(format!(
                "expected `{}` prefix but found `{}`; dropping remaining fields",
                prefix, other
            ));
            break;
        }
        missing.push(prefix);
        parsed.ranks.push(field.to_string());
    }
    if !missing.is_empty() {
        parsed.problems.push(format!(
            "missing prefix(es) `{}`; assigning ranks by position",
            missing.join("`, `")
        ));
    }
    parsed
}

/// Number of leading ranks on which `a` and `b` can be trusted to agree,
/// expressed as a distance: 7 when they differ at Domain, 0 when they agree
/// on every rank or one of them stops being assigned first.
pub fn taxonomic_distance(a: &Classification, b: &Classification) -> u8 {
    for (k, (&s, &o)) in a.iter().zip(b).enumerate() {
        if s == UNASSIGNED || o == UNASSIGNED {
            break;
        }
        if s == EMPTY || o == EMPTY || s != o {
            return (NUM_RANKS - k) as u8;
        }
    }
    0
}

/// Per-hit rank codes with the taxon names they intern.
///
/// Code 0 is an unassigned rank, code 1 an empty rank name, and codes from 2
/// index distinct taxon names in order of first appearance.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTable {
    codes: Vec<Classification>,
    taxa: Vec<String>,
}

impl ClassificationTable {
    pub fn from_taxstrings<'a, I>(taxstrings: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut lookup: FxHashMap<String, u32> = FxHashMap::default();
        lookup.insert(String::new(), EMPTY);
        let mut taxa = vec![String::new(), String::new()];
        let mut warned: FxHashSet<&'a str> = FxHashSet::default();
        let mut untagged = 0usize;
        let mut codes = Vec::new();

        for taxstring in taxstrings {
            let parsed = parse_taxstring(taxstring);
            if !parsed.problems.is_empty() && warned.insert(taxstring) {
                for problem in &parsed.problems {
                    warn!("Taxonomy string `{}`: {}", taxstring, problem);
                }
            }
            if parsed.ranks.is_empty() {
                untagged += 1;
            }
            let mut row = [UNASSIGNED; NUM_RANKS];
            for (slot, rank) in row.iter_mut().zip(parsed.ranks) {
                let next = taxa.len() as u32;
                *slot = *lookup.entry(rank.clone()).or_insert_with(|| {
                    taxa.push(rank);
                    next
                });
            }
            codes.push(row);
        }
        if untagged > 0 {
            warn!("{} marker hits have no taxonomy; treating them as unassigned", untagged);
        }
        ClassificationTable { codes, taxa }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[Classification] {
        &self.codes
    }

    /// Name interned under `code`; empty for codes 0 and 1.
    pub fn taxon(&self, code: u32) -> Option<&str> {
        self.taxa.get(code as usize).map(String::as_str)
    }

    pub fn distance(&self, a: usize, b: usize) -> u8 {
        taxonomic_distance(&self.codes[a], &self.codes[b])
    }

    /// Condensed pairwise flags over rows: `true` when two classifications
    /// are more than `t` ranks apart.
    pub fn disconnectivity(&self, t: u8) -> Vec<bool> {
        let m = self.codes.len();
        let codes = &self.codes;
        (0..m)
            .into_par_iter()
            .flat_map_iter(|i| (i + 1..m).map(move |j| taxonomic_distance(&codes[i], &codes[j]) > t))
            .collect()
    }
}
