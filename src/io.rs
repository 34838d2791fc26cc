//! Tab-separated readers and writers for contig features, marker hits and
//! bin assignments.
//!
//! Every input file starts with a header line. Blank lines and lines
//! starting with `#` are skipped.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::distance::ReachabilityTrace;
use crate::error::{BinError, Result};
use crate::matrix::Matrix;
use crate::profile::{FeatureMatrix, MarkerHit, MarkerMapping};

/// Header line plus the remaining data lines, each with its 1-based line
/// number.
struct Table {
    header: Vec<String>,
    rows: Vec<(usize, Vec<String>)>,
}

fn read_table(path: &Path) -> Result<Table> {
    let reader = BufReader::new(File::open(path)?);
    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<String> = line.split('\t').map(|f| f.trim().to_string()).collect();
        if header.is_none() {
            header = Some(fields);
        } else {
            rows.push((lineno + 1, fields));
        }
    }

    let header = header.ok_or_else(|| BinError::parse(path, 0, "file has no header line"))?;
    Ok(Table { header, rows })
}

fn parse_field<T: std::str::FromStr>(path: &Path, line: usize, what: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| BinError::parse(path, line, format!("invalid {} '{}'", what, value)))
}

/// Index of each contig name in `names`.
fn name_index(names: &[String]) -> FxHashMap<&str, usize> {
    names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect()
}

/// Load the coverage table (`contig length gc sample...`) and the k-mer table
/// (`contig kmer...`). Contigs keep the coverage table's order; k-mer rows are
/// matched by name.
pub fn read_features(coverage_path: &Path, kmer_path: &Path) -> Result<FeatureMatrix> {
    let coverage_table = read_table(coverage_path)?;
    let width = coverage_table.header.len();
    if width < 4 {
        return Err(BinError::parse(
            coverage_path,
            1,
            "expected columns contig, length, gc and at least one sample",
        ));
    }
    let num_samples = width - 3;

    let mut names = Vec::with_capacity(coverage_table.rows.len());
    let mut lengths = Vec::with_capacity(coverage_table.rows.len());
    let mut gc = Vec::with_capacity(coverage_table.rows.len());
    let mut coverage = Vec::with_capacity(coverage_table.rows.len() * num_samples);
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();

    for (line, fields) in &coverage_table.rows {
        if fields.len() != width {
            return Err(BinError::parse(
                coverage_path,
                *line,
                format!("expected {} columns, found {}", width, fields.len()),
            ));
        }
        if let Some(first) = seen.insert(fields[0].clone(), *line) {
            return Err(BinError::parse(
                coverage_path,
                *line,
                format!("contig '{}' already listed on line {}", fields[0], first),
            ));
        }
        names.push(fields[0].clone());
        lengths.push(parse_field::<u64>(coverage_path, *line, "length", &fields[1])?);
        // FeatureMatrix substitutes a neutral value for unusable GC
        gc.push(fields[2].parse::<f64>().unwrap_or(f64::NAN));
        for value in &fields[3..] {
            coverage.push(parse_field::<f64>(coverage_path, *line, "coverage", value)?);
        }
    }
    let coverage = Matrix::new(names.len(), num_samples, coverage)?;

    let kmer_table = read_table(kmer_path)?;
    let num_kmers = kmer_table.header.len().saturating_sub(1);
    if num_kmers == 0 {
        return Err(BinError::parse(kmer_path, 1, "expected a contig column and k-mer columns"));
    }
    let mut kmer_rows: FxHashMap<String, Vec<f64>> = FxHashMap::default();
    for (line, fields) in &kmer_table.rows {
        if fields.len() != num_kmers + 1 {
            return Err(BinError::parse(
                kmer_path,
                *line,
                format!("expected {} columns, found {}", num_kmers + 1, fields.len()),
            ));
        }
        let row = fields[1..]
            .iter()
            .map(|v| parse_field::<f64>(kmer_path, *line, "k-mer frequency", v))
            .collect::<Result<Vec<f64>>>()?;
        kmer_rows.insert(fields[0].clone(), row);
    }

    let mut kmers = Vec::with_capacity(names.len() * num_kmers);
    for name in &names {
        let row = kmer_rows.get(name).ok_or_else(|| {
            BinError::InvalidParameter(format!("contig '{}' has no row in {:?}", name, kmer_path))
        })?;
        kmers.extend_from_slice(row);
    }
    let kmers = Matrix::new(names.len(), num_kmers, kmers)?;

    info!(
        "Loaded {} contigs with {} samples and {} k-mers",
        names.len(),
        num_samples,
        num_kmers
    );
    FeatureMatrix::new(names, coverage, kmers, lengths, gc)
}

/// Load marker hits (`contig marker [taxstring]`). Hits on contigs not in
/// `names` are skipped.
pub fn read_markers(path: &Path, names: &[String]) -> Result<MarkerMapping> {
    let table = read_table(path)?;
    let index = name_index(names);
    let mut hits = Vec::new();
    let mut skipped = 0usize;

    for (line, fields) in table.rows {
        if fields.len() < 2 {
            return Err(BinError::parse(path, line, "expected contig and marker columns"));
        }
        let Some(&row) = index.get(fields[0].as_str()) else {
            skipped += 1;
            continue;
        };
        hits.push(MarkerHit {
            row,
            marker: fields[1].clone(),
            taxstring: fields.get(2).cloned().unwrap_or_default(),
        });
    }
    if skipped > 0 {
        warn!("Skipped {} marker hits on contigs that were not loaded", skipped);
    }
    info!("Loaded {} marker hits", hits.len());
    MarkerMapping::new(hits, names.len())
}

/// Load existing bin assignments (`contig bin`). Contigs not listed are
/// unbinned.
pub fn read_bins(path: &Path, names: &[String]) -> Result<Vec<usize>> {
    let table = read_table(path)?;
    let index = name_index(names);
    let mut assignments = vec![0; names.len()];
    let mut skipped = 0usize;

    for (line, fields) in table.rows {
        if fields.len() < 2 {
            return Err(BinError::parse(path, line, "expected contig and bin columns"));
        }
        match index.get(fields[0].as_str()) {
            Some(&row) => assignments[row] = parse_field(path, line, "bin id", &fields[1])?,
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Skipped {} bin assignments for contigs that were not loaded", skipped);
    }
    Ok(assignments)
}

/// `<prefix>.<suffix>`, keeping any dots already in the prefix.
pub fn prefixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path: OsString = prefix.as_os_str().to_owned();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

/// Write `<prefix>.bins.tsv`.
pub fn write_bins(prefix: &Path, names: &[String], assignments: &[usize]) -> Result<PathBuf> {
    if names.len() != assignments.len() {
        return Err(BinError::shape("bin assignments", names.len(), assignments.len()));
    }
    let tsv_path = prefixed(prefix, "bins.tsv");

    let mut content = String::from("contig\tbin\n");
    for (name, bid) in names.iter().zip(assignments) {
        content.push_str(&format!("{}\t{}\n", name, bid));
    }
    std::fs::write(&tsv_path, content)?;
    info!("Bin assignments saved to {:?}", tsv_path);
    Ok(tsv_path)
}

/// Write `<prefix>.reach.tsv` with contigs in traversal order.
pub fn write_reachability(prefix: &Path, names: &[String], trace: &ReachabilityTrace) -> Result<PathBuf> {
    if names.len() != trace.len() {
        return Err(BinError::shape("reachability trace", names.len(), trace.len()));
    }
    let tsv_path = prefixed(prefix, "reach.tsv");

    let mut content = String::from("contig\tdistance\n");
    for (&i, d) in trace.order.iter().zip(&trace.dist) {
        content.push_str(&format!("{}\t{}\n", names[i], d));
    }
    std::fs::write(&tsv_path, content)?;
    info!("Reachability trace saved to {:?}", tsv_path);
    Ok(tsv_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn features_are_matched_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let cov = write(
            dir.path(),
            "cov.tsv",
            "contig\tlength\tgc\ts1\ts2\n# comment\nc1\t1000\t0.4\t1.0\t2.0\n\nc2\t2000\tNA\t3.0\t4.0\n",
        );
        let kmers = write(dir.path(), "kmers.tsv", "contig\tAA\tAT\nc2\t1\t1\nc1\t3\t1\n");

        let fm = read_features(&cov, &kmers).unwrap();
        assert_eq!(fm.names(), &["c1".to_string(), "c2".to_string()]);
        assert_eq!(fm.lengths(), &[1000, 2000]);
        assert_eq!(fm.gc(), &[0.4, 0.5]);
        assert_eq!(fm.coverage().row(1), &[3.0, 4.0]);
        assert_eq!(fm.kmers().row(0), &[0.75, 0.25]);
        assert_eq!(fm.kmers().row(1), &[0.5, 0.5]);
    }

    #[test]
    fn bad_rows_report_their_line() {
        let dir = tempfile::tempdir().unwrap();
        let cov = write(dir.path(), "cov.tsv", "contig\tlength\tgc\ts1\nc1\t10\t0.5\t1\nc2\tlong\t0.5\t1\n");
        let kmers = write(dir.path(), "kmers.tsv", "contig\tAA\nc1\t1\nc2\t1\n");
        match read_features(&cov, &kmers) {
            Err(BinError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected a parse error, got {:?}", other.map(|f| f.len())),
        }

        let cov = write(dir.path(), "cov2.tsv", "contig\tlength\tgc\ts1\nc1\t10\t0.5\t1\nc3\t10\t0.5\t1\n");
        assert!(matches!(read_features(&cov, &kmers), Err(BinError::InvalidParameter(_))));
    }

    #[test]
    fn markers_and_bins_skip_unknown_contigs() {
        let dir = tempfile::tempdir().unwrap();
        let names = vec!["c1".to_string(), "c2".to_string(), "c3".to_string()];
        let markers = write(
            dir.path(),
            "markers.tsv",
            "contig\tmarker\ttaxonomy\nc2\trpoB\td__Bacteria\nzz\trpoB\td__Archaea\nc1\tgyrA\n",
        );
        let mapping = read_markers(&markers, &names).unwrap();
        assert_eq!(mapping.rows(), vec![1, 0]);
        assert_eq!(mapping.taxstrings(), vec!["d__Bacteria", ""]);

        let bins = write(dir.path(), "bins.tsv", "contig\tbin\nc3\t2\nzz\t9\nc1\t1\n");
        assert_eq!(read_bins(&bins, &names).unwrap(), vec![1, 0, 2]);
    }

    #[test]
    fn outputs_use_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("run.v1");
        let names = vec!["a".to_string(), "b".to_string()];

        let bins_path = write_bins(&prefix, &names, &[2, 0]).unwrap();
        assert_eq!(bins_path, dir.path().join("run.v1.bins.tsv"));
        assert_eq!(fs::read_to_string(&bins_path).unwrap(), "contig\tbin\na\t2\nb\t0\n");
        assert_eq!(read_bins(&bins_path, &names).unwrap(), vec![2, 0]);

        let trace = ReachabilityTrace::new(vec![1, 0], vec![0.0, 1.5]).unwrap();
        let reach_path = write_reachability(&prefix, &names, &trace).unwrap();
        assert_eq!(fs::read_to_string(reach_path).unwrap(), "contig\tdistance\nb\t0\na\t1.5\n");
    }
}
