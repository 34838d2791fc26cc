//! On-disk cache of reachability traces.
//!
//! A trace is stored as `<fingerprint>.trace.tsv` under the cache directory,
//! where the fingerprint is a SHA-256 digest of the feature data and every
//! parameter the traversal depends on.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::config::{ReachConfig, Weighting};
use crate::distance::ReachabilityTrace;
use crate::error::{BinError, Result};
use crate::profile::FeatureMatrix;

/// Hex digest identifying the traversal of `features` under `config`.
pub fn fingerprint(features: &FeatureMatrix, config: &ReachConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update((features.len() as u64).to_le_bytes());
    hasher.update((features.num_samples() as u64).to_le_bytes());
    hasher.update((features.kmers().ncols() as u64).to_le_bytes());
    for name in features.names() {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    for &len in features.lengths() {
        hasher.update(len.to_le_bytes());
    }
    for v in features.coverage().as_slice() {
        hasher.update(v.to_le_bytes());
    }
    for v in features.kmers().as_slice() {
        hasher.update(v.to_le_bytes());
    }
    hasher.update((config.min_pts as u64).to_le_bytes());
    hasher.update(config.min_size_bp.unwrap_or(u64::MAX).to_le_bytes());
    hasher.update([match config.weighting {
        Weighting::Uniform => 0u8,
        Weighting::LengthProduct => 1u8,
    }]);

    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn trace_path(dir: &Path, fingerprint: &str) -> PathBuf {
    dir.join(format!("{}.trace.tsv", fingerprint))
}

/// Cached trace for `fingerprint`, if one exists and describes `n` points.
///
/// Unreadable or inconsistent cache files are reported and treated as a miss.
pub fn load_trace(dir: &Path, fingerprint: &str, n: usize) -> Result<Option<ReachabilityTrace>> {
    let path = trace_path(dir, fingerprint);
    if !path.exists() {
        debug!("No cached trace at {:?}", path);
        return Ok(None);
    }
    match read_trace(&path) {
        Ok(trace) if trace.len() == n => {
            info!("Loaded reachability trace from {:?}", path);
            Ok(Some(trace))
        }
        Ok(trace) => {
            warn!(
                "Ignoring cached trace {:?}: {} points cached, {} expected",
                path,
                trace.len(),
                n
            );
            Ok(None)
        }
        Err(e) => {
            warn!("Ignoring cached trace {:?}: {}", path, e);
            Ok(None)
        }
    }
}

fn read_trace(path: &Path) -> Result<ReachabilityTrace> {
    let reader = BufReader::new(File::open(path)?);
    let mut order = Vec::new();
    let mut dist = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if lineno == 0 || line.is_empty() {
            continue;
        }
        let (index, distance) = line
            .split_once('\t')
            .ok_or_else(|| BinError::parse(path, lineno + 1, "expected two columns"))?;
        let index: usize = index
            .parse()
            .map_err(|_| BinError::parse(path, lineno + 1, format!("bad index '{}'", index)))?;
        let distance: f64 = distance
            .parse()
            .map_err(|_| BinError::parse(path, lineno + 1, format!("bad distance '{}'", distance)))?;
        order.push(index);
        dist.push(distance);
    }
    ReachabilityTrace::new(order, dist)
}

/// Store `trace` under `fingerprint`, creating `dir` if needed.
pub fn save_trace(dir: &Path, fingerprint: &str, trace: &ReachabilityTrace) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let mut content = String::from("index\tdistance\n");
    for (&i, &d) in trace.order.iter().zip(&trace.dist) {
        content.push_str(&format!("{}\t{}\n", i, d));
    }

    let path = trace_path(dir, fingerprint);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(&path).map_err(|e| e.error)?;
    info!("Reachability trace cached to {:?}", path);
    Ok(path)
}
