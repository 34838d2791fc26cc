//! Out-of-core ranking of condensed pairwise distances.
//!
//! Distances are written to a scratch file a block of rows at a time,
//! sorted with an external merge sort (sorted runs, then a k-way merge) and
//! ranked in one streamed pass. Only the final rank vector is held in
//! memory. Ties are ordered by condensed offset so the output is
//! bit-identical to [`crate::rank::fractional_rank_by`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::debug;
use rayon::prelude::*;

use crate::error::Result;
use crate::rank::{cmp_value_then_index, TieRanker};

const VALUE_BYTES: usize = 8;
const RECORD_BYTES: usize = 16;

/// Write the condensed distances `metric(i, j)`, `i < j`, as little-endian
/// doubles. Rows are computed in parallel, at most `chunk_size` values per block.
pub fn write_pdist<F>(n: usize, metric: F, path: &Path, chunk_size: usize) -> Result<usize>
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    let mut writer = BufWriter::new(File::create(path)?);
    let chunk_size = chunk_size.max(1);
    let mut written = 0usize;
    let mut row = 0usize;
    while row < n {
        // Gather whole rows until the block would exceed chunk_size values.
        let mut end = row + 1;
        let mut block = n - 1 - row;
        while end < n && block + (n - 1 - end) <= chunk_size {
            block += n - 1 - end;
            end += 1;
        }
        let metric = &metric;
        let values: Vec<f64> = (row..end)
            .into_par_iter()
            .flat_map_iter(|i| (i + 1..n).map(move |j| metric(i, j)))
            .collect();
        for v in &values {
            writer.write_all(&v.to_le_bytes())?;
        }
        written += values.len();
        row = end;
    }
    writer.flush()?;
    debug!("Wrote {} pairwise distances to {:?}", written, path);
    Ok(written)
}

fn read_f64(reader: &mut impl Read) -> Result<f64> {
    let mut buf = [0u8; VALUE_BYTES];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn write_record(writer: &mut impl Write, value: f64, offset: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    writer.write_all(&offset.to_le_bytes())?;
    Ok(())
}

fn read_record(reader: &mut impl Read) -> Result<(f64, u64)> {
    let mut buf = [0u8; RECORD_BYTES];
    reader.read_exact(&mut buf)?;
    let mut value = [0u8; 8];
    let mut offset = [0u8; 8];
    value.copy_from_slice(&buf[..8]);
    offset.copy_from_slice(&buf[8..]);
    Ok((f64::from_le_bytes(value), u64::from_le_bytes(offset)))
}

struct Run {
    reader: BufReader<File>,
    remaining: usize,
}

impl Run {
    fn next(&mut self) -> Result<Option<(f64, u64)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        read_record(&mut self.reader).map(Some)
    }
}

struct Head {
    value: f64,
    offset: u64,
    run: usize,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for smallest-first.
        cmp_value_then_index(
            (other.value, other.offset as usize),
            (self.value, self.offset as usize),
        )
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

/// Sort `len` doubles stored at `values_path` into `(value, offset)` records
/// at `sorted_path`, holding at most `chunk_size` values in memory at a time.
pub fn external_argsort(
    values_path: &Path,
    len: usize,
    sorted_path: &Path,
    work_dir: &Path,
    chunk_size: usize,
) -> Result<()> {
    let chunk_size = chunk_size.max(1);
    let mut input = BufReader::new(File::open(values_path)?);
    let mut runs: Vec<(PathBuf, usize)> = Vec::new();

    let mut offset = 0usize;
    while offset < len {
        let take = chunk_size.min(len - offset);
        let mut chunk: Vec<(f64, usize)> = Vec::with_capacity(take);
        for k in 0..take {
            chunk.push((read_f64(&mut input)?, offset + k));
        }
        chunk.sort_by(|&a, &b| cmp_value_then_index(a, b));

        let run_path = work_dir.join(format!("run{}.bin", runs.len()));
        let mut writer = BufWriter::new(File::create(&run_path)?);
        for &(v, k) in &chunk {
            write_record(&mut writer, v, k as u64)?;
        }
        writer.flush()?;
        runs.push((run_path, take));
        offset += take;
    }
    debug!("External sort: {} values in {} sorted runs", len, runs.len());

    let mut readers = Vec::with_capacity(runs.len());
    for (path, count) in &runs {
        readers.push(Run {
            reader: BufReader::new(File::open(path)?),
            remaining: *count,
        });
    }

    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (run, reader) in readers.iter_mut().enumerate() {
        if let Some((value, offset)) = reader.next()? {
            heap.push(Head { value, offset, run });
        }
    }

    let mut out = BufWriter::new(File::create(sorted_path)?);
    while let Some(head) = heap.pop() {
        write_record(&mut out, head.value, head.offset)?;
        if let Some((value, offset)) = readers[head.run].next()? {
            heap.push(Head {
                value,
                offset,
                run: head.run,
            });
        }
    }
    out.flush()?;

    for (path, _) in &runs {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Fractional ranks from a sorted record file, streamed once.
/// Returns the ranks indexed by offset and the total weight.
pub fn rank_sorted_file<W>(sorted_path: &Path, len: usize, weight: W) -> Result<(Vec<f64>, f64)>
where
    W: Fn(usize) -> f64,
{
    let mut reader = BufReader::new(File::open(sorted_path)?);
    let mut out = vec![0.0; len];
    let mut ranker = TieRanker::new();
    let mut sink = |i: usize, r: f64| out[i] = r;
    for _ in 0..len {
        let (value, offset) = read_record(&mut reader)?;
        let offset = offset as usize;
        ranker.push(value, offset, weight(offset), &mut sink);
    }
    let total = ranker.finish(&mut sink);
    Ok((out, total))
}

/// Rank the condensed distances `metric(i, j)` of `n` points without
/// materialising them in memory. `weight` is indexed by condensed offset.
pub fn rank_pairwise_external<F, W>(
    n: usize,
    metric: F,
    weight: W,
    work_dir: Option<&Path>,
    chunk_size: usize,
) -> Result<Vec<f64>>
where
    F: Fn(usize, usize) -> f64 + Sync,
    W: Fn(usize) -> f64,
{
    let scratch = match work_dir {
        Some(dir) => tempfile::tempdir_in(dir)?,
        None => tempfile::tempdir()?,
    };
    let values_path = scratch.path().join("pdist.bin");
    let sorted_path = scratch.path().join("sorted.bin");

    let len = write_pdist(n, metric, &values_path, chunk_size)?;
    external_argsort(&values_path, len, &sorted_path, scratch.path(), chunk_size)?;
    std::fs::remove_file(&values_path)?;
    let (ranks, _) = rank_sorted_file(&sorted_path, len, weight)?;
    Ok(ranks)
}
