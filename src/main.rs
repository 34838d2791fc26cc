use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::path::PathBuf;

use reachbin::config::{DEFAULT_CHUNK_SIZE, DEFAULT_IN_MEMORY_PAIRS};
use reachbin::{
    io, run_reachability, BinManager, ClusterEngine, GrowthConfig, MarkerMapping, NonConvergencePolicy,
    RankBackend, ReachConfig, Weighting,
};

#[derive(Parser)]
#[command(name = "reachbin")]
#[command(about = "Bin metagenomic contigs by coverage and composition.", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    // Threading
    /// Number of threads to use for parallel operations.
    #[arg(short = 't', long = "threads", value_name = "N", global = true)]
    threads: Option<usize>,

    // Logging
    /// Verbosity level (0 = error, 1 = info, 2 = debug).
    #[arg(short = 'v', long = "verbose", value_name = "N", default_value_t = 1, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Order contigs by density reachability and cut the resulting tree where
    /// marker taxonomy conflicts.
    Reach(ReachArgs),
    /// Grow bins around moving mediods using rank extrema.
    Grow(GrowArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    /// In memory for small inputs, on disk above the pair limit.
    Auto,
    Memory,
    External,
}

#[derive(ClapArgs)]
struct InputArgs {
    // MANDATORY OPTIONS
    /// Coverage table: contig, length, gc, then one column per sample.
    #[arg(short = 'c', long = "coverage", value_name = "FILE")]
    coverage: PathBuf,

    /// K-mer signature table: contig, then one column per k-mer.
    #[arg(short = 'k', long = "kmers", value_name = "FILE")]
    kmers: PathBuf,

    /// Prefix for output files (<PREFIX>.bins.tsv, ...).
    #[arg(short = 'o', long = "out", value_name = "PREFIX")]
    out: PathBuf,

    // Distance Options
    /// Weight pairwise distance ranks by the product of contig lengths.
    #[arg(short = 'l', long = "length-weighted")]
    length_weighted: bool,

    /// Where pairwise distances are ranked.
    #[arg(long = "backend", value_enum, default_value_t = BackendChoice::Auto)]
    backend: BackendChoice,

    /// Pair count above which the automatic backend goes to disk.
    #[arg(long = "in-memory-pairs", value_name = "N", default_value_t = DEFAULT_IN_MEMORY_PAIRS)]
    in_memory_pairs: usize,

    /// Scratch directory for the external backend.
    #[arg(long = "work-dir", value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Values per sorted run in the external backend.
    #[arg(long = "chunk-size", value_name = "N", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    // Quality Filter
    /// Leave contigs shorter than this (bp) unbinned.
    #[arg(long = "min-length", value_name = "N", default_value_t = 0)]
    min_length: u64,

    /// Unbin bins with fewer contigs than this.
    #[arg(long = "min-bin-size", value_name = "N", default_value_t = 5)]
    min_bin_size: usize,

    /// Unbin bins with fewer bases than this.
    #[arg(long = "min-bin-bp", value_name = "N", default_value_t = 50_000)]
    min_bin_bp: u64,
}

impl InputArgs {
    fn weighting(&self) -> Weighting {
        if self.length_weighted {
            Weighting::LengthProduct
        } else {
            Weighting::Uniform
        }
    }

    /// Backend for ranking the pairs among contigs that pass the length
    /// cutoff.
    fn backend(&self, lengths: &[u64]) -> RankBackend {
        let num_contigs = lengths.iter().filter(|&&l| l >= self.min_length).count();
        let pairs = num_contigs * num_contigs.saturating_sub(1) / 2;
        let mut backend = match self.backend {
            BackendChoice::Auto => RankBackend::auto(pairs, self.in_memory_pairs, self.chunk_size),
            BackendChoice::Memory => RankBackend::InMemory,
            BackendChoice::External => RankBackend::External {
                work_dir: None,
                chunk_size: self.chunk_size,
            },
        };
        if let RankBackend::External { work_dir, .. } = &mut backend {
            info!("Ranking {} distance pairs on disk", pairs);
            *work_dir = self.work_dir.clone();
        }
        backend
    }
}

#[derive(ClapArgs)]
struct ReachArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Marker hits: contig, marker, optional taxonomy string.
    #[arg(short = 'm', long = "markers", value_name = "FILE")]
    markers: Option<PathBuf>,

    // Ordering Options
    /// Neighbour count used for core distances.
    #[arg(short = 'p', long = "min-pts", value_name = "N", default_value_t = 20)]
    min_pts: usize,

    /// Cumulative neighbour length (bp) used for core distances.
    #[arg(short = 's', long = "min-size-bp", value_name = "N")]
    min_size_bp: Option<u64>,

    /// Reuse and store reachability traces in this directory.
    #[arg(long = "cache-dir", value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    // Partition Options
    /// Taxonomic distance (0-7) above which two marker hits conflict.
    #[arg(short = 'T', long = "taxonomic-threshold", value_name = "N", default_value_t = 2)]
    taxonomic_threshold: u8,

    /// Extend cuts to every ancestor of an evidence-bearing cut node.
    #[arg(short = 'g', long = "greedy")]
    greedy: bool,
}

#[derive(ClapArgs)]
struct GrowArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Existing bin assignments (contig, bin) to grow around.
    #[arg(short = 'b', long = "bins", value_name = "FILE")]
    bins: Option<PathBuf>,

    // Growth Options
    /// Extremum score cutoff used when recruiting contigs into a bin.
    #[arg(short = 'x', long = "threshold", value_name = "F", default_value_t = 0.05)]
    threshold: f64,

    /// Growth rounds per bin before its mediod must settle.
    #[arg(short = 'r', long = "max-rounds", value_name = "N", default_value_t = 10)]
    max_rounds: usize,

    /// Keep a bin whose mediod is still moving after the last round instead
    /// of failing.
    #[arg(short = 'f', long = "force-terminate")]
    force_terminate: bool,
}

fn run_reach(args: ReachArgs) -> reachbin::Result<()> {
    let features = io::read_features(&args.input.coverage, &args.input.kmers)?;
    let markers = match &args.markers {
        Some(path) => io::read_markers(path, features.names())?,
        None => {
            warn!("No marker hits given; the tree will not be cut");
            MarkerMapping::default()
        }
    };

    let config = ReachConfig {
        min_pts: args.min_pts,
        min_size_bp: args.min_size_bp,
        weighting: args.input.weighting(),
        taxonomic_threshold: args.taxonomic_threshold,
        greedy: args.greedy,
        backend: args.input.backend(features.lengths()),
        min_length: args.input.min_length,
        min_bin_size: args.input.min_bin_size,
        min_bin_bp: args.input.min_bin_bp,
    };
    let output = run_reachability(&features, &markers, &config, args.cache_dir.as_deref())?;

    let names: Vec<String> = output.contigs.iter().map(|&i| features.names()[i].clone()).collect();
    io::write_reachability(&args.input.out, &names, &output.trace)?;
    io::write_bins(&args.input.out, features.names(), &output.assignments)?;
    Ok(())
}

fn run_grow(args: GrowArgs) -> reachbin::Result<()> {
    let features = io::read_features(&args.input.coverage, &args.input.kmers)?;
    let lengths = features.lengths().to_vec();
    let mut bins = match &args.bins {
        Some(path) => BinManager::from_assignments(io::read_bins(path, features.names())?, lengths)?,
        None => BinManager::new(lengths),
    };

    let config = GrowthConfig {
        threshold: args.threshold,
        max_rounds: args.max_rounds,
        on_nonconvergence: if args.force_terminate {
            NonConvergencePolicy::ForceTerminate
        } else {
            NonConvergencePolicy::Fail
        },
        weighting: args.input.weighting(),
        min_length: args.input.min_length,
        min_bin_size: args.input.min_bin_size,
        min_bin_bp: args.input.min_bin_bp,
    };
    let backend = args.input.backend(features.lengths());
    let engine = ClusterEngine::new(&features, config, &backend)?;
    let summary = engine.make_bins(&mut bins)?;
    if !summary.forced.is_empty() {
        warn!("{} bins were force-terminated", summary.forced.len());
    }

    io::write_bins(&args.input.out, features.names(), bins.assignments())?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    // Initialize logger based on verbosity
    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    if let Some(threads) = args.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
            eprintln!("Error configuring thread pool: {}", e);
            std::process::exit(1);
        }
    }

    let result = match args.command {
        Command::Reach(reach) => {
            info!("Starting reachability binning...");
            run_reach(reach)
        }
        Command::Grow(grow) => {
            info!("Starting mediod growth...");
            run_grow(grow)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    info!("Done.");
}
