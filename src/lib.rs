//! Metagenomic contig binning by density reachability and marker-gene
//! coherence, with an alternative mediod-growth engine driven by rank
//! extrema.

pub mod bins;
pub mod cache;
pub mod condensed;
pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod extrema;
pub mod hierarchy;
pub mod io;
pub mod matrix;
pub mod partition;
pub mod pipeline;
pub mod profile;
pub mod rank;
pub mod stream;
pub mod taxonomy;
pub mod union_find;

pub use bins::BinManager;
pub use condensed::CondensedMatrix;
pub use config::{GrowthConfig, NonConvergencePolicy, RankBackend, ReachConfig, Weighting};
pub use distance::ReachabilityTrace;
pub use engine::{ClusterEngine, GrowthSummary};
pub use error::{BinError, Result};
pub use hierarchy::LinkageTree;
pub use matrix::Matrix;
pub use pipeline::{run_reachability, ReachOutput};
pub use profile::{FeatureMatrix, MarkerHit, MarkerMapping};
