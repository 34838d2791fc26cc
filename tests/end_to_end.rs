use std::fs;
use std::path::Path;

use reachbin::distance::{pdist, reachability_order};
use reachbin::io;
use reachbin::partition::CoherencePartitioner;
use reachbin::{run_reachability, BinManager, LinkageTree, MarkerHit, MarkerMapping, Matrix, ReachConfig};

fn hit(row: usize, taxstring: &str) -> MarkerHit {
    MarkerHit {
        row,
        marker: format!("m{}", row),
        taxstring: taxstring.to_string(),
    }
}

#[test]
fn five_points_split_into_two_taxa() {
    // two tight pairs and an outlier on a line
    let points = Matrix::from_rows(&[vec![0.0], vec![1.0], vec![11.0], vec![12.0], vec![22.0]]).unwrap();
    let trace = reachability_order(&pdist(&points), None).unwrap();
    assert_eq!(trace.order, vec![0, 1, 2, 3, 4]);
    assert_eq!(trace.dist, vec![0.0, 1.0, 10.0, 1.0, 10.0]);

    let tree = LinkageTree::from_reachability(&trace).unwrap();
    assert_eq!(tree.height(tree.root()), 10.0);

    let mapping = MarkerMapping::new(
        vec![
            hit(0, "d__Bacteria; p__Firmicutes"),
            hit(1, "d__Bacteria; p__Firmicutes"),
            hit(2, "d__Archaea"),
            hit(3, "d__Archaea"),
        ],
        5,
    )
    .unwrap();
    let labels = CoherencePartitioner::new(&mapping).partition(&tree, 2, false).unwrap();
    assert_eq!(labels, vec![1, 1, 2, 2, 3]);

    let mut bins = BinManager::from_assignments(labels, vec![100; 5]).unwrap();
    assert_eq!(bins.unbin_low_quality(2, 0), 1);
    assert_eq!(bins.assignments(), &[1, 1, 2, 2, 0]);
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn binning_from_tables_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let coverage = write(
        dir.path(),
        "coverage.tsv",
        "contig\tlength\tgc\tsample1\n\
         a1\t1000\t0.40\t1.0\n\
         a2\t1000\t0.41\t1.2\n\
         a3\t1000\tNA\t1.1\n\
         b1\t1000\t0.60\t20.0\n\
         b2\t1000\t0.61\t20.2\n\
         b3\t1000\t0.62\t20.1\n",
    );
    let kmers = write(
        dir.path(),
        "kmers.tsv",
        "contig\tAAA\tCCC\n\
         b3\t1.0\t5.1\n\
         a1\t5.0\t1.0\n\
         a2\t5.0\t1.1\n\
         a3\t5.1\t1.0\n\
         b1\t1.0\t5.0\n\
         b2\t1.1\t5.0\n",
    );
    let markers = write(
        dir.path(),
        "markers.tsv",
        "contig\tmarker\ttaxonomy\n\
         a1\trpoB\tRoot; d__Bacteria; p__Firmicutes\n\
         a2\tgyrA\td__Bacteria; p__Firmicutes\n\
         a3\trecA\td__Bacteria\n\
         b1\trpoB\td__Archaea; p__Euryarchaeota\n\
         b2\tgyrA\td__Archaea\n\
         b3\trecA\td__Archaea; p__Euryarchaeota\n\
         missing\trpoB\td__Archaea\n",
    );

    let features = io::read_features(&coverage, &kmers).unwrap();
    let mapping = io::read_markers(&markers, features.names()).unwrap();
    assert_eq!(mapping.len(), 6);

    let config = ReachConfig {
        min_pts: 2,
        min_bin_size: 2,
        min_bin_bp: 1500,
        ..Default::default()
    };
    let cache = dir.path().join("cache");
    let output = run_reachability(&features, &mapping, &config, Some(&cache)).unwrap();
    assert_eq!(output.assignments, vec![1, 1, 1, 2, 2, 2]);

    let prefix = dir.path().join("run");
    let bins_path = io::write_bins(&prefix, features.names(), &output.assignments).unwrap();
    io::write_reachability(&prefix, features.names(), &output.trace).unwrap();
    assert_eq!(io::read_bins(&bins_path, features.names()).unwrap(), output.assignments);

    // a second run reads the cached trace and agrees
    let again = run_reachability(&features, &mapping, &config, Some(&cache)).unwrap();
    assert_eq!(again.trace, output.trace);
    assert_eq!(again.assignments, output.assignments);
}
