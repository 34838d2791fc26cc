use rustc_hash::FxHashMap;

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets of `x` and `y`; returns the new root, or `None` if
    /// they were already joined.
    pub fn union(&mut self, x: usize, y: usize) -> Option<usize> {
        let px = self.find(x);
        let py = self.find(y);
        if px == py {
            return None;
        }
        // Union by rank
        let root = if self.rank[px] < self.rank[py] {
            self.parent[px] = py;
            py
        } else if self.rank[px] > self.rank[py] {
            self.parent[py] = px;
            px
        } else {
            self.parent[py] = px;
            self.rank[px] += 1;
            px
        };
        Some(root)
    }

    /// Component id per element, numbered 0.. in order of first element.
    pub fn labels(&mut self) -> Vec<usize> {
        let n = self.parent.len();
        let mut root_to_label: FxHashMap<usize, usize> = FxHashMap::default();
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let root = self.find(i);
            let next = root_to_label.len();
            labels.push(*root_to_label.entry(root).or_insert(next));
        }
        labels
    }
}
