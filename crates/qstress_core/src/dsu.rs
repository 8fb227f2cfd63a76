//! Disjoint Set Union (DSU) data structure with parity and boundary tracking.
//!
//! Implements a union-find structure that maintains disjoint clusters of
//! nodes while tracking, per cluster, the parity of the defects it holds,
//! whether it has reached the virtual boundary node, and how many defects it
//! contains. A cluster is neutral once its parity is even or it touches the
//! boundary; the clustering decoder grows clusters until all are neutral.

use crate::bit_utils::BitPack;

/// Union-Find data structure over caller-owned buffers.
///
/// The buffers live in the decoder so they are allocated once per worker and
/// reused across shots; a `UnionFind` is a short-lived view created at the
/// start of every decode. Uses path halving and union by rank.
pub struct UnionFind<'a> {
    /// Parent pointer array for the union-find forest.
    ///
    /// Each element stores the parent node index, with root nodes pointing
    /// to themselves. Modified during find operations to implement path
    /// halving, flattening the tree structure for future lookups.
    pub parent: &'a mut [usize],

    /// Rank array for union-by-rank heuristic.
    pub rank: &'a mut [u8],

    /// Parity bit per set root, packed as u64 words.
    ///
    /// A set bit means the cluster holds an odd number of defects.
    pub parity: &'a mut [u64],

    /// Boundary bit per set root, packed as u64 words.
    ///
    /// A set bit means the cluster contains the boundary node and can
    /// absorb any leftover defect.
    pub boundary: &'a mut [u64],

    /// Number of defects held by each set root.
    pub defects: &'a mut [u32],
}

impl<'a> UnionFind<'a> {
    /// Initializes a union-find structure from pre-allocated slices.
    ///
    /// Sets all nodes to be their own parent (forming singleton sets),
    /// resets all ranks, parities, boundary flags and defect counts. The
    /// node slices must have matching lengths and the packed slices must
    /// hold at least `parent.len()` bits.
    ///
    /// # Arguments
    ///
    /// * `parent` - Mutable slice for parent pointers
    /// * `rank` - Mutable slice for rank values
    /// * `parity` - Mutable slice for parity bits (u64 words)
    /// * `boundary` - Mutable slice for boundary bits (u64 words)
    /// * `defects` - Mutable slice for per-root defect counts
    pub fn new(
        parent: &'a mut [usize],
        rank: &'a mut [u8],
        parity: &'a mut [u64],
        boundary: &'a mut [u64],
        defects: &'a mut [u32],
    ) -> Self {
        for (i, p) in parent.iter_mut().enumerate() {
            *p = i;
        }
        rank.fill(0);
        parity.fill(0);
        boundary.fill(0);
        defects.fill(0);
        Self {
            parent,
            rank,
            parity,
            boundary,
            defects,
        }
    }

    /// Finds the root of the set containing node i, with path halving.
    ///
    /// # Arguments
    ///
    /// * `i` - Node index to find the root for
    ///
    /// # Returns
    ///
    /// The root node index of the set containing i.
    #[inline(always)]
    pub fn find(&mut self, mut i: usize) -> usize {
        while i != self.parent[i] {
            let p = self.parent[i];
            let gp = self.parent[p];
            self.parent[i] = gp;
            i = p;
        }
        i
    }

    /// Merges the sets containing nodes i and j.
    ///
    /// The merged root inherits the XOR of both parities, the OR of both
    /// boundary flags and the sum of both defect counts. Returns true if a
    /// union occurred, false if the nodes were already in the same set.
    ///
    /// # Arguments
    ///
    /// * `i` - First node index
    /// * `j` - Second node index
    ///
    /// # Returns
    ///
    /// True if the sets were merged, false if they were already united.
    pub fn union(&mut self, i: usize, j: usize) -> bool {
        let root_i = self.find(i);
        let root_j = self.find(j);
        if root_i == root_j {
            return false;
        }

        let (keep, absorb) = if self.rank[root_i] < self.rank[root_j] {
            (root_j, root_i)
        } else {
            if self.rank[root_i] == self.rank[root_j] {
                self.rank[root_i] += 1;
            }
            (root_i, root_j)
        };

        self.parent[absorb] = keep;
        if BitPack::get(self.parity, absorb) {
            BitPack::toggle(self.parity, keep);
        }
        if BitPack::get(self.boundary, absorb) {
            BitPack::set(self.boundary, keep, true);
        }
        self.defects[keep] += self.defects[absorb];
        true
    }

    /// Records a defect on node i, toggling its cluster's parity.
    pub fn add_defect(&mut self, i: usize) {
        let root = self.find(i);
        BitPack::toggle(self.parity, root);
        self.defects[root] += 1;
    }

    /// Marks node i as the boundary node.
    pub fn mark_boundary(&mut self, i: usize) {
        let root = self.find(i);
        BitPack::set(self.boundary, root, true);
    }

    /// Whether the set containing node i still needs to grow.
    ///
    /// A set is active while it has odd parity and has not reached the
    /// boundary.
    pub fn is_active(&mut self, i: usize) -> bool {
        let root = self.find(i);
        BitPack::get(self.parity, root) && !BitPack::get(self.boundary, root)
    }

    /// Number of defects in the set containing node i.
    pub fn defect_count(&mut self, i: usize) -> u32 {
        let root = self.find(i);
        self.defects[root]
    }
}
