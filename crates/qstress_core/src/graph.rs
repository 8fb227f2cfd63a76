//! Decoding graph representation for quantum error correction.
//!
//! Implements the graph structure that encodes a detector error model. Nodes
//! represent detectors plus a single virtual boundary node, and edges
//! represent independent fault mechanisms. Both decoders read the same graph;
//! it is built once per task and shared read-only by every worker.

use crate::QecError;

/// Probability floor used when turning probabilities into weights.
const MIN_PROBABILITY: f64 = 1e-12;

/// One independent fault mechanism in the decoding graph.
///
/// Stores the two nodes the mechanism flips, its probability, the derived
/// weight, and whether it flips the logical observable. A mechanism that
/// flips a single detector connects that detector to the boundary node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    /// First endpoint.
    ///
    /// Always a detector index; boundary mechanisms put the boundary node in
    /// `v` so the peeling and matching code can special-case it cheaply.
    pub u: usize,

    /// Second endpoint, possibly the boundary node.
    pub v: usize,

    /// Probability that the mechanism fires in one shot.
    pub probability: f64,

    /// Log-likelihood weight `ln((1 - p) / p)`.
    ///
    /// Floored at zero so shortest-path searches stay well defined even for
    /// probabilities above one half.
    pub weight: f64,

    /// Whether firing this mechanism flips the logical observable.
    pub observable: bool,
}

/// Decoding graph representing the error model topology.
///
/// Stores the fault mechanisms as a flat edge list together with an
/// adjacency index built by [`DecodingGraph::build_adjacency`]. Node
/// `num_detectors` is the virtual boundary, so `num_nodes()` is always one
/// more than the detector count.
#[derive(Clone, Debug)]
pub struct DecodingGraph {
    /// Flat list of graph edges as (u, v) node pairs.
    ///
    /// Stored as u32 pairs to keep the inner clustering loop cache friendly;
    /// it mirrors `edges` index for index.
    pub fast_edges: Vec<(u32, u32)>,

    /// Full edge records, indexed like `fast_edges`.
    pub edges: Vec<Edge>,

    /// Number of real detectors in the model.
    ///
    /// Detector indices run from zero to `num_detectors - 1`; the boundary
    /// node sits directly after them.
    pub num_detectors: usize,

    /// Compressed adjacency offsets, one entry per node plus a terminator.
    adjacency_offsets: Vec<usize>,

    /// Edge indices incident to each node, sliced by `adjacency_offsets`.
    adjacency: Vec<usize>,
}

impl DecodingGraph {
    /// Creates an empty decoding graph over `num_detectors` detectors.
    ///
    /// The boundary node is implicit and always present. Edge storage is
    /// pre-allocated from the detector count since most error models have a
    /// small constant number of mechanisms per detector.
    ///
    /// # Arguments
    ///
    /// * `num_detectors` - Number of detectors in the model
    pub fn new(num_detectors: usize) -> Self {
        Self {
            fast_edges: Vec::with_capacity(num_detectors * 4),
            edges: Vec::with_capacity(num_detectors * 4),
            num_detectors,
            adjacency_offsets: Vec::new(),
            adjacency: Vec::new(),
        }
    }

    /// Index of the virtual boundary node.
    #[inline]
    pub fn boundary(&self) -> usize {
        self.num_detectors
    }

    /// Returns the number of nodes in the graph, boundary included.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.num_detectors + 1
    }

    /// Returns the number of fault mechanisms.
    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Grows the detector count so that index `n - 1` is a valid detector.
    ///
    /// Growing moves the boundary index, so existing boundary edges are
    /// re-homed onto the new boundary node. Parsers that discover the
    /// detector count while reading call this on the fly.
    pub fn ensure_detectors(&mut self, n: usize) {
        if n > self.num_detectors {
            let old_boundary = self.num_detectors;
            self.num_detectors = n;
            for (edge, fast) in self.edges.iter_mut().zip(self.fast_edges.iter_mut()) {
                if edge.v == old_boundary {
                    edge.v = n;
                    fast.1 = n as u32;
                }
            }
        }
    }

    /// Adds a fault mechanism flipping detector `u` and node `v`.
    ///
    /// Pass `None` for `v` to connect `u` to the boundary. The weight is
    /// derived from the probability; the adjacency index is invalidated and
    /// must be rebuilt before decoding.
    ///
    /// # Arguments
    ///
    /// * `u` - Detector flipped by the mechanism
    /// * `v` - Second detector, or `None` for a boundary mechanism
    /// * `probability` - Probability that the mechanism fires
    /// * `observable` - Whether the mechanism flips the logical observable
    ///
    /// # Returns
    ///
    /// The new edge index, or `NodeOutOfBounds` if a detector index is not
    /// below `num_detectors`.
    pub fn add_edge(
        &mut self,
        u: usize,
        v: Option<usize>,
        probability: f64,
        observable: bool,
    ) -> Result<usize, QecError> {
        for node in [Some(u), v].into_iter().flatten() {
            if node >= self.num_detectors {
                return Err(QecError::NodeOutOfBounds {
                    node,
                    num_nodes: self.num_detectors,
                });
            }
        }
        let v = v.unwrap_or(self.boundary());
        let index = self.edges.len();
        self.edges.push(Edge {
            u,
            v,
            probability,
            weight: weight_for(probability),
            observable,
        });
        self.fast_edges.push((u as u32, v as u32));
        self.adjacency_offsets.clear();
        Ok(index)
    }

    /// Builds the compressed adjacency index.
    ///
    /// Called once after the last edge is added. Each edge is listed under
    /// both of its endpoints, in edge-index order, so neighbour iteration is
    /// deterministic.
    pub fn build_adjacency(&mut self) {
        let n = self.num_nodes();
        let mut degree = vec![0usize; n];
        for edge in &self.edges {
            degree[edge.u] += 1;
            degree[edge.v] += 1;
        }
        let mut offsets = Vec::with_capacity(n + 1);
        let mut running = 0;
        offsets.push(0);
        for d in &degree {
            running += d;
            offsets.push(running);
        }
        let mut cursor = offsets.clone();
        let mut adjacency = vec![0usize; running];
        for (index, edge) in self.edges.iter().enumerate() {
            adjacency[cursor[edge.u]] = index;
            cursor[edge.u] += 1;
            adjacency[cursor[edge.v]] = index;
            cursor[edge.v] += 1;
        }
        self.adjacency_offsets = offsets;
        self.adjacency = adjacency;
    }

    /// Whether `build_adjacency` has run since the last edge was added.
    pub fn has_adjacency(&self) -> bool {
        self.adjacency_offsets.len() == self.num_nodes() + 1
    }

    /// Edge indices incident to `node`.
    ///
    /// Empty if the adjacency index has not been built.
    pub fn incident(&self, node: usize) -> &[usize] {
        if !self.has_adjacency() {
            return &[];
        }
        &self.adjacency[self.adjacency_offsets[node]..self.adjacency_offsets[node + 1]]
    }

    /// The endpoint of `edge` opposite `node`.
    #[inline]
    pub fn other(&self, edge: usize, node: usize) -> usize {
        let e = &self.edges[edge];
        if e.u == node { e.v } else { e.u }
    }

    /// Parity of observable flips over a set of edge indices.
    pub fn observable_parity<I: IntoIterator<Item = usize>>(&self, edges: I) -> bool {
        edges
            .into_iter()
            .fold(false, |acc, e| acc ^ self.edges[e].observable)
    }
}

/// Converts a mechanism probability into a non-negative matching weight.
pub fn weight_for(probability: f64) -> f64 {
    let p = probability.clamp(MIN_PROBABILITY, 1.0 - MIN_PROBABILITY);
    ((1.0 - p) / p).ln().max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> DecodingGraph {
        // B - D0 - D1 - B
        let mut g = DecodingGraph::new(2);
        g.add_edge(0, None, 0.01, true).unwrap();
        g.add_edge(0, Some(1), 0.01, false).unwrap();
        g.add_edge(1, None, 0.01, false).unwrap();
        g.build_adjacency();
        g
    }

    #[test]
    fn boundary_follows_detectors() {
        let g = line();
        assert_eq!(g.boundary(), 2);
        assert_eq!(g.num_nodes(), 3);
        assert_eq!(g.fast_edges[0], (0, 2));
    }

    #[test]
    fn adjacency_lists_both_endpoints() {
        let g = line();
        assert_eq!(g.incident(0), &[0, 1]);
        assert_eq!(g.incident(1), &[1, 2]);
        assert_eq!(g.incident(2), &[0, 2]);
        assert_eq!(g.other(1, 0), 1);
        assert_eq!(g.other(0, 0), 2);
    }

    #[test]
    fn adding_an_edge_invalidates_adjacency() {
        let mut g = line();
        assert!(g.has_adjacency());
        g.add_edge(0, Some(1), 0.02, false).unwrap();
        assert!(!g.has_adjacency());
        assert!(g.incident(0).is_empty());
    }

    #[test]
    fn out_of_range_detector_is_rejected() {
        let mut g = DecodingGraph::new(2);
        assert_eq!(
            g.add_edge(0, Some(5), 0.1, false),
            Err(QecError::NodeOutOfBounds {
                node: 5,
                num_nodes: 2
            })
        );
    }

    #[test]
    fn growing_detectors_rehomes_boundary_edges() {
        let mut g = DecodingGraph::new(1);
        g.add_edge(0, None, 0.1, true).unwrap();
        g.ensure_detectors(4);
        assert_eq!(g.edges[0].v, 4);
        assert_eq!(g.fast_edges[0], (0, 4));
    }

    #[test]
    fn weights_are_non_negative_and_decreasing() {
        assert!(weight_for(0.001) > weight_for(0.01));
        assert_eq!(weight_for(0.7), 0.0);
        assert!(weight_for(0.0).is_finite());
    }

    #[test]
    fn observable_parity_xors_flags() {
        let g = line();
        assert!(g.observable_parity([0]));
        assert!(!g.observable_parity([1, 2]));
        assert!(g.observable_parity([0, 1, 2]));
    }
}
