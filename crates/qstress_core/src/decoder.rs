use crate::QecError;
use crate::bit_utils::BitPack;
use crate::dsu::UnionFind;
use crate::graph::DecodingGraph;
use bitvec::prelude::*;
use std::time::Instant;

const NO_EDGE: usize = usize::MAX;

pub trait CorrectionBuffer {
    fn push_correction(&mut self, edge: usize) -> Result<(), QecError>;
    fn clear_buffer(&mut self);
}

impl CorrectionBuffer for Vec<usize> {
    fn push_correction(&mut self, edge: usize) -> Result<(), QecError> {
        self.try_reserve(1).map_err(|_| QecError::BufferOverflow)?;
        self.push(edge);
        Ok(())
    }
    fn clear_buffer(&mut self) {
        self.clear();
    }
}

impl CorrectionBuffer for BitVec<u64, Lsb0> {
    fn push_correction(&mut self, edge: usize) -> Result<(), QecError> {
        if edge >= self.len() {
            return Err(QecError::BufferOverflow);
        }
        let flipped = !self[edge];
        self.set(edge, flipped);
        Ok(())
    }
    fn clear_buffer(&mut self) {
        self.fill(false);
    }
}

/// Caps that turn unbounded union-find into a local, certifying fast path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClusterLimits {
    /// Maximum number of growth steps before giving up.
    pub max_growth: Option<usize>,
    /// Maximum defects any single cluster may hold.
    pub max_cluster_defects: Option<u32>,
}

impl ClusterLimits {
    pub const UNBOUNDED: ClusterLimits = ClusterLimits {
        max_growth: None,
        max_cluster_defects: None,
    };
}

pub struct ClusterDecoder {
    limits: ClusterLimits,
    parent: Vec<usize>,
    rank: Vec<u8>,
    parity: Vec<u64>,
    boundary: Vec<u64>,
    defects: Vec<u32>,
    touched: Vec<u8>,
    grown: Vec<u64>,
    frontier: Vec<usize>,
    marked: Vec<u64>,
    visited: Vec<u8>,
    parent_edge: Vec<usize>,
    order: Vec<usize>,
}

impl ClusterDecoder {
    pub fn new(graph: &DecodingGraph, limits: ClusterLimits) -> Self {
        let mut decoder = Self {
            limits,
            parent: Vec::new(),
            rank: Vec::new(),
            parity: Vec::new(),
            boundary: Vec::new(),
            defects: Vec::new(),
            touched: Vec::new(),
            grown: Vec::new(),
            frontier: Vec::with_capacity(64),
            marked: Vec::new(),
            visited: Vec::new(),
            parent_edge: Vec::new(),
            order: Vec::new(),
        };
        decoder.ensure_capacity(graph.num_nodes(), graph.num_edges());
        decoder
    }

    pub fn limits(&self) -> ClusterLimits {
        self.limits
    }

    fn ensure_capacity(&mut self, nodes: usize, edges: usize) {
        if self.parent.len() < nodes {
            let words = BitPack::words_for(nodes);
            self.parent.resize(nodes, 0);
            self.rank.resize(nodes, 0);
            self.parity.resize(words, 0);
            self.boundary.resize(words, 0);
            self.defects.resize(nodes, 0);
            self.touched.resize(nodes, 0);
            self.marked.resize(words, 0);
            self.visited.resize(nodes, 0);
            self.parent_edge.resize(nodes, NO_EDGE);
            self.order.reserve(nodes);
        }
        let edge_words = BitPack::words_for(edges);
        if self.grown.len() < edge_words {
            self.grown.resize(edge_words, 0);
        }
    }

    /// Grows clusters around `defect_nodes` and peels them into a correction.
    ///
    /// Returns Ok(true) with the correction in `out_buffer` when every
    /// cluster became neutral within the configured limits and before
    /// `deadline`. Returns Ok(false) with an empty buffer otherwise.
    pub fn solve_into<CB: CorrectionBuffer>(
        &mut self,
        graph: &DecodingGraph,
        defect_nodes: &[usize],
        out_buffer: &mut CB,
        deadline: Option<Instant>,
    ) -> Result<bool, QecError> {
        out_buffer.clear_buffer();
        debug_assert!(graph.has_adjacency(), "decoding graph adjacency not built");

        for &d in defect_nodes {
            if d >= graph.num_detectors {
                return Err(QecError::NodeOutOfBounds {
                    node: d,
                    num_nodes: graph.num_detectors,
                });
            }
        }
        if defect_nodes.is_empty() {
            return Ok(true);
        }

        let num_nodes = graph.num_nodes();
        let num_edges = graph.num_edges();
        self.ensure_capacity(num_nodes, num_edges);

        let touched = &mut self.touched[..num_nodes];
        let grown = &mut self.grown[..BitPack::words_for(num_edges)];
        touched.fill(0);
        grown.fill(0);

        let mut dsu = UnionFind::new(
            &mut self.parent[..num_nodes],
            &mut self.rank[..num_nodes],
            &mut self.parity[..BitPack::words_for(num_nodes)],
            &mut self.boundary[..BitPack::words_for(num_nodes)],
            &mut self.defects[..num_nodes],
        );
        dsu.mark_boundary(graph.boundary());
        for &d in defect_nodes {
            dsu.add_defect(d);
            touched[d] = 1;
        }

        let mut steps = 0usize;
        let certified = loop {
            if !defect_nodes.iter().any(|&d| dsu.is_active(d)) {
                break true;
            }
            if let Some(cap) = self.limits.max_cluster_defects {
                if defect_nodes.iter().any(|&d| dsu.defect_count(d) > cap) {
                    break false;
                }
            }
            if self.limits.max_growth.is_some_and(|g| steps >= g) {
                break false;
            }
            if deadline.is_some_and(|t| Instant::now() >= t) {
                break false;
            }

            self.frontier.clear();
            for (e, &(u32_u, u32_v)) in graph.fast_edges.iter().enumerate() {
                if BitPack::get(grown, e) {
                    continue;
                }
                let u = u32_u as usize;
                let v = u32_v as usize;
                if touched[u] == 0 && touched[v] == 0 {
                    continue;
                }
                if (touched[u] != 0 && dsu.is_active(u)) || (touched[v] != 0 && dsu.is_active(v)) {
                    self.frontier.push(e);
                }
            }
            if self.frontier.is_empty() {
                break false;
            }
            for &e in &self.frontier {
                BitPack::set(grown, e, true);
                let (u, v) = graph.fast_edges[e];
                dsu.union(u as usize, v as usize);
                touched[u as usize] = 1;
                touched[v as usize] = 1;
            }
            steps += 1;
        };

        if !certified {
            return Ok(false);
        }
        if let Some(cap) = self.limits.max_cluster_defects {
            if defect_nodes.iter().any(|&d| dsu.defect_count(d) > cap) {
                return Ok(false);
            }
        }

        self.peel(graph, defect_nodes, out_buffer)?;
        Ok(true)
    }

    /// Peels a spanning forest of the grown edges into a correction.
    ///
    /// Trees are rooted at the boundary where possible so a leftover defect
    /// drains into it.
    fn peel<CB: CorrectionBuffer>(
        &mut self,
        graph: &DecodingGraph,
        defect_nodes: &[usize],
        out_buffer: &mut CB,
    ) -> Result<(), QecError> {
        let num_nodes = graph.num_nodes();
        let grown = &self.grown[..BitPack::words_for(graph.num_edges())];
        let marked = &mut self.marked[..BitPack::words_for(num_nodes)];
        let visited = &mut self.visited[..num_nodes];
        marked.fill(0);
        visited.fill(0);
        self.order.clear();

        for &d in defect_nodes {
            BitPack::toggle(marked, d);
        }

        let roots = std::iter::once(graph.boundary()).chain(defect_nodes.iter().copied());
        for root in roots {
            if visited[root] != 0 {
                continue;
            }
            visited[root] = 1;
            self.parent_edge[root] = NO_EDGE;
            let mut head = self.order.len();
            self.order.push(root);
            while head < self.order.len() {
                let x = self.order[head];
                head += 1;
                for &e in graph.incident(x) {
                    if !BitPack::get(grown, e) {
                        continue;
                    }
                    let y = graph.other(e, x);
                    if visited[y] == 0 {
                        visited[y] = 1;
                        self.parent_edge[y] = e;
                        self.order.push(y);
                    }
                }
            }
        }

        for &x in self.order.iter().rev() {
            let e = self.parent_edge[x];
            if e == NO_EDGE || !BitPack::get(marked, x) {
                continue;
            }
            out_buffer.push_correction(e)?;
            BitPack::toggle(marked, x);
            BitPack::toggle(marked, graph.other(e, x));
        }
        Ok(())
    }
}
