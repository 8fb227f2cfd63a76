//! Minimum-weight perfect matching decoder.
//!
//! Wraps the serial blossom solver from `fusion-blossom`. The decoding graph
//! is handed over once per decoder with the boundary node as the only
//! virtual vertex, so each shot pairs every defect with another defect or
//! the boundary at minimum total weight. The solver works on integer
//! weights; log-likelihood weights are scaled by [`WEIGHT_SCALE`] and
//! rounded, which keeps pairings exact well below any realistic weight gap.

use crate::QecError;
use crate::decoder::CorrectionBuffer;
use crate::graph::DecodingGraph;
use fusion_blossom::mwpm_solver::{PrimalDualSolver, SolverSerial};
use fusion_blossom::util::{SolverInitializer, SyndromePattern, VertexIndex, Weight};
use std::collections::HashMap;

/// Integer units per unit of log-likelihood weight.
pub const WEIGHT_SCALE: f64 = 1000.0;

/// Blossom edge weights must be even and positive.
fn blossom_weight(weight: f64) -> Weight {
    let half = (weight * WEIGHT_SCALE / 2.0).round().max(1.0);
    (half as Weight) * 2
}

/// Matching decoder holding one blossom solver.
///
/// One instance per worker. Parallel mechanisms between the same two nodes
/// collapse to the cheapest one before the solver sees them, and
/// `solver_edges` maps each solver edge back to that mechanism.
pub struct MatchingDecoder {
    solver: SolverSerial,
    solver_edges: Vec<usize>,
    /// Connected component of every node.
    component: Vec<usize>,
    /// Whether a component reaches the boundary.
    grounded: Vec<bool>,
    parity: Vec<bool>,
    sorted_defects: Vec<usize>,
}

impl MatchingDecoder {
    pub fn new(graph: &DecodingGraph) -> Self {
        let boundary = graph.boundary();
        let mut cheapest: HashMap<(usize, usize), usize> = HashMap::new();
        for (e, edge) in graph.edges.iter().enumerate() {
            if edge.u == edge.v {
                continue;
            }
            let key = (edge.u.min(edge.v), edge.u.max(edge.v));
            cheapest
                .entry(key)
                .and_modify(|kept| {
                    if edge.weight < graph.edges[*kept].weight {
                        *kept = e;
                    }
                })
                .or_insert(e);
        }
        let mut solver_edges: Vec<usize> = cheapest.into_values().collect();
        solver_edges.sort_unstable();

        let weighted_edges = solver_edges
            .iter()
            .map(|&e| {
                let edge = &graph.edges[e];
                (
                    edge.u as VertexIndex,
                    edge.v as VertexIndex,
                    blossom_weight(edge.weight),
                )
            })
            .collect();
        let initializer = SolverInitializer {
            vertex_num: graph.num_nodes() as VertexIndex,
            weighted_edges,
            virtual_vertices: vec![boundary as VertexIndex],
        };

        let (component, grounded) = components(graph, &solver_edges);
        Self {
            solver: SolverSerial::new(&initializer),
            solver_edges,
            parity: vec![false; grounded.len()],
            component,
            grounded,
            sorted_defects: Vec::new(),
        }
    }

    /// Pairs every defect and writes the edges of the minimum-weight
    /// correction.
    ///
    /// # Arguments
    ///
    /// * `graph` - Decoding graph the decoder was built from
    /// * `defect_nodes` - Detector indices that fired
    /// * `out_buffer` - Receives the edge indices of the correction
    ///
    /// # Returns
    ///
    /// Ok(true) if every defect was paired, Ok(false) with an empty buffer
    /// if some connected component holds an odd number of defects and no
    /// route to the boundary.
    pub fn solve_into<CB: CorrectionBuffer>(
        &mut self,
        graph: &DecodingGraph,
        defect_nodes: &[usize],
        out_buffer: &mut CB,
    ) -> Result<bool, QecError> {
        out_buffer.clear_buffer();

        for &d in defect_nodes {
            if d >= graph.num_detectors {
                return Err(QecError::NodeOutOfBounds {
                    node: d,
                    num_nodes: graph.num_detectors,
                });
            }
        }
        self.sorted_defects.clear();
        self.sorted_defects.extend_from_slice(defect_nodes);
        self.sorted_defects.sort_unstable();
        self.sorted_defects.dedup();
        if self.sorted_defects.is_empty() {
            return Ok(true);
        }
        if !self.pairable() {
            return Ok(false);
        }

        let pattern = SyndromePattern::new_vertices(
            self.sorted_defects
                .iter()
                .map(|&d| d as VertexIndex)
                .collect(),
        );
        self.solver.solve(&pattern);
        let subgraph = self.solver.subgraph();
        self.solver.clear();

        for solver_edge in subgraph {
            out_buffer.push_correction(self.solver_edges[solver_edge as usize])?;
        }
        Ok(true)
    }

    /// True when every ungrounded component holds an even defect count.
    fn pairable(&mut self) -> bool {
        self.parity.fill(false);
        for &d in &self.sorted_defects {
            self.parity[self.component[d]] ^= true;
        }
        self.parity
            .iter()
            .zip(&self.grounded)
            .all(|(&odd, &grounded)| !odd || grounded)
    }
}

/// Labels the connected components of the solver's edge set.
fn components(graph: &DecodingGraph, solver_edges: &[usize]) -> (Vec<usize>, Vec<bool>) {
    let n = graph.num_nodes();
    let mut neighbours = vec![Vec::new(); n];
    for &e in solver_edges {
        let edge = &graph.edges[e];
        neighbours[edge.u].push(edge.v);
        neighbours[edge.v].push(edge.u);
    }

    let mut component = vec![usize::MAX; n];
    let mut grounded = Vec::new();
    let mut stack = Vec::new();
    for start in 0..n {
        if component[start] != usize::MAX {
            continue;
        }
        let label = grounded.len();
        let mut reaches_boundary = false;
        component[start] = label;
        stack.push(start);
        while let Some(node) = stack.pop() {
            reaches_boundary |= node == graph.boundary();
            for &next in &neighbours[node] {
                if component[next] == usize::MAX {
                    component[next] = label;
                    stack.push(next);
                }
            }
        }
        grounded.push(reaches_boundary);
    }
    (component, grounded)
}
