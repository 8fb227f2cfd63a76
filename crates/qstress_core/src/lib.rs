//! Core algorithms for stress-testing quantum error correction decoders.
//!
//! This crate holds everything that can be expressed without touching the
//! filesystem: the benchmark task description, the drift and burst noise
//! generator, the built-in phenomenological fault simulator, the decoding
//! graph, the clustering and matching decoders, and the hybrid dispatch
//! adapter that layers them into a fast path with a fallback.

/// Bit manipulation helpers for packed per-node flags.
///
/// Provides word-level get, set and toggle operations over `u64` slices. The
/// disjoint-set structure stores cluster parity and boundary membership in
/// this packed form to keep per-worker decoder state compact.
pub mod bit_utils;

/// Union-find clustering decoder with peeling.
///
/// Grows clusters around syndrome defects until every cluster is neutral,
/// then peels a spanning forest of each cluster into an edge correction.
/// Growth can be capped in steps, defects per cluster, and wall-clock time,
/// which turns the decoder into a cheap local fast path that reports
/// non-convergence instead of growing without bound.
pub mod decoder;

/// Disjoint set union with parity and boundary tracking.
///
/// Backs the clustering decoder. Each set root records whether the set holds
/// an odd number of defects and whether the set has reached the virtual
/// boundary node, which together decide whether a cluster is neutral.
pub mod dsu;

/// Detector error model as a weighted decoding graph.
///
/// Nodes are detectors plus one virtual boundary node. Edges are independent
/// fault mechanisms, each with a probability, a log-likelihood weight, and a
/// flag recording whether the mechanism flips the logical observable.
pub mod graph;

/// Minimum-weight perfect matching decoder.
///
/// Pairs defects with each other or with the boundary at minimum total
/// weight using a blossom solver. Slower than clustering but insensitive to
/// how far apart correlated defects land.
pub mod matching;

/// Hybrid decode dispatch over the available decoder backends.
///
/// Resolves a decoder identity into a fast-path backend and an optional
/// fallback backend once per worker, then drives each syndrome through the
/// FAST_PATH, FALLBACK, DONE state machine with per-path latency accounting.
pub mod adapter;

/// Drift schedule and burst injection for one benchmark task.
///
/// Turns a task description plus a shot index into a reproducible noise
/// realization: per-round drifted error probabilities, correlated burst
/// events, and the random substream handed to the fault simulator.
pub mod noise;

/// Fault simulator boundary and the built-in repetition-code memory model.
///
/// The trait is the seam to any circuit-level simulator; the built-in model
/// samples a distance-d repetition code under phenomenological noise so the
/// harness is runnable without external tooling.
pub mod simulator;

/// Immutable description of one benchmark sweep point.
///
/// Carries code distance, noise parameters, decoder identity, shot budget
/// and seed, together with validation and seed derivation helpers.
pub mod task;

use thiserror::Error;

/// Error types returned by task validation and decoding operations.
///
/// Configuration problems surface before any shot is sampled; the remaining
/// variants describe malformed inputs reaching a decoder and are isolated to
/// the shot that produced them by the sampling harness.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QecError {
    /// A task description failed validation.
    ///
    /// Raised for out-of-range distances, probabilities, or drift that would
    /// push the effective error rate outside (0, 1) at some round. Fatal to
    /// the task it belongs to; the sweep moves on to the next cell.
    #[error("invalid task: {field} {reason}")]
    InvalidTask {
        field: &'static str,
        reason: String,
    },

    /// A node index exceeds the bounds of the decoding graph.
    ///
    /// Indicates that a syndrome bit or detector ID references a node that
    /// does not exist in the current graph topology, typically from a
    /// mismatch between the graph and the syndrome source.
    #[error("node {node} out of bounds for graph with {num_nodes} nodes")]
    NodeOutOfBounds { node: usize, num_nodes: usize },

    /// A syndrome does not have one bit per detector.
    #[error("syndrome has {actual} bits, expected {expected}")]
    SyndromeLength { expected: usize, actual: usize },

    /// A correction buffer has reached its capacity limit.
    #[error("correction buffer overflow")]
    BufferOverflow,
}

impl QecError {
    /// Creates a configuration error for the named task field.
    pub fn invalid_task(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            field,
            reason: reason.into(),
        }
    }

    /// Returns true for errors that invalidate a whole task rather than one shot.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidTask { .. })
    }
}
