//! Hybrid decode dispatch.
//!
//! A `DecoderStack` is the per-worker decoder resource: it is resolved from
//! a `DecoderId` once when the worker starts, owns every buffer its
//! backends need, and is reused for every shot in that worker's range. It
//! is never shared between workers.
//!
//! Each call to [`DecoderStack::decode`] walks a three-state machine. The
//! fast path always runs first; the fallback runs exactly when the fast
//! path fails to certify its answer, and its result is final.

use crate::QecError;
use crate::decoder::{ClusterDecoder, ClusterLimits};
use crate::graph::DecodingGraph;
use crate::matching::MatchingDecoder;
use crate::task::DecoderId;
use bitvec::prelude::*;
use std::time::{Duration, Instant};

/// What to do with a shot whose fallback decode does not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Score the shot as a logical error.
    #[default]
    CountAsError,
    /// Score the shot as inconclusive and leave it out of the error rate.
    Exclude,
}

/// Tuning for the fast path and the fallback policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderConfig {
    /// Growth steps the local clustering fast path may take.
    pub fast_max_growth: usize,
    /// Defects any one fast-path cluster may hold before escalating.
    pub fast_max_cluster_defects: u32,
    /// Wall-clock budget for the fast path; exceeding it escalates.
    pub fast_timeout: Option<Duration>,
    /// Scoring of non-convergent fallback decodes.
    pub fallback_policy: FallbackPolicy,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            fast_max_growth: 2,
            fast_max_cluster_defects: 4,
            fast_timeout: None,
            fallback_policy: FallbackPolicy::CountAsError,
        }
    }
}

/// Decoding path a shot finished on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Path {
    Fast,
    Fallback,
}

/// Dispatch state of one decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    FastPath,
    Fallback,
    Done,
}

/// One concrete decoding capability.
pub enum Backend {
    Clustering(ClusterDecoder),
    Matching(MatchingDecoder),
}

impl Backend {
    fn solve(
        &mut self,
        graph: &DecodingGraph,
        defects: &[usize],
        out: &mut BitVec<u64, Lsb0>,
        deadline: Option<Instant>,
    ) -> Result<bool, QecError> {
        match self {
            Backend::Clustering(d) => d.solve_into(graph, defects, out, deadline),
            Backend::Matching(d) => d.solve_into(graph, defects, out),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Clustering(d) if d.limits() == ClusterLimits::UNBOUNDED => "union_find",
            Backend::Clustering(_) => "local_clustering",
            Backend::Matching(_) => "matching",
        }
    }
}

/// Result of decoding one syndrome.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Edge-indexed correction, or `None` when the final stage did not converge.
    pub correction: Option<BitVec<u64, Lsb0>>,
    /// Observable flip implied by the correction.
    pub predicted_flip: bool,
    /// Stage that produced the final answer.
    pub path: Path,
    /// Whether the final stage certified its answer.
    pub converged: bool,
    /// Whether the fast path certified (false whenever `path` is `Fallback`).
    pub fast_converged: bool,
    pub fast_latency: Duration,
    pub fallback_latency: Duration,
}

impl Outcome {
    /// Total decode time: fast path always, fallback only when taken.
    pub fn latency(&self) -> Duration {
        self.fast_latency + self.fallback_latency
    }
}

/// Per-worker fast path plus optional fallback.
pub struct DecoderStack {
    id: DecoderId,
    config: DecoderConfig,
    fast: Backend,
    fallback: Option<Backend>,
    defects: Vec<usize>,
    scratch: BitVec<u64, Lsb0>,
}

impl DecoderStack {
    /// Resolves a decoder identity into concrete backends sized for `graph`.
    pub fn for_decoder(id: DecoderId, graph: &DecodingGraph, config: DecoderConfig) -> Self {
        let (fast, fallback) = match id {
            DecoderId::Baseline => (Backend::Matching(MatchingDecoder::new(graph)), None),
            DecoderId::UnionFind => (
                Backend::Clustering(ClusterDecoder::new(graph, ClusterLimits::UNBOUNDED)),
                None,
            ),
            DecoderId::Hybrid => {
                let limits = ClusterLimits {
                    max_growth: Some(config.fast_max_growth),
                    max_cluster_defects: Some(config.fast_max_cluster_defects),
                };
                (
                    Backend::Clustering(ClusterDecoder::new(graph, limits)),
                    Some(Backend::Matching(MatchingDecoder::new(graph))),
                )
            }
        };
        Self {
            id,
            config,
            fast,
            fallback,
            defects: Vec::with_capacity(64),
            scratch: BitVec::repeat(false, graph.num_edges()),
        }
    }

    pub fn id(&self) -> DecoderId {
        self.id
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn fast_backend(&self) -> &Backend {
        &self.fast
    }

    pub fn fallback_backend(&self) -> Option<&Backend> {
        self.fallback.as_ref()
    }

    /// Decodes one syndrome through the fast path and, if needed, the fallback.
    ///
    /// # Arguments
    ///
    /// * `graph` - Decoding graph the syndrome belongs to
    /// * `syndrome` - One bit per detector
    ///
    /// # Returns
    ///
    /// The final `Outcome`, or an error for a malformed syndrome.
    pub fn decode(
        &mut self,
        graph: &DecodingGraph,
        syndrome: &BitSlice<u64, Lsb0>,
    ) -> Result<Outcome, QecError> {
        if syndrome.len() != graph.num_detectors {
            return Err(QecError::SyndromeLength {
                expected: graph.num_detectors,
                actual: syndrome.len(),
            });
        }
        self.defects.clear();
        self.defects.extend(syndrome.iter_ones());
        if self.scratch.len() != graph.num_edges() {
            self.scratch = BitVec::repeat(false, graph.num_edges());
        }

        let mut state = DispatchState::FastPath;
        let mut path = Path::Fast;
        let mut converged = false;
        let mut fast_converged = false;
        let mut fast_latency = Duration::ZERO;
        let mut fallback_latency = Duration::ZERO;

        loop {
            state = match state {
                DispatchState::FastPath => {
                    let start = Instant::now();
                    let deadline = self.config.fast_timeout.map(|t| start + t);
                    fast_converged =
                        self.fast
                            .solve(graph, &self.defects, &mut self.scratch, deadline)?;
                    fast_latency = start.elapsed();
                    converged = fast_converged;
                    if !fast_converged && self.fallback.is_some() {
                        DispatchState::Fallback
                    } else {
                        DispatchState::Done
                    }
                }
                DispatchState::Fallback => {
                    path = Path::Fallback;
                    let start = Instant::now();
                    if let Some(fallback) = self.fallback.as_mut() {
                        converged = fallback.solve(graph, &self.defects, &mut self.scratch, None)?;
                    }
                    fallback_latency = start.elapsed();
                    DispatchState::Done
                }
                DispatchState::Done => break,
            };
        }

        let (correction, predicted_flip) = if converged {
            let flip = graph.observable_parity(self.scratch.iter_ones());
            (Some(self.scratch.clone()), flip)
        } else {
            (None, false)
        };

        Ok(Outcome {
            correction,
            predicted_flip,
            path,
            converged,
            fast_converged,
            fast_latency,
            fallback_latency,
        })
    }
}
