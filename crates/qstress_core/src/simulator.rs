//! Fault simulation.
//!
//! [`FaultSimulator`] is the boundary between the harness and whatever
//! produces syndromes. The built-in [`RepetitionMemory`] model is a
//! distance-d bit-flip repetition code run for R noisy rounds followed by a
//! perfect final readout, under phenomenological noise: every data qubit and
//! every ancilla measurement fails independently with the round's drifted
//! probability. Bursts add correlated readout faults on top: every ancilla
//! in a burst's block reports a flipped measurement in the same round. The
//! detector error model covers the independent mechanisms only; bursts are
//! not part of it.

use crate::QecError;
use crate::graph::DecodingGraph;
use crate::noise::{NoiseInstanceGenerator, NoiseRealization};
use bitvec::prelude::*;
use rand::Rng;

/// One sampled shot: the detector outcomes and the true logical flip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledShot {
    /// One bit per detector.
    pub syndrome: BitVec<u64, Lsb0>,
    /// Whether the physical faults flipped the logical observable.
    pub logical_flip: bool,
}

/// Source of syndromes for one task.
///
/// Implementations are shared read-only by every worker, so `sample` must
/// be a pure function of the realization it is given.
pub trait FaultSimulator: Sync {
    /// Decoding graph describing the simulator's fault mechanisms.
    fn detector_error_model(&self) -> &DecodingGraph;

    /// Draws the syndrome and ground truth for one noise realization.
    fn sample(&self, realization: &NoiseRealization<'_>) -> SampledShot;
}

/// Repetition-code memory experiment under phenomenological noise.
///
/// Detector `D(r, a)` compares ancilla `a` between rounds `r - 1` and `r`;
/// round `R` is the perfect final readout. Edges are laid out per round, the
/// `d` data-qubit mechanisms first and then the `d - 1` measurement
/// mechanisms. Data qubit 0 carries the logical observable.
#[derive(Debug, Clone)]
pub struct RepetitionMemory {
    distance: usize,
    rounds: usize,
    graph: DecodingGraph,
}

impl RepetitionMemory {
    /// Builds the model for `distance` with one noisy round per schedule entry.
    pub fn new(distance: usize, schedule: &[f64]) -> Result<Self, QecError> {
        if distance < 2 {
            return Err(QecError::invalid_task(
                "code_distance",
                format!("{distance} leaves no ancilla to measure"),
            ));
        }
        let rounds = schedule.len();
        let ancillas = distance.saturating_sub(1);
        let mut graph = DecodingGraph::new((rounds + 1) * ancillas);
        let detector = |r: usize, a: usize| r * ancillas + a;

        for (r, &p) in schedule.iter().enumerate() {
            for q in 0..distance {
                let (u, v) = if q == 0 {
                    (detector(r, 0), None)
                } else if q == distance - 1 {
                    (detector(r, distance - 2), None)
                } else {
                    (detector(r, q - 1), Some(detector(r, q)))
                };
                graph.add_edge(u, v, p, q == 0)?;
            }
            for a in 0..ancillas {
                graph.add_edge(detector(r, a), Some(detector(r + 1, a)), p, false)?;
            }
        }
        graph.build_adjacency();

        Ok(Self {
            distance,
            rounds,
            graph,
        })
    }

    /// Builds the model matching a generator's task and drift schedule.
    pub fn for_generator(generator: &NoiseInstanceGenerator) -> Result<Self, QecError> {
        Self::new(generator.task().code_distance, generator.schedule())
    }

    pub fn distance(&self) -> usize {
        self.distance
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Detector comparing ancilla `ancilla` into round `round`.
    pub fn detector(&self, round: usize, ancilla: usize) -> usize {
        round * (self.distance - 1) + ancilla
    }

    /// Edge index of a data-qubit flip.
    pub fn data_edge(&self, round: usize, qubit: usize) -> usize {
        round * self.edges_per_round() + qubit
    }

    /// Edge index of an ancilla measurement error.
    pub fn measurement_edge(&self, round: usize, ancilla: usize) -> usize {
        round * self.edges_per_round() + self.distance + ancilla
    }

    fn edges_per_round(&self) -> usize {
        2 * self.distance - 1
    }

    fn fire(&self, edge: usize, syndrome: &mut BitVec<u64, Lsb0>, flip: &mut bool) {
        let e = &self.graph.edges[edge];
        let detectors = syndrome.len();
        for node in [e.u, e.v] {
            if node < detectors {
                let bit = syndrome[node];
                syndrome.set(node, !bit);
            }
        }
        *flip ^= e.observable;
    }
}

impl FaultSimulator for RepetitionMemory {
    fn detector_error_model(&self) -> &DecodingGraph {
        &self.graph
    }

    fn sample(&self, realization: &NoiseRealization<'_>) -> SampledShot {
        let mut rng = realization.sampling_rng();
        let mut syndrome = BitVec::repeat(false, self.graph.num_detectors);
        let mut logical_flip = false;
        let per_round = self.edges_per_round();

        for edge in 0..self.graph.num_edges() {
            let round = edge / per_round;
            let p = realization
                .round_probabilities
                .get(round)
                .copied()
                .unwrap_or(self.graph.edges[edge].probability);
            if rng.random::<f64>() < p {
                self.fire(edge, &mut syndrome, &mut logical_flip);
            }
        }

        for burst in &realization.bursts {
            if burst.round >= self.rounds {
                continue;
            }
            let end = burst.ancillas.end.min(self.distance - 1);
            for a in burst.ancillas.start..end {
                self.fire(
                    self.measurement_edge(burst.round, a),
                    &mut syndrome,
                    &mut logical_flip,
                );
            }
        }

        SampledShot {
            syndrome,
            logical_flip,
        }
    }
}
