//! Noise instance generation.
//!
//! Drift is a deterministic function of the round: the effective error
//! probability follows `base * (1 + A * sin(2*pi*r/R))`. Bursts are random
//! per shot: at every round, independently, the readout of a contiguous
//! block of ancilla qubits is corrupted at once. Both are fully determined
//! by the task and the shot seed, so re-running a seed reproduces the
//! identical instance.

use crate::QecError;
use crate::simulator::{FaultSimulator, SampledShot};
use crate::task::{TaskDescriptor, mix64, shot_seed};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::ops::Range;

/// Bounds applied to every scheduled probability.
const PROBABILITY_FLOOR: f64 = 1e-12;

const BURST_STREAM: u64 = 0x6275_7273_7473_7472;
const SAMPLING_STREAM: u64 = 0x7361_6d70_6c69_6e67;

/// A correlated fault injected in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstEvent {
    /// Round in which the burst strikes.
    pub round: usize,
    /// Contiguous block of ancillas whose measurements flip.
    pub ancillas: Range<usize>,
}

/// Concrete noise for one shot.
///
/// Borrows the task-wide drift schedule from its generator; owned by the
/// shot that created it and dropped once the syndrome has been sampled.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseRealization<'a> {
    pub shot_index: u64,
    pub shot_seed: u64,
    /// Effective error probability of every round.
    pub round_probabilities: &'a [f64],
    /// Burst events in ascending round order.
    pub bursts: Vec<BurstEvent>,
}

impl NoiseRealization<'_> {
    /// Random substream reserved for the fault simulator.
    pub fn sampling_rng(&self) -> StdRng {
        StdRng::seed_from_u64(mix64(self.shot_seed ^ SAMPLING_STREAM))
    }
}

/// Effective error probability at `round` of `rounds`, clamped into (0, 1).
pub fn drifted_probability(base: f64, drift_amplitude: f64, round: usize, rounds: usize) -> f64 {
    let phase = 2.0 * PI * round as f64 / rounds as f64;
    (base * (1.0 + drift_amplitude * phase.sin())).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR)
}

/// Width of a burst footprint at distance `d`: half the code, rounded up.
///
/// Never wider than the `d - 1` ancillas of the code.
pub fn burst_width(code_distance: usize) -> usize {
    code_distance
        .div_ceil(2)
        .min(code_distance.saturating_sub(1))
        .max(1)
}

/// Turns a validated task into reproducible per-shot noise.
#[derive(Debug, Clone)]
pub struct NoiseInstanceGenerator {
    task: TaskDescriptor,
    schedule: Vec<f64>,
}

impl NoiseInstanceGenerator {
    /// Validates `task` and precomputes its drift schedule.
    ///
    /// # Returns
    ///
    /// The generator, or `QecError::InvalidTask` when the task cannot be
    /// sampled. No shot is ever drawn from an invalid task.
    pub fn new(task: &TaskDescriptor) -> Result<Self, QecError> {
        task.validate()?;
        let schedule = (0..task.rounds)
            .map(|r| drifted_probability(task.base_error_rate, task.drift_amplitude, r, task.rounds))
            .collect();
        Ok(Self {
            task: *task,
            schedule,
        })
    }

    pub fn task(&self) -> &TaskDescriptor {
        &self.task
    }

    /// Per-round effective error probabilities.
    pub fn schedule(&self) -> &[f64] {
        &self.schedule
    }

    /// Builds the noise realization of shot `shot_index`.
    pub fn realize(&self, shot_index: u64) -> NoiseRealization<'_> {
        self.realize_seeded(shot_index, shot_seed(self.task.seed, shot_index))
    }

    /// Builds a realization from an explicit shot seed.
    pub fn realize_seeded(&self, shot_index: u64, seed: u64) -> NoiseRealization<'_> {
        let mut bursts = Vec::new();
        if self.task.burst_probability > 0.0 {
            let ancillas = self.task.code_distance - 1;
            let width = burst_width(self.task.code_distance);
            let mut rng = StdRng::seed_from_u64(mix64(seed ^ BURST_STREAM));
            for round in 0..self.task.rounds {
                if rng.random::<f64>() < self.task.burst_probability {
                    let start = rng.random_range(0..=ancillas - width);
                    bursts.push(BurstEvent {
                        round,
                        ancillas: start..start + width,
                    });
                }
            }
        }
        NoiseRealization {
            shot_index,
            shot_seed: seed,
            round_probabilities: &self.schedule,
            bursts,
        }
    }

    /// Samples the syndrome and ground-truth flip of shot `shot_index`.
    pub fn generate<S: FaultSimulator + ?Sized>(&self, simulator: &S, shot_index: u64) -> SampledShot {
        simulator.sample(&self.realize(shot_index))
    }

    /// Samples a shot from an explicit shot seed.
    pub fn generate_seeded<S: FaultSimulator + ?Sized>(
        &self,
        simulator: &S,
        shot_index: u64,
        seed: u64,
    ) -> SampledShot {
        simulator.sample(&self.realize_seeded(shot_index, seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::DecoderId;

    fn stress_task() -> TaskDescriptor {
        TaskDescriptor::new(5, 0.003, DecoderId::Hybrid)
            .with_drift(0.3)
            .with_burst(0.2)
            .with_seed(11)
    }

    #[test]
    fn zero_drift_is_the_uniform_baseline() {
        let task = TaskDescriptor::new(5, 0.004, DecoderId::Baseline).with_seed(3);
        let generator = NoiseInstanceGenerator::new(&task).unwrap();
        assert_eq!(generator.schedule().len(), 15);
        assert!(generator.schedule().iter().all(|&p| p == 0.004));
    }

    #[test]
    fn drift_follows_the_sinusoid() {
        let task = TaskDescriptor::new(4, 0.01, DecoderId::Baseline)
            .with_rounds(8)
            .with_drift(0.5);
        let generator = NoiseInstanceGenerator::new(&task).unwrap();
        let s = generator.schedule();
        assert!((s[0] - 0.01).abs() < 1e-15);
        assert!((s[2] - 0.015).abs() < 1e-12);
        assert!((s[6] - 0.005).abs() < 1e-12);
        assert!(s.iter().all(|&p| p > 0.0 && p < 1.0));
    }

    #[test]
    fn full_drift_is_clamped_above_zero() {
        let p = drifted_probability(0.01, 1.0, 3, 4);
        assert!(p > 0.0);
        assert!(p < 1e-9);
    }

    #[test]
    fn invalid_task_is_rejected_up_front() {
        let task = TaskDescriptor::new(3, 0.9, DecoderId::Baseline).with_drift(1.0);
        let err = NoiseInstanceGenerator::new(&task).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn realizations_are_reproducible() {
        let generator = NoiseInstanceGenerator::new(&stress_task()).unwrap();
        for shot in 0..50 {
            assert_eq!(generator.realize(shot), generator.realize(shot));
        }
        let other = NoiseInstanceGenerator::new(&stress_task()).unwrap();
        assert_eq!(generator.realize(17), other.realize(17));
    }

    #[test]
    fn bursts_are_contiguous_and_in_range() {
        let generator = NoiseInstanceGenerator::new(&stress_task()).unwrap();
        let mut seen = 0;
        for shot in 0..200 {
            for burst in generator.realize(shot).bursts {
                seen += 1;
                assert!(burst.round < 15);
                assert_eq!(burst.ancillas.len(), 3);
                assert!(burst.ancillas.end <= 4);
            }
        }
        assert!(seen > 0);
    }

    #[test]
    fn burst_width_fits_the_ancillas() {
        assert_eq!(burst_width(2), 1);
        assert_eq!(burst_width(3), 2);
        assert_eq!(burst_width(5), 3);
        assert_eq!(burst_width(8), 4);
    }

    #[test]
    fn zero_burst_probability_never_bursts() {
        let task = stress_task().with_burst(0.0);
        let generator = NoiseInstanceGenerator::new(&task).unwrap();
        assert!((0..100).all(|s| generator.realize(s).bursts.is_empty()));
    }
}
