//! Benchmark task descriptions.
//!
//! A `TaskDescriptor` pins down one sweep point: which code, which noise,
//! which decoder, how many shots and which seed. It is plain `Copy` data so
//! every worker can hold its own copy without sharing anything mutable.

use crate::QecError;
use std::fmt;
use std::str::FromStr;

/// Decoder identities the harness can benchmark.
///
/// Each identity resolves to a fixed fast-path backend and an optional
/// fallback backend when a worker starts (see `adapter::DecoderStack`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DecoderId {
    /// Minimum-weight matching on its own. The reference point every other
    /// decoder is compared against.
    Baseline,

    /// Global union-find clustering on its own, with unbounded growth.
    UnionFind,

    /// Bounded local clustering as the fast path, escalating to matching
    /// whenever the clustering cannot certify its answer.
    Hybrid,
}

impl DecoderId {
    /// All decoder identities in sweep order.
    pub const ALL: [DecoderId; 3] = [DecoderId::Baseline, DecoderId::UnionFind, DecoderId::Hybrid];

    /// Returns the short name used on the command line and in result tables.
    pub fn name(&self) -> &'static str {
        match self {
            DecoderId::Baseline => "baseline",
            DecoderId::UnionFind => "union_find",
            DecoderId::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for DecoderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DecoderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "baseline" | "matching" => Ok(DecoderId::Baseline),
            "union_find" | "uf" => Ok(DecoderId::UnionFind),
            "hybrid" => Ok(DecoderId::Hybrid),
            other => Err(format!("unknown decoder '{other}'")),
        }
    }
}

/// Immutable description of one benchmark point.
///
/// Construct with [`TaskDescriptor::new`] and adjust with the `with_*`
/// helpers; none of the fields change once a task has been handed to the
/// sampling pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskDescriptor {
    /// Repetition code distance (number of data qubits).
    pub code_distance: usize,

    /// Number of noisy syndrome-extraction rounds.
    pub rounds: usize,

    /// Physical error probability before drift modulation.
    pub base_error_rate: f64,

    /// Relative amplitude of the sinusoidal drift, in [0, 1].
    pub drift_amplitude: f64,

    /// Per-round probability of a correlated burst, in [0, 1].
    pub burst_probability: f64,

    /// Decoder under test.
    pub decoder_id: DecoderId,

    /// Number of shots to sample for this point.
    pub shot_count: u64,

    /// Root seed from which every shot seed is derived.
    pub seed: u64,
}

impl TaskDescriptor {
    /// Creates a task with uniform noise and the default round count of `3 * d`.
    pub fn new(code_distance: usize, base_error_rate: f64, decoder_id: DecoderId) -> Self {
        Self {
            code_distance,
            rounds: default_rounds(code_distance),
            base_error_rate,
            drift_amplitude: 0.0,
            burst_probability: 0.0,
            decoder_id,
            shot_count: 1,
            seed: 0,
        }
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_drift(mut self, drift_amplitude: f64) -> Self {
        self.drift_amplitude = drift_amplitude;
        self
    }

    pub fn with_burst(mut self, burst_probability: f64) -> Self {
        self.burst_probability = burst_probability;
        self
    }

    pub fn with_shots(mut self, shot_count: u64) -> Self {
        self.shot_count = shot_count;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_decoder(mut self, decoder_id: DecoderId) -> Self {
        self.decoder_id = decoder_id;
        self
    }

    /// Checks every field against its admissible range.
    ///
    /// The drift bound is checked against the peak of the sinusoid,
    /// `base_error_rate * (1 + drift_amplitude)`, so a task that passes can
    /// never produce an effective probability of one or more at any round.
    ///
    /// # Returns
    ///
    /// Ok(()) when the task can be sampled, or `QecError::InvalidTask` naming
    /// the first offending field.
    pub fn validate(&self) -> Result<(), QecError> {
        if self.code_distance < 2 {
            return Err(QecError::invalid_task(
                "code_distance",
                format!("must be at least 2, got {}", self.code_distance),
            ));
        }
        if self.rounds == 0 {
            return Err(QecError::invalid_task("rounds", "must be positive"));
        }
        if self.shot_count == 0 {
            return Err(QecError::invalid_task("shot_count", "must be positive"));
        }
        if !(self.base_error_rate > 0.0 && self.base_error_rate < 1.0) {
            return Err(QecError::invalid_task(
                "base_error_rate",
                format!("must lie in (0, 1), got {}", self.base_error_rate),
            ));
        }
        if !(0.0..=1.0).contains(&self.drift_amplitude) {
            return Err(QecError::invalid_task(
                "drift_amplitude",
                format!("must lie in [0, 1], got {}", self.drift_amplitude),
            ));
        }
        if !(0.0..=1.0).contains(&self.burst_probability) {
            return Err(QecError::invalid_task(
                "burst_probability",
                format!("must lie in [0, 1], got {}", self.burst_probability),
            ));
        }
        let peak = self.base_error_rate * (1.0 + self.drift_amplitude);
        if peak >= 1.0 {
            return Err(QecError::invalid_task(
                "drift_amplitude",
                format!(
                    "drives the effective error rate to {peak} (base {} with drift {})",
                    self.base_error_rate, self.drift_amplitude
                ),
            ));
        }
        Ok(())
    }

    /// Stable identifier for this task, used to tag shots.
    pub fn id(&self) -> u64 {
        let mut h = self.seed;
        for word in [
            self.code_distance as u64,
            self.rounds as u64,
            self.base_error_rate.to_bits(),
            self.drift_amplitude.to_bits(),
            self.burst_probability.to_bits(),
            self.decoder_id as u64,
            self.shot_count,
        ] {
            h = mix64(h ^ word);
        }
        h
    }
}

/// Number of rounds used when a task does not specify one.
pub fn default_rounds(code_distance: usize) -> usize {
    code_distance * 3
}

/// SplitMix64 finalizer.
///
/// Bijective on `u64`, so distinct inputs never collide, and every output
/// bit depends on every input bit.
#[inline]
pub fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derives the seed of one shot from its task seed and index.
///
/// A pure function of its two arguments: the shot's noise never depends on
/// which worker ran it or in what order.
#[inline]
pub fn shot_seed(task_seed: u64, shot_index: u64) -> u64 {
    mix64(mix64(task_seed) ^ shot_index.wrapping_mul(0xD1B5_4A32_D192_ED03))
}

/// Derives a sweep cell's seed from the run seed and the cell's noise point.
///
/// The decoder is not an input, so every decoder at the same point decodes
/// identical noise instances.
pub fn noise_seed_for(
    run_seed: u64,
    code_distance: usize,
    rounds: usize,
    base_error_rate: f64,
    drift_amplitude: f64,
    burst_probability: f64,
) -> u64 {
    let mut h = mix64(run_seed);
    for word in [
        code_distance as u64,
        rounds as u64,
        base_error_rate.to_bits(),
        drift_amplitude.to_bits(),
        burst_probability.to_bits(),
    ] {
        h = mix64(h ^ word);
    }
    h
}
