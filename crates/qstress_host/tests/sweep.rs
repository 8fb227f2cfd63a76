//! End-to-end sweeps through the orchestrator and the results table.

use bitvec::prelude::*;
use qstress_core::QecError;
use qstress_core::graph::DecodingGraph;
use qstress_core::noise::{NoiseInstanceGenerator, NoiseRealization};
use qstress_core::simulator::{FaultSimulator, RepetitionMemory, SampledShot};
use qstress_core::task::DecoderId;
use qstress_host::orchestrator::{EXIT_INTERRUPTED, EXIT_SKIPPED, Orchestrator, SweepConfig};
use qstress_io::table::{MemorySink, ResultsTable, RowSink, read_rows};
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// One readout fault per shot at a random round and ancilla, plus a
/// logical flip the detectors cannot see, drawn with probability 5%. Every
/// decoder clears the readout fault without touching the observable, so
/// the logical error rate is exactly the flip rate.
struct HiddenFlipFixture {
    model: RepetitionMemory,
}

const HIDDEN_FLIP_RATE: f64 = 0.05;

impl HiddenFlipFixture {
    fn new(generator: &NoiseInstanceGenerator) -> Result<Self, QecError> {
        Ok(Self {
            model: RepetitionMemory::for_generator(generator)?,
        })
    }
}

impl FaultSimulator for HiddenFlipFixture {
    fn detector_error_model(&self) -> &DecodingGraph {
        self.model.detector_error_model()
    }

    fn sample(&self, realization: &NoiseRealization<'_>) -> SampledShot {
        let mut rng = realization.sampling_rng();
        let round = rng.random_range(0..self.model.rounds());
        let ancilla = rng.random_range(0..self.model.distance() - 1);
        let mut syndrome = BitVec::repeat(false, self.detector_error_model().num_detectors);
        syndrome.set(self.model.detector(round, ancilla), true);
        syndrome.set(self.model.detector(round + 1, ancilla), true);
        SampledShot {
            syndrome,
            logical_flip: rng.random_bool(HIDDEN_FLIP_RATE),
        }
    }
}

#[test]
fn known_error_rate_falls_inside_the_interval() {
    let config = SweepConfig {
        distances: vec![5],
        error_rates: vec![0.01],
        decoders: vec![DecoderId::Baseline, DecoderId::UnionFind],
        shots: 4_000,
        drift_amplitudes: vec![0.0],
        burst_probabilities: vec![0.0],
        confidence: 0.999,
        seed: 12,
        ..SweepConfig::default()
    };
    let stop = AtomicBool::new(false);
    let mut orch = Orchestrator::new(config, MemorySink::new());
    let report = orch.run_with(&stop, HiddenFlipFixture::new).unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(report.exit_code(), 0);

    for stat in &report.results {
        assert_eq!(stat.shots_observed, 4_000);
        assert_eq!(stat.decode_failures, 0);
        assert_eq!(stat.fast_path_fraction(), 1.0);
        assert_eq!(stat.latency.count, 4_000);
        let rate = stat.logical_error_rate();
        assert!((0.03..0.07).contains(&rate), "rate {rate}");
        let ci = stat.interval().unwrap();
        assert!(ci.lower < HIDDEN_FLIP_RATE && HIDDEN_FLIP_RATE < ci.upper);
    }
    // Same noise seed for both decoders, and neither gets the hidden flips.
    assert_eq!(
        report.results[0].logical_errors_observed,
        report.results[1].logical_errors_observed
    );

    let row = &orch.sink().rows()[0];
    assert_eq!(row.errors, report.results[0].logical_errors_observed);
    assert_eq!(row.ci_low, report.results[0].interval().unwrap().lower);
}

#[test]
fn bursts_push_shots_onto_the_fallback() {
    let config = SweepConfig {
        distances: vec![5],
        error_rates: vec![0.003],
        decoders: vec![DecoderId::Hybrid],
        shots: 5_000,
        drift_amplitudes: vec![0.3],
        burst_probabilities: vec![0.05],
        seed: 17,
        ..SweepConfig::default()
    };
    let stop = AtomicBool::new(false);
    let mut orch = Orchestrator::new(config, MemorySink::new());
    let report = orch.run(&stop).unwrap();
    let stat = &report.results[0];
    assert_eq!(stat.shots_observed, 5_000);
    assert!(stat.fast_path_fraction() < 1.0);
    assert!(stat.fast_path_fraction() > 0.0);
    assert!(stat.fallback_latency.count > 0);
}

#[test]
fn invalid_noise_point_is_skipped_without_sampling() {
    let config = SweepConfig {
        distances: vec![3],
        error_rates: vec![0.9],
        decoders: vec![DecoderId::Hybrid],
        drift_amplitudes: vec![1.0],
        burst_probabilities: vec![0.0],
        shots: 100,
        ..SweepConfig::default()
    };
    let stop = AtomicBool::new(false);
    let mut built = 0;
    let mut orch = Orchestrator::new(config, MemorySink::new());
    let report = orch
        .run_with(&stop, |g| {
            built += 1;
            RepetitionMemory::for_generator(g)
        })
        .unwrap();
    assert_eq!(built, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(report.exit_code(), EXIT_SKIPPED);
    assert!(orch.sink().rows().is_empty());
}

#[test]
fn cell_over_memory_budget_is_skipped() {
    let config = SweepConfig {
        distances: vec![3, 41],
        decoders: vec![DecoderId::Baseline],
        shots: 20,
        memory_budget_bytes: 10 << 20,
        ..SweepConfig::default()
    };
    let stop = AtomicBool::new(false);
    let mut orch = Orchestrator::new(config, MemorySink::new());
    let report = orch.run(&stop).unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.skipped, 1);
    let sink = orch.into_sink();
    assert_eq!(sink.rows().len(), 1);
    assert_eq!(sink.rows()[0].distance, 3);
}

fn resume_config() -> SweepConfig {
    SweepConfig {
        distances: vec![3, 5],
        error_rates: vec![0.01, 0.004],
        decoders: vec![DecoderId::Hybrid],
        shots: 200,
        workers: 2,
        seed: 8,
        ..SweepConfig::default()
    }
}

#[test]
fn interrupted_sweep_resumes_without_repeating_cells() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.csv");

    let stop = AtomicBool::new(false);
    let mut cells_started = 0;
    let mut orch = Orchestrator::new(resume_config(), ResultsTable::open(&path).unwrap());
    let first = orch
        .run_with(&stop, |g| {
            cells_started += 1;
            if cells_started == 3 {
                stop.store(true, Ordering::SeqCst);
            }
            RepetitionMemory::for_generator(g)
        })
        .unwrap();
    assert!(first.interrupted);
    assert_eq!(first.completed, 2);
    assert_eq!(first.exit_code(), EXIT_INTERRUPTED);
    drop(orch);
    assert_eq!(read_rows(&path).unwrap().len(), 2);

    let table = ResultsTable::open(&path).unwrap();
    assert_eq!(table.completed().len(), 2);
    let stop = AtomicBool::new(false);
    let mut orch = Orchestrator::new(resume_config(), table);
    let second = orch.run(&stop).unwrap();
    assert_eq!(second.resumed, 2);
    assert_eq!(second.completed, 2);
    assert_eq!(second.exit_code(), 0);

    let rows = read_rows(&path).unwrap();
    assert_eq!(rows.len(), 4);
    let keys: HashSet<_> = rows.iter().map(|r| r.key()).collect();
    assert_eq!(keys.len(), 4);

    let stop = AtomicBool::new(false);
    let mut orch = Orchestrator::new(resume_config(), ResultsTable::open(&path).unwrap());
    let third = orch.run(&stop).unwrap();
    assert_eq!(third.resumed, 4);
    assert_eq!(third.completed, 0);
    assert_eq!(read_rows(&path).unwrap().len(), 4);
}

#[test]
fn resumed_rows_match_a_clean_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clean.csv");
    let stop = AtomicBool::new(false);
    let mut orch = Orchestrator::new(resume_config(), ResultsTable::open(&path).unwrap());
    orch.run(&stop).unwrap();
    let clean = read_rows(&path).unwrap();

    let mut memory = Orchestrator::new(resume_config(), MemorySink::new());
    memory.run(&stop).unwrap();
    let rows = memory.sink().rows();
    assert_eq!(rows.len(), clean.len());
    for (a, b) in rows.iter().zip(&clean) {
        assert_eq!(a.key(), b.key());
        assert_eq!(a.errors, b.errors);
        assert_eq!(a.shots, b.shots);
        assert_eq!(a.fast_path_fraction, b.fast_path_fraction);
    }
}
