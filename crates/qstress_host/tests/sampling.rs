//! Sampling invariants that hold across the pool, the decoder stack and the
//! aggregator.

use qstress_core::QecError;
use qstress_core::adapter::{DecoderConfig, DecoderStack, FallbackPolicy, Path};
use qstress_core::noise::NoiseInstanceGenerator;
use qstress_core::simulator::{FaultSimulator, RepetitionMemory};
use qstress_core::task::{DecoderId, TaskDescriptor, shot_seed};
use qstress_host::pool::{self, PoolConfig, Shot, ShotStatus};
use qstress_host::stats::{AggregateStat, wilson_interval};
use std::sync::atomic::AtomicBool;

fn stress_task(decoder: DecoderId, shots: u64) -> TaskDescriptor {
    TaskDescriptor::new(5, 0.01, decoder)
        .with_drift(0.3)
        .with_burst(0.05)
        .with_shots(shots)
        .with_seed(2024)
}

fn collect(task: &TaskDescriptor, workers: usize) -> Vec<Shot> {
    let generator = NoiseInstanceGenerator::new(task).unwrap();
    let sim = RepetitionMemory::for_generator(&generator).unwrap();
    let config = PoolConfig {
        workers,
        ..PoolConfig::default()
    };
    let stop = AtomicBool::new(false);
    let mut shots = Vec::new();
    pool::run(task, &sim, &config, &stop, |shot| shots.push(shot)).unwrap();
    shots.sort_by_key(|s| s.shot_index);
    shots
}

type Fingerprint = (u64, Vec<usize>, bool, bool, Path, ShotStatus);

fn fingerprint(shots: &[Shot]) -> Vec<Fingerprint> {
    shots
        .iter()
        .map(|s| {
            (
                s.shot_index,
                s.syndrome.iter_ones().collect(),
                s.ground_truth_flip,
                s.predicted_flip,
                s.path,
                s.status.clone(),
            )
        })
        .collect()
}

#[test]
fn outcomes_do_not_depend_on_worker_count() {
    let task = stress_task(DecoderId::Hybrid, 1_200);
    let one = collect(&task, 1);
    let four = collect(&task, 4);
    let seven = collect(&task, 7);
    assert_eq!(one.len(), 1_200);
    assert_eq!(fingerprint(&one), fingerprint(&four));
    assert_eq!(fingerprint(&one), fingerprint(&seven));
}

#[test]
fn rerun_with_same_seed_is_identical() {
    let task = stress_task(DecoderId::UnionFind, 400);
    assert_eq!(fingerprint(&collect(&task, 3)), fingerprint(&collect(&task, 3)));
    let generator = NoiseInstanceGenerator::new(&task).unwrap();
    let sim = RepetitionMemory::for_generator(&generator).unwrap();
    for i in [0, 17, 399] {
        assert_eq!(
            generator.generate(&sim, i),
            generator.generate_seeded(&sim, i, shot_seed(task.seed, i))
        );
    }
    let other = task.with_seed(2025);
    assert_ne!(fingerprint(&collect(&task, 3)), fingerprint(&collect(&other, 3)));
}

#[test]
fn merge_order_does_not_change_counts() {
    let task = stress_task(DecoderId::Hybrid, 900);
    let shots = collect(&task, 4);
    let policy = FallbackPolicy::CountAsError;

    let mut whole = AggregateStat::new(&task, policy, 0.95);
    let mut parts: Vec<AggregateStat> = (0..3)
        .map(|_| AggregateStat::new(&task, policy, 0.95))
        .collect();
    for shot in &shots {
        whole.fold(shot);
        parts[(shot.shot_index % 3) as usize].fold(shot);
    }

    let mut left = parts[0].clone();
    left.merge(&parts[1]);
    left.merge(&parts[2]);
    let mut right = parts[2].clone();
    right.merge(&parts[0]);
    right.merge(&parts[1]);

    for merged in [&left, &right] {
        assert_eq!(merged.shots_observed, whole.shots_observed);
        assert_eq!(merged.logical_errors_observed, whole.logical_errors_observed);
        assert_eq!(merged.decode_failures, whole.decode_failures);
        assert_eq!(merged.fast_path_shots, whole.fast_path_shots);
        assert_eq!(merged.latency.count, whole.latency.count);
        assert_eq!(merged.latency.sum, whole.latency.sum);
        assert_eq!(merged.latency.min, whole.latency.min);
        assert_eq!(merged.latency.max, whole.latency.max);
    }
    assert_eq!(
        left.clone().finalize(),
        right.clone().finalize(),
        "interval depends only on the counts"
    );
}

#[test]
fn zero_error_interval_is_anchored_at_zero() {
    let ci = wilson_interval(0, 10_000, 0.95);
    assert_eq!(ci.lower, 0.0);
    assert!(ci.upper > 0.0 && ci.upper < 1e-3);
}

#[test]
fn zero_drift_keeps_every_round_at_the_base_rate() {
    let task = TaskDescriptor::new(7, 0.004, DecoderId::Baseline).with_seed(3);
    let generator = NoiseInstanceGenerator::new(&task).unwrap();
    assert_eq!(generator.schedule().len(), 21);
    assert!(generator.schedule().iter().all(|&p| p == 0.004));
}

#[test]
fn fallback_runs_only_after_the_fast_path_gives_up() {
    let task = stress_task(DecoderId::Hybrid, 3_000);
    let generator = NoiseInstanceGenerator::new(&task).unwrap();
    let sim = RepetitionMemory::for_generator(&generator).unwrap();
    let graph = sim.detector_error_model();
    let mut stack = DecoderStack::for_decoder(DecoderId::Hybrid, graph, DecoderConfig::default());

    let mut fallbacks = 0;
    for shot in 0..task.shot_count {
        let sampled = generator.generate(&sim, shot);
        let outcome = stack.decode(graph, &sampled.syndrome).unwrap();
        match outcome.path {
            Path::Fast => {
                assert!(outcome.fast_converged, "shot {shot} stayed fast without certifying");
                assert_eq!(outcome.fallback_latency, std::time::Duration::ZERO);
            }
            Path::Fallback => {
                assert!(!outcome.fast_converged, "shot {shot} escalated after certifying");
                fallbacks += 1;
            }
        }
    }
    assert!(fallbacks > 0);
}

#[test]
fn single_stage_decoders_never_escalate() {
    for decoder in [DecoderId::Baseline, DecoderId::UnionFind] {
        let shots = collect(&stress_task(decoder, 300), 2);
        assert!(shots.iter().all(|s| s.path == Path::Fast));
        assert!(shots.iter().all(|s| s.status == ShotStatus::Decoded));
    }
}

#[test]
fn invalid_noise_point_samples_nothing() {
    let task = TaskDescriptor::new(3, 0.9, DecoderId::Hybrid)
        .with_drift(1.0)
        .with_shots(100);
    let sim = RepetitionMemory::new(3, &[0.01; 9]).unwrap();
    let stop = AtomicBool::new(false);
    let mut delivered = 0;
    let err = pool::run(&task, &sim, &PoolConfig::default(), &stop, |_| delivered += 1).unwrap_err();
    assert_eq!(delivered, 0);
    assert!(err.downcast_ref::<QecError>().unwrap().is_configuration());
}

#[test]
fn matching_correction_is_never_heavier_than_clustering() {
    let task = stress_task(DecoderId::Baseline, 1_500).with_seed(5);
    let generator = NoiseInstanceGenerator::new(&task).unwrap();
    let sim = RepetitionMemory::for_generator(&generator).unwrap();
    let graph = sim.detector_error_model();
    let mut matching = DecoderStack::for_decoder(DecoderId::Baseline, graph, DecoderConfig::default());
    let mut clustering =
        DecoderStack::for_decoder(DecoderId::UnionFind, graph, DecoderConfig::default());
    let weight = |correction: &Option<bitvec::vec::BitVec<u64, bitvec::order::Lsb0>>| -> f64 {
        correction
            .as_ref()
            .unwrap()
            .iter_ones()
            .map(|e| graph.edges[e].weight)
            .sum()
    };

    let mut lighter = 0;
    for shot in 0..task.shot_count {
        let sampled = generator.generate(&sim, shot);
        let m = matching.decode(graph, &sampled.syndrome).unwrap();
        let c = clustering.decode(graph, &sampled.syndrome).unwrap();
        let (wm, wc) = (weight(&m.correction), weight(&c.correction));
        assert!(wm <= wc + 5e-2, "shot {shot}: matching {wm} vs clustering {wc}");
        if wm + 5e-2 < wc {
            lighter += 1;
        }
    }
    assert!(lighter > 0);
}
