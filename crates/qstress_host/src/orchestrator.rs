//! Benchmark sweep orchestration.
//!
//! Expands a sweep configuration into cells (decoder, distance, error rate,
//! drift amplitude, burst probability), runs each cell through the sampling pool, and appends the finalized
//! aggregate to the results sink before moving to the next cell. Cells the
//! sink already holds are skipped, which is how an interrupted sweep
//! resumes. A cell that fails validation or does not fit the memory budget
//! is skipped and logged; the sweep carries on.

use crate::memory::{self, DEFAULT_BUDGET_MB};
use crate::pool::{self, PoolConfig};
use crate::stats::AggregateStat;
use anyhow::{Result, bail};
use qstress_core::QecError;
use qstress_core::adapter::DecoderConfig;
use qstress_core::noise::NoiseInstanceGenerator;
use qstress_core::simulator::{FaultSimulator, RepetitionMemory};
use qstress_core::task::{DecoderId, TaskDescriptor, default_rounds, noise_seed_for};
use qstress_io::table::{CellKey, RowSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Exit code of a sweep that was interrupted.
pub const EXIT_INTERRUPTED: u8 = 130;
/// Exit code of a sweep that skipped at least one cell.
pub const EXIT_SKIPPED: u8 = 2;

/// Everything one sweep needs.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub distances: Vec<usize>,
    pub error_rates: Vec<f64>,
    pub decoders: Vec<DecoderId>,
    pub shots: u64,
    pub workers: usize,
    /// Drift amplitudes to sweep.
    pub drift_amplitudes: Vec<f64>,
    /// Burst probabilities to sweep.
    pub burst_probabilities: Vec<f64>,
    /// Noisy rounds per shot; `3 * d` when unset.
    pub rounds: Option<usize>,
    pub max_errors: Option<u64>,
    /// Wall-clock budget per cell.
    pub time_budget: Option<Duration>,
    pub seed: u64,
    pub memory_budget_bytes: u64,
    pub confidence: f64,
    pub decoder: DecoderConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            distances: vec![3, 5, 7],
            error_rates: vec![0.003],
            decoders: DecoderId::ALL.to_vec(),
            shots: 10_000,
            workers: 4,
            drift_amplitudes: vec![0.3],
            burst_probabilities: vec![0.05],
            rounds: None,
            max_errors: None,
            time_budget: None,
            seed: 0,
            memory_budget_bytes: DEFAULT_BUDGET_MB << 20,
            confidence: 0.95,
            decoder: DecoderConfig::default(),
        }
    }
}

impl SweepConfig {
    /// Checks the sweep-wide settings. Per-cell problems are handled by
    /// skipping the cell instead.
    pub fn validate(&self) -> Result<()> {
        if self.distances.is_empty() || self.error_rates.is_empty() || self.decoders.is_empty() {
            bail!("sweep needs at least one distance, error rate and decoder");
        }
        if self.drift_amplitudes.is_empty() || self.burst_probabilities.is_empty() {
            bail!("sweep needs at least one drift amplitude and burst probability");
        }
        if self.shots == 0 {
            bail!("shot count must be positive");
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            bail!("confidence must lie in (0, 1), got {}", self.confidence);
        }
        Ok(())
    }

    fn rounds_for(&self, code_distance: usize) -> usize {
        self.rounds.unwrap_or_else(|| default_rounds(code_distance))
    }
}

/// Expands `config` into one task per cell.
///
/// Cells are ordered by decoder (as listed), then distance ascending, then
/// error rate, drift amplitude and burst probability (each as listed).
/// Duplicates are dropped. The seed of every cell
/// depends on its noise coordinates but not on the decoder, so all decoders
/// at a sweep point decode identical noise.
pub fn plan(config: &SweepConfig) -> Vec<TaskDescriptor> {
    let mut decoders = config.decoders.clone();
    dedup_in_order(&mut decoders);
    let mut distances = config.distances.clone();
    distances.sort_unstable();
    distances.dedup();
    let mut rates = config.error_rates.clone();
    dedup_in_order(&mut rates);
    let mut drifts = config.drift_amplitudes.clone();
    dedup_in_order(&mut drifts);
    let mut bursts = config.burst_probabilities.clone();
    dedup_in_order(&mut bursts);

    let points = rates.len() * drifts.len() * bursts.len();
    let mut cells = Vec::with_capacity(decoders.len() * distances.len() * points);
    for &decoder in &decoders {
        for &d in &distances {
            let rounds = config.rounds_for(d);
            for &p in &rates {
                for &drift in &drifts {
                    for &burst in &bursts {
                        let seed = noise_seed_for(config.seed, d, rounds, p, drift, burst);
                        cells.push(
                            TaskDescriptor::new(d, p, decoder)
                                .with_rounds(rounds)
                                .with_drift(drift)
                                .with_burst(burst)
                                .with_shots(config.shots)
                                .with_seed(seed),
                        );
                    }
                }
            }
        }
    }
    cells
}

fn label(task: &TaskDescriptor) -> String {
    format!(
        "{} d={} p={} drift={} burst={}",
        task.decoder_id,
        task.code_distance,
        task.base_error_rate,
        task.drift_amplitude,
        task.burst_probability
    )
}

fn dedup_in_order<T: PartialEq + Copy>(items: &mut Vec<T>) {
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for &item in items.iter() {
        if !kept.contains(&item) {
            kept.push(item);
        }
    }
    *items = kept;
}

/// Result of one cell.
#[derive(Debug)]
pub enum CellOutcome {
    Completed(AggregateStat),
    Skipped(String),
    Interrupted,
}

/// What a sweep did.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub completed: usize,
    /// Cells that failed validation or did not fit the memory budget.
    pub skipped: usize,
    /// Cells already present in the sink.
    pub resumed: usize,
    pub interrupted: bool,
    /// Aggregates of the cells completed by this run, in plan order.
    pub results: Vec<AggregateStat>,
}

impl SweepReport {
    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.skipped > 0 {
            EXIT_SKIPPED
        } else {
            0
        }
    }

    /// Prints an end-of-run summary table to stdout.
    pub fn print_summary(&self) {
        println!("\nSweep Summary");
        println!(
            "Completed: {}  Resumed: {}  Skipped: {}{}",
            self.completed,
            self.resumed,
            self.skipped,
            if self.interrupted { "  (interrupted)" } else { "" }
        );
        if self.results.is_empty() {
            return;
        }
        println!(
            "{:<11} {:>3} {:>8} {:>6} {:>6} {:>9} {:>7} {:>11} {:>23} {:>9} {:>10}",
            "decoder", "d", "p", "drift", "burst", "shots", "errors", "LER", "CI", "fast", "mean us"
        );
        for stat in &self.results {
            let row = stat.to_row();
            println!(
                "{:<11} {:>3} {:>8} {:>6} {:>6} {:>9} {:>7} {:>11.3e} [{:>9.3e}, {:>9.3e}] {:>8.1}% {:>10.2}",
                row.decoder.name(),
                row.distance,
                row.base_error_rate,
                row.drift,
                row.burst,
                row.shots,
                row.errors,
                row.logical_error_rate,
                row.ci_low,
                row.ci_high,
                row.fast_path_fraction * 100.0,
                row.mean_latency_us
            );
        }
    }
}

/// Drives a sweep into a results sink.
pub struct Orchestrator<K: RowSink> {
    config: SweepConfig,
    sink: K,
}

impl<K: RowSink> Orchestrator<K> {
    pub fn new(config: SweepConfig, sink: K) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Runs the sweep against the built-in repetition-code simulator.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<SweepReport> {
        self.run_with(stop, RepetitionMemory::for_generator)
    }

    /// Runs the sweep with a caller-supplied simulator per cell.
    ///
    /// # Arguments
    ///
    /// * `stop` - Raised to stop after the shots already in flight
    /// * `make_simulator` - Builds the simulator for one cell's noise; a
    ///   failure skips the cell
    ///
    /// # Returns
    ///
    /// The sweep report. Only failures to persist a row are returned as
    /// errors; every cell-level problem is recorded in the report.
    pub fn run_with<S, M>(&mut self, stop: &AtomicBool, mut make_simulator: M) -> Result<SweepReport>
    where
        S: FaultSimulator,
        M: FnMut(&NoiseInstanceGenerator) -> Result<S, QecError>,
    {
        self.config.validate()?;
        let cells = plan(&self.config);
        log::info!("sweep: {} cells planned", cells.len());
        let mut report = SweepReport::default();

        for task in cells {
            if stop.load(Ordering::Relaxed) {
                report.interrupted = true;
                break;
            }
            let key = CellKey::new(
                task.decoder_id,
                task.code_distance,
                task.rounds,
                task.base_error_rate,
                task.drift_amplitude,
                task.burst_probability,
            );
            if self.sink.is_completed(&key) {
                log::info!("{}: already recorded, skipping", label(&task));
                report.resumed += 1;
                continue;
            }

            match self.run_cell(&task, stop, &mut make_simulator) {
                CellOutcome::Completed(stat) => {
                    self.sink.append(&stat.to_row())?;
                    report.completed += 1;
                    report.results.push(stat);
                }
                CellOutcome::Skipped(reason) => {
                    log::error!("{}: skipped: {reason}", label(&task));
                    report.skipped += 1;
                }
                CellOutcome::Interrupted => {
                    log::warn!("{}: interrupted, cell not recorded", label(&task));
                    report.interrupted = true;
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Runs one cell to completion or interruption.
    pub fn run_cell<S, M>(
        &self,
        task: &TaskDescriptor,
        stop: &AtomicBool,
        make_simulator: &mut M,
    ) -> CellOutcome
    where
        S: FaultSimulator,
        M: FnMut(&NoiseInstanceGenerator) -> Result<S, QecError>,
    {
        let generator = match NoiseInstanceGenerator::new(task) {
            Ok(g) => g,
            Err(e) => return CellOutcome::Skipped(e.to_string()),
        };
        let workers = match memory::safe_worker_count(
            self.config.workers,
            task.code_distance,
            task.rounds,
            self.config.memory_budget_bytes,
        ) {
            Ok(w) => w,
            Err(e) => return CellOutcome::Skipped(e.to_string()),
        };
        if workers < self.config.workers {
            log::warn!(
                "d={}: memory budget allows {} of {} requested workers",
                task.code_distance,
                workers,
                self.config.workers
            );
        }

        log::info!(
            "{} rounds={}: {} shots on {} workers",
            label(task),
            task.rounds,
            task.shot_count,
            workers
        );
        let simulator = match make_simulator(&generator) {
            Ok(s) => s,
            Err(e) => return CellOutcome::Skipped(e.to_string()),
        };
        let pool_config = PoolConfig {
            workers,
            decoder: self.config.decoder,
            max_errors: self.config.max_errors,
            time_budget: self.config.time_budget,
            ..PoolConfig::default()
        };
        let mut stat = AggregateStat::new(
            task,
            self.config.decoder.fallback_policy,
            self.config.confidence,
        );
        let summary = match pool::run(task, &simulator, &pool_config, stop, |shot| stat.fold(&shot)) {
            Ok(summary) => summary,
            Err(e) => return CellOutcome::Skipped(format!("{e:#}")),
        };
        if summary.interrupted {
            return CellOutcome::Interrupted;
        }

        let ci = stat.finalize();
        log::info!(
            "{}: {}/{} errors, LER {:.3e} [{:.3e}, {:.3e}], fast path {:.1}%, {:.2} us mean in {:.2?}{}",
            label(task),
            stat.logical_errors_observed,
            stat.shots_observed,
            stat.logical_error_rate(),
            ci.lower,
            ci.upper,
            stat.fast_path_fraction() * 100.0,
            stat.latency.avg() / 1000.0,
            summary.elapsed,
            if summary.stopped_early { " (stopped early)" } else { "" }
        );
        CellOutcome::Completed(stat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qstress_io::table::MemorySink;

    fn small_config() -> SweepConfig {
        SweepConfig {
            distances: vec![5, 3, 5],
            error_rates: vec![0.01, 0.002],
            decoders: vec![DecoderId::Hybrid, DecoderId::Baseline],
            shots: 50,
            workers: 2,
            ..SweepConfig::default()
        }
    }

    #[test]
    fn plan_orders_decoder_then_distance_then_rate() {
        let cells = plan(&small_config());
        let coords: Vec<_> = cells
            .iter()
            .map(|t| (t.decoder_id, t.code_distance, t.base_error_rate))
            .collect();
        assert_eq!(
            coords,
            vec![
                (DecoderId::Hybrid, 3, 0.01),
                (DecoderId::Hybrid, 3, 0.002),
                (DecoderId::Hybrid, 5, 0.01),
                (DecoderId::Hybrid, 5, 0.002),
                (DecoderId::Baseline, 3, 0.01),
                (DecoderId::Baseline, 3, 0.002),
                (DecoderId::Baseline, 5, 0.01),
                (DecoderId::Baseline, 5, 0.002),
            ]
        );
        assert_eq!(cells[0].rounds, 9);
        assert!(cells.iter().all(|t| t.shot_count == 50));
    }

    #[test]
    fn drift_and_burst_lists_cross_every_point() {
        let config = SweepConfig {
            distances: vec![5],
            error_rates: vec![0.003],
            decoders: vec![DecoderId::Hybrid],
            drift_amplitudes: vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.1],
            burst_probabilities: vec![0.0, 0.05],
            ..SweepConfig::default()
        };
        let cells = plan(&config);
        let coords: Vec<_> = cells
            .iter()
            .map(|t| (t.drift_amplitude, t.burst_probability))
            .collect();
        assert_eq!(cells.len(), 10);
        assert_eq!(&coords[..4], &[(0.0, 0.0), (0.0, 0.05), (0.1, 0.0), (0.1, 0.05)]);
        assert_eq!(coords[9], (0.4, 0.05));
        let seeds: std::collections::HashSet<u64> = cells.iter().map(|t| t.seed).collect();
        assert_eq!(seeds.len(), 10);
    }

    #[test]
    fn empty_drift_list_is_rejected() {
        let config = SweepConfig {
            drift_amplitudes: Vec::new(),
            ..small_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn decoders_share_noise_seeds() {
        let cells = plan(&small_config());
        assert_eq!(cells[0].seed, cells[4].seed);
        assert_ne!(cells[0].seed, cells[1].seed);
    }

    #[test]
    fn invalid_sweep_is_rejected_up_front() {
        let stop = AtomicBool::new(false);
        let config = SweepConfig {
            confidence: 1.5,
            ..small_config()
        };
        let mut orch = Orchestrator::new(config, MemorySink::new());
        assert!(orch.run(&stop).is_err());
        assert!(orch.sink().rows().is_empty());
    }

    #[test]
    fn exit_codes_reflect_the_report() {
        let mut report = SweepReport::default();
        assert_eq!(report.exit_code(), 0);
        report.skipped = 1;
        assert_eq!(report.exit_code(), EXIT_SKIPPED);
        report.interrupted = true;
        assert_eq!(report.exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn invalid_cell_is_skipped_and_the_sweep_continues() {
        let config = SweepConfig {
            distances: vec![3],
            error_rates: vec![0.9, 0.01],
            decoders: vec![DecoderId::Baseline],
            drift_amplitudes: vec![0.5],
            burst_probabilities: vec![0.0],
            shots: 20,
            ..SweepConfig::default()
        };
        let stop = AtomicBool::new(false);
        let mut orch = Orchestrator::new(config, MemorySink::new());
        let report = orch.run(&stop).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.exit_code(), EXIT_SKIPPED);
        assert_eq!(orch.sink().rows().len(), 1);
        assert_eq!(orch.sink().rows()[0].base_error_rate, 0.01);
    }

    #[test]
    fn simulator_that_cannot_be_built_skips_the_cell() {
        let config = SweepConfig {
            distances: vec![3],
            error_rates: vec![0.01],
            decoders: vec![DecoderId::Baseline],
            shots: 20,
            ..SweepConfig::default()
        };
        let stop = AtomicBool::new(false);
        let mut orch = Orchestrator::new(config, MemorySink::new());
        let report = orch
            .run_with(&stop, |_| RepetitionMemory::new(1, &[0.01; 9]))
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert!(orch.sink().rows().is_empty());
    }

    #[test]
    fn time_budget_cell_is_recorded_over_observed_shots() {
        let config = SweepConfig {
            distances: vec![5],
            error_rates: vec![0.01],
            decoders: vec![DecoderId::Baseline],
            shots: 50_000_000,
            workers: 2,
            time_budget: Some(Duration::from_millis(50)),
            ..SweepConfig::default()
        };
        let stop = AtomicBool::new(false);
        let mut orch = Orchestrator::new(config, MemorySink::new());
        let report = orch.run(&stop).unwrap();
        assert_eq!(report.completed, 1);
        assert!(!report.interrupted);
        assert_eq!(report.exit_code(), 0);

        let stat = &report.results[0];
        assert!(stat.shots_observed > 0);
        assert!(stat.shots_observed < 50_000_000);
        let row = &orch.sink().rows()[0];
        assert_eq!(row.shots, stat.shots_observed);
        assert_eq!(row.errors, stat.logical_errors_observed);
    }

    #[test]
    fn stop_after_the_last_shot_keeps_the_cell() {
        let config = SweepConfig {
            distances: vec![3],
            error_rates: vec![0.01],
            decoders: vec![DecoderId::Baseline, DecoderId::UnionFind],
            shots: 50,
            workers: 1,
            ..SweepConfig::default()
        };
        let stop = AtomicBool::new(false);
        let mut orch = Orchestrator::new(config, MemorySink::new());
        let report = orch
            .run_with(&stop, |g| {
                Ok(LastShotStop {
                    inner: RepetitionMemory::for_generator(g)?,
                    last: g.task().shot_count - 1,
                    stop: &stop,
                })
            })
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.completed, 1);
        assert_eq!(report.results[0].shots_observed, 50);
        assert_eq!(orch.sink().rows().len(), 1);
    }

    /// Raises the stop flag while sampling the final shot of a cell.
    struct LastShotStop<'a> {
        inner: RepetitionMemory,
        last: u64,
        stop: &'a AtomicBool,
    }

    impl FaultSimulator for LastShotStop<'_> {
        fn detector_error_model(&self) -> &qstress_core::graph::DecodingGraph {
            self.inner.detector_error_model()
        }

        fn sample(
            &self,
            realization: &qstress_core::noise::NoiseRealization<'_>,
        ) -> qstress_core::simulator::SampledShot {
            if realization.shot_index == self.last {
                self.stop.store(true, Ordering::SeqCst);
            }
            self.inner.sample(realization)
        }
    }
}
