//! Replay of recorded syndromes through a decoder stack.

use crate::stats::LatencyStats;
use anyhow::{Result, bail};
use qstress_core::adapter::{DecoderConfig, DecoderStack, Path};
use qstress_core::task::DecoderId;
use qstress_io::loader::SyndromeRecord;
use qstress_io::{loader, parser};
use rayon::prelude::*;
use std::time::Instant;

/// Counts gathered while replaying a shot file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayTally {
    pub shots: u64,
    pub converged: u64,
    pub fast_path: u64,
    pub faults: u64,
    /// Shots whose predicted flip disagrees with the recorded observable.
    pub logical_errors: u64,
    pub latency: LatencyStats,
    pub fast_latency: LatencyStats,
    pub fallback_latency: LatencyStats,
}

impl ReplayTally {
    fn merge(mut self, other: ReplayTally) -> ReplayTally {
        self.shots += other.shots;
        self.converged += other.converged;
        self.fast_path += other.fast_path;
        self.faults += other.faults;
        self.logical_errors += other.logical_errors;
        self.latency.merge(&other.latency);
        self.fast_latency.merge(&other.fast_latency);
        self.fallback_latency.merge(&other.fallback_latency);
        self
    }
}

/// Decodes every record in parallel, one decoder stack per rayon thread.
pub fn replay_records(
    graph: &qstress_core::graph::DecodingGraph,
    records: &[SyndromeRecord],
    decoder: DecoderId,
    config: DecoderConfig,
) -> ReplayTally {
    records
        .par_iter()
        .map_init(
            || DecoderStack::for_decoder(decoder, graph, config),
            |stack, record| {
                let mut tally = ReplayTally {
                    shots: 1,
                    ..ReplayTally::default()
                };
                match stack.decode(graph, &record.syndrome) {
                    Ok(outcome) => {
                        tally.latency.record(outcome.latency());
                        tally.fast_latency.record(outcome.fast_latency);
                        if outcome.path == Path::Fast {
                            tally.fast_path = 1;
                        } else {
                            tally.fallback_latency.record(outcome.fallback_latency);
                        }
                        if outcome.converged {
                            tally.converged = 1;
                        }
                        let wrong = match record.observable {
                            Some(truth) => !outcome.converged || outcome.predicted_flip != truth,
                            None => false,
                        };
                        tally.logical_errors = u64::from(wrong);
                    }
                    Err(e) => {
                        log::warn!("replay: decode failed: {e}");
                        tally.faults = 1;
                        tally.logical_errors = u64::from(record.observable.is_some());
                    }
                }
                tally
            },
        )
        .reduce(ReplayTally::default, ReplayTally::merge)
}

/// Loads a .dem and .b8 pair and reports decoding throughput.
///
/// # Arguments
///
/// * `dem_path` - Decoding graph
/// * `b8_path` - Recorded shots
/// * `detectors` - Detector bits per shot, if different from the graph's count
/// * `with_observable` - Whether each record ends with the observable bit
/// * `decoder` - Decoder stack to replay through
/// * `config` - Fast-path tuning
pub fn run_replay(
    dem_path: &str,
    b8_path: &str,
    detectors: Option<usize>,
    with_observable: bool,
    decoder: DecoderId,
    config: DecoderConfig,
) -> Result<ReplayTally> {
    println!("Loading Graph from {}...", dem_path);
    let start_load = Instant::now();
    let mut graph = parser::load_dem_file(dem_path)?;
    println!(
        "Graph loaded in {:?}. Nodes: {}, Edges: {}",
        start_load.elapsed(),
        graph.num_nodes(),
        graph.num_edges()
    );

    let num_detectors = detectors.unwrap_or(graph.num_detectors);
    if num_detectors < graph.num_detectors {
        bail!(
            "shots carry {} detectors but the graph has {}",
            num_detectors,
            graph.num_detectors
        );
    }
    if num_detectors > graph.num_detectors {
        graph.ensure_detectors(num_detectors);
        graph.build_adjacency();
    }

    println!("Loading Shots from {}...", b8_path);
    let raw_bits = loader::load_b8_file(b8_path)?;
    let records = loader::slice_shots(&raw_bits, num_detectors, with_observable)?;
    println!("Loaded {} shots.", records.len());

    println!("Starting Replay ({decoder}, parallel)...");
    let start_bench = Instant::now();
    let tally = replay_records(&graph, &records, decoder, config);
    let seconds = start_bench.elapsed().as_secs_f64();
    let throughput = tally.shots as f64 / seconds.max(f64::MIN_POSITIVE);

    println!("Results");
    println!("Time: {:.4} s", seconds);
    println!("Throughput: {:.2} shots/s", throughput);
    println!("Converged: {}/{}", tally.converged, tally.shots);
    if tally.shots > 0 {
        println!(
            "Fast path: {:.2}%",
            100.0 * tally.fast_path as f64 / tally.shots as f64
        );
    }
    if tally.faults > 0 {
        println!("Faults: {}", tally.faults);
    }
    if with_observable {
        println!("Logical errors: {}/{}", tally.logical_errors, tally.shots);
    }
    tally.latency.print_report("Service Time");
    if tally.fallback_latency.count > 0 {
        tally.fast_latency.print_report("Fast Path");
        tally.fallback_latency.print_report("Fallback");
    }

    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qstress_core::noise::NoiseInstanceGenerator;
    use qstress_core::simulator::{FaultSimulator, RepetitionMemory};
    use qstress_core::task::TaskDescriptor;

    #[test]
    fn replay_agrees_with_direct_sampling() {
        let task = TaskDescriptor::new(5, 0.01, DecoderId::Hybrid)
            .with_burst(0.05)
            .with_seed(21);
        let generator = NoiseInstanceGenerator::new(&task).unwrap();
        let sim = RepetitionMemory::for_generator(&generator).unwrap();
        let records: Vec<SyndromeRecord> = (0..300)
            .map(|i| {
                let shot = generator.generate(&sim, i);
                SyndromeRecord {
                    syndrome: shot.syndrome,
                    observable: Some(shot.logical_flip),
                }
            })
            .collect();

        let graph = sim.detector_error_model();
        let tally = replay_records(graph, &records, DecoderId::Hybrid, DecoderConfig::default());
        assert_eq!(tally.shots, 300);
        assert_eq!(tally.faults, 0);
        assert_eq!(tally.converged, 300);
        assert_eq!(tally.latency.count, 300);
        assert!(tally.fast_path <= 300);
        assert!(tally.logical_errors < 30);
    }

    #[test]
    fn too_few_detectors_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dem = dir.path().join("g.dem");
        let b8 = dir.path().join("g.b8");
        std::fs::write(&dem, "error(0.1) D0 D1\nerror(0.1) D1\n").unwrap();
        std::fs::write(&b8, [0u8; 4]).unwrap();
        let result = run_replay(
            dem.to_str().unwrap(),
            b8.to_str().unwrap(),
            Some(1),
            false,
            DecoderId::Baseline,
            DecoderConfig::default(),
        );
        assert!(result.is_err());
    }
}
