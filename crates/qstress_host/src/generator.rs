//! Test data generator for decoder stress benchmarks.
//!
//! Samples the built-in repetition-code memory model under drift and burst
//! noise and writes the decoding graph (.dem) together with the sampled
//! syndromes (.b8, detectors followed by the logical observable bit), so
//! that the same shots can be replayed later or fed to external decoders.

use anyhow::{Context, Result};
use qstress_core::noise::NoiseInstanceGenerator;
use qstress_core::simulator::{FaultSimulator, RepetitionMemory};
use qstress_core::task::{DecoderId, TaskDescriptor, default_rounds};
use qstress_io::{loader, parser};
use std::path::Path;

/// Noise point and size of one generated data set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorConfig {
    pub distance: usize,
    pub rounds: Option<usize>,
    pub shots: u64,
    pub base_error_rate: f64,
    pub drift_amplitude: f64,
    pub burst_probability: f64,
    pub seed: u64,
}

/// What a generation run wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSummary {
    pub detectors: usize,
    pub mechanisms: usize,
    pub shots: u64,
    pub logical_flips: u64,
}

/// Generates stress-noise test data.
///
/// Builds the repetition-code decoding graph for the configured distance and
/// drift schedule, writes it as a .dem file, then samples `shots` shots and
/// writes their syndromes and true logical flips to a .b8 file. Shot `i` is
/// sampled from the same seed the sampling pool would use for index `i`.
///
/// # Arguments
///
/// * `dem_path` - Output path for the decoding graph (.dem file)
/// * `b8_path` - Output path for the syndrome data (.b8 file)
/// * `config` - Code distance, noise parameters, shot count and seed
///
/// # Returns
///
/// A summary of what was written, or an error if the configuration is
/// invalid or file I/O fails.
pub fn generate_stress_data(
    dem_path: &Path,
    b8_path: &Path,
    config: &GeneratorConfig,
) -> Result<GenerationSummary> {
    let rounds = config
        .rounds
        .unwrap_or_else(|| default_rounds(config.distance));
    let task = TaskDescriptor::new(config.distance, config.base_error_rate, DecoderId::Baseline)
        .with_rounds(rounds)
        .with_drift(config.drift_amplitude)
        .with_burst(config.burst_probability)
        .with_shots(config.shots)
        .with_seed(config.seed);
    let generator = NoiseInstanceGenerator::new(&task).context("Invalid generator settings")?;
    let simulator =
        RepetitionMemory::for_generator(&generator).context("Invalid generator settings")?;
    let graph = simulator.detector_error_model();

    println!(
        "Generating distance-{} repetition memory, {} rounds (p={}, drift={}, burst={})...",
        config.distance, rounds, config.base_error_rate, config.drift_amplitude, config.burst_probability
    );
    parser::save_dem_file(graph, dem_path)?;

    println!("Simulating {} shots...", config.shots);
    let mut writer = loader::create_b8_file(b8_path, graph.num_detectors, true)?;
    let mut logical_flips = 0;
    for shot in 0..config.shots {
        let sampled = generator.generate(&simulator, shot);
        logical_flips += u64::from(sampled.logical_flip);
        writer.write_shot(&sampled.syndrome, sampled.logical_flip)?;
    }
    writer.finish()?;

    println!("Done.");
    Ok(GenerationSummary {
        detectors: graph.num_detectors,
        mechanisms: graph.num_edges(),
        shots: config.shots,
        logical_flips,
    })
}
