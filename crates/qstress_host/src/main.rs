use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use qstress_core::adapter::{DecoderConfig, FallbackPolicy};
use qstress_core::task::DecoderId;
use qstress_host::generator::{self, GeneratorConfig};
use qstress_host::memory::DEFAULT_BUDGET_MB;
use qstress_host::orchestrator::{Orchestrator, SweepConfig};
use qstress_host::throughput;
use qstress_io::table::{ResultsTable, RowSink};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Decoder stress benchmark under drifting and bursty noise.
#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep decoders over distances, error rates, drift and bursts into a CSV table.
    Sweep(SweepArgs),
    /// Write a decoding graph and sampled shots to disk.
    Gen(GenArgs),
    /// Replay recorded shots through one decoder and report throughput.
    Replay(ReplayArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// Non-convergent shots count as logical errors.
    Error,
    /// Non-convergent shots are left out of the error rate.
    Exclude,
}

impl From<PolicyArg> for FallbackPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Error => FallbackPolicy::CountAsError,
            PolicyArg::Exclude => FallbackPolicy::Exclude,
        }
    }
}

#[derive(Args)]
struct DecoderArgs {
    /// Growth steps the fast path may take before escalating.
    #[arg(long, default_value_t = 2)]
    fast_max_growth: usize,
    /// Defects one fast-path cluster may hold before escalating.
    #[arg(long, default_value_t = 4)]
    fast_max_cluster_defects: u32,
    /// Fast-path wall-clock budget in microseconds.
    #[arg(long)]
    fast_timeout_us: Option<u64>,
    #[arg(long, value_enum, default_value = "error")]
    fallback_policy: PolicyArg,
}

impl DecoderArgs {
    fn config(&self) -> DecoderConfig {
        DecoderConfig {
            fast_max_growth: self.fast_max_growth,
            fast_max_cluster_defects: self.fast_max_cluster_defects,
            fast_timeout: self.fast_timeout_us.map(Duration::from_micros),
            fallback_policy: self.fallback_policy.into(),
        }
    }
}

#[derive(Args)]
struct SweepArgs {
    #[arg(short, long, num_args = 1.., value_delimiter = ',', default_values_t = [3usize, 5, 7])]
    distances: Vec<usize>,
    #[arg(short = 'p', long, num_args = 1.., value_delimiter = ',', default_values_t = [0.003f64])]
    error_rates: Vec<f64>,
    /// Shots per cell.
    #[arg(short, long, default_value_t = 10_000)]
    shots: u64,
    #[arg(short, long, default_value_t = 4)]
    workers: usize,
    /// Relative amplitudes of the sinusoidal drift over a shot's rounds.
    #[arg(long, num_args = 1.., value_delimiter = ',', default_values_t = [0.3f64])]
    drift: Vec<f64>,
    /// Per-round probabilities of a correlated readout burst.
    #[arg(long, num_args = 1.., value_delimiter = ',', default_values_t = [0.05f64])]
    burst: Vec<f64>,
    #[arg(long, num_args = 1.., value_delimiter = ',', default_values_t = DecoderId::ALL.to_vec())]
    decoders: Vec<DecoderId>,
    /// Noisy rounds per shot [default: 3 * distance].
    #[arg(long)]
    rounds: Option<usize>,
    /// Stop a cell early once this many logical errors are observed.
    #[arg(short = 'e', long)]
    max_errors: Option<u64>,
    /// Stop a cell early after this many seconds.
    #[arg(long)]
    time_budget_secs: Option<f64>,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(short, long, default_value = "stress_benchmark.csv")]
    output: PathBuf,
    #[arg(long, default_value_t = DEFAULT_BUDGET_MB)]
    memory_budget_mb: u64,
    #[arg(long, default_value_t = 0.95)]
    confidence: f64,
    #[command(flatten)]
    decoder: DecoderArgs,
}

#[derive(Args)]
struct GenArgs {
    #[arg(long, default_value = "stress.dem")]
    dem: PathBuf,
    #[arg(long, default_value = "stress.b8")]
    b8: PathBuf,
    #[arg(short, long, default_value_t = 5)]
    distance: usize,
    #[arg(long)]
    rounds: Option<usize>,
    #[arg(long, default_value_t = 100_000)]
    shots: u64,
    #[arg(short, long, default_value_t = 0.003)]
    p: f64,
    #[arg(long, default_value_t = 0.3)]
    drift: f64,
    #[arg(long, default_value_t = 0.05)]
    burst: f64,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args)]
struct ReplayArgs {
    #[arg(long)]
    dem: String,
    #[arg(long)]
    b8: String,
    /// Detector bits per shot, if the file carries more than the graph names.
    #[arg(long)]
    detectors: Option<usize>,
    #[arg(long, default_value = "hybrid")]
    decoder: DecoderId,
    /// Records hold detector bits only, without the observable bit.
    #[arg(long)]
    no_observable: bool,
    #[command(flatten)]
    tuning: DecoderArgs,
}

fn sweep(args: SweepArgs) -> Result<ExitCode> {
    let time_budget = args
        .time_budget_secs
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("Invalid --time-budget-secs")?;
    let config = SweepConfig {
        distances: args.distances,
        error_rates: args.error_rates,
        decoders: args.decoders,
        shots: args.shots,
        workers: args.workers,
        drift_amplitudes: args.drift,
        burst_probabilities: args.burst,
        rounds: args.rounds,
        max_errors: args.max_errors,
        time_budget,
        seed: args.seed,
        memory_budget_bytes: args.memory_budget_mb.saturating_mul(1 << 20),
        confidence: args.confidence,
        decoder: args.decoder.config(),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, finishing shots in flight");
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("Failed to install Ctrl+C handler: {e}"))?;

    let table = ResultsTable::open(&args.output)?;
    if !table.completed().is_empty() {
        log::info!(
            "resuming from {} ({} cells recorded)",
            table.path().display(),
            table.completed().len()
        );
    }
    let mut orchestrator = Orchestrator::new(config, table);
    let report = orchestrator.run(&stop)?;
    report.print_summary();
    println!("Results written to {}", args.output.display());
    Ok(ExitCode::from(report.exit_code()))
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sweep(args) => return sweep(args),
        Commands::Gen(args) => {
            let config = GeneratorConfig {
                distance: args.distance,
                rounds: args.rounds,
                shots: args.shots,
                base_error_rate: args.p,
                drift_amplitude: args.drift,
                burst_probability: args.burst,
                seed: args.seed,
            };
            let summary = generator::generate_stress_data(&args.dem, &args.b8, &config)?;
            println!(
                "Wrote {} detectors, {} mechanisms, {} shots ({} logical flips)",
                summary.detectors, summary.mechanisms, summary.shots, summary.logical_flips
            );
        }
        Commands::Replay(args) => {
            throughput::run_replay(
                &args.dem,
                &args.b8,
                args.detectors,
                !args.no_observable,
                args.decoder,
                args.tuning.config(),
            )?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
