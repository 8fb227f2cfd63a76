//! Sampling harness and sweep driver for decoder stress benchmarks.
//!
//! Runs benchmark cells in parallel under a memory budget, reduces shot
//! outcomes into confidence-bounded statistics, and persists one row per
//! finished cell.

/// Test data generation for the `gen` subcommand.
pub mod generator;

/// Worker-count policy derived from per-worker peak memory.
pub mod memory;

/// Sweep planning, resume and per-cell execution.
pub mod orchestrator;

/// Parallel shot sampling with per-shot fault isolation.
pub mod pool;

/// Latency statistics and logical error rate aggregation.
///
/// Tracks latency distributions in integer nanoseconds and folds shot
/// outcomes into per-cell aggregates with Wilson score intervals.
pub mod stats;

/// Parallel replay of recorded syndromes.
pub mod throughput;
