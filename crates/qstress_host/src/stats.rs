//! Latency and logical-error statistics.
//!
//! Provides the per-cell reduction of shot outcomes: running counts,
//! latency distributions, and the Wilson score interval on the logical
//! error rate. Every accumulator is integer-valued so that folding shots in
//! any order, or merging partial aggregates in any grouping, produces
//! identical results.

use crate::pool::{Shot, ShotStatus};
use qstress_core::adapter::{FallbackPolicy, Path};
use qstress_core::task::{DecoderId, TaskDescriptor};
use qstress_io::table::{CellKey, ResultRow};
use statrs::distribution::{ContinuousCDF, Normal};
use std::time::Duration;

const BUCKETS: usize = 20;
const BUCKET_WIDTH_NS: u64 = 10_000;

/// Tracks latency statistics with minimal overhead.
///
/// Accumulates latency measurements and computes summary statistics including
/// min, max, average, standard deviation and histogram distribution. Sums are
/// kept in integer nanoseconds (squares in `u128`) so merging two trackers is
/// exact and order-independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    pub min: u64,
    pub max: u64,
    pub sum: u64,
    pub sum_sq: u128,
    pub count: u64,
    pub buckets: [u64; BUCKETS],
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    /// Creates a new latency statistics tracker with empty state.
    ///
    /// Initializes all counters to zero and min to u64::MAX so the first
    /// measurement becomes the minimum.
    pub fn new() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            sum: 0,
            sum_sq: 0,
            count: 0,
            buckets: [0; BUCKETS],
        }
    }

    /// Records a latency measurement in nanoseconds.
    ///
    /// Updates min, max, sum, sum of squares and count, and increments the
    /// appropriate histogram bucket. Buckets are sized at 10 microsecond
    /// intervals; the last bucket collects everything above 190 us.
    ///
    /// # Arguments
    ///
    /// * `nanos` - Latency measurement in nanoseconds
    pub fn update(&mut self, nanos: u64) {
        self.min = self.min.min(nanos);
        self.max = self.max.max(nanos);
        self.sum = self.sum.saturating_add(nanos);
        self.sum_sq = self.sum_sq.saturating_add(u128::from(nanos) * u128::from(nanos));
        self.count += 1;

        let idx = (nanos / BUCKET_WIDTH_NS).min(BUCKETS as u64 - 1) as usize;
        self.buckets[idx] += 1;
    }

    pub fn record(&mut self, latency: Duration) {
        self.update(u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Folds another tracker into this one.
    pub fn merge(&mut self, other: &LatencyStats) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum = self.sum.saturating_add(other.sum);
        self.sum_sq = self.sum_sq.saturating_add(other.sum_sq);
        self.count += other.count;
        for (mine, theirs) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *mine += theirs;
        }
    }

    /// Computes the average latency from accumulated statistics.
    ///
    /// # Returns
    ///
    /// The average latency in nanoseconds, or 0.0 if no measurements recorded.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    /// Sample standard deviation in nanoseconds; 0.0 with fewer than two samples.
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.avg();
        let variance = (self.sum_sq as f64 - n * mean * mean) / (n - 1.0);
        variance.max(0.0).sqrt()
    }

    /// Prints a formatted report of latency statistics.
    ///
    /// Displays count, min, average, max and standard deviation, with
    /// automatic unit conversion (nanoseconds to microseconds) for
    /// readability, followed by the 10-microsecond histogram.
    pub fn print_report(&self, title: &str) {
        println!("\nLatency Metrics ({title})");
        println!("Count: {}", self.count);
        if self.count == 0 {
            return;
        }

        let avg_ns = self.avg();
        if avg_ns < 1000.0 {
            println!("Min:   {:.2} ns", self.min as f64);
            println!("Avg:   {:.2} ns", avg_ns);
            println!("Max:   {:.2} ns", self.max as f64);
            println!("Std:   {:.2} ns", self.stddev());
        } else {
            println!("Min:   {:.2} us", self.min as f64 / 1000.0);
            println!("Avg:   {:.2} us", avg_ns / 1000.0);
            println!("Max:   {:.2} us", self.max as f64 / 1000.0);
            println!("Std:   {:.2} us", self.stddev() / 1000.0);
        }

        println!("Distribution (10us buckets):");
        for (i, &count) in self.buckets.iter().enumerate() {
            if count > 0 {
                let range_end = if i == BUCKETS - 1 { ">" } else { "" };
                let lower = i * 10;
                let upper = (i + 1) * 10;
                println!("[{:3}-{:3}{} us]: {}", lower, upper, range_end, count);
            }
        }
    }
}

/// Two-sided confidence interval on a proportion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub confidence: f64,
}

/// Standard normal quantile for a two-sided `confidence` level.
pub fn z_score(confidence: f64) -> f64 {
    Normal::standard().inverse_cdf(0.5 + confidence / 2.0)
}

/// Wilson score interval for `errors` out of `shots`.
///
/// With zero shots the interval is the whole of [0, 1]. With zero errors
/// the lower bound is exactly 0, and with every shot an error the upper
/// bound is exactly 1.
///
/// # Arguments
///
/// * `errors` - Observed logical errors
/// * `shots` - Shots in the denominator
/// * `confidence` - Two-sided confidence level in (0, 1)
pub fn wilson_interval(errors: u64, shots: u64, confidence: f64) -> ConfidenceInterval {
    if shots == 0 {
        return ConfidenceInterval {
            lower: 0.0,
            upper: 1.0,
            confidence,
        };
    }
    let n = shots as f64;
    let p_hat = errors as f64 / n;
    let z = z_score(confidence);
    let z2 = z * z;

    let denom = 1.0 + z2 / n;
    let centre = (p_hat + z2 / (2.0 * n)) / denom;
    let half_width = z * (p_hat * (1.0 - p_hat) / n + z2 / (4.0 * n * n)).sqrt() / denom;

    let lower = if errors == 0 {
        0.0
    } else {
        (centre - half_width).clamp(0.0, p_hat)
    };
    let upper = if errors >= shots {
        1.0
    } else {
        (centre + half_width).clamp(p_hat, 1.0)
    };
    ConfidenceInterval {
        lower,
        upper,
        confidence,
    }
}

/// Running reduction of one cell's shots.
///
/// Counts only ever increase. `finalize` computes the confidence interval
/// from the counts at that moment and can be called again after more shots
/// are folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStat {
    pub decoder: DecoderId,
    pub code_distance: usize,
    pub rounds: usize,
    pub base_error_rate: f64,
    pub drift_amplitude: f64,
    pub burst_probability: f64,
    pub policy: FallbackPolicy,
    pub confidence: f64,

    /// Shots in the error-rate denominator.
    pub shots_observed: u64,
    /// Shots with `matched == false`, decode failures included.
    pub logical_errors_observed: u64,
    /// Non-convergent or faulted shots scored as logical errors.
    pub decode_failures: u64,
    /// Non-convergent shots left out under `FallbackPolicy::Exclude`.
    pub excluded_shots: u64,
    pub fast_path_shots: u64,

    /// End-to-end decode latency of every decoded shot.
    pub latency: LatencyStats,
    /// Fast-path share of the latency, every decoded shot.
    pub fast_latency: LatencyStats,
    /// Fallback share of the latency, shots that escalated only.
    pub fallback_latency: LatencyStats,

    interval: Option<ConfidenceInterval>,
}

impl AggregateStat {
    pub fn new(task: &TaskDescriptor, policy: FallbackPolicy, confidence: f64) -> Self {
        Self {
            decoder: task.decoder_id,
            code_distance: task.code_distance,
            rounds: task.rounds,
            base_error_rate: task.base_error_rate,
            drift_amplitude: task.drift_amplitude,
            burst_probability: task.burst_probability,
            policy,
            confidence,
            shots_observed: 0,
            logical_errors_observed: 0,
            decode_failures: 0,
            excluded_shots: 0,
            fast_path_shots: 0,
            latency: LatencyStats::new(),
            fast_latency: LatencyStats::new(),
            fallback_latency: LatencyStats::new(),
            interval: None,
        }
    }

    pub fn key(&self) -> CellKey {
        CellKey::new(
            self.decoder,
            self.code_distance,
            self.rounds,
            self.base_error_rate,
            self.drift_amplitude,
            self.burst_probability,
        )
    }

    /// Folds one shot into the running counts.
    pub fn fold(&mut self, shot: &Shot) {
        let excluded =
            shot.status == ShotStatus::NonConvergent && self.policy == FallbackPolicy::Exclude;
        if excluded {
            self.excluded_shots += 1;
        } else {
            self.shots_observed += 1;
            if !shot.matched {
                self.logical_errors_observed += 1;
            }
            if shot.status != ShotStatus::Decoded {
                self.decode_failures += 1;
            }
        }

        if let ShotStatus::Fault(_) = shot.status {
            return;
        }
        if shot.path == Path::Fast {
            self.fast_path_shots += 1;
        }
        self.latency.record(shot.decode_latency());
        self.fast_latency.record(shot.fast_latency);
        if shot.path == Path::Fallback {
            self.fallback_latency.record(shot.fallback_latency);
        }
    }

    /// Folds another partial aggregate of the same cell into this one.
    pub fn merge(&mut self, other: &AggregateStat) {
        debug_assert_eq!(self.key(), other.key(), "merging aggregates of different cells");
        self.shots_observed += other.shots_observed;
        self.logical_errors_observed += other.logical_errors_observed;
        self.decode_failures += other.decode_failures;
        self.excluded_shots += other.excluded_shots;
        self.fast_path_shots += other.fast_path_shots;
        self.latency.merge(&other.latency);
        self.fast_latency.merge(&other.fast_latency);
        self.fallback_latency.merge(&other.fallback_latency);
        self.interval = None;
    }

    /// Computes the confidence interval from the current counts.
    pub fn finalize(&mut self) -> ConfidenceInterval {
        let ci = wilson_interval(
            self.logical_errors_observed,
            self.shots_observed,
            self.confidence,
        );
        self.interval = Some(ci);
        ci
    }

    /// The interval computed by the last `finalize`, if any.
    pub fn interval(&self) -> Option<ConfidenceInterval> {
        self.interval
    }

    pub fn logical_error_rate(&self) -> f64 {
        if self.shots_observed == 0 {
            0.0
        } else {
            self.logical_errors_observed as f64 / self.shots_observed as f64
        }
    }

    /// Share of decoded shots that finished on the fast path.
    pub fn fast_path_fraction(&self) -> f64 {
        let decoded = self.shots_observed + self.excluded_shots;
        if decoded == 0 {
            0.0
        } else {
            self.fast_path_shots as f64 / decoded as f64
        }
    }

    /// Row for the persisted results table.
    pub fn to_row(&self) -> ResultRow {
        let ci = self.interval.unwrap_or_else(|| {
            wilson_interval(
                self.logical_errors_observed,
                self.shots_observed,
                self.confidence,
            )
        });
        ResultRow {
            decoder: self.decoder,
            distance: self.code_distance,
            shots: self.shots_observed,
            errors: self.logical_errors_observed,
            logical_error_rate: self.logical_error_rate(),
            ci_low: ci.lower,
            ci_high: ci.upper,
            mean_latency_us: self.latency.avg() / 1000.0,
            fast_path_fraction: self.fast_path_fraction(),
            latency_stddev_us: self.latency.stddev() / 1000.0,
            base_error_rate: self.base_error_rate,
            drift: self.drift_amplitude,
            burst: self.burst_probability,
            rounds: self.rounds,
        }
    }
}
