//! Parallel shot sampling.
//!
//! A task's shot indices are split into contiguous, disjoint ranges, one per
//! worker. Each worker owns a decoder stack for its whole range and sends
//! every finished shot over a bounded channel to the caller, which folds it
//! into its aggregate on the calling thread. Because every shot's noise is
//! a pure function of the task seed and the shot index, the multiset of
//! outcomes does not depend on the number of workers.

use anyhow::{Context, Result};
use bitvec::prelude::*;
use qstress_core::QecError;
use qstress_core::adapter::{DecoderConfig, DecoderStack, FallbackPolicy, Path};
use qstress_core::noise::NoiseInstanceGenerator;
use qstress_core::simulator::FaultSimulator;
use qstress_core::task::TaskDescriptor;
use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::time::{Duration, Instant};

/// How a shot's decode ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShotStatus {
    /// The final decoding stage certified its correction.
    Decoded,
    /// The final decoding stage did not converge.
    NonConvergent,
    /// Sampling or decoding raised an error or panicked.
    Fault(String),
}

/// Outcome of one trial.
#[derive(Debug, Clone)]
pub struct Shot {
    pub task_id: u64,
    pub shot_index: u64,
    pub syndrome: BitVec<u64, Lsb0>,
    pub ground_truth_flip: bool,
    /// Edge correction, `None` unless `status` is `Decoded`.
    pub correction: Option<BitVec<u64, Lsb0>>,
    pub predicted_flip: bool,
    /// True when the correction restores the logical state.
    pub matched: bool,
    pub status: ShotStatus,
    pub path: Path,
    pub fast_latency: Duration,
    pub fallback_latency: Duration,
}

impl Shot {
    pub fn decode_latency(&self) -> Duration {
        self.fast_latency + self.fallback_latency
    }

    /// Whether the shot counts toward the logical error tally under `policy`.
    pub fn counts_as_error(&self, policy: FallbackPolicy) -> bool {
        match self.status {
            ShotStatus::NonConvergent => policy == FallbackPolicy::CountAsError,
            _ => !self.matched,
        }
    }

    fn fault(task_id: u64, shot_index: u64, reason: String) -> Self {
        Self {
            task_id,
            shot_index,
            syndrome: BitVec::new(),
            ground_truth_flip: false,
            correction: None,
            predicted_flip: false,
            matched: false,
            status: ShotStatus::Fault(reason),
            path: Path::Fast,
            fast_latency: Duration::ZERO,
            fallback_latency: Duration::ZERO,
        }
    }
}

/// Runtime knobs of one pool run.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Worker threads; already capped by the memory policy.
    pub workers: usize,
    pub decoder: DecoderConfig,
    /// Stop dispatching once this many logical errors have been seen.
    pub max_errors: Option<u64>,
    /// Stop dispatching once this much wall-clock time has passed.
    pub time_budget: Option<Duration>,
    /// Shots that may wait in the channel before workers block.
    pub channel_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            decoder: DecoderConfig::default(),
            max_errors: None,
            time_budget: None,
            channel_capacity: 1024,
        }
    }
}

/// What happened during one pool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub requested: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub faults: u64,
    pub workers: usize,
    /// Dispatch ended before the shot budget was exhausted.
    pub stopped_early: bool,
    /// The external stop flag cut dispatch short. A flag raised after the
    /// last shot was dispatched leaves a complete run.
    pub interrupted: bool,
    pub elapsed: Duration,
}

/// Splits `0..shot_count` into at most `workers` contiguous, disjoint ranges.
///
/// The first `shot_count % workers` ranges hold one extra shot. Empty ranges
/// are omitted.
pub fn partition(shot_count: u64, workers: usize) -> Vec<Range<u64>> {
    let workers = workers.max(1) as u64;
    let base = shot_count / workers;
    let extra = shot_count % workers;
    let mut ranges = Vec::with_capacity(workers as usize);
    let mut start = 0;
    for w in 0..workers {
        let len = base + u64::from(w < extra);
        if len > 0 {
            ranges.push(start..start + len);
        }
        start += len;
    }
    ranges
}

struct WorkerContext<'a, S: ?Sized> {
    task: &'a TaskDescriptor,
    task_id: u64,
    simulator: &'a S,
    generator: &'a NoiseInstanceGenerator,
    config: &'a PoolConfig,
    stop: &'a AtomicBool,
    halt: &'a AtomicBool,
    deadline: Option<Instant>,
    dispatched: &'a AtomicU64,
    errors: &'a AtomicU64,
    faults: &'a AtomicU64,
}

impl<S: FaultSimulator + ?Sized> WorkerContext<'_, S> {
    fn should_stop(&self) -> bool {
        if self.stop.load(Ordering::Relaxed) || self.halt.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.halt.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    fn new_stack(&self) -> DecoderStack {
        DecoderStack::for_decoder(
            self.task.decoder_id,
            self.simulator.detector_error_model(),
            self.config.decoder,
        )
    }

    fn process(&self, stack: &mut DecoderStack, shot_index: u64) -> Result<Shot, QecError> {
        let graph = self.simulator.detector_error_model();
        let sampled = self.generator.generate(self.simulator, shot_index);
        let outcome = stack.decode(graph, &sampled.syndrome)?;
        let status = if outcome.converged {
            ShotStatus::Decoded
        } else {
            ShotStatus::NonConvergent
        };
        Ok(Shot {
            task_id: self.task_id,
            shot_index,
            matched: outcome.converged && outcome.predicted_flip == sampled.logical_flip,
            syndrome: sampled.syndrome,
            ground_truth_flip: sampled.logical_flip,
            correction: outcome.correction,
            predicted_flip: outcome.predicted_flip,
            status,
            path: outcome.path,
            fast_latency: outcome.fast_latency,
            fallback_latency: outcome.fallback_latency,
        })
    }

    /// Runs one worker's range, isolating every shot from its neighbours.
    fn work(&self, range: Range<u64>, tx: SyncSender<Shot>) {
        let mut stack = self.new_stack();
        for shot_index in range {
            if self.should_stop() {
                break;
            }
            self.dispatched.fetch_add(1, Ordering::Relaxed);

            let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(&mut stack, shot_index)));
            let shot = match result {
                Ok(Ok(shot)) => shot,
                Ok(Err(e)) => {
                    log::warn!("shot {shot_index}: decode failed: {e}");
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    stack = self.new_stack();
                    Shot::fault(self.task_id, shot_index, e.to_string())
                }
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    log::warn!("shot {shot_index}: worker panicked: {reason}");
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    stack = self.new_stack();
                    Shot::fault(self.task_id, shot_index, reason)
                }
            };

            if shot.counts_as_error(self.config.decoder.fallback_policy) {
                let seen = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
                if self.config.max_errors.is_some_and(|max| seen >= max) {
                    self.halt.store(true, Ordering::Relaxed);
                }
            }
            if tx.send(shot).is_err() {
                break;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Samples and decodes every shot of `task`, streaming each to `on_shot`.
///
/// The task is validated before anything is dispatched; a configuration
/// error returns `Err` with a `QecError::InvalidTask` inside and no shot is
/// sampled. Dispatch stops early when `stop` is raised, when the time budget
/// runs out, or when `max_errors` logical errors have been seen; shots
/// already in flight still complete and are delivered.
///
/// # Arguments
///
/// * `task` - The sweep point to sample
/// * `simulator` - Syndrome source, shared read-only by all workers
/// * `config` - Worker count, decoder tuning and stop conditions
/// * `stop` - External stop flag, polled before every shot
/// * `on_shot` - Called on the calling thread once per completed shot
///
/// # Returns
///
/// A summary of how many shots were dispatched and completed and why the
/// run ended.
pub fn run<S, F>(
    task: &TaskDescriptor,
    simulator: &S,
    config: &PoolConfig,
    stop: &AtomicBool,
    mut on_shot: F,
) -> Result<RunSummary>
where
    S: FaultSimulator + ?Sized,
    F: FnMut(Shot),
{
    task.validate()?;
    let generator = NoiseInstanceGenerator::new(task)?;
    let started = Instant::now();

    let ranges = partition(task.shot_count, config.workers);
    let workers = ranges.len();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("qstress-worker-{i}"))
        .build()
        .context("Failed to build sampling thread pool")?;
    log::debug!(
        "task {:016x}: {} shots over {} workers",
        task.id(),
        task.shot_count,
        workers
    );

    let halt = AtomicBool::new(false);
    let dispatched = AtomicU64::new(0);
    let errors = AtomicU64::new(0);
    let faults = AtomicU64::new(0);
    let ctx = WorkerContext {
        task,
        task_id: task.id(),
        simulator,
        generator: &generator,
        config,
        stop,
        halt: &halt,
        deadline: config.time_budget.map(|budget| started + budget),
        dispatched: &dispatched,
        errors: &errors,
        faults: &faults,
    };

    let (tx, rx) = mpsc::sync_channel::<Shot>(config.channel_capacity.max(1));
    let mut completed = 0u64;
    pool.in_place_scope(|scope| {
        for range in ranges {
            let tx = tx.clone();
            let ctx = &ctx;
            scope.spawn(move |_| ctx.work(range, tx));
        }
        drop(tx);
        for shot in rx {
            completed += 1;
            on_shot(shot);
        }
    });

    let dispatched = dispatched.load(Ordering::Relaxed);
    let stopped_early = dispatched < task.shot_count;
    Ok(RunSummary {
        requested: task.shot_count,
        dispatched,
        completed,
        faults: faults.load(Ordering::Relaxed),
        workers,
        stopped_early,
        interrupted: stopped_early && stop.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    })
}
