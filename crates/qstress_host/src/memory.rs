//! Memory-aware worker policy.
//!
//! Each worker holds its own decoder stack, and the blossom solver behind
//! the matching decoder keeps dual state for every vertex and edge of the
//! decoding graph. The graph grows with distance times rounds, so the
//! memory one worker needs rises steeply with code distance. The pool is
//! sized so that every worker's peak fits the configured budget at once.

use qstress_core::QecError;

/// Thread stack, channel slots and allocator slack of one worker.
const WORKER_BASE_BYTES: u64 = 8 * 1024 * 1024;
/// Clustering scratch and blossom vertex state per graph node.
const NODE_BYTES: u64 = 576;
/// Graph record, adjacency entries, correction bits and blossom edge
/// state per edge.
const EDGE_BYTES: u64 = 304;

pub const DEFAULT_BUDGET_MB: u64 = 4096;

/// Graph size of the built-in repetition-code model: (nodes, edges).
pub fn model_size(code_distance: usize, rounds: usize) -> (u64, u64) {
    let d = code_distance as u64;
    let r = rounds as u64;
    let nodes = (r + 1) * d.saturating_sub(1) + 1;
    let edges = r * (2 * d).saturating_sub(1);
    (nodes, edges)
}

/// Estimated peak bytes of one worker at distance `d` over `rounds` rounds.
///
/// Priced at the worst case of every detector firing, when the blossom
/// solver holds a primal node for each of them.
pub fn peak_memory_per_worker(code_distance: usize, rounds: usize) -> u64 {
    let (nodes, edges) = model_size(code_distance, rounds);
    WORKER_BASE_BYTES
        .saturating_add(nodes.saturating_mul(NODE_BYTES))
        .saturating_add(edges.saturating_mul(EDGE_BYTES))
}

/// Caps `requested` so every worker's peak fits in `budget_bytes`.
///
/// # Returns
///
/// The number of workers to run, at least one and at most `requested`, or
/// a configuration error when not even one worker fits the budget.
pub fn safe_worker_count(
    requested: usize,
    code_distance: usize,
    rounds: usize,
    budget_bytes: u64,
) -> Result<usize, QecError> {
    let per_worker = peak_memory_per_worker(code_distance, rounds);
    let fits = budget_bytes / per_worker;
    if fits == 0 {
        return Err(QecError::invalid_task(
            "code_distance",
            format!(
                "one worker needs about {} MiB at distance {code_distance}, budget is {} MiB",
                per_worker.div_ceil(1 << 20),
                budget_bytes >> 20
            ),
        ));
    }
    let fits = usize::try_from(fits).unwrap_or(usize::MAX);
    Ok(requested.max(1).min(fits))
}
