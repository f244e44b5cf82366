//! Number distribution over worker accounts.
//!
//! Pure functions: given the items still to place and the workers
//! available this round, produce the per-worker assignment for the
//! configured policy. A worker absent from the returned map simply is
//! not used this round.

use rand::seq::SliceRandom;
use std::collections::HashMap;

use crate::types::DistributionPolicy;

/// Assign items to workers under the given policy.
///
/// - `all`: every worker receives the full list, order preserved.
/// - `equal`: workers truncated to `min(items, workers)`, items split
///   into contiguous chunks of `ceil(n / used)` in submission order;
///   workers whose chunk comes up empty are dropped.
/// - `random`: Fisher–Yates shuffle of the items, then the `equal` rule.
pub fn distribute(
    numbers: &[String],
    workers: &[String],
    policy: DistributionPolicy,
) -> HashMap<String, Vec<String>> {
    if numbers.is_empty() || workers.is_empty() {
        return HashMap::new();
    }

    match policy {
        DistributionPolicy::All => workers
            .iter()
            .map(|w| (w.clone(), numbers.to_vec()))
            .collect(),
        DistributionPolicy::Equal => chunk_evenly(numbers.to_vec(), workers),
        DistributionPolicy::Random => {
            let mut shuffled = numbers.to_vec();
            shuffled.shuffle(&mut rand::thread_rng());
            chunk_evenly(shuffled, workers)
        }
    }
}

/// Ceil-chunk `items` over at most `min(items, workers)` workers.
fn chunk_evenly(items: Vec<String>, workers: &[String]) -> HashMap<String, Vec<String>> {
    let used = workers.len().min(items.len());
    let per_worker = items.len().div_ceil(used);

    let mut assignment = HashMap::new();
    for (worker, chunk) in workers.iter().take(used).zip(items.chunks(per_worker)) {
        if !chunk.is_empty() {
            assignment.insert(worker.clone(), chunk.to_vec());
        }
    }
    assignment
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
