use std::num::NonZeroU64;

use crate::config::IntervalConfig;

/// Periodic actions that fire after a completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triggers {
    pub log: bool,
    pub save: bool,
    pub eval: bool,
}

/// Decides which periodic actions fire after step `global_iteration`.
///
/// Pure function: no state, same inputs always give the same answer.
/// Iteration 0 never triggers anything; intervals count completed steps.
pub fn decide(global_iteration: u64, intervals: &IntervalConfig) -> Triggers {
    Triggers {
        log: hits(global_iteration, intervals.log),
        save: hits(global_iteration, intervals.save),
        eval: hits(global_iteration, intervals.eval),
    }
}

#[inline]
fn hits(iteration: u64, interval: Option<NonZeroU64>) -> bool {
    match interval {
        Some(k) => iteration != 0 && iteration % k.get() == 0,
        None => false,
    }
}
