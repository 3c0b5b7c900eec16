//! Parallel coordination of concurrency groups.
//!
//! A group of N primitives started together occupies the step ids
//! `initial..=initial + N - 1`. Only one submission round happens per
//! invocation, so the group is resolved over several invocations:
//!
//! 1. `First`: nothing recorded. One plan entry per member is submitted in
//!    a single batch; the queue delivers each plan separately.
//! 2. `Partial`: the invocation was triggered by one member's plan. That
//!    member alone is executed and its result submitted.
//! 3. `Last`: every member has a result. The group resolves and replay
//!    continues past it.
//! 4. `Discard`: anything else, typically a result delivery while other
//!    members are still pending, or a re-delivery. The invocation is
//!    acknowledged without submitting.
//!
//! The state is inferred from history on every invocation and never cached.

use std::ops::RangeInclusive;

use crate::error::WorkflowError;
use crate::state::ExecutionHistory;

/// Resolution state of a concurrency group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelCallState {
    /// No member has any history entry yet
    First,
    /// The member whose result lands at the given step id must execute now
    Partial(u32),
    /// Nothing to do in this invocation
    Discard,
    /// Every member has a result
    Last,
}

/// Step ids occupied by a group of `concurrent` members starting at `initial`.
pub fn group_range(initial: u32, concurrent: u32) -> RangeInclusive<u32> {
    initial..=initial + concurrent.saturating_sub(1)
}

/// Infers the state of the group starting at `initial`.
///
/// # Arguments
///
/// * `history` - History delivered with the invocation
/// * `initial` - Step id of the group's first member
/// * `concurrent` - Number of members
///
/// # Returns
///
/// The group state, or `WorkflowError::NonDeterministic` when a history
/// entry inside the group's range was recorded for a group of another size.
pub fn infer_state(
    history: &ExecutionHistory,
    initial: u32,
    concurrent: u32,
) -> Result<ParallelCallState, WorkflowError> {
    let range = group_range(initial, concurrent);
    let plans = history.plans_in(range.clone());
    let results = history.results_in(range.clone());

    if let Some(mismatch) = plans
        .iter()
        .chain(results.iter())
        .find(|step| step.concurrent != concurrent)
    {
        return Err(WorkflowError::non_deterministic(
            format!(
                "Step '{}' was recorded in a group of {} but the workflow now runs a group of {}",
                mismatch.step_name, mismatch.concurrent, concurrent
            ),
            mismatch.target_step.or(Some(mismatch.step_id)),
        ));
    }

    if results.len() as u32 == concurrent {
        return Ok(ParallelCallState::Last);
    }
    if plans.is_empty() && results.is_empty() {
        return Ok(ParallelCallState::First);
    }

    let triggered_by_plan = history
        .last()
        .filter(|last| last.is_plan())
        .and_then(|last| last.target_step)
        .filter(|target| range.contains(target))
        .filter(|target| history.result(*target).is_none());

    Ok(match triggered_by_plan {
        Some(target) => ParallelCallState::Partial(target),
        None => ParallelCallState::Discard,
    })
}
