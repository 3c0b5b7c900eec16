//! Ordered step history of one run.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::step::Step;


/// Whether primitives are still being answered from recorded history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStatus {
    /// The cursor has not yet passed the last recorded result
    Replay,
    /// Every recorded result has been visited
    New,
}

impl ReplayStatus {
    /// Returns true while answering from history.
    pub fn is_replay(&self) -> bool {
        *self == Self::Replay
    }

    /// Returns true once past the recorded history.
    pub fn is_new(&self) -> bool {
        *self == Self::New
    }
}

/// The step history delivered with a continuation request.
///
/// Result entries are indexed by `stepId`. When the queue delivers the same
/// result twice (at-least-once delivery), the first entry wins and later
/// copies are dropped while building the history.
#[derive(Debug)]
pub struct ExecutionHistory {
    steps: Vec<Step>,
    results: HashMap<u32, usize>,
    last_result_id: u32,
    /// Highest step id a primitive has reached in this invocation
    cursor: AtomicU32,
}

impl ExecutionHistory {
    /// Builds a history from the steps in delivery order.
    pub fn new(steps: Vec<Step>) -> Self {
        let mut kept: Vec<Step> = Vec::with_capacity(steps.len());
        let mut results = HashMap::new();
        let mut seen_plans: Vec<(u32, String)> = Vec::new();

        for step in steps {
            if step.is_plan() {
                let key = (step.target_step.unwrap_or_default(), step.step_name.clone());
                if seen_plans.contains(&key) {
                    continue;
                }
                seen_plans.push(key);
            } else if results.contains_key(&step.step_id) {
                tracing::debug!(
                    step_id = step.step_id,
                    step_name = %step.step_name,
                    "Dropping duplicate history entry"
                );
                continue;
            } else {
                results.insert(step.step_id, kept.len());
            }
            kept.push(step);
        }

        let last_result_id = results.keys().copied().max().unwrap_or(0);
        Self {
            steps: kept,
            results,
            last_result_id,
            cursor: AtomicU32::new(0),
        }
    }

    /// Creates an empty history.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Returns all entries in delivery order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if no step has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the most recently delivered entry.
    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Returns the result entry recorded for `step_id`.
    pub fn result(&self, step_id: u32) -> Option<&Step> {
        self.results.get(&step_id).map(|&idx| &self.steps[idx])
    }

    /// Returns the result entries whose `stepId` falls in `range`.
    pub fn results_in(&self, range: RangeInclusive<u32>) -> Vec<&Step> {
        range.filter_map(|id| self.result(id)).collect()
    }

    /// Returns the plan entries targeting a `stepId` in `range`.
    pub fn plans_in(&self, range: RangeInclusive<u32>) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.is_plan())
            .filter(|s| s.target_step.is_some_and(|t| range.contains(&t)))
            .collect()
    }

    /// Highest `stepId` with a recorded result.
    pub fn last_result_id(&self) -> u32 {
        self.last_result_id
    }

    /// Returns the current replay status.
    pub fn replay_status(&self) -> ReplayStatus {
        if self.cursor.load(Ordering::SeqCst) >= self.last_result_id {
            ReplayStatus::New
        } else {
            ReplayStatus::Replay
        }
    }

    /// Returns true while primitives are answered from history.
    pub fn is_replaying(&self) -> bool {
        self.replay_status().is_replay()
    }

    /// Records that the cursor reached `step_id`.
    ///
    /// Switches to [`ReplayStatus::New`] once every recorded result has
    /// been visited.
    pub fn track_replay(&self, step_id: u32) {
        self.cursor.fetch_max(step_id, Ordering::SeqCst);
    }

    /// Returns true if the last delivered entry repeats an earlier one.
    ///
    /// Two entries are the same when they share `stepId` and `targetStep`.
    /// Such a delivery is a queue re-delivery and must not run the workflow.
    pub fn is_last_duplicate(steps: &[Step]) -> bool {
        let Some((last, rest)) = steps.split_last() else {
            return false;
        };
        rest.iter()
            .any(|s| s.step_id == last.step_id && s.target_step == last.target_step)
    }
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::empty()
    }
}
