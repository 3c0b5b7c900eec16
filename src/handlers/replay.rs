//! Replay detection shared by every primitive.
//!
//! Step identity during replay is positional plus name-based: the Nth
//! primitive reached by the workflow function must match the history entry
//! with `stepId == N` in both name and type. Any mismatch means the
//! function is not deterministic and the run cannot continue.

use crate::error::WorkflowError;
use crate::state::ExecutionHistory;
use crate::step::{Step, StepType};

/// Outcome of looking up a sequential step in history.
#[derive(Debug)]
pub enum ReplayResult {
    /// The step resolved in an earlier invocation
    Replayed(Step),
    /// No entry yet: the step is the next action
    NotFound,
}

/// Looks up the sequential step at `step_id`.
///
/// # Returns
///
/// - `Ok(ReplayResult::Replayed(step))` - the recorded, successful entry
/// - `Ok(ReplayResult::NotFound)` - nothing recorded, execute normally
/// - `Err(WorkflowError::NonDeterministic)` - name, type or grouping mismatch
/// - `Err(WorkflowError::StepFailed)` - the step failed terminally
pub fn check_replay(
    history: &ExecutionHistory,
    step_id: u32,
    expected_name: &str,
    expected_type: StepType,
) -> Result<ReplayResult, WorkflowError> {
    let Some(recorded) = history.result(step_id) else {
        if !history.plans_in(step_id..=step_id).is_empty() {
            return Err(WorkflowError::non_deterministic(
                format!(
                    "Step '{}' runs sequentially but history planned step {} as part of a concurrency group",
                    expected_name, step_id
                ),
                Some(step_id),
            ));
        }
        return Ok(ReplayResult::NotFound);
    };

    validate_step(expected_name, expected_type, recorded)?;

    if recorded.concurrent != 1 {
        return Err(WorkflowError::non_deterministic(
            format!(
                "Step '{}' runs sequentially but was recorded in a group of {}",
                expected_name, recorded.concurrent
            ),
            Some(step_id),
        ));
    }

    if recorded.is_failed() {
        return Err(replayed_failure(recorded));
    }

    Ok(ReplayResult::Replayed(recorded.clone()))
}

/// Checks that a history entry matches the primitive reached at its position.
pub fn validate_step(
    expected_name: &str,
    expected_type: StepType,
    recorded: &Step,
) -> Result<(), WorkflowError> {
    if recorded.step_name != expected_name {
        return Err(WorkflowError::non_deterministic(
            format!(
                "Incompatible step name. Expected '{}', got '{}' from the request",
                expected_name, recorded.step_name
            ),
            Some(recorded.step_id),
        ));
    }
    if recorded.step_type() != expected_type {
        return Err(WorkflowError::non_deterministic(
            format!(
                "Incompatible step type for '{}'. Expected {}, got {} from the request",
                expected_name,
                expected_type,
                recorded.step_type()
            ),
            Some(recorded.step_id),
        ));
    }
    Ok(())
}

/// Error raised at the call site of a step that failed terminally.
pub(crate) fn replayed_failure(recorded: &Step) -> WorkflowError {
    let (error_type, message) = match &recorded.error {
        Some(failure) => (failure.error_type.clone(), failure.message.clone()),
        None => ("Error".to_string(), "step failed".to_string()),
    };
    WorkflowError::StepFailed {
        step_name: recorded.step_name.clone(),
        error_type,
        message,
    }
}
