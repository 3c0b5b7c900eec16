//! Timer steps. They have no body: the queue delays the continuation.

use async_trait::async_trait;

use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::step::{Step, StepKind, StepType};

use super::{LazyStep, Submission};

/// A `sleep` or `sleep_until` step.
pub(crate) struct SleepStep {
    name: String,
    kind: StepKind,
}

impl SleepStep {
    /// Sleeps for `seconds` relative to submission.
    pub(crate) fn for_seconds(name: impl Into<String>, seconds: u64) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::SleepFor { sleep_for: seconds },
        }
    }

    /// Sleeps until the unix timestamp `timestamp`.
    pub(crate) fn until(name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::SleepUntil {
                sleep_until: timestamp,
            },
        }
    }
}

#[async_trait]
impl LazyStep for SleepStep {
    fn step_name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        self.kind.step_type()
    }

    fn plan_kind(&self) -> StepKind {
        self.kind.clone()
    }

    async fn execute(
        &self,
        _ctx: &WorkflowContext,
        step_id: u32,
        concurrent: u32,
    ) -> Result<Submission, WorkflowError> {
        Ok(Submission::Continue(
            Step::new(step_id, &self.name, self.kind.clone()).with_concurrent(concurrent),
        ))
    }
}
