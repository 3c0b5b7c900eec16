//! `run` steps: arbitrary user work executed inline.
//!
//! The body runs only when the step is the next action of the run. Its
//! output is serialized to JSON right away, so a value that cannot be
//! serialized fails the step before anything is submitted.

use std::future::Future;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;

use crate::context::WorkflowContext;
use crate::error::{BoxError, WorkflowError};
use crate::step::{Step, StepKind, StepType};

use super::{LazyStep, Submission};

type RunBody<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<String, WorkflowError>> + Send + 'a>;

/// A `run` step holding its not-yet-executed body.
pub(crate) struct RunStep<'a> {
    name: String,
    body: Mutex<Option<RunBody<'a>>>,
}

impl<'a> RunStep<'a> {
    pub(crate) fn new<F, Fut, T>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'a,
        T: Serialize + Send + 'a,
    {
        let body: RunBody<'a> = Box::new(move || {
            async move {
                let value = f().await.map_err(WorkflowError::from_box)?;
                Ok(serde_json::to_string(&value)?)
            }
            .boxed()
        });
        Self {
            name: name.into(),
            body: Mutex::new(Some(body)),
        }
    }

    fn take_body(&self) -> Result<RunBody<'a>, WorkflowError> {
        self.body
            .lock()
            .map_err(|_| WorkflowError::internal("run step lock poisoned"))?
            .take()
            .ok_or_else(|| {
                WorkflowError::internal(format!("body of step '{}' already executed", self.name))
            })
    }
}

#[async_trait]
impl LazyStep for RunStep<'_> {
    fn step_name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::Run
    }

    fn plan_kind(&self) -> StepKind {
        StepKind::Run
    }

    async fn execute(
        &self,
        _ctx: &WorkflowContext,
        step_id: u32,
        concurrent: u32,
    ) -> Result<Submission, WorkflowError> {
        let body = self.take_body()?;
        let out = body().await?;
        Ok(Submission::Continue(
            Step::new(step_id, &self.name, StepKind::Run)
                .with_out(out)
                .with_concurrent(concurrent),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NonRetryableError;

    #[tokio::test]
    async fn test_body_output_is_serialized() {
        let step = RunStep::new("greet", || async { Ok::<_, BoxError>(vec!["a", "b"]) });
        let body = step.take_body().unwrap();
        assert_eq!(body().await.unwrap(), r#"["a","b"]"#);
    }

    #[tokio::test]
    async fn test_body_runs_once() {
        let step = RunStep::new("once", || async { Ok::<_, BoxError>(1) });
        assert!(step.take_body().is_ok());
        assert!(matches!(step.take_body(), Err(WorkflowError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_body_error_is_classified() {
        let step = RunStep::new("charge", || async {
            Err::<(), BoxError>(NonRetryableError::new("card expired").into())
        });
        let body = step.take_body().unwrap();
        let err = body().await.unwrap_err();
        assert!(err.is_non_retryable());
        assert_eq!(err.message(), "card expired");
    }

    #[test]
    fn test_step_shape() {
        let step = RunStep::new("x", || async { Ok::<_, BoxError>(()) });
        assert_eq!(step.step_name(), "x");
        assert_eq!(step.step_type(), StepType::Run);
        assert_eq!(step.plan_kind(), StepKind::Run);
    }
}
