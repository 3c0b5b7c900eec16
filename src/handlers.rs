//! Step handlers: one module per workflow primitive.
//!
//! Every primitive is a [`LazyStep`]. Creating one does nothing; the
//! executor decides whether it is answered from history, planned as part of
//! a concurrency group, or executed and submitted. Executing a step yields
//! a [`Submission`] describing how the queue should carry it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::{CallSettings, InvokeSettings};
use crate::context::WorkflowContext;
use crate::duration::Duration;
use crate::error::WorkflowError;
use crate::step::{Step, StepKind, StepType};

pub mod call;
pub mod invoke;
pub mod notify;
pub mod parallel;
pub mod replay;
pub mod run;
pub mod sleep;
pub mod wait;
pub mod webhook;

pub use call::CallResponse;
pub use invoke::InvokeResponse;
pub use notify::NotifyStepResponse;
pub use parallel::ParallelCallState;
pub use replay::{check_replay, validate_step, ReplayResult};
pub use wait::WaitEventResult;
pub use webhook::{WaitWebhookResult, Webhook, WebhookRequest};

/// A primitive waiting for the executor to decide its fate.
#[async_trait]
pub(crate) trait LazyStep: Send + Sync {
    /// Author-supplied name
    fn step_name(&self) -> &str;

    /// Type recorded in history
    fn step_type(&self) -> StepType;

    /// Payload recorded on plan entries
    fn plan_kind(&self) -> StepKind;

    /// Runs the step's body, if any, and describes the submission.
    async fn execute(
        &self,
        ctx: &WorkflowContext,
        step_id: u32,
        concurrent: u32,
    ) -> Result<Submission, WorkflowError>;
}

/// How an executed step reaches the queue.
#[derive(Debug, Clone)]
pub(crate) enum Submission {
    /// Publish the step back to the workflow endpoint
    Continue(Step),
    /// Publish an outbound request whose response comes back as a callback
    Call {
        step: Step,
        settings: CallSettings,
    },
    /// Start a child run
    Invoke {
        step: Step,
        settings: InvokeSettings,
    },
    /// Register a waiter for an event
    Wait {
        step: Step,
        event_id: String,
        timeout: Duration,
    },
}

impl Submission {
    /// The step this submission carries.
    pub(crate) fn step(&self) -> &Step {
        match self {
            Self::Continue(step)
            | Self::Call { step, .. }
            | Self::Invoke { step, .. }
            | Self::Wait { step, .. } => step,
        }
    }
}

/// Decodes the `out` of a resolved step as JSON.
///
/// A missing `out` decodes as `null`, so `()` and `Option<T>` outputs work.
pub(crate) fn decode_out<T: DeserializeOwned>(step: &Step) -> Result<T, WorkflowError> {
    let raw = step.out.as_deref().unwrap_or("null");
    serde_json::from_str(raw).map_err(|e| WorkflowError::SerDes {
        message: format!(
            "Failed to deserialize output of step '{}': {}",
            step.step_name, e
        ),
    })
}

/// Decodes a JSON value, falling back to treating non-JSON text as a string.
pub(crate) fn decode_lenient<T: DeserializeOwned>(text: &str) -> Result<T, WorkflowError> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(_) => Ok(serde_json::from_value(serde_json::Value::String(text.to_string()))?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_out_missing_is_null() {
        let step = Step::new(1, "nap", StepKind::SleepFor { sleep_for: 1 });
        assert!(decode_out::<()>(&step).is_ok());
        let value: Option<u32> = decode_out(&step).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_decode_out_reports_step_name() {
        let step = Step::new(1, "count", StepKind::Run).with_out("\"not a number\"");
        let err = decode_out::<u32>(&step).unwrap_err();
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn test_decode_lenient_accepts_plain_text() {
        let text: String = decode_lenient("hello world").unwrap();
        assert_eq!(text, "hello world");
        let value: serde_json::Value = decode_lenient(r#"{"a":1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }
}
