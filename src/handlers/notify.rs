//! `notify` steps: deliver event data to every waiter of an event id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::NotifyResponse;
use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::step::{Step, StepKind, StepType};

use super::{LazyStep, Submission};

/// Result of a `notify` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyStepResponse {
    /// Event that was notified
    pub event_id: String,
    /// Data delivered to the waiters
    pub event_data: String,
    /// One entry per waiter reached
    #[serde(default)]
    pub notify_response: Vec<NotifyResponse>,
}

pub(crate) struct NotifyStep {
    name: String,
    event_id: String,
    // serialization errors surface when the step executes
    data: Result<String, String>,
}

impl NotifyStep {
    pub(crate) fn new<T: Serialize + ?Sized>(
        name: impl Into<String>,
        event_id: impl Into<String>,
        data: &T,
    ) -> Self {
        Self {
            name: name.into(),
            event_id: event_id.into(),
            data: event_data(data).map_err(|e| e.to_string()),
        }
    }
}

/// Strings are sent as-is; other values as JSON.
fn event_data<T: Serialize + ?Sized>(data: &T) -> Result<String, serde_json::Error> {
    match serde_json::to_value(data)? {
        serde_json::Value::String(text) => Ok(text),
        value => Ok(value.to_string()),
    }
}

#[async_trait]
impl LazyStep for NotifyStep {
    fn step_name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::Notify
    }

    fn plan_kind(&self) -> StepKind {
        StepKind::Notify
    }

    async fn execute(
        &self,
        ctx: &WorkflowContext,
        step_id: u32,
        concurrent: u32,
    ) -> Result<Submission, WorkflowError> {
        let data = self
            .data
            .clone()
            .map_err(|message| WorkflowError::SerDes { message })?;
        let notify_response = ctx.client().notify(&self.event_id, &data).await?;
        tracing::debug!(
            event_id = %self.event_id,
            waiters = notify_response.len(),
            "Notified event"
        );
        let out = NotifyStepResponse {
            event_id: self.event_id.clone(),
            event_data: data,
            notify_response,
        };
        Ok(Submission::Continue(
            Step::new(step_id, &self.name, StepKind::Notify)
                .with_out(serde_json::to_string(&out)?)
                .with_concurrent(concurrent),
        ))
    }
}
