//! `wait_for_event` steps.
//!
//! The waiter is registered with the queue, which delivers the wait step
//! back to the workflow either when an event is notified or when the
//! timeout expires.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::WaitRequest;
use crate::context::WorkflowContext;
use crate::duration::Duration;
use crate::error::WorkflowError;
use crate::headers::Routing;
use crate::step::{CallType, Step, StepKind, StepType};

use super::{decode_lenient, decode_out, LazyStep, Submission};

/// Result of waiting for an event.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitEventResult<T> {
    /// Data of the notified event; `None` on timeout
    pub event_data: Option<T>,
    /// The wait expired before any event arrived
    pub timeout: bool,
}

/// Normalized `out` of a `Wait` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WaitOut {
    #[serde(default)]
    pub event_data: Option<String>,
    #[serde(default)]
    pub timeout: bool,
}

pub(crate) struct WaitStep {
    name: String,
    event_id: String,
    timeout: Duration,
}

impl WaitStep {
    pub(crate) fn new(name: impl Into<String>, event_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            event_id: event_id.into(),
            timeout,
        }
    }
}

#[async_trait]
impl LazyStep for WaitStep {
    fn step_name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::Wait
    }

    fn plan_kind(&self) -> StepKind {
        StepKind::Wait {
            wait_event_id: self.event_id.clone(),
            timeout: self.timeout.to_queue_string(),
            wait_timeout: None,
        }
    }

    async fn execute(
        &self,
        _ctx: &WorkflowContext,
        step_id: u32,
        concurrent: u32,
    ) -> Result<Submission, WorkflowError> {
        if self.event_id.trim().is_empty() {
            return Err(WorkflowError::validation(format!(
                "wait step '{}' has no event id",
                self.name
            )));
        }
        Ok(Submission::Wait {
            step: Step::new(step_id, &self.name, self.plan_kind()).with_concurrent(concurrent),
            event_id: self.event_id.clone(),
            timeout: self.timeout,
        })
    }
}

/// Builds the waiter registration for a wait step.
pub(crate) fn wait_request(
    routing: &Routing,
    step: &Step,
    event_id: &str,
    timeout: Duration,
) -> Result<WaitRequest, WorkflowError> {
    Ok(WaitRequest {
        event_id: event_id.to_string(),
        url: routing.workflow_url.clone(),
        timeout,
        timeout_url: routing.workflow_url.clone(),
        headers: routing.headers(false, CallType::Step)?,
        step: step.clone(),
    })
}

/// Rewrites a wait entry delivered by the queue into its normalized form.
///
/// The queue stores the notified event data base64-encoded in `out` and
/// flags expiry through `waitTimeout`.
pub(crate) fn normalize_wait_out(step: &mut Step) -> Result<(), WorkflowError> {
    let StepKind::Wait { wait_timeout, .. } = &step.kind else {
        return Ok(());
    };
    if step.is_plan() {
        return Ok(());
    }
    let timeout = wait_timeout.unwrap_or(false);
    let event_data = match step.out.as_deref() {
        Some(encoded) if !encoded.is_empty() => {
            let bytes = STANDARD.decode(encoded).map_err(|e| WorkflowError::SerDes {
                message: format!("invalid event data for step '{}': {}", step.step_name, e),
            })?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => None,
    };
    if event_data.is_none() && !timeout {
        return Ok(());
    }
    step.out = Some(serde_json::to_string(&WaitOut {
        event_data,
        timeout,
    })?);
    Ok(())
}

/// Decodes a resolved wait step.
pub(crate) fn decode_wait<T: DeserializeOwned>(step: &Step) -> Result<WaitEventResult<T>, WorkflowError> {
    let out: WaitOut = decode_out(step)?;
    let event_data = match out.event_data.as_deref() {
        Some(text) if !text.is_empty() => Some(decode_lenient(text)?),
        _ => None,
    };
    Ok(WaitEventResult {
        event_data,
        timeout: out.timeout,
    })
}
