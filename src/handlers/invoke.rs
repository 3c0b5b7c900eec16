//! `invoke` steps: start a child run and resolve when it finishes.
//!
//! The child is triggered with an invoker header describing the parent
//! run and the invoke step. When the child completes or fails terminally
//! its endpoint publishes the `Invoke` result step back to the parent.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::PublishRequest;
use crate::config::InvokeSettings;
use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::headers::{InvokerInfo, Routing, WORKFLOW_INVOKE_HEADER};
use crate::step::{Step, StepKind, StepType};
use crate::types::WorkflowRunId;

use super::{decode_lenient, decode_out, LazyStep, Submission};

/// Result of an `invoke` step.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeResponse<T> {
    /// The child's result, or its failure payload when `is_failed`
    pub body: Option<T>,
    /// The child run failed terminally
    pub is_failed: bool,
    /// The child run was canceled
    pub is_canceled: bool,
}

/// Recorded `out` of an `Invoke` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InvokeOut {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_failed: bool,
    #[serde(default)]
    pub is_canceled: bool,
}

pub(crate) struct InvokeStep {
    name: String,
    settings: InvokeSettings,
}

impl InvokeStep {
    pub(crate) fn new(name: impl Into<String>, settings: InvokeSettings) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }
}

#[async_trait]
impl LazyStep for InvokeStep {
    fn step_name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::Invoke
    }

    fn plan_kind(&self) -> StepKind {
        StepKind::Invoke
    }

    async fn execute(
        &self,
        _ctx: &WorkflowContext,
        step_id: u32,
        concurrent: u32,
    ) -> Result<Submission, WorkflowError> {
        if self.settings.workflow_url.trim().is_empty() {
            return Err(WorkflowError::validation(format!(
                "invoke step '{}' has no workflow url",
                self.name
            )));
        }
        Ok(Submission::Invoke {
            step: Step::new(step_id, &self.name, StepKind::Invoke).with_concurrent(concurrent),
            settings: self.settings.clone(),
        })
    }
}

/// Builds the trigger of the child run.
pub(crate) fn invoke_request(
    routing: &Routing,
    step: &Step,
    settings: &InvokeSettings,
) -> Result<PublishRequest, WorkflowError> {
    let child_run_id = match &settings.workflow_run_id {
        Some(id) => WorkflowRunId::from_user(id)?,
        None => WorkflowRunId::generate(),
    };

    let mut child = Routing::new(
        child_run_id.into_inner(),
        &settings.workflow_url,
        settings.retries.unwrap_or(routing.retries),
    );
    child.telemetry = routing.telemetry;
    // The child's own endpoint handles its failure and reports to the parent.
    child.failure_callback = Some(settings.workflow_url.clone());
    child.invoker = Some(InvokerInfo {
        workflow_run_id: routing.workflow_run_id.clone(),
        workflow_url: routing.workflow_url.clone(),
        step: step.clone(),
    });

    let mut request = child.trigger(settings.body.as_deref().unwrap_or_default())?;
    request
        .headers
        .insert(WORKFLOW_INVOKE_HEADER.to_string(), "true".to_string());
    for (name, value) in &settings.headers {
        request.headers.insert(name.clone(), value.clone());
    }
    Ok(request)
}

/// Decodes a resolved invoke step.
///
/// The body of a failed child is its failure payload, which rarely has the
/// shape of `T`; it is kept only when it happens to decode.
pub(crate) fn decode_invoke<T: DeserializeOwned>(
    step: &Step,
) -> Result<InvokeResponse<T>, WorkflowError> {
    let out: InvokeOut = decode_out(step)?;
    let body = match out.body.as_deref() {
        None => None,
        Some(text) if out.is_failed || out.is_canceled => decode_lenient(text).ok(),
        Some(text) => Some(decode_lenient(text)?),
    };
    Ok(InvokeResponse {
        body,
        is_failed: out.is_failed,
        is_canceled: out.is_canceled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{WORKFLOW_INIT_HEADER, WORKFLOW_INVOKER_HEADER, WORKFLOW_ID_HEADER};

    fn resolved(out: InvokeOut) -> Step {
        Step::new(2, "child", StepKind::Invoke).with_out(serde_json::to_string(&out).unwrap())
    }

    #[test]
    fn test_invoke_request_targets_child() {
        let routing = Routing::new("wfr_parent", "https://app/parent", 4);
        let settings = InvokeSettings::new("https://app/child")
            .with_body(r#"{"n":1}"#)
            .with_header("X-Tenant", "acme");
        let step = Step::new(2, "child", StepKind::Invoke);
        let request = invoke_request(&routing, &step, &settings).unwrap();

        assert_eq!(request.url, "https://app/child");
        assert_eq!(request.body, r#"{"n":1}"#);
        assert_eq!(request.retries, Some(4));
        assert_eq!(request.header(WORKFLOW_INIT_HEADER), Some("true"));
        assert_eq!(request.header(WORKFLOW_INVOKE_HEADER), Some("true"));
        assert_eq!(request.header("X-Tenant"), Some("acme"));
        assert!(request.header(WORKFLOW_ID_HEADER).unwrap().starts_with("wfr_"));
        assert_eq!(request.failure_callback.as_deref(), Some("https://app/child"));

        let invoker = InvokerInfo::decode(request.header(WORKFLOW_INVOKER_HEADER).unwrap()).unwrap();
        assert_eq!(invoker.workflow_run_id, "wfr_parent");
        assert_eq!(invoker.step.step_id, 2);
    }

    #[test]
    fn test_invoke_request_uses_chosen_run_id() {
        let routing = Routing::new("wfr_parent", "https://app/parent", 3);
        let settings = InvokeSettings::new("https://app/child").with_workflow_run_id("order-7");
        let request = invoke_request(&routing, &Step::new(1, "c", StepKind::Invoke), &settings).unwrap();
        assert_eq!(request.header(WORKFLOW_ID_HEADER), Some("wfr_order-7"));
    }

    #[test]
    fn test_decode_completed_child() {
        let step = resolved(InvokeOut {
            body: Some(r#"{"total":3}"#.to_string()),
            is_failed: false,
            is_canceled: false,
        });
        let response: InvokeResponse<serde_json::Value> = decode_invoke(&step).unwrap();
        assert_eq!(response.body.unwrap()["total"], 3);
        assert!(!response.is_failed);
    }

    #[test]
    fn test_decode_failed_child_keeps_flags() {
        let step = resolved(InvokeOut {
            body: Some(r#"{"error":"Error","message":"boom"}"#.to_string()),
            is_failed: true,
            is_canceled: false,
        });
        let response: InvokeResponse<u32> = decode_invoke(&step).unwrap();
        assert!(response.is_failed);
        assert!(response.body.is_none());
    }
}
