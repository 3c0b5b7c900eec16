//! `call` steps: outbound HTTP requests executed by the queue.
//!
//! The workflow endpoint never waits on the third party. The request is
//! published with a callback pointing back at the workflow; when the queue
//! gets a response it delivers it to the callback, which records the
//! `Call` result step for the next invocation to replay.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::PublishRequest;
use crate::config::CallSettings;
use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::headers::{
    Routing, CONCURRENT_HEADER, STEP_ID_HEADER, STEP_NAME_HEADER, STEP_TYPE_HEADER,
    WORKFLOW_CALLBACK_HEADER, WORKFLOW_CALL_TYPE_HEADER, WORKFLOW_ID_HEADER,
};
use crate::step::{CallType, Step, StepKind, StepType};

use super::{decode_lenient, decode_out, LazyStep, Submission};

/// Response of a `call` step.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse<T> {
    /// HTTP status returned by the called endpoint
    pub status: u16,
    /// Response body, decoded as JSON or taken as text
    pub body: T,
    /// Response headers
    pub header: HashMap<String, Vec<String>>,
}

/// Recorded `out` of a `Call` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CallOut {
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub header: HashMap<String, Vec<String>>,
}

pub(crate) struct CallStep {
    name: String,
    settings: CallSettings,
}

impl CallStep {
    pub(crate) fn new(name: impl Into<String>, settings: CallSettings) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }
}

#[async_trait]
impl LazyStep for CallStep {
    fn step_name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::Call
    }

    fn plan_kind(&self) -> StepKind {
        StepKind::Call {
            call_url: self.settings.url.clone(),
            call_method: self.settings.method.clone(),
            call_headers: self.settings.headers.clone(),
            call_body: self.settings.body.clone(),
        }
    }

    async fn execute(
        &self,
        _ctx: &WorkflowContext,
        step_id: u32,
        concurrent: u32,
    ) -> Result<Submission, WorkflowError> {
        if self.settings.url.trim().is_empty() {
            return Err(WorkflowError::validation(format!(
                "call step '{}' has no url",
                self.name
            )));
        }
        Ok(Submission::Call {
            step: Step::new(step_id, &self.name, self.plan_kind()).with_concurrent(concurrent),
            settings: self.settings.clone(),
        })
    }
}

/// Builds the outbound request for a call step.
///
/// The step identity rides along in the callback headers so the callback
/// invocation can record the result under the right `stepId`.
pub(crate) fn call_request(
    routing: &Routing,
    step: &Step,
    settings: &CallSettings,
) -> Result<PublishRequest, WorkflowError> {
    let mut request = PublishRequest::new(&settings.url, settings.body.clone().unwrap_or_default());
    request.method = Some(settings.method.clone());
    request.headers = settings
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<BTreeMap<_, _>>();
    request
        .headers
        .insert(WORKFLOW_ID_HEADER.to_string(), routing.workflow_run_id.clone());
    request.headers.insert(
        WORKFLOW_CALL_TYPE_HEADER.to_string(),
        CallType::ToCallback.as_str().to_string(),
    );
    request.retries = Some(settings.retries);
    request.timeout = settings.timeout;

    let mut callback_headers = routing.headers(false, CallType::FromCallback)?;
    callback_headers.insert(WORKFLOW_CALLBACK_HEADER.to_string(), "true".to_string());
    callback_headers.insert(STEP_ID_HEADER.to_string(), step.step_id.to_string());
    callback_headers.insert(STEP_NAME_HEADER.to_string(), step.step_name.clone());
    callback_headers.insert(STEP_TYPE_HEADER.to_string(), StepType::Call.to_string());
    callback_headers.insert(CONCURRENT_HEADER.to_string(), step.concurrent.to_string());
    request.callback = Some(routing.workflow_url.clone());
    request.callback_headers = callback_headers;
    Ok(request)
}

/// Decodes a resolved call step. Statuses of 300 and above fail the step.
pub(crate) fn decode_call<T: DeserializeOwned>(step: &Step) -> Result<CallResponse<T>, WorkflowError> {
    let out: CallOut = decode_out(step)?;
    if out.status >= 300 {
        return Err(WorkflowError::CallFailed {
            step_name: step.step_name.clone(),
            status: out.status,
            body: out.body,
            headers: out.header,
        });
    }
    let body = if out.body.trim().is_empty() {
        serde_json::from_str("null")?
    } else {
        decode_lenient(&out.body)?
    };
    Ok(CallResponse {
        status: out.status,
        body,
        header: out.header,
    })
}
