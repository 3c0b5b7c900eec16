//! Protocol headers and the routing data stamped on every continuation.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::client::PublishRequest;
use crate::error::WorkflowError;
use crate::step::{CallType, Step, StepKind};

/// Run id of the workflow run
pub const WORKFLOW_ID_HEADER: &str = "Upstash-Workflow-RunId";
/// `true` on the message that starts a run
pub const WORKFLOW_INIT_HEADER: &str = "Upstash-Workflow-Init";
/// URL of the workflow endpoint
pub const WORKFLOW_URL_HEADER: &str = "Upstash-Workflow-Url";
/// Marks failure-callback deliveries
pub const WORKFLOW_FAILURE_HEADER: &str = "Upstash-Workflow-Is-Failure";
/// Features of the continuation format understood by this engine
pub const WORKFLOW_FEATURE_HEADER: &str = "Upstash-Feature-Set";
/// Protocol version; absent only on the request that triggers a run
pub const WORKFLOW_PROTOCOL_VERSION_HEADER: &str = "Upstash-Workflow-Sdk-Version";
/// `step`, `toCallback` or `fromCallback`
pub const WORKFLOW_CALL_TYPE_HEADER: &str = "Upstash-Workflow-CallType";
/// Marks third-party call callbacks
pub const WORKFLOW_CALLBACK_HEADER: &str = "Upstash-Workflow-Callback";
/// Marks runs started by `invoke`
pub const WORKFLOW_INVOKE_HEADER: &str = "Upstash-Workflow-Invoke";
/// Base64 JSON describing the parent of an invoked run
pub const WORKFLOW_INVOKER_HEADER: &str = "Upstash-Workflow-Invoker";
/// Step id forwarded with call callbacks
pub const STEP_ID_HEADER: &str = "Upstash-Workflow-StepId";
/// Step name forwarded with call callbacks
pub const STEP_NAME_HEADER: &str = "Upstash-Workflow-StepName";
/// Step type forwarded with call callbacks
pub const STEP_TYPE_HEADER: &str = "Upstash-Workflow-StepType";
/// Concurrency forwarded with call callbacks
pub const CONCURRENT_HEADER: &str = "Upstash-Workflow-Concurrent";
/// Number of times the queue already retried this delivery
pub const RETRIED_HEADER: &str = "Upstash-Retried";
/// JWT signature of the delivery
pub const SIGNATURE_HEADER: &str = "Upstash-Signature";
/// Region that delivered the request
pub const REGION_HEADER: &str = "Upstash-Region";
/// Set on responses the queue must not retry
pub const NON_RETRYABLE_ERROR_HEADER: &str = "Upstash-NonRetryable-Error";
/// SDK name and version, sent unless telemetry is disabled
pub const TELEMETRY_SDK_HEADER: &str = "Upstash-Telemetry-Sdk";
/// Runtime description, sent unless telemetry is disabled
pub const TELEMETRY_RUNTIME_HEADER: &str = "Upstash-Telemetry-Runtime";

/// Current protocol version.
pub const WORKFLOW_PROTOCOL_VERSION: &str = "1";
/// Features advertised on every continuation.
pub const FEATURE_SET: &str = "InitialBody";

/// Parent run of an invoked workflow, forwarded on all of the child's messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokerInfo {
    /// Parent run id
    pub workflow_run_id: String,
    /// Parent workflow URL
    pub workflow_url: String,
    /// The parent's invoke step
    pub step: Step,
}

impl InvokerInfo {
    /// Encodes the invoker for the header.
    pub fn encode(&self) -> Result<String, WorkflowError> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    /// Decodes the invoker header.
    pub fn decode(value: &str) -> Result<Self, WorkflowError> {
        let bytes = STANDARD.decode(value.trim()).map_err(|e| WorkflowError::SerDes {
            message: format!("invalid invoker header: {}", e),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Where and how continuations of the current run are published.
#[derive(Debug, Clone, PartialEq)]
pub struct Routing {
    /// Run id
    pub workflow_run_id: String,
    /// Workflow endpoint URL
    pub workflow_url: String,
    /// Queue retries for each continuation
    pub retries: u32,
    /// Queue retry delay expression
    pub retry_delay: Option<String>,
    /// Target of the failure callback, if any
    pub failure_callback: Option<String>,
    /// Parent run, when this run was invoked
    pub invoker: Option<InvokerInfo>,
    /// True while running the failure function
    pub failure_mode: bool,
    /// Attach telemetry headers
    pub telemetry: bool,
}

impl Routing {
    /// Creates routing for a run with no failure handling and no parent.
    pub fn new(workflow_run_id: impl Into<String>, workflow_url: impl Into<String>, retries: u32) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            workflow_url: workflow_url.into(),
            retries,
            retry_delay: None,
            failure_callback: None,
            invoker: None,
            failure_mode: false,
            telemetry: true,
        }
    }

    /// Protocol headers for a message of this run.
    pub fn headers(&self, init: bool, call_type: CallType) -> Result<BTreeMap<String, String>, WorkflowError> {
        let mut headers = BTreeMap::new();
        headers.insert(WORKFLOW_ID_HEADER.to_string(), self.workflow_run_id.clone());
        headers.insert(WORKFLOW_INIT_HEADER.to_string(), init.to_string());
        headers.insert(WORKFLOW_URL_HEADER.to_string(), self.workflow_url.clone());
        headers.insert(WORKFLOW_CALL_TYPE_HEADER.to_string(), call_type.as_str().to_string());
        headers.insert(
            WORKFLOW_PROTOCOL_VERSION_HEADER.to_string(),
            WORKFLOW_PROTOCOL_VERSION.to_string(),
        );
        headers.insert(WORKFLOW_FEATURE_HEADER.to_string(), FEATURE_SET.to_string());
        if let Some(invoker) = &self.invoker {
            headers.insert(WORKFLOW_INVOKER_HEADER.to_string(), invoker.encode()?);
        }
        if self.failure_mode {
            headers.insert(WORKFLOW_FAILURE_HEADER.to_string(), "true".to_string());
        }
        if self.telemetry {
            headers.insert(
                TELEMETRY_SDK_HEADER.to_string(),
                format!("upstash-workflow-rust@v{}", env!("CARGO_PKG_VERSION")),
            );
            headers.insert(TELEMETRY_RUNTIME_HEADER.to_string(), "rust".to_string());
        }
        Ok(headers)
    }

    /// Headers delivered with the failure callback of a message.
    pub fn failure_headers(&self) -> Result<BTreeMap<String, String>, WorkflowError> {
        let mut headers = self.headers(false, CallType::Step)?;
        headers.insert(WORKFLOW_FAILURE_HEADER.to_string(), "true".to_string());
        Ok(headers)
    }

    /// Builds the message carrying `step` back to the workflow endpoint.
    ///
    /// Result entries of timer steps are delayed; plan entries never are.
    pub fn continuation(&self, step: &Step) -> Result<PublishRequest, WorkflowError> {
        let mut request = PublishRequest::new(&self.workflow_url, serde_json::to_string(step)?);
        request.headers = self.headers(false, CallType::Step)?;
        request.headers.insert("Content-Type".to_string(), "application/json".to_string());
        request.retries = Some(self.retries);
        request.retry_delay = self.retry_delay.clone();
        self.attach_failure_callback(&mut request)?;

        if !step.is_plan() {
            match step.kind {
                StepKind::SleepFor { sleep_for } => {
                    request.delay = Some(crate::duration::Duration::from_seconds(sleep_for));
                }
                StepKind::SleepUntil { sleep_until } => {
                    request.not_before = Some(sleep_until);
                }
                _ => {}
            }
        }
        Ok(request)
    }

    /// Builds the message that starts the run.
    pub fn trigger(&self, payload: &str) -> Result<PublishRequest, WorkflowError> {
        let mut request = PublishRequest::new(&self.workflow_url, payload);
        request.headers = self.headers(true, CallType::Step)?;
        request.retries = Some(self.retries);
        request.retry_delay = self.retry_delay.clone();
        self.attach_failure_callback(&mut request)?;
        Ok(request)
    }

    fn attach_failure_callback(&self, request: &mut PublishRequest) -> Result<(), WorkflowError> {
        if self.failure_mode {
            return Ok(());
        }
        if let Some(target) = &self.failure_callback {
            request.failure_callback = Some(target.clone());
            request.failure_callback_headers = self.failure_headers()?;
        }
        Ok(())
    }
}

/// Case-insensitive header lookup on an inbound request.
pub(crate) fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
