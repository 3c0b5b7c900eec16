//! Terminal run failures.
//!
//! When a run exhausts its retries, or answers with a non-retryable status,
//! the queue delivers a failure callback to the run's failure target. On
//! the workflow endpoint that delivery does three things:
//!
//! 1. reports the failure to the parent run when the run was invoked;
//! 2. runs the failure function, if one is configured, as a routine of its
//!    own: it may use every primitive, and its continuations carry the
//!    failure callback body as entry 0 of their history;
//! 3. reports to the failure URL when there is no failure function or the
//!    failure function itself failed.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::client::{LogsQuery, PublishRequest, SharedQueueClient};
use crate::config::FailureFunctionPayload;
use crate::context::{ContextParts, WorkflowContext};
use crate::error::WorkflowError;
use crate::handlers::invoke::InvokeOut;
use crate::headers::{Routing, WORKFLOW_ID_HEADER};
use crate::middleware::{DebugEvent, MiddlewareManager, RunInfo};
use crate::state::ExecutionHistory;

use super::invoke::notify_invoker;
use super::request::{is_step_list, parse_continuation};
use super::response::Outcome;
use super::{settle, Invocation, Settled};

/// Failure callback body delivered by the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCallbackPayload {
    /// Status the failing invocation answered with
    #[serde(default)]
    pub status: u16,
    /// Headers the failing invocation answered with
    #[serde(default)]
    pub header: HashMap<String, Vec<String>>,
    /// Base64 body the failing invocation answered with
    #[serde(default)]
    pub body: Option<String>,
    /// URL of the failed delivery
    #[serde(default)]
    pub url: Option<String>,
    /// Headers of the failed message
    #[serde(default)]
    pub source_header: HashMap<String, Vec<String>>,
    /// Base64 body of the failed message
    #[serde(default)]
    pub source_body: Option<String>,
    /// Run that failed
    #[serde(default)]
    pub workflow_run_id: Option<String>,
}

impl FailureCallbackPayload {
    /// Body the failing invocation answered with, as text.
    pub fn fail_response(&self) -> String {
        decode_base64_text(self.body.as_deref())
    }

    /// Payload the failed run was started with.
    ///
    /// The failed message is either the run's first delivery, whose body is
    /// the payload, or a continuation whose entry 0 is.
    pub fn initial_payload(&self) -> Option<String> {
        let source = decode_base64_text(self.source_body.as_deref());
        if is_step_list(&source) {
            return parse_continuation(&source).ok().and_then(|p| p.initial_payload);
        }
        (!source.is_empty()).then_some(source)
    }
}

fn decode_base64_text(encoded: Option<&str>) -> String {
    match encoded {
        None | Some("") => String::new(),
        Some(encoded) => STANDARD
            .decode(encoded)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_else(|_| encoded.to_string()),
    }
}

/// Report published to the failure URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// Failed run
    pub workflow_run_id: String,
    /// Workflow endpoint of the failed run
    pub workflow_url: String,
    /// Status the failing invocation answered with
    pub fail_status: u16,
    /// Body the failing invocation answered with
    pub fail_response: String,
    /// Headers the failing invocation answered with
    pub fail_headers: HashMap<String, Vec<String>>,
    /// Name of the step that failed, when the run log knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Error of the failure function, when it failed too
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_function_error: Option<String>,
}

/// Handles a failure callback or a continuation of the failure routine.
pub(crate) async fn handle_failure(
    invocation: Invocation<'_>,
    middleware: &Arc<MiddlewareManager>,
    body: &str,
) -> Result<Outcome, WorkflowError> {
    let routing = &invocation.routing;
    let client = &invocation.handler.client;

    let (callback_body, steps, first_delivery) = if is_step_list(body) {
        let parsed = parse_continuation(body)?;
        if parsed.is_duplicate {
            return Ok(acknowledged(routing));
        }
        (parsed.initial_payload.unwrap_or_default(), parsed.steps, false)
    } else {
        (body.to_string(), Vec::new(), true)
    };
    let payload: FailureCallbackPayload =
        serde_json::from_str(&callback_body).map_err(|e| WorkflowError::SerDes {
            message: format!("invalid failure callback body: {}", e),
        })?;

    middleware.assign_context(RunInfo {
        workflow_run_id: routing.workflow_run_id.clone(),
        workflow_url: routing.workflow_url.clone(),
    });

    if first_delivery {
        tracing::warn!(
            workflow_run_id = %routing.workflow_run_id,
            fail_status = payload.status,
            "Workflow run failed"
        );
        if let Some(invoker) = &routing.invoker {
            let out = InvokeOut {
                body: Some(payload.fail_response()),
                is_failed: true,
                is_canceled: false,
            };
            notify_invoker(client, routing, invoker, out).await?;
        }
    }

    let Some(failure_function) = invocation.options.failure_function.clone() else {
        if first_delivery {
            report(&invocation, &payload, None).await;
        }
        return Ok(acknowledged(routing));
    };

    let context = WorkflowContext::new(ContextParts {
        routing: routing.clone(),
        request_payload: payload.initial_payload(),
        headers: invocation.headers.clone(),
        env: invocation.env.clone(),
        client: client.clone(),
        middleware: middleware.clone(),
        history: ExecutionHistory::new(steps),
        attempt: invocation.attempt,
    });
    let result = failure_function(FailureFunctionPayload {
        context: context.clone(),
        fail_status: payload.status,
        fail_response: payload.fail_response(),
        fail_headers: payload.header.clone(),
    })
    .await;

    match settle(&context, result) {
        Settled::Submitted | Settled::Discarded => Ok(acknowledged(routing)),
        Settled::Retry(error) => Err(error),
        Settled::Returned(result) => {
            tracing::info!(
                workflow_run_id = %routing.workflow_run_id,
                result = ?result,
                "Failure function completed"
            );
            Ok(Outcome::Completed {
                workflow_run_id: routing.workflow_run_id.clone(),
            })
        }
        Settled::Failed(error) => {
            middleware
                .dispatch_debug(DebugEvent::Error(format!(
                    "Failure function of run {} failed: {}",
                    routing.workflow_run_id, error
                )))
                .await;
            report(&invocation, &payload, Some(error.to_string())).await;
            Ok(acknowledged(routing))
        }
    }
}

fn acknowledged(routing: &Routing) -> Outcome {
    Outcome::Acknowledged {
        workflow_run_id: routing.workflow_run_id.clone(),
    }
}

/// Publishes a [`FailureReport`] to the failure URL, if one is configured.
///
/// Reporting is best effort: errors are logged, never returned, so the
/// failure callback is not redelivered because of them.
async fn report(
    invocation: &Invocation<'_>,
    payload: &FailureCallbackPayload,
    failure_function_error: Option<String>,
) {
    let Some(failure_url) = invocation.options.failure_url.as_deref() else {
        return;
    };
    let routing = &invocation.routing;
    let client = &invocation.handler.client;

    let report = FailureReport {
        workflow_run_id: routing.workflow_run_id.clone(),
        workflow_url: routing.workflow_url.clone(),
        fail_status: payload.status,
        fail_response: payload.fail_response(),
        fail_headers: payload.header.clone(),
        failed_step: failed_step(client, &routing.workflow_run_id).await,
        failure_function_error,
    };
    let result = async {
        let mut request = PublishRequest::new(failure_url, serde_json::to_string(&report)?);
        request
            .headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        request
            .headers
            .insert(WORKFLOW_ID_HEADER.to_string(), routing.workflow_run_id.clone());
        client.publish(request).await
    }
    .await;

    match result {
        Ok(_) => tracing::debug!(
            workflow_run_id = %routing.workflow_run_id,
            failure_url,
            "Reported run failure"
        ),
        Err(error) => tracing::error!(
            workflow_run_id = %routing.workflow_run_id,
            failure_url,
            error = %error,
            "Failed to report run failure"
        ),
    }
}

async fn failed_step(client: &SharedQueueClient, workflow_run_id: &str) -> Option<String> {
    let query = LogsQuery {
        workflow_run_id: Some(workflow_run_id.to_string()),
        ..Default::default()
    };
    match client.logs(query).await {
        Ok(logs) => logs
            .runs
            .iter()
            .find(|run| run.workflow_run_id == workflow_run_id)
            .and_then(|run| run.failed_step())
            .map(|step| step.step_name.clone()),
        Err(error) => {
            tracing::warn!(
                workflow_run_id,
                error = %error,
                "Could not read the run log for failure diagnostics"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{CallType, RawStep};

    fn encoded(text: &str) -> Option<String> {
        Some(STANDARD.encode(text))
    }

    #[test]
    fn test_payload_from_first_delivery() {
        let payload = FailureCallbackPayload {
            status: 489,
            body: encoded(r#"{"error":"NonRetryableError","message":"stop"}"#),
            source_body: encoded(r#"{"order":7}"#),
            ..Default::default()
        };
        assert_eq!(payload.initial_payload().as_deref(), Some(r#"{"order":7}"#));
        assert!(payload.fail_response().contains("NonRetryableError"));
    }

    #[test]
    fn test_payload_from_continuation() {
        let source = serde_json::to_string(&vec![RawStep {
            message_id: "m0".to_string(),
            body: STANDARD.encode(r#"{"order":7}"#),
            call_type: CallType::Step,
        }])
        .unwrap();
        let payload = FailureCallbackPayload {
            source_body: encoded(&source),
            ..Default::default()
        };
        assert_eq!(payload.initial_payload().as_deref(), Some(r#"{"order":7}"#));
    }

    #[test]
    fn test_report_wire_shape() {
        let report = FailureReport {
            workflow_run_id: "wfr_1".to_string(),
            workflow_url: "https://app/wf".to_string(),
            fail_status: 500,
            fail_response: "boom".to_string(),
            fail_headers: HashMap::new(),
            failed_step: Some("charge".to_string()),
            failure_function_error: None,
        };
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["workflowRunId"], "wfr_1");
        assert_eq!(json["failedStep"], "charge");
        assert!(json.get("failureFunctionError").is_none());
    }
}
