//! Webhooks: a URL under the queue that turns an inbound request into an
//! event the run can wait for.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::step::{Step, StepKind, StepType};

use super::wait::decode_wait;
use super::{LazyStep, Submission};

/// A webhook created by `create_webhook`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    /// URL external systems post to
    pub webhook_url: String,
    /// Event id the posted request is delivered under
    pub event_id: String,
}

/// A request posted to a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    /// HTTP method of the posted request
    pub method: String,
    /// Headers of the posted request
    pub header: HashMap<String, Vec<String>>,
    /// Body of the posted request as text
    pub body: String,
}

/// Result of `wait_for_webhook`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitWebhookResult {
    /// The posted request; `None` on timeout
    pub request: Option<WebhookRequest>,
    /// The wait expired before any request arrived
    pub timeout: bool,
}

/// Event data the queue records for a posted webhook request. The body is base64.
#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    method: String,
    #[serde(default)]
    header: HashMap<String, Vec<String>>,
    #[serde(default)]
    body: String,
}

pub(crate) struct WebhookStep {
    name: String,
}

impl WebhookStep {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl LazyStep for WebhookStep {
    fn step_name(&self) -> &str {
        &self.name
    }

    fn step_type(&self) -> StepType {
        StepType::Webhook
    }

    fn plan_kind(&self) -> StepKind {
        StepKind::Webhook
    }

    async fn execute(
        &self,
        ctx: &WorkflowContext,
        step_id: u32,
        concurrent: u32,
    ) -> Result<Submission, WorkflowError> {
        let event_id = uuid::Uuid::new_v4().simple().to_string();
        let webhook = Webhook {
            webhook_url: webhook_url(ctx.client().base_url(), ctx.workflow_run_id(), &event_id),
            event_id,
        };
        Ok(Submission::Continue(
            Step::new(step_id, &self.name, StepKind::Webhook)
                .with_out(serde_json::to_string(&webhook)?)
                .with_concurrent(concurrent),
        ))
    }
}

pub(crate) fn webhook_url(base_url: &str, workflow_run_id: &str, event_id: &str) -> String {
    format!(
        "{}/v2/workflows/hooks/{}/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(workflow_run_id),
        urlencoding::encode(event_id)
    )
}

/// Decodes a resolved `wait_for_webhook` step.
pub(crate) fn decode_webhook_wait(step: &Step) -> Result<WaitWebhookResult, WorkflowError> {
    let waited = decode_wait::<serde_json::Value>(step)?;
    let request = match waited.event_data {
        None => None,
        Some(value) => {
            let event: WebhookEvent = serde_json::from_value(value)?;
            let body = STANDARD
                .decode(event.body.as_bytes())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or(event.body);
            Some(WebhookRequest {
                method: event.method,
                header: event.header,
                body,
            })
        }
    };
    Ok(WaitWebhookResult {
        request,
        timeout: waited.timeout,
    })
}
