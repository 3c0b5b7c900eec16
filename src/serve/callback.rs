//! Results of third-party calls.
//!
//! A `call` step is published to the third party with a callback pointing
//! back at the workflow endpoint. The queue delivers the response there,
//! with the step identity in the forwarded headers. A failed response with
//! retries left is acknowledged and left to the queue; anything else is
//! recorded as the `Call` result step of the run.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::HeaderMap;
use serde::Deserialize;

use crate::client::SharedQueueClient;
use crate::error::WorkflowError;
use crate::handlers::call::CallOut;
use crate::headers::{
    header_str, Routing, CONCURRENT_HEADER, STEP_ID_HEADER, STEP_NAME_HEADER, STEP_TYPE_HEADER,
};
use crate::step::{Step, StepKind, StepType};

use super::response::Outcome;

/// Body delivered by the queue to a call callback.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CallbackMessage {
    pub status: u16,
    #[serde(default)]
    pub header: HashMap<String, Vec<String>>,
    /// Base64-encoded response body
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub retried: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl CallbackMessage {
    fn will_retry(&self) -> bool {
        let failed = !(200..300).contains(&self.status);
        match (self.retried, self.max_retries) {
            (Some(retried), Some(max_retries)) => failed && retried < max_retries,
            _ => false,
        }
    }

    fn decoded_body(&self) -> String {
        match self.body.as_deref() {
            None | Some("") => String::new(),
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_else(|_| encoded.to_string()),
        }
    }
}

/// Records the result of a third-party call as the run's next step.
pub(crate) async fn handle_call_return(
    client: &SharedQueueClient,
    routing: &Routing,
    headers: &HeaderMap,
    body: &str,
) -> Result<Outcome, WorkflowError> {
    let message: CallbackMessage = serde_json::from_str(body).map_err(|e| WorkflowError::SerDes {
        message: format!("invalid call callback body: {}", e),
    })?;

    if message.will_retry() {
        tracing::warn!(
            workflow_run_id = %routing.workflow_run_id,
            status = message.status,
            retried = ?message.retried,
            max_retries = ?message.max_retries,
            "Third-party call failed, the queue will retry it"
        );
        return Ok(Outcome::CallWillRetry);
    }

    let step = result_step(headers, &message)?;
    tracing::debug!(
        workflow_run_id = %routing.workflow_run_id,
        step_id = step.step_id,
        step_name = %step.step_name,
        status = message.status,
        "Recording third-party call result"
    );
    client.publish(routing.continuation(&step)?).await?;
    Ok(Outcome::CallReturned)
}

fn result_step(headers: &HeaderMap, message: &CallbackMessage) -> Result<Step, WorkflowError> {
    let missing = |name: &str| WorkflowError::validation(format!("call callback is missing the {} header", name));

    let step_id: u32 = header_str(headers, STEP_ID_HEADER)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| missing(STEP_ID_HEADER))?;
    let step_name = header_str(headers, STEP_NAME_HEADER).ok_or_else(|| missing(STEP_NAME_HEADER))?;
    let step_type = header_str(headers, STEP_TYPE_HEADER).ok_or_else(|| missing(STEP_TYPE_HEADER))?;
    if step_type != StepType::Call.to_string() {
        return Err(WorkflowError::validation(format!(
            "call callback for step '{}' has step type '{}'",
            step_name, step_type
        )));
    }
    let concurrent = header_str(headers, CONCURRENT_HEADER)
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);

    let out = CallOut {
        status: message.status,
        body: message.decoded_body(),
        header: message.header.clone(),
    };
    // the url and method are already fixed by the step's plan or history
    let kind = StepKind::Call {
        call_url: String::new(),
        call_method: String::new(),
        call_headers: HashMap::new(),
        call_body: None,
    };
    Ok(Step::new(step_id, step_name, kind)
        .with_out(serde_json::to_string(&out)?)
        .with_concurrent(concurrent))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::{HeaderName, HeaderValue};

    use super::*;
    use crate::client::MockQueueClient;

    fn callback_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            (STEP_ID_HEADER, "3"),
            (STEP_NAME_HEADER, "fetch"),
            (STEP_TYPE_HEADER, "Call"),
            (CONCURRENT_HEADER, "1"),
        ] {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_static(value),
            );
        }
        headers
    }

    fn callback_body(status: u16, body: &str, retried: u32, max_retries: u32) -> String {
        serde_json::json!({
            "status": status,
            "header": {"content-type": ["application/json"]},
            "body": STANDARD.encode(body),
            "retried": retried,
            "maxRetries": max_retries,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_failed_call_with_retries_left_is_left_to_queue() {
        let mock = Arc::new(MockQueueClient::new());
        let client: SharedQueueClient = mock.clone();
        let routing = Routing::new("wfr_1", "https://app/wf", 3);
        let outcome = handle_call_return(
            &client,
            &routing,
            &callback_headers(),
            &callback_body(500, "oops", 0, 2),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, Outcome::CallWillRetry));
        assert_eq!(mock.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_final_response_is_recorded() {
        let mock = Arc::new(MockQueueClient::new());
        let client: SharedQueueClient = mock.clone();
        let routing = Routing::new("wfr_1", "https://app/wf", 3);
        let outcome = handle_call_return(
            &client,
            &routing,
            &callback_headers(),
            &callback_body(500, "oops", 0, 0),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, Outcome::CallReturned));

        let published = mock.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].url, "https://app/wf");
        let step: Step = serde_json::from_str(&published[0].body).unwrap();
        assert_eq!(step.step_id, 3);
        assert_eq!(step.step_name, "fetch");
        assert_eq!(step.step_type(), StepType::Call);
        let out: CallOut = serde_json::from_str(step.out.as_deref().unwrap()).unwrap();
        assert_eq!(out.status, 500);
        assert_eq!(out.body, "oops");
        assert_eq!(out.header["content-type"], vec!["application/json".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_step_headers_are_rejected() {
        let client: SharedQueueClient = Arc::new(MockQueueClient::new());
        let routing = Routing::new("wfr_1", "https://app/wf", 3);
        let err = handle_call_return(
            &client,
            &routing,
            &HeaderMap::new(),
            &callback_body(200, "{}", 0, 0),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains(STEP_ID_HEADER));
    }
}
