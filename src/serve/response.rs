//! Responses that end an invocation.

use bytes::Bytes;
use http::{header, Response, StatusCode};
use serde_json::json;

use crate::error::{FailureResponse, WorkflowError};
use crate::headers::NON_RETRYABLE_ERROR_HEADER;

/// How an invocation ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// A run was started; the caller gets its id
    Triggered { workflow_run_id: String },
    /// The next action was submitted, or there was nothing to do
    Acknowledged { workflow_run_id: String },
    /// The workflow function returned
    Completed { workflow_run_id: String },
    /// A third-party call failed and the queue will retry it
    CallWillRetry,
    /// A third-party call result was recorded
    CallReturned,
    /// The request failed signature verification
    Unauthorized { message: String },
    /// The invocation failed
    Failed(WorkflowError),
}

impl Outcome {
    /// Builds the HTTP response for this outcome.
    ///
    /// Failures map to 489 plus `Upstash-NonRetryable-Error` when the queue
    /// must not retry, 429 plus `Retry-After` for explicit delays, and 500
    /// otherwise.
    pub(crate) fn into_response(self) -> Response<Bytes> {
        match self {
            Self::Triggered { workflow_run_id } | Self::Acknowledged { workflow_run_id } => {
                json_response(StatusCode::OK, json!({ "workflowRunId": workflow_run_id }))
            }
            Self::Completed { workflow_run_id } => json_response(
                StatusCode::OK,
                json!({ "workflowRunId": workflow_run_id, "finished": true }),
            ),
            Self::CallWillRetry => text_response(StatusCode::OK, "call-will-retry"),
            Self::CallReturned => text_response(StatusCode::OK, "is-call-return"),
            Self::Unauthorized { message } => json_response(
                StatusCode::BAD_REQUEST,
                json!({ "error": "AuthenticationError", "message": message }),
            ),
            Self::Failed(error) => failure_response(&error),
        }
    }
}

fn failure_response(error: &WorkflowError) -> Response<Bytes> {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(&FailureResponse::from(error)).unwrap_or_default();
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");

    match error {
        WorkflowError::RetryAfter { retry_after, .. } => {
            builder = builder.header(header::RETRY_AFTER, retry_after.to_seconds().to_string());
        }
        e if e.is_non_retryable() => {
            builder = builder.header(NON_RETRYABLE_ERROR_HEADER, "true");
        }
        _ => {}
    }
    builder
        .body(Bytes::from(body))
        .unwrap_or_else(|_| fallback(status))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Bytes> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Bytes::from(value.to_string()))
        .unwrap_or_else(|_| fallback(status))
}

fn text_response(status: StatusCode, text: &'static str) -> Response<Bytes> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Bytes::from_static(text.as_bytes()))
        .unwrap_or_else(|_| fallback(status))
}

fn fallback(status: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::Duration;

    fn body_json(response: &Response<Bytes>) -> serde_json::Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn test_trigger_and_completion_bodies() {
        let response = Outcome::Triggered {
            workflow_run_id: "wfr_1".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(&response)["workflowRunId"], "wfr_1");

        let response = Outcome::Completed {
            workflow_run_id: "wfr_1".to_string(),
        }
        .into_response();
        assert_eq!(body_json(&response)["finished"], true);
    }

    #[test]
    fn test_non_retryable_failure() {
        let response = Outcome::Failed(WorkflowError::non_retryable("stop")).into_response();
        assert_eq!(response.status().as_u16(), 489);
        assert_eq!(
            response.headers().get(NON_RETRYABLE_ERROR_HEADER).unwrap(),
            "true"
        );
        let body = body_json(&response);
        assert_eq!(body["error"], "NonRetryableError");
        assert_eq!(body["message"], "stop");
    }

    #[test]
    fn test_retry_after_failure() {
        let response = Outcome::Failed(WorkflowError::retry_after(
            "rate limited",
            Duration::from_minutes(2),
        ))
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "120");
        assert!(response.headers().get(NON_RETRYABLE_ERROR_HEADER).is_none());
    }

    #[test]
    fn test_retryable_failure() {
        let response = Outcome::Failed(WorkflowError::UserCode {
            message: "boom".to_string(),
            error_type: "Error".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(NON_RETRYABLE_ERROR_HEADER).is_none());
    }

    #[test]
    fn test_call_return_bodies() {
        let response = Outcome::CallWillRetry.into_response();
        assert_eq!(response.body().as_ref(), b"call-will-retry");
        let response = Outcome::CallReturned.into_response();
        assert_eq!(response.body().as_ref(), b"is-call-return");
    }
}
