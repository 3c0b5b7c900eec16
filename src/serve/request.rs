//! Parsing of inbound deliveries.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::HeaderMap;

use crate::error::WorkflowError;
use crate::handlers::wait::normalize_wait_out;
use crate::headers::{
    header_str, RETRIED_HEADER, WORKFLOW_CALLBACK_HEADER, WORKFLOW_FAILURE_HEADER,
    WORKFLOW_ID_HEADER, WORKFLOW_INIT_HEADER,
};
use crate::state::ExecutionHistory;
use crate::step::{CallType, RawStep, Step};

/// What an inbound request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    /// Called directly to start a run; carries the raw payload
    Trigger,
    /// First delivery of a run through the queue; carries the raw payload
    Init,
    /// Delivery carrying the run's history
    Continuation,
    /// Response of a third-party call made by a `call` step
    CallReturn,
    /// Failure callback or a continuation of the failure routine
    Failure,
}

impl RequestKind {
    pub(crate) fn classify(headers: &HeaderMap) -> Self {
        if header_str(headers, WORKFLOW_ID_HEADER).is_none() {
            return Self::Trigger;
        }
        if is_true(headers, WORKFLOW_CALLBACK_HEADER) {
            return Self::CallReturn;
        }
        if is_true(headers, WORKFLOW_FAILURE_HEADER) {
            return Self::Failure;
        }
        if is_true(headers, WORKFLOW_INIT_HEADER) {
            return Self::Init;
        }
        Self::Continuation
    }
}

fn is_true(headers: &HeaderMap, name: &str) -> bool {
    header_str(headers, name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// A decoded continuation body.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedRequest {
    /// Payload the run was started with (entry 0)
    pub initial_payload: Option<String>,
    /// Step entries in delivery order
    pub steps: Vec<Step>,
    /// The last entry repeats an earlier one
    pub is_duplicate: bool,
}

impl ParsedRequest {
    /// A first delivery: the body is the payload and there is no history.
    pub(crate) fn initial(body: &str) -> Self {
        Self {
            initial_payload: (!body.is_empty()).then(|| body.to_string()),
            steps: Vec::new(),
            is_duplicate: false,
        }
    }
}

/// Parses a continuation body.
///
/// The body is a JSON array of raw entries with base64 bodies. Entry 0 is
/// the initial payload; later entries are steps. Entries that are not step
/// continuations (the outbound leg of a call, its raw callback) are skipped.
pub(crate) fn parse_continuation(body: &str) -> Result<ParsedRequest, WorkflowError> {
    let raw: Vec<RawStep> = serde_json::from_str(body).map_err(|e| WorkflowError::SerDes {
        message: format!("continuation body is not a list of steps: {}", e),
    })?;
    let Some((first, rest)) = raw.split_first() else {
        return Err(WorkflowError::validation("continuation body has no entries"));
    };

    let initial_payload = Some(decode_body(first)?).filter(|p| !p.is_empty());
    let mut steps = Vec::with_capacity(rest.len());
    for entry in rest.iter().filter(|e| e.call_type == CallType::Step) {
        let text = decode_body(entry)?;
        let mut step: Step = serde_json::from_str(&text).map_err(|e| WorkflowError::SerDes {
            message: format!("invalid step in message '{}': {}", entry.message_id, e),
        })?;
        normalize_wait_out(&mut step)?;
        steps.push(step);
    }

    let is_duplicate = ExecutionHistory::is_last_duplicate(&steps);
    Ok(ParsedRequest {
        initial_payload,
        steps,
        is_duplicate,
    })
}

/// Returns true when the body looks like a continuation list.
pub(crate) fn is_step_list(body: &str) -> bool {
    body.trim_start().starts_with('[')
}

fn decode_body(entry: &RawStep) -> Result<String, WorkflowError> {
    let bytes = STANDARD
        .decode(entry.body.trim())
        .map_err(|e| WorkflowError::SerDes {
            message: format!("invalid base64 in message '{}': {}", entry.message_id, e),
        })?;
    String::from_utf8(bytes).map_err(|e| WorkflowError::SerDes {
        message: format!("message '{}' is not UTF-8: {}", entry.message_id, e),
    })
}

/// How many times the queue already redelivered this message.
pub(crate) fn retried(headers: &HeaderMap) -> u32 {
    header_str(headers, RETRIED_HEADER)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepKind;
    use http::{HeaderName, HeaderValue};

    fn set(headers: &mut HeaderMap, name: &str, value: &str) {
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }

    fn entry(body: &str, call_type: CallType) -> RawStep {
        RawStep {
            message_id: "msg".to_string(),
            body: STANDARD.encode(body),
            call_type,
        }
    }

    fn step_entry(step: &Step) -> RawStep {
        entry(&serde_json::to_string(step).unwrap(), CallType::Step)
    }

    #[test]
    fn test_classify() {
        let mut headers = HeaderMap::new();
        assert_eq!(RequestKind::classify(&headers), RequestKind::Trigger);

        set(&mut headers, WORKFLOW_ID_HEADER, "wfr_1");
        assert_eq!(RequestKind::classify(&headers), RequestKind::Continuation);

        set(&mut headers, WORKFLOW_INIT_HEADER, "true");
        assert_eq!(RequestKind::classify(&headers), RequestKind::Init);

        set(&mut headers, WORKFLOW_FAILURE_HEADER, "true");
        assert_eq!(RequestKind::classify(&headers), RequestKind::Failure);

        set(&mut headers, WORKFLOW_CALLBACK_HEADER, "true");
        assert_eq!(RequestKind::classify(&headers), RequestKind::CallReturn);
    }

    #[test]
    fn test_parse_continuation() {
        let step = Step::new(1, "step1", StepKind::Run).with_out("\"a\"");
        let body = serde_json::to_string(&vec![
            entry(r#"{"user":"ada"}"#, CallType::Step),
            step_entry(&step),
            entry("raw third party body", CallType::ToCallback),
        ])
        .unwrap();

        let parsed = parse_continuation(&body).unwrap();
        assert_eq!(parsed.initial_payload.as_deref(), Some(r#"{"user":"ada"}"#));
        assert_eq!(parsed.steps, vec![step]);
        assert!(!parsed.is_duplicate);
    }

    #[test]
    fn test_parse_detects_duplicate_delivery() {
        let step = Step::new(1, "step1", StepKind::Run).with_out("1");
        let body = serde_json::to_string(&vec![
            entry("", CallType::Step),
            step_entry(&step),
            step_entry(&step),
        ])
        .unwrap();
        let parsed = parse_continuation(&body).unwrap();
        assert!(parsed.initial_payload.is_none());
        assert!(parsed.is_duplicate);
    }

    #[test]
    fn test_parse_normalizes_wait_steps() {
        let wait = Step::new(
            1,
            "approval",
            StepKind::Wait {
                wait_event_id: "evt".to_string(),
                timeout: "1d".to_string(),
                wait_timeout: Some(false),
            },
        )
        .with_out(STANDARD.encode("approved"));
        let body = serde_json::to_string(&vec![entry("{}", CallType::Step), step_entry(&wait)]).unwrap();
        let parsed = parse_continuation(&body).unwrap();
        let out: serde_json::Value = serde_json::from_str(parsed.steps[0].out.as_deref().unwrap()).unwrap();
        assert_eq!(out["eventData"], "approved");
        assert_eq!(out["timeout"], false);
    }

    #[test]
    fn test_parse_rejects_bad_bodies() {
        assert!(parse_continuation("[]").is_err());
        assert!(parse_continuation("not json").is_err());
        let body = r#"[{"messageId":"m","body":"%%%","callType":"step"}]"#;
        assert!(parse_continuation(body).is_err());
    }

    #[test]
    fn test_retried_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retried(&headers), 0);
        set(&mut headers, RETRIED_HEADER, "2");
        assert_eq!(retried(&headers), 2);
    }
}
