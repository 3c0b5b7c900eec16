//! Step model: one history entry of a workflow run.
//!
//! Steps travel on the wire as camelCase JSON. The step type is a closed
//! tagged variant (`stepType`) whose payload fields sit next to the common
//! ones:
//!
//! ```json
//! {"stepId":2,"stepName":"nap","stepType":"SleepFor","sleepFor":10,"concurrent":1}
//! ```
//!
//! Two shapes share this type:
//!
//! - a *result* entry (`stepId > 0`) carrying `out` or `error` once resolved;
//! - a *plan* entry (`stepId == 0`) recorded for each member of a
//!   concurrency group, pointing at the member's eventual `stepId` through
//!   `targetStep`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// `stepId` carried by plan entries.
pub const PLAN_STEP_ID: u32 = 0;

/// One history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Position of the step in program order, starting at 1. Zero for plans.
    pub step_id: u32,

    /// Author-supplied label
    pub step_name: String,

    /// Type and type-specific payload
    #[serde(flatten)]
    pub kind: StepKind,

    /// JSON-serialized result, absent until the step resolves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,

    /// Present when the step failed terminally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,

    /// Size of the concurrency group this step belongs to
    #[serde(default = "default_concurrent")]
    pub concurrent: u32,

    /// For plan entries, the `stepId` that will carry the member's result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_step: Option<u32>,
}

fn default_concurrent() -> u32 {
    1
}

impl Step {
    /// Creates a result entry with no output yet.
    pub fn new(step_id: u32, step_name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            step_id,
            step_name: step_name.into(),
            kind,
            out: None,
            error: None,
            concurrent: 1,
            target_step: None,
        }
    }

    /// Creates a plan entry for one member of a concurrency group.
    pub fn plan(
        step_name: impl Into<String>,
        kind: StepKind,
        concurrent: u32,
        target_step: u32,
    ) -> Self {
        Self {
            step_id: PLAN_STEP_ID,
            step_name: step_name.into(),
            kind,
            out: None,
            error: None,
            concurrent,
            target_step: Some(target_step),
        }
    }

    /// Sets the serialized output.
    pub fn with_out(mut self, out: impl Into<String>) -> Self {
        self.out = Some(out.into());
        self
    }

    /// Sets the terminal failure.
    pub fn with_error(mut self, error: StepFailure) -> Self {
        self.error = Some(error);
        self
    }

    /// Sets the concurrency group size.
    pub fn with_concurrent(mut self, concurrent: u32) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Returns the step type without its payload.
    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }

    /// Returns true for plan entries.
    pub fn is_plan(&self) -> bool {
        self.step_id == PLAN_STEP_ID
    }

    /// Returns true if the step failed terminally.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Type-specific payload of a step, tagged by `stepType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stepType", rename_all_fields = "camelCase")]
pub enum StepKind {
    /// Arbitrary user work executed inline
    Run,
    /// Relative timer
    SleepFor {
        /// Seconds to sleep
        sleep_for: u64,
    },
    /// Absolute timer
    SleepUntil {
        /// Unix timestamp in seconds
        sleep_until: i64,
    },
    /// Outbound HTTP request executed by the queue
    Call {
        /// Target URL
        call_url: String,
        /// HTTP method
        call_method: String,
        /// Request headers
        #[serde(default)]
        call_headers: HashMap<String, String>,
        /// Request body
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_body: Option<String>,
    },
    /// Child workflow run
    Invoke,
    /// Wait for an external event (also used for webhook waits)
    Wait {
        /// Event id being waited for
        wait_event_id: String,
        /// Timeout in the queue's duration format
        timeout: String,
        /// Set by the queue when the wait expired
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_timeout: Option<bool>,
    },
    /// Publish an event to waiters
    Notify,
    /// Webhook registration
    Webhook,
}

impl StepKind {
    /// Returns the step type without its payload.
    pub fn step_type(&self) -> StepType {
        match self {
            Self::Run => StepType::Run,
            Self::SleepFor { .. } => StepType::SleepFor,
            Self::SleepUntil { .. } => StepType::SleepUntil,
            Self::Call { .. } => StepType::Call,
            Self::Invoke => StepType::Invoke,
            Self::Wait { .. } => StepType::Wait,
            Self::Notify => StepType::Notify,
            Self::Webhook => StepType::Webhook,
        }
    }
}

/// Step type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepType {
    /// Inline user work
    Run,
    /// Relative timer
    SleepFor,
    /// Absolute timer
    SleepUntil,
    /// Outbound HTTP request
    Call,
    /// Child workflow run
    Invoke,
    /// Wait for event
    Wait,
    /// Notify event
    Notify,
    /// Webhook registration
    Webhook,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Run => "Run",
            Self::SleepFor => "SleepFor",
            Self::SleepUntil => "SleepUntil",
            Self::Call => "Call",
            Self::Invoke => "Invoke",
            Self::Wait => "Wait",
            Self::Notify => "Notify",
            Self::Webhook => "Webhook",
        };
        f.write_str(name)
    }
}

/// Terminal failure recorded on a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    /// Kind of the error that failed the step
    pub error_type: String,
    /// Error message
    pub message: String,
}

impl StepFailure {
    /// Creates a new step failure.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

/// `callType` of a raw history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    /// A step continuation
    #[serde(rename = "step")]
    Step,
    /// A call going out to a third party
    #[serde(rename = "toCallback")]
    ToCallback,
    /// A third-party call's callback
    #[serde(rename = "fromCallback")]
    FromCallback,
}

impl CallType {
    /// Header value for this call type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::ToCallback => "toCallback",
            Self::FromCallback => "fromCallback",
        }
    }
}

/// One entry of a continuation body as delivered by the queue.
///
/// `body` is base64. Entry 0 holds the initial payload, later entries hold
/// JSON-encoded [`Step`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStep {
    /// Queue message id that produced this entry
    #[serde(default)]
    pub message_id: String,
    /// Base64-encoded entry body
    pub body: String,
    /// What kind of message produced this entry
    pub call_type: CallType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_step_wire_shape() {
        let step = Step::new(2, "nap", StepKind::SleepFor { sleep_for: 10 });
        let json: serde_json::Value = serde_json::to_value(&step).unwrap();
        assert_eq!(json["stepId"], 2);
        assert_eq!(json["stepName"], "nap");
        assert_eq!(json["stepType"], "SleepFor");
        assert_eq!(json["sleepFor"], 10);
        assert_eq!(json["concurrent"], 1);
        assert!(json.get("out").is_none());
        assert!(json.get("targetStep").is_none());
    }

    #[test]
    fn test_plan_step_wire_shape() {
        let step = Step::plan("a", StepKind::Run, 2, 3);
        assert!(step.is_plan());
        let json: serde_json::Value = serde_json::to_value(&step).unwrap();
        assert_eq!(json["stepId"], 0);
        assert_eq!(json["targetStep"], 3);
        assert_eq!(json["concurrent"], 2);
    }

    #[test]
    fn test_parse_wait_step_from_queue() {
        let json = r#"{
            "stepId": 4,
            "stepName": "approval",
            "stepType": "Wait",
            "waitEventId": "evt-1",
            "timeout": "1d",
            "waitTimeout": true,
            "concurrent": 1
        }"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.step_type(), StepType::Wait);
        match step.kind {
            StepKind::Wait { wait_event_id, wait_timeout, .. } => {
                assert_eq!(wait_event_id, "evt-1");
                assert_eq!(wait_timeout, Some(true));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_parse_step_with_error() {
        let json = r#"{"stepId":1,"stepName":"charge","stepType":"Run","concurrent":1,
            "error":{"errorType":"NonRetryableError","message":"card expired"}}"#;
        let step: Step = serde_json::from_str(json).unwrap();
        assert!(step.is_failed());
        assert_eq!(step.error.unwrap().error_type, "NonRetryableError");
    }

    #[test]
    fn test_missing_concurrent_defaults_to_one() {
        let step: Step =
            serde_json::from_str(r#"{"stepId":1,"stepName":"x","stepType":"Run","out":"1"}"#)
                .unwrap();
        assert_eq!(step.concurrent, 1);
        assert_eq!(step.out.as_deref(), Some("1"));
    }

    #[test]
    fn test_unknown_step_type_is_rejected() {
        let result: Result<Step, _> =
            serde_json::from_str(r#"{"stepId":1,"stepName":"x","stepType":"Teleport"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_raw_step_call_type() {
        let raw: RawStep =
            serde_json::from_str(r#"{"messageId":"m1","body":"e30=","callType":"fromCallback"}"#)
                .unwrap();
        assert_eq!(raw.call_type, CallType::FromCallback);
        assert_eq!(CallType::ToCallback.as_str(), "toCallback");
    }
}
