//! Shared test utilities for integration tests.
//!
//! This module provides request builders, handler fixtures and proptest
//! strategies used across integration tests.

#![allow(dead_code)] // These utilities are used by other integration test files

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Request, Response};
use proptest::prelude::*;
use serde::Serialize;

use upstash_workflow::headers::{
    RETRIED_HEADER, WORKFLOW_FAILURE_HEADER, WORKFLOW_ID_HEADER, WORKFLOW_INIT_HEADER,
};
use upstash_workflow::step::{CallType, RawStep};
use upstash_workflow::{
    serve, ReceiverSource, ServeOptions, Step, StepKind, WorkflowContext, WorkflowEnv,
    WorkflowHandler, WorkflowResult,
};
use upstash_workflow_testing::{LocalQueue, MockQueueClient};

// =============================================================================
// Constants
// =============================================================================

pub const WORKFLOW_URL: &str = "https://app.test/api/workflow";
pub const RUN_ID: &str = "wfr_test-run";
pub const PAYLOAD: &str = r#"{"order":42}"#;

// =============================================================================
// Handler fixtures
// =============================================================================

/// Options for a handler backed by `mock`, with verification disabled.
pub fn mock_options(mock: &Arc<MockQueueClient>) -> ServeOptions {
    ServeOptions {
        client: Some(mock.clone()),
        receiver: ReceiverSource::Disabled,
        url: Some(WORKFLOW_URL.to_string()),
        env: Some(WorkflowEnv::default()),
        ..Default::default()
    }
}

/// Serves `route` against a fresh mock client.
pub fn mock_handler<F, Fut, T>(route: F) -> (Arc<MockQueueClient>, WorkflowHandler)
where
    F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkflowResult<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let mock = Arc::new(MockQueueClient::new());
    let handler = serve(route, mock_options(&mock)).expect("handler builds");
    (mock, handler)
}

/// Serves `route` at [`WORKFLOW_URL`] through a fresh local queue.
pub fn local_handler<F, Fut, T>(route: F, configure: impl FnOnce(&mut ServeOptions)) -> Arc<LocalQueue>
where
    F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkflowResult<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let queue = Arc::new(LocalQueue::new());
    let mut options = queue.serve_options(WORKFLOW_URL);
    configure(&mut options);
    let handler = serve(route, options).expect("handler builds");
    queue.register(WORKFLOW_URL, handler);
    queue
}

// =============================================================================
// Request builders
// =============================================================================

fn request(headers: &[(&str, String)], body: String) -> Request<Bytes> {
    let mut request = Request::builder()
        .method("POST")
        .uri(WORKFLOW_URL)
        .body(Bytes::from(body))
        .unwrap();
    for (name, value) in headers {
        request.headers_mut().insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    request
}

/// A request from a caller starting a new run.
pub fn trigger_request(payload: &str) -> Request<Bytes> {
    request(&[], payload.to_string())
}

/// The first delivery of a run.
pub fn init_request(payload: &str) -> Request<Bytes> {
    request(
        &[
            (WORKFLOW_ID_HEADER, RUN_ID.to_string()),
            (WORKFLOW_INIT_HEADER, "true".to_string()),
        ],
        payload.to_string(),
    )
}

/// A continuation carrying `steps` after the initial payload.
pub fn continuation_request(steps: &[Step]) -> Request<Bytes> {
    continuation_request_with(steps, &[])
}

/// A continuation with extra headers.
pub fn continuation_request_with(steps: &[Step], extra: &[(&str, String)]) -> Request<Bytes> {
    let mut headers = vec![
        (WORKFLOW_ID_HEADER, RUN_ID.to_string()),
        (WORKFLOW_INIT_HEADER, "false".to_string()),
    ];
    headers.extend(extra.iter().cloned());
    request(&headers, history_body(PAYLOAD, steps))
}

/// A redelivery of a continuation after `retried` failed attempts.
pub fn retried_request(steps: &[Step], retried: u32) -> Request<Bytes> {
    continuation_request_with(steps, &[(RETRIED_HEADER, retried.to_string())])
}

/// A continuation of the failure routine.
pub fn failure_continuation(callback_body: &str, steps: &[Step]) -> Request<Bytes> {
    request(
        &[
            (WORKFLOW_ID_HEADER, RUN_ID.to_string()),
            (WORKFLOW_FAILURE_HEADER, "true".to_string()),
        ],
        history_body(callback_body, steps),
    )
}

/// Serializes a continuation body: the payload entry, then one entry per step.
pub fn history_body(payload: &str, steps: &[Step]) -> String {
    let mut entries = vec![RawStep {
        message_id: "msg_0".to_string(),
        body: STANDARD.encode(payload),
        call_type: CallType::Step,
    }];
    for (i, step) in steps.iter().enumerate() {
        entries.push(RawStep {
            message_id: format!("msg_{}", i + 1),
            body: STANDARD.encode(serde_json::to_string(step).unwrap()),
            call_type: CallType::Step,
        });
    }
    serde_json::to_string(&entries).unwrap()
}

// =============================================================================
// Step fixtures
// =============================================================================

pub fn run_result<T: Serialize>(step_id: u32, name: &str, out: &T) -> Step {
    Step::new(step_id, name, StepKind::Run).with_out(serde_json::to_string(out).unwrap())
}

pub fn group_result<T: Serialize>(step_id: u32, name: &str, out: &T, concurrent: u32) -> Step {
    run_result(step_id, name, out).with_concurrent(concurrent)
}

pub fn run_plan(name: &str, concurrent: u32, target: u32) -> Step {
    Step::plan(name, StepKind::Run, concurrent, target)
}

// =============================================================================
// Response helpers
// =============================================================================

pub fn body_text(response: &Response<Bytes>) -> String {
    String::from_utf8_lossy(response.body()).into_owned()
}

pub fn body_json(response: &Response<Bytes>) -> serde_json::Value {
    serde_json::from_slice(response.body()).unwrap()
}

/// Decodes the step carried by a published continuation.
pub fn published_step(body: &str) -> Step {
    serde_json::from_str(body).unwrap()
}

pub fn headers_of(pairs: &BTreeMap<String, String>, name: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

// =============================================================================
// Proptest Strategies
// =============================================================================

/// Distinct step names, one to `max` of them.
pub fn step_names_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z]{1,8}", 1..=max)
        .prop_map(|names| names.into_iter().collect())
}

/// JSON values that round-trip exactly through serde_json.
pub fn json_value_strategy() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::Bool),
        any::<i64>().prop_map(|n| serde_json::Value::from(n)),
        "[a-zA-Z0-9 ]{0,12}".prop_map(serde_json::Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|map| serde_json::Value::Object(map.into_iter().collect())),
        ]
    })
}
