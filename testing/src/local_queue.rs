//! In-process queue for end-to-end workflow tests.
//!
//! [`LocalQueue`] implements [`QueueClient`] and delivers what it receives
//! to registered [`WorkflowHandler`]s, the way the real queue would:
//!
//! - it keeps one history per run and per failure routine, appends each
//!   continuation when it is first delivered, and sends the full history
//!   as the request body;
//! - it redelivers failed messages with `Upstash-Retried` until their
//!   retries run out, then sends the failure callback;
//! - it answers third-party calls from registered stubs and delivers the
//!   response to the call's callback;
//! - it holds waiters until an event is notified or the test expires them.
//!
//! Delays are not honored: a sleep is delivered as soon as it reaches the
//! front of the FIFO.
//!
//! # Examples
//!
//! ```ignore
//! use std::sync::Arc;
//! use upstash_workflow::serve;
//! use upstash_workflow_testing::LocalQueue;
//!
//! let queue = Arc::new(LocalQueue::new());
//! let handler = serve(my_workflow, queue.serve_options("https://app/wf"))?;
//! queue.register("https://app/wf", handler);
//!
//! let run_id = queue.trigger("https://app/wf", r#"{"order":7}"#).await?;
//! queue.run_until_idle().await?;
//! assert!(queue.completed(&run_id).is_some());
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Request};
use upstash_workflow::headers::{
    NON_RETRYABLE_ERROR_HEADER, RETRIED_HEADER, WORKFLOW_FAILURE_HEADER, WORKFLOW_ID_HEADER,
    WORKFLOW_INIT_HEADER,
};
use upstash_workflow::step::{CallType, RawStep};
use upstash_workflow::{
    FailureCallbackPayload, LogsQuery, LogsResponse, NotifyResponse, PublishRequest,
    PublishResponse, QueueClient, ReceiverSource, ServeOptions, Step, StepKind, WaitRequest,
    Waiter, WorkflowEnv, WorkflowError, WorkflowHandler,
};

use crate::error::TestError;
use crate::types::{CallStub, Delivery};

/// Base URL reported by the local queue.
pub const LOCAL_BASE_URL: &str = "https://qstash.local";

/// Deliveries processed by [`LocalQueue::run_until_idle`] before giving up.
pub const DEFAULT_DELIVERY_LIMIT: usize = 500;

#[derive(Debug, Clone)]
struct Message {
    id: String,
    request: PublishRequest,
    attempt: u32,
    /// Body delivered as is instead of as a history entry
    raw: bool,
    /// History snapshot taken at first delivery; retries reuse it
    snapshot: Option<String>,
}

#[derive(Debug, Clone)]
struct Waiting {
    event_id: String,
    url: String,
    headers: BTreeMap<String, String>,
    step: Step,
}

#[derive(Default)]
struct QueueState {
    handlers: HashMap<String, WorkflowHandler>,
    stubs: HashMap<String, CallStub>,
    pending: VecDeque<Message>,
    histories: HashMap<(String, bool), Vec<RawStep>>,
    waiters: Vec<Waiting>,
    deliveries: Vec<Delivery>,
    external: Vec<PublishRequest>,
    completed: HashMap<String, Option<String>>,
    duplicate_next: bool,
    next_id: u64,
}

impl QueueState {
    fn message_id(&mut self) -> String {
        self.next_id += 1;
        format!("msg_{}", self.next_id)
    }

    fn enqueue(&mut self, request: PublishRequest, mut raw: bool) -> String {
        let id = self.message_id();
        if request.header(WORKFLOW_INIT_HEADER) == Some("true") {
            raw = true;
            if let Some(run_id) = request.header(WORKFLOW_ID_HEADER) {
                self.histories.insert(
                    (run_id.to_string(), false),
                    vec![history_entry(&id, &request.body)],
                );
            }
        }
        self.pending.push_back(Message {
            id: id.clone(),
            request,
            attempt: 0,
            raw,
            snapshot: None,
        });
        id
    }
}

/// An in-process queue delivering to registered workflow handlers.
pub struct LocalQueue {
    state: Mutex<QueueState>,
    delivery_limit: usize,
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("LocalQueue")
            .field("endpoints", &state.handlers.keys().collect::<Vec<_>>())
            .field("pending", &state.pending.len())
            .field("deliveries", &state.deliveries.len())
            .finish()
    }
}

impl LocalQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            delivery_limit: DEFAULT_DELIVERY_LIMIT,
        }
    }

    /// Sets how many deliveries `run_until_idle` processes before failing.
    pub fn with_delivery_limit(mut self, limit: usize) -> Self {
        self.delivery_limit = limit;
        self
    }

    /// Options for a handler served at `url` through this queue.
    ///
    /// Signature verification is disabled and the environment is empty, so
    /// nothing leaks in from the process environment.
    pub fn serve_options(self: &Arc<Self>, url: &str) -> ServeOptions {
        ServeOptions {
            client: Some(self.clone()),
            receiver: ReceiverSource::Disabled,
            url: Some(url.to_string()),
            env: Some(WorkflowEnv::default()),
            ..Default::default()
        }
    }

    /// Routes messages addressed to `url` to `handler`.
    pub fn register(&self, url: impl Into<String>, handler: WorkflowHandler) {
        self.state.lock().unwrap().handlers.insert(url.into(), handler);
    }

    /// Answers third-party calls to `url` with `stub`.
    pub fn stub_call(&self, url: impl Into<String>, stub: CallStub) {
        self.state.lock().unwrap().stubs.insert(url.into(), stub);
    }

    /// Delivers the next continuation twice.
    pub fn duplicate_next_delivery(&self) {
        self.state.lock().unwrap().duplicate_next = true;
    }

    /// Starts a run by posting `payload` to the endpoint at `url`.
    ///
    /// Returns the run id the endpoint answered with. The run itself only
    /// progresses through [`run_until_idle`](Self::run_until_idle).
    pub async fn trigger(&self, url: &str, payload: &str) -> Result<String, TestError> {
        let handler = self.handler(url)?;
        let request = build_request(url, &BTreeMap::new(), payload.to_string())?;
        let response = handler.handle(request).await;
        let status = response.status().as_u16();
        let body = String::from_utf8_lossy(response.body()).into_owned();
        if status != 200 {
            return Err(TestError::unexpected_response(status, body));
        }
        let value: serde_json::Value = serde_json::from_str(&body)?;
        value["workflowRunId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TestError::unexpected_response(status, body))
    }

    /// Delivers pending messages until none are left.
    ///
    /// Returns the number of deliveries made.
    pub async fn run_until_idle(&self) -> Result<usize, TestError> {
        let mut delivered = 0;
        while let Some(message) = self.pop() {
            if delivered >= self.delivery_limit {
                return Err(TestError::DeliveryLimit(self.delivery_limit));
            }
            self.deliver(message).await?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Delivers only the next pending message. Returns false when idle.
    pub async fn step(&self) -> Result<bool, TestError> {
        match self.pop() {
            Some(message) => {
                self.deliver(message).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Notifies `event_id` with `data`, as an external system would.
    pub fn notify_event(&self, event_id: &str, data: &str) -> Vec<NotifyResponse> {
        let mut state = self.state.lock().unwrap();
        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiters)
            .into_iter()
            .partition(|w| w.event_id == event_id);
        state.waiters = rest;

        matching
            .into_iter()
            .map(|waiting| {
                let step = Step {
                    out: Some(STANDARD.encode(data)),
                    ..waiting.step
                };
                let url = waiting.url.clone();
                let id = enqueue_step(&mut state, &waiting.url, waiting.headers, &step);
                NotifyResponse {
                    waiter: Waiter { url, deadline: 0 },
                    message_id: id,
                    error: String::new(),
                }
            })
            .collect()
    }

    /// Expires every waiter, delivering its wait step with the timeout flag.
    pub fn expire_waiters(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let waiters = std::mem::take(&mut state.waiters);
        let count = waiters.len();
        for waiting in waiters {
            let mut step = waiting.step;
            if let StepKind::Wait { wait_timeout, .. } = &mut step.kind {
                *wait_timeout = Some(true);
            }
            step.out = None;
            enqueue_step(&mut state, &waiting.url, waiting.headers, &step);
        }
        count
    }

    /// Posts a request to a webhook URL created by `create_webhook`.
    pub fn post_webhook(&self, webhook_url: &str, method: &str, body: &str) -> Vec<NotifyResponse> {
        let event_id = webhook_url.rsplit('/').next().unwrap_or_default().to_string();
        let data = serde_json::json!({
            "method": method,
            "header": {},
            "body": STANDARD.encode(body),
        });
        self.notify_event(&event_id, &data.to_string())
    }

    /// Every delivery made so far, in order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().unwrap().deliveries.clone()
    }

    /// Messages sent to URLs without a handler or a call stub.
    pub fn external_messages(&self) -> Vec<PublishRequest> {
        self.state.lock().unwrap().external.clone()
    }

    /// Result recorded by `complete_run`, if the run completed.
    pub fn completed(&self, workflow_run_id: &str) -> Option<Option<String>> {
        self.state.lock().unwrap().completed.get(workflow_run_id).cloned()
    }

    /// Steps recorded for a run so far, excluding the initial payload.
    pub fn history(&self, workflow_run_id: &str) -> Vec<Step> {
        self.decoded_history(workflow_run_id, false)
    }

    /// Steps recorded by the failure routine of a run.
    pub fn failure_history(&self, workflow_run_id: &str) -> Vec<Step> {
        self.decoded_history(workflow_run_id, true)
    }

    /// Number of registered waiters.
    pub fn waiter_count(&self) -> usize {
        self.state.lock().unwrap().waiters.len()
    }

    /// Number of messages waiting for delivery.
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    fn decoded_history(&self, workflow_run_id: &str, failure: bool) -> Vec<Step> {
        let state = self.state.lock().unwrap();
        state
            .histories
            .get(&(workflow_run_id.to_string(), failure))
            .map(|entries| {
                entries
                    .iter()
                    .skip(1)
                    .filter_map(|entry| STANDARD.decode(&entry.body).ok())
                    .filter_map(|bytes| serde_json::from_slice(&bytes).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn handler(&self, url: &str) -> Result<WorkflowHandler, TestError> {
        self.state
            .lock()
            .unwrap()
            .handlers
            .get(url)
            .cloned()
            .ok_or_else(|| TestError::UnknownEndpoint(url.to_string()))
    }

    fn pop(&self) -> Option<Message> {
        self.state.lock().unwrap().pending.pop_front()
    }

    async fn deliver(&self, message: Message) -> Result<(), TestError> {
        let url = message.request.url.clone();
        let handler = self.state.lock().unwrap().handlers.get(&url).cloned();
        match handler {
            Some(handler) => self.deliver_to_handler(handler, message).await,
            None => {
                self.deliver_external(message);
                Ok(())
            }
        }
    }

    async fn deliver_to_handler(
        &self,
        handler: WorkflowHandler,
        mut message: Message,
    ) -> Result<(), TestError> {
        let body = match &message.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => {
                let body = self.first_delivery_body(&message)?;
                message.snapshot = Some(body.clone());
                body
            }
        };

        let mut headers = message.request.headers.clone();
        headers.insert(RETRIED_HEADER.to_string(), message.attempt.to_string());
        let request = build_request(&message.request.url, &headers, body.clone())?;
        let response = handler.handle(request).await;

        let status = response.status().as_u16();
        let response_body = String::from_utf8_lossy(response.body()).into_owned();
        let non_retryable = response.headers().contains_key(NON_RETRYABLE_ERROR_HEADER);
        tracing::debug!(
            message_id = %message.id,
            url = %message.request.url,
            attempt = message.attempt,
            status,
            "Delivered message"
        );

        let mut state = self.state.lock().unwrap();
        state.deliveries.push(Delivery {
            message_id: message.id.clone(),
            url: message.request.url.clone(),
            attempt: message.attempt,
            request_body: body.clone(),
            status,
            response_body: response_body.clone(),
        });

        if (200..300).contains(&status) {
            if !message.raw && std::mem::take(&mut state.duplicate_next) {
                state.pending.push_front(Message {
                    snapshot: None,
                    attempt: 0,
                    ..message
                });
            }
            return Ok(());
        }

        let retries = message.request.retries.unwrap_or(upstash_workflow::DEFAULT_RETRIES);
        if !non_retryable && message.attempt < retries {
            state.pending.push_back(Message {
                attempt: message.attempt + 1,
                ..message
            });
            return Ok(());
        }

        if let Some(target) = message.request.failure_callback.clone() {
            let payload = FailureCallbackPayload {
                status,
                header: response
                    .headers()
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.as_str().to_string(),
                            vec![v.to_str().unwrap_or_default().to_string()],
                        )
                    })
                    .collect(),
                body: Some(STANDARD.encode(&response_body)),
                url: Some(message.request.url.clone()),
                source_header: message
                    .request
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), vec![v.clone()]))
                    .collect(),
                source_body: Some(STANDARD.encode(&body)),
                workflow_run_id: message.request.header(WORKFLOW_ID_HEADER).map(str::to_string),
            };
            let callback_body = serde_json::to_string(&payload)?;
            let mut request = PublishRequest::new(target, callback_body.clone());
            request.headers = message.request.failure_callback_headers.clone();
            request.retries = message.request.retries;

            let id = state.message_id();
            if let Some(run_id) = payload.workflow_run_id.clone() {
                state
                    .histories
                    .insert((run_id, true), vec![history_entry(&id, &callback_body)]);
            }
            state.pending.push_back(Message {
                id,
                request,
                attempt: 0,
                raw: true,
                snapshot: None,
            });
        }
        Ok(())
    }

    /// Body of a message's first delivery. Continuations are appended to
    /// their run's history first.
    fn first_delivery_body(&self, message: &Message) -> Result<String, TestError> {
        if message.raw {
            return Ok(message.request.body.clone());
        }
        let run_id = message
            .request
            .header(WORKFLOW_ID_HEADER)
            .unwrap_or_default()
            .to_string();
        let failure = message.request.header(WORKFLOW_FAILURE_HEADER) == Some("true");

        let mut state = self.state.lock().unwrap();
        let history = state.histories.entry((run_id, failure)).or_default();
        if history.is_empty() {
            history.push(history_entry("msg_0", ""));
        }
        history.push(history_entry(&message.id, &message.request.body));
        Ok(serde_json::to_string(history)?)
    }

    /// Messages to URLs without a handler: third-party calls are answered
    /// from their stub; anything else is recorded.
    fn deliver_external(&self, message: Message) {
        let mut state = self.state.lock().unwrap();
        let Some(callback) = message.request.callback.clone() else {
            state.external.push(message.request);
            return;
        };

        let stub = state
            .stubs
            .get(&message.request.url)
            .cloned()
            .unwrap_or_else(|| CallStub::new(404, "not found"));
        let retries = message.request.retries.unwrap_or(0);
        let callback_body = serde_json::json!({
            "status": stub.status,
            "header": stub.headers,
            "body": STANDARD.encode(&stub.body),
            "retried": message.attempt,
            "maxRetries": retries,
        })
        .to_string();
        state.deliveries.push(Delivery {
            message_id: message.id.clone(),
            url: message.request.url.clone(),
            attempt: message.attempt,
            request_body: message.request.body.clone(),
            status: stub.status,
            response_body: stub.body.clone(),
        });

        let mut request = PublishRequest::new(callback, callback_body);
        request.headers = message.request.callback_headers.clone();
        state.enqueue(request, true);

        if !(200..300).contains(&stub.status) && message.attempt < retries {
            state.pending.push_back(Message {
                attempt: message.attempt + 1,
                ..message
            });
        }
    }
}

fn history_entry(message_id: &str, body: &str) -> RawStep {
    RawStep {
        message_id: message_id.to_string(),
        body: STANDARD.encode(body),
        call_type: CallType::Step,
    }
}

fn enqueue_step(
    state: &mut QueueState,
    url: &str,
    headers: BTreeMap<String, String>,
    step: &Step,
) -> String {
    let mut request = PublishRequest::new(url, serde_json::to_string(step).unwrap_or_default());
    request.headers = headers;
    state.enqueue(request, false)
}

fn build_request(
    url: &str,
    headers: &BTreeMap<String, String>,
    body: String,
) -> Result<Request<Bytes>, TestError> {
    let mut request = Request::builder()
        .method("POST")
        .uri(url)
        .body(Bytes::from(body))
        .map_err(|e| TestError::InvalidHeader(e.to_string()))?;
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TestError::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| TestError::InvalidHeader(name.to_string()))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

#[async_trait]
impl QueueClient for LocalQueue {
    fn base_url(&self) -> &str {
        LOCAL_BASE_URL
    }

    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse, WorkflowError> {
        let mut state = self.state.lock().unwrap();
        let id = state.enqueue(request, false);
        Ok(PublishResponse::new(id))
    }

    async fn batch(
        &self,
        requests: Vec<PublishRequest>,
    ) -> Result<Vec<PublishResponse>, WorkflowError> {
        let mut state = self.state.lock().unwrap();
        Ok(requests
            .into_iter()
            .map(|request| PublishResponse::new(state.enqueue(request, false)))
            .collect())
    }

    async fn wait(&self, request: WaitRequest) -> Result<(), WorkflowError> {
        self.state.lock().unwrap().waiters.push(Waiting {
            event_id: request.event_id,
            url: request.url,
            headers: request.headers,
            step: request.step,
        });
        Ok(())
    }

    async fn notify(&self, event_id: &str, data: &str) -> Result<Vec<NotifyResponse>, WorkflowError> {
        Ok(self.notify_event(event_id, data))
    }

    async fn logs(&self, _query: LogsQuery) -> Result<LogsResponse, WorkflowError> {
        Ok(LogsResponse::default())
    }

    async fn complete_run(
        &self,
        workflow_run_id: &str,
        result: Option<String>,
    ) -> Result<(), WorkflowError> {
        self.state
            .lock()
            .unwrap()
            .completed
            .insert(workflow_run_id.to_string(), result);
        Ok(())
    }
}
