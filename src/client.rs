//! Queue client used to persist workflow progress.
//!
//! This module defines the [`QueueClient`] trait and [`QStashClient`], its
//! implementation over the queue's REST API. The engine never talks to
//! the network any other way: step continuations, waits, notifications,
//! run-log queries and run completion all go through this trait, which
//! keeps region selection and test mocking in one seam.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{env_keys, WorkflowEnv};
use crate::duration::Duration;
use crate::error::WorkflowError;
use crate::step::Step;

/// Default queue API endpoint.
pub const DEFAULT_QSTASH_URL: &str = "https://qstash.upstash.io";

/// Headers understood by the queue itself rather than forwarded to the destination.
const NATIVE_HEADERS: &[&str] = &[
    "upstash-workflow-runid",
    "upstash-workflow-init",
    "upstash-workflow-url",
    "upstash-workflow-calltype",
    "upstash-workflow-sdk-version",
    "upstash-feature-set",
    "upstash-method",
];

/// Trait for communicating with the queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Base URL of the queue API; webhook URLs are built from it.
    fn base_url(&self) -> &str;

    /// Publishes one message.
    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse, WorkflowError>;

    /// Publishes several messages in one request.
    async fn batch(
        &self,
        requests: Vec<PublishRequest>,
    ) -> Result<Vec<PublishResponse>, WorkflowError>;

    /// Registers a waiter for an event.
    async fn wait(&self, request: WaitRequest) -> Result<(), WorkflowError>;

    /// Delivers event data to every waiter of `event_id`.
    async fn notify(
        &self,
        event_id: &str,
        data: &str,
    ) -> Result<Vec<NotifyResponse>, WorkflowError>;

    /// Queries the run log.
    async fn logs(&self, query: LogsQuery) -> Result<LogsResponse, WorkflowError>;

    /// Marks a run as finished and records its result.
    async fn complete_run(
        &self,
        workflow_run_id: &str,
        result: Option<String>,
    ) -> Result<(), WorkflowError>;
}

/// Type alias for a shared QueueClient.
pub type SharedQueueClient = Arc<dyn QueueClient>;

/// One message to publish.
///
/// `headers` are delivered with the message, `callback_headers` with the
/// callback of a third-party call, and `failure_callback_headers` with the
/// failure callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRequest {
    /// Destination URL
    pub url: String,
    /// HTTP method used for delivery; POST when absent
    pub method: Option<String>,
    /// Message body
    pub body: String,
    /// Headers delivered to the destination
    pub headers: BTreeMap<String, String>,
    /// Delay before delivery
    pub delay: Option<Duration>,
    /// Unix timestamp before which the message is not delivered
    pub not_before: Option<i64>,
    /// Delivery retries
    pub retries: Option<u32>,
    /// Retry delay expression
    pub retry_delay: Option<String>,
    /// Delivery timeout
    pub timeout: Option<Duration>,
    /// URL receiving the destination's response
    pub callback: Option<String>,
    /// Headers delivered with the callback
    pub callback_headers: BTreeMap<String, String>,
    /// URL notified when delivery fails for good
    pub failure_callback: Option<String>,
    /// Headers delivered with the failure callback
    pub failure_callback_headers: BTreeMap<String, String>,
}

impl PublishRequest {
    /// Creates a request posting `body` to `url`.
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Returns a delivered header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response to a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Id of the created message
    pub message_id: String,
    /// Whether the queue dropped the message as a duplicate
    #[serde(default)]
    pub deduplicated: bool,
}

impl PublishResponse {
    /// Creates a response for the given message id.
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            deduplicated: false,
        }
    }
}

/// Request registering a waiter for an event.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitRequest {
    /// Event id to wait for
    pub event_id: String,
    /// Workflow URL notified when the event arrives
    pub url: String,
    /// How long to wait
    pub timeout: Duration,
    /// Workflow URL notified when the wait expires
    pub timeout_url: String,
    /// Headers delivered on either notification
    pub headers: BTreeMap<String, String>,
    /// The wait step to append to history
    pub step: Step,
}

/// A waiter reached by a notify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waiter {
    /// Workflow URL of the waiting run
    #[serde(default)]
    pub url: String,
    /// Unix timestamp at which the wait expires
    #[serde(default)]
    pub deadline: i64,
}

/// Result of notifying one waiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyResponse {
    /// The waiter that was notified
    pub waiter: Waiter,
    /// Message created for the waiter
    #[serde(default)]
    pub message_id: String,
    /// Error, if notifying this waiter failed
    #[serde(default)]
    pub error: String,
}

/// Run-log query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogsQuery {
    /// Restrict to one run
    pub workflow_run_id: Option<String>,
    /// Pagination cursor from a previous response
    pub cursor: Option<String>,
    /// Maximum number of runs
    pub count: Option<u32>,
    /// Restrict to runs in this state (e.g. `RUN_FAILED`)
    pub state: Option<String>,
}

/// Run-log page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    /// Cursor for the next page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Runs on this page
    #[serde(default)]
    pub runs: Vec<RunLog>,
}

/// One run in the run log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    /// Run id
    pub workflow_run_id: String,
    /// Workflow URL
    #[serde(default)]
    pub workflow_url: String,
    /// `RUN_STARTED`, `RUN_SUCCESS`, `RUN_FAILED` or `RUN_CANCELED`
    #[serde(default)]
    pub workflow_state: String,
    /// Step groups in execution order
    #[serde(default)]
    pub steps: Vec<StepGroupLog>,
}

impl RunLog {
    /// Returns the most recent step whose state reports a failure.
    pub fn failed_step(&self) -> Option<&StepLog> {
        self.steps
            .iter()
            .flat_map(|group| group.steps.iter())
            .filter(|step| step.state.contains("FAIL") || step.state.contains("RETRY"))
            .last()
    }
}

/// A sequential step or a parallel group in the run log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepGroupLog {
    /// `sequential`, `parallel` or `next`
    #[serde(rename = "type", default)]
    pub group_type: String,
    /// Steps in the group
    #[serde(default)]
    pub steps: Vec<StepLog>,
}

/// One step in the run log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLog {
    /// Step id, absent for pending steps
    #[serde(default)]
    pub step_id: Option<u32>,
    /// Step name
    #[serde(default)]
    pub step_name: String,
    /// Step type
    #[serde(default)]
    pub step_type: String,
    /// Step state, e.g. `STEP_SUCCESS` or `STEP_FAILED`
    #[serde(default)]
    pub state: String,
    /// Recorded output
    #[serde(default)]
    pub out: Option<serde_json::Value>,
}

/// Configuration for [`QStashClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QStashClientConfig {
    /// API base URL
    pub base_url: String,
    /// Bearer token
    pub token: String,
}

impl QStashClientConfig {
    /// Creates a config for the default endpoint.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_QSTASH_URL.to_string(),
            token: token.into(),
        }
    }

    /// Reads `QSTASH_URL` / `QSTASH_TOKEN`, optionally with a region prefix.
    pub fn from_env(env: &WorkflowEnv, prefix: Option<&str>) -> Result<Self, WorkflowError> {
        let lookup = |key: &str| match prefix {
            Some(p) => env.get_prefixed(p, key),
            None => env.get(key),
        };
        let token = lookup(env_keys::QSTASH_TOKEN).ok_or_else(|| {
            WorkflowError::validation(format!(
                "missing {}",
                prefixed_name(prefix, env_keys::QSTASH_TOKEN)
            ))
        })?;
        let base_url = lookup(env_keys::QSTASH_URL).unwrap_or(DEFAULT_QSTASH_URL);
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

pub(crate) fn prefixed_name(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(p) => format!("{}_{}", p, key),
        None => key.to_string(),
    }
}

/// Queue client over the REST API.
pub struct QStashClient {
    config: QStashClientConfig,
    http_client: reqwest::Client,
}

impl QStashClient {
    /// Creates a client from a config.
    pub fn new(config: QStashClientConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    /// Creates a client for the default endpoint.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self::new(QStashClientConfig::new(token))
    }

    /// Creates a client from the environment.
    pub fn from_env(env: &WorkflowEnv, prefix: Option<&str>) -> Result<Self, WorkflowError> {
        Ok(Self::new(QStashClientConfig::from_env(env, prefix)?))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    fn render_headers(request: &PublishRequest) -> Vec<(String, String)> {
        let mut rendered = Vec::new();

        for (name, value) in &request.headers {
            rendered.push((forward_name("Upstash-", "Upstash-Forward-", name), value.clone()));
        }
        for (name, value) in &request.callback_headers {
            rendered.push((
                forward_name("Upstash-Callback-", "Upstash-Callback-Forward-", name),
                value.clone(),
            ));
        }
        for (name, value) in &request.failure_callback_headers {
            rendered.push((
                forward_name(
                    "Upstash-Failure-Callback-",
                    "Upstash-Failure-Callback-Forward-",
                    name,
                ),
                value.clone(),
            ));
        }

        if let Some(method) = &request.method {
            rendered.push(("Upstash-Method".to_string(), method.clone()));
        }
        if let Some(delay) = request.delay {
            rendered.push(("Upstash-Delay".to_string(), delay.to_queue_string()));
        }
        if let Some(not_before) = request.not_before {
            rendered.push(("Upstash-Not-Before".to_string(), not_before.to_string()));
        }
        if let Some(retries) = request.retries {
            rendered.push(("Upstash-Retries".to_string(), retries.to_string()));
        }
        if let Some(retry_delay) = &request.retry_delay {
            rendered.push(("Upstash-Retry-Delay".to_string(), retry_delay.clone()));
        }
        if let Some(timeout) = request.timeout {
            rendered.push(("Upstash-Timeout".to_string(), timeout.to_queue_string()));
        }
        if let Some(callback) = &request.callback {
            rendered.push(("Upstash-Callback".to_string(), callback.clone()));
        }
        if let Some(failure_callback) = &request.failure_callback {
            rendered.push(("Upstash-Failure-Callback".to_string(), failure_callback.clone()));
        }
        rendered
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<bytes::Bytes, WorkflowError> {
        let response = request
            .bearer_auth(&self.config.token)
            .send()
            .await
            .map_err(|e| WorkflowError::Queue {
                message: format!("{} request failed: {}", operation, e),
                status: None,
                is_retriable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            WorkflowError::queue_retriable(format!("Failed to read {} response: {}", operation, e), None)
        })?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&body).to_string();
            return Err(classify_failure(status.as_u16(), operation, &message));
        }
        Ok(body)
    }
}

/// Maps a failed queue response to an error kind.
///
/// Size and quota rejections become [`WorkflowError::Quota`] so they are
/// never retried.
pub(crate) fn classify_failure(status: u16, operation: &str, message: &str) -> WorkflowError {
    let lowered = message.to_ascii_lowercase();
    let mentions_limit = lowered.contains("quota")
        || lowered.contains("limit")
        || lowered.contains("too large")
        || lowered.contains("exceeds");

    if status == 413 || status == 412 || (status == 429 && mentions_limit) {
        return WorkflowError::Quota {
            message: format!("{} rejected ({}): {}", operation, status, message),
        };
    }

    let is_retriable = status == 429 || status >= 500;
    WorkflowError::Queue {
        message: format!("{} returned {}: {}", operation, status, message),
        status: Some(status),
        is_retriable,
    }
}

fn forward_name(native_prefix: &str, forward_prefix: &str, name: &str) -> String {
    let lowered = name.to_ascii_lowercase();
    if NATIVE_HEADERS.contains(&lowered.as_str()) {
        // Upstash-Workflow-RunId -> Upstash-Callback-Workflow-RunId
        let rest = &name["Upstash-".len()..];
        format!("{}{}", native_prefix, rest)
    } else {
        format!("{}{}", forward_prefix, name)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchEntry {
    destination: String,
    headers: HashMap<String, String>,
    body: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WaitRequestBody<'a> {
    url: &'a str,
    timeout: String,
    timeout_url: &'a str,
    timeout_headers: HashMap<String, Vec<String>>,
    step: &'a Step,
}

#[async_trait]
impl QueueClient for QStashClient {
    fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse, WorkflowError> {
        let mut builder = self
            .http_client
            .post(self.endpoint(&format!("v2/publish/{}", request.url)))
            .body(request.body.clone());
        for (name, value) in Self::render_headers(&request) {
            builder = builder.header(name, value);
        }

        let body = self.send(builder, "publish").await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn batch(
        &self,
        requests: Vec<PublishRequest>,
    ) -> Result<Vec<PublishResponse>, WorkflowError> {
        let entries: Vec<BatchEntry> = requests
            .iter()
            .map(|request| BatchEntry {
                destination: request.url.clone(),
                headers: Self::render_headers(request).into_iter().collect(),
                body: request.body.clone(),
            })
            .collect();

        let builder = self
            .http_client
            .post(self.endpoint("v2/batch"))
            .json(&entries);
        let body = self.send(builder, "batch").await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn wait(&self, request: WaitRequest) -> Result<(), WorkflowError> {
        let timeout_headers = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), vec![v.clone()]))
            .collect();
        let payload = WaitRequestBody {
            url: &request.url,
            timeout: request.timeout.to_queue_string(),
            timeout_url: &request.timeout_url,
            timeout_headers,
            step: &request.step,
        };

        let path = format!("v2/wait/{}", urlencoding::encode(&request.event_id));
        let builder = self.http_client.post(self.endpoint(&path)).json(&payload);
        self.send(builder, "wait").await?;
        Ok(())
    }

    async fn notify(
        &self,
        event_id: &str,
        data: &str,
    ) -> Result<Vec<NotifyResponse>, WorkflowError> {
        let path = format!("v2/notify/{}", urlencoding::encode(event_id));
        let builder = self
            .http_client
            .post(self.endpoint(&path))
            .body(data.to_string());
        let body = self.send(builder, "notify").await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn logs(&self, query: LogsQuery) -> Result<LogsResponse, WorkflowError> {
        let mut params = Vec::new();
        if let Some(id) = &query.workflow_run_id {
            params.push(format!("workflowRunId={}", urlencoding::encode(id)));
        }
        if let Some(cursor) = &query.cursor {
            params.push(format!("cursor={}", urlencoding::encode(cursor)));
        }
        if let Some(count) = query.count {
            params.push(format!("count={}", count));
        }
        if let Some(state) = &query.state {
            params.push(format!("state={}", urlencoding::encode(state)));
        }

        let mut url = self.endpoint("v2/workflows/logs");
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }
        let body = self.send(self.http_client.get(url), "logs").await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn complete_run(
        &self,
        workflow_run_id: &str,
        result: Option<String>,
    ) -> Result<(), WorkflowError> {
        let path = format!(
            "v2/workflows/runs/{}?cancel=false",
            urlencoding::encode(workflow_run_id)
        );
        let builder = self
            .http_client
            .delete(self.endpoint(&path))
            .body(result.unwrap_or_default());
        self.send(builder, "complete run").await?;
        Ok(())
    }
}

/// A recording QueueClient for unit tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MockQueueClient {
    pub published: std::sync::Mutex<Vec<PublishRequest>>,
    pub batches: std::sync::Mutex<Vec<Vec<PublishRequest>>>,
    pub waits: std::sync::Mutex<Vec<WaitRequest>>,
    pub notified: std::sync::Mutex<Vec<(String, String)>>,
    pub completed: std::sync::Mutex<Vec<(String, Option<String>)>>,
    pub publish_error: std::sync::Mutex<Option<WorkflowError>>,
    pub logs_response: std::sync::Mutex<Option<LogsResponse>>,
}

#[cfg(test)]
impl MockQueueClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publish_error(self, error: WorkflowError) -> Self {
        *self.publish_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_logs(self, logs: LogsResponse) -> Self {
        *self.logs_response.lock().unwrap() = Some(logs);
        self
    }

    pub fn published(&self) -> Vec<PublishRequest> {
        self.published.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<Vec<PublishRequest>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn waits(&self) -> Vec<WaitRequest> {
        self.waits.lock().unwrap().clone()
    }

    /// Number of submission rounds (publishes, batches and waits).
    pub fn submission_count(&self) -> usize {
        self.published.lock().unwrap().len()
            + self.batches.lock().unwrap().len()
            + self.waits.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl QueueClient for MockQueueClient {
    fn base_url(&self) -> &str {
        "https://qstash.test"
    }

    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse, WorkflowError> {
        if let Some(error) = self.publish_error.lock().unwrap().take() {
            return Err(error);
        }
        let mut published = self.published.lock().unwrap();
        published.push(request);
        Ok(PublishResponse::new(format!("msg-{}", published.len())))
    }

    async fn batch(
        &self,
        requests: Vec<PublishRequest>,
    ) -> Result<Vec<PublishResponse>, WorkflowError> {
        let responses = (0..requests.len())
            .map(|i| PublishResponse::new(format!("batch-msg-{}", i)))
            .collect();
        self.batches.lock().unwrap().push(requests);
        Ok(responses)
    }

    async fn wait(&self, request: WaitRequest) -> Result<(), WorkflowError> {
        self.waits.lock().unwrap().push(request);
        Ok(())
    }

    async fn notify(
        &self,
        event_id: &str,
        data: &str,
    ) -> Result<Vec<NotifyResponse>, WorkflowError> {
        self.notified
            .lock()
            .unwrap()
            .push((event_id.to_string(), data.to_string()));
        Ok(vec![NotifyResponse {
            waiter: Waiter {
                url: "https://app/workflow".to_string(),
                deadline: 0,
            },
            message_id: "notify-msg".to_string(),
            error: String::new(),
        }])
    }

    async fn logs(&self, _query: LogsQuery) -> Result<LogsResponse, WorkflowError> {
        Ok(self.logs_response.lock().unwrap().clone().unwrap_or_default())
    }

    async fn complete_run(
        &self,
        workflow_run_id: &str,
        result: Option<String>,
    ) -> Result<(), WorkflowError> {
        self.completed
            .lock()
            .unwrap()
            .push((workflow_run_id.to_string(), result));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_size_limit_as_quota() {
        let error = classify_failure(413, "publish", "Request too large");
        assert!(matches!(error, WorkflowError::Quota { .. }));
        assert!(error.is_non_retryable());
    }

    #[test]
    fn test_classify_quota_429() {
        let error = classify_failure(429, "publish", "daily quota exceeded");
        assert!(matches!(error, WorkflowError::Quota { .. }));
    }

    #[test]
    fn test_classify_plain_429_is_retriable() {
        let error = classify_failure(429, "publish", "slow down");
        assert!(matches!(error, WorkflowError::Queue { is_retriable: true, .. }));
    }

    #[test]
    fn test_classify_server_error_is_retriable() {
        let error = classify_failure(503, "batch", "unavailable");
        assert!(matches!(
            error,
            WorkflowError::Queue { is_retriable: true, status: Some(503), .. }
        ));
        let error = classify_failure(400, "batch", "bad destination");
        assert!(error.is_non_retryable());
    }

    #[test]
    fn test_render_headers_splits_native_and_forwarded() {
        let mut request = PublishRequest::new("https://app/wf", "{}");
        request
            .headers
            .insert("Upstash-Workflow-RunId".to_string(), "wfr_1".to_string());
        request
            .headers
            .insert("Upstash-Workflow-Invoke".to_string(), "true".to_string());
        request
            .callback_headers
            .insert("Upstash-Workflow-CallType".to_string(), "fromCallback".to_string());
        request
            .failure_callback_headers
            .insert("Upstash-Workflow-Is-Failure".to_string(), "true".to_string());
        request.delay = Some(Duration::from_seconds(10));
        request.retries = Some(3);

        let rendered: HashMap<String, String> =
            QStashClient::render_headers(&request).into_iter().collect();
        assert_eq!(rendered["Upstash-Workflow-RunId"], "wfr_1");
        assert_eq!(rendered["Upstash-Forward-Upstash-Workflow-Invoke"], "true");
        assert_eq!(rendered["Upstash-Callback-Workflow-CallType"], "fromCallback");
        assert_eq!(
            rendered["Upstash-Failure-Callback-Forward-Upstash-Workflow-Is-Failure"],
            "true"
        );
        assert_eq!(rendered["Upstash-Delay"], "10s");
        assert_eq!(rendered["Upstash-Retries"], "3");
    }

    #[test]
    fn test_config_from_env() {
        let env = WorkflowEnv::from_pairs([
            ("EU_CENTRAL_1_QSTASH_TOKEN", "eu-token"),
            ("EU_CENTRAL_1_QSTASH_URL", "https://eu.qstash/"),
        ]);
        let config = QStashClientConfig::from_env(&env, Some("EU_CENTRAL_1")).unwrap();
        assert_eq!(config.token, "eu-token");
        assert_eq!(config.base_url, "https://eu.qstash");
        assert!(QStashClientConfig::from_env(&env, None).is_err());
    }

    #[test]
    fn test_logs_response_failed_step() {
        let json = r#"{"runs":[{"workflowRunId":"wfr_1","workflowState":"RUN_FAILED",
            "steps":[{"type":"sequential","steps":[{"stepId":1,"stepName":"ok","stepType":"Run","state":"STEP_SUCCESS"}]},
                     {"type":"sequential","steps":[{"stepId":2,"stepName":"charge","stepType":"Run","state":"STEP_FAILED"}]}]}]}"#;
        let logs: LogsResponse = serde_json::from_str(json).unwrap();
        let failed = logs.runs[0].failed_step().unwrap();
        assert_eq!(failed.step_name, "charge");
    }

    #[tokio::test]
    async fn test_mock_client_records_publishes() {
        let client = MockQueueClient::new();
        let response = client
            .publish(PublishRequest::new("https://app", "{}"))
            .await
            .unwrap();
        assert_eq!(response.message_id, "msg-1");
        assert_eq!(client.published().len(), 1);
        assert_eq!(client.submission_count(), 1);
    }
}
