//! Mock implementation of QueueClient for testing.
//!
//! The mock records every request a workflow makes and answers with
//! configurable responses, so a single invocation can be inspected without
//! any queue behind it.
//!
//! # Examples
//!
//! ```
//! use upstash_workflow_testing::MockQueueClient;
//! use upstash_workflow::{PublishResponse, WorkflowError};
//!
//! let client = MockQueueClient::new()
//!     .with_publish_response(Ok(PublishResponse::new("msg-1")))
//!     .with_publish_response(Err(WorkflowError::queue_retriable("unavailable", Some(503))));
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use upstash_workflow::{
    LogsQuery, LogsResponse, NotifyResponse, PublishRequest, PublishResponse, QueueClient,
    Step, WaitRequest, Waiter, WorkflowError,
};

/// Base URL reported by the mock.
pub const MOCK_BASE_URL: &str = "https://qstash.mock";

/// Record of a notify call made to the mock client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyCall {
    /// Event id that was notified
    pub event_id: String,
    /// Event data
    pub data: String,
}

/// Record of a complete_run call made to the mock client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRun {
    /// Run that completed
    pub workflow_run_id: String,
    /// Serialized result of the workflow function
    pub result: Option<String>,
}

/// Mock implementation of QueueClient for testing.
///
/// This mock client allows you to:
/// - Configure responses for publish, batch and notify calls
/// - Record every call for verification in tests
/// - Simulate queue errors
///
/// # Thread Safety
///
/// The mock uses internal mutexes, so it can be shared as a
/// [`SharedQueueClient`](upstash_workflow::SharedQueueClient).
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use upstash_workflow_testing::MockQueueClient;
/// use upstash_workflow::{PublishRequest, QueueClient};
///
/// # tokio_test::block_on(async {
/// let client = Arc::new(MockQueueClient::new());
/// client.publish(PublishRequest::new("https://app/wf", "{}")).await.unwrap();
///
/// let published = client.get_published();
/// assert_eq!(published.len(), 1);
/// assert_eq!(published[0].url, "https://app/wf");
/// # });
/// ```
#[derive(Default)]
pub struct MockQueueClient {
    publish_responses: Mutex<VecDeque<Result<PublishResponse, WorkflowError>>>,
    batch_errors: Mutex<VecDeque<WorkflowError>>,
    notify_responses: Mutex<VecDeque<Result<Vec<NotifyResponse>, WorkflowError>>>,
    logs: Mutex<Option<LogsResponse>>,
    published: Mutex<Vec<PublishRequest>>,
    batches: Mutex<Vec<Vec<PublishRequest>>>,
    waits: Mutex<Vec<WaitRequest>>,
    notifies: Mutex<Vec<NotifyCall>>,
    completed: Mutex<Vec<CompletedRun>>,
    log_queries: Mutex<Vec<LogsQuery>>,
}

impl MockQueueClient {
    /// Creates a mock that accepts every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a response for the next `publish` call.
    ///
    /// Responses are returned in the order they were added (FIFO). Once
    /// they are consumed, `publish` succeeds with generated message ids.
    pub fn with_publish_response(self, response: Result<PublishResponse, WorkflowError>) -> Self {
        self.publish_responses.lock().unwrap().push_back(response);
        self
    }

    /// Makes the next `batch` call fail with `error`.
    pub fn with_batch_error(self, error: WorkflowError) -> Self {
        self.batch_errors.lock().unwrap().push_back(error);
        self
    }

    /// Adds a response for the next `notify` call.
    pub fn with_notify_response(self, response: Result<Vec<NotifyResponse>, WorkflowError>) -> Self {
        self.notify_responses.lock().unwrap().push_back(response);
        self
    }

    /// Sets the run log returned by `logs`.
    pub fn with_logs(self, logs: LogsResponse) -> Self {
        *self.logs.lock().unwrap() = Some(logs);
        self
    }

    /// Gets every single-message publish.
    pub fn get_published(&self) -> Vec<PublishRequest> {
        self.published.lock().unwrap().clone()
    }

    /// Gets every batch publish.
    pub fn get_batches(&self) -> Vec<Vec<PublishRequest>> {
        self.batches.lock().unwrap().clone()
    }

    /// Gets every waiter registration.
    pub fn get_waits(&self) -> Vec<WaitRequest> {
        self.waits.lock().unwrap().clone()
    }

    /// Gets every notify call.
    pub fn get_notifies(&self) -> Vec<NotifyCall> {
        self.notifies.lock().unwrap().clone()
    }

    /// Gets every completed run.
    pub fn get_completed(&self) -> Vec<CompletedRun> {
        self.completed.lock().unwrap().clone()
    }

    /// Gets every run-log query.
    pub fn get_log_queries(&self) -> Vec<LogsQuery> {
        self.log_queries.lock().unwrap().clone()
    }

    /// Number of submission rounds: publishes, batches and waiter registrations.
    pub fn submission_count(&self) -> usize {
        self.published.lock().unwrap().len()
            + self.batches.lock().unwrap().len()
            + self.waits.lock().unwrap().len()
    }

    /// Steps carried by single-message publishes, in order.
    ///
    /// Publishes whose body is not a step (triggers, third-party calls)
    /// are skipped.
    pub fn published_steps(&self) -> Vec<Step> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter_map(|request| serde_json::from_str(&request.body).ok())
            .collect()
    }

    /// Clears every recorded call, keeping configured responses.
    pub fn clear_calls(&self) {
        self.published.lock().unwrap().clear();
        self.batches.lock().unwrap().clear();
        self.waits.lock().unwrap().clear();
        self.notifies.lock().unwrap().clear();
        self.completed.lock().unwrap().clear();
        self.log_queries.lock().unwrap().clear();
    }
}

impl std::fmt::Debug for MockQueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockQueueClient")
            .field("published", &self.published.lock().unwrap().len())
            .field("batches", &self.batches.lock().unwrap().len())
            .field("waits", &self.waits.lock().unwrap().len())
            .finish()
    }
}

#[async_trait]
impl QueueClient for MockQueueClient {
    fn base_url(&self) -> &str {
        MOCK_BASE_URL
    }

    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse, WorkflowError> {
        let configured = self.publish_responses.lock().unwrap().pop_front();
        if let Some(Err(error)) = configured {
            return Err(error);
        }
        let mut published = self.published.lock().unwrap();
        published.push(request);
        Ok(match configured {
            Some(Ok(response)) => response,
            _ => PublishResponse::new(format!("msg-{}", published.len())),
        })
    }

    async fn batch(
        &self,
        requests: Vec<PublishRequest>,
    ) -> Result<Vec<PublishResponse>, WorkflowError> {
        if let Some(error) = self.batch_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut batches = self.batches.lock().unwrap();
        let responses = (0..requests.len())
            .map(|i| PublishResponse::new(format!("batch-{}-msg-{}", batches.len(), i)))
            .collect();
        batches.push(requests);
        Ok(responses)
    }

    async fn wait(&self, request: WaitRequest) -> Result<(), WorkflowError> {
        self.waits.lock().unwrap().push(request);
        Ok(())
    }

    async fn notify(&self, event_id: &str, data: &str) -> Result<Vec<NotifyResponse>, WorkflowError> {
        self.notifies.lock().unwrap().push(NotifyCall {
            event_id: event_id.to_string(),
            data: data.to_string(),
        });
        match self.notify_responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(vec![NotifyResponse {
                waiter: Waiter {
                    url: "https://app/workflow".to_string(),
                    deadline: 0,
                },
                message_id: "notify-msg".to_string(),
                error: String::new(),
            }]),
        }
    }

    async fn logs(&self, query: LogsQuery) -> Result<LogsResponse, WorkflowError> {
        self.log_queries.lock().unwrap().push(query);
        Ok(self.logs.lock().unwrap().clone().unwrap_or_default())
    }

    async fn complete_run(
        &self,
        workflow_run_id: &str,
        result: Option<String>,
    ) -> Result<(), WorkflowError> {
        self.completed.lock().unwrap().push(CompletedRun {
            workflow_run_id: workflow_run_id.to_string(),
            result,
        });
        Ok(())
    }
}
