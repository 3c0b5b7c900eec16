//! Configuration types for serving workflows and shaping steps.
//!
//! Options are plain structs with public fields and a `Default`, so the
//! usual way to build them is struct-update syntax:
//!
//! ```rust,ignore
//! let options = ServeOptions {
//!     retries: 5,
//!     failure_url: Some("https://example.com/failed".to_string()),
//!     ..Default::default()
//! };
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;

use crate::client::SharedQueueClient;
use crate::context::WorkflowContext;
use crate::duration::Duration;
use crate::error::{WorkflowError, WorkflowResult};
use crate::middleware::WorkflowMiddleware;
use crate::receiver::SharedReceiver;

/// Retries configured on continuation messages when none are given.
pub const DEFAULT_RETRIES: u32 = 3;

/// Environment variables read when building clients and receivers.
pub mod env_keys {
    /// Queue API base URL
    pub const QSTASH_URL: &str = "QSTASH_URL";
    /// Queue API token
    pub const QSTASH_TOKEN: &str = "QSTASH_TOKEN";
    /// Current signing key for inbound signatures
    pub const QSTASH_CURRENT_SIGNING_KEY: &str = "QSTASH_CURRENT_SIGNING_KEY";
    /// Next signing key for inbound signatures
    pub const QSTASH_NEXT_SIGNING_KEY: &str = "QSTASH_NEXT_SIGNING_KEY";
    /// Default region; its presence turns on multi-region mode
    pub const QSTASH_REGION: &str = "QSTASH_REGION";
    /// Overrides the origin of the workflow URL
    pub const UPSTASH_WORKFLOW_URL: &str = "UPSTASH_WORKFLOW_URL";
}

/// Snapshot of the environment variables a workflow endpoint reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowEnv {
    vars: HashMap<String, String>,
}

impl WorkflowEnv {
    /// Captures the process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Builds an environment from explicit pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Returns the value of `key`, treating empty values as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Returns the value of `key` prefixed with `prefix_`.
    pub fn get_prefixed(&self, prefix: &str, key: &str) -> Option<&str> {
        self.get(&format!("{}_{}", prefix, key))
    }

    /// Sets a variable, returning the updated environment.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Returns all variables.
    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }
}

/// How inbound requests are verified.
#[derive(Clone, Default)]
pub enum ReceiverSource {
    /// Build a receiver from the signing keys in the environment, if present
    #[default]
    FromEnv,
    /// Skip signature verification
    Disabled,
    /// Use the given receiver
    Custom(SharedReceiver),
}

impl std::fmt::Debug for ReceiverSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FromEnv => f.write_str("FromEnv"),
            Self::Disabled => f.write_str("Disabled"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Input handed to a failure function.
#[derive(Debug, Clone)]
pub struct FailureFunctionPayload {
    /// Context of the failed run, rebuilt from its original request
    pub context: WorkflowContext,
    /// HTTP status the failing invocation answered with
    pub fail_status: u16,
    /// Body the failing invocation answered with
    pub fail_response: String,
    /// Headers the failing invocation answered with
    pub fail_headers: HashMap<String, Vec<String>>,
}

/// Recovery routine run after a run fails terminally.
///
/// The returned string, if any, is recorded as the failure function's result.
pub type FailureFunction = Arc<
    dyn Fn(FailureFunctionPayload) -> BoxFuture<'static, WorkflowResult<Option<String>>>
        + Send
        + Sync,
>;

/// Wraps an async closure as a [`FailureFunction`].
pub fn failure_function<F, Fut>(f: F) -> FailureFunction
where
    F: Fn(FailureFunctionPayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkflowResult<Option<String>>> + Send + 'static,
{
    Arc::new(move |payload| f(payload).boxed())
}

/// Options for [`crate::serve`].
#[derive(Clone)]
pub struct ServeOptions {
    /// Pre-built queue client. Disables region inference when set.
    pub client: Option<SharedQueueClient>,
    /// Signature verification
    pub receiver: ReceiverSource,
    /// Full workflow URL; inferred from the request when absent
    pub url: Option<String>,
    /// Replaces the origin of the inferred URL (local tunnels)
    pub base_url: Option<String>,
    /// Endpoint notified out-of-band when a run fails terminally
    pub failure_url: Option<String>,
    /// Recovery routine run when a run fails terminally
    pub failure_function: Option<FailureFunction>,
    /// Queue-level retries for continuation messages
    pub retries: u32,
    /// Queue retry delay expression
    pub retry_delay: Option<String>,
    /// Environment; the process environment when absent
    pub env: Option<WorkflowEnv>,
    /// Lifecycle observers
    pub middlewares: Vec<Arc<WorkflowMiddleware>>,
    /// Stops sending the SDK and runtime telemetry headers
    pub disable_telemetry: bool,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            client: None,
            receiver: ReceiverSource::default(),
            url: None,
            base_url: None,
            failure_url: None,
            failure_function: None,
            retries: DEFAULT_RETRIES,
            retry_delay: None,
            env: None,
            middlewares: Vec::new(),
            disable_telemetry: false,
        }
    }
}

impl std::fmt::Debug for ServeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeOptions")
            .field("client", &self.client.is_some())
            .field("receiver", &self.receiver)
            .field("url", &self.url)
            .field("base_url", &self.base_url)
            .field("failure_url", &self.failure_url)
            .field("failure_function", &self.failure_function.is_some())
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("middlewares", &self.middlewares.len())
            .field("disable_telemetry", &self.disable_telemetry)
            .finish()
    }
}

/// Outbound HTTP request executed by the queue on behalf of a `call` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSettings {
    /// Target URL
    pub url: String,
    /// HTTP method
    pub method: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: Option<String>,
    /// Queue retries for the outbound request
    pub retries: u32,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

impl CallSettings {
    /// Creates a POST request to `url` with no retries.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: HashMap::new(),
            body: None,
            retries: 0,
            timeout: None,
        }
    }

    /// Sets the HTTP method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets a raw body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `body` as JSON and sets the content type.
    pub fn with_json_body<T: Serialize>(mut self, body: &T) -> Result<Self, WorkflowError> {
        self.body = Some(serde_json::to_string(body)?);
        self.headers
            .entry("Content-Type".to_string())
            .or_insert_with(|| "application/json".to_string());
        Ok(self)
    }

    /// Sets the queue retries for the outbound request.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Child workflow started by an `invoke` step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvokeSettings {
    /// URL of the child workflow endpoint
    pub workflow_url: String,
    /// Initial payload of the child run
    pub body: Option<String>,
    /// Headers delivered to the child
    pub headers: HashMap<String, String>,
    /// Queue retries for the child's messages
    pub retries: Option<u32>,
    /// Run id for the child; generated when absent
    pub workflow_run_id: Option<String>,
}

impl InvokeSettings {
    /// Invokes the workflow served at `workflow_url`.
    pub fn new(workflow_url: impl Into<String>) -> Self {
        Self {
            workflow_url: workflow_url.into(),
            ..Default::default()
        }
    }

    /// Sets a raw initial payload.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `body` as the child's initial payload.
    pub fn with_json_body<T: Serialize>(mut self, body: &T) -> Result<Self, WorkflowError> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    /// Adds a header delivered to the child.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the queue retries for the child.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Chooses the child's run id.
    pub fn with_workflow_run_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_run_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_options_default() {
        let options = ServeOptions::default();
        assert_eq!(options.retries, DEFAULT_RETRIES);
        assert!(options.client.is_none());
        assert!(matches!(options.receiver, ReceiverSource::FromEnv));
        assert!(options.middlewares.is_empty());
    }

    #[test]
    fn test_env_ignores_blank_values() {
        let env = WorkflowEnv::from_pairs([("QSTASH_TOKEN", " "), ("QSTASH_URL", "http://q")]);
        assert_eq!(env.get("QSTASH_TOKEN"), None);
        assert_eq!(env.get("QSTASH_URL"), Some("http://q"));
    }

    #[test]
    fn test_env_prefixed_lookup() {
        let env = WorkflowEnv::default().with("US_EAST_1_QSTASH_TOKEN", "t");
        assert_eq!(env.get_prefixed("US_EAST_1", env_keys::QSTASH_TOKEN), Some("t"));
        assert_eq!(env.get_prefixed("EU_CENTRAL_1", env_keys::QSTASH_TOKEN), None);
    }

    #[test]
    fn test_call_settings_json_body() {
        let settings = CallSettings::new("https://api.example.com")
            .with_json_body(&serde_json::json!({"a": 1}))
            .unwrap()
            .with_retries(2);
        assert_eq!(settings.body.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(settings.headers.get("Content-Type").unwrap(), "application/json");
        assert_eq!(settings.method, "POST");
        assert_eq!(settings.retries, 2);
    }

    #[test]
    fn test_invoke_settings_builder() {
        let settings = InvokeSettings::new("https://app/child")
            .with_body("hi")
            .with_workflow_run_id("child-1");
        assert_eq!(settings.body.as_deref(), Some("hi"));
        assert_eq!(settings.workflow_run_id.as_deref(), Some("child-1"));
        assert!(settings.retries.is_none());
    }
}
