//! Lifecycle observers.
//!
//! A [`WorkflowMiddleware`] is a named bundle of optional hooks
//! ([`MiddlewareCallbacks`]). The bundle is either given up front or
//! produced by an async initializer that runs at most once per middleware,
//! even when several invocations race to use it first.
//!
//! Hooks never affect the run. An error returned by a hook is reported to
//! the same middleware's `on_error` hook, and to the default logger if that
//! fails too.
//!
//! # Example
//!
//! ```rust,ignore
//! use upstash_workflow::middleware::{MiddlewareCallbacks, WorkflowMiddleware};
//!
//! let audit = WorkflowMiddleware::new(
//!     "audit",
//!     MiddlewareCallbacks::default().on_run_completed(|event| async move {
//!         println!("run {} finished", event.workflow_run_id);
//!         Ok(())
//!     }),
//! );
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::OnceCell;

use crate::error::BoxError;

mod logging;
mod manager;

pub use logging::logging_middleware;
pub use manager::{DebugEvent, LifecycleEvent, MiddlewareManager, RunInfo};

/// A hook receiving `P`.
pub type Hook<P> = Arc<dyn Fn(P) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

fn hook<P, F, Fut>(f: F) -> Hook<P>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |params| f(params).boxed())
}

/// Payload of `run_started`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEvent {
    /// Run id
    pub workflow_run_id: String,
    /// Workflow endpoint URL
    pub workflow_url: String,
}

/// Payload of `before_execution` and `after_execution`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEvent {
    /// Run id
    pub workflow_run_id: String,
    /// Name of the step about to run, or that just ran
    pub step_name: String,
    /// Serialized output; only set for `after_execution`
    pub result: Option<String>,
}

/// Payload of `run_completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedEvent {
    /// Run id
    pub workflow_run_id: String,
    /// Serialized result of the workflow function
    pub result: Option<String>,
}

/// Payload of `on_error`, `on_warning` and `on_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    /// Run id, when one is known at dispatch time
    pub workflow_run_id: Option<String>,
    /// Message text
    pub message: String,
}

/// Optional hooks of one middleware.
#[derive(Clone, Default)]
pub struct MiddlewareCallbacks {
    /// A run was triggered
    pub run_started: Option<Hook<RunEvent>>,
    /// A step body is about to execute
    pub before_execution: Option<Hook<StepEvent>>,
    /// A step body finished executing
    pub after_execution: Option<Hook<StepEvent>>,
    /// The workflow function returned
    pub run_completed: Option<Hook<CompletedEvent>>,
    /// An error was reported
    pub on_error: Option<Hook<DebugMessage>>,
    /// A warning was reported
    pub on_warning: Option<Hook<DebugMessage>>,
    /// Informational message
    pub on_info: Option<Hook<DebugMessage>>,
}

impl MiddlewareCallbacks {
    /// Sets the `run_started` hook.
    pub fn on_run_started<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RunEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.run_started = Some(hook(f));
        self
    }

    /// Sets the `before_execution` hook.
    pub fn on_before_execution<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.before_execution = Some(hook(f));
        self
    }

    /// Sets the `after_execution` hook.
    pub fn on_after_execution<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StepEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.after_execution = Some(hook(f));
        self
    }

    /// Sets the `run_completed` hook.
    pub fn on_run_completed<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CompletedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.run_completed = Some(hook(f));
        self
    }

    /// Sets the `on_error` hook.
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(DebugMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_error = Some(hook(f));
        self
    }

    /// Sets the `on_warning` hook.
    pub fn on_warning<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(DebugMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_warning = Some(hook(f));
        self
    }

    /// Sets the `on_info` hook.
    pub fn on_info<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(DebugMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_info = Some(hook(f));
        self
    }
}

impl fmt::Debug for MiddlewareCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareCallbacks")
            .field("run_started", &self.run_started.is_some())
            .field("before_execution", &self.before_execution.is_some())
            .field("after_execution", &self.after_execution.is_some())
            .field("run_completed", &self.run_completed.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_warning", &self.on_warning.is_some())
            .field("on_info", &self.on_info.is_some())
            .finish()
    }
}

type InitFn = Box<dyn Fn() -> BoxFuture<'static, MiddlewareCallbacks> + Send + Sync>;

/// A named middleware whose callbacks are materialized on first use.
pub struct WorkflowMiddleware {
    name: String,
    init: Option<InitFn>,
    callbacks: OnceCell<MiddlewareCallbacks>,
}

impl WorkflowMiddleware {
    /// Creates a middleware with callbacks known up front.
    pub fn new(name: impl Into<String>, callbacks: MiddlewareCallbacks) -> Self {
        Self {
            name: name.into(),
            init: None,
            callbacks: OnceCell::from(callbacks),
        }
    }

    /// Creates a middleware whose callbacks come from an async initializer.
    ///
    /// The initializer runs at most once, on the first event dispatched to
    /// this middleware.
    pub fn with_init<F, Fut>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MiddlewareCallbacks> + Send + 'static,
    {
        Self {
            name: name.into(),
            init: Some(Box::new(move || init().boxed())),
            callbacks: OnceCell::new(),
        }
    }

    /// Name of the middleware.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the callbacks, running the initializer on first call.
    pub async fn callbacks(&self) -> &MiddlewareCallbacks {
        self.callbacks
            .get_or_init(|| async {
                match &self.init {
                    Some(init) => init().await,
                    None => MiddlewareCallbacks::default(),
                }
            })
            .await
    }
}

impl fmt::Debug for WorkflowMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowMiddleware")
            .field("name", &self.name)
            .field("initialized", &self.callbacks.initialized())
            .finish()
    }
}
