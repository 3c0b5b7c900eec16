//! Dispatch of lifecycle and diagnostic events to middlewares.

use std::fmt;
use std::sync::{Arc, OnceLock};

use futures_util::future::{join_all, BoxFuture};

use crate::error::{BoxError, WorkflowError};

use super::{
    CompletedEvent, DebugMessage, MiddlewareCallbacks, RunEvent, StepEvent, WorkflowMiddleware,
};

/// Identity of the run events are dispatched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    /// Run id
    pub workflow_run_id: String,
    /// Workflow endpoint URL
    pub workflow_url: String,
}

/// Events tied to a run. Dispatching one requires an assigned run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A run was triggered
    RunStarted,
    /// A step body is about to execute
    BeforeExecution {
        /// Step name
        step_name: String,
    },
    /// A step body finished executing
    AfterExecution {
        /// Step name
        step_name: String,
        /// Serialized output
        result: Option<String>,
    },
    /// The workflow function returned
    RunCompleted {
        /// Serialized result
        result: Option<String>,
    },
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::RunStarted => "runStarted",
            Self::BeforeExecution { .. } => "beforeExecution",
            Self::AfterExecution { .. } => "afterExecution",
            Self::RunCompleted { .. } => "runCompleted",
        }
    }
}

/// Diagnostic events. They can be dispatched before any run is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// An error
    Error(String),
    /// A warning
    Warning(String),
    /// Informational message
    Info(String),
}

impl DebugEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Error(_) => "onError",
            Self::Warning(_) => "onWarning",
            Self::Info(_) => "onInfo",
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Error(m) | Self::Warning(m) | Self::Info(m) => m,
        }
    }
}

/// Ordered list of middlewares plus the run they observe.
///
/// One manager is built per invocation. Every event reaches every
/// middleware; middlewares are called concurrently and a failing hook
/// never stops dispatch to the others.
pub struct MiddlewareManager {
    middlewares: Vec<Arc<WorkflowMiddleware>>,
    run: OnceLock<RunInfo>,
}

impl MiddlewareManager {
    /// Creates a manager for `middlewares`.
    pub fn new(middlewares: Vec<Arc<WorkflowMiddleware>>) -> Self {
        Self {
            middlewares,
            run: OnceLock::new(),
        }
    }

    /// Assigns the run. Later assignments are ignored.
    pub fn assign_context(&self, run: RunInfo) {
        if self.run.set(run).is_err() {
            tracing::debug!("Middleware run already assigned");
        }
    }

    /// The assigned run, if any.
    pub fn run(&self) -> Option<&RunInfo> {
        self.run.get()
    }

    /// Dispatches a lifecycle event to every middleware.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::Internal` when no run was assigned. Hook
    /// failures are never returned.
    pub async fn dispatch_lifecycle(&self, event: LifecycleEvent) -> Result<(), WorkflowError> {
        let run = self.run.get().ok_or_else(|| {
            WorkflowError::internal(format!(
                "{} dispatched before a workflow context was assigned",
                event.name()
            ))
        })?;

        let dispatches = self.middlewares.iter().map(|middleware| {
            let event = &event;
            async move {
                let callbacks = middleware.callbacks().await;
                if let Some(call) = lifecycle_call(callbacks, run, event) {
                    if let Err(error) = call.await {
                        self.report_hook_failure(middleware, callbacks, event.name(), error)
                            .await;
                    }
                }
            }
        });
        join_all(dispatches).await;
        Ok(())
    }

    /// Dispatches a diagnostic event.
    ///
    /// Errors and warnings always reach the default logger as well, so they
    /// are visible with no middleware configured.
    pub async fn dispatch_debug(&self, event: DebugEvent) {
        let workflow_run_id = self.run.get().map(|r| r.workflow_run_id.clone());
        match &event {
            DebugEvent::Error(message) => {
                tracing::error!(workflow_run_id = ?workflow_run_id, "{}", message);
            }
            DebugEvent::Warning(message) => {
                tracing::warn!(workflow_run_id = ?workflow_run_id, "{}", message);
            }
            DebugEvent::Info(_) => {}
        }

        let dispatches = self.middlewares.iter().map(|middleware| {
            let event = &event;
            let workflow_run_id = workflow_run_id.clone();
            async move {
                let callbacks = middleware.callbacks().await;
                let hook = match event {
                    DebugEvent::Error(_) => callbacks.on_error.as_ref(),
                    DebugEvent::Warning(_) => callbacks.on_warning.as_ref(),
                    DebugEvent::Info(_) => callbacks.on_info.as_ref(),
                };
                let Some(hook) = hook else {
                    return;
                };
                let params = DebugMessage {
                    workflow_run_id,
                    message: event.message().to_string(),
                };
                if let Err(error) = hook(params).await {
                    if matches!(event, DebugEvent::Error(_)) {
                        default_log_failure(middleware.name(), event.name(), &error);
                    } else {
                        self.report_hook_failure(middleware, callbacks, event.name(), error)
                            .await;
                    }
                }
            }
        });
        join_all(dispatches).await;
    }

    async fn report_hook_failure(
        &self,
        middleware: &WorkflowMiddleware,
        callbacks: &MiddlewareCallbacks,
        event: &str,
        error: BoxError,
    ) {
        let Some(on_error) = &callbacks.on_error else {
            default_log_failure(middleware.name(), event, &error);
            return;
        };
        let params = DebugMessage {
            workflow_run_id: self.run.get().map(|r| r.workflow_run_id.clone()),
            message: format!(
                "middleware '{}' failed in {}: {}",
                middleware.name(),
                event,
                error
            ),
        };
        if let Err(nested) = on_error(params).await {
            default_log_failure(middleware.name(), "onError", &nested);
            default_log_failure(middleware.name(), event, &error);
        }
    }
}

fn lifecycle_call(
    callbacks: &MiddlewareCallbacks,
    run: &RunInfo,
    event: &LifecycleEvent,
) -> Option<BoxFuture<'static, Result<(), BoxError>>> {
    match event {
        LifecycleEvent::RunStarted => callbacks.run_started.as_ref().map(|hook| {
            hook(RunEvent {
                workflow_run_id: run.workflow_run_id.clone(),
                workflow_url: run.workflow_url.clone(),
            })
        }),
        LifecycleEvent::BeforeExecution { step_name } => {
            callbacks.before_execution.as_ref().map(|hook| {
                hook(StepEvent {
                    workflow_run_id: run.workflow_run_id.clone(),
                    step_name: step_name.clone(),
                    result: None,
                })
            })
        }
        LifecycleEvent::AfterExecution { step_name, result } => {
            callbacks.after_execution.as_ref().map(|hook| {
                hook(StepEvent {
                    workflow_run_id: run.workflow_run_id.clone(),
                    step_name: step_name.clone(),
                    result: result.clone(),
                })
            })
        }
        LifecycleEvent::RunCompleted { result } => callbacks.run_completed.as_ref().map(|hook| {
            hook(CompletedEvent {
                workflow_run_id: run.workflow_run_id.clone(),
                result: result.clone(),
            })
        }),
    }
}

fn default_log_failure(middleware: &str, event: &str, error: &BoxError) {
    tracing::error!(
        middleware = %middleware,
        event = %event,
        error = %error,
        "Middleware callback failed"
    );
}

impl fmt::Debug for MiddlewareManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareManager")
            .field("middlewares", &self.middlewares.len())
            .field("run", &self.run.get())
            .finish()
    }
}
