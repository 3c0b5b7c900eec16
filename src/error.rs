//! Error types for workflow execution.
//!
//! Two things travel up the call stack out of a workflow primitive:
//!
//! - [`WorkflowError`], a real failure (replay inconsistency, a step that
//!   failed terminally, a rejected signature, ...).
//! - [`Interrupt::Suspend`], the signal that this invocation has submitted
//!   its next action and must stop executing the workflow function.
//!
//! Keeping the suspend signal out of [`WorkflowError`] means a generic
//! `match` on errors inside user code cannot swallow it by accident.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::Duration;

/// Boxed error returned from step bodies and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Status code answered for failures that the queue must not retry.
pub const NON_RETRYABLE_STATUS: u16 = 489;

/// The main error type for workflow execution.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Explicit signal from user code that retrying is pointless.
    #[error("Non-retryable error: {message}")]
    NonRetryable {
        /// Error message describing what went wrong
        message: String,
    },

    /// Asks the queue to redeliver the invocation after a delay.
    #[error("Retry after {retry_after}: {message}")]
    RetryAfter {
        /// Error message describing what went wrong
        message: String,
        /// How long the queue should wait before redelivering
        retry_after: Duration,
    },

    /// A step failed terminally and the failure was recorded in history.
    #[error("Step '{step_name}' failed: {message}")]
    StepFailed {
        /// Name of the failed step
        step_name: String,
        /// Kind of the original error (e.g. `NonRetryableError`)
        error_type: String,
        /// Error message recorded with the step
        message: String,
    },

    /// An outbound call step completed with a non-2xx status.
    #[error("Call step '{step_name}' returned status {status}")]
    CallFailed {
        /// Name of the call step
        step_name: String,
        /// HTTP status returned by the called endpoint
        status: u16,
        /// Response body as text
        body: String,
        /// Response headers
        headers: HashMap<String, Vec<String>>,
    },

    /// The workflow function did not replay the recorded history.
    #[error("Non-deterministic workflow: {message}")]
    NonDeterministic {
        /// Description of the mismatch
        message: String,
        /// The step id at which the mismatch was detected
        step_id: Option<u32>,
    },

    /// The queue rejected a submission because of a size or quota limit.
    #[error("Quota exceeded: {message}")]
    Quota {
        /// Error message from the queue
        message: String,
    },

    /// Communication with the queue failed.
    #[error("Queue error: {message}")]
    Queue {
        /// Error message describing what went wrong
        message: String,
        /// HTTP status returned by the queue, if any
        status: Option<u16>,
        /// Whether a later attempt may succeed
        is_retriable: bool,
    },

    /// The inbound request failed signature verification.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Fixed diagnostic message
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    SerDes {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Validation error for invalid configuration or arguments.
    #[error("Validation error: {message}")]
    Validation {
        /// Error message describing the validation failure
        message: String,
    },

    /// Engine invariant violated. Never caused by user code.
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the broken invariant
        message: String,
    },

    /// Error raised by user code that the engine does not recognize.
    #[error("{message}")]
    UserCode {
        /// Error message from the user code
        message: String,
        /// The type of error
        error_type: String,
    },
}

impl WorkflowError {
    /// Creates a new NonRetryable error.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::NonRetryable {
            message: message.into(),
        }
    }

    /// Creates a new RetryAfter error.
    pub fn retry_after(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::RetryAfter {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a new NonDeterministic error.
    pub fn non_deterministic(message: impl Into<String>, step_id: Option<u32>) -> Self {
        Self::NonDeterministic {
            message: message.into(),
            step_id,
        }
    }

    /// Creates a new Validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a new retriable Queue error.
    pub fn queue_retriable(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Queue {
            message: message.into(),
            status,
            is_retriable: true,
        }
    }

    /// Creates a new non-retriable Queue error.
    pub fn queue_non_retriable(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Queue {
            message: message.into(),
            status,
            is_retriable: false,
        }
    }

    /// Converts an error returned from a step body or workflow function.
    ///
    /// [`WorkflowError`], [`Interrupt`], [`NonRetryableError`] and
    /// [`RetryAfterError`] are recognized by downcast. Anything else becomes
    /// [`WorkflowError::UserCode`].
    pub fn from_box(error: BoxError) -> Self {
        let error = match error.downcast::<WorkflowError>() {
            Ok(e) => return *e,
            Err(e) => e,
        };
        let error = match error.downcast::<Interrupt>() {
            Ok(interrupt) => {
                return match *interrupt {
                    Interrupt::Error(e) => e,
                    Interrupt::Suspend => {
                        Self::internal("workflow primitive called inside a step body")
                    }
                }
            }
            Err(e) => e,
        };
        let error = match error.downcast::<NonRetryableError>() {
            Ok(e) => return (*e).into(),
            Err(e) => e,
        };
        match error.downcast::<RetryAfterError>() {
            Ok(e) => (*e).into(),
            Err(e) => Self::UserCode {
                message: e.to_string(),
                error_type: "Error".to_string(),
            },
        }
    }

    /// Returns true if the queue must not retry the invocation.
    pub fn is_non_retryable(&self) -> bool {
        match self {
            Self::NonRetryable { .. }
            | Self::StepFailed { .. }
            | Self::CallFailed { .. }
            | Self::NonDeterministic { .. }
            | Self::Quota { .. }
            | Self::Authentication { .. }
            | Self::SerDes { .. }
            | Self::Validation { .. } => true,
            Self::Queue { is_retriable, .. } => !is_retriable,
            Self::RetryAfter { .. } | Self::Internal { .. } | Self::UserCode { .. } => false,
        }
    }

    /// Returns true if this is a RetryAfter error.
    pub fn is_retry_after(&self) -> bool {
        matches!(self, Self::RetryAfter { .. })
    }

    /// Returns true if this is a NonDeterministic error.
    pub fn is_non_deterministic(&self) -> bool {
        matches!(self, Self::NonDeterministic { .. })
    }

    /// HTTP status the invocation answers with when this error ends it.
    pub fn status_code(&self) -> u16 {
        if self.is_retry_after() {
            429
        } else if self.is_non_retryable() {
            NON_RETRYABLE_STATUS
        } else {
            500
        }
    }

    /// Short name of the error kind, used in failure payloads and step records.
    pub fn error_type(&self) -> &str {
        match self {
            Self::NonRetryable { .. } => "NonRetryableError",
            Self::RetryAfter { .. } => "RetryAfterError",
            Self::StepFailed { error_type, .. } => error_type,
            Self::CallFailed { .. } => "CallFailedError",
            Self::NonDeterministic { .. } => "NonDeterministicError",
            Self::Quota { .. } => "QuotaError",
            Self::Queue { .. } => "QueueError",
            Self::Authentication { .. } => "AuthenticationError",
            Self::SerDes { .. } => "SerializationError",
            Self::Validation { .. } => "ValidationError",
            Self::Internal { .. } => "InternalError",
            Self::UserCode { error_type, .. } => error_type,
        }
    }

    /// The message without the kind prefix added by `Display`.
    pub fn message(&self) -> String {
        match self {
            Self::NonRetryable { message }
            | Self::RetryAfter { message, .. }
            | Self::StepFailed { message, .. }
            | Self::NonDeterministic { message, .. }
            | Self::Quota { message }
            | Self::Queue { message, .. }
            | Self::Authentication { message }
            | Self::SerDes { message }
            | Self::Validation { message }
            | Self::Internal { message }
            | Self::UserCode { message, .. } => message.clone(),
            Self::CallFailed { .. } => self.to_string(),
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerDes {
            message: error.to_string(),
        }
    }
}

/// Error returned by user code to fail a step or run without retries.
///
/// # Example
///
/// ```rust,ignore
/// ctx.run("charge", || async {
///     if card_expired {
///         return Err(NonRetryableError::new("card expired").into());
///     }
///     Ok(())
/// })
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct NonRetryableError {
    message: String,
}

impl NonRetryableError {
    /// Creates a new non-retryable error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<NonRetryableError> for WorkflowError {
    fn from(error: NonRetryableError) -> Self {
        Self::NonRetryable {
            message: error.message,
        }
    }
}

/// Error returned by user code to have the queue retry after a delay.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RetryAfterError {
    message: String,
    retry_after: Duration,
}

impl RetryAfterError {
    /// Creates a new retry-after error.
    pub fn new(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            message: message.into(),
            retry_after,
        }
    }
}

impl From<RetryAfterError> for WorkflowError {
    fn from(error: RetryAfterError) -> Self {
        Self::RetryAfter {
            message: error.message,
            retry_after: error.retry_after,
        }
    }
}

/// Why a workflow primitive did not produce a value.
#[derive(Debug, Error)]
pub enum Interrupt {
    /// The invocation submitted its next action and is done.
    ///
    /// Workflow functions should propagate this with `?`. Catching it does
    /// not resume execution: the invocation still ends as suspended.
    #[error("workflow suspended")]
    Suspend,

    /// A failure that user code may inspect and handle.
    #[error(transparent)]
    Error(#[from] WorkflowError),
}

impl Interrupt {
    /// Returns true for the suspend signal.
    pub fn is_suspend(&self) -> bool {
        matches!(self, Self::Suspend)
    }

    /// Returns the error, if this is not the suspend signal.
    pub fn into_error(self) -> Option<WorkflowError> {
        match self {
            Self::Suspend => None,
            Self::Error(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for Interrupt {
    fn from(error: serde_json::Error) -> Self {
        Self::Error(error.into())
    }
}

impl From<NonRetryableError> for Interrupt {
    fn from(error: NonRetryableError) -> Self {
        Self::Error(error.into())
    }
}

impl From<BoxError> for Interrupt {
    fn from(error: BoxError) -> Self {
        Self::Error(WorkflowError::from_box(error))
    }
}

/// Result type returned by workflow primitives and workflow functions.
pub type WorkflowResult<T> = Result<T, Interrupt>;

/// Body of an error response answered to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureResponse {
    /// Kind of the error
    pub error: String,
    /// Human-readable message
    pub message: String,
}

impl From<&WorkflowError> for FailureResponse {
    fn from(error: &WorkflowError) -> Self {
        Self {
            error: error.error_type().to_string(),
            message: error.message(),
        }
    }
}
