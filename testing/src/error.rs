//! Error types for the testing utilities crate.

use thiserror::Error;
use upstash_workflow::WorkflowError;

/// Errors raised while driving a workflow through the local queue.
///
/// # Examples
///
/// ```
/// use upstash_workflow_testing::TestError;
///
/// let err = TestError::UnknownEndpoint("https://app/missing".to_string());
/// assert!(err.to_string().contains("https://app/missing"));
/// ```
#[derive(Debug, Error)]
pub enum TestError {
    /// The workflow or the queue client failed.
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// A message was addressed to a URL no handler is registered for.
    #[error("No workflow handler registered for {0}")]
    UnknownEndpoint(String),

    /// The queue kept delivering past the configured limit.
    #[error("Delivery limit of {0} reached; the run does not settle")]
    DeliveryLimit(usize),

    /// A handler answered with a response the test did not expect.
    #[error("Unexpected response {status}: {body}")]
    UnexpectedResponse {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// A header could not be carried into an HTTP request.
    #[error("Invalid header {0}")]
    InvalidHeader(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl TestError {
    /// Creates an UnexpectedResponse error.
    pub fn unexpected_response(status: u16, body: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            status,
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_errors_convert() {
        let err: TestError = WorkflowError::validation("bad").into();
        assert!(matches!(err, TestError::Workflow(_)));
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_unexpected_response_display() {
        let err = TestError::unexpected_response(500, "boom");
        assert_eq!(err.to_string(), "Unexpected response 500: boom");
    }
}
