//! Records and stubs used by the local queue.

use std::collections::HashMap;

/// One delivery made by the local queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Id of the delivered message
    pub message_id: String,
    /// Destination URL
    pub url: String,
    /// Zero on first delivery, then one more per retry
    pub attempt: u32,
    /// Body sent to the destination
    pub request_body: String,
    /// Status the destination answered with
    pub status: u16,
    /// Body the destination answered with
    pub response_body: String,
}

impl Delivery {
    /// Returns true if the destination answered with a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Canned response of a third-party endpoint.
///
/// # Examples
///
/// ```
/// use upstash_workflow_testing::CallStub;
///
/// let stub = CallStub::new(500, "upstream exploded")
///     .with_header("content-type", "text/plain");
/// assert_eq!(stub.status, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStub {
    /// Status returned to the call
    pub status: u16,
    /// Body returned to the call
    pub body: String,
    /// Headers returned to the call
    pub headers: HashMap<String, Vec<String>>,
}

impl CallStub {
    /// Creates a stub answering `status` with `body`.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Creates a 200 stub answering with `value` as JSON.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200, value.to_string()).with_header("content-type", "application/json")
    }

    /// Adds a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }
}
