//! Newtype wrappers for workflow identifiers.
//!
//! # Example
//!
//! ```rust
//! use upstash_workflow::types::WorkflowRunId;
//!
//! let generated = WorkflowRunId::generate();
//! assert!(generated.starts_with("wfr_"));
//!
//! let custom = WorkflowRunId::from_user("order-42").unwrap();
//! assert_eq!(custom.as_str(), "wfr_order-42");
//! assert!(WorkflowRunId::new("").is_err());
//! ```

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Prefix the queue expects on every workflow run id.
pub const WORKFLOW_RUN_ID_PREFIX: &str = "wfr_";

/// Identifier of one logical run, stable across all of its invocations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowRunId(String);

impl WorkflowRunId {
    /// Creates a `WorkflowRunId` from a value received on the wire.
    ///
    /// Returns an error if the value is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, WorkflowError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(WorkflowError::validation("workflow run id cannot be empty"));
        }
        Ok(Self(id))
    }

    /// Generates a fresh run id for a first invocation.
    pub fn generate() -> Self {
        Self(format!("{}{}", WORKFLOW_RUN_ID_PREFIX, uuid::Uuid::new_v4().simple()))
    }

    /// Builds a run id from a caller-chosen suffix, adding the prefix if missing.
    pub fn from_user(id: &str) -> Result<Self, WorkflowError> {
        if id.starts_with(WORKFLOW_RUN_ID_PREFIX) {
            return Self::new(id);
        }
        Self::new(format!("{}{}", WORKFLOW_RUN_ID_PREFIX, id))
            .and_then(|run_id| {
                if run_id.len() == WORKFLOW_RUN_ID_PREFIX.len() {
                    Err(WorkflowError::validation("workflow run id cannot be empty"))
                } else {
                    Ok(run_id)
                }
            })
    }

    /// Returns a reference to the inner string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the inner string value.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for WorkflowRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for WorkflowRunId {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for WorkflowRunId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}
