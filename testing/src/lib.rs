//! Testing utilities for Upstash Workflow
//!
//! This crate provides tools for testing workflow endpoints in-process,
//! without a queue or a web server.
//!
//! # Features
//!
//! - **MockQueueClient**: records every submission of a single invocation
//! - **LocalQueue**: an in-process queue that keeps run histories and
//!   delivers continuations, retries, call results, events and failure
//!   callbacks to registered handlers until the run settles
//! - **CallStub**: canned third-party responses for `call` steps
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use upstash_workflow::{serve, BoxError, WorkflowContext, WorkflowResult};
//! use upstash_workflow_testing::LocalQueue;
//!
//! async fn greet(ctx: WorkflowContext) -> WorkflowResult<String> {
//!     let name: String = ctx.request_payload()?;
//!     let greeting = ctx
//!         .run("greet", move || async move { Ok::<_, BoxError>(format!("hello {}", name)) })
//!         .await?;
//!     Ok(greeting)
//! }
//!
//! #[tokio::test]
//! async fn test_greeting() {
//!     let queue = Arc::new(LocalQueue::new());
//!     let handler = serve(greet, queue.serve_options("https://app/greet")).unwrap();
//!     queue.register("https://app/greet", handler);
//!
//!     let run_id = queue.trigger("https://app/greet", "\"ada\"").await.unwrap();
//!     queue.run_until_idle().await.unwrap();
//!
//!     assert_eq!(
//!         queue.completed(&run_id),
//!         Some(Some("\"hello ada\"".to_string()))
//!     );
//! }
//! ```

pub mod error;
pub mod local_queue;
pub mod mock_client;
pub mod types;

pub use error::TestError;
pub use local_queue::{LocalQueue, DEFAULT_DELIVERY_LIMIT, LOCAL_BASE_URL};
pub use mock_client::{CompletedRun, MockQueueClient, NotifyCall, MOCK_BASE_URL};
pub use types::{CallStub, Delivery};

// Re-export key types from the SDK for convenience
pub use upstash_workflow::{
    serve, BoxError, Duration, QueueClient, ServeOptions, SharedQueueClient, Step, StepType,
    WorkflowContext, WorkflowError, WorkflowHandler, WorkflowResult,
};
