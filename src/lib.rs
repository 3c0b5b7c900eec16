//! # Upstash Workflow for Rust
//!
//! Durable, replay-based workflows served from an ordinary HTTP endpoint.
//!
//! ## Overview
//!
//! A workflow is an async function that calls *step primitives* on a
//! [`WorkflowContext`]. The endpoint is stateless: every invocation replays
//! the function from the top against the step history delivered by the
//! queue. Steps with a recorded result return it without running again.
//! The first step without one is submitted to the queue, and the
//! invocation ends. The queue calls the endpoint back with the longer
//! history, and so on until the function returns.
//!
//! ### Key Features
//!
//! - **Replay**: completed steps return their recorded output; side effects
//!   inside `run` bodies happen once per successful attempt.
//! - **Parallel steps**: [`WorkflowContext::all`] starts a group of steps
//!   together and resolves each result by step id, whatever the delivery
//!   order.
//! - **Timers, calls, events**: durable `sleep`, third-party HTTP `call`,
//!   child workflow `invoke`, `wait_for_event`/`notify`, and webhooks.
//! - **Failure handling**: retries through the queue, non-retryable errors,
//!   explicit retry delays, failure functions, and failure URLs.
//! - **Middleware**: lifecycle and diagnostic hooks around every run.
//! - **Regions**: per-region queue credentials picked by the
//!   `Upstash-Region` header.
//!
//! ## Important Documentation
//!
//! - [`docs::determinism`]: what replay requires of workflow code
//! - [`docs::limits`]: payload, retry, and timing limits
//!
//! ## Getting Started
//!
//! ```toml
//! [dependencies]
//! upstash-workflow = "0.1"
//! tokio = { version = "1.0", features = ["full"] }
//! serde = { version = "1.0", features = ["derive"] }
//! ```
//!
//! ### Basic Workflow Example
//!
//! ```rust,ignore
//! use serde::{Deserialize, Serialize};
//! use upstash_workflow::{serve, BoxError, ServeOptions, WorkflowContext, WorkflowResult};
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     order_id: String,
//! }
//!
//! #[derive(Serialize)]
//! struct Receipt {
//!     order_id: String,
//!     payment_id: String,
//! }
//!
//! async fn process_order(ctx: WorkflowContext) -> WorkflowResult<Receipt> {
//!     let order: Order = ctx.request_payload()?;
//!
//!     let payment_id = ctx
//!         .run("charge", || async { Ok::<_, BoxError>("pay_123".to_string()) })
//!         .await?;
//!
//!     ctx.sleep("cool-down", upstash_workflow::Duration::from_minutes(5)).await?;
//!
//!     Ok(Receipt {
//!         order_id: order.order_id,
//!         payment_id,
//!     })
//! }
//!
//! let handler = serve(process_order, ServeOptions::default())?;
//! // hand `http::Request<Bytes>` values to `handler.handle(request).await`
//! ```
//!
//! ### Parallel Steps
//!
//! ```rust,ignore
//! let (a, b) = ctx
//!     .join2(
//!         ctx.run("fetch-a", || async { Ok::<_, BoxError>(1) }),
//!         ctx.run("fetch-b", || async { Ok::<_, BoxError>(2) }),
//!     )
//!     .await?;
//! ```
//!
//! ### Failing Without Retries
//!
//! Return a [`NonRetryableError`] from a step body to fail the run at once:
//!
//! ```rust,ignore
//! ctx.run("validate", || async {
//!     Err::<(), BoxError>(Box::new(NonRetryableError::new("order already shipped")))
//! })
//! .await?;
//! ```
//!
//! ## Module Structure
//!
//! - [`client`]: queue client trait and the QStash HTTP client
//! - [`config`]: endpoint options, environment, call and invoke settings
//! - [`context`]: the workflow context and step primitives
//! - [`handlers`]: per-primitive step construction and result decoding
//! - [`middleware`]: lifecycle and debug hooks
//! - [`serve`]: the HTTP handler and its request pipeline
//! - [`state`]: the step history of one invocation
//! - [`step`]: the step wire model

pub mod client;
pub mod config;
pub mod context;
pub mod docs;
pub mod duration;
pub mod error;
pub(crate) mod executor;
pub mod handlers;
pub mod headers;
pub mod middleware;
pub mod receiver;
pub mod serve;
pub mod state;
pub mod step;
pub mod types;

pub use client::{
    LogsQuery, LogsResponse, NotifyResponse, PublishRequest, PublishResponse, QStashClient,
    QStashClientConfig, QueueClient, RunLog, SharedQueueClient, StepLog, WaitRequest, Waiter,
};
pub use config::{
    failure_function, CallSettings, FailureFunction, FailureFunctionPayload, InvokeSettings,
    ReceiverSource, ServeOptions, WorkflowEnv, DEFAULT_RETRIES,
};
pub use context::{StepFuture, WorkflowContext};
pub use duration::Duration;
pub use error::{
    BoxError, FailureResponse, Interrupt, NonRetryableError, RetryAfterError, WorkflowError,
    WorkflowResult,
};
pub use handlers::{
    CallResponse, InvokeResponse, NotifyStepResponse, WaitEventResult, WaitWebhookResult,
    Webhook, WebhookRequest,
};
pub use middleware::{
    logging_middleware, MiddlewareCallbacks, WorkflowMiddleware,
};
pub use receiver::{Receiver, SharedReceiver, SigningKeyReceiver};
pub use serve::failure::{FailureCallbackPayload, FailureReport};
pub use serve::region::{QStashRegion, RegionalHandler, RegionalHandlers};
pub use serve::{serve, WorkflowHandler};
pub use state::{ExecutionHistory, ReplayStatus};
pub use step::{Step, StepFailure, StepKind, StepType};
pub use types::WorkflowRunId;
