//! The workflow context handed to workflow functions.
//!
//! A [`WorkflowContext`] lives for one invocation. It exposes the workflow
//! primitives; each returns a [`StepFuture`] that does nothing until it is
//! awaited or grouped with others through [`WorkflowContext::all`],
//! [`WorkflowContext::join2`] or [`WorkflowContext::join3`].
//!
//! # Example
//!
//! ```rust,ignore
//! use upstash_workflow::{BoxError, WorkflowContext, WorkflowResult, Duration};
//!
//! async fn onboarding(ctx: WorkflowContext) -> WorkflowResult<String> {
//!     let email: String = ctx.request_payload()?;
//!     let user_id = ctx
//!         .run("create-user", || async move { Ok::<_, BoxError>(format!("user:{}", email)) })
//!         .await?;
//!     ctx.sleep("wait-a-day", Duration::from_days(1)).await?;
//!     let (a, b) = ctx
//!         .join2(
//!             ctx.run("welcome-mail", || async { Ok::<_, BoxError>(true) }),
//!             ctx.run("crm-sync", || async { Ok::<_, BoxError>(3u32) }),
//!         )
//!         .await?;
//!     Ok(format!("{} {} {}", user_id, a, b))
//! }
//! ```
//!
//! Every primitive must be propagated with `?`. When a primitive returns
//! [`Interrupt::Suspend`](crate::Interrupt::Suspend) the invocation has
//! submitted its next action and the workflow function should return.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::SharedQueueClient;
use crate::config::{CallSettings, InvokeSettings, WorkflowEnv};
use crate::duration::Duration;
use crate::error::{BoxError, Interrupt, WorkflowError, WorkflowResult};
use crate::executor::AutoExecutor;
use crate::handlers::call::{decode_call, CallStep};
use crate::handlers::invoke::{decode_invoke, InvokeStep};
use crate::handlers::notify::NotifyStep;
use crate::handlers::run::RunStep;
use crate::handlers::sleep::SleepStep;
use crate::handlers::wait::{decode_wait, WaitStep};
use crate::handlers::webhook::{decode_webhook_wait, WebhookStep};
use crate::handlers::{
    decode_lenient, decode_out, CallResponse, InvokeResponse, LazyStep, NotifyStepResponse,
    WaitEventResult, WaitWebhookResult, Webhook,
};
use crate::headers::{InvokerInfo, Routing};
use crate::middleware::MiddlewareManager;
use crate::state::ExecutionHistory;
use crate::step::Step;

/// Everything a context is built from.
pub(crate) struct ContextParts {
    pub routing: Routing,
    pub request_payload: Option<String>,
    pub headers: HeaderMap,
    pub env: WorkflowEnv,
    pub client: SharedQueueClient,
    pub middleware: Arc<MiddlewareManager>,
    pub history: ExecutionHistory,
    pub attempt: u32,
}

struct ContextInner {
    routing: Routing,
    request_payload: Option<String>,
    headers: HeaderMap,
    env: WorkflowEnv,
    client: SharedQueueClient,
    middleware: Arc<MiddlewareManager>,
    executor: AutoExecutor,
    attempt: u32,
}

/// Per-invocation orchestrator exposing the workflow primitives.
///
/// Cloning is cheap and every clone shares the same step cursor.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<ContextInner>,
}

impl WorkflowContext {
    pub(crate) fn new(parts: ContextParts) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                routing: parts.routing,
                request_payload: parts.request_payload,
                headers: parts.headers,
                env: parts.env,
                client: parts.client,
                middleware: parts.middleware,
                executor: AutoExecutor::new(parts.history),
                attempt: parts.attempt,
            }),
        }
    }

    /// Run id of the workflow run.
    pub fn workflow_run_id(&self) -> &str {
        &self.inner.routing.workflow_run_id
    }

    /// URL of the workflow endpoint.
    pub fn url(&self) -> &str {
        &self.inner.routing.workflow_url
    }

    /// Decodes the payload the run was triggered with.
    ///
    /// A payload that is not JSON decodes as a string; a missing payload
    /// decodes as `null`.
    pub fn request_payload<T: DeserializeOwned>(&self) -> Result<T, WorkflowError> {
        match self.inner.request_payload.as_deref() {
            Some(raw) if !raw.is_empty() => decode_lenient(raw),
            _ => Ok(serde_json::from_str("null")?),
        }
    }

    /// The payload the run was triggered with, undecoded.
    pub fn raw_request_payload(&self) -> Option<&str> {
        self.inner.request_payload.as_deref()
    }

    /// Headers of the current invocation.
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Environment the endpoint was served with.
    pub fn env(&self) -> &WorkflowEnv {
        &self.inner.env
    }

    /// Parent run, when this run was started by `invoke`.
    pub fn invoker(&self) -> Option<&InvokerInfo> {
        self.inner.routing.invoker.as_ref()
    }

    /// Returns true while primitives are answered from history.
    pub fn is_replaying(&self) -> bool {
        self.inner.executor.history().is_replaying()
    }

    pub(crate) fn routing(&self) -> &Routing {
        &self.inner.routing
    }

    pub(crate) fn client(&self) -> &SharedQueueClient {
        &self.inner.client
    }

    pub(crate) fn middleware(&self) -> &MiddlewareManager {
        &self.inner.middleware
    }

    pub(crate) fn executor(&self) -> &AutoExecutor {
        &self.inner.executor
    }

    /// Number of times the queue already redelivered this invocation.
    pub(crate) fn attempt(&self) -> u32 {
        self.inner.attempt
    }

    /// Runs `f` as a step. Its output is recorded and returned on replay.
    ///
    /// The body runs only when the step is the next action of the run.
    /// Return [`NonRetryableError`](crate::NonRetryableError) to fail the
    /// step without retries.
    pub fn run<'a, T, F, Fut>(&'a self, name: impl Into<String>, f: F) -> StepFuture<'a, T>
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'a,
        T: Serialize + DeserializeOwned + Send + 'a,
    {
        StepFuture::new(self, Box::new(RunStep::new(name, f)), decode_out::<T>)
    }

    /// Pauses the run for `duration`.
    pub fn sleep(&self, name: impl Into<String>, duration: impl Into<Duration>) -> StepFuture<'_, ()> {
        let seconds = duration.into().to_seconds();
        StepFuture::new(self, Box::new(SleepStep::for_seconds(name, seconds)), decode_out::<()>)
    }

    /// Pauses the run until `at`.
    pub fn sleep_until(&self, name: impl Into<String>, at: DateTime<Utc>) -> StepFuture<'_, ()> {
        StepFuture::new(
            self,
            Box::new(SleepStep::until(name, at.timestamp())),
            decode_out::<()>,
        )
    }

    /// Performs an HTTP request through the queue.
    ///
    /// A response status of 300 or more fails the step with
    /// [`WorkflowError::CallFailed`].
    pub fn call<T>(&self, name: impl Into<String>, settings: CallSettings) -> StepFuture<'_, CallResponse<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        StepFuture::new(self, Box::new(CallStep::new(name, settings)), decode_call::<T>)
    }

    /// Starts another workflow run and resolves when it finishes.
    pub fn invoke<T>(
        &self,
        name: impl Into<String>,
        settings: InvokeSettings,
    ) -> StepFuture<'_, InvokeResponse<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        StepFuture::new(self, Box::new(InvokeStep::new(name, settings)), decode_invoke::<T>)
    }

    /// Waits until `event_id` is notified or `timeout` expires.
    pub fn wait_for_event<T>(
        &self,
        name: impl Into<String>,
        event_id: impl Into<String>,
        timeout: impl Into<Duration>,
    ) -> StepFuture<'_, WaitEventResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        StepFuture::new(
            self,
            Box::new(WaitStep::new(name, event_id, timeout.into())),
            decode_wait::<T>,
        )
    }

    /// Delivers `data` to every run waiting for `event_id`.
    pub fn notify<T: Serialize + ?Sized>(
        &self,
        name: impl Into<String>,
        event_id: impl Into<String>,
        data: &T,
    ) -> StepFuture<'_, NotifyStepResponse> {
        StepFuture::new(
            self,
            Box::new(NotifyStep::new(name, event_id, data)),
            decode_out::<NotifyStepResponse>,
        )
    }

    /// Creates a webhook URL whose requests can be awaited with
    /// [`wait_for_webhook`](Self::wait_for_webhook).
    pub fn create_webhook(&self, name: impl Into<String>) -> StepFuture<'_, Webhook> {
        StepFuture::new(self, Box::new(WebhookStep::new(name)), decode_out::<Webhook>)
    }

    /// Waits for a request to `webhook` or for `timeout` to expire.
    pub fn wait_for_webhook(
        &self,
        name: impl Into<String>,
        webhook: &Webhook,
        timeout: impl Into<Duration>,
    ) -> StepFuture<'_, WaitWebhookResult> {
        StepFuture::new(
            self,
            Box::new(WaitStep::new(name, &webhook.event_id, timeout.into())),
            decode_webhook_wait,
        )
    }

    /// Runs steps of the same output type as one concurrency group.
    ///
    /// Results come back in the order of `steps`. All steps must come from
    /// this context.
    pub async fn all<'a, T>(&'a self, steps: Vec<StepFuture<'a, T>>) -> WorkflowResult<Vec<T>>
    where
        T: Send + 'a,
    {
        let lazies: Vec<&dyn LazyStep> = steps.iter().map(|s| s.lazy.as_ref() as &dyn LazyStep).collect();
        let resolved = self.executor().run_group(self, &lazies).await?;
        steps
            .iter()
            .zip(resolved.iter())
            .map(|(step, recorded)| (step.decode)(recorded).map_err(Interrupt::from))
            .collect()
    }

    /// Runs two steps as one concurrency group.
    pub async fn join2<'a, A, B>(
        &'a self,
        a: StepFuture<'a, A>,
        b: StepFuture<'a, B>,
    ) -> WorkflowResult<(A, B)>
    where
        A: Send + 'a,
        B: Send + 'a,
    {
        let lazies: [&dyn LazyStep; 2] = [a.lazy.as_ref(), b.lazy.as_ref()];
        let resolved = self.executor().run_group(self, &lazies).await?;
        Ok(((a.decode)(&resolved[0])?, (b.decode)(&resolved[1])?))
    }

    /// Runs three steps as one concurrency group.
    pub async fn join3<'a, A, B, C>(
        &'a self,
        a: StepFuture<'a, A>,
        b: StepFuture<'a, B>,
        c: StepFuture<'a, C>,
    ) -> WorkflowResult<(A, B, C)>
    where
        A: Send + 'a,
        B: Send + 'a,
        C: Send + 'a,
    {
        let lazies: [&dyn LazyStep; 3] = [a.lazy.as_ref(), b.lazy.as_ref(), c.lazy.as_ref()];
        let resolved = self.executor().run_group(self, &lazies).await?;
        Ok((
            (a.decode)(&resolved[0])?,
            (b.decode)(&resolved[1])?,
            (c.decode)(&resolved[2])?,
        ))
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("workflow_run_id", &self.workflow_run_id())
            .field("url", &self.url())
            .field("failure_mode", &self.inner.routing.failure_mode)
            .field("steps", &self.inner.executor.history().len())
            .field("step_count", &self.inner.executor.step_count())
            .finish()
    }
}

/// A primitive that has not been resolved yet.
///
/// Awaiting it resolves it as a sequential step. Passing it to
/// [`WorkflowContext::all`] or a `join` resolves it as part of a group.
#[must_use = "steps do nothing unless awaited or grouped"]
pub struct StepFuture<'a, T> {
    ctx: &'a WorkflowContext,
    lazy: Box<dyn LazyStep + 'a>,
    decode: fn(&Step) -> Result<T, WorkflowError>,
}

impl<'a, T> StepFuture<'a, T> {
    fn new(
        ctx: &'a WorkflowContext,
        lazy: Box<dyn LazyStep + 'a>,
        decode: fn(&Step) -> Result<T, WorkflowError>,
    ) -> Self {
        Self { ctx, lazy, decode }
    }

    /// Name of the step.
    pub fn name(&self) -> &str {
        self.lazy.step_name()
    }
}

impl<'a, T: Send + 'a> IntoFuture for StepFuture<'a, T> {
    type Output = WorkflowResult<T>;
    type IntoFuture = BoxFuture<'a, WorkflowResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let step = self
                .ctx
                .executor()
                .run_single(self.ctx, self.lazy.as_ref())
                .await?;
            Ok((self.decode)(&step)?)
        })
    }
}

impl<T> fmt::Debug for StepFuture<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepFuture")
            .field("name", &self.lazy.step_name())
            .field("step_type", &self.lazy.step_type())
            .finish()
    }
}
