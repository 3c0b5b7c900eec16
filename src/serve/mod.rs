//! Serving a workflow over HTTP.
//!
//! [`serve`] turns a workflow function into a [`WorkflowHandler`], a
//! framework-agnostic `http::Request<Bytes> -> http::Response<Bytes>`
//! handler. Web-framework adapters only need to move the request body and
//! headers into an `http::Request` and the response back out.
//!
//! Every invocation goes through the same pipeline:
//!
//! 1. resolve the workflow URL and pick the regional client and receiver;
//! 2. verify the request signature;
//! 3. classify the request (trigger, first delivery, continuation,
//!    third-party call result, failure callback);
//! 4. replay the workflow function against the delivered history until it
//!    submits its next action, completes, or fails;
//! 5. answer with a status the queue understands.
//!
//! # Example
//!
//! ```rust,ignore
//! use upstash_workflow::{serve, BoxError, ServeOptions, WorkflowContext, WorkflowResult};
//!
//! let handler = serve(
//!     |ctx: WorkflowContext| async move {
//!         let greeting = ctx
//!             .run("greet", || async { Ok::<_, BoxError>("hello".to_string()) })
//!             .await?;
//!         Ok(greeting)
//!     },
//!     ServeOptions::default(),
//! )?;
//!
//! let response = handler.handle(request).await;
//! ```

pub(crate) mod callback;
pub mod failure;
pub(crate) mod invoke;
pub mod region;
pub(crate) mod request;
pub(crate) mod response;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::{HeaderMap, Request, Response, Uri};
use serde::Serialize;

use crate::config::{env_keys, ServeOptions, WorkflowEnv};
use crate::context::{ContextParts, WorkflowContext};
use crate::error::{Interrupt, WorkflowError, WorkflowResult};
use crate::executor::Halt;
use crate::handlers::invoke::InvokeOut;
use crate::headers::{
    header_str, InvokerInfo, Routing, REGION_HEADER, SIGNATURE_HEADER, WORKFLOW_ID_HEADER,
    WORKFLOW_INVOKER_HEADER,
};
use crate::middleware::{DebugEvent, LifecycleEvent, MiddlewareManager, RunInfo};
use crate::state::ExecutionHistory;
use crate::types::WorkflowRunId;

use self::region::{RegionalHandler, RegionalHandlers};
use self::request::{parse_continuation, retried, ParsedRequest, RequestKind};
use self::response::Outcome;

type RouteFn =
    Arc<dyn Fn(WorkflowContext) -> BoxFuture<'static, WorkflowResult<Option<String>>> + Send + Sync>;

/// Creates the handler serving `route`.
///
/// The environment is read once here: the queue client, the signing keys,
/// and the region settings are fixed for the lifetime of the handler.
///
/// # Arguments
///
/// * `route` - The workflow function. Its output is serialized as JSON and
///   recorded as the run's result.
/// * `options` - Endpoint configuration
///
/// # Errors
///
/// Returns [`WorkflowError::Validation`] when no queue client can be built
/// (no [`ServeOptions::client`] and no `QSTASH_TOKEN`).
pub fn serve<F, Fut, T>(route: F, options: ServeOptions) -> Result<WorkflowHandler, WorkflowError>
where
    F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkflowResult<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let env = options.env.clone().unwrap_or_else(WorkflowEnv::from_process);
    let regions = RegionalHandlers::build(&options, &env)?;
    let route: RouteFn = Arc::new(move |ctx| {
        let run = route(ctx);
        async move {
            let value = run.await?;
            Ok::<_, Interrupt>(Some(serde_json::to_string(&value)?))
        }
        .boxed()
    });

    Ok(WorkflowHandler {
        inner: Arc::new(HandlerInner {
            route,
            options,
            env,
            regions,
        }),
    })
}

struct HandlerInner {
    route: RouteFn,
    options: ServeOptions,
    env: WorkflowEnv,
    regions: RegionalHandlers,
}

/// HTTP handler of one workflow endpoint.
///
/// Cheap to clone; clones share configuration and clients.
#[derive(Clone)]
pub struct WorkflowHandler {
    inner: Arc<HandlerInner>,
}

impl std::fmt::Debug for WorkflowHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandler")
            .field("options", &self.inner.options)
            .field("regions", &self.inner.regions)
            .finish()
    }
}

/// Everything one invocation works with.
pub(crate) struct Invocation<'a> {
    pub handler: &'a RegionalHandler,
    pub routing: Routing,
    pub headers: &'a HeaderMap,
    pub env: &'a WorkflowEnv,
    pub options: &'a ServeOptions,
    pub attempt: u32,
}

/// How a workflow function (or failure function) left the invocation.
pub(crate) enum Settled {
    Submitted,
    Discarded,
    Retry(WorkflowError),
    Returned(Option<String>),
    Failed(WorkflowError),
}

/// Combines the executor's halt state with the function's return value.
///
/// The halt state wins: a function that swallowed `Interrupt::Suspend`
/// still ends the invocation as suspended.
pub(crate) fn settle(ctx: &WorkflowContext, result: WorkflowResult<Option<String>>) -> Settled {
    match ctx.executor().take_halt() {
        Some(Halt::Submitted) => Settled::Submitted,
        Some(Halt::Discarded) => Settled::Discarded,
        Some(Halt::Retry(error)) => Settled::Retry(error),
        None => match result {
            Ok(value) => Settled::Returned(value),
            Err(Interrupt::Error(error)) => Settled::Failed(error),
            Err(Interrupt::Suspend) => Settled::Failed(WorkflowError::internal(
                "workflow suspended without submitting a step",
            )),
        },
    }
}

impl WorkflowHandler {
    /// Handles one inbound request.
    ///
    /// Never fails: errors are turned into the response the queue expects.
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let (parts, body) = request.into_parts();
        let middleware = Arc::new(MiddlewareManager::new(self.inner.options.middlewares.clone()));

        let outcome = match self.dispatch(&parts.uri, &parts.headers, &body, &middleware).await {
            Ok(outcome) => outcome,
            Err(error @ WorkflowError::Authentication { .. }) => {
                tracing::warn!(error = %error, "Rejected unauthenticated request");
                Outcome::Unauthorized {
                    message: error.message(),
                }
            }
            Err(error) => {
                middleware
                    .dispatch_debug(DebugEvent::Error(error.to_string()))
                    .await;
                Outcome::Failed(error)
            }
        };
        outcome.into_response()
    }

    /// The regional handlers this endpoint picks from.
    pub fn regions(&self) -> &RegionalHandlers {
        &self.inner.regions
    }

    async fn dispatch(
        &self,
        uri: &Uri,
        headers: &HeaderMap,
        raw_body: &[u8],
        middleware: &Arc<MiddlewareManager>,
    ) -> Result<Outcome, WorkflowError> {
        let options = &self.inner.options;
        let kind = RequestKind::classify(headers);
        let url = resolve_workflow_url(options, &self.inner.env, uri, headers)?;
        let (handler, region_warning) = self
            .inner
            .regions
            .resolve(header_str(headers, REGION_HEADER), kind == RequestKind::Trigger);
        if let Some(warning) = region_warning {
            middleware.dispatch_debug(DebugEvent::Warning(warning)).await;
        }

        self.verify(handler, headers, raw_body, &url).await?;
        let text = String::from_utf8_lossy(raw_body);
        let body: &str = &text;

        let routing = self.routing(headers, &url, kind)?;
        tracing::debug!(
            workflow_run_id = %routing.workflow_run_id,
            kind = ?kind,
            region = ?handler.region,
            "Handling workflow request"
        );

        let invocation = Invocation {
            handler,
            routing,
            headers,
            env: &self.inner.env,
            options,
            attempt: retried(headers),
        };

        match kind {
            RequestKind::Trigger => self.trigger(invocation, body, middleware).await,
            RequestKind::CallReturn => {
                callback::handle_call_return(&handler.client, &invocation.routing, headers, body)
                    .await
            }
            RequestKind::Failure => failure::handle_failure(invocation, middleware, body).await,
            RequestKind::Init => {
                self.run_workflow(invocation, ParsedRequest::initial(body), middleware)
                    .await
            }
            RequestKind::Continuation => {
                let parsed = parse_continuation(body)?;
                if parsed.is_duplicate {
                    tracing::debug!(
                        workflow_run_id = %invocation.routing.workflow_run_id,
                        "Duplicate delivery, skipping"
                    );
                    return Ok(Outcome::Acknowledged {
                        workflow_run_id: invocation.routing.workflow_run_id,
                    });
                }
                self.run_workflow(invocation, parsed, middleware).await
            }
        }
    }

    async fn verify(
        &self,
        handler: &RegionalHandler,
        headers: &HeaderMap,
        body: &[u8],
        url: &str,
    ) -> Result<(), WorkflowError> {
        let Some(receiver) = &handler.receiver else {
            return Ok(());
        };
        let run_id = header_str(headers, WORKFLOW_ID_HEADER);
        let rejected = || WorkflowError::Authentication {
            message: match run_id {
                Some(id) => format!(
                    "Failed to authenticate Workflow request for run {}. Check the signing keys of the endpoint.",
                    id
                ),
                None => "Failed to authenticate Workflow request. The request has no workflow run id and no valid signature.".to_string(),
            },
        };

        let signature = header_str(headers, SIGNATURE_HEADER).ok_or_else(rejected)?;
        receiver
            .verify(signature, body, Some(url))
            .await
            .map_err(|error| {
                tracing::debug!(error = %error, "Signature verification failed");
                rejected()
            })
    }

    fn routing(&self, headers: &HeaderMap, url: &str, kind: RequestKind) -> Result<Routing, WorkflowError> {
        let options = &self.inner.options;
        let workflow_run_id = match (kind, header_str(headers, WORKFLOW_ID_HEADER)) {
            (RequestKind::Trigger, _) | (_, None) => WorkflowRunId::generate().into_inner(),
            (_, Some(id)) => id.to_string(),
        };
        let invoker = header_str(headers, WORKFLOW_INVOKER_HEADER)
            .map(InvokerInfo::decode)
            .transpose()?;

        let mut routing = Routing::new(workflow_run_id, url, options.retries);
        routing.retry_delay = options.retry_delay.clone();
        routing.telemetry = !options.disable_telemetry;
        routing.failure_mode = kind == RequestKind::Failure;
        // invoked runs must see their own failure to report it to the parent
        routing.failure_callback = if options.failure_function.is_some() || invoker.is_some() {
            Some(url.to_string())
        } else {
            options.failure_url.clone()
        };
        routing.invoker = invoker;
        Ok(routing)
    }

    async fn trigger(
        &self,
        invocation: Invocation<'_>,
        body: &str,
        middleware: &MiddlewareManager,
    ) -> Result<Outcome, WorkflowError> {
        let routing = invocation.routing;
        invocation.handler.client.publish(routing.trigger(body)?).await?;
        middleware
            .dispatch_debug(DebugEvent::Info(format!(
                "Triggered workflow run {}",
                routing.workflow_run_id
            )))
            .await;
        Ok(Outcome::Triggered {
            workflow_run_id: routing.workflow_run_id,
        })
    }

    async fn run_workflow(
        &self,
        invocation: Invocation<'_>,
        parsed: ParsedRequest,
        middleware: &Arc<MiddlewareManager>,
    ) -> Result<Outcome, WorkflowError> {
        let Invocation {
            handler,
            routing,
            headers,
            env,
            attempt,
            ..
        } = invocation;
        let workflow_run_id = routing.workflow_run_id.clone();

        middleware.assign_context(RunInfo {
            workflow_run_id: workflow_run_id.clone(),
            workflow_url: routing.workflow_url.clone(),
        });
        if parsed.steps.is_empty() {
            middleware.dispatch_lifecycle(LifecycleEvent::RunStarted).await?;
        }

        let context = WorkflowContext::new(ContextParts {
            routing: routing.clone(),
            request_payload: parsed.initial_payload,
            headers: headers.clone(),
            env: env.clone(),
            client: handler.client.clone(),
            middleware: middleware.clone(),
            history: ExecutionHistory::new(parsed.steps),
            attempt,
        });
        let result = (self.inner.route)(context.clone()).await;

        match settle(&context, result) {
            Settled::Submitted | Settled::Discarded => Ok(Outcome::Acknowledged { workflow_run_id }),
            Settled::Retry(error) => Err(error),
            Settled::Returned(result) => {
                middleware
                    .dispatch_lifecycle(LifecycleEvent::RunCompleted {
                        result: result.clone(),
                    })
                    .await?;
                if let Some(invoker) = &routing.invoker {
                    let out = InvokeOut {
                        body: result.clone(),
                        is_failed: false,
                        is_canceled: false,
                    };
                    invoke::notify_invoker(&handler.client, &routing, invoker, out).await?;
                }
                handler.client.complete_run(&workflow_run_id, result).await?;
                tracing::debug!(workflow_run_id = %workflow_run_id, "Workflow run completed");
                Ok(Outcome::Completed { workflow_run_id })
            }
            Settled::Failed(error) => {
                tracing::warn!(
                    workflow_run_id = %workflow_run_id,
                    error = %error,
                    non_retryable = error.is_non_retryable(),
                    "Workflow function failed"
                );
                Err(error)
            }
        }
    }
}

/// Resolves the URL the queue should call back.
///
/// An explicit [`ServeOptions::url`] wins. Otherwise the URL comes from the
/// request, with its origin replaced by [`ServeOptions::base_url`] or
/// `UPSTASH_WORKFLOW_URL` when either is set.
pub(crate) fn resolve_workflow_url(
    options: &ServeOptions,
    env: &WorkflowEnv,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<String, WorkflowError> {
    if let Some(url) = &options.url {
        return Ok(url.clone());
    }
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    let base = options
        .base_url
        .as_deref()
        .or_else(|| env.get(env_keys::UPSTASH_WORKFLOW_URL));
    if let Some(base) = base {
        return Ok(format!("{}{}", base.trim_end_matches('/'), path));
    }

    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.to_string());
    }
    let host = header_str(headers, http::header::HOST.as_str()).ok_or_else(|| {
        WorkflowError::validation(
            "cannot infer the workflow url from a request without a host; set ServeOptions::url",
        )
    })?;
    Ok(format!("https://{}{}", host, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn host_headers(host: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, HeaderValue::from_static(host));
        headers
    }

    #[test]
    fn test_url_from_absolute_request_uri() {
        let uri: Uri = "https://app.example.com/api/workflow?x=1".parse().unwrap();
        let url = resolve_workflow_url(
            &ServeOptions::default(),
            &WorkflowEnv::default(),
            &uri,
            &HeaderMap::new(),
        )
        .unwrap();
        assert_eq!(url, "https://app.example.com/api/workflow?x=1");
    }

    #[test]
    fn test_url_from_host_header() {
        let uri: Uri = "/api/workflow".parse().unwrap();
        let url = resolve_workflow_url(
            &ServeOptions::default(),
            &WorkflowEnv::default(),
            &uri,
            &host_headers("app.example.com"),
        )
        .unwrap();
        assert_eq!(url, "https://app.example.com/api/workflow");
    }

    #[test]
    fn test_base_url_replaces_origin() {
        let uri: Uri = "http://localhost:3000/api/workflow".parse().unwrap();
        let options = ServeOptions {
            base_url: Some("https://tunnel.example.com/".to_string()),
            ..Default::default()
        };
        let url = resolve_workflow_url(&options, &WorkflowEnv::default(), &uri, &HeaderMap::new()).unwrap();
        assert_eq!(url, "https://tunnel.example.com/api/workflow");

        let env = WorkflowEnv::default().with(env_keys::UPSTASH_WORKFLOW_URL, "https://env.example.com");
        let url = resolve_workflow_url(&ServeOptions::default(), &env, &uri, &HeaderMap::new()).unwrap();
        assert_eq!(url, "https://env.example.com/api/workflow");
    }

    #[test]
    fn test_explicit_url_wins() {
        let options = ServeOptions {
            url: Some("https://fixed.example.com/wf".to_string()),
            base_url: Some("https://ignored.example.com".to_string()),
            ..Default::default()
        };
        let uri: Uri = "/other".parse().unwrap();
        let url = resolve_workflow_url(&options, &WorkflowEnv::default(), &uri, &HeaderMap::new()).unwrap();
        assert_eq!(url, "https://fixed.example.com/wf");
    }

    #[test]
    fn test_url_cannot_be_inferred_without_host() {
        let uri: Uri = "/api/workflow".parse().unwrap();
        let err = resolve_workflow_url(
            &ServeOptions::default(),
            &WorkflowEnv::default(),
            &uri,
            &HeaderMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { .. }));
    }
}
