//! The deterministic executor.
//!
//! Every primitive reached by the workflow function passes through
//! [`AutoExecutor`]. It assigns step ids in program order, answers
//! primitives from history while replaying, and turns the first unresolved
//! primitive (or concurrency group) into exactly one submission to the
//! queue. After submitting it records a [`Halt`] and answers every later
//! primitive with [`Interrupt::Suspend`], so at most one submission round
//! happens per invocation even if user code swallows the signal.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::context::WorkflowContext;
use crate::error::{Interrupt, WorkflowError, WorkflowResult};
use crate::handlers::call::call_request;
use crate::handlers::invoke::invoke_request;
use crate::handlers::parallel::{group_range, infer_state, ParallelCallState};
use crate::handlers::replay::{check_replay, replayed_failure, validate_step, ReplayResult};
use crate::handlers::wait::wait_request;
use crate::handlers::{LazyStep, Submission};
use crate::middleware::LifecycleEvent;
use crate::state::ExecutionHistory;
use crate::step::{Step, StepFailure};

/// Why an invocation stopped running the workflow function.
#[derive(Debug)]
pub(crate) enum Halt {
    /// A step or a batch of plans was submitted
    Submitted,
    /// A concurrency group had nothing to do in this invocation
    Discarded,
    /// A step body failed and the queue should redeliver the invocation
    Retry(WorkflowError),
}

/// Per-invocation executor state.
#[derive(Debug)]
pub(crate) struct AutoExecutor {
    history: ExecutionHistory,
    step_count: AtomicU32,
    halt: Mutex<Option<Halt>>,
    executing_step: Mutex<Option<String>>,
}

impl AutoExecutor {
    pub(crate) fn new(history: ExecutionHistory) -> Self {
        Self {
            history,
            step_count: AtomicU32::new(0),
            halt: Mutex::new(None),
            executing_step: Mutex::new(None),
        }
    }

    pub(crate) fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Number of step ids handed out so far.
    pub(crate) fn step_count(&self) -> u32 {
        self.step_count.load(Ordering::SeqCst)
    }

    /// Returns true once the invocation submitted, discarded or asked for a retry.
    pub(crate) fn is_halted(&self) -> bool {
        self.halt.lock().map(|h| h.is_some()).unwrap_or(true)
    }

    /// Takes the halt state at the end of the invocation.
    pub(crate) fn take_halt(&self) -> Option<Halt> {
        self.halt.lock().ok().and_then(|mut h| h.take())
    }

    fn set_halt(&self, halt: Halt) {
        if let Ok(mut current) = self.halt.lock() {
            if current.is_none() {
                *current = Some(halt);
            }
        }
    }

    /// Reserves `n` consecutive step ids and returns the first.
    fn reserve(&self, n: u32) -> u32 {
        self.step_count.fetch_add(n, Ordering::SeqCst) + 1
    }

    /// Resolves a sequential primitive.
    ///
    /// Returns the recorded step when replaying. Otherwise executes and
    /// submits it, then returns `Interrupt::Suspend`.
    pub(crate) async fn run_single(
        &self,
        ctx: &WorkflowContext,
        lazy: &dyn LazyStep,
    ) -> WorkflowResult<Step> {
        if self.is_halted() {
            return Err(Interrupt::Suspend);
        }
        let step_id = self.reserve(1);
        let replay = check_replay(&self.history, step_id, lazy.step_name(), lazy.step_type());
        self.history.track_replay(step_id);

        match replay? {
            ReplayResult::Replayed(step) => {
                tracing::debug!(
                    workflow_run_id = %ctx.workflow_run_id(),
                    step_id,
                    step_name = %step.step_name,
                    "Replayed step from history"
                );
                Ok(step)
            }
            ReplayResult::NotFound => self.execute_and_submit(ctx, lazy, step_id, 1).await,
        }
    }

    /// Resolves a concurrency group of primitives started together.
    ///
    /// Returns the recorded steps, in the order of `lazies`, once every
    /// member has resolved.
    pub(crate) async fn run_group(
        &self,
        ctx: &WorkflowContext,
        lazies: &[&dyn LazyStep],
    ) -> WorkflowResult<Vec<Step>> {
        match lazies {
            [] => return Ok(Vec::new()),
            [single] => return self.run_single(ctx, *single).await.map(|step| vec![step]),
            _ => {}
        }
        if self.is_halted() {
            return Err(Interrupt::Suspend);
        }

        let concurrent = lazies.len() as u32;
        let initial = self.reserve(concurrent);
        let state = infer_state(&self.history, initial, concurrent);
        self.history.track_replay(*group_range(initial, concurrent).end());

        let state = state?;
        tracing::debug!(
            workflow_run_id = %ctx.workflow_run_id(),
            initial,
            concurrent,
            state = ?state,
            "Inferred parallel state"
        );

        match state {
            ParallelCallState::Last => {
                let mut steps = Vec::with_capacity(lazies.len());
                for (offset, lazy) in lazies.iter().enumerate() {
                    let step_id = initial + offset as u32;
                    let recorded = self.history.result(step_id).ok_or_else(|| {
                        WorkflowError::internal(format!("missing result for step {}", step_id))
                    })?;
                    validate_step(lazy.step_name(), lazy.step_type(), recorded)?;
                    if recorded.is_failed() {
                        return Err(replayed_failure(recorded).into());
                    }
                    steps.push(recorded.clone());
                }
                Ok(steps)
            }
            ParallelCallState::First => {
                let mut requests = Vec::with_capacity(lazies.len());
                for (offset, lazy) in lazies.iter().enumerate() {
                    let plan = Step::plan(
                        lazy.step_name(),
                        lazy.plan_kind(),
                        concurrent,
                        initial + offset as u32,
                    );
                    requests.push(ctx.routing().continuation(&plan)?);
                }
                ctx.client().batch(requests).await?;
                tracing::debug!(
                    workflow_run_id = %ctx.workflow_run_id(),
                    initial,
                    concurrent,
                    "Submitted plan steps"
                );
                self.set_halt(Halt::Submitted);
                Err(Interrupt::Suspend)
            }
            ParallelCallState::Partial(target) => {
                let lazy = lazies[(target - initial) as usize];
                if let Some(plan) = self.history.last() {
                    validate_step(lazy.step_name(), lazy.step_type(), plan)?;
                }
                self.execute_and_submit(ctx, lazy, target, concurrent)
                    .await
                    .map(|step| vec![step])
            }
            ParallelCallState::Discard => {
                self.set_halt(Halt::Discarded);
                Err(Interrupt::Suspend)
            }
        }
    }

    async fn execute_and_submit(
        &self,
        ctx: &WorkflowContext,
        lazy: &dyn LazyStep,
        step_id: u32,
        concurrent: u32,
    ) -> WorkflowResult<Step> {
        self.begin_execution(lazy.step_name())?;
        ctx.middleware()
            .dispatch_lifecycle(LifecycleEvent::BeforeExecution {
                step_name: lazy.step_name().to_string(),
            })
            .await?;

        let outcome = lazy.execute(ctx, step_id, concurrent).await;
        self.end_execution();

        let submission = match outcome {
            Ok(submission) => submission,
            Err(error) => {
                return self
                    .handle_body_failure(ctx, lazy, step_id, concurrent, error)
                    .await
            }
        };

        ctx.middleware()
            .dispatch_lifecycle(LifecycleEvent::AfterExecution {
                step_name: lazy.step_name().to_string(),
                result: submission.step().out.clone(),
            })
            .await?;
        self.submit(ctx, submission).await?;
        self.set_halt(Halt::Submitted);
        Err(Interrupt::Suspend)
    }

    /// Retries transient failures through the queue and records terminal
    /// ones as failed steps, so user code sees them on the next invocation.
    async fn handle_body_failure(
        &self,
        ctx: &WorkflowContext,
        lazy: &dyn LazyStep,
        step_id: u32,
        concurrent: u32,
        error: WorkflowError,
    ) -> WorkflowResult<Step> {
        let retries_left = ctx.attempt() < ctx.routing().retries;
        if error.is_retry_after() || (!error.is_non_retryable() && retries_left) {
            tracing::warn!(
                workflow_run_id = %ctx.workflow_run_id(),
                step_id,
                step_name = %lazy.step_name(),
                attempt = ctx.attempt(),
                error = %error,
                "Step failed, leaving retry to the queue"
            );
            self.set_halt(Halt::Retry(error));
            return Err(Interrupt::Suspend);
        }

        tracing::warn!(
            workflow_run_id = %ctx.workflow_run_id(),
            step_id,
            step_name = %lazy.step_name(),
            error = %error,
            "Step failed terminally"
        );
        let failed = Step::new(step_id, lazy.step_name(), lazy.plan_kind())
            .with_error(StepFailure::new(error.error_type(), error.message()))
            .with_concurrent(concurrent);
        self.submit(ctx, Submission::Continue(failed)).await?;
        self.set_halt(Halt::Submitted);
        Err(Interrupt::Suspend)
    }

    async fn submit(&self, ctx: &WorkflowContext, submission: Submission) -> Result<(), WorkflowError> {
        let routing = ctx.routing();
        let client = ctx.client();
        let step_id = submission.step().step_id;
        match submission {
            Submission::Continue(step) => {
                client.publish(routing.continuation(&step)?).await?;
            }
            Submission::Call { step, settings } => {
                client.publish(call_request(routing, &step, &settings)?).await?;
            }
            Submission::Invoke { step, settings } => {
                client.publish(invoke_request(routing, &step, &settings)?).await?;
            }
            Submission::Wait {
                step,
                event_id,
                timeout,
            } => {
                client
                    .wait(wait_request(routing, &step, &event_id, timeout)?)
                    .await?;
            }
        }
        tracing::debug!(
            workflow_run_id = %ctx.workflow_run_id(),
            step_id,
            "Submitted step"
        );
        Ok(())
    }

    fn begin_execution(&self, step_name: &str) -> Result<(), WorkflowError> {
        let mut executing = self
            .executing_step
            .lock()
            .map_err(|_| WorkflowError::internal("executor lock poisoned"))?;
        if let Some(outer) = executing.as_ref() {
            return Err(WorkflowError::validation(format!(
                "Step '{}' was started inside the body of step '{}'. Workflow primitives cannot be nested.",
                step_name, outer
            )));
        }
        *executing = Some(step_name.to_string());
        Ok(())
    }

    fn end_execution(&self) {
        if let Ok(mut executing) = self.executing_step.lock() {
            *executing = None;
        }
    }
}
