//! Ready-made middleware that logs every event through `tracing`.

use std::sync::Arc;

use super::{MiddlewareCallbacks, WorkflowMiddleware};

/// Middleware logging every lifecycle and diagnostic event at info level.
///
/// # Example
///
/// ```rust,ignore
/// let options = ServeOptions {
///     middlewares: vec![logging_middleware()],
///     ..Default::default()
/// };
/// ```
pub fn logging_middleware() -> Arc<WorkflowMiddleware> {
    let callbacks = MiddlewareCallbacks::default()
        .on_run_started(|event| async move {
            tracing::info!(
                workflow_run_id = %event.workflow_run_id,
                workflow_url = %event.workflow_url,
                "Workflow run started"
            );
            Ok(())
        })
        .on_before_execution(|event| async move {
            tracing::info!(
                workflow_run_id = %event.workflow_run_id,
                step_name = %event.step_name,
                "Executing step"
            );
            Ok(())
        })
        .on_after_execution(|event| async move {
            tracing::info!(
                workflow_run_id = %event.workflow_run_id,
                step_name = %event.step_name,
                result = ?event.result,
                "Step executed"
            );
            Ok(())
        })
        .on_run_completed(|event| async move {
            tracing::info!(
                workflow_run_id = %event.workflow_run_id,
                result = ?event.result,
                "Workflow run completed"
            );
            Ok(())
        })
        .on_error(|message| async move {
            tracing::info!(workflow_run_id = ?message.workflow_run_id, "Error: {}", message.message);
            Ok(())
        })
        .on_warning(|message| async move {
            tracing::info!(workflow_run_id = ?message.workflow_run_id, "Warning: {}", message.message);
            Ok(())
        })
        .on_info(|message| async move {
            tracing::info!(workflow_run_id = ?message.workflow_run_id, "{}", message.message);
            Ok(())
        });
    Arc::new(WorkflowMiddleware::new("logging", callbacks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_middleware_defines_every_hook() {
        let middleware = logging_middleware();
        let callbacks = middleware.callbacks().await;
        assert_eq!(middleware.name(), "logging");
        assert!(callbacks.run_started.is_some());
        assert!(callbacks.before_execution.is_some());
        assert!(callbacks.after_execution.is_some());
        assert!(callbacks.run_completed.is_some());
        assert!(callbacks.on_error.is_some());
        assert!(callbacks.on_warning.is_some());
        assert!(callbacks.on_info.is_some());
    }
}
