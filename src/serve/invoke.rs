//! Reporting an invoked run's outcome to its parent.

use crate::client::SharedQueueClient;
use crate::error::WorkflowError;
use crate::handlers::invoke::InvokeOut;
use crate::headers::{InvokerInfo, Routing};
use crate::step::{Step, StepKind};

/// Publishes the parent's `Invoke` result step.
///
/// # Arguments
///
/// * `client` - Queue client of the child endpoint
/// * `routing` - Routing of the child run; its retries and telemetry carry over
/// * `invoker` - The parent run and its invoke step
/// * `out` - The child's result or failure
pub(crate) async fn notify_invoker(
    client: &SharedQueueClient,
    routing: &Routing,
    invoker: &InvokerInfo,
    out: InvokeOut,
) -> Result<(), WorkflowError> {
    let mut parent = Routing::new(
        &invoker.workflow_run_id,
        &invoker.workflow_url,
        routing.retries,
    );
    parent.telemetry = routing.telemetry;

    let step = Step::new(invoker.step.step_id, &invoker.step.step_name, StepKind::Invoke)
        .with_out(serde_json::to_string(&out)?)
        .with_concurrent(invoker.step.concurrent);

    client.publish(parent.continuation(&step)?).await?;
    tracing::debug!(
        workflow_run_id = %routing.workflow_run_id,
        parent_run_id = %invoker.workflow_run_id,
        step_id = step.step_id,
        is_failed = out.is_failed,
        "Reported invoked run outcome to parent"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::MockQueueClient;
    use crate::headers::WORKFLOW_ID_HEADER;

    #[tokio::test]
    async fn test_parent_receives_invoke_result() {
        let mock = Arc::new(MockQueueClient::new());
        let client: SharedQueueClient = mock.clone();
        let routing = Routing::new("wfr_child", "https://app/child", 2);
        let invoker = InvokerInfo {
            workflow_run_id: "wfr_parent".to_string(),
            workflow_url: "https://app/parent".to_string(),
            step: Step::new(4, "run-child", StepKind::Invoke).with_concurrent(2),
        };
        let out = InvokeOut {
            body: Some("\"done\"".to_string()),
            is_failed: false,
            is_canceled: false,
        };

        notify_invoker(&client, &routing, &invoker, out.clone())
            .await
            .unwrap();

        let published = mock.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].url, "https://app/parent");
        assert_eq!(published[0].header(WORKFLOW_ID_HEADER), Some("wfr_parent"));
        let step: Step = serde_json::from_str(&published[0].body).unwrap();
        assert_eq!(step.step_id, 4);
        assert_eq!(step.concurrent, 2);
        let recorded: InvokeOut = serde_json::from_str(step.out.as_deref().unwrap()).unwrap();
        assert_eq!(recorded, out);
    }
}
