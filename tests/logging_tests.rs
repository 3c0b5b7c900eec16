//! Integration tests for the diagnostics the engine emits through `tracing`.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;

use upstash_workflow::{logging_middleware, BoxError, WorkflowContext, WorkflowResult};

use common::*;

/// One captured event: its level and its recorded fields.
#[derive(Debug, Clone)]
struct Captured {
    level: Level,
    fields: HashMap<String, String>,
}

impl Captured {
    fn message(&self) -> &str {
        self.fields.get("message").map(String::as_str).unwrap_or_default()
    }
}

#[derive(Default)]
struct FieldCapture {
    fields: HashMap<String, String>,
}

impl Visit for FieldCapture {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{:?}", value));
    }
}

struct EventCaptureLayer {
    captured: Arc<Mutex<Vec<Captured>>>,
}

impl<S: Subscriber> tracing_subscriber::Layer<S> for EventCaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut capture = FieldCapture::default();
        event.record(&mut capture);
        self.captured.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            fields: capture.fields,
        });
    }
}

/// Runs `f` with a capturing subscriber installed and returns every event.
fn capture<F: FnOnce()>(f: F) -> Vec<Captured> {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(EventCaptureLayer {
        captured: captured.clone(),
    });
    tracing::subscriber::with_default(subscriber, f);
    let events = captured.lock().unwrap().clone();
    events
}

async fn two_steps(ctx: WorkflowContext) -> WorkflowResult<u32> {
    let first: u32 = ctx.run("first", || async { Ok::<_, BoxError>(1) }).await?;
    let second: u32 = ctx
        .run("second", move || async move { Ok::<_, BoxError>(first + 1) })
        .await?;
    Ok(second)
}

#[test]
fn test_replayed_step_is_logged_with_its_name() {
    let (_mock, handler) = mock_handler(two_steps);

    let events = capture(|| {
        tokio_test::block_on(handler.handle(continuation_request(&[run_result(1, "first", &1)])));
    });

    let replayed = events
        .iter()
        .find(|e| e.message() == "Replayed step from history")
        .expect("replay event");
    assert_eq!(replayed.level, Level::DEBUG);
    assert_eq!(replayed.fields["step_name"], "first");
    assert_eq!(replayed.fields["workflow_run_id"], RUN_ID);
}

#[test]
fn test_duplicate_delivery_is_logged_and_skipped() {
    let (mock, handler) = mock_handler(two_steps);
    let step = run_result(1, "first", &1);

    let events = capture(|| {
        tokio_test::block_on(handler.handle(continuation_request(&[step.clone(), step])));
    });

    assert_eq!(mock.submission_count(), 0);
    assert!(events
        .iter()
        .any(|e| e.message() == "Duplicate delivery, skipping"));
    assert!(!events
        .iter()
        .any(|e| e.message() == "Replayed step from history"));
}

#[test]
fn test_logging_middleware_reports_executed_steps_at_info() {
    let mock = Arc::new(upstash_workflow_testing::MockQueueClient::new());
    let mut options = mock_options(&mock);
    options.middlewares.push(logging_middleware());
    let handler = upstash_workflow::serve(two_steps, options).unwrap();

    let events = capture(|| {
        tokio_test::block_on(handler.handle(init_request(PAYLOAD)));
    });

    let info: Vec<&str> = events
        .iter()
        .filter(|e| e.level == Level::INFO)
        .map(Captured::message)
        .collect();
    assert_eq!(
        info,
        vec!["Workflow run started", "Executing step", "Step executed"]
    );
    let executing = events
        .iter()
        .find(|e| e.message() == "Executing step")
        .unwrap();
    assert_eq!(executing.fields["step_name"], "first");
}
