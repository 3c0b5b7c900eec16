//! Integration tests for concurrency groups.
//!
//! A group of N steps is resolved over several invocations: the first one
//! submits a plan per member, each plan delivery executes one member, and
//! the invocation that sees every result moves past the group. Result
//! deliveries that arrive while members are still pending, and queue
//! re-deliveries, are acknowledged without submitting anything.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use upstash_workflow::{
    BoxError, CallResponse, CallSettings, Duration, Interrupt, NonRetryableError, StepType,
    WorkflowContext, WorkflowResult,
};
use upstash_workflow_testing::CallStub;

use common::*;

async fn fan_out(ctx: WorkflowContext) -> WorkflowResult<String> {
    let (a, b): (String, String) = ctx
        .join2(
            ctx.run("a", || async { Ok::<_, BoxError>("A".to_string()) }),
            ctx.run("b", || async { Ok::<_, BoxError>("B".to_string()) }),
        )
        .await?;
    Ok(format!("{}{}", a, b))
}

// =============================================================================
// Scenario B: two-way fan-out
// =============================================================================

#[tokio::test]
async fn test_first_invocation_submits_one_plan_per_member() {
    let (mock, handler) = mock_handler(fan_out);

    let response = handler.handle(init_request(PAYLOAD)).await;

    assert_eq!(response.status(), 200);
    assert!(mock.get_published().is_empty());
    let batches = mock.get_batches();
    assert_eq!(batches.len(), 1);
    let plans: Vec<_> = batches[0].iter().map(|r| published_step(&r.body)).collect();
    assert_eq!(plans.len(), 2);
    for (i, (plan, name)) in plans.iter().zip(["a", "b"]).enumerate() {
        assert!(plan.is_plan());
        assert_eq!(plan.step_id, 0);
        assert_eq!(plan.step_name, name);
        assert_eq!(plan.concurrent, 2);
        assert_eq!(plan.target_step, Some(i as u32 + 1));
        assert!(plan.out.is_none());
    }
}

#[tokio::test]
async fn test_plan_delivery_executes_only_its_member() {
    let (mock, handler) = mock_handler(fan_out);

    let response = handler
        .handle(continuation_request(&[run_plan("a", 2, 1)]))
        .await;

    assert_eq!(response.status(), 200);
    let steps = mock.published_steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_id, 1);
    assert_eq!(steps[0].step_name, "a");
    assert_eq!(steps[0].step_type(), StepType::Run);
    assert_eq!(steps[0].concurrent, 2);
    assert_eq!(steps[0].out.as_deref(), Some("\"A\""));
}

#[tokio::test]
async fn test_second_plan_executes_the_other_member() {
    let (mock, handler) = mock_handler(fan_out);

    handler
        .handle(continuation_request(&[run_plan("a", 2, 1), run_plan("b", 2, 2)]))
        .await;

    let steps = mock.published_steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_id, 2);
    assert_eq!(steps[0].step_name, "b");
    assert_eq!(steps[0].out.as_deref(), Some("\"B\""));
}

#[tokio::test]
async fn test_early_result_is_discarded() {
    let (mock, handler) = mock_handler(fan_out);

    let response = handler
        .handle(continuation_request(&[
            run_plan("a", 2, 1),
            run_plan("b", 2, 2),
            group_result(1, "a", &"A", 2),
        ]))
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(mock.submission_count(), 0);
    assert!(mock.get_completed().is_empty());
}

#[tokio::test]
async fn test_last_result_resolves_the_group() {
    let (mock, handler) = mock_handler(fan_out);

    let response = handler
        .handle(continuation_request(&[
            run_plan("a", 2, 1),
            run_plan("b", 2, 2),
            group_result(2, "b", &"B", 2),
            group_result(1, "a", &"A", 2),
        ]))
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(mock.submission_count(), 0);
    let completed = mock.get_completed();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].result.as_deref(), Some("\"AB\""));
}

#[tokio::test]
async fn test_duplicate_result_after_resolution_is_not_a_crash() {
    let (mock, handler) = mock_handler(fan_out);
    let result_a = group_result(1, "a", &"A", 2);

    let response = handler
        .handle(continuation_request(&[
            run_plan("a", 2, 1),
            run_plan("b", 2, 2),
            result_a.clone(),
            group_result(2, "b", &"B", 2),
            result_a,
        ]))
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(mock.submission_count(), 0);
    assert!(mock.get_completed().is_empty());
}

#[tokio::test]
async fn test_group_size_change_is_non_deterministic() {
    let (mock, handler) = mock_handler(|ctx: WorkflowContext| async move {
        let values: Vec<u32> = ctx
            .all(vec![
                ctx.run("a", || async { Ok::<_, BoxError>(1) }),
                ctx.run("b", || async { Ok::<_, BoxError>(2) }),
                ctx.run("c", || async { Ok::<_, BoxError>(3) }),
            ])
            .await?;
        Ok::<_, Interrupt>(values.iter().sum::<u32>())
    });

    let response = handler
        .handle(continuation_request(&[run_plan("a", 2, 1), run_plan("b", 2, 2)]))
        .await;

    assert_eq!(response.status(), 489);
    assert_eq!(body_json(&response)["error"], "NonDeterministicError");
    assert_eq!(mock.submission_count(), 0);
}

#[tokio::test]
async fn test_sequential_step_after_group_continues_numbering() {
    let (mock, handler) = mock_handler(|ctx: WorkflowContext| async move {
        let (a, b): (u32, u32) = ctx
            .join2(
                ctx.run("a", || async { Ok::<_, BoxError>(1) }),
                ctx.run("b", || async { Ok::<_, BoxError>(2) }),
            )
            .await?;
        let sum: u32 = ctx
            .run("sum", move || async move { Ok::<_, BoxError>(a + b) })
            .await?;
        Ok::<_, Interrupt>(sum)
    });

    handler
        .handle(continuation_request(&[
            run_plan("a", 2, 1),
            run_plan("b", 2, 2),
            group_result(1, "a", &1, 2),
            group_result(2, "b", &2, 2),
        ]))
        .await;

    let steps = mock.published_steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_id, 3);
    assert_eq!(steps[0].step_name, "sum");
    assert_eq!(steps[0].concurrent, 1);
    assert_eq!(steps[0].out.as_deref(), Some("3"));
}

// =============================================================================
// End-to-end through the local queue
// =============================================================================

#[tokio::test]
async fn test_local_queue_resolves_fan_out() {
    let queue = local_handler(fan_out, |_| {});

    let run_id = queue.trigger(WORKFLOW_URL, PAYLOAD).await.unwrap();
    queue.run_until_idle().await.unwrap();

    assert_eq!(queue.completed(&run_id), Some(Some("\"AB\"".to_string())));
    let results: Vec<_> = queue
        .history(&run_id)
        .into_iter()
        .filter(|s| !s.is_plan())
        .map(|s| (s.step_id, s.step_name))
        .collect();
    assert_eq!(results, vec![(1, "a".to_string()), (2, "b".to_string())]);
}

#[tokio::test]
async fn test_local_queue_redelivery_runs_each_member_once() {
    let executions = Arc::new(AtomicUsize::new(0));
    let counter = executions.clone();
    let queue = local_handler(
        move |ctx: WorkflowContext| {
            let counter = counter.clone();
            async move {
                let first = counter.clone();
                let second = counter.clone();
                let (a, b): (u32, u32) = ctx
                    .join2(
                        ctx.run("a", move || async move {
                            first.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, BoxError>(1)
                        }),
                        ctx.run("b", move || async move {
                            second.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, BoxError>(2)
                        }),
                    )
                    .await?;
                Ok::<_, Interrupt>(a + b)
            }
        },
        |_| {},
    );

    let run_id = queue.trigger(WORKFLOW_URL, PAYLOAD).await.unwrap();
    queue.duplicate_next_delivery();
    queue.run_until_idle().await.unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert_eq!(queue.completed(&run_id), Some(Some("3".to_string())));
    assert!(queue.deliveries().iter().all(|d| d.is_success()));
}

#[tokio::test]
async fn test_local_queue_resolves_mixed_group_then_continues() {
    const PRICE_URL: &str = "https://prices.test/quote";
    let queue = local_handler(
        |ctx: WorkflowContext| async move {
            let (n, (), quote): (u32, (), CallResponse<serde_json::Value>) = ctx
                .join3(
                    ctx.run("count", || async { Ok::<_, BoxError>(7) }),
                    ctx.sleep("pause", Duration::from_seconds(1)),
                    ctx.call("quote", CallSettings::new(PRICE_URL)),
                )
                .await?;
            let tail: u32 = ctx.run("tail", || async { Ok::<_, BoxError>(1) }).await?;
            Ok::<_, Interrupt>(format!("{}-{}-{}", n, quote.status, tail))
        },
        |_| {},
    );
    queue.stub_call(PRICE_URL, CallStub::json(&serde_json::json!({"price": 3})));

    let run_id = queue.trigger(WORKFLOW_URL, PAYLOAD).await.unwrap();
    queue.run_until_idle().await.unwrap();

    assert_eq!(queue.completed(&run_id), Some(Some("\"7-200-1\"".to_string())));
    let ids: Vec<u32> = queue
        .history(&run_id)
        .into_iter()
        .filter(|s| !s.is_plan())
        .map(|s| s.step_id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_failed_group_member_is_catchable_at_the_join() {
    let queue = local_handler(
        |ctx: WorkflowContext| async move {
            let joined = ctx
                .join2(
                    ctx.run("good", || async { Ok::<_, BoxError>(5) }),
                    ctx.run("bad", || async {
                        Err::<u32, BoxError>(NonRetryableError::new("nope").into())
                    }),
                )
                .await;
            Ok::<_, Interrupt>(match joined {
                Ok((a, b)) => format!("sum {}", a + b),
                Err(Interrupt::Error(error)) => format!("caught {}", error),
                Err(suspend) => return Err(suspend),
            })
        },
        |_| {},
    );

    let run_id = queue.trigger(WORKFLOW_URL, PAYLOAD).await.unwrap();
    queue.run_until_idle().await.unwrap();

    let completed = queue.completed(&run_id).flatten().unwrap();
    assert!(completed.starts_with("\"caught"), "{}", completed);
    assert!(completed.contains("nope"));
}

// =============================================================================
// Idempotent resolution
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Whatever order member results arrive in, a group resolves only when
    /// every result is present, and a re-delivered result never submits.
    #[test]
    fn prop_group_resolution_is_idempotent(
        names in step_names_strategy(5).prop_filter("a group needs two members", |n| n.len() >= 2),
        order in any::<u64>(),
        delivered_seed in any::<usize>(),
        duplicate_seed in any::<usize>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = rt.block_on(async {
            let names = Arc::new(names);
            let n = names.len() as u32;
            let route_names = names.clone();
            let (mock, handler) = mock_handler(move |ctx: WorkflowContext| {
                let names = route_names.clone();
                async move {
                    let steps = names
                        .iter()
                        .map(|name| {
                            let len = name.len();
                            ctx.run(name.clone(), move || async move { Ok::<_, BoxError>(len) })
                        })
                        .collect();
                    let lens: Vec<usize> = ctx.all(steps).await?;
                    Ok::<_, Interrupt>(lens.iter().sum::<usize>())
                }
            });

            let mut history: Vec<_> = names
                .iter()
                .enumerate()
                .map(|(i, name)| run_plan(name, n, i as u32 + 1))
                .collect();
            let mut members: Vec<usize> = (0..names.len()).collect();
            let mut seed = order;
            for i in (1..members.len()).rev() {
                members.swap(i, (seed % (i as u64 + 1)) as usize);
                seed /= i as u64 + 1;
            }
            let delivered = 1 + delivered_seed % names.len();
            for &i in members.iter().take(delivered) {
                history.push(group_result(i as u32 + 1, &names[i], &names[i].len(), n));
            }
            let duplicate = members[duplicate_seed % delivered];
            history.push(group_result(
                duplicate as u32 + 1,
                &names[duplicate],
                &names[duplicate].len(),
                n,
            ));

            let response = handler.handle(continuation_request(&history)).await;
            prop_assert_eq!(response.status(), 200);
            prop_assert_eq!(mock.submission_count(), 0);
            prop_assert!(mock.get_completed().is_empty());

            history.pop();
            mock.clear_calls();
            handler.handle(continuation_request(&history)).await;
            prop_assert_eq!(mock.submission_count(), 0);
            if delivered == names.len() {
                let total: usize = names.iter().map(|s| s.len()).sum();
                prop_assert_eq!(
                    mock.get_completed()[0].result.clone(),
                    Some(total.to_string())
                );
            } else {
                prop_assert!(mock.get_completed().is_empty());
            }
            Ok(())
        });
        result?;
    }
}
