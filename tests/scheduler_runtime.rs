// tests/scheduler_runtime.rs

mod common;
use crate::common::builders::{generic, PipelineBuilder};
use crate::common::{init_tracing, TestResult};

use std::sync::Arc;
use std::time::Duration;

use gendag::dag::{PipelineStore, SharedStore, TaskSpec};
use gendag::engine::{Scheduler, SchedulerEvent, SchedulerOptions};
use gendag::types::{PipelineId, PipelineStatus, TaskStatus};
use gendag_test_utils::fake_executor::FakeExecutor;
use gendag_test_utils::with_timeout;
use tokio::sync::broadcast;

fn fast() -> SchedulerOptions {
    SchedulerOptions {
        tick_interval: Duration::from_millis(10),
    }
}

fn shared_with_active(specs: Vec<TaskSpec>) -> Result<(SharedStore, PipelineId), Box<dyn std::error::Error>> {
    let store = PipelineStore::shared();
    let pid = {
        let mut guard = store.lock();
        let pid = guard.create_pipeline("runtime", specs)?;
        guard.set_active_pipeline(Some(&pid));
        pid
    };
    Ok((store, pid))
}

/// Collect events until `pid` finishes.
async fn run_until_finished(
    events: &mut broadcast::Receiver<SchedulerEvent>,
    pid: &str,
) -> (PipelineStatus, Vec<SchedulerEvent>) {
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.expect("event stream open");
        if let SchedulerEvent::PipelineFinished {
            pipeline_id,
            status,
        } = &event
        {
            if pipeline_id == pid {
                return (*status, seen);
            }
        }
        seen.push(event);
    }
}

#[tokio::test]
async fn chain_runs_in_dependency_order() -> TestResult {
    init_tracing();
    let specs = PipelineBuilder::new()
        .generic("A", &[])
        .generic("B", &["A"])
        .generic("C", &["B"])
        .build();
    let (store, pid) = shared_with_active(specs)?;

    let executor = Arc::new(FakeExecutor::new());
    let mut scheduler = Scheduler::new(store.clone(), Arc::clone(&executor), fast());
    let mut events = scheduler.subscribe();
    scheduler.start();
    assert!(scheduler.is_running());

    let (status, seen) = with_timeout(run_until_finished(&mut events, &pid)).await;
    scheduler.stop().await;
    assert!(!scheduler.is_running());

    assert_eq!(status, PipelineStatus::Completed);
    assert_eq!(executor.calls(), vec!["A", "B", "C"]);

    let completed: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::TaskCompleted { task_id, .. } => Some(task_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["A", "B", "C"]);

    let guard = store.lock();
    assert_eq!(guard.active_pipeline_id(), None);
    assert_eq!(guard.summary(&pid).map(|s| s.completed), Some(3));
    Ok(())
}

#[tokio::test]
async fn flaky_task_is_retried_and_succeeds() -> TestResult {
    init_tracing();
    let specs = PipelineBuilder::new()
        .task(generic("A").max_retries(2))
        .generic("B", &["A"])
        .build();
    let (store, pid) = shared_with_active(specs)?;

    let executor = Arc::new(FakeExecutor::new().fail_times("A", 2));
    let mut scheduler = Scheduler::new(store.clone(), Arc::clone(&executor), fast());
    let mut events = scheduler.subscribe();
    scheduler.start();

    let (status, seen) = with_timeout(run_until_finished(&mut events, &pid)).await;
    scheduler.stop().await;

    assert_eq!(status, PipelineStatus::Completed);
    assert_eq!(executor.attempts("A"), 3);
    assert_eq!(executor.calls(), vec!["A", "A", "A", "B"]);

    let retries: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::TaskRetrying { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
    assert_eq!(store.lock().task(&pid, "A").map(|t| t.retry_count), Some(2));
    Ok(())
}

#[tokio::test]
async fn exhausted_failure_skips_dependents_and_fails_pipeline() -> TestResult {
    init_tracing();
    let specs = PipelineBuilder::new()
        .task(generic("A").max_retries(1))
        .generic("B", &["A"])
        .generic("C", &["B"])
        .generic("D", &[])
        .build();
    let (store, pid) = shared_with_active(specs)?;

    let executor = Arc::new(FakeExecutor::new().always_fail("A"));
    let mut scheduler = Scheduler::new(store.clone(), Arc::clone(&executor), fast());
    let mut events = scheduler.subscribe();
    scheduler.start();

    let (status, seen) = with_timeout(run_until_finished(&mut events, &pid)).await;
    scheduler.stop().await;

    assert_eq!(status, PipelineStatus::Failed);
    assert_eq!(executor.attempts("A"), 2);
    assert!(!executor.calls().contains(&"B".to_string()));

    let failed = seen.iter().find_map(|e| match e {
        SchedulerEvent::TaskFailed {
            task_id,
            error,
            skipped,
            ..
        } => Some((task_id.clone(), error.clone(), skipped.clone())),
        _ => None,
    });
    let (task_id, error, mut skipped) = failed.ok_or("no TaskFailed event")?;
    assert_eq!(task_id, "A");
    assert!(error.contains("scripted failure"));
    skipped.sort();
    assert_eq!(skipped, vec!["B", "C"]);

    let guard = store.lock();
    assert_eq!(guard.task(&pid, "D").map(|t| t.status), Some(TaskStatus::Completed));
    assert_eq!(guard.task(&pid, "C").map(|t| t.status), Some(TaskStatus::Skipped));
    Ok(())
}

#[tokio::test]
async fn independent_tasks_run_concurrently() -> TestResult {
    init_tracing();
    let (store, pid) = shared_with_active(vec![generic("A"), generic("B"), generic("C")])?;

    let executor = Arc::new(
        FakeExecutor::new()
            .delay("A", Duration::from_millis(50))
            .delay("B", Duration::from_millis(50))
            .delay("C", Duration::from_millis(50)),
    );
    let mut scheduler = Scheduler::new(store.clone(), Arc::clone(&executor), fast());
    let mut events = scheduler.subscribe();
    scheduler.start();

    let (status, _) = with_timeout(run_until_finished(&mut events, &pid)).await;
    scheduler.stop().await;

    assert_eq!(status, PipelineStatus::Completed);
    assert_eq!(executor.max_in_flight(), 3);
    Ok(())
}

#[tokio::test]
async fn result_arriving_after_stop_is_still_recorded() -> TestResult {
    init_tracing();
    let (store, pid) = shared_with_active(vec![generic("A")])?;

    let executor = Arc::new(FakeExecutor::new());
    let gate = executor.gate("A");
    let mut scheduler = Scheduler::new(store.clone(), Arc::clone(&executor), fast());
    let mut events = scheduler.subscribe();
    scheduler.start();

    with_timeout(async {
        loop {
            if let Ok(SchedulerEvent::TaskDispatched { task_id, .. }) = events.recv().await {
                if task_id == "A" {
                    break;
                }
            }
        }
    })
    .await;

    scheduler.stop().await;
    gate.notify_one();

    with_timeout(async {
        loop {
            let status = store.lock().task(&pid, "A").map(|t| t.status);
            if status == Some(TaskStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    // Nothing ticks any more, so the pipeline is never finalized.
    assert_eq!(
        store.lock().pipeline(&pid).map(|p| p.status),
        Some(PipelineStatus::Active)
    );
    Ok(())
}

#[tokio::test]
async fn cancelled_running_task_result_is_discarded() -> TestResult {
    init_tracing();
    let specs = PipelineBuilder::new()
        .generic("A", &[])
        .generic("B", &["A"])
        .build();
    let (store, pid) = shared_with_active(specs)?;

    let executor = Arc::new(FakeExecutor::new());
    let gate = executor.gate("A");
    let mut scheduler = Scheduler::new(store.clone(), Arc::clone(&executor), fast());
    let mut events = scheduler.subscribe();
    scheduler.start();

    with_timeout(async {
        loop {
            if let Ok(SchedulerEvent::TaskDispatched { task_id, .. }) = events.recv().await {
                if task_id == "A" {
                    break;
                }
            }
        }
    })
    .await;

    store.lock().cancel_task(&pid, "A");
    gate.notify_one();

    let (status, seen) = with_timeout(run_until_finished(&mut events, &pid)).await;
    scheduler.stop().await;

    assert_eq!(status, PipelineStatus::Cancelled);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SchedulerEvent::TaskCompleted { .. })));
    let guard = store.lock();
    assert_eq!(guard.task(&pid, "A").map(|t| t.status), Some(TaskStatus::Cancelled));
    assert_eq!(guard.task(&pid, "B").map(|t| t.status), Some(TaskStatus::Skipped));
    Ok(())
}

#[tokio::test]
async fn panicking_executor_fails_task_and_skips_dependents() -> TestResult {
    init_tracing();
    let specs = PipelineBuilder::new()
        .generic("A", &[])
        .generic("B", &["A"])
        .build();
    let (store, pid) = shared_with_active(specs)?;

    let executor = Arc::new(FakeExecutor::new().panic_times("A", u32::MAX));
    let mut scheduler = Scheduler::new(store.clone(), Arc::clone(&executor), fast());
    let mut events = scheduler.subscribe();
    scheduler.start();

    let (status, seen) = with_timeout(run_until_finished(&mut events, &pid)).await;
    scheduler.stop().await;

    assert_eq!(status, PipelineStatus::Failed);
    let error = seen
        .iter()
        .find_map(|e| match e {
            SchedulerEvent::TaskFailed { task_id, error, .. } if task_id == "A" => {
                Some(error.clone())
            }
            _ => None,
        })
        .ok_or("no TaskFailed event for A")?;
    assert!(error.contains("executor panicked"), "unexpected error: {error}");

    let guard = store.lock();
    assert_eq!(guard.task(&pid, "A").map(|t| t.status), Some(TaskStatus::Failed));
    assert_eq!(guard.task(&pid, "B").map(|t| t.status), Some(TaskStatus::Skipped));
    assert_eq!(guard.active_pipeline_id(), None);
    Ok(())
}

#[tokio::test]
async fn panic_counts_as_a_retryable_attempt() -> TestResult {
    init_tracing();
    let (store, pid) = shared_with_active(vec![generic("A").max_retries(1)])?;

    let executor = Arc::new(FakeExecutor::new().panic_times("A", 1));
    let mut scheduler = Scheduler::new(store.clone(), Arc::clone(&executor), fast());
    let mut events = scheduler.subscribe();
    scheduler.start();

    let (status, seen) = with_timeout(run_until_finished(&mut events, &pid)).await;
    scheduler.stop().await;

    assert_eq!(status, PipelineStatus::Completed);
    assert_eq!(executor.attempts("A"), 2);
    assert!(seen.iter().any(|e| matches!(
        e,
        SchedulerEvent::TaskRetrying { error, .. } if error.contains("executor panicked")
    )));
    assert_eq!(store.lock().task(&pid, "A").map(|t| t.retry_count), Some(1));
    Ok(())
}
