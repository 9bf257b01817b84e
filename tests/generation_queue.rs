// tests/generation_queue.rs

mod common;
use crate::common::{init_tracing, TestResult};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use gendag::queue::{BreakerState, GenerationJob, GenerationQueue, QueueError, QueueOptions};
use gendag::types::ResourceType;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn queue(concurrency: usize, threshold: u32, cooldown_secs: u64) -> GenerationQueue {
    GenerationQueue::new(QueueOptions {
        concurrency,
        breaker_threshold: threshold,
        breaker_cooldown: Duration::from_secs(cooldown_secs),
    })
}

async fn settle_until(cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

/// Occupy one slot until the returned sender fires.
async fn hold_slot(queue: &GenerationQueue) -> (oneshot::Sender<()>, JoinHandle<anyhow::Result<()>>) {
    let (release, released) = oneshot::channel::<()>();
    let before = queue.running();
    let q = queue.clone();
    let handle = tokio::spawn(async move {
        q.enqueue(GenerationJob::new("hold", ResourceType::Video, async move {
            let _ = released.await;
            anyhow::Ok(())
        }))
        .await
    });
    settle_until(|| queue.running() > before).await;
    (release, handle)
}

async fn fail_once(queue: &GenerationQueue, id: &str) -> anyhow::Error {
    queue
        .enqueue(GenerationJob::new(id, ResourceType::Image, async {
            Err::<(), _>(anyhow!("backend down"))
        }))
        .await
        .expect_err("job should fail")
}

#[tokio::test(start_paused = true)]
async fn concurrency_one_runs_jobs_one_at_a_time() -> TestResult {
    init_tracing();
    let queue = queue(1, 5, 60);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..4 {
        let q = queue.clone();
        let in_flight = Arc::clone(&in_flight);
        let max_seen = Arc::clone(&max_seen);
        handles.push(tokio::spawn(async move {
            q.enqueue(GenerationJob::new(format!("job-{i}"), ResourceType::Image, async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                anyhow::Ok(i)
            }))
            .await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await??);
    }
    results.sort();

    assert_eq!(results, vec![0, 1, 2, 3]);
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(queue.running(), 0);
    assert_eq!(queue.size(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn higher_priority_runs_first_and_ties_keep_arrival_order() -> TestResult {
    init_tracing();
    let queue = queue(1, 5, 60);
    let (release, holder) = hold_slot(&queue).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for (id, priority) in [("low", 0), ("high", 10), ("mid-1", 5), ("mid-2", 5)] {
        let q = queue.clone();
        let order = Arc::clone(&order);
        let waiting = queue.size();
        handles.push(tokio::spawn(async move {
            q.enqueue(
                GenerationJob::new(id, ResourceType::Image, async move {
                    order.lock().unwrap().push(id);
                    anyhow::Ok(())
                })
                .priority(priority),
            )
            .await
        }));
        settle_until(|| queue.size() > waiting).await;
    }
    assert_eq!(queue.stats().waiting, 4);

    let _ = release.send(());
    holder.await??;
    for handle in handles {
        handle.await??;
    }

    assert_eq!(*order.lock().unwrap(), vec!["high", "mid-1", "mid-2", "low"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn job_errors_pass_through_unchanged() {
    let queue = queue(1, 5, 60);
    let err = fail_once(&queue, "broken").await;

    assert_eq!(err.to_string(), "backend down");
    assert!(err.downcast_ref::<QueueError>().is_none());
    assert_eq!(queue.stats().consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_rejects_then_half_opens_after_cooldown() -> TestResult {
    init_tracing();
    let queue = queue(1, 2, 10);

    fail_once(&queue, "f1").await;
    assert!(!queue.is_circuit_open());
    fail_once(&queue, "f2").await;
    assert!(queue.is_circuit_open());

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let rejected = queue
        .enqueue(GenerationJob::new("rejected", ResourceType::Image, async move {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        }))
        .await
        .expect_err("breaker should reject");
    assert_eq!(
        rejected.downcast_ref::<QueueError>(),
        Some(&QueueError::CircuitOpen {
            job_id: "rejected".to_string()
        })
    );
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(queue.breaker_state(), BreakerState::HalfOpen);

    // Successful trial closes the breaker.
    queue
        .enqueue(GenerationJob::new("trial", ResourceType::Image, async { anyhow::Ok(()) }))
        .await?;
    assert_eq!(queue.breaker_state(), BreakerState::Closed);
    assert_eq!(queue.stats().consecutive_failures, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_trial_reopens_breaker_and_reset_closes_it() -> TestResult {
    let queue = queue(1, 1, 5);

    fail_once(&queue, "f1").await;
    assert_eq!(queue.breaker_state(), BreakerState::Open);

    tokio::time::advance(Duration::from_secs(5)).await;
    fail_once(&queue, "trial").await;
    assert_eq!(queue.breaker_state(), BreakerState::Open);

    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(queue.breaker_state(), BreakerState::Open);

    queue.reset_circuit_breaker();
    assert_eq!(queue.breaker_state(), BreakerState::Closed);
    queue
        .enqueue(GenerationJob::new("after-reset", ResourceType::Image, async { anyhow::Ok(()) }))
        .await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn half_open_admits_a_single_trial() -> TestResult {
    let queue = queue(2, 1, 5);

    fail_once(&queue, "f1").await;
    tokio::time::advance(Duration::from_secs(5)).await;

    let (release, holder) = hold_slot(&queue).await;
    let second = queue
        .enqueue(GenerationJob::new("second", ResourceType::Image, async { anyhow::Ok(()) }))
        .await
        .expect_err("only one trial allowed");
    assert!(matches!(
        second.downcast_ref::<QueueError>(),
        Some(QueueError::CircuitOpen { .. })
    ));

    let _ = release.send(());
    holder.await??;
    assert_eq!(queue.breaker_state(), BreakerState::Closed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn late_failure_of_pre_open_job_leaves_trial_in_charge() -> TestResult {
    init_tracing();
    let queue = queue(2, 1, 5);

    // Admitted while the breaker is still closed; fails once released.
    let (fail_late, late_signal) = oneshot::channel::<()>();
    let q = queue.clone();
    let older = tokio::spawn(async move {
        q.enqueue(GenerationJob::new("older", ResourceType::Video, async move {
            let _ = late_signal.await;
            Err::<(), _>(anyhow!("late failure"))
        }))
        .await
    });
    settle_until(|| queue.running() == 1).await;

    fail_once(&queue, "f1").await;
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(queue.breaker_state(), BreakerState::HalfOpen);

    let (release_trial, trial) = hold_slot(&queue).await;

    let _ = fail_late.send(());
    assert!(older.await?.is_err());
    assert_eq!(queue.breaker_state(), BreakerState::HalfOpen);

    let _ = release_trial.send(());
    trial.await??;
    assert_eq!(queue.breaker_state(), BreakerState::Closed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropped_trial_lets_the_next_job_be_the_trial() -> TestResult {
    let queue = queue(1, 1, 5);

    fail_once(&queue, "f1").await;
    tokio::time::advance(Duration::from_secs(5)).await;

    let stalled = queue.enqueue(GenerationJob::new("stalled", ResourceType::Image, async {
        std::future::pending::<anyhow::Result<()>>().await
    }));
    assert!(tokio::time::timeout(Duration::from_millis(10), stalled)
        .await
        .is_err());
    assert_eq!(queue.running(), 0);
    assert_eq!(queue.breaker_state(), BreakerState::HalfOpen);

    queue
        .enqueue(GenerationJob::new("retry-trial", ResourceType::Image, async { anyhow::Ok(()) }))
        .await?;
    assert_eq!(queue.breaker_state(), BreakerState::Closed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reentrant_enqueue_with_single_slot_never_completes() {
    let queue = queue(1, 5, 60);
    let inner = queue.clone();

    let outer = queue.enqueue(GenerationJob::new("outer", ResourceType::Video, async move {
        inner
            .enqueue(GenerationJob::new("inner", ResourceType::Image, async { anyhow::Ok(()) }))
            .await
    }));

    let result = tokio::time::timeout(Duration::from_secs(30), outer).await;
    assert!(result.is_err(), "nested enqueue should wait forever");
}

#[tokio::test(start_paused = true)]
async fn abandoned_waiter_does_not_leak_its_slot() -> TestResult {
    let queue = queue(1, 5, 60);
    let (release, holder) = hold_slot(&queue).await;

    let waiting = queue.enqueue(GenerationJob::new("impatient", ResourceType::Image, async {
        anyhow::Ok(())
    }));
    assert!(tokio::time::timeout(Duration::from_millis(10), waiting)
        .await
        .is_err());
    assert_eq!(queue.size(), 1);

    let _ = release.send(());
    holder.await??;
    assert_eq!(queue.running(), 0);
    assert_eq!(queue.size(), 0);

    let value = queue
        .enqueue(GenerationJob::new("next", ResourceType::Image, async { anyhow::Ok(7) }))
        .await?;
    assert_eq!(value, 7);
    assert_eq!(queue.running(), 0);
    Ok(())
}
