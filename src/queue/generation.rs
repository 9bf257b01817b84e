// src/queue/generation.rs

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::queue::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::types::ResourceType;

/// Rejections produced by the queue itself (as opposed to job failures,
/// which are passed through unchanged).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("circuit breaker open; rejected job '{job_id}' without executing it")]
    CircuitOpen { job_id: String },

    #[error("generation queue dropped job '{job_id}' before admission")]
    Dropped { job_id: String },
}

/// Queue tuning, usually from the `[queue]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Global number of jobs allowed to execute at once, across every
    /// resource type.
    pub concurrency: usize,
    /// Consecutive failures before the breaker opens (0 disables it).
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(60),
        }
    }
}

/// One unit of resource-bound work.
pub struct GenerationJob<F> {
    pub id: String,
    pub resource_type: ResourceType,
    /// Higher runs first; ties run in arrival order.
    pub priority: i32,
    pub metadata: BTreeMap<String, String>,
    pub execute: F,
}

impl<F> GenerationJob<F> {
    pub fn new(id: impl Into<String>, resource_type: ResourceType, execute: F) -> Self {
        Self {
            id: id.into(),
            resource_type,
            priority: 0,
            metadata: BTreeMap::new(),
            execute,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl<F> fmt::Debug for GenerationJob<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationJob")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("priority", &self.priority)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: usize,
    pub running: usize,
    pub concurrency: usize,
    pub breaker: BreakerState,
    pub consecutive_failures: u32,
}

struct Waiter {
    priority: i32,
    seq: u64,
    job_id: String,
    admit: oneshot::Sender<Permit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    /// Max-heap order: higher priority first, then earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    running: usize,
    waiting: BinaryHeap<Waiter>,
    next_seq: u64,
    breaker: CircuitBreaker,
}

struct Inner {
    options: QueueOptions,
    state: Mutex<QueueState>,
}

/// Admission to one execution slot. Dropping it hands the slot to the next
/// waiter (or frees it), so a cancelled job never leaks a slot.
struct Permit {
    inner: Arc<Inner>,
    armed: bool,
}

impl Permit {
    fn new(inner: Arc<Inner>) -> Self {
        Self { inner, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.armed {
            release_slot(&self.inner);
        }
    }
}

/// Breaker admission of one job. Dropped without an outcome (the job's
/// future went away), it gives up a half-open trial so the next job can be
/// the trial.
struct Ticket {
    inner: Arc<Inner>,
    id: u64,
    settled: bool,
}

impl Ticket {
    fn settle(mut self, success: bool) {
        self.settled = true;
        let mut state = self.inner.state.lock();
        if success {
            state.breaker.record_success(self.id);
        } else {
            state.breaker.record_failure(self.id, Instant::now());
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.state.lock().breaker.abandon(self.id);
        }
    }
}

/// Hand the slot to the best waiter still listening, or free it.
///
/// The handover happens outside the state lock: a permit dropped during
/// `send` re-enters this function.
fn release_slot(inner: &Arc<Inner>) {
    loop {
        let waiter = {
            let mut state = inner.state.lock();
            match state.waiting.pop() {
                Some(w) => w,
                None => {
                    state.running = state.running.saturating_sub(1);
                    return;
                }
            }
        };

        debug!(
            job = %waiter.job_id,
            priority = waiter.priority,
            "handing generation slot to next waiter"
        );
        match waiter.admit.send(Permit::new(Arc::clone(inner))) {
            Ok(()) => return,
            Err(mut permit) => {
                // Waiter gave up; try the next one.
                permit.disarm();
            }
        }
    }
}

/// Process-wide, priority-ordered, bounded-concurrency queue for jobs that
/// use the generation backend.
///
/// The bound is global, not per resource type. With the default bound of 1,
/// a job that calls [`enqueue`](Self::enqueue) on the same queue from inside
/// its own `execute` waits forever for the slot it is holding.
#[derive(Clone)]
pub struct GenerationQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for GenerationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationQueue")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for GenerationQueue {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

impl GenerationQueue {
    pub fn new(options: QueueOptions) -> Self {
        let options = QueueOptions {
            concurrency: options.concurrency.max(1),
            ..options
        };
        let breaker = CircuitBreaker::new(options.breaker_threshold, options.breaker_cooldown);
        Self {
            inner: Arc::new(Inner {
                options,
                state: Mutex::new(QueueState {
                    running: 0,
                    waiting: BinaryHeap::new(),
                    next_seq: 0,
                    breaker,
                }),
            }),
        }
    }

    /// Run `job.execute` once a slot is free and return its result.
    ///
    /// Fails fast with [`QueueError::CircuitOpen`] while the breaker is open.
    /// Job failures are returned unchanged and counted by the breaker.
    pub async fn enqueue<T, F>(&self, job: GenerationJob<F>) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let GenerationJob {
            id,
            resource_type,
            priority,
            metadata,
            execute,
        } = job;

        let ticket = self.admit(&id)?;
        let permit = self.acquire(&id, priority).await?;
        debug!(
            job = %id,
            ?resource_type,
            priority,
            ?metadata,
            "generation job admitted"
        );

        let result = execute.await;

        if let Err(err) = &result {
            warn!(job = %id, ?resource_type, error = %format!("{err:#}"), "generation job failed");
        }
        ticket.settle(result.is_ok());

        drop(permit);
        result
    }

    fn admit(&self, job_id: &str) -> Result<Ticket> {
        let admitted = self.inner.state.lock().breaker.admit(Instant::now());
        match admitted {
            Some(id) => Ok(Ticket {
                inner: Arc::clone(&self.inner),
                id,
                settled: false,
            }),
            None => {
                debug!(job = %job_id, "circuit breaker open; rejecting job");
                Err(QueueError::CircuitOpen {
                    job_id: job_id.to_string(),
                }
                .into())
            }
        }
    }

    async fn acquire(&self, job_id: &str, priority: i32) -> Result<Permit> {
        let admitted = {
            let mut state = self.inner.state.lock();

            if state.running < self.inner.options.concurrency && state.waiting.is_empty() {
                state.running += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiting.push(Waiter {
                    priority,
                    seq,
                    job_id: job_id.to_string(),
                    admit: tx,
                });
                debug!(
                    job = %job_id,
                    priority,
                    waiting = state.waiting.len(),
                    "generation job queued"
                );
                Some(rx)
            }
        };

        match admitted {
            None => Ok(Permit::new(Arc::clone(&self.inner))),
            Some(rx) => rx.await.map_err(|_| {
                anyhow!(QueueError::Dropped {
                    job_id: job_id.to_string(),
                })
            }),
        }
    }

    /// Number of jobs waiting for a slot.
    pub fn size(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    /// Number of jobs currently executing.
    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    pub fn is_circuit_open(&self) -> bool {
        self.inner.state.lock().breaker.state(Instant::now()) == BreakerState::Open
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.inner.state.lock().breaker.state(Instant::now())
    }

    /// Close the breaker immediately and forget the failure streak.
    pub fn reset_circuit_breaker(&self) {
        self.inner.state.lock().breaker.reset();
        info!("circuit breaker reset");
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            waiting: state.waiting.len(),
            running: state.running,
            concurrency: self.inner.options.concurrency,
            breaker: state.breaker.state(Instant::now()),
            consecutive_failures: state.breaker.consecutive_failures(),
        }
    }
}
