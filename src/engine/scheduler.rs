// src/engine/scheduler.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::dag::SharedStore;
use crate::exec::{ExecutionContext, ExecutorBackend};
use crate::types::{PipelineId, PipelineStatus, TaskId};

use super::core::{
    apply_completion, plan_tick, CompletionOutcome, DispatchedTask, TaskCompletion, TickOutcome,
};

/// Options for the scheduling loop.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    /// Time between two scheduling ticks.
    pub tick_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Notifications emitted by the scheduler loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    TaskDispatched {
        pipeline_id: PipelineId,
        task_id: TaskId,
    },
    TaskCompleted {
        pipeline_id: PipelineId,
        task_id: TaskId,
    },
    TaskRetrying {
        pipeline_id: PipelineId,
        task_id: TaskId,
        attempt: u32,
        error: String,
    },
    TaskFailed {
        pipeline_id: PipelineId,
        task_id: TaskId,
        error: String,
        skipped: Vec<TaskId>,
    },
    PipelineFinished {
        pipeline_id: PipelineId,
        status: PipelineStatus,
    },
}

const EVENT_CAPACITY: usize = 256;

struct LoopHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Periodic scheduler driving the store's active pipeline.
///
/// This is the async shell around [`plan_tick`] / [`apply_completion`]:
/// it owns the tick timer, spawns executions on the Tokio runtime and feeds
/// their results back into the store.
pub struct Scheduler<E: ExecutorBackend> {
    store: SharedStore,
    executor: Arc<E>,
    options: SchedulerOptions,
    events: broadcast::Sender<SchedulerEvent>,
    running: Option<LoopHandle>,
}

impl<E: ExecutorBackend> fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Scheduler<E> {
    pub fn new(store: SharedStore, executor: Arc<E>, options: SchedulerOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            executor,
            options,
            events,
            running: None,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Receive [`SchedulerEvent`]s from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Start the tick loop. Calling this while already running is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.running.is_some() {
            debug!("scheduler already running; ignoring start");
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(run_loop(
            self.store.clone(),
            Arc::clone(&self.executor),
            self.options,
            self.events.clone(),
            shutdown_rx,
        ));
        self.running = Some(LoopHandle { shutdown, join });
        info!(
            tick_ms = self.options.tick_interval.as_millis() as u64,
            "scheduler started"
        );
    }

    /// Stop ticking and wait for the loop to exit.
    ///
    /// Executions already in flight are not interrupted; their results are
    /// still recorded in the store, but nothing new is dispatched.
    pub async fn stop(&mut self) {
        let Some(handle) = self.running.take() else {
            return;
        };
        let _ = handle.shutdown.send(());
        if let Err(err) = handle.join.await {
            warn!(error = %err, "scheduler loop terminated abnormally");
        }
        info!("scheduler stopped");
    }
}

async fn run_loop<E: ExecutorBackend>(
    store: SharedStore,
    executor: Arc<E>,
    options: SchedulerOptions,
    events: broadcast::Sender<SchedulerEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TaskCompletion>();

    let mut ticker = interval(options.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("scheduler loop received shutdown");
                break;
            }
            Some(completion) = done_rx.recv() => {
                record_completion(&store, &events, completion);
            }
            _ = ticker.tick() => {
                tick(&store, &executor, &events, &done_tx);
            }
        }
    }

    // Results already queued still count; later ones are applied directly
    // by the execution that produced them.
    done_rx.close();
    while let Ok(completion) = done_rx.try_recv() {
        record_completion(&store, &events, completion);
    }
}

fn tick<E: ExecutorBackend>(
    store: &SharedStore,
    executor: &Arc<E>,
    events: &broadcast::Sender<SchedulerEvent>,
    done_tx: &mpsc::UnboundedSender<TaskCompletion>,
) {
    let outcome = plan_tick(&mut store.lock());

    match outcome {
        TickOutcome::Idle => {}
        TickOutcome::Finished {
            pipeline_id,
            status,
        } => {
            let _ = events.send(SchedulerEvent::PipelineFinished {
                pipeline_id,
                status,
            });
        }
        TickOutcome::Dispatched { tasks, .. } => {
            for dispatched in tasks {
                let _ = events.send(SchedulerEvent::TaskDispatched {
                    pipeline_id: dispatched.pipeline_id.clone(),
                    task_id: dispatched.task.id.clone(),
                });
                spawn_execution(
                    dispatched,
                    Arc::clone(executor),
                    store.clone(),
                    events.clone(),
                    done_tx.clone(),
                );
            }
        }
    }
}

fn spawn_execution<E: ExecutorBackend>(
    dispatched: DispatchedTask,
    executor: Arc<E>,
    store: SharedStore,
    events: broadcast::Sender<SchedulerEvent>,
    done_tx: mpsc::UnboundedSender<TaskCompletion>,
) {
    tokio::spawn(async move {
        let DispatchedTask {
            pipeline_id,
            task,
            dependencies,
        } = dispatched;

        info!(
            pipeline_id = %pipeline_id,
            task = %task.id,
            kind = %task.kind(),
            attempt = task.retry_count,
            "executing task"
        );

        let ctx = ExecutionContext {
            pipeline_id: pipeline_id.clone(),
            dependencies,
        };
        // Run the executor in its own task so a panic surfaces as a
        // `JoinError` and goes through the retry/fail path.
        let run_task = task.clone();
        let execution = tokio::spawn(async move { executor.execute(&run_task, &ctx).await });
        let result = match execution.await {
            Ok(result) => result.map_err(|err| format!("{err:#}")),
            Err(err) => {
                error!(
                    pipeline_id = %pipeline_id,
                    task = %task.id,
                    error = %err,
                    "executor panicked"
                );
                Err(format!("executor panicked: {err}"))
            }
        };

        let completion = TaskCompletion {
            pipeline_id,
            task_id: task.id,
            result,
        };
        if let Err(mpsc::error::SendError(completion)) = done_tx.send(completion) {
            // Loop already stopped.
            record_completion(&store, &events, completion);
        }
    });
}

fn record_completion(
    store: &SharedStore,
    events: &broadcast::Sender<SchedulerEvent>,
    completion: TaskCompletion,
) {
    let pipeline_id = completion.pipeline_id.clone();
    let task_id = completion.task_id.clone();

    let outcome = apply_completion(&mut store.lock(), completion);

    let event = match outcome {
        CompletionOutcome::Completed => SchedulerEvent::TaskCompleted {
            pipeline_id,
            task_id,
        },
        CompletionOutcome::Retrying { attempt, error } => SchedulerEvent::TaskRetrying {
            pipeline_id,
            task_id,
            attempt,
            error,
        },
        CompletionOutcome::Failed { error, skipped } => SchedulerEvent::TaskFailed {
            pipeline_id,
            task_id,
            error,
            skipped,
        },
        CompletionOutcome::Ignored => return,
    };
    let _ = events.send(event);
}
