use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use gendag::dag::Task;
use gendag::exec::{ExecutionContext, ExecutorBackend};
use gendag::output::MediaOutput;
use gendag::types::{BoxFuture, TaskId};
use tokio::sync::Notify;

/// How the fake executor treats one task.
#[derive(Debug, Clone, Default)]
struct Script {
    /// Fail this many attempts before succeeding.
    fail_times: u32,
    always_fail: bool,
    /// Panic on the first `panic_times` attempts.
    panic_times: u32,
    delay: Option<Duration>,
    output: Option<MediaOutput>,
    gate: Option<Arc<Notify>>,
}

/// Fake executor used in integration tests.
///
/// - Records every execution (task id) in order.
/// - Succeeds by default with an output naming the task, e.g.
///   `images = ["<id>.png"]`.
/// - Per task it can fail N times, always fail, panic, sleep, or block on
///   a gate.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    calls: Mutex<Vec<TaskId>>,
    attempts: Mutex<HashMap<TaskId, u32>>,
    scripts: Mutex<HashMap<TaskId, Script>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, id: &str, f: impl FnOnce(&mut Script)) {
        let mut scripts = self.scripts.lock().unwrap();
        f(scripts.entry(id.to_string()).or_default());
    }

    /// Fail the first `n` attempts of `id`, then succeed.
    pub fn fail_times(self, id: &str, n: u32) -> Self {
        self.script(id, |s| s.fail_times = n);
        self
    }

    pub fn always_fail(self, id: &str) -> Self {
        self.script(id, |s| s.always_fail = true);
        self
    }

    /// Panic during the first `n` attempts of `id`.
    pub fn panic_times(self, id: &str, n: u32) -> Self {
        self.script(id, |s| s.panic_times = n);
        self
    }

    pub fn delay(self, id: &str, delay: Duration) -> Self {
        self.script(id, |s| s.delay = Some(delay));
        self
    }

    pub fn output(self, id: &str, output: MediaOutput) -> Self {
        self.script(id, |s| s.output = Some(output));
        self
    }

    /// Block `id` until the returned gate is notified.
    pub fn gate(&self, id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script(id, |s| s.gate = Some(Arc::clone(&gate)));
        gate
    }

    /// Task ids in the order their executions started.
    pub fn calls(&self) -> Vec<TaskId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    /// Highest number of executions observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn begin(&self, id: &str) -> (u32, Script) {
        self.calls.lock().unwrap().push(id.to_string());
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(id.to_string()).or_default();
            *n += 1;
            *n
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default();
        (attempt, script)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        _ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, anyhow::Result<MediaOutput>> {
        Box::pin(async move {
            let (attempt, script) = self.begin(&task.id);

            if let Some(gate) = &script.gate {
                gate.notified().await;
            }
            if let Some(delay) = script.delay {
                tokio::time::sleep(delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if attempt <= script.panic_times {
                panic!("scripted panic in '{}' (attempt {attempt})", task.id);
            }
            if script.always_fail || attempt <= script.fail_times {
                return Err(anyhow!("scripted failure of '{}' (attempt {attempt})", task.id));
            }
            Ok(script.output.unwrap_or_else(|| MediaOutput {
                images: Some(vec![format!("{}.png", task.id)]),
                ..MediaOutput::default()
            }))
        })
    }
}
