// src/exec/generic.rs

//! `generic`: run a shell command, or pass dependency outputs through.
//!
//! The command receives `GENDAG_PIPELINE_ID`, `GENDAG_TASK_ID` and
//! `GENDAG_INPUTS` (JSON object of dependency outputs keyed by task id).
//! If its stdout is JSON it is normalized into the task output; otherwise
//! the trimmed text is kept under the `stdout` metadata key.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::{GenericPayload, Task};
use crate::exec::ExecutionContext;
use crate::output::{normalize_output, MediaOutput};

pub async fn run(task: &Task, payload: &GenericPayload, ctx: &ExecutionContext) -> Result<MediaOutput> {
    match payload.cmd.as_deref() {
        Some(cmd) if !cmd.trim().is_empty() => run_command(task, cmd, ctx).await,
        _ => Ok(pass_through(task, ctx)),
    }
}

/// Merge the outputs of all completed dependencies, in declared order.
fn pass_through(task: &Task, ctx: &ExecutionContext) -> MediaOutput {
    let mut output = MediaOutput::default();
    for dep in ctx.completed_dependencies(task) {
        if let Some(dep_output) = &dep.output {
            output.merge(dep_output.clone());
        }
    }
    output
}

fn dependency_inputs(task: &Task, ctx: &ExecutionContext) -> Result<String> {
    let mut inputs = Map::new();
    for dep in ctx.ordered_dependencies(task) {
        let value = match &dep.output {
            Some(output) => serde_json::to_value(output)?,
            None => Value::Null,
        };
        inputs.insert(dep.id.clone(), value);
    }
    Ok(Value::Object(inputs).to_string())
}

async fn run_command(task: &Task, cmd_line: &str, ctx: &ExecutionContext) -> Result<MediaOutput> {
    info!(task = %task.id, cmd = %cmd_line, "starting task process");

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_line);
        c
    };

    cmd.env("GENDAG_PIPELINE_ID", &ctx.pipeline_id)
        .env("GENDAG_TASK_ID", &task.id)
        .env("GENDAG_INPUTS", dependency_inputs(task, ctx)?)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.id))?;

    // Always consume stderr so buffers don't fill; log at debug and keep
    // the tail for the error message.
    let stderr_task = child.stderr.take().map(|stderr| {
        let task_id = task.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: Vec<String> = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_id, "stderr: {}", line);
                tail.push(line);
                if tail.len() > 20 {
                    tail.remove(0);
                }
            }
            tail.join("\n")
        })
    });

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout)
            .await
            .with_context(|| format!("reading stdout of task '{}'", task.id))?;
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{}'", task.id))?;
    let stderr_tail = match stderr_task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };

    let code = status.code().unwrap_or(-1);
    info!(
        task = %task.id,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    if !status.success() {
        if stderr_tail.is_empty() {
            bail!("command exited with status {code}");
        }
        bail!("command exited with status {code}: {stderr_tail}");
    }

    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(MediaOutput::default());
    }
    Ok(match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => normalize_output(value),
        Err(_) => MediaOutput::default().with_metadata("stdout", Value::String(trimmed.to_string())),
    })
}
