// src/lib.rs

pub mod backend;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod output;
pub mod progress;
pub mod queue;
pub mod settings;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backend::{ComfyClient, GenerationBackend};
use crate::cli::CliArgs;
use crate::config::{load_and_validate, PipelineFile};
use crate::dag::{topological_order, PipelineStore, PipelineSummary, SharedStore};
use crate::engine::{Scheduler, SchedulerEvent};
use crate::exec::{FetchingFrameExtractor, FrameExtractor, GenerationExecutor, NativeFrameExtractor};
use crate::queue::GenerationQueue;
use crate::settings::RuntimeSettings;
use crate::types::{FrameExtractorKind, PipelineStatus};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - pipeline file loading
/// - the store and the active pipeline
/// - backend client, generation queue and executor
/// - the scheduler loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let path = Path::new(&args.pipeline);
    let mut file = load_and_validate(path)?;

    if let Some(ms) = args.tick_ms {
        file.scheduler_mut().tick_interval_ms = ms.max(1);
    }
    if args.no_flf2v {
        file.settings_mut().flf2v_enabled = false;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pipeline".to_string());
    let name = file.name_or(&stem).to_string();

    if args.dry_run {
        print_dry_run(&file, &name)?;
        return Ok(());
    }

    let store = PipelineStore::shared();
    let pipeline_id = {
        let mut store = store.lock();
        let id = store.create_pipeline(name.clone(), file.task_specs().to_vec())?;
        store.set_active_pipeline(Some(&id));
        id
    };

    let executor = build_executor(&file);
    let mut scheduler = Scheduler::new(store.clone(), Arc::new(executor), file.scheduler_options());
    let mut events = scheduler.subscribe();
    scheduler.start();

    let status = tokio::select! {
        status = wait_for_finish(&mut events, &store, &pipeline_id) => status,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl+C");
            }
            info!(pipeline_id = %pipeline_id, "Ctrl+C received; cancelling pipeline");
            store.lock().cancel_pipeline(&pipeline_id);
            PipelineStatus::Cancelled
        }
    };

    scheduler.stop().await;

    let summary = store.lock().summary(&pipeline_id);
    if let Some(summary) = summary {
        print_summary(&summary);
    }

    if status == PipelineStatus::Failed {
        bail!("pipeline '{name}' failed");
    }
    Ok(())
}

fn build_executor(file: &PipelineFile) -> GenerationExecutor {
    let settings = file.settings();

    let mut client = ComfyClient::new(settings.backend_url.clone());
    for (kind, path) in file.workflows() {
        client = client.with_workflow(kind, path);
    }
    let backend: Arc<dyn GenerationBackend> = Arc::new(client);

    let frames: Arc<dyn FrameExtractor> = match settings.frame_extractor {
        FrameExtractorKind::Native => Arc::new(NativeFrameExtractor::new(settings.ffmpeg.clone())),
        FrameExtractorKind::Fetch => Arc::new(FetchingFrameExtractor::new(
            Arc::clone(&backend),
            settings.ffmpeg.clone(),
        )),
    };

    let runtime_settings = Arc::new(RuntimeSettings::new(
        settings.backend_url.clone(),
        settings.flf2v_enabled,
    ));

    GenerationExecutor::new(
        backend,
        GenerationQueue::new(file.queue_options()),
        runtime_settings,
    )
    .with_frame_extractor(frames)
    .with_export_dir(settings.export_dir.clone())
}

/// Wait for the scheduler to report `pipeline_id` as finished.
async fn wait_for_finish(
    events: &mut broadcast::Receiver<SchedulerEvent>,
    store: &SharedStore,
    pipeline_id: &str,
) -> PipelineStatus {
    loop {
        match events.recv().await {
            Ok(SchedulerEvent::PipelineFinished {
                pipeline_id: id,
                status,
            }) if id == pipeline_id => return status,
            Ok(event) => debug!(?event, "scheduler event"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(missed, "scheduler events lagged");
                let status = store.lock().pipeline(pipeline_id).map(|p| p.status);
                if let Some(status) = status.filter(|s| s.is_terminal()) {
                    return status;
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                return store
                    .lock()
                    .pipeline(pipeline_id)
                    .map(|p| p.status)
                    .unwrap_or(PipelineStatus::Cancelled);
            }
        }
    }
}

fn print_summary(summary: &PipelineSummary) {
    println!("pipeline {} ({})", summary.name, summary.id);
    println!("  status: {}", summary.status);
    println!(
        "  tasks: {} total, {} completed, {} failed, {} skipped, {} cancelled, {} pending",
        summary.total,
        summary.completed,
        summary.failed,
        summary.skipped,
        summary.cancelled,
        summary.pending
    );
}

/// Dry-run output: tasks in dependency order with their settings.
fn print_dry_run(file: &PipelineFile, name: &str) -> Result<()> {
    let specs = file.task_specs();
    let order = topological_order(specs)?;

    println!("gendag dry-run: {name}");
    println!("  settings.backend_url = {}", file.settings().backend_url);
    println!("  settings.flf2v_enabled = {}", file.settings().flf2v_enabled);
    println!(
        "  scheduler.tick_interval_ms = {}",
        file.scheduler().tick_interval_ms
    );
    println!("  queue.concurrency = {}", file.queue().concurrency);
    println!();

    println!("tasks ({}):", specs.len());
    for id in &order {
        let Some(spec) = specs.iter().find(|s| &s.id == id) else {
            continue;
        };
        println!("  - {} [{}]", spec.id, spec.payload.kind());
        if let Some(label) = &spec.label {
            println!("      label: {label}");
        }
        if !spec.dependencies.is_empty() {
            println!("      after: {:?}", spec.dependencies);
        }
        if spec.max_retries > 0 {
            println!("      max_retries: {}", spec.max_retries);
        }
        if spec.priority != 0 {
            println!("      priority: {}", spec.priority);
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
