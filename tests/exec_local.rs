// tests/exec_local.rs

mod common;
use crate::common::builders::{
    completed_keyframe, completed_video, export, generic, task_with_status,
};
use crate::common::{init_tracing, TestResult};

use std::sync::Arc;

use gendag::dag::{
    ExportPayload, GenericPayload, InterpolatePayload, Task, TaskPayload, TaskSpec, UpscalePayload,
};
use gendag::exec::{ExecutionContext, ExecutorBackend, GenerationExecutor};
use gendag::queue::GenerationQueue;
use gendag::settings::RuntimeSettings;
use gendag::types::{TaskKind, TaskStatus};
use gendag_test_utils::fake_backend::FakeBackend;
use serde_json::{json, Value};

fn running(spec: TaskSpec) -> Task {
    task_with_status(spec, TaskStatus::Running, None)
}

fn executor(backend: Arc<FakeBackend>, export_dir: &std::path::Path) -> GenerationExecutor {
    GenerationExecutor::new(
        backend,
        GenerationQueue::default(),
        Arc::new(RuntimeSettings::default()),
    )
    .with_export_dir(export_dir)
}

fn shell(id: &str, cmd: &str) -> TaskSpec {
    TaskSpec::new(
        id,
        TaskPayload::Generic(GenericPayload {
            cmd: Some(cmd.to_string()),
        }),
    )
}

#[tokio::test]
async fn generic_without_command_merges_dependency_outputs() -> TestResult {
    let dir = tempfile::tempdir()?;
    let exec = executor(Arc::new(FakeBackend::new()), dir.path());
    let task = running(generic("merge").after("kf").after("v"));
    let ctx = ExecutionContext::new("p")
        .with_dependency(completed_keyframe("kf", "kf.png"))
        .with_dependency(completed_video("v", "v.mp4"));

    let output = exec.execute(&task, &ctx).await?;

    assert_eq!(output.images, Some(vec!["kf.png".to_string()]));
    assert_eq!(output.videos, Some(vec!["v.mp4".to_string()]));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn generic_command_json_stdout_is_normalized() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let exec = executor(Arc::new(FakeBackend::new()), dir.path());
    let task = running(shell(
        "render",
        r#"echo "{\"images\": [\"$GENDAG_TASK_ID.png\"], \"metadata\": {\"pipeline\": \"$GENDAG_PIPELINE_ID\"}}""#,
    ));

    let output = exec.execute(&task, &ExecutionContext::new("p-42")).await?;

    assert_eq!(output.first_image(), Some("render.png"));
    assert_eq!(output.metadata_value("pipeline"), Some(&json!("p-42")));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn generic_command_sees_dependency_inputs() -> TestResult {
    let dir = tempfile::tempdir()?;
    let exec = executor(Arc::new(FakeBackend::new()), dir.path());
    let task = running(
        shell(
            "inspect",
            r#"printf '%s' "$GENDAG_INPUTS" | grep -q '"kf":{"images":\["kf.png"\]' && echo seen"#,
        )
        .after("kf"),
    );
    let ctx = ExecutionContext::new("p").with_dependency(completed_keyframe("kf", "kf.png"));

    let output = exec.execute(&task, &ctx).await?;
    assert_eq!(output.metadata_value("stdout"), Some(&json!("seen")));

    let plain = running(shell("plain", "echo hello world"));
    let output = exec.execute(&plain, &ctx).await?;
    assert_eq!(output.metadata_value("stdout"), Some(&json!("hello world")));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn generic_command_failure_reports_status_and_stderr() -> TestResult {
    let dir = tempfile::tempdir()?;
    let exec = executor(Arc::new(FakeBackend::new()), dir.path());
    let task = running(shell("bad", "echo 'disk full' >&2; exit 3"));

    let err = exec
        .execute(&task, &ExecutionContext::new("p"))
        .await
        .expect_err("non-zero exit");

    let msg = err.to_string();
    assert!(msg.contains("status 3"), "unexpected message: {msg}");
    assert!(msg.contains("disk full"), "unexpected message: {msg}");
    Ok(())
}

#[tokio::test]
async fn export_writes_manifest_of_dependencies() -> TestResult {
    let dir = tempfile::tempdir()?;
    let exec = executor(Arc::new(FakeBackend::new()), dir.path());
    let task = running(export("bundle").after("v").after("kf"));
    let ctx = ExecutionContext::new("p-7")
        .with_dependency(completed_keyframe("kf", "kf.png"))
        .with_dependency(completed_video("v", "v.mp4"));

    let output = exec.execute(&task, &ctx).await?;

    let expected = dir.path().join("p-7").join("bundle.json");
    let path = output
        .metadata_value("exportPath")
        .and_then(Value::as_str)
        .ok_or("missing exportPath")?;
    assert_eq!(std::path::Path::new(path), expected);

    let assets = output.assets.as_deref().unwrap_or_default();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].asset_type, "manifest");
    assert_eq!(assets[0].filename.as_deref(), Some("bundle.json"));

    let manifest: Value = serde_json::from_slice(&std::fs::read(&expected)?)?;
    assert_eq!(manifest["pipeline_id"], json!("p-7"));
    assert_eq!(manifest["task"], json!("bundle"));
    let entries = manifest["entries"].as_array().ok_or("entries")?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["task"], json!("v"));
    assert_eq!(entries[0]["kind"], json!("video-generate"));
    assert_eq!(entries[0]["output"]["videos"], json!(["v.mp4"]));
    assert_eq!(entries[1]["status"], json!("completed"));
    Ok(())
}

#[tokio::test]
async fn export_honours_custom_file_name() -> TestResult {
    let dir = tempfile::tempdir()?;
    let exec = executor(Arc::new(FakeBackend::new()), dir.path());
    let task = running(TaskSpec::new(
        "bundle",
        TaskPayload::Export(ExportPayload {
            file_name: Some("final.json".to_string()),
        }),
    ));

    exec.execute(&task, &ExecutionContext::new("p")).await?;

    assert!(dir.path().join("p").join("final.json").is_file());
    Ok(())
}

#[tokio::test]
async fn upscale_uses_first_completed_image() -> TestResult {
    let backend = Arc::new(FakeBackend::new());
    let dir = tempfile::tempdir()?;
    let exec = executor(backend.clone(), dir.path());
    let task = running(
        TaskSpec::new(
            "up",
            TaskPayload::Upscale(UpscalePayload {
                scale: 4.0,
                ..UpscalePayload::default()
            }),
        )
        .after("v")
        .after("kf"),
    );
    let ctx = ExecutionContext::new("p")
        .with_dependency(completed_video("v", "v.mp4"))
        .with_dependency(completed_keyframe("kf", "kf.png"));

    let output = exec.execute(&task, &ctx).await?;

    assert_eq!(output.first_image(), Some("upscaled.png"));
    let submit = &backend.submits()[0];
    assert_eq!(submit.request.kind, TaskKind::Upscale);
    assert_eq!(submit.request.media[0].reference, "kf.png");
    assert_eq!(submit.request.inputs.get("scale"), Some(&json!(4.0)));
    Ok(())
}

#[tokio::test]
async fn upscale_without_source_fails() -> TestResult {
    let dir = tempfile::tempdir()?;
    let exec = executor(Arc::new(FakeBackend::new()), dir.path());
    let task = running(TaskSpec::new(
        "up",
        TaskPayload::Upscale(UpscalePayload::default()),
    ));

    let err = exec
        .execute(&task, &ExecutionContext::new("p"))
        .await
        .expect_err("no source");
    assert!(err.to_string().contains("no source media"));
    Ok(())
}

#[tokio::test]
async fn interpolate_uses_dependency_video_and_requires_video_output() -> TestResult {
    let backend = Arc::new(FakeBackend::new());
    let dir = tempfile::tempdir()?;
    let exec = executor(backend.clone(), dir.path());
    let task = running(
        TaskSpec::new(
            "interp",
            TaskPayload::Interpolate(InterpolatePayload {
                multiplier: 3,
                ..InterpolatePayload::default()
            }),
        )
        .after("v"),
    );
    let ctx = ExecutionContext::new("p").with_dependency(completed_video("v", "v.mp4"));

    let output = exec.execute(&task, &ctx).await?;

    assert_eq!(output.first_video(), Some("interpolated.mp4"));
    let submit = &backend.submits()[0];
    assert_eq!(submit.request.media[0].reference, "v.mp4");
    assert_eq!(submit.request.inputs.get("multiplier"), Some(&json!(3)));
    Ok(())
}
