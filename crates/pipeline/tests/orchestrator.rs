//! End-to-end runs against a mocked ComfyUI server.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use assert_matches::assert_matches;
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;

use kiln_comfyui::api::ComfyUIApi;
use kiln_comfyui::artifacts::DownloadConfig;
use kiln_comfyui::availability::{ActivationConfig, AvailabilityError, GateConfig};
use kiln_comfyui::jobs::{JobError, PollConfig};
use kiln_comfyui::retry::RetryPolicy;
use kiln_core::extract::extract;
use kiln_core::graph::Graph;
use kiln_core::params::Overrides;
use kiln_core::work_item::WorkItem;
use kiln_pipeline::{Orchestrator, RunError, RunRequest, RunTiming};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(1),
    }
}

fn orchestrator(server: &ServerGuard) -> Orchestrator {
    Orchestrator::new(ComfyUIApi::new(server.url()), ActivationConfig::default())
        .with_gate_config(GateConfig {
            probe_timeout: Duration::from_secs(2),
            startup_poll: Duration::from_millis(10),
            startup_budget: Duration::from_millis(50),
        })
        .with_timing(RunTiming {
            upload: fast_retry(),
            submit: fast_retry(),
            poll: PollConfig {
                interval: Duration::from_millis(10),
                timeout: Duration::from_secs(2),
            },
            download: DownloadConfig {
                retry: fast_retry(),
                attempt_timeout: Duration::from_secs(2),
            },
        })
}

fn text_to_image() -> Graph {
    Graph::from_value(json!({
        "3": {
            "class_type": "KSampler",
            "inputs": { "seed": 1, "steps": 20, "cfg": 7.0, "model": ["4", 0] }
        },
        "4": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": "base.safetensors" } },
        "5": { "class_type": "EmptyLatentImage", "inputs": { "width": 512, "height": 512, "batch_size": 1 } },
        "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "placeholder", "clip": ["4", 1] } },
        "9": { "class_type": "SaveImage", "inputs": { "images": ["8", 0] } }
    }))
    .unwrap()
}

fn image_to_image() -> Graph {
    Graph::from_value(json!({
        "1": { "class_type": "LoadImage", "inputs": { "image": "placeholder.png" } },
        "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "make it blue" } },
        "9": { "class_type": "SaveImage", "inputs": { "images": ["8", 0] } }
    }))
    .unwrap()
}

fn two_slot() -> Graph {
    Graph::from_value(json!({
        "1": { "class_type": "LoadImage", "inputs": { "image": "subject.png" }, "_meta": { "title": "Subject" } },
        "2": { "class_type": "LoadImage", "inputs": { "image": "style.png" }, "_meta": { "title": "Style" } },
        "9": { "class_type": "SaveImage", "inputs": { "images": ["8", 0] } }
    }))
    .unwrap()
}

/// Healthy server mocks expecting the given call counts. The returned
/// mocks must be kept alive.
async fn healthy_server(server: &mut ServerGuard, submissions: usize, uploads: usize) -> Vec<Mock> {
    let stats = server
        .mock("GET", "/system_stats")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let upload = server
        .mock("POST", "/upload/image")
        .with_status(200)
        .with_body(r#"{"name": "uploaded.png", "subfolder": "", "type": "input"}"#)
        .expect(uploads)
        .create_async()
        .await;
    let prompt = server
        .mock("POST", "/prompt")
        .with_status(200)
        .with_body(r#"{"prompt_id": "job-1", "number": 0, "node_errors": {}}"#)
        .expect(submissions)
        .create_async()
        .await;
    let history = server
        .mock("GET", "/history/job-1")
        .with_status(200)
        .with_body(
            r#"{"job-1": {"outputs": {"9": {"images": [{"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"}]}}}}"#,
        )
        .expect(submissions)
        .create_async()
        .await;
    let view = server
        .mock("GET", "/view")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(b"PNGBYTES")
        .expect(submissions)
        .create_async()
        .await;
    vec![stats, upload, prompt, history, view]
}

fn touch(dir: &std::path::Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"local image").unwrap();
    path
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn text_to_image_writes_into_generated() {
    let mut server = Server::new_async().await;
    let mocks = healthy_server(&mut server, 1, 0).await;
    let out = tempfile::tempdir().unwrap();

    let request = RunRequest {
        graph: text_to_image(),
        overrides: Overrides {
            positive_prompt: Some("a cat".into()),
            ..Default::default()
        },
        work_item: WorkItem::Batch(Vec::new()),
        output_suffix: "_gen".into(),
        output_folder: Some(out.path().to_path_buf()),
    };

    let written = orchestrator(&server).run(&request, |_| {}).await.unwrap();

    let expected = out.path().join("generated").join("ComfyUI_00001_.png");
    assert_eq!(written, vec![expected.clone()]);
    assert_eq!(std::fs::read(expected).unwrap(), b"PNGBYTES");
    for mock in &mocks {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn submitted_graph_carries_the_prompt() {
    let mut server = Server::new_async().await;
    let _stats = server
        .mock("GET", "/system_stats")
        .with_status(200)
        .create_async()
        .await;
    let prompt = server
        .mock("POST", "/prompt")
        .match_body(Matcher::PartialJson(
            json!({ "prompt": {
                "6": { "inputs": { "text": "a cat" } },
                "5": { "inputs": { "width": 768 } }
            } }),
        ))
        .with_status(200)
        .with_body(r#"{"prompt_id": "job-1", "node_errors": {}}"#)
        .expect(1)
        .create_async()
        .await;
    let _history = server
        .mock("GET", "/history/job-1")
        .with_status(200)
        .with_body(r#"{"job-1": {"outputs": {}}}"#)
        .create_async()
        .await;
    let out = tempfile::tempdir().unwrap();

    let request = RunRequest {
        graph: text_to_image(),
        overrides: Overrides {
            positive_prompt: Some("a cat".into()),
            width: Some(768),
            ..Default::default()
        },
        work_item: WorkItem::Batch(Vec::new()),
        output_suffix: "_gen".into(),
        output_folder: Some(out.path().to_path_buf()),
    };

    let written = orchestrator(&server).run(&request, |_| {}).await.unwrap();
    assert!(written.is_empty());
    prompt.assert_async().await;
}

#[tokio::test]
async fn batch_of_two_names_outputs_after_sources() {
    let mut server = Server::new_async().await;
    let mocks = healthy_server(&mut server, 2, 2).await;
    let dir = tempfile::tempdir().unwrap();
    let a = touch(dir.path(), "a.png");
    let b = touch(dir.path(), "b.jpg");
    // Existing output forces the numeric suffix for `a`.
    std::fs::write(dir.path().join("a_gen.png"), b"old").unwrap();

    let request = RunRequest {
        graph: image_to_image(),
        overrides: Overrides::default(),
        work_item: WorkItem::Batch(vec![a, b]),
        output_suffix: "_gen".into(),
        output_folder: None,
    };

    let mut reports = Vec::new();
    let written = orchestrator(&server)
        .run(&request, |p| reports.push(p))
        .await
        .unwrap();

    assert_eq!(
        written,
        vec![dir.path().join("a_gen_1.png"), dir.path().join("b_gen.png")]
    );
    for mock in &mocks {
        mock.assert_async().await;
    }

    let percentages: Vec<f64> = reports.iter().map(|p| p.percentage).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");
    assert_eq!(percentages.first().copied(), Some(0.0));
    assert_eq!(percentages.last().copied(), Some(100.0));
    assert!(reports.iter().all(|p| p.total == 2));
}

#[tokio::test]
async fn multi_slot_iterates_over_slot_zero() {
    // (slot-0 files, submissions, uploads): the style slot uploads every time.
    let cases = [(0usize, 1usize, 1usize), (1, 1, 2), (3, 3, 6)];
    for (slot0_len, expected_submissions, uploads) in cases {
        let mut server = Server::new_async().await;
        let mocks = healthy_server(&mut server, expected_submissions, uploads).await;
        let dir = tempfile::tempdir().unwrap();

        let graph = two_slot();
        let params = extract(&graph);
        let subjects: Vec<PathBuf> = (0..slot0_len)
            .map(|i| touch(dir.path(), &format!("subject{i}.png")))
            .collect();
        let mut files = BTreeMap::new();
        files.insert("1".to_string(), subjects);
        files.insert("2".to_string(), vec![touch(dir.path(), "style.png")]);
        let work_item = WorkItem::multi_slot(&params.image_input_slots, files).unwrap();

        let request = RunRequest {
            graph,
            overrides: Overrides::default(),
            work_item,
            output_suffix: "_gen".into(),
            output_folder: Some(dir.path().join("out")),
        };

        let written = orchestrator(&server).run(&request, |_| {}).await.unwrap();
        assert_eq!(written.len(), expected_submissions, "slot0_len = {slot0_len}");
        for mock in &mocks {
            mock.assert_async().await;
        }
    }
}

#[tokio::test]
async fn server_down_without_activation_submits_nothing() {
    let mut server = Server::new_async().await;
    let stats = server
        .mock("GET", "/system_stats")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let prompt = server
        .mock("POST", "/prompt")
        .expect(0)
        .create_async()
        .await;
    let upload = server
        .mock("POST", "/upload/image")
        .expect(0)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let request = RunRequest {
        graph: image_to_image(),
        overrides: Overrides::default(),
        work_item: WorkItem::Batch(vec![touch(dir.path(), "a.png")]),
        output_suffix: "_gen".into(),
        output_folder: None,
    };

    let err = orchestrator(&server).run(&request, |_| {}).await.unwrap_err();
    assert_matches!(err, RunError::Unavailable(AvailabilityError::ServerUnavailable { .. }));
    stats.assert_async().await;
    prompt.assert_async().await;
    upload.assert_async().await;
}

#[tokio::test]
async fn text_only_without_output_folder_fails_before_contacting_server() {
    let mut server = Server::new_async().await;
    let stats = server
        .mock("GET", "/system_stats")
        .expect(0)
        .create_async()
        .await;

    let request = RunRequest {
        graph: text_to_image(),
        overrides: Overrides::default(),
        work_item: WorkItem::Batch(Vec::new()),
        output_suffix: "_gen".into(),
        output_folder: None,
    };

    let err = orchestrator(&server).run(&request, |_| {}).await.unwrap_err();
    assert_matches!(err, RunError::OutputFolderRequired);
    stats.assert_async().await;
}

#[tokio::test]
async fn rejected_submission_stops_the_run() {
    let mut server = Server::new_async().await;
    let _stats = server
        .mock("GET", "/system_stats")
        .with_status(200)
        .create_async()
        .await;
    let _upload = server
        .mock("POST", "/upload/image")
        .with_status(200)
        .with_body(r#"{"name": "uploaded.png"}"#)
        .create_async()
        .await;
    let prompt = server
        .mock("POST", "/prompt")
        .with_status(200)
        .with_body(r#"{"prompt_id": "job-1", "node_errors": {"1": {"errors": ["missing"]}}}"#)
        .expect(1)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let request = RunRequest {
        graph: image_to_image(),
        overrides: Overrides::default(),
        work_item: WorkItem::Batch(vec![touch(dir.path(), "a.png"), touch(dir.path(), "b.png")]),
        output_suffix: "_gen".into(),
        output_folder: None,
    };

    let err = orchestrator(&server).run(&request, |_| {}).await.unwrap_err();
    assert_matches!(err, RunError::Job(JobError::SubmissionRejected(_)));
    prompt.assert_async().await;
}

#[tokio::test]
async fn later_timeout_keeps_earlier_outputs() {
    let mut server = Server::new_async().await;
    let _stats = server
        .mock("GET", "/system_stats")
        .with_status(200)
        .create_async()
        .await;
    let upload = server
        .mock("POST", "/upload/image")
        .with_status(200)
        .with_body(r#"{"name": "uploaded.png"}"#)
        .expect(2)
        .create_async()
        .await;
    // Mocks with missing hits are served in creation order.
    let first = server
        .mock("POST", "/prompt")
        .with_status(200)
        .with_body(r#"{"prompt_id": "job-1", "node_errors": {}}"#)
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("POST", "/prompt")
        .with_status(200)
        .with_body(r#"{"prompt_id": "job-2", "node_errors": {}}"#)
        .expect(1)
        .create_async()
        .await;
    let _done = server
        .mock("GET", "/history/job-1")
        .with_status(200)
        .with_body(
            r#"{"job-1": {"outputs": {"9": {"images": [{"filename": "ComfyUI_00001_.png"}]}}}}"#,
        )
        .create_async()
        .await;
    let _pending = server
        .mock("GET", "/history/job-2")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let view = server
        .mock("GET", "/view")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(b"PNGBYTES")
        .expect(1)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let request = RunRequest {
        graph: image_to_image(),
        overrides: Overrides::default(),
        work_item: WorkItem::Batch(vec![touch(dir.path(), "a.png"), touch(dir.path(), "b.png")]),
        output_suffix: "_gen".into(),
        output_folder: None,
    };

    let err = orchestrator(&server).run(&request, |_| {}).await.unwrap_err();
    assert_matches!(
        err,
        RunError::Job(JobError::CompletionTimeout { prompt_id, .. }) if prompt_id == "job-2"
    );
    assert_eq!(std::fs::read(dir.path().join("a_gen.png")).unwrap(), b"PNGBYTES");
    assert!(!dir.path().join("b_gen.png").exists());
    for mock in [&upload, &first, &second, &view] {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn failed_upload_stops_before_submitting() {
    let mut server = Server::new_async().await;
    let _stats = server
        .mock("GET", "/system_stats")
        .with_status(200)
        .create_async()
        .await;
    let upload = server
        .mock("POST", "/upload/image")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let prompt = server
        .mock("POST", "/prompt")
        .expect(0)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();
    let source = touch(dir.path(), "a.png");

    let request = RunRequest {
        graph: image_to_image(),
        overrides: Overrides::default(),
        work_item: WorkItem::Batch(vec![source.clone()]),
        output_suffix: "_gen".into(),
        output_folder: None,
    };

    let err = orchestrator(&server).run(&request, |_| {}).await.unwrap_err();
    assert_matches!(err, RunError::Upload { path, .. } if path == source);
    upload.assert_async().await;
    prompt.assert_async().await;
}
