//! Output artifacts: parsing them out of a job's history and writing them
//! to disk.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use kiln_core::naming::OutputTarget;

use crate::api::ComfyUIApi;
use crate::retry::{with_retry, RetryPolicy};

/// One produced file as reported in `outputs[node].images[]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Artifact {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output`, `temp` or `input`.
    #[serde(rename = "type", default = "default_media_type")]
    pub media_type: String,
}

fn default_media_type() -> String {
    "output".to_string()
}

/// Download settings.
#[derive(Debug, Clone, Copy)]
pub struct DownloadConfig {
    pub retry: RetryPolicy,
    /// Timeout of each individual download attempt.
    pub attempt_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Every image listed in an `outputs` object, in node order.
///
/// Entries that do not deserialize as an [`Artifact`] are skipped.
pub fn collect_artifacts(outputs: &Value) -> Vec<Artifact> {
    let Some(nodes) = outputs.as_object() else {
        return Vec::new();
    };
    nodes
        .iter()
        .filter_map(|(_, node_output)| node_output.get("images")?.as_array())
        .flatten()
        .filter_map(|image| match Artifact::deserialize(image) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unrecognised output entry");
                None
            }
        })
        .collect()
}

/// Download every artifact in `outputs` and write it under `target`.
///
/// A download that fails after retries, or a file that cannot be
/// written, is logged and skipped; the remaining artifacts are still
/// processed. Returns the written paths in order.
pub async fn download_outputs(
    api: &ComfyUIApi,
    outputs: &Value,
    target: &OutputTarget,
    suffix: &str,
    config: &DownloadConfig,
) -> Vec<PathBuf> {
    let mut written = Vec::new();

    for artifact in collect_artifacts(outputs) {
        let bytes = match with_retry(&config.retry, "download", || {
            api.view(&artifact, config.attempt_timeout)
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    filename = %artifact.filename,
                    error = %e,
                    "Download failed, skipping",
                );
                continue;
            }
        };

        let path = target.resolve(&artifact.filename, suffix);
        match write_file(&path, &bytes).await {
            Ok(()) => {
                tracing::info!(
                    filename = %artifact.filename,
                    path = %path.display(),
                    size_bytes = bytes.len(),
                    "Artifact written",
                );
                written.push(path);
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not write artifact, skipping",
                );
            }
        }
    }

    written
}

async fn write_file(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fast() -> DownloadConfig {
        DownloadConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
            },
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn artifacts_are_collected_in_node_order() {
        let outputs = json!({
            "9": { "images": [
                { "filename": "a.png", "subfolder": "", "type": "output" },
                { "filename": "b.png", "subfolder": "sub", "type": "temp" }
            ]},
            "12": { "text": ["not an image"] },
            "4": { "images": [ { "filename": "c.webp" }, { "nope": 1 } ] }
        });
        let names: Vec<_> = collect_artifacts(&outputs)
            .into_iter()
            .map(|a| (a.filename, a.subfolder, a.media_type))
            .collect();
        assert_eq!(
            names,
            vec![
                ("a.png".into(), "".into(), "output".into()),
                ("b.png".into(), "sub".into(), "temp".into()),
                ("c.webp".into(), "".into(), "output".into()),
            ]
        );
        assert!(collect_artifacts(&json!(null)).is_empty());
    }

    #[tokio::test]
    async fn downloads_are_written_beside_source() {
        let mut server = mockito::Server::new_async().await;
        let _view = server
            .mock("GET", "/view")
            .match_query(mockito::Matcher::UrlEncoded(
                "filename".into(),
                "ComfyUI_0001_.png".into(),
            ))
            .with_status(200)
            .with_body(b"PNG")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cat.jpg");
        std::fs::write(dir.path().join("cat_gen.png"), b"old").unwrap();

        let outputs = json!({
            "9": { "images": [{ "filename": "ComfyUI_0001_.png", "subfolder": "", "type": "output" }] }
        });
        let written = download_outputs(
            &ComfyUIApi::new(server.url()),
            &outputs,
            &OutputTarget::BesideSource(source),
            "_gen",
            &fast(),
        )
        .await;

        assert_eq!(written, vec![dir.path().join("cat_gen_1.png")]);
        assert_eq!(std::fs::read(&written[0]).unwrap(), b"PNG");
    }

    #[tokio::test]
    async fn failed_download_is_skipped() {
        let mut server = mockito::Server::new_async().await;
        let broken = server
            .mock("GET", "/view")
            .match_query(mockito::Matcher::UrlEncoded("filename".into(), "bad.png".into()))
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let _good = server
            .mock("GET", "/view")
            .match_query(mockito::Matcher::UrlEncoded("filename".into(), "good.png".into()))
            .with_status(200)
            .with_body(b"OK")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let outputs = json!({ "9": { "images": [
            { "filename": "bad.png", "subfolder": "", "type": "output" },
            { "filename": "good.png", "subfolder": "", "type": "output" }
        ]}});
        let written = download_outputs(
            &ComfyUIApi::new(server.url()),
            &outputs,
            &OutputTarget::generated_in(dir.path()),
            "_gen",
            &fast(),
        )
        .await;

        assert_eq!(written, vec![dir.path().join("generated").join("good.png")]);
        broken.assert_async().await;
    }
}
