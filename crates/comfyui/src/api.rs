//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps reachability probing, image upload, workflow submission,
//! history retrieval, output download and the LoRA catalogue using
//! [`reqwest`]. Retry and polling policy live in the layers above.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::artifacts::Artifact;

/// Node class whose `object_info` lists the installed LoRA files.
const LORA_LOADER_CLASS: &str = "LoraLoader";

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
    /// Per-node validation errors. Non-empty means the graph was refused.
    #[serde(default)]
    pub node_errors: serde_json::Map<String, serde_json::Value>,
}

/// Response returned by `/upload/image`.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    /// Filename assigned by the server (may differ from the local name).
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subfolder: Option<String>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A local file could not be read for upload.
    #[error("Failed to read {path}: {source}")]
    LocalFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ComfyUIApiError {
    /// `true` for failures that never produced an HTTP response worth
    /// acting on: connection errors, timeouts, dropped bodies. These are
    /// the only failures the retry layer repeats.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Request(e) => !e.is_decode() && !e.is_status() && !e.is_builder(),
            Self::ApiError { .. } | Self::LocalFile { .. } => false,
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`. A trailing
    ///   slash is ignored.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Base HTTP URL of the instance.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Probe `GET /system_stats` with a short timeout.
    pub async fn system_stats(&self, timeout: Duration) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(timeout)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// List LoRA filenames known to the server.
    ///
    /// Reads `GET /object_info/LoraLoader` and returns the choices of its
    /// `lora_name` input. An unexpected response shape yields an empty
    /// list.
    pub async fn list_lora_names(&self) -> Result<Vec<String>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/object_info/{LORA_LOADER_CLASS}", self.api_url))
            .send()
            .await?;

        let info: serde_json::Value = Self::parse_response(response).await?;
        Ok(lora_names_from_object_info(&info))
    }

    /// Upload a local image via `POST /upload/image` (multipart).
    ///
    /// Returns the filename the server stored it under, falling back to
    /// the local basename if the response omits it.
    pub async fn upload_image(&self, path: &Path) -> Result<String, ComfyUIApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ComfyUIApiError::LocalFile {
                path: path.display().to_string(),
                source,
            })?;
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.png".to_string());

        let form = reqwest::multipart::Form::new()
            .part(
                "image",
                reqwest::multipart::Part::bytes(bytes).file_name(basename.clone()),
            )
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let uploaded: UploadResponse = Self::parse_response(response).await?;
        Ok(uploaded.name.filter(|n| !n.is_empty()).unwrap_or(basename))
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Returns the server-assigned `prompt_id`, queue position
    /// and any node validation errors.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The returned JSON is
    /// keyed by prompt id and contains `outputs` once execution finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download one output file via `GET /view`.
    pub async fn view(
        &self,
        artifact: &Artifact,
        timeout: Duration,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.media_type.as_str()),
            ])
            .timeout(timeout)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// `LoraLoader.input.required.lora_name[0]` from an `object_info` response.
fn lora_names_from_object_info(info: &serde_json::Value) -> Vec<String> {
    info.pointer(&format!("/{LORA_LOADER_CLASS}/input/required/lora_name/0"))
        .and_then(|v| v.as_array())
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
