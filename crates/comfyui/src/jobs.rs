//! Job submission and completion polling.

use std::time::Duration;

use serde_json::Value;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The server answered and refused the graph.
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// Transport failures persisted through every retry.
    #[error("Submission failed after {attempts} attempts: {source}")]
    SubmissionFailed {
        attempts: u32,
        #[source]
        source: ComfyUIApiError,
    },

    #[error("Job {prompt_id} produced no outputs within {}s", timeout.as_secs())]
    CompletionTimeout { prompt_id: String, timeout: Duration },
}

/// Timing of completion polling.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

/// An accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub prompt_id: String,
    pub client_id: String,
}

/// Submit `workflow` under a fresh client id.
///
/// Transport failures are retried per `policy`; a non-success status or
/// reported node errors are final.
pub async fn submit(
    api: &ComfyUIApi,
    workflow: &Value,
    policy: &RetryPolicy,
) -> Result<SubmittedJob, JobError> {
    let client_id = uuid::Uuid::new_v4().to_string();

    let response = with_retry(policy, "submit", || api.submit_workflow(workflow, &client_id))
        .await
        .map_err(|e| {
            if e.is_transport() {
                JobError::SubmissionFailed {
                    attempts: policy.max_attempts.max(1),
                    source: e,
                }
            } else {
                JobError::SubmissionRejected(e.to_string())
            }
        })?;

    if !response.node_errors.is_empty() {
        let nodes: Vec<&str> = response.node_errors.keys().map(String::as_str).collect();
        tracing::warn!(
            prompt_id = %response.prompt_id,
            nodes = ?nodes,
            "Server reported node validation errors",
        );
        return Err(JobError::SubmissionRejected(format!(
            "node validation errors: {}",
            Value::Object(response.node_errors)
        )));
    }

    tracing::info!(
        prompt_id = %response.prompt_id,
        queue_position = ?response.number,
        "Workflow submitted",
    );
    Ok(SubmittedJob {
        prompt_id: response.prompt_id,
        client_id,
    })
}

/// Poll `/history/{prompt_id}` until the job reports outputs.
///
/// Returns the `outputs` object. Errors while polling are logged and
/// swallowed; only the overall timeout ends the wait unsuccessfully.
pub async fn wait_for_completion(
    api: &ComfyUIApi,
    prompt_id: &str,
    config: &PollConfig,
) -> Result<Value, JobError> {
    let started = tokio::time::Instant::now();

    loop {
        match api.get_history(prompt_id).await {
            Ok(history) => {
                if let Some(outputs) = history.get(prompt_id).and_then(|entry| entry.get("outputs"))
                {
                    tracing::info!(
                        prompt_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Job completed",
                    );
                    return Ok(outputs.clone());
                }
            }
            Err(e) => {
                tracing::debug!(prompt_id, error = %e, "History poll failed");
            }
        }

        if started.elapsed() >= config.timeout {
            return Err(JobError::CompletionTimeout {
                prompt_id: prompt_id.to_string(),
                timeout: config.timeout,
            });
        }
        tokio::time::sleep(config.interval).await;
    }
}
