//! Sequential run orchestrator.
//!
//! [`Orchestrator::run`] gates on server availability once, then walks
//! the iterations of a [`WorkItem`] strictly in order. Iteration `i + 1`
//! never starts uploading before iteration `i` has finished downloading,
//! which keeps written outputs in input order and progress monotonic.

use std::path::PathBuf;

use kiln_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use kiln_comfyui::artifacts::{download_outputs, DownloadConfig};
use kiln_comfyui::availability::{
    ActivationConfig, AvailabilityError, AvailabilityGate, GateConfig,
};
use kiln_comfyui::jobs::{self, JobError, PollConfig};
use kiln_comfyui::retry::{with_retry, RetryPolicy};
use kiln_core::graph::Graph;
use kiln_core::inject::inject;
use kiln_core::naming::OutputTarget;
use kiln_core::params::Overrides;
use kiln_core::progress::{Phase, RunProgress};
use kiln_core::work_item::{Iteration, WorkItem};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Unavailable(#[from] AvailabilityError),

    #[error("Failed to upload {}: {source}", path.display())]
    Upload {
        path: PathBuf,
        #[source]
        source: ComfyUIApiError,
    },

    #[error(transparent)]
    Job(#[from] JobError),

    /// A text-only run has nowhere to put its results.
    #[error("An output folder is required when no input image is given")]
    OutputFolderRequired,
}

/// Everything one run needs besides the server connection.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub graph: Graph,
    /// Caller-chosen parameters; image fields are filled per iteration.
    pub overrides: Overrides,
    pub work_item: WorkItem,
    /// Inserted before the extension of outputs named after a source image.
    pub output_suffix: String,
    /// Base folder for text-only results (written to `generated/` inside).
    pub output_folder: Option<PathBuf>,
}

/// Retry and polling settings for the per-iteration steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunTiming {
    pub upload: RetryPolicy,
    pub submit: RetryPolicy,
    pub poll: PollConfig,
    pub download: DownloadConfig,
}

/// Drives runs against one ComfyUI instance.
pub struct Orchestrator {
    api: ComfyUIApi,
    gate: AvailabilityGate,
    timing: RunTiming,
}

impl Orchestrator {
    pub fn new(api: ComfyUIApi, activation: ActivationConfig) -> Self {
        let gate = AvailabilityGate::new(api.clone(), activation);
        Self {
            api,
            gate,
            timing: RunTiming::default(),
        }
    }

    pub fn with_gate_config(mut self, config: GateConfig) -> Self {
        self.gate = self.gate.with_config(config);
        self
    }

    pub fn with_timing(mut self, timing: RunTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Execute `request`, reporting progress through `on_progress`.
    ///
    /// Returns every written output path, in iteration order. An error in
    /// any iteration ends the run; files written by earlier iterations
    /// stay on disk.
    pub async fn run<F>(
        &self,
        request: &RunRequest,
        mut on_progress: F,
    ) -> Result<Vec<PathBuf>, RunError>
    where
        F: FnMut(RunProgress),
    {
        let iterations: Vec<Iteration> = request.work_item.iterations().collect();
        let targets = iterations
            .iter()
            .map(|it| output_target(it, request.output_folder.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        self.gate.ensure_available().await?;

        let total = iterations.len();
        tracing::info!(iterations = total, "Run started");

        let mut written = Vec::new();
        for (iteration, target) in iterations.iter().zip(&targets) {
            let index = iteration.index;

            on_progress(RunProgress::entering(Phase::Upload, index, total));
            let overrides = self.upload_iteration(iteration, &request.overrides).await?;
            let workflow = inject(&request.graph, &overrides);

            on_progress(RunProgress::entering(Phase::Processing, index, total));
            let job = jobs::submit(&self.api, &workflow.to_value(), &self.timing.submit).await?;
            let outputs =
                jobs::wait_for_completion(&self.api, &job.prompt_id, &self.timing.poll).await?;

            on_progress(RunProgress::entering(Phase::Download, index, total));
            let paths = download_outputs(
                &self.api,
                &outputs,
                target,
                &request.output_suffix,
                &self.timing.download,
            )
            .await;
            tracing::info!(
                iteration = index + 1,
                total,
                prompt_id = %job.prompt_id,
                outputs = paths.len(),
                "Iteration finished",
            );
            written.extend(paths);

            on_progress(RunProgress::finished(index, total));
        }

        tracing::info!(outputs = written.len(), "Run finished");
        Ok(written)
    }

    /// Upload the iteration's files and return the overrides that point
    /// the graph at them.
    async fn upload_iteration(
        &self,
        iteration: &Iteration,
        base: &Overrides,
    ) -> Result<Overrides, RunError> {
        let mut overrides = base.clone();
        for upload in &iteration.uploads {
            let name = with_retry(&self.timing.upload, "upload", || {
                self.api.upload_image(&upload.path)
            })
            .await
            .map_err(|source| RunError::Upload {
                path: upload.path.clone(),
                source,
            })?;
            tracing::debug!(path = %upload.path.display(), server_name = %name, "Image uploaded");

            match &upload.node_id {
                Some(node_id) => {
                    overrides.slot_images.insert(node_id.clone(), name);
                }
                None => overrides.image = Some(name),
            }
        }
        Ok(overrides)
    }
}

/// Results named after a source image go beside it; everything else goes
/// to `<output>/generated/`.
fn output_target(
    iteration: &Iteration,
    output_folder: Option<&std::path::Path>,
) -> Result<OutputTarget, RunError> {
    match (&iteration.source, output_folder) {
        (Some(source), _) => Ok(OutputTarget::BesideSource(source.clone())),
        (None, Some(folder)) => Ok(OutputTarget::generated_in(folder)),
        (None, None) => Err(RunError::OutputFolderRequired),
    }
}
