//! Subcommand handlers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use kiln_comfyui::api::ComfyUIApi;
use kiln_comfyui::availability::AvailabilityGate;
use kiln_core::extract::extract;
use kiln_core::graph::Graph;
use kiln_core::library::{self, expand_home, format_file_size};
use kiln_core::params::{Overrides, ParameterSet};
use kiln_core::progress::RunProgress;
use kiln_core::store::{JsonFileStore, PromptHistory, ScreenshotHandoff};
use kiln_core::work_item::WorkItem;
use kiln_pipeline::{Orchestrator, RunRequest};

use crate::args::{LoraArg, SlotArg};
use crate::config::Config;
use crate::RunArgs;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub async fn status(config: &Config) -> Result<()> {
    let gate = AvailabilityGate::new(
        ComfyUIApi::new(&config.comfyui_url),
        config.activation.clone(),
    );
    gate.ensure_available().await?;
    println!("ComfyUI is ready at {}", config.comfyui_url);
    Ok(())
}

pub async fn loras(config: &Config) -> Result<()> {
    let names = ComfyUIApi::new(&config.comfyui_url)
        .list_lora_names()
        .await
        .context("failed to list LoRAs")?;
    for name in names {
        println!("{name}");
    }
    Ok(())
}

pub async fn run(config: &Config, args: RunArgs) -> Result<()> {
    let store = JsonFileStore::new(&config.state_path);

    let path = library::resolve_workflow(&config.workflows_path, &args.workflow)?;
    let graph = Graph::load(&path)?;
    let params = extract(&graph);

    let mut images: Vec<PathBuf> = Vec::new();
    if args.from_screenshot {
        match ScreenshotHandoff::new(&store).take()? {
            Some(shot) => images.push(shot),
            None => bail!("no screenshot has been stashed"),
        }
    }
    images.extend(args.images.iter().cloned());

    let work_item = build_work_item(&params, images, &args.slots)?;
    let overrides = build_overrides(&args);
    let request = RunRequest {
        graph,
        overrides,
        work_item,
        output_suffix: args
            .suffix
            .clone()
            .unwrap_or_else(|| config.output_suffix.clone()),
        output_folder: args.output.as_ref().map(|p| expand_home(&p.to_string_lossy())),
    };

    tracing::info!(workflow = %path.display(), "Starting run");
    let orchestrator = Orchestrator::new(
        ComfyUIApi::new(&config.comfyui_url),
        config.activation.clone(),
    );
    let written = orchestrator.run(&request, report_progress).await?;

    if let Some(prompt) = &args.prompt {
        if let Err(e) = PromptHistory::new(&store).remember(prompt) {
            tracing::warn!(error = %e, "Could not record prompt history");
        }
    }

    for path in &written {
        println!("{}", path.display());
    }
    if written.is_empty() {
        eprintln!("The workflow finished without producing images");
    }
    Ok(())
}

fn report_progress(progress: RunProgress) {
    eprintln!(
        "[{}/{}] {:<10} {:>3.0}%",
        progress.current,
        progress.total,
        progress.phase.label(),
        progress.percentage
    );
}

/// Multi-slot graphs bind `--image` to their first slot and `--slot` to
/// the named slots; other graphs submit once per `--image`.
fn build_work_item(
    params: &ParameterSet,
    images: Vec<PathBuf>,
    slots: &[SlotArg],
) -> Result<WorkItem> {
    if params.is_multi_slot() {
        let mut files: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        if let Some(first) = params.image_input_slots.first() {
            if !images.is_empty() {
                files.entry(first.node_id.clone()).or_default().extend(images);
            }
        }
        for slot in slots {
            files
                .entry(slot.node_id.clone())
                .or_default()
                .push(slot.path.clone());
        }
        return Ok(WorkItem::multi_slot(&params.image_input_slots, files)?);
    }

    if !slots.is_empty() {
        bail!("--slot needs a workflow with several image inputs");
    }
    if params.image_slot_count() == 0 && !images.is_empty() {
        bail!("this workflow has no image input");
    }
    Ok(WorkItem::Batch(images))
}

fn build_overrides(args: &RunArgs) -> Overrides {
    let mut adapters: BTreeMap<String, BTreeMap<_, _>> = BTreeMap::new();
    for LoraArg {
        node_id,
        adapter_key,
        update,
    } in &args.loras
    {
        adapters
            .entry(node_id.clone())
            .or_default()
            .insert(adapter_key.clone(), update.clone());
    }

    Overrides {
        positive_prompt: args.prompt.clone(),
        negative_prompt: args.negative.clone(),
        seed: args.seed,
        steps: args.steps,
        cfg: args.cfg,
        batch_size: args.batch_size,
        width: args.width,
        height: args.height,
        sampler_name: args.sampler.clone(),
        scheduler: args.scheduler.clone(),
        adapters,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

pub fn list_workflows(config: &Config) -> Result<()> {
    let entries = library::list_workflows(&config.workflows_path);
    if entries.is_empty() {
        eprintln!("No workflows in {}", config.workflows_path.display());
        return Ok(());
    }
    for entry in entries {
        let summary = library::analyze_workflow(&entry.path);
        let modified = entry
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let kind = match (summary.has_image_input, summary.has_prompt_node) {
            (true, true) => "image+prompt",
            (true, false) => "image",
            (false, true) => "prompt",
            (false, false) => "-",
        };
        println!(
            "{:<40} {:>9}  {:<16}  {kind}",
            entry.name,
            format_file_size(entry.size_bytes),
            modified
        );
    }
    Ok(())
}

pub fn show_workflow(config: &Config, workflow: &str) -> Result<()> {
    let path = library::resolve_workflow(&config.workflows_path, workflow)?;
    let params = extract(&Graph::load(&path)?);
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}

pub fn duplicate_workflow(config: &Config, workflow: &str) -> Result<()> {
    let path = library::resolve_workflow(&config.workflows_path, workflow)?;
    let copy = library::duplicate_workflow(&path)?;
    println!("{}", copy.display());
    Ok(())
}

pub fn delete_workflow(config: &Config, workflow: &str) -> Result<()> {
    let path = library::resolve_workflow(&config.workflows_path, workflow)?;
    library::delete_workflow(&path)?;
    println!("Deleted {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Local state
// ---------------------------------------------------------------------------

pub fn recent_prompts(config: &Config) -> Result<()> {
    let store = JsonFileStore::new(&config.state_path);
    for prompt in PromptHistory::new(&store).recent()? {
        println!("{prompt}");
    }
    Ok(())
}

pub fn favorite_prompts(config: &Config) -> Result<()> {
    let store = JsonFileStore::new(&config.state_path);
    for prompt in PromptHistory::new(&store).favorites()? {
        println!("{prompt}");
    }
    Ok(())
}

pub fn toggle_favorite(config: &Config, text: &str) -> Result<()> {
    let store = JsonFileStore::new(&config.state_path);
    if PromptHistory::new(&store).toggle_favorite(text)? {
        println!("Added to favorites");
    } else {
        println!("Removed from favorites");
    }
    Ok(())
}

pub fn stash_screenshot(config: &Config, path: &Path) -> Result<()> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("screenshot not found: {}", path.display()))?;
    let store = JsonFileStore::new(&config.state_path);
    ScreenshotHandoff::new(&store).stash(&path)?;
    println!("Stashed {}", path.display());
    Ok(())
}
