//! Workflow library: the directory of graph files a user picks from.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;
use crate::graph::Graph;
use crate::naming::CandidateName;
use crate::roles::{self, NodeRole};

const WORKFLOW_EXTENSION: &str = "json";

/// One graph file in the workflows directory.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEntry {
    /// File name including extension.
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Quick capability check used when listing workflows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowSummary {
    pub has_image_input: bool,
    pub has_prompt_node: bool,
}

/// List every `*.json` file in `dir`, sorted by name.
///
/// A missing or unreadable directory yields an empty list.
pub fn list_workflows(dir: &Path) -> Vec<WorkflowEntry> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Workflows directory unreadable");
            return Vec::new();
        }
    };

    let mut entries: Vec<WorkflowEntry> = read_dir
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.path().extension().and_then(|e| e.to_str()) == Some(WORKFLOW_EXTENSION)
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(WorkflowEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                size_bytes: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            })
        })
        .collect();

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Report whether a graph accepts an image and has a prompt node.
pub fn summarize(graph: &Graph) -> WorkflowSummary {
    let mut summary = WorkflowSummary::default();
    for (_, node) in graph.nodes() {
        for role in roles::roles_of(node) {
            match role {
                NodeRole::ImageSlot => summary.has_image_input = true,
                NodeRole::PromptText => summary.has_prompt_node = true,
                _ => {}
            }
        }
    }
    summary
}

/// Summarize a graph file; unreadable or malformed files report nothing.
pub fn analyze_workflow(path: &Path) -> WorkflowSummary {
    Graph::load(path)
        .map(|graph| summarize(&graph))
        .unwrap_or_default()
}

/// Resolve a workflow argument: an existing path is used as-is, a bare
/// name (with or without `.json`) is looked up in `dir`.
pub fn resolve_workflow(dir: &Path, name_or_path: &str) -> Result<PathBuf, CoreError> {
    let direct = expand_home(name_or_path);
    if direct.is_file() {
        return Ok(direct);
    }

    let file_name = if name_or_path.ends_with(".json") {
        name_or_path.to_string()
    } else {
        format!("{name_or_path}.{WORKFLOW_EXTENSION}")
    };
    let in_dir = dir.join(file_name);
    if in_dir.is_file() {
        Ok(in_dir)
    } else {
        Err(CoreError::WorkflowNotFound(in_dir))
    }
}

/// Copy a workflow to `{stem}_copy.json` next to it, numbering the copy
/// if that name is taken. Returns the new path.
pub fn duplicate_workflow(path: &Path) -> Result<PathBuf, CoreError> {
    if !path.is_file() {
        return Err(CoreError::WorkflowNotFound(path.to_path_buf()));
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let target =
        CandidateName::new(dir, format!("{stem}_copy"), format!(".{WORKFLOW_EXTENSION}")).unique();

    std::fs::copy(path, &target).map_err(|e| CoreError::io(&target, e))?;
    tracing::info!(from = %path.display(), to = %target.display(), "Workflow duplicated");
    Ok(target)
}

pub fn delete_workflow(path: &Path) -> Result<(), CoreError> {
    if !path.is_file() {
        return Err(CoreError::WorkflowNotFound(path.to_path_buf()));
    }
    std::fs::remove_file(path).map_err(|e| CoreError::io(path, e))?;
    tracing::info!(path = %path.display(), "Workflow deleted");
    Ok(())
}

/// Expand a leading `~/` (or a bare `~`) to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let home = dirs::home_dir();
    match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    }
}

/// Human-readable size: `512 B`, `1.5 KB`, `2.0 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}
