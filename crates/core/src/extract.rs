//! Parameter extraction: infer what a graph lets the user edit.
//!
//! Extraction is best-effort and never fails. Nodes are visited in
//! document order and each one is run through the extractors for every
//! role it plays (see [`crate::roles`]).

use std::path::Path;

use serde_json::Value;

use crate::graph::{is_link, Graph, Node};
use crate::params::{AdapterSlot, ImageInputSlot, ModelInfo, ParameterSet};
use crate::roles::{
    self, NodeRole, PromptCategory, PromptClassifier, ADAPTER_NAME_KEYS, BASE_MODEL_KEYS,
    BATCH_SIZE_KEY, CFG_KEY, CHECKPOINT_KEYS, HEIGHT_KEY, SAMPLER_NAME_KEY, SCHEDULER_KEY,
    SEED_KEYS, STEPS_KEY, VAE_KEYS, WIDTH_KEY,
};

/// Accumulated state while walking a graph.
#[derive(Default)]
struct Extraction {
    params: ParameterSet,
    prompts: PromptClassifier,
}

/// Infer the editable parameter set of `graph`.
pub fn extract(graph: &Graph) -> ParameterSet {
    let mut state = Extraction::default();

    for (node_id, node) in graph.nodes() {
        for role in roles::roles_of(node) {
            match role {
                NodeRole::ImageSlot => extract_image_slot(&mut state, node_id, node),
                NodeRole::PromptText => extract_prompt(&mut state, node_id, node),
                NodeRole::Sampler => extract_sampler(&mut state, node),
                NodeRole::LatentSize => extract_latent_size(&mut state, node),
                NodeRole::AdapterStack => extract_adapters(&mut state, node_id, node),
                NodeRole::ModelInfo => extract_model_info(&mut state.params.info, node),
            }
        }
    }

    state.params
}

/// Extract from an undecoded JSON document. Malformed documents yield an
/// empty [`ParameterSet`].
pub fn extract_value(value: Value) -> ParameterSet {
    match Graph::from_value(value) {
        Ok(graph) => extract(&graph),
        Err(e) => {
            tracing::debug!(error = %e, "Extraction skipped for malformed graph");
            ParameterSet::default()
        }
    }
}

/// Extract from a graph file. Unreadable or malformed files yield an
/// empty [`ParameterSet`].
pub fn extract_file(path: &Path) -> ParameterSet {
    match Graph::load(path) {
        Ok(graph) => extract(&graph),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Extraction skipped");
            ParameterSet::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Per-role extractors
// ---------------------------------------------------------------------------

fn extract_image_slot(state: &mut Extraction, node_id: &str, node: &Node) {
    let Some(input_key) = roles::image_input_key(&node.class_type) else {
        return;
    };
    let slots = &mut state.params.image_input_slots;
    let title = match node.title().map(str::trim) {
        Some(title) if !title.is_empty() => title.to_string(),
        _ => format!("Load Image {}", slots.len() + 1),
    };
    slots.push(ImageInputSlot {
        node_id: node_id.to_string(),
        title,
        input_key: input_key.to_string(),
    });
}

fn extract_prompt(state: &mut Extraction, node_id: &str, node: &Node) {
    let Some(category) = state.prompts.observe(node_id, node) else {
        return;
    };
    let text = roles::prompt_text_key(&node.class_type)
        .and_then(|key| node.str_input(key))
        .map(str::to_string);
    match category {
        PromptCategory::Positive => state.params.positive_prompt = text,
        PromptCategory::Negative => state.params.negative_prompt = text,
    }
}

/// First sampler to expose a field wins; wrongly-typed values are skipped.
fn extract_sampler(state: &mut Extraction, node: &Node) {
    let params = &mut state.params;

    if params.seed.is_none() {
        params.seed = SEED_KEYS.iter().find_map(|key| literal_u64(node, key));
    }
    if params.steps.is_none() {
        params.steps = literal_u32(node, STEPS_KEY);
    }
    if params.cfg.is_none() {
        params.cfg = literal_f64(node, CFG_KEY);
    }
    if params.sampler_name.is_none() {
        params.sampler_name = node.str_input(SAMPLER_NAME_KEY).map(str::to_string);
    }
    if params.scheduler.is_none() {
        params.scheduler = node.str_input(SCHEDULER_KEY).map(str::to_string);
    }

    if params.info.sampler_summary.is_none() {
        params.info.sampler_summary = match (
            node.str_input(SAMPLER_NAME_KEY),
            node.str_input(SCHEDULER_KEY),
        ) {
            (Some(sampler), Some(scheduler)) => Some(format!("{sampler} / {scheduler}")),
            (Some(sampler), None) => Some(sampler.to_string()),
            (None, Some(scheduler)) => Some(scheduler.to_string()),
            (None, None) => None,
        };
    }
}

/// Any node may expose batch/size. Last writer in document order wins.
fn extract_latent_size(state: &mut Extraction, node: &Node) {
    let params = &mut state.params;
    if let Some(v) = literal_u32(node, BATCH_SIZE_KEY) {
        params.batch_size = Some(v);
    }
    if let Some(v) = literal_u32(node, WIDTH_KEY) {
        params.width = Some(v);
    }
    if let Some(v) = literal_u32(node, HEIGHT_KEY) {
        params.height = Some(v);
    }
}

fn extract_adapters(state: &mut Extraction, node_id: &str, node: &Node) {
    for (adapter_key, adapter_ref, strength) in roles::adapter_entries(node) {
        state.params.adapter_slots.push(AdapterSlot {
            node_id: node_id.to_string(),
            adapter_key: adapter_key.to_string(),
            current_adapter_ref: adapter_ref.to_string(),
            strength,
        });
    }
}

fn extract_model_info(info: &mut ModelInfo, node: &Node) {
    fill_first(&mut info.checkpoint, node, CHECKPOINT_KEYS);
    fill_first(&mut info.vae, node, VAE_KEYS);
    fill_first(&mut info.adapter, node, ADAPTER_NAME_KEYS);
    fill_first(&mut info.base_model, node, BASE_MODEL_KEYS);
}

fn fill_first(field: &mut Option<String>, node: &Node, aliases: &[&str]) {
    if field.is_none() {
        *field = aliases
            .iter()
            .find_map(|key| node.str_input(key))
            .map(str::to_string);
    }
}

// ---------------------------------------------------------------------------
// Typed literal accessors
// ---------------------------------------------------------------------------

fn literal<'a>(node: &'a Node, key: &str) -> Option<&'a Value> {
    node.input(key).filter(|v| !is_link(v))
}

fn literal_u64(node: &Node, key: &str) -> Option<u64> {
    literal(node, key)?.as_u64()
}

fn literal_u32(node: &Node, key: &str) -> Option<u32> {
    literal_u64(node, key).and_then(|v| u32::try_from(v).ok())
}

fn literal_f64(node: &Node, key: &str) -> Option<f64> {
    literal(node, key)?.as_f64()
}
