//! Parameter injection: write caller-supplied values into a graph.
//!
//! [`inject`] returns a modified copy and leaves the input graph as it
//! was. Injection only ever overwrites inputs a node already declares;
//! it never adds keys and never adds or removes nodes.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::graph::{is_link, Graph, Node};
use crate::params::{AdapterUpdate, Overrides};
use crate::roles::{
    self, PromptCategory, ADAPTER_REF_FIELD, ADAPTER_STRENGTH_FIELD, BATCH_SIZE_KEY, CFG_KEY,
    HEIGHT_KEY, SAMPLER_NAME_KEY, SCHEDULER_KEY, SEED_KEYS, STEPS_KEY, WIDTH_KEY,
};

/// Produce a copy of `graph` with `overrides` applied.
pub fn inject(graph: &Graph, overrides: &Overrides) -> Graph {
    // Classify against the untouched graph so the choice matches what
    // extraction reported for the same document.
    let prompt_targets = roles::classify_prompts(graph);
    let mut out = graph.clone();

    if let Some(filename) = &overrides.image {
        inject_first_image(&mut out, filename);
    }
    inject_slot_images(&mut out, &overrides.slot_images);

    for (category, text) in [
        (PromptCategory::Positive, &overrides.positive_prompt),
        (PromptCategory::Negative, &overrides.negative_prompt),
    ] {
        let (Some(text), Some(target)) = (text, prompt_targets.get(category)) else {
            continue;
        };
        if let Some(node) = out.get_mut(&target.node_id) {
            node.replace_input(target.input_key, Value::String(text.clone()));
        }
    }

    for (_, node) in out.nodes_mut() {
        inject_scalars(node, overrides);
    }

    inject_adapters(&mut out, &overrides.adapters);

    out
}

/// Write `filename` into the first image slot only.
fn inject_first_image(graph: &mut Graph, filename: &str) {
    for (node_id, node) in graph.nodes_mut() {
        let Some(key) = roles::image_input_key(&node.class_type) else {
            continue;
        };
        if !node.replace_input(key, Value::String(filename.to_string())) {
            tracing::debug!(node_id, key, "First image slot does not declare its input key");
        }
        return;
    }
}

/// Write each filename into the slot node it is keyed by.
fn inject_slot_images(graph: &mut Graph, slot_images: &BTreeMap<String, String>) {
    for (node_id, filename) in slot_images {
        let Some(node) = graph.get_mut(node_id) else {
            tracing::warn!(node_id = %node_id, "Image slot not found in graph");
            continue;
        };
        let Some(key) = roles::image_input_key(&node.class_type) else {
            tracing::warn!(
                node_id = %node_id,
                class_type = %node.class_type,
                "Node is not an image slot",
            );
            continue;
        };
        node.replace_input(key, Value::String(filename.clone()));
    }
}

fn inject_scalars(node: &mut Node, overrides: &Overrides) {
    if roles::is_sampler(node) {
        if let Some(seed) = overrides.seed {
            for key in SEED_KEYS {
                replace_literal(node, key, json!(seed));
            }
        }
        if let Some(steps) = overrides.steps {
            replace_literal(node, STEPS_KEY, json!(steps));
        }
        if let Some(cfg) = overrides.cfg {
            replace_literal(node, CFG_KEY, json!(cfg));
        }
        if let Some(sampler) = &overrides.sampler_name {
            replace_literal(node, SAMPLER_NAME_KEY, json!(sampler));
        }
        if let Some(scheduler) = &overrides.scheduler {
            replace_literal(node, SCHEDULER_KEY, json!(scheduler));
        }
    }

    if let Some(batch_size) = overrides.batch_size {
        replace_literal(node, BATCH_SIZE_KEY, json!(batch_size));
    }
    if let Some(width) = overrides.width {
        replace_literal(node, WIDTH_KEY, json!(width));
    }
    if let Some(height) = overrides.height {
        replace_literal(node, HEIGHT_KEY, json!(height));
    }
}

/// Overwrite `key` if it holds a literal; links and absent keys are left alone.
fn replace_literal(node: &mut Node, key: &str, value: Value) {
    if node.input(key).is_some_and(|v| !is_link(v)) {
        node.replace_input(key, value);
    }
}

fn inject_adapters(
    graph: &mut Graph,
    updates: &BTreeMap<String, BTreeMap<String, AdapterUpdate>>,
) {
    for (node_id, node_updates) in updates {
        let Some(node) = graph.get_mut(node_id) else {
            tracing::warn!(node_id = %node_id, "Adapter node not found in graph");
            continue;
        };
        for (adapter_key, update) in node_updates {
            let Some(entry) = node.inputs.get_mut(adapter_key) else {
                continue;
            };
            let Some((current_ref, current_strength)) = roles::adapter_fields(entry) else {
                continue;
            };

            let new_ref = update.adapter_ref.as_deref().unwrap_or(current_ref).to_string();
            let new_strength = update.strength.unwrap_or(current_strength);
            if new_ref == current_ref && new_strength == current_strength {
                continue;
            }

            if let Some(obj) = entry.as_object_mut() {
                obj.insert(ADAPTER_REF_FIELD.to_string(), Value::String(new_ref));
                obj.insert(ADAPTER_STRENGTH_FIELD.to_string(), json!(new_strength));
            }
        }
    }
}
