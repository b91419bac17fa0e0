//! Node-role classifiers.
//!
//! Graphs carry no schema for "where the prompt goes" or "which node
//! takes the input image". Instead each node is matched against a fixed,
//! ordered list of [`RoleClassifier`]s, each a pure predicate over the
//! node's class type and inputs. The extractor and the injector both go
//! through this module, so what is shown as editable is exactly what
//! gets edited.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::graph::{Graph, Node};

// ---------------------------------------------------------------------------
// ComfyUI class types
// ---------------------------------------------------------------------------

/// Single image loader; filename goes into `image`.
pub const LOAD_IMAGE_CLASS: &str = "LoadImage";

/// Multi image loader; filename goes into `images`.
pub const LOAD_IMAGES_CLASS: &str = "LoadImages";

pub const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";

pub const PRIMITIVE_STRING_MULTILINE_CLASS: &str = "PrimitiveStringMultiline";

pub const WILDCARD_PROCESSOR_CLASS: &str = "ImpactWildcardProcessor";

pub const KSAMPLER_CLASS: &str = "KSampler";

pub const KSAMPLER_ADVANCED_CLASS: &str = "KSamplerAdvanced";

// ---------------------------------------------------------------------------
// Input keys
// ---------------------------------------------------------------------------

/// Seed key aliases; `KSamplerAdvanced` calls it `noise_seed`.
pub const SEED_KEYS: &[&str] = &["seed", "noise_seed"];
pub const STEPS_KEY: &str = "steps";
pub const CFG_KEY: &str = "cfg";
pub const SAMPLER_NAME_KEY: &str = "sampler_name";
pub const SCHEDULER_KEY: &str = "scheduler";

pub const BATCH_SIZE_KEY: &str = "batch_size";
pub const WIDTH_KEY: &str = "width";
pub const HEIGHT_KEY: &str = "height";

pub const CHECKPOINT_KEYS: &[&str] = &["ckpt_name", "clip_name"];
pub const VAE_KEYS: &[&str] = &["vae_name"];
pub const ADAPTER_NAME_KEYS: &[&str] = &["lora_name"];
pub const BASE_MODEL_KEYS: &[&str] = &["unet_name", "model_name"];

/// Adapter entries inside a LoRA stack node: `lora_1`, `lora_2`, ...
static ADAPTER_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^lora_\d+$").expect("valid regex"));

/// Field names inside an adapter entry object.
pub const ADAPTER_REF_FIELD: &str = "lora";
pub const ADAPTER_STRENGTH_FIELD: &str = "strength";

// ---------------------------------------------------------------------------
// Role registry
// ---------------------------------------------------------------------------

/// Semantic role a node can play. A node may play several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    ImageSlot,
    PromptText,
    Sampler,
    LatentSize,
    AdapterStack,
    ModelInfo,
}

/// A predicate deciding whether a node plays `role`.
pub struct RoleClassifier {
    pub role: NodeRole,
    pub applies: fn(&Node) -> bool,
}

/// All classifiers, in the order they are evaluated for each node.
pub const ROLE_CLASSIFIERS: &[RoleClassifier] = &[
    RoleClassifier {
        role: NodeRole::ImageSlot,
        applies: is_image_slot,
    },
    RoleClassifier {
        role: NodeRole::PromptText,
        applies: is_prompt_capable,
    },
    RoleClassifier {
        role: NodeRole::Sampler,
        applies: is_sampler,
    },
    RoleClassifier {
        role: NodeRole::LatentSize,
        applies: exposes_latent_size,
    },
    RoleClassifier {
        role: NodeRole::AdapterStack,
        applies: has_adapter_entries,
    },
    RoleClassifier {
        role: NodeRole::ModelInfo,
        applies: names_a_model,
    },
];

/// Roles played by `node`, in registry order.
pub fn roles_of(node: &Node) -> impl Iterator<Item = NodeRole> + '_ {
    ROLE_CLASSIFIERS
        .iter()
        .filter(move |c| (c.applies)(node))
        .map(|c| c.role)
}

/// Input key an image loader of this class reads its filename from.
pub fn image_input_key(class_type: &str) -> Option<&'static str> {
    match class_type {
        LOAD_IMAGE_CLASS => Some("image"),
        LOAD_IMAGES_CLASS => Some("images"),
        _ => None,
    }
}

/// Input key holding the prompt text for prompt-capable classes.
pub fn prompt_text_key(class_type: &str) -> Option<&'static str> {
    match class_type {
        CLIP_TEXT_ENCODE_CLASS => Some("text"),
        PRIMITIVE_STRING_MULTILINE_CLASS => Some("value"),
        WILDCARD_PROCESSOR_CLASS => Some("wildcard_text"),
        _ => None,
    }
}

pub fn is_sampler(node: &Node) -> bool {
    matches!(
        node.class_type.as_str(),
        KSAMPLER_CLASS | KSAMPLER_ADVANCED_CLASS
    )
}

fn is_image_slot(node: &Node) -> bool {
    image_input_key(&node.class_type).is_some()
}

fn is_prompt_capable(node: &Node) -> bool {
    prompt_text_key(&node.class_type).is_some()
}

fn exposes_latent_size(node: &Node) -> bool {
    [BATCH_SIZE_KEY, WIDTH_KEY, HEIGHT_KEY]
        .iter()
        .any(|key| node.has_input(key))
}

fn has_adapter_entries(node: &Node) -> bool {
    adapter_entries(node).next().is_some()
}

fn names_a_model(node: &Node) -> bool {
    CHECKPOINT_KEYS
        .iter()
        .chain(VAE_KEYS)
        .chain(ADAPTER_NAME_KEYS)
        .chain(BASE_MODEL_KEYS)
        .any(|key| node.str_input(key).is_some())
}

/// Adapter-shaped inputs of a node: `(input_key, adapter_ref, strength)`.
pub fn adapter_entries(node: &Node) -> impl Iterator<Item = (&str, &str, f64)> {
    node.inputs.iter().filter_map(|(key, value)| {
        if !ADAPTER_KEY_RE.is_match(key) {
            return None;
        }
        let (adapter_ref, strength) = adapter_fields(value)?;
        Some((key.as_str(), adapter_ref, strength))
    })
}

/// Reference and strength of an adapter entry object.
pub fn adapter_fields(value: &Value) -> Option<(&str, f64)> {
    let obj = value.as_object()?;
    let adapter_ref = obj.get(ADAPTER_REF_FIELD)?.as_str()?;
    let strength = obj.get(ADAPTER_STRENGTH_FIELD)?.as_f64()?;
    Some((adapter_ref, strength))
}

// ---------------------------------------------------------------------------
// Prompt classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptCategory {
    Positive,
    Negative,
}

/// Where a prompt category lives in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTarget {
    pub node_id: String,
    pub input_key: &'static str,
}

/// Result of classifying every prompt-capable node in a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptTargets {
    pub positive: Option<PromptTarget>,
    pub negative: Option<PromptTarget>,
}

impl PromptTargets {
    pub fn get(&self, category: PromptCategory) -> Option<&PromptTarget> {
        match category {
            PromptCategory::Positive => self.positive.as_ref(),
            PromptCategory::Negative => self.negative.as_ref(),
        }
    }
}

/// Category implied by a node title, case-insensitively.
///
/// "negative" wins over "positive"/"prompt", so "Negative Prompt" is
/// negative.
pub fn category_from_title(title: Option<&str>) -> Option<PromptCategory> {
    let title = title?.to_lowercase();
    if title.contains("negative") {
        Some(PromptCategory::Negative)
    } else if title.contains("positive") || title.contains("prompt") {
        Some(PromptCategory::Positive)
    } else {
        None
    }
}

/// Incremental prompt classifier fed nodes in document order.
///
/// First match per category wins. An untitled node carrying non-empty
/// text is adopted as positive only while no positive has been found.
#[derive(Debug, Default)]
pub struct PromptClassifier {
    targets: PromptTargets,
}

impl PromptClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consider one node. Returns the category it was assigned, if any.
    pub fn observe(&mut self, node_id: &str, node: &Node) -> Option<PromptCategory> {
        let input_key = prompt_text_key(&node.class_type)?;
        // Linked text is produced elsewhere in the graph and cannot be edited.
        let text = node.str_input(input_key)?;

        let category = match category_from_title(node.title()) {
            Some(category) => category,
            None if self.targets.positive.is_none() && !text.trim().is_empty() => {
                PromptCategory::Positive
            }
            None => return None,
        };

        let slot = match category {
            PromptCategory::Positive => &mut self.targets.positive,
            PromptCategory::Negative => &mut self.targets.negative,
        };
        if slot.is_some() {
            return None;
        }
        *slot = Some(PromptTarget {
            node_id: node_id.to_string(),
            input_key,
        });
        Some(category)
    }

    pub fn finish(self) -> PromptTargets {
        self.targets
    }
}

/// Classify every prompt-capable node of `graph`.
pub fn classify_prompts(graph: &Graph) -> PromptTargets {
    let mut classifier = PromptClassifier::new();
    for (node_id, node) in graph.nodes() {
        classifier.observe(node_id, node);
    }
    classifier.finish()
}
