//! Parameter sets: what a graph exposes, and what a caller wants changed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An image input node discovered in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInputSlot {
    pub node_id: String,
    /// Editor title, or `"Load Image {n}"` when the node has none.
    pub title: String,
    /// Input key the uploaded filename is written to.
    pub input_key: String,
}

/// A LoRA entry inside an adapter-stack node (`lora_1`, `lora_2`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSlot {
    pub node_id: String,
    pub adapter_key: String,
    pub current_adapter_ref: String,
    pub strength: f64,
}

/// Display-only model information. Never injected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vae: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_model: Option<String>,
    /// `"<sampler_name> / <scheduler>"` of the first sampler seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampler_summary: Option<String>,
}

/// Parameters inferred from a graph.
///
/// A scalar is `Some` only when at least one node legitimately exposes
/// it; `None` means the field should be neither shown nor injected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positive_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampler_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,

    /// Image inputs in first-seen document order.
    pub image_input_slots: Vec<ImageInputSlot>,
    pub adapter_slots: Vec<AdapterSlot>,

    pub info: ModelInfo,
}

impl ParameterSet {
    /// Number of image inputs the graph accepts.
    pub fn image_slot_count(&self) -> usize {
        self.image_input_slots.len()
    }

    /// Graphs with two or more image inputs are driven slot-by-slot.
    pub fn is_multi_slot(&self) -> bool {
        self.image_input_slots.len() > 1
    }

    /// Convert the extracted values back into injectable overrides.
    ///
    /// Injecting the result into the source graph leaves the extracted
    /// values unchanged.
    pub fn to_overrides(&self) -> Overrides {
        let mut adapters: BTreeMap<String, BTreeMap<String, AdapterUpdate>> = BTreeMap::new();
        for slot in &self.adapter_slots {
            adapters.entry(slot.node_id.clone()).or_default().insert(
                slot.adapter_key.clone(),
                AdapterUpdate {
                    adapter_ref: Some(slot.current_adapter_ref.clone()),
                    strength: Some(slot.strength),
                },
            );
        }

        Overrides {
            positive_prompt: self.positive_prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            seed: self.seed,
            steps: self.steps,
            cfg: self.cfg,
            batch_size: self.batch_size,
            width: self.width,
            height: self.height,
            sampler_name: self.sampler_name.clone(),
            scheduler: self.scheduler.clone(),
            image: None,
            slot_images: BTreeMap::new(),
            adapters,
        }
    }
}

/// New values for one adapter entry. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterUpdate {
    pub adapter_ref: Option<String>,
    pub strength: Option<f64>,
}

/// Caller-supplied values to write into a graph.
///
/// Every field is optional; `None` leaves the graph untouched for that
/// field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub batch_size: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,

    /// Uploaded filename for the first image slot.
    pub image: Option<String>,
    /// Uploaded filenames keyed by image-slot node id.
    pub slot_images: BTreeMap<String, String>,
    /// Adapter updates keyed by node id, then by adapter input key.
    pub adapters: BTreeMap<String, BTreeMap<String, AdapterUpdate>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_overrides_carries_scalars_and_adapters() {
        let params = ParameterSet {
            positive_prompt: Some("a cat".into()),
            seed: Some(7),
            adapter_slots: vec![AdapterSlot {
                node_id: "10".into(),
                adapter_key: "lora_1".into(),
                current_adapter_ref: "detail.safetensors".into(),
                strength: 0.6,
            }],
            ..Default::default()
        };

        let overrides = params.to_overrides();
        assert_eq!(overrides.positive_prompt.as_deref(), Some("a cat"));
        assert_eq!(overrides.seed, Some(7));
        assert!(overrides.image.is_none());
        let update = &overrides.adapters["10"]["lora_1"];
        assert_eq!(update.adapter_ref.as_deref(), Some("detail.safetensors"));
        assert_eq!(update.strength, Some(0.6));
    }

    #[test]
    fn multi_slot_needs_two_inputs() {
        let slot = |id: &str| ImageInputSlot {
            node_id: id.into(),
            title: "Load Image".into(),
            input_key: "image".into(),
        };
        let mut params = ParameterSet::default();
        assert!(!params.is_multi_slot());
        params.image_input_slots.push(slot("1"));
        assert!(!params.is_multi_slot());
        params.image_input_slots.push(slot("2"));
        assert!(params.is_multi_slot());
    }
}
