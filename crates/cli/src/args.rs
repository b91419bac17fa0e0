//! Value parsers for the repeatable `run` flags.

use std::path::PathBuf;

use kiln_core::params::AdapterUpdate;

/// `NODE=PATH`: one image for a multi-slot graph's slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotArg {
    pub node_id: String,
    pub path: PathBuf,
}

/// `NODE:KEY=NAME[@STRENGTH]`: an adapter change. An empty `NAME` keeps
/// the current adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraArg {
    pub node_id: String,
    pub adapter_key: String,
    pub update: AdapterUpdate,
}

pub fn parse_slot(raw: &str) -> Result<SlotArg, String> {
    let (node_id, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NODE=PATH, got '{raw}'"))?;
    if node_id.is_empty() || path.is_empty() {
        return Err(format!("expected NODE=PATH, got '{raw}'"));
    }
    Ok(SlotArg {
        node_id: node_id.to_string(),
        path: PathBuf::from(path),
    })
}

pub fn parse_lora(raw: &str) -> Result<LoraArg, String> {
    let usage = || format!("expected NODE:KEY=NAME[@STRENGTH], got '{raw}'");

    let (target, value) = raw.split_once('=').ok_or_else(usage)?;
    let (node_id, adapter_key) = target.split_once(':').ok_or_else(usage)?;
    if node_id.is_empty() || adapter_key.is_empty() {
        return Err(usage());
    }

    // Only a numeric tail is a strength; otherwise `@` belongs to the name.
    let (name, strength) = match value.rsplit_once('@') {
        Some((name, tail)) => match tail.parse::<f64>() {
            Ok(strength) => (name, Some(strength)),
            Err(_) => (value, None),
        },
        None => (value, None),
    };
    if name.is_empty() && strength.is_none() {
        return Err(usage());
    }

    Ok(LoraArg {
        node_id: node_id.to_string(),
        adapter_key: adapter_key.to_string(),
        update: AdapterUpdate {
            adapter_ref: (!name.is_empty()).then(|| name.to_string()),
            strength,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot() {
        assert_eq!(
            parse_slot("12=/img/style.png").unwrap(),
            SlotArg {
                node_id: "12".into(),
                path: PathBuf::from("/img/style.png")
            }
        );
        assert!(parse_slot("12").is_err());
        assert!(parse_slot("=x.png").is_err());
    }

    #[test]
    fn lora_with_name_and_strength() {
        let arg = parse_lora("8:lora_1=detail.safetensors@0.75").unwrap();
        assert_eq!(arg.node_id, "8");
        assert_eq!(arg.adapter_key, "lora_1");
        assert_eq!(arg.update.adapter_ref.as_deref(), Some("detail.safetensors"));
        assert_eq!(arg.update.strength, Some(0.75));
    }

    #[test]
    fn lora_strength_only() {
        let arg = parse_lora("8:lora_2=@1.2").unwrap();
        assert_eq!(arg.update.adapter_ref, None);
        assert_eq!(arg.update.strength, Some(1.2));
    }

    #[test]
    fn lora_rejects_malformed() {
        assert!(parse_lora("8=x").is_err());
        assert!(parse_lora("8:lora_1=").is_err());
    }

    #[test]
    fn lora_name_may_contain_at_sign() {
        let arg = parse_lora("8:lora_1=user@home.safetensors").unwrap();
        assert_eq!(arg.update.adapter_ref.as_deref(), Some("user@home.safetensors"));
        assert_eq!(arg.update.strength, None);

        let arg = parse_lora("8:lora_1=user@home.safetensors@0.5").unwrap();
        assert_eq!(arg.update.adapter_ref.as_deref(), Some("user@home.safetensors"));
        assert_eq!(arg.update.strength, Some(0.5));
    }
}
