use std::path::PathBuf;

use kiln_comfyui::availability::ActivationConfig;
use kiln_core::library::expand_home;

const DEFAULT_COMFYUI_URL: &str = "http://127.0.0.1:8188";
const DEFAULT_OUTPUT_SUFFIX: &str = "_comfy";
const DEFAULT_WORKFLOWS_PATH: &str = "~/ComfyUI/workflows";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine a data directory; set KILN_STATE_PATH")]
    NoDataDir,
}

/// Launcher configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// ComfyUI base URL, without a trailing slash.
    pub comfyui_url: String,
    /// Home Assistant settings for powering the server on.
    pub activation: ActivationConfig,
    /// Suffix inserted before the extension of image-to-image outputs.
    pub output_suffix: String,
    /// Directory of `*.json` workflow graphs.
    pub workflows_path: PathBuf,
    /// JSON file backing prompt history and the screenshot handoff.
    pub state_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    /// Empty values count as unset.
    ///
    /// | Env Var            | Default                      |
    /// |--------------------|------------------------------|
    /// | `COMFYUI_URL`      | `http://127.0.0.1:8188`      |
    /// | `HA_URL_INTERNAL`  | unset                        |
    /// | `HA_URL_EXTERNAL`  | unset                        |
    /// | `HA_TOKEN`         | unset                        |
    /// | `COMFYUI_SWITCH`   | unset                        |
    /// | `OUTPUT_SUFFIX`    | `_comfy`                     |
    /// | `WORKFLOWS_PATH`   | `~/ComfyUI/workflows`        |
    /// | `KILN_STATE_PATH`  | `<data dir>/kiln/state.json` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let comfyui_url = var("COMFYUI_URL")
            .unwrap_or_else(|| DEFAULT_COMFYUI_URL.into())
            .trim_end_matches('/')
            .to_string();

        let activation = ActivationConfig {
            internal_url: var("HA_URL_INTERNAL"),
            external_url: var("HA_URL_EXTERNAL"),
            token: var("HA_TOKEN"),
            switch_entity: var("COMFYUI_SWITCH"),
        };

        let output_suffix = var("OUTPUT_SUFFIX").unwrap_or_else(|| DEFAULT_OUTPUT_SUFFIX.into());

        let workflows_path =
            expand_home(&var("WORKFLOWS_PATH").unwrap_or_else(|| DEFAULT_WORKFLOWS_PATH.into()));

        let state_path = match var("KILN_STATE_PATH") {
            Some(path) => expand_home(&path),
            None => dirs::data_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join("kiln")
                .join("state.json"),
        };

        Ok(Self {
            comfyui_url,
            activation,
            output_suffix,
            workflows_path,
            state_path,
        })
    }
}
