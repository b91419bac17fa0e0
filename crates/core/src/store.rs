//! Small persistent key-value store and the state kept in it.
//!
//! Values are plain strings; lists are stored JSON-encoded. Two users sit
//! on top of the store:
//!
//! - [`PromptHistory`]: bounded most-recent-first lists of recent and
//!   favorite prompts, de-duplicated.
//! - [`ScreenshotHandoff`]: a one-shot key carrying a screenshot path from
//!   the capture entry point to the next run. Reading it deletes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key holding the recent prompt list.
pub const RECENT_PROMPTS_KEY: &str = "recent-prompts";

/// Key holding the favorite prompt list.
pub const FAVORITE_PROMPTS_KEY: &str = "favorite-prompts";

/// One-shot key carrying a screenshot path.
pub const SCREENSHOT_PATH_KEY: &str = "comfyui_screenshot_path";

pub const MAX_RECENT_PROMPTS: usize = 10;

pub const MAX_FAVORITE_PROMPTS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store lock poisoned")]
    Poisoned,
}

/// String key-value storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

/// In-memory store, used by tests and one-off runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(entries).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Prompt history
// ---------------------------------------------------------------------------

/// Recent and favorite prompts.
pub struct PromptHistory<'a, S: KeyValueStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyValueStore + ?Sized> PromptHistory<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Recent prompts, most recent first.
    pub fn recent(&self) -> Result<Vec<String>, StoreError> {
        read_list(self.store, RECENT_PROMPTS_KEY)
    }

    /// Move `prompt` to the front of the recent list. Blank prompts are
    /// ignored.
    pub fn remember(&self, prompt: &str) -> Result<Vec<String>, StoreError> {
        let list = self.recent()?;
        if prompt.trim().is_empty() {
            return Ok(list);
        }
        let list = push_front_bounded(list, prompt, MAX_RECENT_PROMPTS);
        write_list(self.store, RECENT_PROMPTS_KEY, &list)?;
        Ok(list)
    }

    pub fn favorites(&self) -> Result<Vec<String>, StoreError> {
        read_list(self.store, FAVORITE_PROMPTS_KEY)
    }

    /// Add `prompt` to favorites, or remove it if already present.
    /// Returns `true` when the prompt is a favorite afterwards.
    pub fn toggle_favorite(&self, prompt: &str) -> Result<bool, StoreError> {
        let mut list = self.favorites()?;
        if prompt.trim().is_empty() {
            return Ok(false);
        }
        let now_favorite = if list.iter().any(|p| p == prompt) {
            list.retain(|p| p != prompt);
            false
        } else {
            list = push_front_bounded(list, prompt, MAX_FAVORITE_PROMPTS);
            true
        };
        write_list(self.store, FAVORITE_PROMPTS_KEY, &list)?;
        Ok(now_favorite)
    }
}

fn push_front_bounded(list: Vec<String>, item: &str, max: usize) -> Vec<String> {
    std::iter::once(item.to_string())
        .chain(list.into_iter().filter(|p| p != item))
        .take(max)
        .collect()
}

/// Lists that fail to decode are treated as empty.
fn read_list<S: KeyValueStore + ?Sized>(store: &S, key: &str) -> Result<Vec<String>, StoreError> {
    let Some(raw) = store.get(key)? else {
        return Ok(Vec::new());
    };
    Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(key, error = %e, "Discarding undecodable stored list");
        Vec::new()
    }))
}

fn write_list<S: KeyValueStore + ?Sized>(
    store: &S,
    key: &str,
    list: &[String],
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string());
    store.set(key, &raw)
}

// ---------------------------------------------------------------------------
// Screenshot handoff
// ---------------------------------------------------------------------------

/// One-shot handoff of a screenshot path between entry points.
pub struct ScreenshotHandoff<'a, S: KeyValueStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyValueStore + ?Sized> ScreenshotHandoff<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn stash(&self, path: &Path) -> Result<(), StoreError> {
        self.store
            .set(SCREENSHOT_PATH_KEY, &path.to_string_lossy())
    }

    /// Read the stashed path and delete it.
    pub fn take(&self) -> Result<Option<PathBuf>, StoreError> {
        let value = self.store.get(SCREENSHOT_PATH_KEY)?;
        if value.is_some() {
            self.store.remove(SCREENSHOT_PATH_KEY)?;
        }
        Ok(value.filter(|v| !v.is_empty()).map(PathBuf::from))
    }
}
