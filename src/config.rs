use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::brush::BrushPreset;
use crate::error::Result;
use crate::history::HistoryManager;

/// Tunables of the painting core. Where the file lives is up to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// Maximum number of undo steps
    pub max_undo_steps: usize,
    /// Memory cap across both history stacks; `None` disables it
    pub max_undo_memory_bytes: Option<usize>,
    pub brush_presets: Vec<BrushPreset>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_undo_steps: 50,
            max_undo_memory_bytes: Some(100 * 1024 * 1024),
            brush_presets: BrushPreset::defaults(),
        }
    }
}

impl CoreConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from `path`, falling back to defaults if the file is missing or corrupt.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else { return Self::default() };
        match Self::from_json(&text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("ignoring config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn history(&self) -> HistoryManager {
        HistoryManager::with_limits(self.max_undo_steps, self.max_undo_memory_bytes)
    }

    /// Preset by title, case-insensitive.
    pub fn preset(&self, title: &str) -> Option<&BrushPreset> {
        self.brush_presets.iter().find(|p| p.title().eq_ignore_ascii_case(title))
    }
}
