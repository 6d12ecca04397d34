// Adapter metadata: which base model an adapter was trained on

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::constants::ADAPTER_META_FILE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterMeta {
    pub base_model: String,
}

/// Write `adapter_meta.json` into `dir`.
pub fn write_adapter_meta(dir: &Path, base_model: &str) -> Result<()> {
    let path = dir.join(ADAPTER_META_FILE);
    let meta = AdapterMeta {
        base_model: base_model.to_string(),
    };
    std::fs::write(&path, serde_json::to_string_pretty(&meta)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_adapter_meta(dir: &Path) -> Result<AdapterMeta> {
    let path = dir.join(ADAPTER_META_FILE);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Base model recorded for the adapter, or `fallback` when the metadata is
/// missing or unreadable.
pub fn detect_base_model(dir: &Path, fallback: &str) -> String {
    match read_adapter_meta(dir) {
        Ok(meta) => meta.base_model,
        Err(e) => {
            tracing::warn!("No usable adapter metadata ({:#}), assuming {}", e, fallback);
            fallback.to_string()
        }
    }
}
