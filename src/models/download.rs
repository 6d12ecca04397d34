// Model Downloader - base model files with progress tracking
// Uses HuggingFace Hub for download management and caching

use anyhow::{Context, Result};
use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::constants::TOKENIZER_FILE;

const CONFIG_FILE: &str = "config.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Local paths of everything needed to build a base model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub model_id: String,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

/// Model downloader with HuggingFace Hub integration
pub struct ModelDownloader {
    api: Api,
}

impl ModelDownloader {
    /// Create new downloader (uses default HF cache: ~/.cache/huggingface/)
    pub fn new() -> Result<Self> {
        let api = Api::new().context("Failed to initialize HuggingFace Hub client")?;
        Ok(Self { api })
    }

    /// Resolve model files for `model_id`.
    ///
    /// An existing local directory is used as-is; anything else is treated
    /// as a Hub repository id and fetched into the cache.
    pub fn fetch(&self, model_id: &str) -> Result<ModelFiles> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return local_model_files(local);
        }

        let repo = self
            .api
            .repo(Repo::new(model_id.to_string(), RepoType::Model));

        tracing::info!("Downloading {} to cache...", model_id);

        let pb = ProgressBar::new(3);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        pb.set_message(CONFIG_FILE);
        let config = get_file(&repo, model_id, CONFIG_FILE)?;
        pb.inc(1);

        pb.set_message(TOKENIZER_FILE);
        let tokenizer = get_file(&repo, model_id, TOKENIZER_FILE)?;
        pb.inc(1);

        pb.set_message("weights");
        let weights = match repo.get(SINGLE_WEIGHTS_FILE) {
            Ok(path) => vec![path],
            Err(e) => {
                // Larger checkpoints are sharded
                tracing::debug!("No single weights file for {} ({}), trying index", model_id, e);
                let index = get_file(&repo, model_id, WEIGHTS_INDEX_FILE)?;
                shard_names(&index)?
                    .iter()
                    .map(|name| get_file(&repo, model_id, name))
                    .collect::<Result<Vec<_>>>()?
            }
        };
        pb.inc(1);
        pb.finish_with_message("Download complete");

        Ok(ModelFiles {
            model_id: model_id.to_string(),
            config,
            tokenizer,
            weights,
        })
    }
}

fn get_file(repo: &ApiRepo, model_id: &str, file: &str) -> Result<PathBuf> {
    repo.get(file)
        .with_context(|| format!("Failed to download {} from {}", file, model_id))
}

/// Files from a directory laid out like a Hub snapshot.
pub fn local_model_files(dir: &Path) -> Result<ModelFiles> {
    let single = dir.join(SINGLE_WEIGHTS_FILE);
    let weights = if single.exists() {
        vec![single]
    } else {
        shard_names(&dir.join(WEIGHTS_INDEX_FILE))?
            .into_iter()
            .map(|name| dir.join(name))
            .collect()
    };

    Ok(ModelFiles {
        model_id: dir.display().to_string(),
        config: dir.join(CONFIG_FILE),
        tokenizer: dir.join(TOKENIZER_FILE),
        weights,
    })
}

/// Unique shard file names listed in a safetensors index.
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let json = std::fs::read_to_string(index_path)
        .with_context(|| format!("Failed to read {}", index_path.display()))?;
    let index: serde_json::Value = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse {}", index_path.display()))?;

    let names: BTreeSet<String> = index["weight_map"]
        .as_object()
        .context("Weights index has no weight_map")?
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    Ok(names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_single_file_layout() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join(SINGLE_WEIGHTS_FILE), b"")?;

        let files = local_model_files(dir.path())?;
        assert_eq!(files.weights, vec![dir.path().join(SINGLE_WEIGHTS_FILE)]);
        assert_eq!(files.tokenizer, dir.path().join(TOKENIZER_FILE));
        Ok(())
    }

    #[test]
    fn test_local_sharded_layout() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(
            dir.path().join(WEIGHTS_INDEX_FILE),
            r#"{"weight_map": {
                "a.weight": "model-00002-of-00002.safetensors",
                "b.weight": "model-00001-of-00002.safetensors",
                "c.weight": "model-00001-of-00002.safetensors"
            }}"#,
        )?;

        let files = local_model_files(dir.path())?;
        assert_eq!(
            files.weights,
            vec![
                dir.path().join("model-00001-of-00002.safetensors"),
                dir.path().join("model-00002-of-00002.safetensors"),
            ]
        );
        Ok(())
    }
}
