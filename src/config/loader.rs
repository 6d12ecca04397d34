// Configuration loader
// Loads settings from an explicit path, ~/.followup/config.toml, or defaults

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Config;

/// Default config location: `~/.followup/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".followup").join("config.toml"))
}

/// Load configuration.
///
/// An explicit path must exist. Without one, the home config is used when
/// present, otherwise built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file not found: {}", path.display());
            }
            load_from_file(path)?
        }
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => load_from_file(&path)?,
            None => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        },
    };

    config
        .validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

/// Parse a TOML config file; absent sections and fields take their defaults.
pub fn load_from_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;

    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionTarget;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
device = "cpu"
base_models = ["local/tiny-model"]

[corpus]
max_history_messages = 4

[generation]
max_questions = 3
"#
        )?;

        let config = load_config(Some(file.path()))?;
        assert_eq!(config.device, ExecutionTarget::Cpu);
        assert_eq!(config.base_models, vec!["local/tiny-model".to_string()]);
        assert_eq!(config.corpus.max_history_messages, 4);
        assert_eq!(config.corpus.max_examples_per_conversation, 40);
        assert_eq!(config.generation.max_questions, 3);
        assert_eq!(config.training.epochs, 2);
        Ok(())
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let err = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_invalid_values_fail_validation() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[lora]\nrank = 0")?;
        assert!(load_config(Some(file.path())).is_err());
        Ok(())
    }
}
