// LoRA (Low-Rank Adaptation) Implementation
// Low-rank delta on the output projection of a frozen base model

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{Init, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::constants::{ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
use crate::config::LoraConfig;

/// Module the adapter is attached to.
pub const LORA_TARGET: &str = "lm_head";

/// Persisted adapter shape (`adapter_config.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(flatten)]
    pub lora: LoraConfig,
    pub target_modules: Vec<String>,
    pub in_features: usize,
    pub out_features: usize,
}

impl AdapterConfig {
    pub fn new(lora: LoraConfig, in_features: usize, out_features: usize) -> Self {
        Self {
            lora,
            target_modules: vec![LORA_TARGET.to_string()],
            in_features,
            out_features,
        }
    }
}

/// Low-rank matrices for a single layer
#[derive(Debug, Clone)]
pub struct LoRALayer {
    /// A matrix: rank × input_dim
    lora_a: Linear,
    /// B matrix: output_dim × rank
    lora_b: Linear,
    /// Scaling factor (alpha / rank)
    scaling: f64,
    dropout: f32,
}

impl LoRALayer {
    /// A gets Kaiming init, B starts at zero so the adapter begins as a no-op
    pub fn new(input_dim: usize, output_dim: usize, config: &LoraConfig, vb: VarBuilder) -> Result<Self> {
        let a = vb.pp("lora_a").get_with_hints(
            (config.rank, input_dim),
            "weight",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let b = vb
            .pp("lora_b")
            .get_with_hints((output_dim, config.rank), "weight", Init::Const(0.0))?;

        Ok(Self {
            lora_a: Linear::new(a, None),
            lora_b: Linear::new(b, None),
            scaling: config.scaling(),
            dropout: config.dropout,
        })
    }

    /// Scaled delta `(B @ A @ dropout(input)) * scaling`
    pub fn delta(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let input = if train && self.dropout > 0.0 {
            candle_nn::ops::dropout(input, self.dropout)?
        } else {
            input.clone()
        };

        let lora_a_out = self.lora_a.forward(&input)?;
        let lora_b_out = self.lora_b.forward(&lora_a_out)?;
        Ok((lora_b_out * self.scaling)?)
    }
}

/// LoRA adapter over the output projection
pub struct LoRAAdapter {
    layer: LoRALayer,
    config: AdapterConfig,
    /// Variable map for all parameters
    varmap: VarMap,
    device: Device,
}

impl std::fmt::Debug for LoRAAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoRAAdapter")
            .field("config", &self.config)
            .field("device", &self.device)
            .field("varmap", &"<VarMap>")
            .finish()
    }
}

impl LoRAAdapter {
    /// Create new adapter for a projection of `in_features` → `out_features`
    pub fn new(config: AdapterConfig, device: Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let layer = LoRALayer::new(
            config.in_features,
            config.out_features,
            &config.lora,
            vb.pp(LORA_TARGET),
        )?;

        Ok(Self {
            layer,
            config,
            varmap,
            device,
        })
    }

    /// Adapted logits: `base_logits + delta(hidden)`
    pub fn apply(&self, hidden: &Tensor, base_logits: &Tensor, train: bool) -> Result<Tensor> {
        let delta = self.layer.delta(hidden, train)?;
        Ok((base_logits + delta)?)
    }

    /// Trainable parameters
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn num_parameters(&self) -> usize {
        self.vars().iter().map(|v| v.elem_count()).sum()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Save weights and config into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create adapter dir {}", dir.display()))?;

        let weights_path = dir.join(ADAPTER_WEIGHTS_FILE);
        self.varmap
            .save(&weights_path)
            .with_context(|| format!("Failed to save LoRA adapter to {:?}", weights_path))?;

        let config_path = dir.join(ADAPTER_CONFIG_FILE);
        let config_json = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(&config_path, config_json)
            .with_context(|| format!("Failed to save config to {:?}", config_path))?;

        tracing::info!("Saved LoRA adapter to {:?}", dir);
        Ok(())
    }

    /// Load adapter weights and config from `dir`
    pub fn load(dir: &Path, device: Device) -> Result<Self> {
        let config_path = dir.join(ADAPTER_CONFIG_FILE);
        let config_json = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        let config: AdapterConfig = serde_json::from_str(&config_json)
            .with_context(|| format!("Failed to parse {:?}", config_path))?;

        let mut adapter = Self::new(config, device)?;

        let weights_path = dir.join(ADAPTER_WEIGHTS_FILE);
        adapter
            .varmap
            .load(&weights_path)
            .with_context(|| format!("Failed to load LoRA weights from {:?}", weights_path))?;

        tracing::info!("Loaded LoRA adapter from {:?}", dir);
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn adapter() -> Result<LoRAAdapter> {
        LoRAAdapter::new(AdapterConfig::new(LoraConfig::default(), 6, 10), Device::Cpu)
    }

    #[test]
    fn test_lora_adapter_creation() -> Result<()> {
        let adapter = adapter()?;
        assert_eq!(adapter.vars().len(), 2);
        // A: 8×6, B: 10×8
        assert_eq!(adapter.num_parameters(), 8 * 6 + 10 * 8);
        assert_eq!(adapter.config().target_modules, vec!["lm_head".to_string()]);
        Ok(())
    }

    #[test]
    fn test_fresh_adapter_is_identity() -> Result<()> {
        let adapter = adapter()?;
        let hidden = Tensor::randn(0f32, 1f32, (3, 6), &Device::Cpu)?;
        let base = Tensor::randn(0f32, 1f32, (3, 10), &Device::Cpu)?;

        let out = adapter.apply(&hidden, &base, false)?;
        let diff = (out - &base)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new()?;
        let adapter = adapter()?;
        adapter.save(dir.path())?;

        assert!(dir.path().join(ADAPTER_WEIGHTS_FILE).exists());
        let config_json = std::fs::read_to_string(dir.path().join(ADAPTER_CONFIG_FILE))?;
        assert!(config_json.contains("\"rank\": 8"));

        let loaded = LoRAAdapter::load(dir.path(), Device::Cpu)?;
        assert_eq!(loaded.config(), adapter.config());

        let hidden = Tensor::randn(0f32, 1f32, (2, 6), &Device::Cpu)?;
        let a = adapter.layer.lora_a.forward(&hidden)?;
        let b = loaded.layer.lora_a.forward(&hidden)?;
        let diff = (a - b)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }
}
